//! Statistics reported at the end of a scrape.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Summary of one scrape run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub collection: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub pages: usize,
    pub committed: usize,
    pub duplicates: usize,
    pub retries: usize,
    pub failures: usize,
    pub pdf_documents: usize,
    /// Documents added to the workspace by successful batch calls
    pub embedded: usize,
}

impl RunStats {
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    /// Share of attempted links that ended up committed.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.committed + self.failures;
        if attempted == 0 {
            return 0.0;
        }
        self.committed as f64 / attempted as f64
    }
}
