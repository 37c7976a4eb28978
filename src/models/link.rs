//! Link identity and seen-set membership.
//!
//! A link and its `link://`-tagged variant name the same document. Every
//! membership check looks at both forms.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Scheme tag the ingestion service prefixes to uploaded links.
pub const LINK_TAG: &str = "link://";

/// The untagged form of a link.
pub fn bare(link: &str) -> &str {
    link.strip_prefix(LINK_TAG).unwrap_or(link).trim()
}

/// The `link://`-tagged form of a link.
pub fn tagged(link: &str) -> String {
    format!("{LINK_TAG}{}", bare(link))
}

/// Membership structure preventing repeat processing of a link.
///
/// Implementations must make `claim` atomic: the check and the mark happen
/// in one critical section.
pub trait SeenStore: Send + Sync {
    /// Whether either form of the link has been seen.
    fn has(&self, link: &str) -> bool;

    /// Record the link as seen.
    fn mark(&self, link: &str);

    /// Mark the link if unseen. Returns `false` when it was already seen.
    fn claim(&self, link: &str) -> bool;

    /// Forget the link so a later attempt may claim it again.
    fn release(&self, link: &str);

    /// Number of distinct links recorded.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory seen set guarded by a read/write lock.
#[derive(Debug, Default)]
pub struct MemorySeenSet {
    links: RwLock<HashSet<String>>,
}

impl MemorySeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set pre-populated with already-known links.
    pub fn with_links<I, S>(links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = Self::new();
        for link in links {
            set.mark(link.as_ref());
        }
        set
    }

    fn read(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        self.links.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        self.links.write().unwrap_or_else(|e| e.into_inner())
    }

    fn contains(set: &HashSet<String>, link: &str) -> bool {
        let key = bare(link);
        set.contains(key) || set.contains(&tagged(key))
    }
}

impl SeenStore for MemorySeenSet {
    fn has(&self, link: &str) -> bool {
        Self::contains(&self.read(), link)
    }

    fn mark(&self, link: &str) {
        self.write().insert(bare(link).to_string());
    }

    fn claim(&self, link: &str) -> bool {
        // Cheap shared check first; most repeats stop here.
        if self.has(link) {
            return false;
        }
        let mut set = self.write();
        if Self::contains(&set, link) {
            return false;
        }
        set.insert(bare(link).to_string())
    }

    fn release(&self, link: &str) {
        let mut set = self.write();
        let key = bare(link);
        set.remove(key);
        set.remove(&tagged(key));
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_forms() {
        assert_eq!(bare("link://https://x/a"), "https://x/a");
        assert_eq!(bare("https://x/a"), "https://x/a");
        assert_eq!(tagged("https://x/a"), "link://https://x/a");
        assert_eq!(tagged("link://https://x/a"), "link://https://x/a");
    }

    #[test]
    fn test_claim_treats_tagged_and_bare_as_same() {
        let set = MemorySeenSet::new();
        assert!(set.claim("https://x/a"));
        assert!(!set.claim("https://x/a"));
        assert!(!set.claim("link://https://x/a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_seeded_tagged_link_blocks_bare_claim() {
        let set = MemorySeenSet::with_links(["link://https://x/a"]);
        assert!(set.has("https://x/a"));
        assert!(!set.claim("https://x/a"));
        assert!(set.claim("https://x/b"));
    }

    #[test]
    fn test_release_allows_reclaim() {
        let set = MemorySeenSet::new();
        assert!(set.claim("https://x/a"));
        set.release("link://https://x/a");
        assert!(!set.has("https://x/a"));
        assert!(set.claim("https://x/a"));
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let set = Arc::new(MemorySeenSet::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    let link = if i % 2 == 0 {
                        "https://x/same"
                    } else {
                        "link://https://x/same"
                    };
                    set.claim(link)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
