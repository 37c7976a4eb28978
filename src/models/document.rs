//! Documents and request/response envelopes of the ingestion API.

use serde::{Deserialize, Serialize};

/// A document created by a successful upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    pub id: String,
    pub url: String,
    pub title: String,
    pub doc_author: String,
    pub description: String,
    pub doc_source: String,
    pub chunk_source: String,
    pub published: String,
    pub word_count: u64,
    pub page_content: String,
    #[serde(rename = "token_count_estimate")]
    pub token_count_estimate: u64,
    /// Storage path inside the ingestion service, used for embedding and removal
    pub location: String,
}

impl Document {
    /// Whether the extracted content mentions a PDF.
    pub fn references_pdf(&self) -> bool {
        self.page_content.contains(".pdf") || self.page_content.contains(".PDF")
    }

    /// Location with the document id folded into the file name.
    ///
    /// `custom-documents/page.json` with id `abc` becomes
    /// `custom-documents/page-abc.json`. Locations that already carry the
    /// id are returned unchanged.
    pub fn normalized_location(&self) -> String {
        if self.id.is_empty() || self.location.contains(&self.id) {
            return self.location.clone();
        }
        format!("{}-{}.json", self.location.replace(".json", ""), self.id)
    }
}

/// Response envelope shared by every upload endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadResponse {
    pub success: bool,
    pub error: Option<serde_json::Value>,
    pub documents: Vec<Document>,
}

impl UploadResponse {
    /// First document, if the upload produced any.
    pub fn into_first(self) -> Option<Document> {
        self.documents.into_iter().next()
    }

    /// Human-readable error carried by the envelope.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => "no documents uploaded".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadLink<'a> {
    pub link: &'a str,
}

/// Raw text upload body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawText {
    pub text_content: String,
    pub metadata: TextMeta,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMeta {
    pub title: String,
    pub url: String,
    pub doc_author: String,
    pub description: String,
    pub doc_source: String,
    pub chunk_source: String,
    pub published: String,
}

impl RawText {
    pub fn new(url: &str, title: &str, text: impl Into<String>) -> Self {
        Self {
            text_content: text.into(),
            metadata: TextMeta {
                title: title.to_string(),
                url: url.to_string(),
                ..TextMeta::default()
            },
        }
    }
}

/// Body of the remove-documents call.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveDocuments {
    pub names: Vec<String>,
}

/// Body of the workspace update-embeddings call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateEmbeddings {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub adds: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deletes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthResponse {
    pub authenticated: bool,
    pub message: Option<String>,
}

/// One node of the document listing tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Item {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub url: String,
    pub title: String,
    pub chunk_source: String,
    pub word_count: u64,
    pub cached: bool,
    pub items: Vec<Item>,
}

impl Item {
    fn is_folder(&self) -> bool {
        self.kind == "folder"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentsResponse {
    pub local_files: Item,
}

impl DocumentsResponse {
    /// Every non-folder item in the tree, depth first.
    pub fn flatten(&self) -> Vec<&Item> {
        let mut out = Vec::new();
        let mut stack: Vec<&Item> = self.local_files.items.iter().rev().collect();
        while let Some(item) = stack.pop() {
            if item.is_folder() {
                stack.extend(item.items.iter().rev());
            } else {
                out.push(item);
            }
        }
        out
    }

    /// Link identities of every ingested document, for seeding a seen set.
    pub fn seen_links(&self) -> Vec<String> {
        self.flatten()
            .into_iter()
            .flat_map(|item| [item.url.as_str(), item.chunk_source.as_str()])
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}
