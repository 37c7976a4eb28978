//! Client for the downstream ingestion API.
//!
//! [`IngestApi`] is the seam the rest of the pipeline talks to; the
//! concrete [`AnythingLlmClient`] speaks the v1 REST surface over a
//! [`GatedClient`].

use async_trait::async_trait;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{
    AuthResponse, DocumentsResponse, IngestConfig, RawText, RemoveDocuments, UpdateEmbeddings,
    UploadLink, UploadResponse,
};
use crate::utils::http::{GatedClient, RawResponse};

#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Verify the API key.
    async fn check_auth(&self) -> Result<()>;

    /// Ask the service to scrape and store a URL.
    async fn upload_link(&self, link: &str) -> Result<UploadResponse>;

    /// Upload a file's bytes under `name`.
    async fn upload_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<UploadResponse>;

    async fn upload_raw_text(&self, text: RawText) -> Result<UploadResponse>;

    /// Delete a stored document by its location.
    async fn remove_document(&self, location: &str) -> Result<()>;

    /// Embed stored documents into the workspace.
    async fn update_embeddings(&self, adds: Vec<String>) -> Result<()>;

    /// Tree of every stored document.
    async fn list_documents(&self) -> Result<DocumentsResponse>;
}

#[derive(Debug, Clone)]
pub struct AnythingLlmClient {
    http: GatedClient,
    endpoint: String,
    api_key: String,
    workspace: String,
}

impl AnythingLlmClient {
    pub fn new(http: GatedClient, config: &IngestConfig) -> Self {
        let endpoint = if config.endpoint.ends_with('/') {
            config.endpoint.clone()
        } else {
            format!("{}/", config.endpoint)
        };
        Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            workspace: config.workspace.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn call(&self, method: Method, path: &str, body: Option<&impl Serialize>) -> Result<RawResponse> {
        let mut request = self
            .http
            .request(method, &self.url(path))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        self.http.send(request).await
    }

    fn envelope(response: RawResponse, context: &str) -> Result<UploadResponse> {
        if !response.is_success() {
            return Err(AppError::upload(
                context,
                format!("status {}: {}", response.status, response.text().trim()),
            ));
        }
        response.json()
    }
}

#[async_trait]
impl IngestApi for AnythingLlmClient {
    async fn check_auth(&self) -> Result<()> {
        let response = self.call(Method::GET, "v1/auth", None::<&()>).await?;
        if response.status == 403 || response.status == 401 {
            return Err(AppError::Auth(format!("status {}", response.status)));
        }
        if !response.is_success() {
            return Err(AppError::BadStatusCode(response.status));
        }
        let auth: AuthResponse = response.json()?;
        if auth.authenticated {
            Ok(())
        } else {
            Err(AppError::Auth(
                auth.message.unwrap_or_else(|| "not authenticated".to_string()),
            ))
        }
    }

    async fn upload_link(&self, link: &str) -> Result<UploadResponse> {
        let response = self
            .call(Method::POST, "v1/document/upload-link", Some(&UploadLink { link }))
            .await?;
        Self::envelope(response, link)
    }

    async fn upload_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<UploadResponse> {
        let part = Part::bytes(bytes).file_name(name.to_string());
        let form = Form::new().part("file", part);
        let request = self
            .http
            .request(Method::POST, &self.url("v1/document/upload"))
            .bearer_auth(&self.api_key)
            .multipart(form);
        let response = self.http.send(request).await?;
        Self::envelope(response, name)
    }

    async fn upload_raw_text(&self, text: RawText) -> Result<UploadResponse> {
        let context = text.metadata.url.clone();
        let response = self
            .call(Method::POST, "v1/document/raw-text", Some(&text))
            .await?;
        Self::envelope(response, &context)
    }

    async fn remove_document(&self, location: &str) -> Result<()> {
        let body = RemoveDocuments {
            names: vec![location.to_string()],
        };
        let response = self
            .call(Method::DELETE, "v1/system/remove-documents", Some(&body))
            .await?;
        if !response.is_success() {
            return Err(AppError::BadStatusCode(response.status));
        }
        Ok(())
    }

    async fn update_embeddings(&self, adds: Vec<String>) -> Result<()> {
        let body = UpdateEmbeddings {
            adds,
            deletes: Vec::new(),
        };
        let path = format!("v1/workspace/{}/update-embeddings", self.workspace);
        let response = self.call(Method::POST, &path, Some(&body)).await?;
        if !response.is_success() {
            return Err(AppError::BadStatusCode(response.status));
        }
        Ok(())
    }

    async fn list_documents(&self) -> Result<DocumentsResponse> {
        let response = self.call(Method::GET, "v1/documents", None::<&()>).await?;
        if !response.is_success() {
            return Err(AppError::BadStatusCode(response.status));
        }
        response.json()
    }
}
