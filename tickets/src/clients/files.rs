//! Files API.

use super::{ClientError, Gateway};
use async_trait::async_trait;
use reqwest::Method;

/// Stores text files by id. Writing the same id again overwrites it.
#[async_trait]
pub trait FilesService: Send + Sync {
    /// Store `content` under `file_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the file could not be stored.
    async fn put_file(
        &self,
        correlation_id: &str,
        file_id: &str,
        content: &str,
    ) -> Result<(), ClientError>;
}

/// `PUT {gateway}/files-api/files/{file_id}/content`
#[derive(Clone, Debug)]
pub struct FilesClient {
    gateway: Gateway,
}

impl FilesClient {
    /// Create a files client on top of `gateway`.
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl FilesService for FilesClient {
    async fn put_file(
        &self,
        correlation_id: &str,
        file_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        let builder = self
            .gateway
            .request(
                Method::PUT,
                &format!("/files-api/files/{file_id}/content"),
                correlation_id,
            )
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(content.to_string());

        Gateway::send("files", builder).await
    }
}
