//! Objects API: the durable write path from client to server.
//!
//! `ObjectsApi` is the seam the offline queue and session push through;
//! `HttpObjectsApi` is the REST implementation. Tests script the trait.
//!
//! ERROR HANDLING
//! ==============
//! HTTP statuses collapse into `ApiError`. Anything the server did not
//! explicitly reject (network failure, 5xx, unexpected codes) is
//! `Transient` and safe to retry later; the rest are permanent.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use async_trait::async_trait;
use frames::{CanvasObject, ErrorCode, FieldError, ObjectInput, ObjectPatch};
use reqwest::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid credential")]
    Unauthorized,
    #[error("not permitted on this board")]
    Forbidden,
    #[error("board or object not found")]
    NotFound,
    #[error("validation failed")]
    ValidationFailed(Vec<FieldError>),
    #[error("transient failure: {0}")]
    Transient(String),
}

impl ApiError {
    /// Permanent errors will fail the same way on retry.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }

    /// The server refused this particular write. A bad credential is not a
    /// rejection: every write would fail the same way until it is renewed.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Forbidden | Self::NotFound | Self::ValidationFailed(_))
    }
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "E_UNAUTHORIZED",
            Self::Forbidden => "E_FORBIDDEN",
            Self::NotFound => "E_NOT_FOUND",
            Self::ValidationFailed(_) => "E_VALIDATION",
            Self::Transient(_) => "E_TRANSIENT",
        }
    }

    fn retryable(&self) -> bool {
        !self.is_permanent()
    }
}

#[async_trait]
pub trait ObjectsApi: Send + Sync {
    async fn create(&self, token: &str, board_id: Uuid, input: &ObjectInput) -> Result<CanvasObject, ApiError>;

    async fn update(&self, token: &str, board_id: Uuid, id: Uuid, patch: &ObjectPatch)
    -> Result<CanvasObject, ApiError>;

    async fn delete(&self, token: &str, board_id: Uuid, id: Uuid) -> Result<(), ApiError>;
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpObjectsApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectsApi {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_owned() }
    }

    fn objects_url(&self, board_id: Uuid) -> String {
        objects_endpoint(&self.base_url, board_id)
    }

    fn object_url(&self, board_id: Uuid, id: Uuid) -> String {
        format!("{}/{id}", objects_endpoint(&self.base_url, board_id))
    }
}

pub(crate) fn objects_endpoint(base_url: &str, board_id: Uuid) -> String {
    format!("{base_url}/api/boards/{board_id}/objects")
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    details: Vec<FieldError>,
}

/// Map a non-success response to the error taxonomy.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::FORBIDDEN => ApiError::Forbidden,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            let details = serde_json::from_str::<ErrorBody>(body)
                .map(|b| b.details)
                .unwrap_or_default();
            ApiError::ValidationFailed(details)
        }
        other => ApiError::Transient(format!("HTTP {}", other.as_u16())),
    }
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transient(err.to_string())
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(error_for_status(status, &body));
    }
    resp.json::<T>().await.map_err(transport)
}

#[async_trait]
impl ObjectsApi for HttpObjectsApi {
    async fn create(&self, token: &str, board_id: Uuid, input: &ObjectInput) -> Result<CanvasObject, ApiError> {
        let resp = self
            .client
            .post(self.objects_url(board_id))
            .bearer_auth(token)
            .json(input)
            .send()
            .await
            .map_err(transport)?;
        read_json(resp).await
    }

    async fn update(
        &self,
        token: &str,
        board_id: Uuid,
        id: Uuid,
        patch: &ObjectPatch,
    ) -> Result<CanvasObject, ApiError> {
        let resp = self
            .client
            .patch(self.object_url(board_id, id))
            .bearer_auth(token)
            .json(patch)
            .send()
            .await
            .map_err(transport)?;
        read_json(resp).await
    }

    async fn delete(&self, token: &str, board_id: Uuid, id: Uuid) -> Result<(), ApiError> {
        let resp = self
            .client
            .delete(self.object_url(board_id, id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(error_for_status(status, &body))
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
