//! Server-side failures as JSON responses.
//!
//! Client mistakes are answered by the handlers themselves. [`AppError`] covers
//! what is left: a dependency (bus, storage) failed while serving the request.
//! The client gets `500` with `{"code", "message"}`; the cause only goes to
//! the log.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A request that failed on our side.
///
/// # Examples
///
/// ```ignore
/// async fn list_tickets(State(state): State<ApiState>) -> WebResult<Json<Vec<TicketView>>> {
///     let records = state.repository.list_all().await
///         .map_err(|err| AppError::internal("failed to load tickets", err))?;
///     Ok(Json(records.into_iter().map(TicketView::from).collect()))
/// }
/// ```
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct AppError {
    code: &'static str,
    message: String,
    #[source]
    source: BoxError,
}

impl AppError {
    /// A `500` whose `message` is shown to the client and whose `source` is
    /// only logged.
    pub fn internal(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            code: "INTERNAL_SERVER_ERROR",
            message: message.into(),
            source: source.into(),
        }
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Machine-readable code of the response body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(
            code = %self.code,
            message = %self.message,
            error = %self.source,
            "Request failed"
        );

        let body = Json(ErrorBody {
            code: self.code,
            message: &self.message,
        });
        (self.status(), body).into_response()
    }
}
