//! HTTP API of the tickets service.
//!
//! - `GET /health`: liveness
//! - `POST /tickets-status`: intake, one event published per ticket
//! - `GET /tickets`: stored tickets
//!
//! Every route runs under the correlation id layer, which echoes the
//! `Correlation-ID` header on the response.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use ticketflow_core::event::{TicketBookingCanceled, TicketBookingConfirmed, generate_idempotency_key};
use ticketflow_core::repository::TicketRepository;
use ticketflow_core::ticket::{Price, Ticket, TicketRecord, TicketStatus, UnknownTicketStatus};
use ticketflow_runtime::{EventPublisher, PublishError};
use ticketflow_web::handlers::health_check;
use ticketflow_web::{
    AppError, CorrelationId, IdempotencyKey, WebResult, correlation_id_layer, http_trace_layer,
};
use tracing::info;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Publishes intake events
    pub publisher: EventPublisher,
    /// Serves `GET /tickets`
    pub repository: Arc<dyn TicketRepository>,
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tickets-status", post(tickets_status))
        .route("/tickets", get(list_tickets))
        .layer(correlation_id_layer())
        .layer(http_trace_layer())
        .with_state(state)
}

/// `POST /tickets-status` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketsStatusRequest {
    /// Tickets whose status changed
    pub tickets: Vec<TicketStatusUpdate>,
}

/// One ticket of the intake body. The status stays a string so unknown
/// values can be answered with a 400 of our own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketStatusUpdate {
    /// Ticket id
    pub ticket_id: String,
    /// `confirmed` or `canceled`
    pub status: String,
    /// Customer email
    pub customer_email: String,
    /// Ticket price
    pub price: Price,
}

/// One entry of `GET /tickets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketView {
    /// Ticket id
    pub ticket_id: String,
    /// Customer email
    pub customer_email: String,
    /// Price with the amount formatted to two decimals
    pub price: Price,
}

impl From<TicketRecord> for TicketView {
    fn from(record: TicketRecord) -> Self {
        Self {
            price: Price {
                amount: record.formatted_amount(),
                currency: record.price_currency,
            },
            ticket_id: record.ticket_id,
            customer_email: record.customer_email,
        }
    }
}

#[derive(Error, Debug)]
enum IntakeError {
    #[error(transparent)]
    UnknownStatus(#[from] UnknownTicketStatus),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        match self {
            Self::UnknownStatus(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
            Self::Publish(err) => {
                AppError::internal("failed to publish ticket event", err).into_response()
            }
        }
    }
}

async fn tickets_status(
    State(state): State<ApiState>,
    CorrelationId(correlation_id): CorrelationId,
    IdempotencyKey(idempotency_key): IdempotencyKey,
    Json(request): Json<TicketsStatusRequest>,
) -> Result<StatusCode, IntakeError> {
    // Reject the whole batch before publishing anything
    let tickets = request
        .tickets
        .into_iter()
        .map(|update| -> Result<Ticket, UnknownTicketStatus> {
            Ok(Ticket {
                status: TicketStatus::from_str(&update.status)?,
                ticket_id: update.ticket_id,
                customer_email: update.customer_email,
                price: update.price,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let idempotency_key = idempotency_key.unwrap_or_else(generate_idempotency_key);

    for ticket in tickets {
        let header = state.publisher.new_header(Some(idempotency_key.as_str()));
        let correlation = Some(correlation_id.as_str());
        match ticket.status {
            TicketStatus::Confirmed => {
                let event = TicketBookingConfirmed { header, ticket };
                state.publisher.publish(&event, correlation).await?;
            }
            TicketStatus::Canceled => {
                let event = TicketBookingCanceled { header, ticket };
                state.publisher.publish(&event, correlation).await?;
            }
        }
    }

    info!(correlation_id = %correlation_id, "Ticket statuses accepted");
    Ok(StatusCode::OK)
}

async fn list_tickets(State(state): State<ApiState>) -> WebResult<Json<Vec<TicketView>>> {
    let records = state
        .repository
        .list_all()
        .await
        .map_err(|err| AppError::internal("failed to load tickets", err))?;

    Ok(Json(records.into_iter().map(TicketView::from).collect()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn view_formats_amount_with_two_decimals() {
        let view = TicketView::from(TicketRecord {
            ticket_id: "T1".to_string(),
            price_amount: 10.0,
            price_currency: "USD".to_string(),
            customer_email: "a@b.com".to_string(),
        });

        assert_eq!(
            serde_json::to_value(&view).unwrap(),
            serde_json::json!({
                "ticket_id": "T1",
                "customer_email": "a@b.com",
                "price": {"amount": "10.00", "currency": "USD"}
            })
        );
    }
}
