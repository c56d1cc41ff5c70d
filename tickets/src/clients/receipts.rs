//! Receipts API.

use super::{ClientError, Gateway};
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use ticketflow_core::ticket::{Price, TicketStatus};

/// Everything needed to issue a receipt for a booked ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssueReceiptRequest {
    /// Ticket the receipt is for
    pub ticket_id: String,
    /// Booking status at the time of the event
    pub status: TicketStatus,
    /// Customer the receipt goes to
    pub customer_email: String,
    /// Charged price
    pub price: Price,
    /// Idempotency key of the originating event
    pub idempotency_key: String,
}

/// Issues receipts.
///
/// Implementations must treat repeated requests with the same idempotency key
/// as one receipt.
#[async_trait]
pub trait ReceiptsService: Send + Sync {
    /// Issue a receipt.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the receipt could not be issued.
    async fn issue_receipt(
        &self,
        correlation_id: &str,
        request: IssueReceiptRequest,
    ) -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct PutReceiptBody<'a> {
    ticket_id: &'a str,
    price: &'a Price,
    idempotency_key: String,
}

impl<'a> PutReceiptBody<'a> {
    // One intake request carries many tickets under one key, so the key is made per ticket
    fn from_request(request: &'a IssueReceiptRequest) -> Self {
        Self {
            ticket_id: &request.ticket_id,
            price: &request.price,
            idempotency_key: format!("{}{}", request.idempotency_key, request.ticket_id),
        }
    }
}

/// `PUT {gateway}/receipts-api/receipts`
#[derive(Clone, Debug)]
pub struct ReceiptsClient {
    gateway: Gateway,
}

impl ReceiptsClient {
    /// Create a receipts client on top of `gateway`.
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ReceiptsService for ReceiptsClient {
    async fn issue_receipt(
        &self,
        correlation_id: &str,
        request: IssueReceiptRequest,
    ) -> Result<(), ClientError> {
        let builder = self
            .gateway
            .request(Method::PUT, "/receipts-api/receipts", correlation_id)
            .json(&PutReceiptBody::from_request(&request));

        Gateway::send("receipts", builder).await
    }
}
