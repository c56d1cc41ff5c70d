//! Event handlers of the tickets service.
//!
//! Every handler gets its own consumer group, so a failing collaborator only
//! delays redelivery for the handler that calls it.
//!
//! | Handler                    | Event                    | Effect                               |
//! |----------------------------|--------------------------|--------------------------------------|
//! | `issues-receipt`           | `TicketBookingConfirmed` | receipt with the event's key         |
//! | `store-confirmed`          | `TicketBookingConfirmed` | insert-if-absent ticket record       |
//! | `remove-canceled`          | `TicketBookingCanceled`  | delete ticket record                 |
//! | `print-ticket`             | `TicketBookingConfirmed` | row in `tickets-to-print`            |
//! | `append-canceled`          | `TicketBookingCanceled`  | row in `tickets-to-refund`           |
//! | `create-confirmation-file` | `TicketBookingConfirmed` | ticket file, then `TicketPrinted`    |
//!
//! The spreadsheet handlers are not idempotent: a redelivered event appends
//! its row again.

use crate::clients::{FilesService, IssueReceiptRequest, ReceiptsService, SpreadsheetsService};
use std::sync::Arc;
use ticketflow_core::event::{TicketBookingCanceled, TicketBookingConfirmed, TicketPrinted};
use ticketflow_core::repository::TicketRepository;
use ticketflow_core::ticket::{Ticket, TicketRecord};
use ticketflow_runtime::metrics::TicketMetrics;
use ticketflow_runtime::{
    EventPublisher, HandlerError, HandlerResult, MessageContext, Router, RouterError,
};
use tracing::debug;

/// Sheet receiving confirmed tickets.
pub const TICKETS_TO_PRINT_SHEET: &str = "tickets-to-print";
/// Sheet receiving canceled tickets.
pub const TICKETS_TO_REFUND_SHEET: &str = "tickets-to-refund";
/// Body of generated ticket files.
pub const TICKET_FILE_CONTENT: &str = "hi";

/// Everything the handlers talk to.
#[derive(Clone)]
pub struct HandlerDeps {
    /// Receipts collaborator
    pub receipts: Arc<dyn ReceiptsService>,
    /// Spreadsheets collaborator
    pub spreadsheets: Arc<dyn SpreadsheetsService>,
    /// Files collaborator
    pub files: Arc<dyn FilesService>,
    /// Ticket storage
    pub repository: Arc<dyn TicketRepository>,
    /// Used to emit derived events
    pub publisher: EventPublisher,
}

/// Bind all six handlers on `router`.
///
/// # Errors
///
/// Returns [`RouterError::DuplicateConsumerGroup`] if one of the handler
/// names is already bound on its topic.
pub fn register(router: &mut Router, deps: &HandlerDeps) -> Result<(), RouterError> {
    let d = deps.clone();
    router.add_handler("issues-receipt", move |ctx, event: TicketBookingConfirmed| {
        issue_receipt(d.clone(), ctx, event)
    })?;

    let d = deps.clone();
    router.add_handler("store-confirmed", move |_ctx, event: TicketBookingConfirmed| {
        store_confirmed(d.clone(), event)
    })?;

    let d = deps.clone();
    router.add_handler("remove-canceled", move |_ctx, event: TicketBookingCanceled| {
        remove_canceled(d.clone(), event)
    })?;

    let d = deps.clone();
    router.add_handler("print-ticket", move |ctx, event: TicketBookingConfirmed| {
        append_ticket_row(d.clone(), ctx, TICKETS_TO_PRINT_SHEET, event.ticket)
    })?;

    let d = deps.clone();
    router.add_handler("append-canceled", move |ctx, event: TicketBookingCanceled| {
        append_ticket_row(d.clone(), ctx, TICKETS_TO_REFUND_SHEET, event.ticket)
    })?;

    let d = deps.clone();
    router.add_handler(
        "create-confirmation-file",
        move |ctx, event: TicketBookingConfirmed| create_confirmation_file(d.clone(), ctx, event),
    )?;

    Ok(())
}

fn correlation_id(ctx: &MessageContext) -> String {
    ctx.correlation_id().unwrap_or_default().to_string()
}

async fn issue_receipt(
    deps: HandlerDeps,
    ctx: MessageContext,
    event: TicketBookingConfirmed,
) -> HandlerResult {
    let request = IssueReceiptRequest {
        ticket_id: event.ticket.ticket_id,
        status: event.ticket.status,
        customer_email: event.ticket.customer_email,
        price: event.ticket.price,
        idempotency_key: event.header.idempotency_key,
    };

    deps.receipts
        .issue_receipt(&correlation_id(&ctx), request)
        .await?;
    Ok(())
}

async fn store_confirmed(deps: HandlerDeps, event: TicketBookingConfirmed) -> HandlerResult {
    let record = TicketRecord::from_ticket(&event.ticket)
        .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;

    deps.repository.put(&record).await?;
    TicketMetrics::record_stored();
    debug!(ticket_id = %record.ticket_id, "Ticket stored");
    Ok(())
}

async fn remove_canceled(deps: HandlerDeps, event: TicketBookingCanceled) -> HandlerResult {
    deps.repository.delete(&event.ticket.ticket_id).await?;
    TicketMetrics::record_deleted();
    debug!(ticket_id = %event.ticket.ticket_id, "Ticket removed");
    Ok(())
}

async fn append_ticket_row(
    deps: HandlerDeps,
    ctx: MessageContext,
    sheet: &'static str,
    ticket: Ticket,
) -> HandlerResult {
    let row = vec![
        ticket.ticket_id,
        ticket.customer_email,
        ticket.price.amount,
        ticket.price.currency,
    ];

    deps.spreadsheets
        .append_row(&correlation_id(&ctx), sheet, row)
        .await?;
    Ok(())
}

async fn create_confirmation_file(
    deps: HandlerDeps,
    ctx: MessageContext,
    event: TicketBookingConfirmed,
) -> HandlerResult {
    let correlation_id = correlation_id(&ctx);
    let file_name = format!("{}-ticket.html", event.ticket.ticket_id);

    deps.files
        .put_file(&correlation_id, &file_name, TICKET_FILE_CONTENT)
        .await?;

    let printed = TicketPrinted {
        header: event.header,
        ticket_id: event.ticket.ticket_id,
        file_name,
    };
    deps.publisher
        .publish(&printed, Some(correlation_id.as_str()))
        .await?;
    Ok(())
}
