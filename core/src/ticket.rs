//! Ticket domain model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Currency assumed when an upstream system sends an empty one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Booking status of a ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Booking confirmed.
    Confirmed,
    /// Booking canceled.
    Canceled,
}

impl TicketStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a status string is neither `confirmed` nor `canceled`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown ticket status")]
pub struct UnknownTicketStatus(pub String);

impl FromStr for TicketStatus {
    type Err = UnknownTicketStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "canceled" => Ok(Self::Canceled),
            other => Err(UnknownTicketStatus(other.to_string())),
        }
    }
}

/// Price as sent by upstream systems: a decimal string and a currency code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Decimal amount, e.g. `"10.00"`.
    pub amount: String,
    /// ISO currency code, may arrive empty.
    #[serde(default)]
    pub currency: String,
}

/// A ticket as carried by booking events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier.
    pub ticket_id: String,
    /// Booking status.
    pub status: TicketStatus,
    /// Customer contact.
    pub customer_email: String,
    /// Ticket price.
    pub price: Price,
}

/// Persisted ticket row.
#[derive(Clone, Debug, PartialEq)]
pub struct TicketRecord {
    /// Primary key.
    pub ticket_id: String,
    /// Parsed price amount.
    pub price_amount: f64,
    /// Currency code.
    pub price_currency: String,
    /// Customer contact.
    pub customer_email: String,
}

/// Returned when a price amount is not a decimal number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid price amount '{0}'")]
pub struct InvalidPriceAmount(pub String);

impl TicketRecord {
    /// Build a record from a ticket, parsing its price amount.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPriceAmount`] when the amount does not parse as a number.
    pub fn from_ticket(ticket: &Ticket) -> Result<Self, InvalidPriceAmount> {
        let price_amount = ticket
            .price
            .amount
            .trim()
            .parse::<f64>()
            .map_err(|_| InvalidPriceAmount(ticket.price.amount.clone()))?;

        Ok(Self {
            ticket_id: ticket.ticket_id.clone(),
            price_amount,
            price_currency: ticket.price.currency.clone(),
            customer_email: ticket.customer_email.clone(),
        })
    }

    /// Amount rendered with two decimals.
    #[must_use]
    pub fn formatted_amount(&self) -> String {
        format!("{:.2}", self.price_amount)
    }
}
