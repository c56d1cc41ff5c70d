//! Ticket booking service.
//!
//! Booking status changes arrive on `POST /tickets-status` and are published
//! as `TicketBookingConfirmed` / `TicketBookingCanceled` events. Six handlers
//! consume them, each in its own consumer group:
//!
//! ```text
//! HTTP intake ──► publish ──► topic ──► consumer group ──► middleware ──► handler
//!                                                                            │
//!                              receipts / spreadsheets / files / storage ◄───┘
//! ```
//!
//! Delivery is at-least-once, so storage writes are idempotent and
//! collaborator calls carry the event's idempotency key.

pub mod api;
pub mod app;
pub mod clients;
pub mod config;
pub mod handlers;

pub use app::{Application, Collaborators, RunningApplication};
pub use config::{Config, ConfigError};
