//! Record identifiers and sharded-path utilities.
//!
//! Negotiation records are stored under sharded directories derived from a UUID. Identifiers
//! use a *canonical* representation for storage: **32 lowercase hexadecimal characters** (no
//! hyphens), the same value `Uuid::simple()` produces.
//!
//! ## Deterministic identifiers
//! A receiver learns about a transfer from the Task id the sender chose, and the same
//! notification may be delivered more than once. [`RecordId::derive`] turns a tuple of natural
//! keys (customer id, Task id) into a stable name-based (v5) UUID, so repeated deliveries land in
//! the same record.
//!
//! ## Sharded directory layout
//! For a canonical UUID `u`, data lives under:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`
//!
//! Example:
//! `incoming_transfers/55/0e/550e8400e29b41d4a716446655440000/`

mod record_id;

pub use record_id::{RecordId, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type UuidResult<T> = Result<T, UuidError>;
