//! Unified error handling for the moderation core.
//!
//! A single hierarchy threaded through the ACL engine, the request
//! validator, and the moderation dispatcher, with conversions from each
//! port's own leaf error type.

use thiserror::Error;

/// Top-level error kind for the core (§7).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("no such entity: {0}")]
    NoSuchEntity(String),

    #[error("ban violation: banned for {remaining_secs}s")]
    BanViolation { remaining_secs: i64 },

    #[error("invalid acl expression: {0}")]
    ValidationSyntaxError(#[from] crate::acl::ValidationError),

    #[error("downstream port error: {0}")]
    TransientPortError(#[from] PortError),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Static error code for structured log fields, mirroring the
    /// teacher's `HandlerError::error_code`/`ChannelError::error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::NotAuthorized(_) => "not_authorized",
            Error::NoSuchEntity(_) => "no_such_entity",
            Error::BanViolation { .. } => "ban_violation",
            Error::ValidationSyntaxError(_) => "validation_syntax_error",
            Error::TransientPortError(_) => "transient_port_error",
            Error::Fatal(_) => "fatal",
        }
    }

    /// HTTP-like numeric code for the validator's `(ok, code, message)` contract.
    pub fn numeric(&self) -> i32 {
        match self {
            Error::InvalidRequest(_) => 400,
            Error::NotAuthorized(_) => 403,
            Error::NoSuchEntity(_) => 404,
            Error::BanViolation { .. } => 403,
            Error::ValidationSyntaxError(_) => 400,
            Error::TransientPortError(_) => 503,
            Error::Fatal(_) => 500,
        }
    }
}

/// Errors surfaced by the C2–C5 ports (persistence, broadcast, external
/// bus, internal bus). Kept as its own leaf type for the same reason
/// the teacher keeps `DbError` next to `sqlx::Error` in `db/mod.rs`:
/// the `#[from]` conversions need the concrete dependency in scope.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("broadcast transport error: {0}")]
    Broadcast(String),

    #[error("external bus error: {0}")]
    ExternalBus(String),

    #[error("internal bus error: {0}")]
    InternalBus(String),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
