use rocket::{http::Status, response::Responder};
use thiserror::Error;

use crate::ledger::LedgerRef;

pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error taxonomy.
///
/// Only `UpstreamTimeout` is ever retried locally (once, after an idempotent
/// re-query of the ledger); everything else propagates unchanged to the
/// caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error(transparent)]
    OidParse(#[from] mongodb::bson::oid::Error),
    #[error(transparent)]
    BsonSer(#[from] mongodb::bson::ser::Error),
    /// Bad or missing input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The request conflicts with existing state (already exists, already
    /// voted, immutable field). User-actionable, never retried.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// The ledger call exceeded its time bound and a re-query could not
    /// determine the outcome. The operation may still complete upstream.
    #[error("Ledger timeout: {0}")]
    UpstreamTimeout(String),
    /// The ledger accepted a write but the metadata mirror failed. The
    /// confirmation reference is retained so reconciliation can complete
    /// the mirror; this must never be silently dropped.
    #[error("Ledger recorded {ledger_ref} but metadata mirror failed: {detail}")]
    Inconsistency { ledger_ref: LedgerRef, detail: String },
    /// Ledger transport or contract-level failure other than the above.
    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        Err(match self {
            Self::Db(ref e) => {
                error!("Database error: {e}");
                Status::InternalServerError
            }
            Self::BsonSer(ref e) => {
                error!("Serialisation error: {e}");
                Status::InternalServerError
            }
            Self::OidParse(_) | Self::Validation(_) => Status::BadRequest,
            Self::Conflict(_) => Status::Conflict,
            Self::NotFound(_) => Status::NotFound,
            Self::UpstreamTimeout(_) => Status::GatewayTimeout,
            Self::Inconsistency {
                ref ledger_ref,
                ref detail,
            } => {
                // The write exists on the ledger; only the mirror is pending.
                // Not fatal to the caller, but it must be reconciled.
                error!("Unmirrored ledger write {ledger_ref}: {detail}");
                Status::Accepted
            }
            Self::Ledger(ref e) => {
                error!("Ledger error: {e}");
                Status::BadGateway
            }
        })
    }
}
