mod bson;
mod collection;

pub use bson::Id;
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};

/// Is this a duplicate-key rejection from a unique index?
///
/// Uniqueness constraints are our at-most-once enforcement points, so
/// callers need to tell "already exists" apart from "store unavailable".
pub fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::BulkWrite(bulk) => bulk
            .write_errors
            .as_ref()
            .map(|errors| errors.iter().any(|e| e.code == 11000))
            .unwrap_or(false),
        _ => false,
    }
}
