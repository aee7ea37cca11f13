pub mod comment;
pub mod post;
pub mod vote;

pub use comment::*;
pub use post::*;
pub use vote::*;

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, Result};

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,35}$").expect("id pattern is valid")
});

/// Rejects ids the document store would not have generated.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(AppError::InvalidArgument(format!("Malformed {} id: {:?}", kind, id)))
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
