use chrono::{DateTime, Utc};

use outlay_core::errors::RepositoryError;

pub mod action;
pub mod directory;
pub mod expense;
pub mod memory;
pub mod rule;

pub use action::SqlApprovalActionRepository;
pub use directory::SqlUserDirectory;
pub use expense::SqlExpenseRepository;
pub use memory::{
    InMemoryApprovalActionRepository, InMemoryExpenseRepository, InMemoryRuleRepository,
    InMemoryUserDirectory,
};
pub use rule::SqlRuleRepository;

pub(crate) fn backend(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend(error.to_string())
}

pub(crate) fn decode(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)).map_err(|error| {
        decode(format!("column `{column}` holds invalid timestamp `{value}`: {error}"))
    })
}
