//! CLI command implementations.

mod acquire;
mod admin;
mod query;
mod service;

pub use acquire::{cmd_download, cmd_extract_entities, cmd_process};
pub use admin::{cmd_backup, cmd_export, cmd_import, cmd_maintenance, cmd_setup};
pub use query::{cmd_list, cmd_search};
pub use service::{
    cmd_bulk_add, cmd_bulk_control, cmd_bulk_create, cmd_bulk_status, cmd_service_pause,
    cmd_service_start, cmd_service_status, cmd_service_stop,
};

use chrono::NaiveDate;

use crate::errors::{AcquireError, Result};

/// Parse a `YYYY-MM-DD` argument.
pub(crate) fn parse_date_arg(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AcquireError::Validation(format!("not a YYYY-MM-DD date: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_arg() {
        assert!(parse_date_arg("1891-04-01").is_ok());
        assert!(parse_date_arg("04/01/1891").is_err());
        assert!(parse_date_arg("nonsense").is_err());
    }
}
