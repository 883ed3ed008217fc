//! Column codecs and connection checks shared by SQLite repositories.

use crate::db::migrations::latest_version;
use crate::repo::{RepoError, RepoResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Rejects connections that are not migrated or miss a required table.
pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[&'static str],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Starts a write transaction that takes the database write lock up front.
///
/// Works from a shared connection borrow; callers must not nest it.
pub(crate) fn begin_immediate(conn: &Connection) -> RepoResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Immediate,
    )?)
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn decimal_to_db(value: Decimal) -> String {
    value.to_string()
}

pub(crate) fn parse_decimal(value: &str, column: &str) -> RepoResult<Decimal> {
    Decimal::from_str(value.trim()).map_err(|_| {
        RepoError::InvalidData(format!("invalid decimal `{value}` in {column}"))
    })
}

/// Fixed-width RFC 3339 so text order matches time order.
pub(crate) fn timestamp_to_db(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|at| at.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

pub(crate) fn parse_timestamp(
    value: Option<String>,
    column: &str,
) -> RepoResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(text.trim())
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|_| {
                RepoError::InvalidData(format!("invalid timestamp `{text}` in {column}"))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::{int_to_bool, parse_decimal, parse_timestamp, timestamp_to_db};
    use crate::repo::RepoError;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    #[test]
    fn timestamps_keep_sub_second_precision() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let text = timestamp_to_db(Some(at));
        assert_eq!(parse_timestamp(text, "t").unwrap(), Some(at));
    }

    #[test]
    fn blank_timestamp_reads_as_none() {
        assert_eq!(parse_timestamp(Some(" ".to_string()), "t").unwrap(), None);
        assert!(matches!(
            parse_timestamp(Some("yesterday".to_string()), "t"),
            Err(RepoError::InvalidData(_))
        ));
    }

    #[test]
    fn decimals_and_flags_parse_strictly() {
        assert_eq!(parse_decimal("12.50", "p").unwrap(), Decimal::new(1250, 2));
        assert!(parse_decimal("twelve", "p").is_err());
        assert!(int_to_bool(1, "b").unwrap());
        assert!(int_to_bool(2, "b").is_err());
    }
}
