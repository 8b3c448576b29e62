//! Sequential invoice numbers of the form `{prefix}-{zero padded sequence}`.
//!
//! The sequence lives in the single-row `invoice_counter` table. Every
//! increment happens inside an IMMEDIATE transaction, so concurrent callers,
//! including other processes sharing the database file, are serialized by
//! SQLite and each observes a distinct value.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::Result;
use crate::settings::{self, Settings};

/// Formats a sequence value. The number is never truncated: values wider
/// than `padding` simply grow.
pub fn format_invoice_number(prefix: &str, sequence: i64, padding: usize) -> String {
    format!("{prefix}-{sequence:0padding$}")
}

/// Issues the next invoice number in its own transaction.
///
/// This consumes a sequence value; a number that is fetched but never used
/// leaves a gap.
pub fn next_invoice_number(conn: &mut Connection) -> Result<String> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let number = assign_next_number(&tx)?;
    tx.commit()?;
    Ok(number)
}

/// Increments the counter and formats the result. `conn` must be inside an
/// IMMEDIATE (or stronger) transaction owned by the caller; the increment
/// commits or rolls back with it.
pub fn assign_next_number(conn: &Connection) -> Result<String> {
    let settings = settings::get_all_settings(conn)?;
    let sequence = increment_counter(conn, &settings)?;
    Ok(format_invoice_number(
        settings.invoice_prefix(),
        sequence,
        settings.invoice_padding(),
    ))
}

fn increment_counter(conn: &Connection, settings: &Settings) -> Result<i64> {
    let start = settings.invoice_start();
    conn.execute(
        "INSERT INTO invoice_counter (id, value) VALUES (1, ?1) ON CONFLICT(id) DO NOTHING",
        params![start - 1],
    )?;
    let current: i64 = conn.query_row("SELECT value FROM invoice_counter WHERE id = 1", [], |r| {
        r.get(0)
    })?;
    let next = current + 1;
    conn.execute("UPDATE invoice_counter SET value = ?1 WHERE id = 1", params![next])?;
    Ok(next)
}

/// Creates the counter row from `invoice_start - 1` when it does not exist yet.
pub(crate) fn seed_counter(conn: &Connection) -> Result<()> {
    let start = settings::get_all_settings(conn)?.invoice_start();
    conn.execute(
        "INSERT INTO invoice_counter (id, value) VALUES (1, ?1) ON CONFLICT(id) DO NOTHING",
        params![start - 1],
    )?;
    Ok(())
}

/// Last issued sequence value, if the counter exists.
pub fn current_sequence(conn: &Connection) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT value FROM invoice_counter WHERE id = 1", [], |r| {
            r.get(0)
        })
        .optional()?)
}
