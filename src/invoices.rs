//! Invoice persistence: create, update, read, list and delete.
//!
//! Writes run in IMMEDIATE transactions so client creation, number
//! assignment and the invoice row commit (or roll back) together. Every read
//! goes through [`InvoiceRow::hydrate`], which is the only place a status is
//! derived.

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use time::OffsetDateTime;

use crate::clients;
use crate::db::format_iso;
use crate::error::{InvoiceError, Result};
use crate::models::{HydratedInvoice, InvoicePatch, NewClient, NewInvoice};
use crate::numbering::assign_next_number;
use crate::settings::get_all_settings;
use crate::status::derive_status_from_stored;
use crate::totals::{compute_totals, LineItem, RawLineItem};

const SELECT_HYDRATED: &str = r#"
    SELECT invoices.id, invoices.client_id, invoices.invoice_number, invoices.date,
           invoices.due_date, invoices.items, invoices.subtotal, invoices.vat,
           invoices.total, invoices.notes, invoices.status,
           clients.name, clients.email, clients.phone, clients.address
    FROM invoices
    LEFT JOIN clients ON invoices.client_id = clients.id"#;

struct InvoiceRow {
    id: i64,
    client_id: Option<i64>,
    invoice_number: Option<String>,
    date: String,
    due_date: Option<String>,
    items: String,
    subtotal: f64,
    vat: f64,
    total: f64,
    notes: String,
    status: Option<String>,
    client_name: Option<String>,
    client_email: Option<String>,
    client_phone: Option<String>,
    client_address: Option<String>,
}

impl InvoiceRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            client_id: r.get(1)?,
            invoice_number: r.get(2)?,
            date: r.get(3)?,
            due_date: r.get(4)?,
            items: r.get(5)?,
            subtotal: r.get(6)?,
            vat: r.get(7)?,
            total: r.get(8)?,
            notes: r.get(9)?,
            status: r.get(10)?,
            client_name: r.get(11)?,
            client_email: r.get(12)?,
            client_phone: r.get(13)?,
            client_address: r.get(14)?,
        })
    }

    fn stored_items(&self) -> Result<Vec<LineItem>> {
        if self.items.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&self.items)?)
    }

    fn hydrate(self, now: OffsetDateTime) -> Result<HydratedInvoice> {
        let items = self.stored_items()?;
        let status =
            derive_status_from_stored(self.status.as_deref(), self.due_date.as_deref(), now);
        Ok(HydratedInvoice {
            id: self.id,
            client_id: self.client_id,
            invoice_number: self.invoice_number,
            date: self.date,
            due_date: self.due_date,
            items,
            subtotal: self.subtotal,
            vat: self.vat,
            total: self.total,
            notes: self.notes,
            status,
            client_name: self.client_name,
            client_email: self.client_email,
            client_phone: self.client_phone,
            client_address: self.client_address,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn find_row(conn: &Connection, id: i64) -> Result<Option<InvoiceRow>> {
    Ok(conn
        .query_row(
            &format!("{SELECT_HYDRATED} WHERE invoices.id = ?1"),
            params![id],
            InvoiceRow::from_row,
        )
        .optional()?)
}

pub fn find_invoice(
    conn: &Connection,
    id: i64,
    now: OffsetDateTime,
) -> Result<Option<HydratedInvoice>> {
    find_row(conn, id)?.map(|row| row.hydrate(now)).transpose()
}

pub fn get_invoice(conn: &Connection, id: i64, now: OffsetDateTime) -> Result<HydratedInvoice> {
    find_invoice(conn, id, now)?.ok_or_else(|| InvoiceError::invoice_not_found(id))
}

/// All invoices, newest date first.
pub fn list_invoices(conn: &Connection, now: OffsetDateTime) -> Result<Vec<HydratedInvoice>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_HYDRATED} ORDER BY datetime(invoices.date) DESC, invoices.id DESC"
    ))?;
    let rows = stmt.query_map([], InvoiceRow::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.hydrate(now)?);
    }
    Ok(out)
}

fn ensure_client_exists(conn: &Connection, id: i64) -> Result<()> {
    clients::get_client(conn, id).map(|_| ())
}

fn ensure_number_free(conn: &Connection, number: &str, owner: Option<i64>) -> Result<()> {
    let holder: Option<i64> = conn
        .query_row(
            "SELECT id FROM invoices WHERE invoice_number = ?1",
            params![number],
            |r| r.get(0),
        )
        .optional()?;
    match holder {
        Some(other) if Some(other) != owner => {
            Err(InvoiceError::DuplicateNumber(number.to_string()))
        }
        _ => Ok(()),
    }
}

fn create_implicit_client(
    conn: &Connection,
    name: String,
    address: Option<String>,
    phone: Option<String>,
    email: Option<String>,
) -> Result<i64> {
    let client = clients::create_client(
        conn,
        NewClient {
            name,
            address: address.unwrap_or_default(),
            phone: phone.unwrap_or_default(),
            email: email.unwrap_or_default(),
        },
    )?;
    Ok(client.id)
}

fn normalize_status(status: Option<String>) -> Option<String> {
    non_blank(status).map(|s| s.to_ascii_lowercase())
}

pub fn create_invoice(
    conn: &mut Connection,
    input: NewInvoice,
    now: OffsetDateTime,
) -> Result<HydratedInvoice> {
    let client_name = non_blank(input.client_name);
    if input.client_id.is_none() && client_name.is_none() {
        return Err(InvoiceError::validation("client_id or client_name required"));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let settings = get_all_settings(&tx)?;
    let totals = compute_totals(&input.items, &settings)?;

    let client_id = match input.client_id {
        Some(id) => {
            ensure_client_exists(&tx, id)?;
            id
        }
        None => create_implicit_client(
            &tx,
            client_name.unwrap_or_default(),
            input.client_address,
            input.client_phone,
            input.client_email,
        )?,
    };

    let invoice_number = match non_blank(input.invoice_number) {
        Some(n) => {
            ensure_number_free(&tx, &n, None)?;
            n
        }
        None => assign_next_number(&tx)?,
    };

    let date = non_blank(input.date).unwrap_or_else(|| format_iso(now));
    let items_json = serde_json::to_string(&totals.items)?;

    tx.execute(
        r#"INSERT INTO invoices (
            client_id, invoice_number, date, due_date, items, subtotal, vat, total, notes, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
        params![
            client_id,
            invoice_number,
            date,
            non_blank(input.due_date),
            items_json,
            totals.subtotal,
            totals.vat,
            totals.total,
            input.notes.unwrap_or_default(),
            normalize_status(input.status),
        ],
    )?;
    let id = tx.last_insert_rowid();

    let created = get_invoice(&tx, id, now)?;
    tx.commit()?;
    Ok(created)
}

/// Merges `patch` into the stored invoice and recomputes totals from the
/// supplied items, or from the stored ones when none are supplied. The
/// invoice number is kept unless overridden; a number is only assigned when
/// the invoice has none at all. An empty `due_date` or `status` clears it.
pub fn update_invoice(
    conn: &mut Connection,
    id: i64,
    patch: InvoicePatch,
    now: OffsetDateTime,
) -> Result<HydratedInvoice> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing = find_row(&tx, id)?.ok_or_else(|| InvoiceError::invoice_not_found(id))?;

    let client_id = match patch.client_id {
        Some(cid) => {
            ensure_client_exists(&tx, cid)?;
            Some(cid)
        }
        None => existing.client_id,
    };
    let client_id = match (client_id, non_blank(patch.client_name)) {
        (Some(cid), _) => Some(cid),
        (None, Some(name)) => Some(create_implicit_client(
            &tx,
            name,
            patch.client_address,
            patch.client_phone,
            patch.client_email,
        )?),
        (None, None) => None,
    };

    let items: Vec<RawLineItem> = match patch.items {
        Some(items) => items,
        None => existing
            .stored_items()?
            .iter()
            .map(RawLineItem::from)
            .collect(),
    };
    let settings = get_all_settings(&tx)?;
    let totals = compute_totals(&items, &settings)?;

    let invoice_number = match non_blank(patch.invoice_number) {
        Some(n) => {
            ensure_number_free(&tx, &n, Some(id))?;
            n
        }
        None => match non_blank(existing.invoice_number) {
            Some(n) => n,
            None => assign_next_number(&tx)?,
        },
    };

    let date = non_blank(patch.date).unwrap_or(existing.date);
    let due_date = match patch.due_date {
        Some(d) => non_blank(Some(d)),
        None => existing.due_date,
    };
    let status = match patch.status {
        Some(s) => normalize_status(Some(s)),
        None => existing.status,
    };
    let items_json = serde_json::to_string(&totals.items)?;

    tx.execute(
        r#"UPDATE invoices SET
            client_id = ?2, invoice_number = ?3, date = ?4, due_date = ?5, items = ?6,
            subtotal = ?7, vat = ?8, total = ?9, notes = ?10, status = ?11
           WHERE id = ?1"#,
        params![
            id,
            client_id,
            invoice_number,
            date,
            due_date,
            items_json,
            totals.subtotal,
            totals.vat,
            totals.total,
            patch.notes.unwrap_or(existing.notes),
            status,
        ],
    )?;

    let updated = get_invoice(&tx, id, now)?;
    tx.commit()?;
    Ok(updated)
}

/// Hard delete, no audit trail.
pub fn delete_invoice(conn: &Connection, id: i64) -> Result<()> {
    let affected = conn.execute("DELETE FROM invoices WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(InvoiceError::invoice_not_found(id));
    }
    Ok(())
}
