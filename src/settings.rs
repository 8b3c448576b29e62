//! Flat key/value settings backing the numbering, totals and PDF engines.

use std::collections::BTreeMap;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const INVOICE_PREFIX: &str = "invoice_prefix";
pub const INVOICE_PADDING: &str = "invoice_padding";
pub const INVOICE_START: &str = "invoice_start";
pub const DEFAULT_VAT_RATE: &str = "default_vat_rate";
pub const COMPANY_NAME: &str = "company_name";
pub const COMPANY_EMAIL: &str = "company_email";
pub const COMPANY_PHONE: &str = "company_phone";
pub const COMPANY_ADDRESS: &str = "company_address";
pub const COMPANY_TAX: &str = "company_tax";
pub const COMPANY_LOGO: &str = "company_logo";
pub const PAYMENT_TERMS: &str = "payment_terms";
pub const FOOTER_TEXT: &str = "footer_text";

const DEFAULT_PREFIX: &str = "INV";
const DEFAULT_PADDING: usize = 5;
const MAX_PADDING: usize = 32;
const DEFAULT_START: i64 = 1;

/// Values written once when the store is initialised.
const SEED: &[(&str, &str)] = &[
    (INVOICE_PREFIX, "INV"),
    (INVOICE_PADDING, "5"),
    (COMPANY_NAME, "Your Company"),
    (COMPANY_EMAIL, ""),
    (COMPANY_PHONE, ""),
    (COMPANY_ADDRESS, ""),
    (COMPANY_TAX, ""),
    (INVOICE_START, "1"),
    (DEFAULT_VAT_RATE, "0"),
    (PAYMENT_TERMS, "Payment due within 14 days."),
    (FOOTER_TEXT, "Thank you for your business."),
];

/// Snapshot of the settings table. Values are raw strings; the typed
/// accessors below interpret them and fall back to hardcoded defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Trimmed, non-empty value for `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }

    pub fn invoice_prefix(&self) -> &str {
        self.text(INVOICE_PREFIX).unwrap_or(DEFAULT_PREFIX)
    }

    pub fn invoice_padding(&self) -> usize {
        self.text(INVOICE_PADDING)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_PADDING)
            .min(MAX_PADDING)
    }

    pub fn invoice_start(&self) -> i64 {
        self.text(INVOICE_START)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_START)
            .max(1)
    }

    pub fn default_vat_rate(&self) -> f64 {
        self.text(DEFAULT_VAT_RATE)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(0.0)
    }

    pub fn company_logo(&self) -> Option<&str> {
        self.text(COMPANY_LOGO)
    }
}

impl From<BTreeMap<String, String>> for Settings {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }
}

pub(crate) fn seed_defaults(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
    )?;
    for (key, value) in SEED {
        stmt.execute(params![key, value])?;
    }
    Ok(())
}

pub fn get_all_settings(conn: &Connection) -> Result<Settings> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (key, value) = row?;
        out.insert(key, value);
    }
    Ok(Settings(out))
}

/// Upserts every pair in one transaction and returns the resulting map.
pub fn update_settings(conn: &mut Connection, values: BTreeMap<String, String>) -> Result<Settings> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        for (key, value) in &values {
            stmt.execute(params![key, value])?;
        }
    }
    let settings = get_all_settings(&tx)?;
    tx.commit()?;
    Ok(settings)
}
