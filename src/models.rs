use serde::{Deserialize, Serialize};

use crate::status::EffectiveStatus;
use crate::totals::{LineItem, RawLineItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewClient {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Payload for creating an invoice. Either `client_id` or `client_name`
/// must identify the client; a bare name creates a new client record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewInvoice {
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_address: Option<String>,
    #[serde(default)]
    pub client_phone: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub items: Vec<RawLineItem>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Partial update. Absent (or null) fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoicePatch {
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_address: Option<String>,
    #[serde(default)]
    pub client_phone: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<RawLineItem>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// An invoice with its items decoded, its client joined in and its status
/// derived at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedInvoice {
    pub id: i64,
    pub client_id: Option<i64>,
    pub invoice_number: Option<String>,
    pub date: String,
    pub due_date: Option<String>,
    pub items: Vec<LineItem>,
    pub subtotal: f64,
    pub vat: f64,
    pub total: f64,
    pub notes: String,
    pub status: EffectiveStatus,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub client_address: Option<String>,
}

impl HydratedInvoice {
    /// Number shown to humans; falls back to the row id for unnumbered invoices.
    pub fn display_number(&self) -> String {
        match self.invoice_number.as_deref().map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => self.id.to_string(),
        }
    }
}
