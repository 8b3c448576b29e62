//! Line-item normalization and subtotal / VAT / total computation.
//!
//! Input is deliberately forgiving: numbers may arrive as JSON numbers,
//! numeric strings or booleans, and anything that cannot be read as a number
//! falls back to a default instead of failing the request. Amounts that read
//! fine but overflow `f64` once multiplied or summed are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{InvoiceError, Result};
use crate::settings::Settings;

/// A line item as supplied by a client, before normalization.
///
/// Two payload generations are accepted: `unit_price`/`vat_rate` (preferred)
/// and the legacy `price`/`vat`. When both are present the newer name wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLineItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_rate: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat: Option<Value>,
}

/// A normalized line item. `total` is `quantity * unit_price`; VAT is
/// aggregated separately and never folded into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default, alias = "price")]
    pub unit_price: f64,
    #[serde(default, alias = "vat")]
    pub vat_rate: f64,
    #[serde(default)]
    pub total: f64,
}

impl From<&LineItem> for RawLineItem {
    fn from(item: &LineItem) -> Self {
        RawLineItem {
            description: Some(Value::String(item.description.clone())),
            quantity: Some(Value::from(item.quantity)),
            unit_price: Some(Value::from(item.unit_price)),
            price: None,
            vat_rate: Some(Value::from(item.vat_rate)),
            vat: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub items: Vec<LineItem>,
    pub subtotal: f64,
    pub vat: f64,
    pub total: f64,
}

/// Normalizes `items` and aggregates them. Pure; the same input always
/// yields the same output, and feeding the returned items back in reproduces
/// the same subtotal, VAT and total.
///
/// Every amount in the result is finite; a line or sum that overflows is a
/// [`InvoiceError::Validation`].
pub fn compute_totals(items: &[RawLineItem], settings: &Settings) -> Result<Totals> {
    let default_vat_rate = settings.default_vat_rate();

    let items: Vec<LineItem> = items
        .iter()
        .map(|raw| normalize(raw, default_vat_rate))
        .collect();

    for (idx, it) in items.iter().enumerate() {
        if !it.total.is_finite() || !vat_share(it).is_finite() {
            return Err(InvoiceError::validation(format!(
                "line item {} amount is out of range",
                idx + 1
            )));
        }
    }

    let subtotal = items.iter().map(|it| it.total).sum::<f64>();
    let vat = items.iter().map(vat_share).sum::<f64>();
    let total = subtotal + vat;
    if !total.is_finite() {
        return Err(InvoiceError::validation("invoice total is out of range"));
    }

    Ok(Totals {
        items,
        subtotal,
        vat,
        total,
    })
}

fn vat_share(item: &LineItem) -> f64 {
    item.total * item.vat_rate / 100.0
}

fn normalize(raw: &RawLineItem, default_vat_rate: f64) -> LineItem {
    let quantity = non_negative(coerce(raw.quantity.as_ref(), 0.0));
    let unit_price = non_negative(coerce(
        raw.unit_price.as_ref().or(raw.price.as_ref()),
        0.0,
    ));
    let vat_rate = non_negative(coerce(
        raw.vat_rate.as_ref().or(raw.vat.as_ref()),
        default_vat_rate,
    ));

    LineItem {
        description: describe(raw.description.as_ref()),
        quantity,
        unit_price,
        vat_rate,
        total: quantity * unit_price,
    }
}

fn coerce(value: Option<&Value>, default: f64) -> f64 {
    value.and_then(to_number).unwrap_or(default)
}

fn non_negative(v: f64) -> f64 {
    if v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Reads a JSON value as a finite number. Empty strings count as zero.
pub fn to_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().ok()?
            }
        }
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    n.is_finite().then_some(n)
}

fn describe(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}
