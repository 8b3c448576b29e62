use thiserror::Error;

/// Failure signals raised by the invoicing core.
///
/// The core never formats user-facing messages; the HTTP layer decides what a
/// caller gets to see (see `http.rs`).
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invoice number {0} is already in use")]
    DuplicateNumber(String),

    #[error("storage error: {}", sqlite_error_string(.0))]
    Storage(#[from] rusqlite::Error),

    #[error("stored data is malformed: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("pdf rendering failed: {0}")]
    Render(String),
}

pub type Result<T, E = InvoiceError> = std::result::Result<T, E>;

impl InvoiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        InvoiceError::Validation(msg.into())
    }

    pub fn invoice_not_found(id: i64) -> Self {
        InvoiceError::NotFound { entity: "invoice", id }
    }

    pub fn client_not_found(id: i64) -> Self {
        InvoiceError::NotFound { entity: "client", id }
    }
}

impl From<printpdf::Error> for InvoiceError {
    fn from(err: printpdf::Error) -> Self {
        InvoiceError::Render(err.to_string())
    }
}

pub(crate) fn sqlite_error_string(err: &rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqliteFailure(code, msg) => {
            let message = msg.clone().unwrap_or_default();
            format!(
                "sqlite(code={:?}, extended_code={}, msg={})",
                code.code, code.extended_code, message
            )
        }
        other => other.to_string(),
    }
}
