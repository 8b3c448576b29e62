//! JSON-over-HTTP surface. Handlers are thin: they move work onto the
//! blocking pool through [`Db`] and map [`InvoiceError`] onto status codes.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use time::OffsetDateTime;
use tower_http::trace::TraceLayer;

use crate::db::Db;
use crate::error::InvoiceError;
use crate::models::{
    Client, ClientPatch, HydratedInvoice, InvoicePatch, NewClient, NewInvoice,
};
use crate::settings::{get_all_settings, update_settings, Settings};
use crate::{clients, invoices, numbering, pdf};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
}

impl AppState {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/settings", get(read_settings))
        .route("/api/settings/update", post(write_settings))
        .route("/api/clients", get(list_clients).post(create_client))
        .route(
            "/api/clients/:id",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route("/api/invoices", get(list_invoices).post(create_invoice))
        .route("/api/invoices/generate-number", get(generate_number))
        .route("/api/invoices/pdf/:id", get(invoice_pdf))
        .route(
            "/api/invoices/:id",
            get(get_invoice).put(update_invoice).delete(delete_invoice),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for InvoiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, message) = match &self {
            InvoiceError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            InvoiceError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            InvoiceError::DuplicateNumber(_) => (StatusCode::CONFLICT, self.to_string()),
            InvoiceError::Storage(_)
            | InvoiceError::Corrupt(_)
            | InvoiceError::Unavailable(_)
            | InvoiceError::Render(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

type ApiResult<T> = Result<T, InvoiceError>;

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn read_settings(State(state): State<AppState>) -> ApiResult<Json<Settings>> {
    let settings = state
        .db
        .with_read("get_settings", |conn| get_all_settings(conn))
        .await?;
    Ok(Json(settings))
}

/// Values of any JSON type are stored in their textual form; `null` clears.
fn settings_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

async fn write_settings(
    State(state): State<AppState>,
    Json(body): Json<Map<String, Value>>,
) -> ApiResult<Json<Settings>> {
    let values: BTreeMap<String, String> = body
        .into_iter()
        .map(|(k, v)| (k, settings_text(v)))
        .collect();
    let settings = state
        .db
        .with_write("update_settings", move |conn| update_settings(conn, values))
        .await?;
    Ok(Json(settings))
}

async fn list_clients(State(state): State<AppState>) -> ApiResult<Json<Vec<Client>>> {
    let rows = state
        .db
        .with_read("list_clients", |conn| clients::list_clients(conn))
        .await?;
    Ok(Json(rows))
}

async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Client>> {
    let client = state
        .db
        .with_read("get_client", move |conn| clients::get_client(conn, id))
        .await?;
    Ok(Json(client))
}

async fn create_client(
    State(state): State<AppState>,
    Json(input): Json<NewClient>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    let client = state
        .db
        .with_write("create_client", move |conn| clients::create_client(conn, input))
        .await?;
    Ok((StatusCode::CREATED, Json(client)))
}

async fn update_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ClientPatch>,
) -> ApiResult<Json<Client>> {
    let client = state
        .db
        .with_write("update_client", move |conn| {
            clients::update_client(conn, id, patch)
        })
        .await?;
    Ok(Json(client))
}

async fn delete_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .db
        .with_write("delete_client", move |conn| clients::delete_client(conn, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_invoices(State(state): State<AppState>) -> ApiResult<Json<Vec<HydratedInvoice>>> {
    let now = OffsetDateTime::now_utc();
    let rows = state
        .db
        .with_read("list_invoices", move |conn| invoices::list_invoices(conn, now))
        .await?;
    Ok(Json(rows))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<HydratedInvoice>> {
    let now = OffsetDateTime::now_utc();
    let invoice = state
        .db
        .with_read("get_invoice", move |conn| invoices::get_invoice(conn, id, now))
        .await?;
    Ok(Json(invoice))
}

async fn create_invoice(
    State(state): State<AppState>,
    Json(input): Json<NewInvoice>,
) -> ApiResult<(StatusCode, Json<HydratedInvoice>)> {
    let now = OffsetDateTime::now_utc();
    let invoice = state
        .db
        .with_write("create_invoice", move |conn| {
            invoices::create_invoice(conn, input, now)
        })
        .await?;
    tracing::info!(
        id = invoice.id,
        number = invoice.invoice_number.as_deref().unwrap_or(""),
        "invoice created"
    );
    Ok((StatusCode::CREATED, Json(invoice)))
}

async fn update_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<InvoicePatch>,
) -> ApiResult<Json<HydratedInvoice>> {
    let now = OffsetDateTime::now_utc();
    let invoice = state
        .db
        .with_write("update_invoice", move |conn| {
            invoices::update_invoice(conn, id, patch, now)
        })
        .await?;
    Ok(Json(invoice))
}

async fn delete_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .db
        .with_write("delete_invoice", move |conn| invoices::delete_invoice(conn, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Consumes the next sequence value. A number handed out here and never
/// used on an invoice leaves a gap.
async fn generate_number(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let number = state
        .db
        .with_write("next_invoice_number", |conn| {
            numbering::next_invoice_number(conn)
        })
        .await?;
    Ok(Json(json!({ "invoice_number": number })))
}

async fn invoice_pdf(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let now = OffsetDateTime::now_utc();
    let (invoice, settings) = state
        .db
        .with_read("load_invoice_for_pdf", move |conn| {
            Ok((invoices::get_invoice(conn, id, now)?, get_all_settings(conn)?))
        })
        .await?;

    let filename = pdf::pdf_filename(&invoice);
    let bytes = tokio::task::spawn_blocking(move || pdf::render_invoice_pdf(&invoice, &settings))
        .await
        .map_err(|e| InvoiceError::Render(e.to_string()))??;

    Ok((
        [
            (header::CONTENT_TYPE, mime::APPLICATION_PDF.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
