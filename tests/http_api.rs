use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use invoicer_lib::db::Db;
use invoicer_lib::http::{router, AppState};

fn app() -> Router {
    router(AppState::new(Db::open_in_memory().unwrap()))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn call_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn sample_invoice() -> Value {
    json!({
        "client_name": "Acme",
        "client_email": "ap@acme.test",
        "due_date": "2099-01-01",
        "items": [
            {"description": "Design", "quantity": 2, "price": 50, "vat": 10},
            {"description": "Hosting", "quantity": "1", "unit_price": "30"}
        ]
    })
}

#[tokio::test]
async fn health_check_responds() {
    let app = app();
    let (status, body) = call_json(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn invoice_lifecycle() {
    let app = app();

    let (status, created) =
        call_json(&app, Method::POST, "/api/invoices", Some(sample_invoice())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["invoice_number"], "INV-00001");
    assert_eq!(created["subtotal"], 130.0);
    assert_eq!(created["vat"], 10.0);
    assert_eq!(created["total"], 140.0);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["client_name"], "Acme");
    let id = created["id"].as_i64().unwrap();

    let (status, list) = call_json(&app, Method::GET, "/api/invoices", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, paid) = call_json(
        &app,
        Method::PUT,
        &format!("/api/invoices/{id}"),
        Some(json!({"status": "paid"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "paid");
    assert_eq!(paid["total"], 140.0);
    assert_eq!(paid["invoice_number"], "INV-00001");

    let (status, _) = call(&app, Method::DELETE, &format!("/api/invoices/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call_json(&app, Method::GET, &format!("/api/invoices/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn invoice_without_client_is_a_bad_request() {
    let app = app();
    let (status, body) =
        call_json(&app, Method::POST, "/api/invoices", Some(json!({"items": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = call_json(
        &app,
        Method::POST,
        "/api/invoices",
        Some(json!({"client_id": 42})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_explicit_number_conflicts() {
    let app = app();
    let mut body = sample_invoice();
    body["invoice_number"] = json!("MANUAL-7");

    let (status, _) = call_json(&app, Method::POST, "/api/invoices", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call_json(&app, Method::POST, "/api/invoices", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn generated_numbers_follow_settings() {
    let app = app();

    let (_, first) = call_json(&app, Method::GET, "/api/invoices/generate-number", None).await;
    assert_eq!(first["invoice_number"], "INV-00001");

    let (status, settings) = call_json(
        &app,
        Method::POST,
        "/api/settings/update",
        Some(json!({"invoice_prefix": "ACME", "invoice_padding": 3, "company_tax": null})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["invoice_padding"], "3");
    assert_eq!(settings["company_tax"], "");

    let (_, second) = call_json(&app, Method::GET, "/api/invoices/generate-number", None).await;
    assert_eq!(second["invoice_number"], "ACME-002");

    // The previewed numbers are consumed; the next invoice moves on.
    let (_, created) =
        call_json(&app, Method::POST, "/api/invoices", Some(sample_invoice())).await;
    assert_eq!(created["invoice_number"], "ACME-003");
}

#[tokio::test]
async fn pdf_download_is_served_inline() {
    let app = app();
    let (_, created) =
        call_json(&app, Method::POST, "/api/invoices", Some(sample_invoice())).await;
    let id = created["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/invoices/pdf/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "inline; filename=\"invoice-INV-00001.pdf\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"%PDF-"));

    let (status, _) = call(&app, Method::GET, "/api/invoices/pdf/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn client_crud() {
    let app = app();

    let (status, _) =
        call_json(&app, Method::POST, "/api/clients", Some(json!({"name": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, client) = call_json(
        &app,
        Method::POST,
        "/api/clients",
        Some(json!({"name": "Globex", "email": "ap@globex.test"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = client["id"].as_i64().unwrap();

    let (status, updated) = call_json(
        &app,
        Method::PUT,
        &format!("/api/clients/{id}"),
        Some(json!({"phone": "555-0100"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["phone"], "555-0100");
    assert_eq!(updated["email"], "ap@globex.test");

    let (status, _) = call(&app, Method::DELETE, &format!("/api/clients/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, Method::GET, &format!("/api/clients/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
