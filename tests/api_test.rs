mod common;

use std::time::Duration;

use serde_json::{json, Value};

use common::{d, ledger_with_items, record_sales, TestApp};
use stateset_demand::repositories::InMemoryLedger;

/// Two items with monthly sales from October 2023 through March 2024.
fn monthly_ledger() -> InMemoryLedger {
    let ledger = ledger_with_items(&[(1, "Widget"), (2, "Gadget")]);
    let months = [
        d(2023, 10, 5),
        d(2023, 11, 5),
        d(2023, 12, 5),
        d(2024, 1, 5),
        d(2024, 2, 5),
        d(2024, 3, 5),
    ];
    for (idx, date) in months.into_iter().enumerate() {
        let idx = idx as u64;
        record_sales(&ledger, &[(1, 40 + idx * 2, date), (2, 5 + idx % 2, date)]);
    }
    ledger
}

async fn wait_for_training(app: &TestApp, granularity: &str) -> Value {
    for _ in 0..200 {
        let (_, body) = app
            .get(&format!("/api/v1/models/{}/status", granularity))
            .await;
        if body["data"]["state"] != "in_progress" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} training did not finish", granularity);
}

#[tokio::test]
async fn health_reports_model_states() {
    let app = TestApp::new(monthly_ledger());
    let (status, body) = app.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "up");
    assert_eq!(body["data"]["models"]["daily"], "idle");
    assert_eq!(body["data"]["models"]["monthly"], "idle");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new(InMemoryLedger::new());
    let (status, body) = app.get("/api-docs/openapi.json").await;
    assert_eq!(status, 200);
    assert!(body["paths"]["/api/v1/backfill"].is_object());
}

#[tokio::test]
async fn background_training_completes_and_publishes() {
    let app = TestApp::new(monthly_ledger());

    let (status, body) = app.post("/api/v1/models/monthly/train", json!({})).await;
    assert_eq!(status, 202);
    assert_eq!(body["data"]["state"], "in_progress");

    let finished = wait_for_training(&app, "monthly").await;
    assert_eq!(finished["state"], "completed");
    assert_eq!(finished["summary"]["granularity"], "monthly");
    assert_eq!(finished["summary"]["feature_names"], json!(["prev_month_total"]));

    let (_, body) = app
        .post(
            "/api/v1/predictions",
            json!({ "item_id": 1, "granularity": "monthly", "period": "2024-04-01" }),
        )
        .await;
    assert_eq!(body["data"]["source"], "model");

    let (_, health) = app.get("/health").await;
    assert_eq!(health["data"]["models"]["monthly"], "completed");
    assert_eq!(health["data"]["models"]["daily"], "idle");
}

#[tokio::test]
async fn unknown_granularity_is_rejected() {
    let app = TestApp::new(monthly_ledger());
    let (status, _) = app.post("/api/v1/models/weekly/train", json!({})).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn backfill_is_idempotent_without_force() {
    let app = TestApp::new(monthly_ledger());
    let request = json!({
        "start_month": "2024-01-01",
        "end_month": "2024-03-31",
        "granularity": "monthly",
        "force": false
    });

    let (status, first) = app.post("/api/v1/backfill", request.clone()).await;
    assert_eq!(status, 200);
    let first = &first["data"];
    assert_eq!(first["processed"], 6);
    assert_eq!(first["failed"], 0);
    assert_eq!(first["months"].as_array().unwrap().len(), 3);
    assert!(first["average_accuracy"].is_number());

    let (status, second) = app.post("/api/v1/backfill", request).await;
    assert_eq!(status, 200);
    let second = &second["data"];
    assert_eq!(second["processed"], 0);
    assert_eq!(second["skipped"], first["processed"]);

    let (_, stored) = app.get("/api/v1/predictions?granularity=monthly").await;
    let stored = stored["data"].as_array().unwrap();
    assert_eq!(stored.len(), 6);
    assert!(stored.iter().all(|p| p["actual_quantity"].is_u64()));
}

#[tokio::test]
async fn live_prediction_keeps_backfilled_history() {
    let app = TestApp::new(monthly_ledger());
    let request = json!({
        "start_month": "2024-01-01",
        "end_month": "2024-03-31",
        "granularity": "monthly"
    });
    let (_, first) = app.post("/api/v1/backfill", request.clone()).await;
    assert_eq!(first["data"]["processed"], 6);

    let february = |listed: &Value| {
        listed["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["item_id"] == 1 && p["period_start"] == "2024-02-01")
            .cloned()
            .unwrap()
    };
    let (_, listed) = app.get("/api/v1/predictions?granularity=monthly").await;
    let backfilled = february(&listed);
    assert_eq!(backfilled["actual_quantity"], 48);
    assert!(backfilled["accuracy"].is_number());

    let (status, _) = app
        .post(
            "/api/v1/predictions",
            json!({ "item_id": 1, "granularity": "monthly", "period": "2024-02-01" }),
        )
        .await;
    assert_eq!(status, 200);

    let (_, listed) = app.get("/api/v1/predictions?granularity=monthly").await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 6);
    assert_eq!(february(&listed), backfilled);

    let (_, second) = app.post("/api/v1/backfill", request).await;
    assert_eq!(second["data"]["processed"], 0);
    assert_eq!(second["data"]["skipped"], 6);
    assert_eq!(second["data"]["average_accuracy"], first["data"]["average_accuracy"]);
}

#[tokio::test]
async fn forced_backfill_recomputes() {
    let app = TestApp::new(monthly_ledger());
    let request = json!({
        "start_month": "2024-02-01",
        "end_month": "2024-02-01",
        "granularity": "monthly"
    });
    let (_, first) = app.post("/api/v1/backfill", request).await;
    assert_eq!(first["data"]["processed"], 2);

    let (_, forced) = app
        .post(
            "/api/v1/backfill",
            json!({
                "start_month": "2024-02-01",
                "end_month": "2024-02-01",
                "granularity": "monthly",
                "force": true
            }),
        )
        .await;
    assert_eq!(forced["data"]["processed"], 2);
    assert_eq!(forced["data"]["skipped"], 0);
}

#[tokio::test]
async fn report_summarises_backfilled_accuracy() {
    let app = TestApp::new(monthly_ledger());
    let (_, backfill) = app
        .post(
            "/api/v1/backfill",
            json!({
                "start_month": "2024-01-01",
                "end_month": "2024-03-31",
                "granularity": "monthly"
            }),
        )
        .await;

    let (status, body) = app
        .get("/api/v1/predictions/report?granularity=monthly&sort=product&limit=2")
        .await;
    assert_eq!(status, 200);
    let report = &body["data"];
    assert_eq!(report["summary"]["total"], 6);
    let reported = report["summary"]["average_accuracy"].as_f64().unwrap();
    let swept = backfill["data"]["average_accuracy"].as_f64().unwrap();
    assert!((reported - swept).abs() < 1e-9);
    assert_eq!(report["summary"]["total_actual"], 46 + 48 + 50 + 6 + 5 + 6);
    assert_eq!(report["distribution"].as_array().unwrap().len(), 6);
    assert_eq!(report["products"].as_array().unwrap().len(), 2);

    let rows = report["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["product_label"] == "Gadget"));
    assert_eq!(rows[0]["period_start"], "2024-01-01");
    assert!(rows[0]["bias"].is_string());

    let (_, january) = app
        .get("/api/v1/predictions/report?year=2024&month=1&product=widg")
        .await;
    assert_eq!(january["data"]["summary"]["total"], 1);
    assert_eq!(january["data"]["summary"]["total_actual"], 46);

    let (status, _) = app.get("/api/v1/predictions/report?year=2024&month=13").await;
    assert_eq!(status, 400);
    let (status, body) = app.get("/api/v1/predictions/report?month=2").await;
    assert_eq!(status, 400);
    assert!(body["message"].as_str().unwrap().contains("year"));
}

#[tokio::test]
async fn inverted_backfill_range_is_rejected() {
    let app = TestApp::new(monthly_ledger());
    let (status, body) = app
        .post(
            "/api/v1/backfill",
            json!({
                "start_month": "2024-03-01",
                "end_month": "2024-01-01",
                "granularity": "monthly"
            }),
        )
        .await;
    assert_eq!(status, 400);
    assert!(body["message"].as_str().unwrap().contains("after"));
}
