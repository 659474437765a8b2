use std::sync::Arc;

use alloy_primitives::{aliases::U96, Address, U256};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use tally_store::model::Subnetwork;
use tally_store::Store;

use crate::router;

fn addr(tag: u8) -> Address {
    Address::repeat_byte(tag)
}

async fn get(
    app: &axum::Router,
    uri: &str,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

    (status, body)
}

fn seeded_store() -> (Store, std::path::PathBuf) {
    let path = tempfile::tempdir().unwrap().into_path();
    let store = Store::open(path.clone()).unwrap();

    let subnetwork = Subnetwork::new(addr(0x41), U96::ZERO);

    let mut batch = store.batch();
    batch
        .add_network_operator_vault_points(subnetwork, addr(0x21), addr(0x11), U256::from(300))
        .unwrap();
    batch
        .add_network_vault_user_points(subnetwork, addr(0x11), addr(0x31), U256::from(700))
        .unwrap();
    batch.snapshot_points(200).unwrap();
    batch.commit().unwrap();

    (store, path)
}

#[tokio::test]
async fn test_health() {
    let path = tempfile::tempdir().unwrap().into_path();
    let store = Store::open(path.clone()).unwrap();
    let app = router(Arc::new(store));

    let (status, body) = get(&app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    Store::destroy(path).unwrap();
}

#[tokio::test]
async fn test_last_block_defaults_to_zero() {
    let path = tempfile::tempdir().unwrap().into_path();
    let store = Store::open(path.clone()).unwrap();
    let app = router(Arc::new(store));

    let (status, body) = get(&app, "/api/last_block").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["last_block_number"], 0);

    Store::destroy(path).unwrap();
}

#[tokio::test]
async fn test_last_block_reports_snapshot() {
    let (store, path) = seeded_store();
    let app = router(Arc::new(store));

    let (status, body) = get(&app, "/api/last_block").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["last_block_number"], 200);

    Store::destroy(path).unwrap();
}

#[tokio::test]
async fn test_staker_points() {
    let (store, path) = seeded_store();
    let app = router(Arc::new(store));

    let staker = addr(0x31).to_string();
    let (status, body) = get(&app, &format!("/api/staker/{staker}?block_number=450")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["receiver_type"], "staker");
    assert_eq!(body["block_number"], 200);
    assert_eq!(body["points"][0]["points"], "700");
    assert_eq!(
        body["points"][0]["network_address"],
        addr(0x41).to_string()
    );

    Store::destroy(path).unwrap();
}

#[tokio::test]
async fn test_points_before_first_snapshot_are_empty() {
    let (store, path) = seeded_store();
    let app = router(Arc::new(store));

    let staker = addr(0x31).to_string();
    let (status, body) = get(&app, &format!("/api/staker/{staker}?block_number=199")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["block_number"], 0);
    assert_eq!(body["points"].as_array().unwrap().len(), 0);

    Store::destroy(path).unwrap();
}

#[tokio::test]
async fn test_invalid_inputs_are_rejected() {
    let (store, path) = seeded_store();
    let app = router(Arc::new(store));

    let staker = addr(0x31).to_string();

    let (status, _) = get(&app, &format!("/api/holder/{staker}?block_number=450")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/staker/nonsense?block_number=450").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, &format!("/api/staker/{staker}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/all?block_number=450&offset=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Store::destroy(path).unwrap();
}

#[tokio::test]
async fn test_stats() {
    let (store, path) = seeded_store();
    let app = router(Arc::new(store));

    let (status, body) = get(&app, "/api/stats?block_number=450").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_points"], "1000");
    assert_eq!(body["stakers"], 1);
    assert_eq!(body["operators"], 1);
    assert_eq!(body["networks"], 0);

    let (status, body) = get(&app, "/api/stats?block_number=450&receiver_type=staker").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_points"], "700");

    Store::destroy(path).unwrap();
}

#[tokio::test]
async fn test_all_points_pagination() {
    let (store, path) = seeded_store();
    let app = router(Arc::new(store));

    let (status, body) = get(&app, "/api/all?block_number=450&offset=0&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["receiver_type"], "operator");
    assert_eq!(rows[1]["receiver_type"], "staker");

    let (status, body) = get(&app, "/api/all?block_number=450&offset=1&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) =
        get(&app, "/api/all?block_number=450&offset=0&limit=10&receiver_type=operator").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["points"], "300");

    Store::destroy(path).unwrap();
}
