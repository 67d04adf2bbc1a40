use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use plug_common::Plug;
use plugd::driver::{Credentials, DeviceAdapter};
use plugd::http_driver::HttpDriver;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Gateway {
    on: AtomicBool,
    state_reads: AtomicUsize,
    power_writes: AtomicUsize,
}

async fn state(State(gw): State<Arc<Gateway>>) -> Json<Value> {
    gw.state_reads.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "device_on": gw.on.load(Ordering::SeqCst) }))
}

async fn power(State(gw): State<Arc<Gateway>>, Json(body): Json<Value>) -> Json<Value> {
    gw.power_writes.fetch_add(1, Ordering::SeqCst);
    let on = body["device_on"].as_bool().unwrap_or(false);
    gw.on.store(on, Ordering::SeqCst);
    Json(json!({}))
}

async fn gateway() -> (Arc<Gateway>, Plug) {
    let gw = Arc::new(Gateway::default());
    let app = Router::new()
        .route("/state", get(state))
        .route("/power", post(power))
        .with_state(gw.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let plug = Plug { id: "desk".into(), address: addr.to_string() };
    (gw, plug)
}

fn adapter() -> DeviceAdapter {
    let timeout = Duration::from_secs(2);
    let driver = HttpDriver::new(timeout).unwrap();
    DeviceAdapter::new(Arc::new(driver), Credentials::default(), timeout)
}

#[tokio::test]
async fn state_read_uses_one_request() {
    let (gw, plug) = gateway().await;
    let devices = adapter();

    assert!(!devices.power_state(&plug).await.unwrap());
    assert_eq!(gw.state_reads.load(Ordering::SeqCst), 1);
    assert_eq!(gw.power_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn switching_confirms_with_a_fresh_read() {
    let (gw, plug) = gateway().await;
    let devices = adapter();

    assert!(devices.turn_on(&plug).await.unwrap());
    assert_eq!(gw.power_writes.load(Ordering::SeqCst), 1);
    // handshake, then the read after the command
    assert_eq!(gw.state_reads.load(Ordering::SeqCst), 2);

    assert!(!devices.turn_off(&plug).await.unwrap());
    assert_eq!(gw.power_writes.load(Ordering::SeqCst), 2);
    assert_eq!(gw.state_reads.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn unreachable_gateway_is_a_device_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let plug = Plug { id: "desk".into(), address: addr.to_string() };

    let err = adapter().turn_on(&plug).await.unwrap_err();
    assert_eq!(err.plug, "desk");
}
