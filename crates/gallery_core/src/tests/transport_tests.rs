use super::*;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::post,
    Form, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Recorded {
    Delete(String),
    Reorder(String),
}

#[derive(Clone, Default)]
struct TransportServerState {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

#[derive(Deserialize)]
struct ReorderBody {
    order: String,
}

async fn handle_delete(State(state): State<TransportServerState>, Path(image): Path<String>) {
    state.requests.lock().await.push(Recorded::Delete(image));
}

async fn handle_reorder(
    State(state): State<TransportServerState>,
    Form(body): Form<ReorderBody>,
) {
    state.requests.lock().await.push(Recorded::Reorder(body.order));
}

async fn spawn_transport_server() -> (String, TransportServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let state = TransportServerState::default();
    let app = Router::new()
        .route("/image/:image/delete", post(handle_delete))
        .route("/reorder-images", post(handle_reorder))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn delete_posts_to_the_image_endpoint() {
    let (base_url, server) = spawn_transport_server().await;
    let transport = HttpTransport::new(&base_url).expect("transport");

    transport
        .delete_image(&ImageId::from("123"))
        .await
        .expect("delete");

    assert_eq!(
        *server.requests.lock().await,
        vec![Recorded::Delete("123".to_string())]
    );
}

#[tokio::test]
async fn reorder_posts_full_order_as_form_body() {
    let (base_url, server) = spawn_transport_server().await;
    let transport = HttpTransport::new(&base_url).expect("transport");

    let order = [ImageId::from("3"), ImageId::from("1"), ImageId::from("2")];
    transport.push_order(&order).await.expect("push order");

    assert_eq!(
        *server.requests.lock().await,
        vec![Recorded::Reorder("3,1,2".to_string())]
    );
}

#[tokio::test]
async fn http_failure_is_reported_to_the_caller() {
    // Nothing is listening on this port.
    let transport = HttpTransport::new("http://127.0.0.1:1").expect("transport");
    assert!(transport.delete_image(&ImageId::from("1")).await.is_err());
}

#[test]
fn invalid_base_url_is_a_config_error() {
    assert!(matches!(
        HttpTransport::new("not a url"),
        Err(GalleryError::Config(_))
    ));
}

#[tokio::test]
async fn missing_transport_fails_every_call() {
    let transport = MissingTransport;
    assert!(transport.delete_image(&ImageId::from("1")).await.is_err());
    assert!(transport.push_order(&[]).await.is_err());
}
