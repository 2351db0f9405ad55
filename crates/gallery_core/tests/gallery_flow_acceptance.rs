//! End-to-end flow over the real HTTP engine and transport against a
//! local server standing in for the application: pick files, confirm the
//! upload, watch the gallery settle, reorder, delete, and submit.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Multipart, Path, State},
    routing::post,
    Form, Router,
};
use gallery_core::{
    GalleryConfig, GalleryCoordinator, GalleryPhase, HttpTransport, PlainFieldProvider,
    SubmitBlock, SubmitOutcome,
};
use serde::Deserialize;
use shared::domain::ImageId;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::sleep;
use upload_engine::{MultipartUploadEngine, PickedFile};

#[derive(Default)]
struct ServerLog {
    uploads: usize,
    deletes: Vec<String>,
    orders: Vec<String>,
}

#[derive(Clone, Default)]
struct AppState {
    log: Arc<Mutex<ServerLog>>,
}

fn rendered_item(image_id: usize) -> String {
    format!(
        r##"<li><div class="image-container"><img src="/image/{image_id}/small"/><span class="overlay"><a href="#" class="image-delete">x</a></span></div><textarea name="caption-{image_id}">shot {image_id}</textarea></li>"##
    )
}

async fn handle_upload(State(state): State<AppState>, mut multipart: Multipart) -> String {
    let mut chunk = 0usize;
    let mut chunks = 1usize;
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        match field.name().unwrap_or_default().to_string().as_str() {
            "chunk" => chunk = field.text().await.expect("chunk").parse().expect("chunk"),
            "chunks" => chunks = field.text().await.expect("chunks").parse().expect("chunks"),
            _ => {
                let _ = field.bytes().await.expect("field bytes");
            }
        }
    }
    if chunk + 1 < chunks {
        return String::new();
    }
    let mut log = state.log.lock().await;
    log.uploads += 1;
    rendered_item(log.uploads)
}

async fn handle_delete(State(state): State<AppState>, Path(image): Path<String>) {
    state.log.lock().await.deletes.push(image);
}

#[derive(Deserialize)]
struct ReorderBody {
    order: String,
}

async fn handle_reorder(State(state): State<AppState>, Form(body): Form<ReorderBody>) {
    state.log.lock().await.orders.push(body.order);
}

async fn spawn_app_server() -> (String, AppState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let state = AppState::default();
    let app = Router::new()
        .route("/upload", post(handle_upload))
        .route("/image/:image/delete", post(handle_delete))
        .route("/reorder-images", post(handle_reorder))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn full_gallery_flow_against_a_live_server() {
    let (base_url, server) = spawn_app_server().await;

    let config = GalleryConfig {
        base_url: base_url.clone(),
        upload_url: format!("{base_url}/upload"),
        min_images: 2,
        max_images: 3,
        chunk_size: 4,
        ..GalleryConfig::default()
    };
    let engine = Arc::new(MultipartUploadEngine::new(config.engine_config()));
    let transport = Arc::new(HttpTransport::new(&config.base_url).expect("transport"));
    let coordinator = GalleryCoordinator::new_with_dependencies(
        config,
        engine,
        transport,
        Arc::new(PlainFieldProvider),
    );
    let _pump = coordinator.clone().spawn_event_pump();

    // Pick three files; the text file is rejected client-side and never
    // reserves an upload slot.
    coordinator
        .add_files(vec![
            PickedFile::from_bytes("first.jpg", b"0123456789".to_vec()),
            PickedFile::from_bytes("second.png", b"abcdef".to_vec()),
            PickedFile::from_bytes("notes.txt", b"not an image".to_vec()),
        ])
        .await
        .expect("add files");

    wait_for(|| async { coordinator.rows().await.len() == 2 }).await;
    wait_for(|| async { coordinator.notices().await.len() == 1 }).await;
    assert!(coordinator.upload_controls_visible().await);
    assert_eq!(coordinator.phase().await, GalleryPhase::Uploading(2));

    // Nothing transfers until the user confirms.
    assert_eq!(server.log.lock().await.uploads, 0);
    coordinator.start_upload().await;

    wait_for(|| async { coordinator.phase().await == GalleryPhase::Idle }).await;
    assert_eq!(coordinator.item_count().await, 2);
    assert_eq!(server.log.lock().await.uploads, 2);

    // Captions came pre-rendered, the count bound holds, nothing is in
    // flight: the form may go out.
    assert!(coordinator.submit_enabled().await);
    assert_eq!(coordinator.try_submit().await, SubmitOutcome::Allowed);

    // Drag the second image to the front; the new order is pushed without
    // being awaited.
    let order = coordinator.gallery_order().await;
    coordinator.begin_drag(&order[1]).await.expect("drag");
    let reordered = coordinator.drop_on(0).await.expect("drop");
    assert_eq!(reordered, vec![order[1].clone(), order[0].clone()]);
    wait_for(|| async { !server.log.lock().await.orders.is_empty() }).await;
    assert_eq!(
        server.log.lock().await.orders[0],
        format!("{},{}", order[1], order[0])
    );

    // Delete the front item optimistically.
    let item = coordinator.item_at(0).await.expect("item");
    let affordance = item
        .fragment
        .first_by_class("image-delete")
        .expect("affordance");
    let deleted = coordinator
        .handle_item_click(0, affordance)
        .await
        .expect("click");
    assert!(deleted);
    assert_eq!(coordinator.item_count().await, 1);
    wait_for(|| async { !server.log.lock().await.deletes.is_empty() }).await;
    assert_eq!(server.log.lock().await.deletes[0], order[1].0);

    // One image is below the configured minimum again.
    assert_eq!(
        coordinator.try_submit().await,
        SubmitOutcome::Blocked(SubmitBlock::ItemCount {
            count: 1,
            min: 2,
            max: 3,
        })
    );
    assert_eq!(
        coordinator.gallery_order().await,
        vec![ImageId::from(order[0].as_str())]
    );
}
