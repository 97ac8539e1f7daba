use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderValue, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_shared::crypto::EnvelopeCipher;
use courier_shared::enrich::{EnrichContext, Pipeline};
use courier_shared::types::{Conversation, EnrichedMessage, Message};
use courier_store::DiffEngine;

use crate::auth::require_secret;
use crate::config::ServerConfig;
use crate::envelope::{envelope_layer, MAX_REQUEST_BODY};
use crate::error::ServerError;
use crate::host::{HostAutomation, SendReceipt, SendRequest};
use crate::hub::Hub;
use crate::pagination::{clamp_limit, Cursor, Page};
use crate::store::StoreHandle;
use crate::stream::stream_handler;
use crate::thumbnail;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub cipher: EnvelopeCipher,
    pub store: StoreHandle,
    pub pipeline: Arc<Pipeline>,
    pub hub: Hub,
    pub engine: Arc<DiffEngine>,
    pub host: Arc<dyn HostAutomation>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(server_status))
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id/messages", get(conversation_messages))
        .route("/conversations/:id/read", post(mark_read))
        .route("/search", get(search))
        .route("/attachments/:id", get(attachment))
        .route("/attachments/:id/thumbnail", get(attachment_thumbnail))
        .route("/send", post(send_message))
        .route("/stream", get(stream_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .layer(middleware::from_fn_with_state(state.clone(), envelope_layer))
        .layer(middleware::from_fn_with_state(state.clone(), require_secret))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    require_encryption: bool,
    connections: usize,
    watermark: i64,
}

#[derive(Deserialize)]
struct PageQuery {
    cursor: Option<String>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    conversation: Option<String>,
    cursor: Option<String>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct ThumbnailQuery {
    size: Option<u32>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        require_encryption: state.config.require_encryption,
        connections: state.hub.connection_count().await,
        watermark: state.engine.watermark().get(),
    })
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Conversation>>, ServerError> {
    let offset = Cursor::offset(query.cursor.as_deref())?;
    let limit = clamp_limit(query.limit);

    let rows = state
        .store
        .run(move |db| db.list_conversations(offset, limit + 1))
        .await?;
    Ok(Json(Page::from_overfetch(rows, limit, |_| {
        Cursor::Offset(offset + limit)
    })))
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<EnrichedMessage>>, ServerError> {
    let before = Cursor::before(query.cursor.as_deref())?;
    let limit = clamp_limit(query.limit);

    let (participants, rows) = state
        .store
        .run(move |db| {
            let conversation = db.get_conversation(&conversation_id)?;
            let rows = db.messages_for_conversation(&conversation.id, before, limit + 1)?;
            Ok((conversation.participants, rows))
        })
        .await?;

    let ctx = EnrichContext { participants };
    Ok(Json(enriched_page(&state.pipeline, &ctx, rows, limit)))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let guid = conversation_id.clone();
    state.store.run(move |db| db.get_conversation(&guid)).await?;
    state.host.mark_read(&conversation_id).await?;

    info!(conversation_id = %conversation_id, "conversation marked read");
    Ok(Json(serde_json::json!({ "read": true })))
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Page<EnrichedMessage>>, ServerError> {
    let needle = query.q.trim().to_string();
    if needle.is_empty() {
        return Err(ServerError::BadRequest("q must not be empty".into()));
    }
    let before = Cursor::before(query.cursor.as_deref())?;
    let limit = clamp_limit(query.limit);
    let conversation = query.conversation;

    let rows = state
        .store
        .run(move |db| db.search_messages(&needle, conversation.as_deref(), before, limit + 1))
        .await?;
    Ok(Json(enriched_page(
        &state.pipeline,
        &EnrichContext::default(),
        rows,
        limit,
    )))
}

fn enriched_page(
    pipeline: &Pipeline,
    ctx: &EnrichContext,
    rows: Vec<Message>,
    limit: u32,
) -> Page<EnrichedMessage> {
    let page = Page::from_overfetch(rows, limit, |last| Cursor::Before(last.id));
    Page {
        items: page
            .items
            .into_iter()
            .map(|m| pipeline.process_in(m, ctx))
            .collect(),
        next_cursor: page.next_cursor,
    }
}

/// Read an attachment's bytes, refusing anything outside the attachments root.
async fn load_attachment(state: &AppState, id: i64) -> Result<(Option<String>, Vec<u8>), ServerError> {
    let file = state.store.run(move |db| db.get_attachment(id)).await?;
    let home = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf());
    let path = file
        .resolve_path(home.as_deref())
        .ok_or_else(|| ServerError::NotFound(format!("attachment {id} has no file")))?;

    let path = confine(&state.config.attachments_root, &path).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ServerError::NotFound(format!("attachment {id} is missing on disk")))?;
    Ok((file.meta.mime_type, bytes))
}

async fn confine(root: &FsPath, path: &FsPath) -> Result<PathBuf, ServerError> {
    let not_found = || ServerError::NotFound("attachment file unavailable".into());
    let root = tokio::fs::canonicalize(root).await.map_err(|_| not_found())?;
    let resolved = tokio::fs::canonicalize(path).await.map_err(|_| not_found())?;
    if !resolved.starts_with(&root) {
        tracing::warn!(path = %path.display(), "attachment outside attachments root");
        return Err(not_found());
    }
    Ok(resolved)
}

async fn attachment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ServerError> {
    let (mime, bytes) = load_attachment(&state, id).await?;
    let content_type = mime
        .as_deref()
        .and_then(|m| HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn attachment_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response, ServerError> {
    let size = query
        .size
        .unwrap_or(thumbnail::DEFAULT_SIZE)
        .clamp(1, thumbnail::MAX_SIZE);

    let meta = state.store.run(move |db| db.get_attachment(id)).await?.meta;
    if !meta.is_image() {
        return Err(ServerError::UnsupportedMedia(format!(
            "attachment {id} is not an image"
        )));
    }

    let (_, bytes) = load_attachment(&state, id).await?;
    let jpeg = tokio::task::spawn_blocking(move || thumbnail::render(&bytes, size))
        .await
        .map_err(|e| ServerError::Internal(format!("thumbnail task failed: {e}")))?
        .map_err(|e| ServerError::UnsupportedMedia(format!("cannot decode image: {e}")))?;

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"))],
        jpeg,
    )
        .into_response())
}

async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendReceipt>, ServerError> {
    if request.recipient.trim().is_empty() || request.text.is_empty() {
        return Err(ServerError::BadRequest(
            "recipient and text are required".into(),
        ));
    }
    let receipt = state.host.send(&request).await?;
    Ok(Json(receipt))
}

pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::{TestApp, SECRET};
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use courier_shared::constants::{ENCRYPTED_HEADER, SECRET_HEADER};
    use courier_shared::crypto::EncryptedEnvelope;
    use courier_shared::types::Confidence;
    use courier_store::fixtures::NewMessage;
    use tower::ServiceExt;

    use crate::host::CommandHost;

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {SECRET}"))
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {SECRET}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(app: &TestApp, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.router().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn call_json(app: &TestApp, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, body) = call(app, req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let app = TestApp::new();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = call_json(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_or_wrong_secret_rejected() {
        let app = TestApp::new();
        let req = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let (status, body) = call_json(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let req = Request::builder()
            .uri("/status")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&app, req).await.0, StatusCode::UNAUTHORIZED);

        // Query tokens are only honoured on the stream handshake.
        let req = Request::builder()
            .uri(format!("/status?token={SECRET}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&app, req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_with_secret_header() {
        let app = TestApp::new();
        let chat = app.writer.direct_chat("+15550001111");
        app.writer.insert(NewMessage::inbound(chat, "hi"));

        let req = Request::builder()
            .uri("/status")
            .header(SECRET_HEADER, SECRET)
            .body(Body::empty())
            .unwrap();
        let (status, body) = call_json(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connections"], 0);
        assert_eq!(body["require_encryption"], false);
    }

    #[tokio::test]
    async fn test_required_encryption() {
        let app = TestApp::with_config(|c| c.require_encryption = true);

        let (status, _) = call(&app, get("/status")).await;
        assert_eq!(status, StatusCode::UPGRADE_REQUIRED);

        let mut req = get("/status");
        req.headers_mut()
            .insert(ENCRYPTED_HEADER, HeaderValue::from_static("1"));
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);

        let envelope: EncryptedEnvelope = serde_json::from_slice(&body).unwrap();
        let plain = app.state.cipher.decrypt(&envelope).unwrap();
        let status: serde_json::Value = serde_json::from_slice(&plain).unwrap();
        assert_eq!(status["require_encryption"], true);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(call(&app, req).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_encrypted_send_round_trip() {
        let app = TestApp::new();
        let payload = serde_json::json!({"recipient": "+15550001111", "text": "on my way"});
        let sealed = app.state.cipher.seal_json(&payload).unwrap();

        let mut req = post_json("/send", serde_json::to_value(&sealed).unwrap());
        req.headers_mut()
            .insert(ENCRYPTED_HEADER, HeaderValue::from_static("1"));
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);

        let envelope: EncryptedEnvelope = serde_json::from_slice(&body).unwrap();
        let receipt: SendReceipt =
            serde_json::from_slice(&app.state.cipher.decrypt(&envelope).unwrap()).unwrap();
        assert!(receipt.delivered);

        let sent = app.host.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "on my way");
        assert_eq!(sent[0].service, "iMessage");
    }

    #[tokio::test]
    async fn test_undecryptable_request_is_plaintext_400() {
        let app = TestApp::new();
        let other = EnvelopeCipher::from_secret("someone-else").unwrap();
        let sealed = other.seal_json(&serde_json::json!({"recipient": "x", "text": "y"})).unwrap();

        let mut req = post_json("/send", serde_json::to_value(&sealed).unwrap());
        req.headers_mut()
            .insert(ENCRYPTED_HEADER, HeaderValue::from_static("1"));
        let (status, body) = call_json(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Decryption failed"));
        assert!(app.host.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_offset_pages() {
        let app = TestApp::new();
        for n in 0..3 {
            let chat = app.writer.direct_chat(&format!("+1555000000{n}"));
            app.writer.insert(NewMessage::inbound(chat, "hello"));
        }

        let (status, first) = call_json(&app, get("/conversations?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["items"].as_array().unwrap().len(), 2);
        let cursor = first["next_cursor"].as_str().unwrap().to_string();

        let (_, second) = call_json(&app, get(&format!("/conversations?limit=2&cursor={cursor}"))).await;
        assert_eq!(second["items"].as_array().unwrap().len(), 1);
        assert!(second["next_cursor"].is_null());
        assert_ne!(first["items"][1]["id"], second["items"][0]["id"]);
    }

    #[tokio::test]
    async fn test_message_pages_are_enriched_and_stable() {
        let app = TestApp::new();
        let chat = app.writer.direct_chat("+15550001111");
        for i in 0..4 {
            app.writer.insert(NewMessage::inbound(chat, &format!("filler {i}")));
        }
        app.writer
            .insert(NewMessage::inbound(chat, "Your login code is 482913"));

        let base = "/conversations/iMessage;-;+15550001111/messages";
        let (status, first) = call_json(&app, get(&format!("{base}?limit=2"))).await;
        assert_eq!(status, StatusCode::OK);
        let codes = &first["items"][0]["codes"];
        assert_eq!(codes[0]["value"], "482913");
        assert_eq!(
            serde_json::from_value::<Confidence>(codes[0]["confidence"].clone()).unwrap(),
            Confidence::High
        );

        let cursor = first["next_cursor"].as_str().unwrap().to_string();
        let (_, page) = call_json(&app, get(&format!("{base}?limit=2&cursor={cursor}"))).await;
        app.writer.insert(NewMessage::inbound(chat, "arrived later"));
        let (_, again) = call_json(&app, get(&format!("{base}?limit=2&cursor={cursor}"))).await;
        assert_eq!(page, again);

        let (status, _) = call(&app, get("/conversations/iMessage;-;nobody/messages")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, get(&format!("{base}?cursor=not-a-cursor"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search() {
        let app = TestApp::new();
        let chat = app.writer.direct_chat("+15550001111");
        app.writer.insert(NewMessage::inbound(chat, "Dinner at eight?"));
        app.writer.insert(NewMessage::inbound(chat, "no thanks"));

        let (status, body) = call_json(&app, get("/search?q=dinner")).await;
        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["message"]["text"], "Dinner at eight?");

        let (status, _) = call(&app, get("/search?q=%20")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_attachment_confined_to_root() {
        let app = TestApp::new();
        let chat = app.writer.direct_chat("+15550001111");
        let msg = app.writer.insert(NewMessage::inbound(chat, ""));

        let inside = app.state.config.attachments_root.join("note.txt");
        std::fs::write(&inside, b"inside").unwrap();
        let ok = app
            .writer
            .attach(msg, inside.to_str().unwrap(), "text/plain");

        let outside = app.dir.path().join("secret.txt");
        std::fs::write(&outside, b"outside").unwrap();
        let escaped = app.state.config.attachments_root.join("../secret.txt");
        let bad = app
            .writer
            .attach(msg, escaped.to_str().unwrap(), "text/plain");

        let resp = app.router().oneshot(get(&format!("/attachments/{ok}"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            to_bytes(resp.into_body(), usize::MAX).await.unwrap().as_ref(),
            b"inside"
        );

        let (status, _) = call(&app, get(&format!("/attachments/{bad}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, get("/attachments/9999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_thumbnail() {
        let app = TestApp::new();
        let chat = app.writer.direct_chat("+15550001111");
        let msg = app.writer.insert(NewMessage::inbound(chat, ""));

        let png = app.state.config.attachments_root.join("photo.png");
        std::fs::write(&png, thumbnail::sample_png(600, 300)).unwrap();
        let image = app.writer.attach(msg, png.to_str().unwrap(), "image/png");

        let doc = app.state.config.attachments_root.join("doc.txt");
        std::fs::write(&doc, b"text").unwrap();
        let text = app.writer.attach(msg, doc.to_str().unwrap(), "text/plain");

        let resp = app
            .router()
            .oneshot(get(&format!("/attachments/{image}/thumbnail?size=100")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
        let jpeg = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));

        let (status, _) = call(&app, get(&format!("/attachments/{text}/thumbnail"))).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_mark_read() {
        let app = TestApp::new();
        app.writer.direct_chat("+15550001111");

        let req = post_json("/conversations/iMessage;-;+15550001111/read", serde_json::json!({}));
        let (status, _) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            *app.host.read.lock().unwrap(),
            vec!["iMessage;-;+15550001111".to_string()]
        );

        let req = post_json("/conversations/iMessage;-;nobody/read", serde_json::json!({}));
        assert_eq!(call(&app, req).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unconfigured_host_is_503() {
        let mut app = TestApp::new();
        app.state.host = Arc::new(CommandHost::default());

        let req = post_json("/send", serde_json::json!({"recipient": "+15550001111", "text": "hi"}));
        let (status, body) = call_json(&app, req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());

        let req = post_json("/send", serde_json::json!({"recipient": "", "text": "hi"}));
        assert_eq!(call(&app, req).await.0, StatusCode::BAD_REQUEST);
    }
}
