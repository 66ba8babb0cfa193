use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::{handlers, identity};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Room for the multipart framing around a maximum-size file
    let upload_limit = state.config.max_upload_size as usize + 64 * 1024;
    let assets = PathBuf::from(&state.config.node.asset_dir);

    // Everything that needs to know who is asking
    let identified = Router::new()
        .route(
            "/upload",
            post(handlers::upload_files).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/files", get(handlers::list_files))
        .route("/api/profile", get(handlers::profile))
        .route("/api/widget.js", get(handlers::widget_js))
        .route("/file/:id", get(handlers::download_file))
        .route("/ws/:request/:key/", get(handlers::event_stream))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            identity::identify,
        ));

    Router::new()
        .merge(identified)
        // Internal
        .route("/_internal/health", get(handlers::health))
        // Static assets
        .route_service("/", ServeFile::new(assets.join("index.html")))
        .route_service("/favicon.ico", ServeFile::new(assets.join("favicon.ico")))
        .nest_service("/static", ServeDir::new(assets.join("static")))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
