use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    response::Html,
    routing::post,
    Router,
};
use tower_http::{
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::{
    error::{AppError, AppResult},
    render, upload, AppState,
};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    let index = ServeFile::new(state.public_dir.join("index.html"));
    let assets = ServeDir::new(&state.public_dir);

    Router::new()
        .route_service("/", index)
        .route(
            "/upload",
            post(upload_image).layer(DefaultBodyLimit::max(body_limit)),
        )
        .fallback_service(assets)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn upload_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Html<String>> {
    // a body that is not multipart cannot carry a file
    let multipart = multipart.map_err(|rejection| {
        tracing::debug!(%rejection, "upload without a multipart body");
        AppError::MissingImage
    })?;
    // the temp file lives until this handler returns, on every path
    let uploaded =
        upload::receive_image(multipart, &state.upload_dir, state.max_upload_bytes).await?;
    let image = uploaded.read().await?;

    let result = state.annotator.annotate(&image.bytes).await?;
    tracing::info!(
        size = uploaded.size(),
        mime = %image.mime,
        declared_mime = ?uploaded.declared_mime(),
        labels = result.len(),
        "annotated upload"
    );
    if result.is_empty() {
        tracing::debug!("no labels detected");
    }

    Ok(Html(render::render_labels(&image.bytes, &image.mime, &result)))
}
