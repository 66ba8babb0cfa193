use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::api::response::{ApiError, JSend};
use crate::context::RequestContext;
use crate::state_machine::FileState;
use crate::storage::models::FileRecord;
use crate::upload::IncomingFile;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub checksum: Option<String>,
    pub content_type: String,
    pub created_at: String,
    pub id: String,
    pub name: String,
    pub size: u64,
    pub state: FileState,
    pub updated_at: String,
}

/// Original filename -> assigned file id
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub token: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    mut multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let field_name = state.config.upload.field_name.as_str();
    let mut incoming: Vec<IncomingFile> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        if field.name() != Some(field_name) {
            continue;
        }

        let name = field.file_name().unwrap_or_default().to_string();
        // Content type: from the part header, else guessed from the filename
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .filter(|ct| ct != "application/octet-stream")
            .or_else(|| mime_guess::from_path(&name).first().map(|m| m.to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

        if data.len() as u64 > state.config.max_upload_size {
            return Err(ApiError::payload_too_large(format!(
                "File exceeds maximum upload size of {} bytes",
                state.config.max_upload_size
            )));
        }

        incoming.push(IncomingFile {
            name,
            content_type,
            data,
        });
    }

    if incoming.is_empty() {
        return Err(ApiError::bad_request(format!(
            "field '{field_name}' does not contain any file"
        )));
    }

    let mut files = BTreeMap::new();
    for file in incoming {
        let name = file.name.clone();
        let id = state.uploads.add_file(&ctx, file)?;
        files.insert(name, id);
    }

    tracing::debug!(token = %ctx.owner, count = files.len(), "Accepted upload");
    Ok(JSend::success(UploadResponse { files }))
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<JSend<Vec<FileResponse>>>, ApiError> {
    let files = state.uploads.file_list(&ctx.owner)?;
    Ok(JSend::success(files.iter().map(file_to_response).collect()))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (file, path) = state.uploads.file(&ctx.owner, &id)?;

    if file.state != FileState::Saved {
        return Err(ApiError::conflict(format!(
            "File is not available (state: {})",
            file.state
        )));
    }

    let blob = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::not_found("File content not found"),
        _ => ApiError::internal(format!("Failed to open file: {e}")),
    })?;

    let mut response = Body::from_stream(ReaderStream::new(blob)).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        file.content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
    headers.insert(
        "Content-Transfer-Encoding",
        HeaderValue::from_static("binary"),
    );
    if let Ok(value) = content_disposition(&file.name).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

pub async fn profile(ctx: RequestContext) -> Json<JSend<ProfileResponse>> {
    JSend::success(ProfileResponse { token: ctx.owner })
}

// ============================================================================
// Helpers
// ============================================================================

/// Attachment header with an ASCII fallback name and the exact name in
/// RFC 5987 form.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(name)
    )
}

fn file_to_response(file: &FileRecord) -> FileResponse {
    FileResponse {
        checksum: file.checksum.clone(),
        content_type: file.content_type.clone(),
        created_at: file.created_at.to_rfc3339(),
        id: file.id.clone(),
        name: file.name.clone(),
        size: file.size,
        state: file.state,
        updated_at: file.updated_at.to_rfc3339(),
    }
}
