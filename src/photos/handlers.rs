use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Redirect,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::{ListQuery, PhotoResponse};
use crate::auth::AuthUser;
use crate::error::{internal, store_err};
use crate::state::AppState;
use crate::store::{Id, NewPhoto};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DOWNLOAD_URL_TTL_SECS: u64 = 10 * 60;

pub fn photo_routes() -> Router<AppState> {
    Router::new()
        .route("/photos", get(list_photos).post(upload_photo))
        .route("/photos/:id", get(get_photo))
        .route("/photos/:id/download", get(download_photo))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

struct UploadForm {
    body: Bytes,
    content_type: String,
    original_name: String,
    title: Option<String>,
    description: Option<String>,
    tags: Option<String>,
}

async fn read_upload_form(mut mp: Multipart) -> Result<UploadForm, (StatusCode, String)> {
    let mut file: Option<(Bytes, String, String)> = None;
    let mut title = None;
    let mut description = None;
    let mut tags = None;

    while let Some(field) = mp.next_field().await.map_err(internal)? {
        match field.name().unwrap_or_default() {
            "file" => {
                let original_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "upload.bin".into());
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await.map_err(internal)?;
                file = Some((body, content_type, original_name));
            }
            "title" => title = Some(field.text().await.map_err(internal)?),
            "description" => description = Some(field.text().await.map_err(internal)?),
            "tags" => tags = Some(field.text().await.map_err(internal)?),
            _ => {}
        }
    }

    let (body, content_type, original_name) =
        file.ok_or((StatusCode::BAD_REQUEST, "file field is required".into()))?;
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "file is empty".into()));
    }
    Ok(UploadForm {
        body,
        content_type,
        original_name,
        title: title.filter(|s| !s.trim().is_empty()),
        description: description.filter(|s| !s.trim().is_empty()),
        tags: tags.filter(|s| !s.trim().is_empty()),
    })
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// POST /photos (multipart): `file` plus optional `title`, `description`,
/// `tags`. Puts the blob to object storage, persists the record, and
/// reads it back by the fresh id.
#[instrument(skip(state, mp), fields(user_id = %auth.id))]
pub async fn upload_photo(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Multipart,
) -> Result<(StatusCode, HeaderMap, Json<PhotoResponse>), (StatusCode, String)> {
    let form = read_upload_form(mp).await?;

    let bucket = state.config.s3.bucket.clone();
    let ext = ext_from_mime(&form.content_type).unwrap_or("bin");
    let key = format!("users/{}/{}.{}", auth.id, Uuid::new_v4(), ext);
    let size_bytes = form.body.len() as i64;

    state
        .storage
        .put_object(&bucket, &key, form.body, &form.content_type)
        .await
        .map_err(internal)?;

    let photo_id = state
        .store
        .add_photo(
            &auth.id,
            NewPhoto {
                storage_bucket: bucket,
                storage_key: key,
                original_name: form.original_name,
                title: form.title,
                description: form.description,
                tags: form.tags,
                content_type: Some(form.content_type),
                size_bytes: Some(size_bytes),
            },
        )
        .await
        .map_err(store_err)?;

    let photo = state
        .store
        .get_photo(&photo_id, &auth.id)
        .await
        .map_err(store_err)?;

    info!(photo_id = %photo.id, size_bytes, "photo uploaded");

    let mut headers = HeaderMap::new();
    if let Ok(location) = format!("/api/v1/photos/{}", photo.id).parse() {
        headers.insert(axum::http::header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(photo.into())))
}

/// GET /photos?q=&limit=&offset= — the caller's photos newest first,
/// optionally filtered by a substring query.
#[instrument(skip(state), fields(user_id = %auth.id))]
pub async fn list_photos(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(p): Query<ListQuery>,
) -> Result<Json<Vec<PhotoResponse>>, (StatusCode, String)> {
    let limit = p.limit.clamp(0, 200);
    let offset = p.offset.max(0);
    let photos = state
        .store
        .search_photos(&auth.id, p.q.as_deref(), limit, offset)
        .await
        .map_err(store_err)?;
    Ok(Json(photos.into_iter().map(PhotoResponse::from).collect()))
}

#[instrument(skip(state), fields(user_id = %auth.id))]
pub async fn get_photo(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PhotoResponse>, (StatusCode, String)> {
    let photo = state
        .store
        .get_photo(&Id::parse(&id), &auth.id)
        .await
        .map_err(store_err)?;
    Ok(Json(photo.into()))
}

/// GET /photos/:id/download — 302 to a short-lived presigned URL for
/// the blob. Ownership is checked by the store lookup.
#[instrument(skip(state), fields(user_id = %auth.id))]
pub async fn download_photo(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Redirect, (StatusCode, String)> {
    let photo = state
        .store
        .get_photo(&Id::parse(&id), &auth.id)
        .await
        .map_err(store_err)?;
    let url = state
        .storage
        .presign_get(&photo.storage_bucket, &photo.storage_key, DOWNLOAD_URL_TTL_SECS)
        .await
        .map_err(internal)?;
    Ok(Redirect::temporary(&url))
}
