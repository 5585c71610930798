use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::{Id, Photo};

/// Photo metadata returned to the client. Bucket and key stay internal;
/// downloads go through the presigned-URL route.
#[derive(Debug, Serialize)]
pub struct PhotoResponse {
    pub id: Id,
    pub original_name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

impl From<Photo> for PhotoResponse {
    fn from(p: Photo) -> Self {
        Self {
            id: p.id,
            original_name: p.original_name,
            title: p.title,
            description: p.description,
            tags: p.tags,
            content_type: p.content_type,
            size_bytes: p.size_bytes,
            uploaded_at: p.uploaded_at,
        }
    }
}

/// Query string for listing and searching photos.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_defaults() {
        let q: ListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.limit, 50);
        assert_eq!(q.offset, 0);
        assert_eq!(q.q, None);
    }

    #[test]
    fn photo_response_exposes_no_storage_location() {
        let json = serde_json::to_value(PhotoResponse {
            id: Id::Int(1),
            original_name: "a.jpg".into(),
            title: None,
            description: None,
            tags: None,
            content_type: Some("image/jpeg".into()),
            size_bytes: Some(10),
            uploaded_at: OffsetDateTime::UNIX_EPOCH,
        })
        .unwrap();
        assert!(json.get("storage_bucket").is_none());
        assert!(json.get("storage_key").is_none());
        assert_eq!(json["uploaded_at"], "1970-01-01T00:00:00Z");
    }
}
