//! Document backend: MongoDB.
//!
//! Native keys are application-assigned: UUID strings for users,
//! millisecond-epoch integers for photos (sorted descending for
//! "newest first"). A unique index on `username`, created at connect,
//! turns duplicate signups into write errors. Search is pushed down as
//! a case-insensitive `$regex` `$or` filter with the query escaped so
//! it matches literally.

use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{next_photo_id, normalize_query, Id, NewPhoto, Photo, Store, StoreError, User};
use crate::config::AppConfig;

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let uri = config
            .mongo_uri
            .as_deref()
            .context("MONGO_URI is required for the mongo backend")?;
        let client = Client::with_uri_str(uri).await.context("connect to mongodb")?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(&config.mongo_db));

        let store = Self { db };
        let index = IndexModel::builder()
            .keys(doc! { "username": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        store
            .users()
            .create_index(index, None)
            .await
            .context("create unique username index")?;
        Ok(store)
    }

    fn users(&self) -> Collection<Document> {
        self.db.collection("users")
    }

    fn photos(&self) -> Collection<Document> {
        self.db.collection("photos")
    }
}

fn db_err(e: MongoError) -> StoreError {
    StoreError::unavailable(e)
}

fn is_duplicate_key(e: &MongoError) -> bool {
    matches!(
        &*e.kind,
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

fn malformed(field: &str) -> StoreError {
    StoreError::Unavailable(anyhow::anyhow!(
        "malformed photo document: missing or invalid {}",
        field
    ))
}

fn get_opt_str(doc: &Document, key: &str) -> Option<String> {
    doc.get_str(key).ok().map(str::to_string)
}

fn doc_to_user(doc: &Document) -> Result<User, StoreError> {
    Ok(User {
        id: Id::Str(doc.get_str("id").map_err(|_| malformed("id"))?.to_string()),
        username: doc
            .get_str("username")
            .map_err(|_| malformed("username"))?
            .to_string(),
        email: get_opt_str(doc, "email"),
        password_hash: doc
            .get_str("password_hash")
            .map_err(|_| malformed("password_hash"))?
            .to_string(),
    })
}

fn doc_to_photo(doc: &Document) -> Result<Photo, StoreError> {
    let uploaded_at = doc
        .get_str("uploaded_at")
        .ok()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .ok_or_else(|| malformed("uploaded_at"))?;
    Ok(Photo {
        id: Id::Int(doc.get_i64("id").map_err(|_| malformed("id"))?),
        user_id: Id::Str(doc.get_str("user_id").map_err(|_| malformed("user_id"))?.to_string()),
        storage_bucket: doc
            .get_str("storage_bucket")
            .map_err(|_| malformed("storage_bucket"))?
            .to_string(),
        storage_key: doc
            .get_str("storage_key")
            .map_err(|_| malformed("storage_key"))?
            .to_string(),
        original_name: doc
            .get_str("original_name")
            .map_err(|_| malformed("original_name"))?
            .to_string(),
        title: get_opt_str(doc, "title"),
        description: get_opt_str(doc, "description"),
        tags: get_opt_str(doc, "tags"),
        content_type: get_opt_str(doc, "content_type"),
        size_bytes: doc.get_i64("size_bytes").ok(),
        uploaded_at,
    })
}

fn photo_to_doc(id: i64, user_id: &Id, photo: &NewPhoto, uploaded_at: &str) -> Document {
    let mut doc = doc! {
        "id": id,
        "user_id": user_id.to_string(),
        "storage_bucket": photo.storage_bucket.as_str(),
        "storage_key": photo.storage_key.as_str(),
        "original_name": photo.original_name.as_str(),
        "uploaded_at": uploaded_at,
    };
    if let Some(title) = photo.title.as_deref() {
        doc.insert("title", title);
    }
    if let Some(description) = photo.description.as_deref() {
        doc.insert("description", description);
    }
    if let Some(tags) = photo.tags.as_deref() {
        doc.insert("tags", tags);
    }
    if let Some(content_type) = photo.content_type.as_deref() {
        doc.insert("content_type", content_type);
    }
    if let Some(size_bytes) = photo.size_bytes {
        doc.insert("size_bytes", size_bytes);
    }
    doc
}

fn newest_first(limit: i64, offset: i64) -> FindOptions {
    FindOptions::builder()
        .sort(doc! { "id": -1 })
        .skip(offset.max(0) as u64)
        .limit(limit.max(0))
        .build()
}

#[async_trait]
impl Store for MongoStore {
    async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<Id, StoreError> {
        let user_id = Uuid::new_v4().to_string();
        let mut doc = doc! {
            "id": user_id.as_str(),
            "username": username,
            "password_hash": password_hash,
        };
        if let Some(email) = email {
            doc.insert("email", email);
        }
        self.users().insert_one(doc, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                StoreError::DuplicateUsername
            } else {
                db_err(e)
            }
        })?;
        Ok(Id::Str(user_id))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        let doc = self
            .users()
            .find_one(doc! { "username": username }, None)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::NotFound)?;
        doc_to_user(&doc)
    }

    async fn add_photo(&self, user_id: &Id, photo: NewPhoto) -> Result<Id, StoreError> {
        let id = next_photo_id();
        let uploaded_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(StoreError::unavailable)?;
        let doc = photo_to_doc(id, user_id, &photo, &uploaded_at);
        self.photos().insert_one(doc, None).await.map_err(db_err)?;
        Ok(Id::Int(id))
    }

    async fn list_photos(
        &self,
        user_id: &Id,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>, StoreError> {
        let filter = doc! { "user_id": user_id.to_string() };
        let cursor = self
            .photos()
            .find(filter, newest_first(limit, offset))
            .await
            .map_err(db_err)?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(db_err)?;
        docs.iter().map(doc_to_photo).collect()
    }

    async fn get_photo(&self, photo_id: &Id, user_id: &Id) -> Result<Photo, StoreError> {
        let id = photo_id.as_i64().ok_or(StoreError::NotFound)?;
        let doc = self
            .photos()
            .find_one(doc! { "id": id, "user_id": user_id.to_string() }, None)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::NotFound)?;
        doc_to_photo(&doc)
    }

    async fn search_photos(
        &self,
        user_id: &Id,
        query: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>, StoreError> {
        let Some(q) = normalize_query(query) else {
            return self.list_photos(user_id, limit, offset).await;
        };
        let pattern = Bson::RegularExpression(mongodb::bson::Regex {
            pattern: regex::escape(q),
            options: "i".into(),
        });
        let filter = doc! {
            "user_id": user_id.to_string(),
            "$or": [
                { "title": pattern.clone() },
                { "description": pattern.clone() },
                { "tags": pattern.clone() },
                { "original_name": pattern },
            ],
        };
        let cursor = self
            .photos()
            .find(filter, newest_first(limit, offset))
            .await
            .map_err(db_err)?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(db_err)?;
        docs.iter().map(doc_to_photo).collect()
    }
}
