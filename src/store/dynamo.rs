//! Partition/sort-key backend: DynamoDB.
//!
//! The users table is keyed by `username` (partition key), so duplicate
//! signups are rejected with a conditional put instead of an index. The
//! photos table is keyed by `user_id` (partition) + `id` (sort,
//! millisecond epoch), which gives newest-first ordering natively via
//! a descending query. DynamoDB has no substring predicate worth the
//! name, so search retrieves a bounded slice of the user's partition
//! and filters in-process.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    matches_needle, next_photo_id, normalize_query, paginate, Id, NewPhoto, Photo, Store,
    StoreError, User, SEARCH_SCAN_LIMIT,
};
use crate::config::AppConfig;

pub struct DynamoStore {
    client: Client,
    users_table: String,
    photos_table: String,
}

impl DynamoStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.s3.region.clone()))
            .load()
            .await;
        Ok(Self {
            client: Client::new(&shared),
            users_table: config.ddb_users_table.clone(),
            photos_table: config.ddb_photos_table.clone(),
        })
    }

    /// Pull the user's partition newest-first until `want` items are
    /// collected or the partition runs out.
    async fn query_photos(&self, user_id: &Id, want: usize) -> Result<Vec<Photo>, StoreError> {
        let mut photos = Vec::new();
        let mut stream = self
            .client
            .query()
            .table_name(&self.photos_table)
            .key_condition_expression("user_id = :uid")
            .expression_attribute_values(":uid", s(user_id.to_string()))
            .scan_index_forward(false)
            .into_paginator()
            .items()
            .send();
        while let Some(item) = stream.next().await {
            let item = item.map_err(StoreError::unavailable)?;
            photos.push(item_to_photo(&item)?);
            if photos.len() >= want {
                break;
            }
        }
        Ok(photos)
    }
}

fn s(v: impl Into<String>) -> AttributeValue {
    AttributeValue::S(v.into())
}

fn n(v: i64) -> AttributeValue {
    AttributeValue::N(v.to_string())
}

fn get_s(item: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn get_n(item: &HashMap<String, AttributeValue>, key: &str) -> Option<i64> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|v| v.parse().ok())
}

fn malformed(field: &str) -> StoreError {
    StoreError::Unavailable(anyhow::anyhow!(
        "malformed photo item: missing or invalid {}",
        field
    ))
}

fn item_to_photo(item: &HashMap<String, AttributeValue>) -> Result<Photo, StoreError> {
    let uploaded_at = get_s(item, "uploaded_at")
        .and_then(|v| OffsetDateTime::parse(&v, &Rfc3339).ok())
        .ok_or_else(|| malformed("uploaded_at"))?;
    Ok(Photo {
        id: Id::Int(get_n(item, "id").ok_or_else(|| malformed("id"))?),
        user_id: Id::Str(get_s(item, "user_id").ok_or_else(|| malformed("user_id"))?),
        storage_bucket: get_s(item, "storage_bucket").ok_or_else(|| malformed("storage_bucket"))?,
        storage_key: get_s(item, "storage_key").ok_or_else(|| malformed("storage_key"))?,
        original_name: get_s(item, "original_name").ok_or_else(|| malformed("original_name"))?,
        title: get_s(item, "title"),
        description: get_s(item, "description"),
        tags: get_s(item, "tags"),
        content_type: get_s(item, "content_type"),
        size_bytes: get_n(item, "size_bytes"),
        uploaded_at,
    })
}

fn photo_to_item(
    id: i64,
    user_id: &Id,
    photo: &NewPhoto,
    uploaded_at: &str,
) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::from([
        ("user_id".to_string(), s(user_id.to_string())),
        ("id".to_string(), n(id)),
        ("storage_bucket".to_string(), s(photo.storage_bucket.as_str())),
        ("storage_key".to_string(), s(photo.storage_key.as_str())),
        ("original_name".to_string(), s(photo.original_name.as_str())),
        ("uploaded_at".to_string(), s(uploaded_at)),
    ]);
    if let Some(title) = photo.title.as_deref() {
        item.insert("title".to_string(), s(title));
    }
    if let Some(description) = photo.description.as_deref() {
        item.insert("description".to_string(), s(description));
    }
    if let Some(tags) = photo.tags.as_deref() {
        item.insert("tags".to_string(), s(tags));
    }
    if let Some(content_type) = photo.content_type.as_deref() {
        item.insert("content_type".to_string(), s(content_type));
    }
    if let Some(size_bytes) = photo.size_bytes {
        item.insert("size_bytes".to_string(), n(size_bytes));
    }
    item
}

#[async_trait]
impl Store for DynamoStore {
    async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<Id, StoreError> {
        let user_id = Uuid::new_v4().to_string();
        let mut put = self
            .client
            .put_item()
            .table_name(&self.users_table)
            .item("username", s(username))
            .item("id", s(user_id.as_str()))
            .item("password_hash", s(password_hash))
            .condition_expression("attribute_not_exists(username)");
        if let Some(email) = email {
            put = put.item("email", s(email));
        }
        put.send().await.map_err(|e| {
            let service = e.into_service_error();
            if service.is_conditional_check_failed_exception() {
                StoreError::DuplicateUsername
            } else {
                StoreError::unavailable(service)
            }
        })?;
        Ok(Id::Str(user_id))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.users_table)
            .key("username", s(username))
            .send()
            .await
            .map_err(StoreError::unavailable)?;
        let item = out.item.ok_or(StoreError::NotFound)?;
        Ok(User {
            id: Id::Str(get_s(&item, "id").ok_or_else(|| malformed("id"))?),
            username: get_s(&item, "username").ok_or_else(|| malformed("username"))?,
            email: get_s(&item, "email"),
            password_hash: get_s(&item, "password_hash")
                .ok_or_else(|| malformed("password_hash"))?,
        })
    }

    async fn add_photo(&self, user_id: &Id, photo: NewPhoto) -> Result<Id, StoreError> {
        let id = next_photo_id();
        let uploaded_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(StoreError::unavailable)?;
        self.client
            .put_item()
            .table_name(&self.photos_table)
            .set_item(Some(photo_to_item(id, user_id, &photo, &uploaded_at)))
            .send()
            .await
            .map_err(StoreError::unavailable)?;
        Ok(Id::Int(id))
    }

    async fn list_photos(
        &self,
        user_id: &Id,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>, StoreError> {
        let want = (limit.max(0) + offset.max(0)) as usize;
        let photos = self.query_photos(user_id, want).await?;
        Ok(paginate(photos, limit, offset))
    }

    async fn get_photo(&self, photo_id: &Id, user_id: &Id) -> Result<Photo, StoreError> {
        let id = photo_id.as_i64().ok_or(StoreError::NotFound)?;
        let out = self
            .client
            .get_item()
            .table_name(&self.photos_table)
            .key("user_id", s(user_id.to_string()))
            .key("id", n(id))
            .send()
            .await
            .map_err(StoreError::unavailable)?;
        let item = out.item.ok_or(StoreError::NotFound)?;
        item_to_photo(&item)
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
        let needle = q.to_lowercase();
        let working_set = self.query_photos(user_id, SEARCH_SCAN_LIMIT).await?;
        let matching = working_set
            .into_iter()
            .filter(|p| matches_needle(p, &needle))
            .collect();
        Ok(paginate(matching, limit, offset))
    }
}
