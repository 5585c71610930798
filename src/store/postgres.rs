//! Relational backend: Postgres via sqlx.
//!
//! Native keys are BIGSERIAL integers for both users and photos, so
//! "newest first" is simply `ORDER BY id DESC`. Duplicate usernames
//! surface as unique-constraint violations. Search is pushed down as
//! an `ILIKE` predicate over the text columns.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use super::{normalize_query, Id, NewPhoto, Photo, Store, StoreError, User};
use crate::config::AppConfig;

pub struct PgStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    password_hash: String,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: Id::Int(r.id),
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
        }
    }
}

#[derive(FromRow)]
struct PhotoRow {
    id: i64,
    user_id: i64,
    storage_bucket: String,
    storage_key: String,
    original_name: String,
    title: Option<String>,
    description: Option<String>,
    tags: Option<String>,
    content_type: Option<String>,
    size_bytes: Option<i64>,
    uploaded_at: OffsetDateTime,
}

impl From<PhotoRow> for Photo {
    fn from(r: PhotoRow) -> Self {
        Photo {
            id: Id::Int(r.id),
            user_id: Id::Int(r.user_id),
            storage_bucket: r.storage_bucket,
            storage_key: r.storage_key,
            original_name: r.original_name,
            title: r.title,
            description: r.description,
            tags: r.tags,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            uploaded_at: r.uploaded_at,
        }
    }
}

const PHOTO_COLUMNS: &str = "id, user_id, storage_bucket, storage_key, original_name, \
     title, description, tags, content_type, size_bytes, uploaded_at";

impl PgStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required for the postgres backend")?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("connect to postgres")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            tracing::warn!(error = %e, "migration failed; continuing with existing schema");
        }

        Ok(Self { pool })
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::unavailable(e)
}

/// Escape LIKE wildcards so the query matches them literally.
fn like_pattern(q: &str) -> String {
    let escaped = q
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<Id, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let unique_violation = e
                .as_database_error()
                .and_then(|d| d.code())
                .map(|c| c == "23505")
                .unwrap_or(false);
            if unique_violation {
                StoreError::DuplicateUsername
            } else {
                db_err(e)
            }
        })?;
        Ok(Id::Int(row.0))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(User::from).ok_or(StoreError::NotFound)
    }

    async fn add_photo(&self, user_id: &Id, photo: NewPhoto) -> Result<Id, StoreError> {
        let owner = user_id.as_i64().ok_or(StoreError::NotFound)?;
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO photos (user_id, storage_bucket, storage_key, original_name,
                                title, description, tags, content_type, size_bytes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(&photo.storage_bucket)
        .bind(&photo.storage_key)
        .bind(&photo.original_name)
        .bind(&photo.title)
        .bind(&photo.description)
        .bind(&photo.tags)
        .bind(&photo.content_type)
        .bind(photo.size_bytes)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(Id::Int(row.0))
    }

    async fn list_photos(
        &self,
        user_id: &Id,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>, StoreError> {
        let owner = user_id.as_i64().ok_or(StoreError::NotFound)?;
        let rows = sqlx::query_as::<_, PhotoRow>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner)
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Photo::from).collect())
    }

    async fn get_photo(&self, photo_id: &Id, user_id: &Id) -> Result<Photo, StoreError> {
        let id = photo_id.as_i64().ok_or(StoreError::NotFound)?;
        let owner = user_id.as_i64().ok_or(StoreError::NotFound)?;
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE id = $1 AND user_id = $2
            "#
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Photo::from).ok_or(StoreError::NotFound)
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
        let owner = user_id.as_i64().ok_or(StoreError::NotFound)?;
        let rows = sqlx::query_as::<_, PhotoRow>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE user_id = $1
              AND (title ILIKE $2
                OR description ILIKE $2
                OR tags ILIKE $2
                OR original_name ILIKE $2)
            ORDER BY id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(owner)
        .bind(like_pattern(q))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Photo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_wraps_and_escapes() {
        assert_eq!(like_pattern("sunset"), "%sunset%");
        assert_eq!(like_pattern("100%"), "%100\\%%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
        assert_eq!(like_pattern("back\\slash"), "%back\\\\slash%");
    }
}
