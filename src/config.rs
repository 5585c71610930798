use std::fmt;
use std::str::FromStr;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Object storage connection. Endpoint and static credentials are only
/// set for MinIO-style deployments; left unset, the AWS default
/// provider chain applies.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// Which persistence backend serves the storage contract. Chosen once
/// at startup from `DB_PROVIDER`; immutable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Mongo,
    Dynamo,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(StoreBackend::Postgres),
            "mongo" => Ok(StoreBackend::Mongo),
            "dynamo" => Ok(StoreBackend::Dynamo),
            other => anyhow::bail!(
                "unknown DB_PROVIDER {:?} (expected postgres, mongo or dynamo)",
                other
            ),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Mongo => "mongo",
            StoreBackend::Dynamo => "dynamo",
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: StoreBackend,
    /// Postgres connection string; required when `backend` is Postgres.
    pub database_url: Option<String>,
    /// MongoDB connection string; required when `backend` is Mongo.
    pub mongo_uri: Option<String>,
    pub mongo_db: String,
    pub ddb_users_table: String,
    pub ddb_photos_table: String,
    pub s3: S3Config,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = std::env::var("DB_PROVIDER")
            .unwrap_or_else(|_| "postgres".into())
            .parse::<StoreBackend>()?;

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is required")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "photostash".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "photostash-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
        };

        let s3 = S3Config {
            bucket: std::env::var("S3_BUCKET").context("S3_BUCKET is required")?,
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-2".into()),
            endpoint: std::env::var("S3_ENDPOINT").ok(),
            access_key: std::env::var("S3_ACCESS_KEY").ok(),
            secret_key: std::env::var("S3_SECRET_KEY").ok(),
        };

        Ok(Self {
            backend,
            database_url: std::env::var("DATABASE_URL").ok(),
            mongo_uri: std::env::var("MONGO_URI").ok(),
            mongo_db: std::env::var("MONGO_DB").unwrap_or_else(|_| "photostash".into()),
            ddb_users_table: std::env::var("DDB_USERS_TABLE").unwrap_or_else(|_| "users".into()),
            ddb_photos_table: std::env::var("DDB_PHOTOS_TABLE").unwrap_or_else(|_| "photos".into()),
            s3,
            jwt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_known_providers() {
        assert_eq!("postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("mongo".parse::<StoreBackend>().unwrap(), StoreBackend::Mongo);
        assert_eq!("dynamo".parse::<StoreBackend>().unwrap(), StoreBackend::Dynamo);
    }

    #[test]
    fn backend_rejects_unknown_provider() {
        let err = "oracle".parse::<StoreBackend>().unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn backend_display_roundtrips() {
        for b in [StoreBackend::Postgres, StoreBackend::Mongo, StoreBackend::Dynamo] {
            assert_eq!(b.to_string().parse::<StoreBackend>().unwrap(), b);
        }
    }
}
