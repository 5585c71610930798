use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::auth::dto::{AuthResponse, LoginRequest, MeResponse, PublicUser, SignupRequest};
use crate::auth::jwt::{AuthUser, JwtKeys};
use crate::auth::password::{hash_password, verify_password};
use crate::error::{internal, store_err};
use crate::state::AppState;
use crate::store::StoreError;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), (StatusCode, String)> {
    // usernames are case-sensitive; trim whitespace but never fold case
    let username = payload.username.trim();
    if username.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Username is required".into()));
    }
    if payload.password.len() < 8 {
        warn!(username, "password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }
    let email = payload.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    if let Some(email) = email {
        if !is_valid_email(email) {
            warn!(username, "invalid email");
            return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
        }
    }

    let hash = hash_password(&payload.password).map_err(internal)?;
    let user_id = state
        .store
        .create_user(username, email, &hash)
        .await
        .map_err(store_err)?;

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.sign(&user_id, username).map_err(internal)?;

    info!(user_id = %user_id, username, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            access_token,
            user: PublicUser {
                id: user_id,
                username: username.to_string(),
                email: email.map(str::to_string),
            },
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let username = payload.username.trim();
    let invalid = || {
        (
            StatusCode::UNAUTHORIZED,
            "Invalid username or password".to_string(),
        )
    };

    let user = match state.store.get_user_by_username(username).await {
        Ok(u) => u,
        Err(StoreError::NotFound) => {
            // unknown user and bad password are indistinguishable
            warn!(username, "login unknown username");
            return Err(invalid());
        }
        Err(e) => return Err(store_err(e)),
    };

    let ok = verify_password(&payload.password, &user.password_hash).map_err(internal)?;
    if !ok {
        warn!(username, user_id = %user.id, "login invalid password");
        return Err(invalid());
    }

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.sign(&user.id, &user.username).map_err(internal)?;

    info!(user_id = %user.id, username, "user logged in");
    Ok(Json(AuthResponse {
        access_token,
        user: PublicUser {
            id: user.id,
            username: user.username,
            email: user.email,
        },
    }))
}

#[instrument(skip_all)]
pub async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        id: auth.id,
        username: auth.username,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_accepts_plausible_addresses() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("a.b+c@sub.domain.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("missing@tld"));
    }
}
