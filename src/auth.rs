use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::*;
use crate::core::db::Store;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::{now_iso, validate_uuid, verify_password};
use crate::core::query_params::{get_string, parse_query_params};
use crate::models::models::{TokenData, User};
use crate::AppState;

#[derive(Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Issues a new session token for `user_id` and records it in the token list.
pub fn issue_token(store: &Store, user_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let data = TokenData {
        user_id: user_id.to_string(),
        created_at: now_iso(),
    };
    store.set_json(&token_key(&token), &data)?;
    store.update_json(TOKENS_LIST_KEY, |tokens: &mut Vec<String>| tokens.push(token.clone()))?;
    Ok(token)
}

/// Deletes every token belonging to `user_id`.
pub fn revoke_user_tokens(store: &Store, user_id: &str) -> anyhow::Result<usize> {
    let tokens: Vec<String> = store.get_json(TOKENS_LIST_KEY)?.unwrap_or_default();
    let mut revoked = Vec::new();

    for token in tokens {
        let key = token_key(&token);
        if let Some(data) = store.get_json::<TokenData>(&key)? {
            if data.user_id == user_id {
                store.delete(&key)?;
                revoked.push(token);
            }
        }
    }

    store.update_json(TOKENS_LIST_KEY, |tokens: &mut Vec<String>| {
        tokens.retain(|t| !revoked.contains(t))
    })?;
    Ok(revoked.len())
}

pub async fn login_user(
    state: web::Data<AppState>,
    creds: web::Json<Credentials>,
) -> ApiResult<HttpResponse> {
    let store = &state.store;
    let users: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();

    for id in users {
        if let Some(u) = store.get_json::<User>(&user_key(&id))? {
            if u.id.is_empty() || !validate_uuid(&u.id) {
                continue;
            }
            if u.username == creds.username && verify_password(&creds.password, &u.password) {
                let token = issue_token(store, &u.id)?;
                info!("User {} logged in", u.username);

                return Ok(HttpResponse::Ok().json(serde_json::json!({
                    "token": token,
                    "user_id": u.id
                })));
            }
        }
    }

    debug!("Failed login for {:?}", creds.username);
    Err(ApiError::Unauthorized)
}

pub async fn logout_user(state: web::Data<AppState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?;
    let key = token_key(&token);
    let store = &state.store;

    if !store.exists(&key)? {
        return Err(ApiError::Unauthorized);
    }

    store.delete(&key)?;
    store.update_json(TOKENS_LIST_KEY, |tokens: &mut Vec<String>| tokens.retain(|t| *t != token))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Logged out successfully"
    })))
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let auth_header = req.headers().get("Authorization")?.to_str().ok()?;
    auth_header
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Token from the `Authorization` header, or from `?token=` for EventSource clients.
fn request_token(req: &HttpRequest) -> Option<String> {
    bearer_token(req).or_else(|| get_string(&parse_query_params(req.query_string()), "token"))
}

pub fn validate_token(state: &AppState, req: &HttpRequest) -> Option<String> {
    let store = &state.store;
    let token = request_token(req)?;
    let data = store.get_json::<TokenData>(&token_key(&token)).ok()??;

    // Check if token is expired
    if let Ok(created) = chrono::DateTime::parse_from_rfc3339(&data.created_at) {
        let age_hours = (chrono::Utc::now() - created.with_timezone(&chrono::Utc)).num_hours();
        if age_hours >= state.config.token_expiration_hours {
            return None;
        }
    }

    // Check if user still exists
    if !store.exists(&user_key(&data.user_id)).ok()? {
        return None;
    }
    Some(data.user_id)
}

pub fn require_user(state: &AppState, req: &HttpRequest) -> ApiResult<String> {
    validate_token(state, req).ok_or(ApiError::Unauthorized)
}
