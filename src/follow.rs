use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::debug;

use crate::auth::require_user;
use crate::config::*;
use crate::core::db::Store;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::validate_uuid;
use crate::models::models::{Followers, Followings, NotificationKind};
use crate::notifications::notify;
use crate::users::load_user;
use crate::AppState;

/// Records `follower_id -> following_id`. Returns `false` if it already existed.
pub fn follow_user(store: &Store, follower_id: &str, following_id: &str) -> anyhow::Result<bool> {
    store.transaction(|tx| {
        let added = tx.update_json(&followings_key(follower_id), |followings: &mut Followings| {
            if followings.iter().any(|id| id == following_id) {
                false
            } else {
                followings.push(following_id.to_string());
                true
            }
        })?;

        tx.update_json(&followers_key(following_id), |followers: &mut Followers| {
            if !followers.iter().any(|id| id == follower_id) {
                followers.push(follower_id.to_string());
            }
        })?;

        Ok(added)
    })
}

/// Removes `follower_id -> following_id`. Returns `false` if there was nothing to remove.
pub fn unfollow_user(store: &Store, follower_id: &str, following_id: &str) -> anyhow::Result<bool> {
    store.transaction(|tx| {
        let removed = tx.update_json(&followings_key(follower_id), |followings: &mut Followings| {
            let before = followings.len();
            followings.retain(|id| id != following_id);
            followings.len() != before
        })?;

        tx.update_json(&followers_key(following_id), |followers: &mut Followers| {
            followers.retain(|id| id != follower_id)
        })?;

        Ok(removed)
    })
}

pub fn get_followings(store: &Store, user_id: &str) -> anyhow::Result<Followings> {
    Ok(store.get_json(&followings_key(user_id))?.unwrap_or_default())
}

pub fn get_followers(store: &Store, user_id: &str) -> anyhow::Result<Followers> {
    Ok(store.get_json(&followers_key(user_id))?.unwrap_or_default())
}

// === HTTP Handlers ===

#[derive(Deserialize)]
pub struct FollowRequest {
    #[serde(default)]
    pub target_user_id: String,
}

pub async fn handle_follow(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<FollowRequest>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let store = &state.store;
    let target_user_id = body.target_user_id.as_str();

    if target_user_id.is_empty() || !validate_uuid(target_user_id) {
        return Err(ApiError::BadRequest("Invalid target user".to_string()));
    }
    if target_user_id == user_id {
        return Err(ApiError::BadRequest("Cannot follow yourself".to_string()));
    }

    // Verify target user exists
    if load_user(store, target_user_id)?.is_none() {
        return Err(ApiError::NotFound("Target user not found".to_string()));
    }

    if follow_user(store, &user_id, target_user_id)? {
        debug!("{user_id} followed {target_user_id}");
        notify(&state, target_user_id, &user_id, NotificationKind::Follow, None)?;
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "followed"})))
}

pub async fn handle_unfollow(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<FollowRequest>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let target_user_id = body.target_user_id.as_str();

    if target_user_id.is_empty() || !validate_uuid(target_user_id) {
        return Err(ApiError::BadRequest("Invalid target user".to_string()));
    }

    unfollow_user(&state.store, &user_id, target_user_id)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "unfollowed"})))
}

pub async fn get_followings_list(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    if !validate_uuid(&user_id) {
        return Err(ApiError::BadRequest("User ID required".to_string()));
    }

    Ok(HttpResponse::Ok().json(get_followings(&state.store, &user_id)?))
}

pub async fn get_followers_list(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    if !validate_uuid(&user_id) {
        return Err(ApiError::BadRequest("User ID required".to_string()));
    }

    Ok(HttpResponse::Ok().json(get_followers(&state.store, &user_id)?))
}
