use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use tracing::debug;

use crate::auth::require_user;
use crate::config::{likes_key, post_key};
use crate::core::db::Store;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::validate_uuid;
use crate::models::models::NotificationKind;
use crate::notifications::notify;
use crate::posts::load_post;
use crate::AppState;

pub fn like_count(store: &Store, post_id: &str) -> anyhow::Result<usize> {
    Ok(store
        .get_json::<Vec<String>>(&likes_key(post_id))?
        .map(|likes| likes.len())
        .unwrap_or(0))
}

pub fn liked_by(store: &Store, post_id: &str, user_id: &str) -> anyhow::Result<bool> {
    Ok(store
        .get_json::<Vec<String>>(&likes_key(post_id))?
        .map(|likes| likes.iter().any(|id| id == user_id))
        .unwrap_or(false))
}

/// Flips the like of `user_id` on `post_id`. Returns the new state and count,
/// or `None` if the post is gone.
pub fn toggle_like(
    store: &Store,
    post_id: &str,
    user_id: &str,
) -> anyhow::Result<Option<(bool, usize)>> {
    store.transaction(|tx| {
        if !tx.exists(&post_key(post_id)) {
            return Ok(None);
        }

        let state = tx.update_json(&likes_key(post_id), |likes: &mut Vec<String>| {
            let liked = match likes.iter().position(|id| id == user_id) {
                Some(idx) => {
                    likes.remove(idx);
                    false
                }
                None => {
                    likes.push(user_id.to_string());
                    true
                }
            };
            (liked, likes.len())
        })?;
        Ok(Some(state))
    })
}

/// Authoritative like state, used by clients to confirm or roll back an optimistic toggle.
#[derive(Serialize, Debug)]
pub struct LikeState {
    pub post_id: String,
    pub liked: bool,
    pub like_count: usize,
}

pub async fn handle_toggle_like(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let post_id = path.into_inner();
    if !validate_uuid(&post_id) {
        return Err(ApiError::BadRequest("Post ID required".to_string()));
    }

    let store = &state.store;
    let post = load_post(store, &post_id)?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;

    let (liked, like_count) = toggle_like(store, &post_id, &user_id)?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;
    debug!("{user_id} {} post {post_id}", if liked { "liked" } else { "unliked" });

    if liked {
        notify(&state, &post.user_id, &user_id, NotificationKind::Like, Some(&post_id))?;
    }

    Ok(HttpResponse::Ok().json(LikeState {
        post_id,
        liked,
        like_count,
    }))
}
