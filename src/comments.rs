use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::auth::require_user;
use crate::config::*;
use crate::core::db::{Store, Txn};
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::{char_len, now_iso, sanitize_text, validate_uuid};
use crate::models::models::{Author, Comment, CommentView, NotificationKind};
use crate::notifications::notify;
use crate::posts::load_post;
use crate::users::load_user;
use crate::AppState;

/// Comments on a post, newest first.
pub fn post_comments(store: &Store, post_id: &str) -> anyhow::Result<Vec<Comment>> {
    let ids: Vec<String> = store.get_json(&post_comments_key(post_id))?.unwrap_or_default();
    let mut comments = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(c) = store.get_json::<Comment>(&comment_key(&id))? {
            comments.push(c);
        }
    }
    Ok(comments)
}

pub fn comment_views(store: &Store, post_id: &str) -> anyhow::Result<Vec<CommentView>> {
    let mut views = Vec::new();
    for comment in post_comments(store, post_id)? {
        let user = load_user(store, &comment.user_id)?.as_ref().map(Author::from);
        views.push(CommentView { comment, user });
    }
    Ok(views)
}

/// Removes every comment of `post_id`. Runs inside the post's delete transaction.
pub fn delete_post_comments(tx: &mut Txn<'_>, post_id: &str) -> anyhow::Result<()> {
    let ids: Vec<String> = tx.get_json(&post_comments_key(post_id))?.unwrap_or_default();
    for id in ids {
        tx.delete(&comment_key(&id));
    }
    tx.delete(&post_comments_key(post_id));
    Ok(())
}

#[derive(Deserialize)]
pub struct NewComment {
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub desc: String,
}

pub async fn create_comment(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NewComment>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let store = &state.store;

    if body.post_id.is_empty() || !validate_uuid(&body.post_id) {
        return Err(ApiError::BadRequest("Post ID and description are required".to_string()));
    }
    let desc = sanitize_text(body.desc.trim());
    if desc.is_empty() {
        return Err(ApiError::BadRequest("Comment is required".to_string()));
    }
    if char_len(&desc) > MAX_COMMENT_LENGTH {
        return Err(ApiError::BadRequest("Comment is too long".to_string()));
    }

    let post = load_post(store, &body.post_id)?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;

    let comment = Comment {
        id: Uuid::new_v4().to_string(),
        post_id: post.id.clone(),
        user_id: user_id.clone(),
        desc,
        created_at: now_iso(),
    };
    let stored = store.transaction(|tx| {
        // The post may have been deleted since it was loaded
        if !tx.exists(&post_key(&post.id)) {
            return Ok(false);
        }
        tx.set_json(&comment_key(&comment.id), &comment)?;
        tx.update_json(&post_comments_key(&post.id), |ids: &mut Vec<String>| {
            ids.insert(0, comment.id.clone())
        })?;
        Ok(true)
    })?;
    if !stored {
        return Err(ApiError::NotFound("Post not found".to_string()));
    }
    debug!("{user_id} commented on {}", post.id);

    notify(&state, &post.user_id, &user_id, NotificationKind::Comment, Some(&post.id))?;

    let user = load_user(store, &user_id)?.as_ref().map(Author::from);
    Ok(HttpResponse::Created().json(CommentView { comment, user }))
}

pub async fn list_comments(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    if !validate_uuid(&post_id) {
        return Err(ApiError::BadRequest("Post ID required".to_string()));
    }
    if load_post(&state.store, &post_id)?.is_none() {
        return Err(ApiError::NotFound("Post not found".to_string()));
    }

    Ok(HttpResponse::Ok().json(comment_views(&state.store, &post_id)?))
}
