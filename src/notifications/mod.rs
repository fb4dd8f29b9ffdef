pub mod hub;

use std::convert::Infallible;
use std::time::Duration;

use actix_web::{web, HttpRequest, HttpResponse};
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::require_user;
use crate::config::{notifications_key, MAX_NOTIFICATIONS};
use crate::core::db::Store;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::now_iso;
use crate::models::models::{Notification, NotificationKind};
use crate::users::load_user;
use crate::AppState;

pub use hub::NotificationHub;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

pub fn notification_message(kind: NotificationKind, actor: &str) -> String {
    match kind {
        NotificationKind::Like => format!("{actor} liked your post"),
        NotificationKind::Comment => format!("{actor} commented on your post"),
        NotificationKind::Follow => format!("{actor} started following you"),
    }
}

/// Stores a notification for `recipient_id` and pushes it to their live streams.
///
/// Acting on your own content notifies nobody.
pub fn notify(
    state: &AppState,
    recipient_id: &str,
    actor_id: &str,
    kind: NotificationKind,
    post_id: Option<&str>,
) -> anyhow::Result<Option<Notification>> {
    if recipient_id == actor_id {
        return Ok(None);
    }

    let actor_name = load_user(&state.store, actor_id)?
        .map(|u| u.shown_name().to_string())
        .unwrap_or_else(|| "Someone".to_string());

    let notification = Notification {
        id: Uuid::new_v4().to_string(),
        user_id: recipient_id.to_string(),
        kind,
        message: notification_message(kind, &actor_name),
        actor_id: actor_id.to_string(),
        post_id: post_id.map(str::to_string),
        created_at: now_iso(),
        read: false,
    };

    state
        .store
        .update_json(&notifications_key(recipient_id), |items: &mut Vec<Notification>| {
            items.insert(0, notification.clone());
            items.truncate(MAX_NOTIFICATIONS);
        })?;

    let delivered = state.hub.publish(recipient_id, notification.clone());
    debug!("Notification {:?} for {recipient_id} reached {delivered} streams", kind);

    Ok(Some(notification))
}

pub fn user_notifications(store: &Store, user_id: &str) -> anyhow::Result<Vec<Notification>> {
    Ok(store.get_json(&notifications_key(user_id))?.unwrap_or_default())
}

// === HTTP Handlers ===

pub async fn list_notifications(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let items = user_notifications(&state.store, &user_id)?;
    let unread_count = items.iter().filter(|n| !n.read).count();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "items": items,
        "unread_count": unread_count,
    })))
}

pub async fn mark_read(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let id = path.into_inner();

    let found = state
        .store
        .update_json(&notifications_key(&user_id), |items: &mut Vec<Notification>| {
            match items.iter_mut().find(|n| n.id == id) {
                Some(n) => {
                    n.read = true;
                    true
                }
                None => false,
            }
        })?;

    if !found {
        return Err(ApiError::NotFound("Notification not found".to_string()));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "read"})))
}

pub async fn mark_all_read(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;

    let updated = state
        .store
        .update_json(&notifications_key(&user_id), |items: &mut Vec<Notification>| {
            let mut updated = 0;
            for n in items.iter_mut().filter(|n| !n.read) {
                n.read = true;
                updated += 1;
            }
            updated
        })?;

    Ok(HttpResponse::Ok().json(serde_json::json!({"updated": updated})))
}

pub async fn clear_notifications(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    state.store.delete(&notifications_key(&user_id))?;
    Ok(HttpResponse::NoContent().finish())
}

fn sse_frame(notification: &Notification) -> String {
    match serde_json::to_string(notification) {
        Ok(json) => format!("event: notification\ndata: {json}\n\n"),
        Err(e) => {
            warn!("Dropping unserializable notification {}: {e}", notification.id);
            String::new()
        }
    }
}

/// `GET /notifications/stream`: Server-Sent Events for the caller's room.
pub async fn stream_notifications(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let rx = state.hub.subscribe(&user_id);
    info!("Notification stream opened for {user_id} ({} rooms)", state.hub.room_count());

    let events = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(notification) => return Some((sse_frame(&notification), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notification stream lagged, skipped {skipped}");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let pings = stream::unfold(tokio::time::interval(KEEP_ALIVE), |mut interval| async move {
        interval.tick().await;
        Some((": ping\n\n".to_string(), interval))
    });

    let body = stream::select(events, pings)
        .filter(|frame| futures::future::ready(!frame.is_empty()))
        .map(|frame| Ok::<_, Infallible>(web::Bytes::from(frame)));

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}
