use std::collections::HashMap;
use std::sync::OnceLock;

use actix_web::{web, HttpRequest, HttpResponse};
use ammonia::Builder;
use html_escape::encode_double_quoted_attribute;
use regex::Regex;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::{require_user, validate_token};
use crate::comments::{comment_views, delete_post_comments, post_comments};
use crate::config::*;
use crate::core::db::Store;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::{char_len, now_iso, sanitize_text, validate_uuid};
use crate::core::query_params::{get_bool_flag, get_page, get_string, parse_query_params, PageRequest};
use crate::follow::get_followings;
use crate::likes::{like_count, liked_by};
use crate::models::models::{Author, Page, Post, PostView};
use crate::users::{find_user_by_username, load_user};
use crate::AppState;

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"https?://[^\s<]+").expect("Regex should compile"))
}

pub fn filter_post_content(content: &str) -> String {
    // Sanitize HTML to remove dangerous scripts and event handlers
    let clean = Builder::default()
        .link_rel(Some("noopener noreferrer"))
        .clean(content)
        .to_string();

    // Convert HTTP/HTTPS URLs into clickable links with proper escaping
    url_regex()
        .replace_all(&clean, |caps: &regex::Captures| {
            let url = &caps[0];
            let escaped_url = encode_double_quoted_attribute(url);
            format!(r#"<a href="{}" target="_blank">{}</a>"#, escaped_url, url)
        })
        .to_string()
}

/// Checks length on the trimmed input, then filters it. Markup that leaves
/// no visible text is rejected.
fn clean_desc(desc: &str) -> ApiResult<String> {
    let desc = desc.trim();
    if desc.is_empty() {
        return Err(ApiError::BadRequest("Post content is required".to_string()));
    }
    if char_len(desc) > MAX_POST_LENGTH {
        return Err(ApiError::BadRequest("Post is too long".to_string()));
    }

    let filtered = filter_post_content(desc);
    if sanitize_text(&filtered).trim().is_empty() {
        return Err(ApiError::BadRequest("Post content is required".to_string()));
    }
    Ok(filtered)
}

fn validate_media_url(url: Option<&str>, field: &str) -> ApiResult<Option<String>> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        None => Ok(None),
        Some(u) if u.starts_with("https://") || u.starts_with("http://") => Ok(Some(u.to_string())),
        Some(_) => Err(ApiError::BadRequest(format!("{field} must be an http(s) URL"))),
    }
}

// === Store access ===

pub fn load_post(store: &Store, post_id: &str) -> anyhow::Result<Option<Post>> {
    store.get_json(&post_key(post_id))
}

/// All posts, newest first.
pub fn timeline_posts(store: &Store) -> anyhow::Result<Vec<Post>> {
    let timeline: Vec<String> = store.get_json(TIMELINE_KEY)?.unwrap_or_default();
    let mut posts = Vec::with_capacity(timeline.len());
    for id in timeline {
        if let Some(p) = load_post(store, &id)? {
            posts.push(p);
        }
    }
    Ok(posts)
}

pub fn user_posts(store: &Store, user_id: &str) -> anyhow::Result<Vec<Post>> {
    Ok(timeline_posts(store)?
        .into_iter()
        .filter(|p| p.user_id == user_id)
        .collect())
}

pub fn post_counts_by_user(store: &Store) -> anyhow::Result<HashMap<String, usize>> {
    let mut counts = HashMap::new();
    for post in timeline_posts(store)? {
        *counts.entry(post.user_id).or_insert(0) += 1;
    }
    Ok(counts)
}

pub fn post_view(store: &Store, post: Post, viewer: Option<&str>) -> anyhow::Result<PostView> {
    let user = load_user(store, &post.user_id)?.as_ref().map(Author::from);
    let like_count = like_count(store, &post.id)?;
    let comment_count = post_comments(store, &post.id)?.len();
    let is_liked = match viewer {
        Some(viewer) => liked_by(store, &post.id, viewer)?,
        None => false,
    };

    Ok(PostView {
        post,
        user,
        like_count,
        comment_count,
        is_liked,
    })
}

/// Cuts one page out of a newest-first list. The cursor is the id of the
/// last item the client has seen.
pub fn paginate(posts: Vec<Post>, page: &PageRequest) -> ApiResult<Page<Post>> {
    let start = match page.cursor.as_deref() {
        Some(cursor) => {
            posts
                .iter()
                .position(|p| p.id == cursor)
                .ok_or_else(|| ApiError::BadRequest("Invalid cursor".to_string()))?
                + 1
        }
        None => 0,
    };

    let mut items: Vec<Post> = posts.into_iter().skip(start).take(page.limit + 1).collect();
    let has_next_page = items.len() > page.limit;
    items.truncate(page.limit);
    let next_cursor = if has_next_page {
        items.last().map(|p| p.id.clone())
    } else {
        None
    };

    Ok(Page {
        items,
        next_cursor,
        has_next_page,
    })
}

fn view_page(store: &Store, page: Page<Post>, viewer: Option<&str>) -> anyhow::Result<Page<PostView>> {
    let mut items = Vec::with_capacity(page.items.len());
    for post in page.items {
        items.push(post_view(store, post, viewer)?);
    }
    Ok(Page {
        items,
        next_cursor: page.next_cursor,
        has_next_page: page.has_next_page,
    })
}

fn owned_post(store: &Store, post_id: &str, user_id: &str) -> ApiResult<Post> {
    if !validate_uuid(post_id) {
        return Err(ApiError::BadRequest("Post ID required".to_string()));
    }
    let post = load_post(store, post_id)?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;
    if post.user_id != user_id {
        return Err(ApiError::Forbidden);
    }
    Ok(post)
}

// === HTTP Handlers ===

#[derive(Deserialize)]
pub struct NewPost {
    #[serde(default)]
    pub desc: String,
    pub img: Option<String>,
    pub video: Option<String>,
    #[serde(default)]
    pub is_sensitive: bool,
}

pub async fn create_post(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NewPost>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let store = &state.store;

    let desc = clean_desc(&body.desc)?;
    let img = validate_media_url(body.img.as_deref(), "Image")?;
    let video = validate_media_url(body.video.as_deref(), "Video")?;
    if img.is_some() && video.is_some() {
        return Err(ApiError::BadRequest(
            "A post can carry an image or a video, not both".to_string(),
        ));
    }

    let post = Post {
        id: Uuid::new_v4().to_string(),
        user_id,
        desc,
        img,
        video,
        is_sensitive: body.is_sensitive,
        created_at: now_iso(),
        updated_at: None,
    };

    store.set_json(&post_key(&post.id), &post)?;
    // prepend newest
    store.update_json(TIMELINE_KEY, |timeline: &mut Vec<String>| {
        timeline.insert(0, post.id.clone())
    })?;
    info!("User {} created post {}", post.user_id, post.id);

    let viewer = post.user_id.clone();
    let view = post_view(store, post, Some(&viewer))?;
    Ok(HttpResponse::Created().json(view))
}

/// `GET /posts`: own posts by default, `?user=<name>` or `?all=true` publicly.
pub async fn list_posts(state: web::Data<AppState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let store = &state.store;
    let params = parse_query_params(req.query_string());
    let page = get_page(&params);
    let viewer = validate_token(&state, &req);

    let posts = if let Some(username) = get_string(&params, "user") {
        match find_user_by_username(store, &username)? {
            Some(user) => user_posts(store, &user.id)?,
            None => Vec::new(),
        }
    } else if get_bool_flag(&params, "all") {
        timeline_posts(store)?
    } else {
        let user_id = viewer.as_deref().ok_or(ApiError::Unauthorized)?;
        user_posts(store, user_id)?
    };

    let page = paginate(posts, &page)?;
    Ok(HttpResponse::Ok().json(view_page(store, page, viewer.as_deref())?))
}

pub async fn get_post(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    if !validate_uuid(&post_id) {
        return Err(ApiError::BadRequest("Post ID required".to_string()));
    }

    let store = &state.store;
    let viewer = validate_token(&state, &req);
    let post = load_post(store, &post_id)?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;

    let comments = comment_views(store, &post_id)?;
    let mut body = serde_json::to_value(post_view(store, post, viewer.as_deref())?)?;
    body["comments"] = serde_json::to_value(comments)?;
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Deserialize)]
pub struct EditPost {
    #[serde(default)]
    pub desc: String,
}

pub async fn edit_post(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<EditPost>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let store = &state.store;
    let mut post = owned_post(store, &path, &user_id)?;

    let filtered = clean_desc(&body.desc)?;

    // Skip update if content didn't change
    if post.desc != filtered {
        post.desc = filtered;
        post.updated_at = Some(now_iso());
        store.set_json(&post_key(&post.id), &post)?;
    }

    Ok(HttpResponse::Ok().json(post_view(store, post, Some(&user_id))?))
}

pub async fn delete_post(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let store = &state.store;
    let post = owned_post(store, &path, &user_id)?;

    store.transaction(|tx| {
        tx.delete(&post_key(&post.id));
        tx.update_json(TIMELINE_KEY, |timeline: &mut Vec<String>| {
            timeline.retain(|id| *id != post.id)
        })?;
        tx.delete(&likes_key(&post.id));
        delete_post_comments(tx, &post.id)
    })?;
    info!("User {} deleted post {}", user_id, post.id);

    Ok(HttpResponse::NoContent().finish())
}

/// Posts from the caller and everyone they follow, newest first.
pub async fn get_feed(state: web::Data<AppState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let store = &state.store;
    let page = get_page(&parse_query_params(req.query_string()));

    let followings = get_followings(store, &user_id)?;
    let posts: Vec<Post> = timeline_posts(store)?
        .into_iter()
        .filter(|p| p.user_id == user_id || followings.contains(&p.user_id))
        .collect();

    let page = paginate(posts, &page)?;
    Ok(HttpResponse::Ok().json(view_page(store, page, Some(&user_id))?))
}
