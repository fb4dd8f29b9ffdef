use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::OnceLock;

use actix_web::{web, HttpRequest, HttpResponse};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::{issue_token, require_user, revoke_user_tokens, validate_token};
use crate::config::*;
use crate::core::db::Store;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::{char_len, hash_password, sanitize_text, validate_uuid, verify_password};
use crate::follow::{get_followers, get_followings};
use crate::models::models::User;
use crate::posts::{post_counts_by_user, post_view, user_posts};
use crate::AppState;

/// Usernames that would shadow top-level routes on `GET /{username}`.
const RESERVED_USERNAMES: &[&str] = &[
    "comments", "feed", "follow", "followers", "followings", "index.html", "login", "logout",
    "notifications", "posts", "profile", "profiles", "recommendations", "unfollow", "upload",
    "users",
];

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("Regex should compile"))
}

pub fn build_user_json(user: &User) -> serde_json::Value {
    serde_json::json!({
        "id": user.id,
        "username": user.username,
        "display_name": user.display_name,
        "bio": user.bio,
        "location": user.location,
        "website": user.website,
        "img": user.img,
        "cover": user.cover,
        "created_at": user.created_at,
    })
}

pub fn load_user(store: &Store, user_id: &str) -> anyhow::Result<Option<User>> {
    store.get_json::<User>(&user_key(user_id))
}

pub fn find_user_by_username(store: &Store, username: &str) -> anyhow::Result<Option<User>> {
    let names: HashMap<String, String> = store.get_json(USERNAMES_KEY)?.unwrap_or_default();
    match names.get(&username.to_ascii_lowercase()) {
        Some(id) => load_user(store, id),
        None => Ok(None),
    }
}

/// Reserves `username` (case-insensitively) for `user_id`. Returns `false` if taken.
pub fn claim_username(store: &Store, username: &str, user_id: &str) -> anyhow::Result<bool> {
    store.update_json(USERNAMES_KEY, |names: &mut HashMap<String, String>| {
        match names.entry(username.to_ascii_lowercase()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(user_id.to_string());
                true
            }
        }
    })
}

fn release_username(store: &Store, username: &str) -> anyhow::Result<()> {
    store.update_json(USERNAMES_KEY, |names: &mut HashMap<String, String>| {
        names.remove(&username.to_ascii_lowercase());
    })
}

fn validate_username(username: &str) -> ApiResult<()> {
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    let len = char_len(username);
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ApiError::BadRequest(format!(
            "Username must be {MIN_USERNAME_LENGTH}-{MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !username_regex().is_match(username) {
        return Err(ApiError::BadRequest(
            "Username may only contain letters, digits and underscores".to_string(),
        ));
    }
    if RESERVED_USERNAMES.contains(&username.to_ascii_lowercase().as_str()) {
        return Err(ApiError::Conflict("Username is reserved".to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.is_empty() {
        return Err(ApiError::BadRequest("Password is required".to_string()));
    }
    if char_len(password) < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Trims and sanitizes an optional text field. `Some("")` clears it.
fn clean_optional(value: &str, max: usize, field: &str) -> ApiResult<Option<String>> {
    let cleaned = sanitize_text(value.trim());
    if char_len(&cleaned) > max {
        return Err(ApiError::BadRequest(format!("{field} too long (max {max} chars)")));
    }
    Ok(if cleaned.is_empty() { None } else { Some(cleaned) })
}

fn clean_url(value: &str, field: &str) -> ApiResult<Option<String>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if !(value.starts_with("https://") || value.starts_with("http://")) {
        return Err(ApiError::BadRequest(format!("{field} must be an http(s) URL")));
    }
    Ok(Some(value.to_string()))
}

#[derive(Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

fn build_new_user(id: &str, username: &str, new_user: &NewUser) -> ApiResult<User> {
    let mut user = User::new(id.to_string(), username.to_string(), hash_password(&new_user.password)?);
    if let Some(name) = new_user.display_name.as_deref() {
        user.display_name = clean_optional(name, MAX_DISPLAY_NAME_LENGTH, "Display name")?;
    }
    user.email = new_user
        .email
        .as_deref()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    Ok(user)
}

pub async fn create_user(
    state: web::Data<AppState>,
    body: web::Json<NewUser>,
) -> ApiResult<HttpResponse> {
    let store = &state.store;
    let new_user = body.into_inner();

    let username = new_user.username.trim();
    validate_username(username)?;
    validate_password(&new_user.password)?;

    let id = Uuid::new_v4().to_string();
    if !claim_username(store, username, &id)? {
        return Err(ApiError::Conflict("Username exists".to_string()));
    }

    let user = match build_new_user(&id, username, &new_user) {
        Ok(user) => user,
        Err(e) => {
            release_username(store, username)?;
            return Err(e);
        }
    };

    store.transaction(|tx| {
        tx.set_json(&user_key(&id), &user)?;
        tx.update_json(USERS_LIST_KEY, |users: &mut Vec<String>| users.push(id.clone()))
    })?;
    info!("Created user {} ({})", user.username, id);

    Ok(HttpResponse::Created().json(build_user_json(&user)))
}

pub async fn get_profile(state: web::Data<AppState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let user = load_user(&state.store, &user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let mut body = build_user_json(&user);
    body["email"] = serde_json::json!(user.email);
    Ok(HttpResponse::Ok().json(body))
}

pub async fn get_user_details(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    if !validate_uuid(&user_id) {
        return Err(ApiError::BadRequest("User ID required".to_string()));
    }

    let user = load_user(&state.store, &user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(HttpResponse::Ok().json(build_user_json(&user)))
}

#[derive(Deserialize, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub img: Option<String>,
    pub cover: Option<String>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

pub async fn update_profile(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ProfileUpdate>,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let store = &state.store;
    let mut user = load_user(store, &user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let update = body.into_inner();

    if let Some(name) = update.display_name.as_deref() {
        user.display_name = clean_optional(name, MAX_DISPLAY_NAME_LENGTH, "Display name")?;
    }
    if let Some(bio) = update.bio.as_deref() {
        user.bio = clean_optional(bio, MAX_BIO_LENGTH, "Bio")?;
    }
    if let Some(location) = update.location.as_deref() {
        user.location = clean_optional(location, MAX_LOCATION_LENGTH, "Location")?;
    }
    if let Some(website) = update.website.as_deref() {
        if char_len(website) > MAX_WEBSITE_LENGTH {
            return Err(ApiError::BadRequest(format!(
                "Website too long (max {MAX_WEBSITE_LENGTH} chars)"
            )));
        }
        user.website = clean_url(website, "Website")?;
    }
    if let Some(img) = update.img.as_deref() {
        user.img = clean_url(img, "Profile image")?;
    }
    if let Some(cover) = update.cover.as_deref() {
        user.cover = clean_url(cover, "Cover image")?;
    }

    let mut password_changed = false;
    if let Some(new_password) = update.new_password.as_deref() {
        validate_password(new_password)?;
        let old_password = update
            .old_password
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("Current password required".to_string()))?;
        if !verify_password(old_password, &user.password) {
            return Err(ApiError::Unauthorized);
        }
        user.password = hash_password(new_password)?;
        password_changed = true;
    }

    store.set_json(&user_key(&user_id), &user)?;

    // A password change invalidates every session and hands back a fresh one
    let mut response_data = build_user_json(&user);
    if password_changed {
        let revoked = revoke_user_tokens(store, &user_id)?;
        info!("Password changed for {}, revoked {} tokens", user.username, revoked);
        response_data["token"] = serde_json::Value::String(issue_token(store, &user_id)?);
    }

    Ok(HttpResponse::Ok().json(response_data))
}

/// `GET /profiles/{username}`: user, counts, posts and follow status.
pub async fn get_profile_by_username(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let store = &state.store;
    let user = find_user_by_username(store, &path)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let viewer = validate_token(&state, &req);

    let followers = get_followers(store, &user.id)?;
    let followings = get_followings(store, &user.id)?;
    let posts = user_posts(store, &user.id)?;

    let mut views = Vec::with_capacity(posts.len());
    for post in posts {
        views.push(post_view(store, post, viewer.as_deref())?);
    }

    let mut body = build_user_json(&user);
    body["counts"] = serde_json::json!({
        "followers": followers.len(),
        "followings": followings.len(),
        "posts": views.len(),
    });
    body["is_following"] = serde_json::json!(viewer
        .as_ref()
        .map(|v| followers.contains(v))
        .unwrap_or(false));
    body["posts"] = serde_json::to_value(&views)?;

    Ok(HttpResponse::Ok().json(body))
}

#[derive(Serialize, Debug)]
pub struct Recommendation {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub img: Option<String>,
    pub follower_count: usize,
    pub post_count: usize,
    pub mutual_followers: Vec<String>,
}

/// Users the viewer does not follow yet, most followed first.
pub fn recommend_users(store: &Store, viewer_id: &str) -> anyhow::Result<Vec<Recommendation>> {
    let followings = get_followings(store, viewer_id)?;
    let post_counts = post_counts_by_user(store)?;
    let users: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();

    let mut candidates = Vec::new();
    for id in users {
        if id == viewer_id || followings.contains(&id) {
            continue;
        }
        let Some(user) = load_user(store, &id)? else {
            continue;
        };

        let followers = get_followers(store, &id)?;
        let mut mutual_followers = Vec::new();
        for follower_id in followers.iter().filter(|f| followings.contains(f)) {
            if let Some(follower) = load_user(store, follower_id)? {
                mutual_followers.push(follower.shown_name().to_string());
            }
        }

        candidates.push(Recommendation {
            post_count: post_counts.get(&id).copied().unwrap_or(0),
            follower_count: followers.len(),
            id,
            username: user.username,
            display_name: user.display_name,
            img: user.img,
            mutual_followers,
        });
    }

    candidates.sort_by(|a, b| {
        b.follower_count
            .cmp(&a.follower_count)
            .then(b.post_count.cmp(&a.post_count))
            .then_with(|| a.username.cmp(&b.username))
    });
    candidates.truncate(RECOMMENDATION_COUNT);
    Ok(candidates)
}

pub async fn get_recommendations(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;
    let recommendations = recommend_users(&state.store, &user_id)?;
    Ok(HttpResponse::Ok().json(recommendations))
}
