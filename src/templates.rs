use std::collections::HashMap;
use std::sync::OnceLock;

use actix_web::HttpResponse;
use html_escape::encode_text;
use regex::{Captures, Regex};

use crate::core::db::Store;
use crate::core::errors::{ApiError, ApiResult};
use crate::follow::{get_followers, get_followings};
use crate::posts::user_posts;
use crate::static_server::Assets;
use crate::users::find_user_by_username;

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"PROFILE_[A-Z_]+").expect("Regex should compile"))
}

/// Substitutes every known `PROFILE_*` marker in one pass, so inserted
/// values are never scanned again. Unknown markers are left as they are.
fn fill_placeholders(template: &str, values: &HashMap<&str, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| match values.get(&caps[0]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn render_user_profile(store: &Store, username: &str) -> ApiResult<HttpResponse> {
    let user = find_user_by_username(store, username)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let template = Assets::get("profile.html")
        .ok_or_else(|| anyhow::anyhow!("Profile template not found"))?
        .data
        .into_owned();
    let template = String::from_utf8(template).map_err(anyhow::Error::from)?;

    let followers = get_followers(store, &user.id)?.len();
    let followings = get_followings(store, &user.id)?.len();
    let posts = user_posts(store, &user.id)?.len();

    let bio_section = user
        .bio
        .as_ref()
        .map(|bio| {
            format!(
                r#"<div class="profile-field">
                <div class="profile-field-label">Bio</div>
                <div class="profile-field-value">{}</div>
            </div>"#,
                encode_text(bio)
            )
        })
        .unwrap_or_default();

    let values: HashMap<&str, String> = HashMap::from([
        ("PROFILE_DISPLAY_NAME", encode_text(user.shown_name()).into_owned()),
        ("PROFILE_USERNAME", encode_text(&user.username).into_owned()),
        ("PROFILE_USER_ID", encode_text(&user.id).into_owned()),
        ("PROFILE_FOLLOWERS", followers.to_string()),
        ("PROFILE_FOLLOWINGS", followings.to_string()),
        ("PROFILE_POSTS", posts.to_string()),
        ("PROFILE_BIO", bio_section),
    ]);
    let html = fill_placeholders(&template, &values);

    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html))
}
