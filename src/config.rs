use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use tracing::{info, warn};

// === Limits ===
pub const MAX_POST_LENGTH: usize = 280;
pub const MAX_COMMENT_LENGTH: usize = 280;
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_BIO_LENGTH: usize = 160;
pub const MAX_DISPLAY_NAME_LENGTH: usize = 50;
pub const MAX_LOCATION_LENGTH: usize = 30;
pub const MAX_WEBSITE_LENGTH: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 50;
pub const MAX_NOTIFICATIONS: usize = 100;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const RECOMMENDATION_COUNT: usize = 5;

pub const DEFAULT_MEDIA_UPLOAD_URL: &str = "https://upload.imagekit.io/api/v1/files/upload";

// === KV keys ===
pub const USERS_LIST_KEY: &str = "users_list";
pub const TIMELINE_KEY: &str = "timeline";
pub const TOKENS_LIST_KEY: &str = "tokens_list";
/// Lowercased username -> user id.
pub const USERNAMES_KEY: &str = "usernames";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

pub fn followings_key(id: &str) -> String {
    format!("followings:{}", id)
}

pub fn followers_key(id: &str) -> String {
    format!("followers:{}", id)
}

pub fn likes_key(post_id: &str) -> String {
    format!("likes:{}", post_id)
}

pub fn comment_key(id: &str) -> String {
    format!("comment:{}", id)
}

pub fn post_comments_key(post_id: &str) -> String {
    format!("comments:{}", post_id)
}

pub fn notifications_key(user_id: &str) -> String {
    format!("notifications:{}", user_id)
}

// === Runtime configuration ===
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub token_expiration_hours: i64,
    pub data_file: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
    pub seed_demo: bool,
    pub media: MediaConfig,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub upload_url: String,
    pub private_key: Option<String>,
    pub folder: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            token_expiration_hours: 24,
            data_file: None,
            snapshot_interval_secs: 30,
            seed_demo: false,
            media: MediaConfig {
                upload_url: DEFAULT_MEDIA_UPLOAD_URL.to_string(),
                private_key: None,
                folder: "/posts".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self {
            bind: try_load("CHIRP_BIND", "0.0.0.0:8080".to_string()),
            token_expiration_hours: try_load("CHIRP_TOKEN_EXPIRATION_HOURS", 24),
            data_file: optional("CHIRP_DATA_FILE").map(PathBuf::from),
            snapshot_interval_secs: try_load("CHIRP_SNAPSHOT_INTERVAL_SECS", 30),
            seed_demo: try_load("CHIRP_SEED_DEMO", false),
            media: MediaConfig {
                upload_url: try_load("CHIRP_MEDIA_UPLOAD_URL", DEFAULT_MEDIA_UPLOAD_URL.to_string()),
                private_key: optional("CHIRP_MEDIA_PRIVATE_KEY"),
                folder: try_load("CHIRP_MEDIA_FOLDER", "/posts".to_string()),
            },
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    parse_or_default(key, optional(key), default)
}

fn parse_or_default<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = raw else {
        info!("{key} not set, using default: {default}");
        return default;
    };

    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }
    }
}
