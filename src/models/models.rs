use serde::{Deserialize, Serialize};

use crate::core::helpers::now_iso;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub img: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    pub created_at: String,
}

impl User {
    pub fn new(id: String, username: String, password: String) -> Self {
        Self {
            id,
            username,
            password,
            email: None,
            display_name: None,
            bio: None,
            location: None,
            website: None,
            img: None,
            cover: None,
            created_at: now_iso(),
        }
    }

    /// Name shown to other users: display name, else username.
    pub fn shown_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// Public part of a user, embedded in posts and comments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub img: Option<String>,
}

impl From<&User> for Author {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            img: user.img.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub desc: String,
    #[serde(default)]
    pub img: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub is_sensitive: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub desc: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize)]
pub struct TokenData {
    pub user_id: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub actor_id: String,
    pub post_id: Option<String>,
    pub created_at: String,
    pub read: bool,
}

// === Response views ===

#[derive(Serialize, Clone, Debug)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub user: Option<Author>,
    pub like_count: usize,
    pub comment_count: usize,
    pub is_liked: bool,
}

#[derive(Serialize, Clone, Debug)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub user: Option<Author>,
}

#[derive(Serialize, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_next_page: bool,
}

pub type Followings = Vec<String>;
pub type Followers = Vec<String>;
