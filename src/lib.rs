pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod follow;
pub mod likes;
pub mod media;
pub mod models;
pub mod notifications;
pub mod posts;
pub mod static_server;
pub mod templates;
pub mod users;

use std::sync::Arc;

use actix_web::web;

use crate::config::Config;
use crate::core::db::Store;
use crate::core::errors::ApiError;
use crate::media::{ImageKitHost, MediaHost};
use crate::notifications::NotificationHub;

/// Shared state handed to every handler through `web::Data`.
pub struct AppState {
    pub store: Store,
    pub hub: NotificationHub,
    pub media: Option<Arc<dyn MediaHost>>,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> Self {
        let media = ImageKitHost::from_config(&config.media)
            .map(|host| Arc::new(host) as Arc<dyn MediaHost>);

        Self {
            store,
            hub: NotificationHub::default(),
            media,
            config,
        }
    }

    pub fn with_media_host(mut self, host: Arc<dyn MediaHost>) -> Self {
        self.media = Some(host);
        self
    }
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(format!("Invalid JSON: {err}")).into())
}

/// Registers every route. Expects `web::Data<AppState>` in app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        // accounts
        .route("/users", web::post().to(users::create_user))
        .route("/users/{id}", web::get().to(users::get_user_details))
        .route("/login", web::post().to(auth::login_user))
        .route("/logout", web::post().to(auth::logout_user))
        .route("/profile", web::get().to(users::get_profile))
        .route("/profile", web::put().to(users::update_profile))
        .route("/profiles/{username}", web::get().to(users::get_profile_by_username))
        .route("/recommendations", web::get().to(users::get_recommendations))
        // posts
        .route("/posts", web::post().to(posts::create_post))
        .route("/posts", web::get().to(posts::list_posts))
        .route("/posts/{id}", web::get().to(posts::get_post))
        .route("/posts/{id}", web::put().to(posts::edit_post))
        .route("/posts/{id}", web::delete().to(posts::delete_post))
        .route("/posts/{id}/like", web::post().to(likes::handle_toggle_like))
        .route("/posts/{id}/comments", web::get().to(comments::list_comments))
        .route("/comments", web::post().to(comments::create_comment))
        .route("/feed", web::get().to(posts::get_feed))
        // follows
        .route("/follow", web::post().to(follow::handle_follow))
        .route("/unfollow", web::post().to(follow::handle_unfollow))
        .route("/followings/{id}", web::get().to(follow::get_followings_list))
        .route("/followers/{id}", web::get().to(follow::get_followers_list))
        // notifications
        .route("/notifications", web::get().to(notifications::list_notifications))
        .route("/notifications", web::delete().to(notifications::clear_notifications))
        .route("/notifications/stream", web::get().to(notifications::stream_notifications))
        .route("/notifications/read-all", web::post().to(notifications::mark_all_read))
        .route("/notifications/{id}/read", web::post().to(notifications::mark_read))
        // media
        .route("/upload", web::post().to(media::upload_media))
        // pages
        .route("/", web::get().to(static_server::index))
        .route("/{name}", web::get().to(static_server::page_or_asset));
}
