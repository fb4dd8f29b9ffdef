use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use actix_web::body::MessageBody;
use actix_web::http::StatusCode;
use actix_web::test::{self, TestRequest};
use actix_web::{web, App};
use async_trait::async_trait;
use serde_json::{json, Value};

use chirp::config::Config;
use chirp::core::db::Store;
use chirp::media::{MediaFile, MediaHost, UploadedMedia};
use chirp::AppState;

macro_rules! send {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        let value: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, value)
    }};
}

/// Creates an account (password "secret") and logs in. Yields `(user_id, token)`.
macro_rules! signup {
    ($app:expr, $name:expr) => {{
        let (status, user) = send!(
            $app,
            TestRequest::post()
                .uri("/users")
                .set_json(json!({"username": $name, "password": "secret"}))
        );
        assert_eq!(status, StatusCode::CREATED, "create user failed: {user}");
        let (status, login) = send!(
            $app,
            TestRequest::post()
                .uri("/login")
                .set_json(json!({"username": $name, "password": "secret"}))
        );
        assert_eq!(status, StatusCode::OK, "login failed: {login}");
        (
            user["id"].as_str().unwrap().to_string(),
            login["token"].as_str().unwrap().to_string(),
        )
    }};
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

fn state_with(config: Config) -> web::Data<AppState> {
    web::Data::new(AppState::new(Store::in_memory(), config))
}

fn state() -> web::Data<AppState> {
    state_with(Config::default())
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(chirp::configure)).await
    };
}

macro_rules! post_as {
    ($app:expr, $token:expr, $desc:expr) => {{
        let (status, post) = send!(
            $app,
            TestRequest::post()
                .uri("/posts")
                .insert_header(bearer(&$token))
                .set_json(json!({"desc": $desc}))
        );
        assert_eq!(status, StatusCode::CREATED, "create post failed: {post}");
        post["id"].as_str().unwrap().to_string()
    }};
}

#[actix_web::test]
async fn test_full_user_flow() {
    let state = state();
    let app = app!(state);
    let (user_id, token) = signup!(app, "flow_user");

    let (status, post) = send!(
        app,
        TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&token))
            .set_json(json!({"desc": "Test post from integration test!"}))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(post["desc"], "Test post from integration test!");
    assert_eq!(post["user_id"], user_id.as_str());
    assert_eq!(post["user"]["username"], "flow_user");
    assert_eq!(post["like_count"], 0);
    assert!(post["updated_at"].is_null());
    let post_id = post["id"].as_str().unwrap().to_string();

    let (status, edited) = send!(
        app,
        TestRequest::put()
            .uri(&format!("/posts/{post_id}"))
            .insert_header(bearer(&token))
            .set_json(json!({"desc": "Updated content from integration test!"}))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["desc"], "Updated content from integration test!");
    assert!(edited["updated_at"].is_string(), "updated_at should be set after edit");

    let (status, fetched) = send!(app, TestRequest::get().uri(&format!("/posts/{post_id}")));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["comments"], json!([]));

    let (status, _) = send!(
        app,
        TestRequest::delete()
            .uri(&format!("/posts/{post_id}"))
            .insert_header(bearer(&token))
    );
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send!(app, TestRequest::get().uri(&format!("/posts/{post_id}")));
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send!(app, TestRequest::post().uri("/logout").insert_header(bearer(&token)));
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send!(app, TestRequest::get().uri("/profile").insert_header(bearer(&token)));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_post_content_validation() {
    let state = state();
    let app = app!(state);
    let (_, token) = signup!(app, "validation_user");

    let cases = [
        json!({"desc": ""}),
        json!({"desc": "   "}),
        json!({"desc": "a".repeat(281)}),
        json!({"desc": "<script>alert(1)</script>"}),
        json!({"desc": "<b>  </b>"}),
        json!({"desc": "two attachments", "img": "https://cdn.example/a.png", "video": "https://cdn.example/a.mp4"}),
        json!({"desc": "bad attachment", "img": "javascript:alert(1)"}),
    ];
    for body in cases {
        let (status, err) = send!(
            app,
            TestRequest::post()
                .uri("/posts")
                .insert_header(bearer(&token))
                .set_json(&body)
        );
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {body}");
        assert!(err["error"].is_string());
    }

    let (status, post) = send!(
        app,
        TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&token))
            .set_json(json!({"desc": "a".repeat(280), "img": "https://cdn.example/a.png", "is_sensitive": true}))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(post["img"], "https://cdn.example/a.png");
    assert_eq!(post["is_sensitive"], true);

    let post_id = post["id"].as_str().unwrap();
    let (status, _) = send!(
        app,
        TestRequest::put()
            .uri(&format!("/posts/{post_id}"))
            .insert_header(bearer(&token))
            .set_json(json!({"desc": "<script>alert(1)</script>"}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stored) = send!(app, TestRequest::get().uri(&format!("/posts/{post_id}")));
    assert_eq!(stored["desc"], "a".repeat(280));
}

#[actix_web::test]
async fn test_malformed_json_is_a_bad_request() {
    let state = state();
    let app = app!(state);

    let (status, err) = send!(
        app,
        TestRequest::post()
            .uri("/login")
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().starts_with("Invalid JSON"));
}

#[actix_web::test]
async fn test_login_invalid_credentials() {
    let state = state();
    let app = app!(state);
    signup!(app, "real_user");

    for (username, password) in [("nonexistent_user", "wrongpass"), ("real_user", "wrongpass")] {
        let (status, _) = send!(
            app,
            TestRequest::post()
                .uri("/login")
                .set_json(json!({"username": username, "password": password}))
        );
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[actix_web::test]
async fn test_create_post_requires_auth() {
    let state = state();
    let app = app!(state);

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/posts")
            .set_json(json!({"desc": "Test post without auth"}))
    );
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/posts")
            .insert_header(bearer("not-a-token"))
            .set_json(json!({"desc": "Test post with junk token"}))
    );
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_expired_tokens_are_rejected() {
    let state = state_with(Config {
        token_expiration_hours: 0,
        ..Config::default()
    });
    let app = app!(state);
    let (_, token) = signup!(app, "short_lived");

    let (status, _) = send!(app, TestRequest::get().uri("/profile").insert_header(bearer(&token)));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_username_rules() {
    let state = state();
    let app = app!(state);
    signup!(app, "Taken_Name");

    let cases = [
        ("taken_name", StatusCode::CONFLICT),
        ("feed", StatusCode::CONFLICT),
        ("ab", StatusCode::BAD_REQUEST),
        ("has space", StatusCode::BAD_REQUEST),
        ("<b>bold</b>", StatusCode::BAD_REQUEST),
    ];
    for (username, expected) in cases {
        let (status, _) = send!(
            app,
            TestRequest::post()
                .uri("/users")
                .set_json(json!({"username": username, "password": "secret"}))
        );
        assert_eq!(status, expected, "username {username:?}");
    }

    let (status, created) = send!(
        app,
        TestRequest::post()
            .uri("/users")
            .set_json(json!({"username": "no_hash_leak", "password": "secret"}))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert!(created.get("password").is_none());
}

#[actix_web::test]
async fn test_like_toggle_and_notification() {
    let state = state();
    let app = app!(state);
    let (_, alice) = signup!(app, "alice");
    let (_, bob) = signup!(app, "bob");
    let post_id = post_as!(app, alice, "like me");

    let (status, like) = send!(
        app,
        TestRequest::post()
            .uri(&format!("/posts/{post_id}/like"))
            .insert_header(bearer(&bob))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(like, json!({"post_id": post_id, "liked": true, "like_count": 1}));

    let (_, view) = send!(
        app,
        TestRequest::get()
            .uri(&format!("/posts/{post_id}"))
            .insert_header(bearer(&bob))
    );
    assert_eq!(view["is_liked"], true);
    assert_eq!(view["like_count"], 1);

    let (_, unlike) = send!(
        app,
        TestRequest::post()
            .uri(&format!("/posts/{post_id}/like"))
            .insert_header(bearer(&bob))
    );
    assert_eq!(unlike["liked"], false);
    assert_eq!(unlike["like_count"], 0);

    // Liking your own post notifies nobody
    send!(
        app,
        TestRequest::post()
            .uri(&format!("/posts/{post_id}/like"))
            .insert_header(bearer(&alice))
    );

    let (_, inbox) = send!(app, TestRequest::get().uri("/notifications").insert_header(bearer(&alice)));
    let items = inbox["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["type"], "like");
    assert_eq!(items[0]["message"], "bob liked your post");
    assert_eq!(items[0]["post_id"], post_id.as_str());
    assert_eq!(inbox["unread_count"], 1);

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/posts/00000000-0000-0000-0000-000000000000/like")
            .insert_header(bearer(&bob))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_comments() {
    let state = state();
    let app = app!(state);
    let (_, alice) = signup!(app, "alice");
    let (_, bob) = signup!(app, "bob");
    let post_id = post_as!(app, alice, "talk to me");

    let (status, comment) = send!(
        app,
        TestRequest::post()
            .uri("/comments")
            .insert_header(bearer(&bob))
            .set_json(json!({"post_id": post_id, "desc": "  <i>hello</i> there  "}))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment["desc"], "hello there");
    assert_eq!(comment["user"]["username"], "bob");

    send!(
        app,
        TestRequest::post()
            .uri("/comments")
            .insert_header(bearer(&bob))
            .set_json(json!({"post_id": post_id, "desc": "second"}))
    );

    let (_, post) = send!(app, TestRequest::get().uri(&format!("/posts/{post_id}")));
    assert_eq!(post["comment_count"], 2);
    assert_eq!(post["comments"][0]["desc"], "second");

    let (_, comments) = send!(app, TestRequest::get().uri(&format!("/posts/{post_id}/comments")));
    assert_eq!(comments.as_array().unwrap().len(), 2);

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/comments")
            .insert_header(bearer(&bob))
            .set_json(json!({"post_id": post_id, "desc": "<b></b>"}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/comments")
            .insert_header(bearer(&bob))
            .set_json(json!({"post_id": "00000000-0000-0000-0000-000000000000", "desc": "lost"}))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, inbox) = send!(app, TestRequest::get().uri("/notifications").insert_header(bearer(&alice)));
    assert_eq!(inbox["items"].as_array().unwrap().len(), 2);
    assert_eq!(inbox["items"][0]["message"], "bob commented on your post");

    // Deleting the post takes its comments with it
    send!(
        app,
        TestRequest::delete()
            .uri(&format!("/posts/{post_id}"))
            .insert_header(bearer(&alice))
    );
    let (status, _) = send!(app, TestRequest::get().uri(&format!("/posts/{post_id}/comments")));
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_follow_and_feed() {
    let state = state();
    let app = app!(state);
    let (alice_id, alice) = signup!(app, "alice");
    let (bob_id, bob) = signup!(app, "bob");
    let (_, carol) = signup!(app, "carol");

    post_as!(app, bob, "bob one");
    post_as!(app, carol, "carol one");
    post_as!(app, alice, "alice one");
    post_as!(app, bob, "bob two");

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/follow")
            .insert_header(bearer(&alice))
            .set_json(json!({"target_user_id": alice_id}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/follow")
            .insert_header(bearer(&alice))
            .set_json(json!({"target_user_id": "00000000-0000-0000-0000-000000000000"}))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);

    for _ in 0..2 {
        let (status, body) = send!(
            app,
            TestRequest::post()
                .uri("/follow")
                .insert_header(bearer(&alice))
                .set_json(json!({"target_user_id": bob_id}))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "followed");
    }

    let (_, followers) = send!(app, TestRequest::get().uri(&format!("/followers/{bob_id}")));
    assert_eq!(followers, json!([alice_id]));
    let (_, followings) = send!(app, TestRequest::get().uri(&format!("/followings/{alice_id}")));
    assert_eq!(followings, json!([bob_id]));

    // Following twice notifies once
    let (_, inbox) = send!(app, TestRequest::get().uri("/notifications").insert_header(bearer(&bob)));
    assert_eq!(inbox["items"].as_array().unwrap().len(), 1);
    assert_eq!(inbox["items"][0]["message"], "alice started following you");

    let (_, feed) = send!(app, TestRequest::get().uri("/feed").insert_header(bearer(&alice)));
    let descs: Vec<&str> = feed["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["desc"].as_str().unwrap())
        .collect();
    assert_eq!(descs, vec!["bob two", "alice one", "bob one"]);

    send!(
        app,
        TestRequest::post()
            .uri("/unfollow")
            .insert_header(bearer(&alice))
            .set_json(json!({"target_user_id": bob_id}))
    );
    let (_, feed) = send!(app, TestRequest::get().uri("/feed").insert_header(bearer(&alice)));
    assert_eq!(feed["items"].as_array().unwrap().len(), 1);
    let (_, followers) = send!(app, TestRequest::get().uri(&format!("/followers/{bob_id}")));
    assert_eq!(followers, json!([]));
}

#[actix_web::test]
async fn test_cursor_pagination() {
    let state = state();
    let app = app!(state);
    let (_, token) = signup!(app, "pager");
    for i in 0..5 {
        post_as!(app, token, format!("post {i}"));
    }

    let mut seen = Vec::new();
    let mut uri = "/posts?all=true&limit=2".to_string();
    loop {
        let (status, page) = send!(app, TestRequest::get().uri(&uri));
        assert_eq!(status, StatusCode::OK);
        for item in page["items"].as_array().unwrap() {
            seen.push(item["desc"].as_str().unwrap().to_string());
        }
        match page["next_cursor"].as_str() {
            Some(cursor) => {
                assert_eq!(page["has_next_page"], true);
                uri = format!("/posts?all=true&limit=2&cursor={cursor}");
            }
            None => break,
        }
    }
    assert_eq!(seen, vec!["post 4", "post 3", "post 2", "post 1", "post 0"]);

    let (status, _) = send!(app, TestRequest::get().uri("/posts?all=true&cursor=nope"));
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send!(app, TestRequest::get().uri("/posts"));
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, page) = send!(app, TestRequest::get().uri("/posts?user=pager&limit=50"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["items"].as_array().unwrap().len(), 5);
}

#[actix_web::test]
async fn test_notification_inbox_management() {
    let state = state();
    let app = app!(state);
    let (alice_id, alice) = signup!(app, "alice");
    let (_, bob) = signup!(app, "bob");
    let (_, carol) = signup!(app, "carol");

    for token in [&bob, &carol] {
        send!(
            app,
            TestRequest::post()
                .uri("/follow")
                .insert_header(bearer(token))
                .set_json(json!({"target_user_id": alice_id}))
        );
    }

    let (_, inbox) = send!(app, TestRequest::get().uri("/notifications").insert_header(bearer(&alice)));
    assert_eq!(inbox["unread_count"], 2);
    let newest = inbox["items"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri(&format!("/notifications/{newest}/read"))
            .insert_header(bearer(&alice))
    );
    assert_eq!(status, StatusCode::OK);
    let (_, inbox) = send!(app, TestRequest::get().uri("/notifications").insert_header(bearer(&alice)));
    assert_eq!(inbox["unread_count"], 1);

    // Someone else's notification is not yours to mark
    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri(&format!("/notifications/{newest}/read"))
            .insert_header(bearer(&bob))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, marked) = send!(
        app,
        TestRequest::post()
            .uri("/notifications/read-all")
            .insert_header(bearer(&alice))
    );
    assert_eq!(marked["updated"], 1);

    let (status, _) = send!(app, TestRequest::delete().uri("/notifications").insert_header(bearer(&alice)));
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, inbox) = send!(app, TestRequest::get().uri("/notifications").insert_header(bearer(&alice)));
    assert_eq!(inbox["items"], json!([]));
    assert_eq!(inbox["unread_count"], 0);
}

#[actix_web::test]
async fn test_notification_stream_delivers_live_events() {
    let state = state();
    let app = app!(state);
    let (_, alice) = signup!(app, "alice");
    let (_, bob) = signup!(app, "bob");
    let post_id = post_as!(app, alice, "watch this");

    let (status, _) = send!(app, TestRequest::get().uri("/notifications/stream"));
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let resp = test::call_service(
        &app,
        TestRequest::get()
            .uri(&format!("/notifications/stream?token={alice}"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(state.hub.room_count(), 1);

    let mut body = resp.into_body();

    assert_eq!(next_chunk(&mut body).await, ": ping\n\n");

    send!(
        app,
        TestRequest::post()
            .uri(&format!("/posts/{post_id}/like"))
            .insert_header(bearer(&bob))
    );

    let frame = next_chunk(&mut body).await;
    assert!(frame.starts_with("event: notification\ndata: "), "{frame}");
    let data: Value = serde_json::from_str(
        frame
            .trim_start_matches("event: notification\ndata: ")
            .trim_end(),
    )
    .unwrap();
    assert_eq!(data["type"], "like");
    assert_eq!(data["message"], "bob liked your post");
}

#[actix_web::test]
async fn test_profile_update_and_password_change() {
    let state = state();
    let app = app!(state);
    let (_, token) = signup!(app, "profiled");

    let (status, profile) = send!(
        app,
        TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({
                "display_name": "Pro <b>Filed</b>",
                "bio": "Writes Rust",
                "location": "Lisbon",
                "website": "https://example.com",
            }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["display_name"], "Pro Filed");
    assert_eq!(profile["bio"], "Writes Rust");
    assert!(profile.get("token").is_none());

    let (status, _) = send!(
        app,
        TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"bio": "x".repeat(161)}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, profile) = send!(
        app,
        TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"bio": ""}))
    );
    assert!(profile["bio"].is_null());

    let (status, _) = send!(
        app,
        TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"old_password": "wrong", "new_password": "newsecret"}))
    );
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, changed) = send!(
        app,
        TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"old_password": "secret", "new_password": "newsecret"}))
    );
    assert_eq!(status, StatusCode::OK);
    let new_token = changed["token"].as_str().unwrap().to_string();

    let (status, _) = send!(app, TestRequest::get().uri("/profile").insert_header(bearer(&token)));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, me) = send!(app, TestRequest::get().uri("/profile").insert_header(bearer(&new_token)));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["location"], "Lisbon");

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/login")
            .set_json(json!({"username": "profiled", "password": "newsecret"}))
    );
    assert_eq!(status, StatusCode::OK);
}

#[actix_web::test]
async fn test_public_profile_and_recommendations() {
    let state = state();
    let app = app!(state);
    let (a_id, a) = signup!(app, "anna");
    let (b_id, _b) = signup!(app, "bert");
    let (c_id, c) = signup!(app, "cleo");
    let (d_id, d) = signup!(app, "dora");

    send!(
        app,
        TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&d))
            .set_json(json!({"display_name": "Dora D"}))
    );

    let follows = [(&c, &b_id), (&d, &b_id), (&d, &c_id), (&a, &d_id)];
    for (token, target) in follows {
        send!(
            app,
            TestRequest::post()
                .uri("/follow")
                .insert_header(bearer(token))
                .set_json(json!({"target_user_id": target}))
        );
    }
    post_as!(app, c, "cleo writes");

    let (status, profile) = send!(
        app,
        TestRequest::get()
            .uri("/profiles/bert")
            .insert_header(bearer(&d))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["counts"]["followers"], 2);
    assert_eq!(profile["counts"]["posts"], 0);
    assert_eq!(profile["is_following"], true);

    let (_, profile) = send!(app, TestRequest::get().uri("/profiles/cleo"));
    assert_eq!(profile["is_following"], false);
    assert_eq!(profile["posts"][0]["desc"], "cleo writes");

    let (status, _) = send!(app, TestRequest::get().uri("/profiles/nobody_here"));
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, recs) = send!(app, TestRequest::get().uri("/recommendations").insert_header(bearer(&a)));
    assert_eq!(status, StatusCode::OK);
    let recs = recs.as_array().unwrap();
    let ids: Vec<&str> = recs.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![b_id.as_str(), c_id.as_str()]);
    assert!(!ids.contains(&a_id.as_str()));
    assert_eq!(recs[0]["follower_count"], 2);
    assert_eq!(recs[0]["mutual_followers"], json!(["Dora D"]));
    assert_eq!(recs[1]["post_count"], 1);
}

async fn next_chunk<B>(body: &mut B) -> String
where
    B: MessageBody + Unpin,
    B::Error: std::fmt::Debug,
{
    let chunk = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::poll_fn(|cx| Pin::new(&mut *body).poll_next(cx)),
    )
    .await
    .expect("stream stalled")
    .expect("stream ended")
    .expect("stream errored");
    String::from_utf8(chunk.to_vec()).unwrap()
}

struct FakeHost;

#[async_trait]
impl MediaHost for FakeHost {
    async fn upload(&self, file: MediaFile) -> anyhow::Result<UploadedMedia> {
        Ok(UploadedMedia {
            url: format!("https://cdn.test/{}", file.file_name),
            file_id: "file_1".to_string(),
            kind: file.kind,
        })
    }
}

struct DownHost;

#[async_trait]
impl MediaHost for DownHost {
    async fn upload(&self, _file: MediaFile) -> anyhow::Result<UploadedMedia> {
        anyhow::bail!("connection refused")
    }
}

#[actix_web::test]
async fn test_media_upload_limits_and_failures() {
    let state = web::Data::new(
        AppState::new(Store::in_memory(), Config::default()).with_media_host(Arc::new(FakeHost)),
    );
    let app = app!(state);
    let (_, token) = signup!(app, "uploader");

    let (status, err) = send!(
        app,
        TestRequest::post()
            .uri("/upload?filename=empty.png")
            .insert_header(bearer(&token))
            .insert_header(("Content-Type", "image/png"))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "No file uploaded");

    let (status, err) = send!(
        app,
        TestRequest::post()
            .uri("/upload?filename=huge.png")
            .insert_header(bearer(&token))
            .insert_header(("Content-Type", "image/png"))
            .set_payload(vec![0u8; chirp::config::MAX_UPLOAD_BYTES + 1])
    );
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(err["error"].as_str().unwrap().starts_with("File too large"));

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/upload?filename=max.png")
            .insert_header(bearer(&token))
            .insert_header(("Content-Type", "image/png"))
            .set_payload(vec![0u8; chirp::config::MAX_UPLOAD_BYTES])
    );
    assert_eq!(status, StatusCode::OK);

    let state = web::Data::new(
        AppState::new(Store::in_memory(), Config::default()).with_media_host(Arc::new(DownHost)),
    );
    let app = app!(state);
    let (_, token) = signup!(app, "uploader");

    let (status, err) = send!(
        app,
        TestRequest::post()
            .uri("/upload?filename=cat.png")
            .insert_header(bearer(&token))
            .insert_header(("Content-Type", "image/png"))
            .set_payload(vec![1u8, 2, 3])
    );
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err["error"], "Internal server error");
}

#[actix_web::test]
async fn test_media_upload() {
    let state = state();
    let app = app!(state);
    let (_, token) = signup!(app, "uploader");

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/upload?filename=cat.png")
            .insert_header(bearer(&token))
            .insert_header(("Content-Type", "image/png"))
            .set_payload(vec![1u8, 2, 3])
    );
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let state = web::Data::new(
        AppState::new(Store::in_memory(), Config::default()).with_media_host(Arc::new(FakeHost)),
    );
    let app = app!(state);
    let (_, token) = signup!(app, "uploader");

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/upload?filename=cat.png")
            .insert_header(("Content-Type", "image/png"))
            .set_payload(vec![1u8, 2, 3])
    );
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/upload?filename=doc.pdf")
            .insert_header(bearer(&token))
            .insert_header(("Content-Type", "application/pdf"))
            .set_payload(vec![1u8, 2, 3])
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, uploaded) = send!(
        app,
        TestRequest::post()
            .uri("/upload?filename=clip.mp4")
            .insert_header(bearer(&token))
            .insert_header(("Content-Type", "video/mp4"))
            .set_payload(vec![0u8; 1024])
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(uploaded["kind"], "video");
    let url = uploaded["url"].as_str().unwrap().to_string();
    assert!(url.ends_with("_clip.mp4"));

    let (status, post) = send!(
        app,
        TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&token))
            .set_json(json!({"desc": "my clip", "video": url}))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(post["video"], url.as_str());
}

#[actix_web::test]
async fn test_pages() {
    let state = state();
    let app = app!(state);
    let (_, token) = signup!(app, "page_owner");
    send!(
        app,
        TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"bio": "I <3 pages"}))
    );

    let resp = test::call_service(&app, TestRequest::get().uri("/").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, TestRequest::get().uri("/page_owner").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(html.contains("@page_owner"));
    assert!(html.contains("I &lt;3 pages"));
    assert!(!html.contains("PROFILE_"));

    let resp = test::call_service(&app, TestRequest::get().uri("/ghost_user").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = test::call_service(&app, TestRequest::get().uri("/missing.css").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_profile_page_does_not_expand_user_text() {
    let state = state();
    let app = app!(state);
    let (user_id, token) = signup!(app, "tmpl");
    send!(
        app,
        TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"display_name": "PROFILE_FOLLOWERS PROFILE_USER_ID"}))
    );

    let resp = test::call_service(&app, TestRequest::get().uri("/tmpl").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(html.contains("<title>PROFILE_FOLLOWERS PROFILE_USER_ID (@tmpl) / Chirp</title>"));
    assert!(html.contains(&format!(r#"data-user-id="{user_id}""#)));
}

#[actix_web::test]
async fn test_usernames_are_unique_regardless_of_case() {
    let state = state();
    let app = app!(state);
    signup!(app, "dup");

    for name in ["dup", "DUP", "Dup"] {
        let (status, err) = send!(
            app,
            TestRequest::post()
                .uri("/users")
                .set_json(json!({"username": name, "password": "secret"}))
        );
        assert_eq!(status, StatusCode::CONFLICT, "{name}");
        assert_eq!(err["error"], "Username exists");
    }

    // A rejected signup does not keep the name reserved
    let (status, _) = send!(
        app,
        TestRequest::post()
            .uri("/users")
            .set_json(json!({"username": "long_name", "password": "secret", "display_name": "x".repeat(51)}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    signup!(app, "long_name");
}
