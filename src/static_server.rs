use actix_web::{web, HttpResponse};
use mime_guess::from_path;
use rust_embed::RustEmbed;

use crate::core::errors::{ApiError, ApiResult};
use crate::templates::render_user_profile;
use crate::AppState;

#[derive(RustEmbed)]
#[folder = "static"]
pub(crate) struct Assets;

pub fn serve_static(path: &str) -> ApiResult<HttpResponse> {
    let file_path = match path {
        "" | "/" | "/index.html" => "index.html",
        _ => path.trim_start_matches('/'),
    };

    let file = Assets::get(file_path)
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;
    let mime = from_path(file_path).first_or_octet_stream();

    Ok(HttpResponse::Ok()
        .content_type(mime.as_ref())
        .body(file.data.into_owned()))
}

pub async fn index() -> ApiResult<HttpResponse> {
    serve_static("/")
}

/// `GET /{name}`: a file name serves an asset, anything else a profile page.
pub async fn page_or_asset(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let name = path.into_inner();
    if name.contains('.') {
        serve_static(&name)
    } else {
        render_user_profile(&state.store, &name)
    }
}
