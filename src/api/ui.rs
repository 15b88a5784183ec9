//! Bundled browser UI.
//!
//! A single self-contained page that polls the JSON API. The front-end
//! itself is an external collaborator; this route only serves the bundle.

use axum::response::Html;
use axum::{routing::get, Router};

use crate::AppState;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Create the UI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(index))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
