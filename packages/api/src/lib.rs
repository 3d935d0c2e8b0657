//! HTTP surface for integration lifecycle requests

use axum::{Router, http::Uri};
use error::ApiError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

mod auth;
mod routes;

pub mod error;
pub mod state;

pub use axum;
pub use routes::monday::{FieldDefinition, TWEET_FIELDS};
pub use state::{AppState, State};

pub fn construct_router(state: AppState) -> Router {
    Router::new()
        .nest("/monday", routes::monday::routes())
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn not_found(uri: Uri) -> ApiError {
    tracing::debug!(path = %uri.path(), "No route");
    ApiError::NOT_FOUND
}
