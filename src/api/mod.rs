/// API routes and handlers
pub mod admin;
pub mod membership;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(membership::routes())
        .merge(admin::routes())
}
