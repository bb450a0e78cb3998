//! Axum router construction.
//!
//! Everything except `/health` sits behind Basic auth, including the static
//! frontend fallback.

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::auth::auth_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut protected = Router::new()
        // Search
        .route(
            "/search",
            get(routes::search::search_get).post(routes::search::search_post),
        )
        // Delivery
        .route(
            "/stream_html/{source}/{*id}",
            get(routes::stream::stream_html),
        )
        .route(
            "/stream_direct/{source}/{*id}",
            get(routes::stream::stream_direct),
        )
        .route("/download/{source}/{*id}", get(routes::stream::download))
        // Queue
        .route(
            "/queue",
            get(routes::queue::list_queue)
                .post(routes::queue::enqueue)
                .delete(routes::queue::clear),
        )
        .route("/queue/next", post(routes::queue::next))
        .route("/queue/{entry_id}", delete(routes::queue::remove))
        // Admin
        .route("/admin/tools", get(routes::admin::tools));

    if let Some(dir) = ctx.config.server.static_dir.clone() {
        if dir.is_dir() {
            tracing::info!("Serving static files from {}", dir.display());
            let index_path = dir.join("index.html");
            protected = protected.fallback_service(
                ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(ServeFile::new(index_path)),
            );
        } else {
            tracing::warn!("Static directory {} does not exist", dir.display());
        }
    }

    let protected =
        protected.layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(protected)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
