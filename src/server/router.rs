use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::server::constants::MULTIPART_OVERHEAD_BYTES;
use crate::server::handlers;

/// Construct the application's HTTP router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let upload_body_limit = state
        .config()
        .storage
        .max_file_size_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let upload_routes = Router::new()
        .route("/upload", post(handlers::uploads::upload_submit_handler))
        .layer(RequestBodyLimitLayer::new(upload_body_limit as usize));

    Router::new()
        .route("/admin", get(handlers::admin::admin_files_handler))
        .route("/login", post(handlers::auth::login_handler))
        .route("/logout", post(handlers::auth::logout_handler))
        .route("/delete/:id", post(handlers::admin::delete_file_handler))
        .route(
            "/files/:id/password",
            post(handlers::admin::update_password_handler),
        )
        .route(
            "/d/:id",
            get(handlers::downloads::file_info_handler)
                .post(handlers::downloads::submit_password_handler),
        )
        .route("/download/:id", get(handlers::downloads::download_handler))
        .route("/hotlink/:id", get(handlers::downloads::hotlink_handler))
        .merge(upload_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
