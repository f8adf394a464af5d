mod handlers;
mod scope;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::Database;

pub use scope::{Actor, ReleaseScope, RELEASE_HEADER, USER_HEADER};

pub fn create_router(db: Database) -> Router {
    let api = Router::new()
        // Releases
        .route("/releases", get(handlers::list_releases).post(handlers::create_release))
        .route("/releases/current", get(handlers::current_release))
        .route("/releases/{id}", get(handlers::get_release).put(handlers::update_release))
        .route("/releases/{id}/close", post(handlers::close_release))
        .route("/releases/{id}/deploy", post(handlers::deploy_release))
        .route("/releases/{id}/rollback", post(handlers::rollback_to_release))
        .route("/releases/{id}/conflicts", get(handlers::check_release_conflicts))
        .route("/releases/{id}/stats", get(handlers::get_release_stats))
        .route("/releases/{from}/diff/{to}", get(handlers::preview_diff))
        .route("/context", get(handlers::release_context))
        // Versioned entities
        .route(
            "/entities/{entity_type}",
            get(handlers::find_entities).post(handlers::create_entity),
        )
        .route(
            "/entities/{entity_type}/{id}",
            get(handlers::get_entity)
                .patch(handlers::patch_entity)
                .delete(handlers::remove_entity),
        )
        .route("/entities/{entity_type}/{id}/history", get(handlers::entity_history))
        // Feature shortcuts
        .route("/translation-keys", post(handlers::create_translation_key))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(db)
}
