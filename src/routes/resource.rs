//! JSON:API routes. Paths are parameterized; handlers resolve the resource by its path segment.

use crate::handlers::resource::{
    batch, destroy, destroy_relationship, index, list_relationship, related, show, store,
    store_relationship, update, update_relationship,
};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/:resource", get(index).post(store).patch(batch))
        .route("/:resource/:id", get(show).patch(update).delete(destroy))
        .route(
            "/:resource/:id/relationships/:relation",
            get(list_relationship)
                .post(store_relationship)
                .patch(update_relationship)
                .delete(destroy_relationship),
        )
        .route("/:resource/:id/:relation", get(related))
        .with_state(state)
}
