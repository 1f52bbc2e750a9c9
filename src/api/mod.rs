//! HTTP control surface: health, status, configuration, run and merge
//! control.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;
