pub mod handlers;
pub mod server;

pub use handlers::AppState;
pub use server::{build_app_state, build_router, run_server, ServerConfig};
