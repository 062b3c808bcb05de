pub mod handlers;
pub mod server;
pub mod types;

pub use handlers::{AppState, SharedState};
pub use server::{create_router, start_server};
