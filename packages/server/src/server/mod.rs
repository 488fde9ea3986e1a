pub mod app;
pub mod handlers;
pub mod messages;
pub mod rpc;

pub use app::{build_app, AppState};
