//! HTTP surface of the Conveyor scheduler.

pub mod error;
pub mod routes;
pub mod shutdown;
pub mod state;

pub use state::AppState;
