pub mod conversation;
pub mod handlers;
pub mod orchestrator;
pub mod state;
pub mod store;

pub use orchestrator::Pipeline;
pub use store::SessionStore;
