pub mod config;
pub mod orchestrator;
pub mod redflag;
pub mod registry;
pub mod render;
pub mod service;
pub mod session;
pub mod transcript;
pub mod types;

pub use session::Session;
pub use types::*;
