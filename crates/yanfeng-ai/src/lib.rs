pub mod agent;
pub mod config_cache;
pub mod errors;
pub mod models;
pub mod projector;
pub mod prompt_template;
pub mod providers;
pub mod task;
pub mod tool_bridge;
