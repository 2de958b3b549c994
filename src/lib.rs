pub mod calendar;
pub mod cli;
pub mod config;
pub mod copilot;
pub mod database;
pub mod llm;
pub mod models;
pub mod planner;
pub mod utils;

pub use config::Config;
pub use database::Database;
pub use models::{ChatMessage, ChatSession, Story, Task, Theme};
pub use planner::Planner;
pub use utils::Profile;
