pub mod cli;
pub mod commands;
pub mod config;
pub mod prompt;
pub mod schedule;
mod server;

pub use server::{build_router, AppState};
