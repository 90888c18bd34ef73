//! Monitor daemon library: CLI parsing and the HTTP surface.

pub mod api;
pub mod cli;

pub use cli::Cli;
