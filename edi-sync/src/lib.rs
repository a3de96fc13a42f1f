pub mod adapters;
pub mod cli;
pub mod load_config;
pub mod sftp;

pub use cli::{run, Cli, Commands};
