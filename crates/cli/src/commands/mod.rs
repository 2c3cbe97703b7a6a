pub mod chat;
pub mod config_cmd;
pub mod prompt;
pub mod retrieve;
