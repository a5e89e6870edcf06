//! CLI commands

pub mod operate;
pub mod secrets;
pub mod users;
