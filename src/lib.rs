pub mod agent;
pub mod chat;
pub mod commands;
pub mod config;
pub mod fs_util;
pub mod memory;
pub mod types;
