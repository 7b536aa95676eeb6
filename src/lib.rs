pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod jail;
pub mod logging;
pub mod platform;
pub mod serenity_platform;
pub mod settings;
pub mod storage;

#[cfg(test)]
mod testing;

pub const BOT_NAME: &str = "condemner";
pub const COMMAND_TARGET: &str = "condemner::command";
pub const ERROR_TARGET: &str = "condemner::error";
pub const EVENT_TARGET: &str = "condemner::handlers";
pub const JAIL_TARGET: &str = "condemner::jail";
pub const CONSOLE_TARGET: &str = "condemner";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
