use crate::{COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error, JAIL_TARGET};
use dashmap::DashMap;
use poise::serenity_prelude::UserId;
use poise::{Context, FrameworkError};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Arrests, releases and recovery
pub const JAIL_LOG_FILE: &str = "jail";

/// Initialize the logging system with console and file outputs under `log_dir`
pub fn init(log_dir: &Path) -> Result<(), Error> {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    // Set up file appenders with daily rotation
    let command_file = RollingFileAppender::new(Rotation::DAILY, log_dir, COMMAND_LOG_FILE);
    let jail_file = RollingFileAppender::new(Rotation::DAILY, log_dir, JAIL_LOG_FILE);

    // Create a layer for console output (human-readable format)
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Create a layer for command logs (JSON format)
    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file);

    // Jail events only, so a guild's history can be read back on its own
    let jail_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(jail_file)
        .with_filter(filter_fn(|metadata| metadata.target() == JAIL_TARGET));

    // Default to INFO level if not specified, but filter out serenity heartbeat logs
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("serenity=error".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(jail_layer)
        .try_init()?;

    info!(log_dir = %log_dir.display(), "Logging system initialized");
    Ok(())
}

/// Start times of running commands, keyed by invocation id. Pre and post hooks can run
/// on different worker threads.
static COMMAND_STARTS: LazyLock<DashMap<u64, Instant>> = LazyLock::new(DashMap::new);

/// Who ran what, where
struct Invocation {
    command: String,
    guild_id: String,
    user_id: UserId,
}

impl Invocation {
    fn of(ctx: Context<'_, Data, Error>) -> Self {
        Self {
            command: ctx.command().qualified_name.clone(),
            guild_id: ctx
                .guild_id()
                .map_or_else(|| "DM".to_string(), |id| id.to_string()),
            user_id: ctx.author().id,
        }
    }
}

/// Pre-command hook
pub fn log_command_start(ctx: Context<'_, Data, Error>) {
    COMMAND_STARTS.insert(ctx.id(), Instant::now());

    let invocation = Invocation::of(ctx);
    let arguments = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        ctx.invocation_string()
    };
    info!(
        target: COMMAND_TARGET,
        command = %invocation.command,
        guild_id = %invocation.guild_id,
        user_id = %invocation.user_id,
        arguments = %arguments,
        event = "start",
        "Command execution started"
    );
}

/// Post-command hook
pub fn log_command_end(ctx: Context<'_, Data, Error>) {
    let elapsed = COMMAND_STARTS
        .remove(&ctx.id())
        .map(|(_, start)| start.elapsed());
    let duration_ms = elapsed.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

    let invocation = Invocation::of(ctx);
    info!(
        target: COMMAND_TARGET,
        command = %invocation.command,
        guild_id = %invocation.guild_id,
        user_id = %invocation.user_id,
        duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// on_error hook. Commands that fail never reach the post-command hook, so their start
/// time is dropped here.
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            COMMAND_STARTS.remove(&ctx.id());
            let invocation = Invocation::of(*ctx);
            error!(
                target: ERROR_TARGET,
                command = %invocation.command,
                guild_id = %invocation.guild_id,
                user_id = %invocation.user_id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::MissingUserPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            let invocation = Invocation::of(*ctx);
            warn!(
                target: ERROR_TARGET,
                command = %invocation.command,
                guild_id = %invocation.guild_id,
                user_id = %invocation.user_id,
                missing = ?missing_permissions,
                "User lacks permissions for command"
            );
        }
        FrameworkError::ArgumentParse { error, input, ctx, .. } => {
            let invocation = Invocation::of(*ctx);
            warn!(
                target: ERROR_TARGET,
                command = %invocation.command,
                user_id = %invocation.user_id,
                input = ?input,
                error = %error,
                "Bad command arguments"
            );
        }
        other => {
            error!(target: ERROR_TARGET, error = ?other, "Framework error");
        }
    }
}

pub fn log_console(message: String) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_share_bot_prefix() {
        for target in [COMMAND_TARGET, ERROR_TARGET, JAIL_TARGET] {
            assert!(target.starts_with(CONSOLE_TARGET));
        }
        assert_eq!(JAIL_TARGET, "condemner::jail");
    }

    #[test]
    fn test_default_filter_directive_parses() {
        let directive: Result<tracing_subscriber::filter::Directive, _> = "serenity=error".parse();
        assert!(directive.is_ok());
    }
}
