use std::{env, sync::Arc};

use condemner::config::BotConfig;
use condemner::jail::{JailRegistry, VoteGate};
use condemner::serenity_platform::SerenityPlatform;
use condemner::settings::GuildSettingsStore;
use condemner::storage::FileStore;
use condemner::{BOT_NAME, Data, Error, JAIL_TARGET, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity, GatewayIntents, Http};
use tokio::signal;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    let config = BotConfig::from_env().await?;
    logging::init(&config.log_dir)?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;

    let platform = Arc::new(SerenityPlatform::new(Arc::new(Http::new(&token))));
    let settings = GuildSettingsStore::new(Arc::new(FileStore::new(config.guild_settings_dir())));
    let registry = JailRegistry::new(
        platform,
        Arc::new(FileStore::new(config.restrictions_dir())),
        VoteGate::new(config.vote_window()),
    );

    // Commands wait on the registry until saved restrictions are back
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.rebuild().await {
                error!(target: JAIL_TARGET, error = %e, "Recovery failed; starting with an empty jail");
            }
        });
    }

    let prefix = config.prefix.clone();
    let data = Data::new(registry.clone(), settings.clone(), config);

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::help(),
                commands::init(),
                commands::arrest(),
                commands::admin_arrest(),
                commands::free(),
                commands::admin_free(),
                commands::jailed(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!(target: condemner::ERROR_TARGET, error = %e, "Failed to report error");
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console(format!("Registering {BOT_NAME} commands"));
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(data)
            })
        })
        .build();

    // Configure the Serenity client
    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(handlers::Handler::new(settings))
        .framework(framework)
        .await?;

    // Save active restrictions before going down
    {
        let shard_manager = Arc::clone(&client.shard_manager);
        let registry = registry.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            flush(&registry).await;
            shard_manager.shutdown_all().await;
        });
    }

    info!("Starting bot...");
    if let Err(err) = client.start().await {
        error!(error = %err, "Client stopped with an error");
        flush(&registry).await;
        return Err(err.into());
    }

    Ok(())
}

async fn flush(registry: &JailRegistry) {
    match registry.flush().await {
        Ok(count) => info!(target: JAIL_TARGET, count, "Saved active restrictions"),
        Err(e) => error!(target: JAIL_TARGET, error = %e, "Failed to save active restrictions"),
    }
}

/// Completes on SIGINT or SIGTERM
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {},
        () = terminate => {},
    }
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start the runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
