use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pollbot::{Bot, Config};

const HELP: &str = "Hello! I echo whatever you send me.\n\n\
                    Commands:\n\
                    /start - Show this message\n\
                    /whoami - Show what I know about you\n\
                    /forward - Forward your message back to this chat";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pollbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  API: {}", config.telegram.api_url);
    info!("  Max jobs: {}", config.dispatch.max_jobs);
    info!("  Max workers: {}", config.dispatch.max_workers);
    info!("  Poll timeout: {}s", config.dispatch.poll_timeout);

    let mut bot = Bot::from_config(&config);
    register_handlers(&mut bot)?;

    let me = bot.get_me().await.context("Failed to reach the Bot API")?;
    info!("Authorized as @{}", me.username);

    info!("Bot is starting...");
    bot.run(config.dispatch.poll_timeout).await?;

    Ok(())
}

fn register_handlers(bot: &mut Bot) -> Result<()> {
    bot.add_command_handler("start", |bot, msg| async move {
        bot.send_message(msg.chat.id, HELP).await?;
        anyhow::Ok(())
    })?;

    bot.add_command_handler("whoami", |bot, msg| async move {
        let user = &msg.from;
        let mut reply = format!("id: {}\nname: {}", user.id, user.first_name);
        if !user.last_name.is_empty() {
            reply.push(' ');
            reply.push_str(&user.last_name);
        }
        if !user.username.is_empty() {
            reply.push_str(&format!("\nusername: @{}", user.username));
        }
        bot.send_message(msg.chat.id, &reply).await?;
        anyhow::Ok(())
    })?;

    bot.add_command_handler("forward", |bot, msg| async move {
        bot.forward_message(msg.chat.id, &msg).await?;
        anyhow::Ok(())
    })?;

    // Catch-all goes last so it doesn't shadow the commands.
    bot.add_text_handler(|bot, msg| async move {
        info!(
            "Message from {} ({}): {}",
            msg.from.first_name, msg.from.id, msg.text
        );
        bot.send_message(msg.chat.id, &msg.text).await?;
        anyhow::Ok(())
    });

    Ok(())
}
