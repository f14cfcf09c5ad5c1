//! Telegram transport: update routing and the outgoing client

pub(crate) mod client;
mod cmd;
mod config;
mod forward;

use crate::fetch::{self, FetchDispatcher};
use crate::forward::RuleSet;
use crate::prelude::*;
use crate::Result;
use cmd::{CommandHandler, CommandTable};
use dptree::di::DependencyMap;
use std::sync::Arc;
use teloxide::adaptors::{CacheMe, Throttle, Trace};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;

pub(crate) use client::{ChatClient, VideoPayload};
pub(crate) use config::*;

pub(crate) type Bot = Trace<CacheMe<Throttle<teloxide::Bot>>>;

pub(crate) struct Ctx {
    client: Arc<dyn ChatClient>,
    rules: Arc<RuleSet>,
    fetch: Option<FetchDispatcher>,
    commands: CommandTable,

    /// Used to recognize commands addressed to this bot as `/command@bot`
    bot_username: String,
}

pub(crate) struct RunBotOptions {
    pub(crate) tg_cfg: Config,
    pub(crate) rules: RuleSet,
    pub(crate) fetch_cfg: Option<fetch::Config>,
}

pub(crate) async fn run_bot(opts: RunBotOptions) -> Result {
    let mut di = DependencyMap::new();

    let bot: Bot = teloxide::Bot::new(opts.tg_cfg.token)
        .throttle(Default::default())
        .cache_me()
        .trace(teloxide::adaptors::trace::Settings::all());

    let me = bot.get_me().await?;
    let bot_username = me
        .user
        .username
        .clone()
        .fatal_ctx(|| "The bot account has no username")?;

    let client: Arc<dyn ChatClient> = Arc::new(bot.clone());

    let fetch = opts
        .fetch_cfg
        .map(|fetch_cfg| FetchDispatcher::detect(fetch_cfg, client.clone()))
        .transpose()?
        .flatten();

    let mut commands = CommandTable::default();
    if let Some(fetch) = &fetch {
        commands.register(fetch.command(), CommandHandler::Fetch);
    }

    info!(
        bot = bot_username.as_str(),
        rules = opts.rules.rules().len(),
        fetch = fetch.is_some(),
        "Starting bot..."
    );

    di.insert(Arc::new(Ctx {
        client,
        rules: Arc::new(opts.rules),
        fetch,
        commands,
        bot_username,
    }));

    let handler = dptree::entry()
        .inspect(|update: Update| {
            trace!(
                target: "tg_update",
                "{}",
                serde_json::to_string_pretty(&update).unwrap_or_default(),
            );
        })
        .branch(
            Update::filter_message()
                .chain(dptree::filter_map(cmd::filter_map))
                .endpoint(cmd::handle),
        )
        .branch(
            Update::filter_message()
                .chain(dptree::filter_map(forward::filter_map))
                .endpoint(forward::handle),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(di)
        // Most of the updates from the watched chats aren't interesting
        // to us, so we have a noop default handler here to suppress
        // the warnings about unhandled updates
        .default_handler(|_| std::future::ready(()))
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error from the update handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");

    Ok(())
}
