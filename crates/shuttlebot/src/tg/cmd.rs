//! Bot commands. The set of commands is not known at compile time, because
//! the command tokens come from the config, so we don't use `BotCommands`
//! derive here, and resolve the tokens through the [`CommandTable`] instead.

use crate::fetch::{FetchDispatcher, FetchRequest};
use crate::prelude::*;
use crate::tg::{self, ChatClient};
use crate::util::DynResult;
use std::collections::HashMap;
use std::sync::Arc;
use teloxide::types::{Message, User};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandHandler {
    Fetch,
}

/// Maps command tokens (without the leading slash) to their handlers
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandTable {
    handlers: HashMap<String, CommandHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandInvocation {
    pub(crate) handler: CommandHandler,

    /// The rest of the message text after the command token
    pub(crate) payload: String,
}

impl CommandTable {
    /// Accepts the token both with and without the leading slash
    pub(crate) fn register(&mut self, token: &str, handler: CommandHandler) {
        let token = token.trim();
        let token = token.strip_prefix('/').unwrap_or(token);
        self.handlers.insert(token.to_owned(), handler);
    }

    /// Parses the `/command[@bot_username] payload` message text
    pub(crate) fn parse(&self, text: &str, bot_username: &str) -> Option<CommandInvocation> {
        let text = text.trim();

        let (token, payload) = text
            .split_once(char::is_whitespace)
            .unwrap_or((text, ""));

        let token = token.strip_prefix('/')?;

        let token = match token.split_once('@') {
            Some((token, mention)) if mention.eq_ignore_ascii_case(bot_username) => token,
            // The command is addressed to some other bot in the group
            Some(_) => return None,
            None => token,
        };

        let handler = *self.handlers.get(token)?;

        Some(CommandInvocation {
            handler,
            payload: payload.trim().to_owned(),
        })
    }
}

pub(crate) fn filter_map(ctx: Arc<tg::Ctx>, msg: Message) -> Option<CommandInvocation> {
    ctx.commands.parse(msg.text()?, &ctx.bot_username)
}

pub(crate) async fn handle(ctx: Arc<tg::Ctx>, msg: Message, cmd: CommandInvocation) -> DynResult {
    let span = info_span!(
        "handle_command",
        sender = msg.from().map(User::debug_id).as_deref(),
        chat = %msg.chat.debug_id(),
        cmd = format_args!("{cmd:?}"),
    );

    span.in_scope(|| {
        debug!("Processing command");

        match cmd.handler {
            CommandHandler::Fetch => {
                // The command is registered only when the capability is enabled
                let Some(dispatcher) = &ctx.fetch else {
                    warn!("Fetch command received, but the fetch capability is disabled");
                    return;
                };
                fetch(dispatcher, ctx.client.clone(), &msg, cmd.payload);
            }
        }
    });

    Ok(())
}

fn fetch(dispatcher: &FetchDispatcher, client: Arc<dyn ChatClient>, msg: &Message, url: String) {
    let Some(user) = msg.from() else {
        debug!("Ignoring fetch command without a user sender");
        return;
    };

    if !dispatcher.permits_user(user.id) {
        debug!("Ignoring fetch command from a user that is not in the allow-list");
        return;
    }

    let request = FetchRequest {
        url,
        requesting_chat: msg.chat.id,
        requesting_user: user.id,
        requester_name: user.display_name(),
    };

    submit_and_reply(dispatcher, client, request);
}

/// Starts the fetch and replies to the requester once it finishes.
/// Doesn't wait for the fetch, so the updates from the same chat
/// are not blocked by it.
fn submit_and_reply(
    dispatcher: &FetchDispatcher,
    client: Arc<dyn ChatClient>,
    request: FetchRequest,
) -> JoinHandle<()> {
    let outcome = dispatcher.submit(request.clone());

    let fut = async move {
        let Ok(outcome) = outcome.await else {
            warn!("Fetch task finished without reporting the outcome");
            return;
        };

        let reply = outcome.reply_text(&request);

        if let Err(err) = client.post_text(request.requesting_chat, reply).await {
            warn!(
                err = tracing_err(&err),
                "Failed to reply with the fetch outcome"
            );
        }
    };

    tokio::spawn(fut.in_current_span())
}
