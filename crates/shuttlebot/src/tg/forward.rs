use crate::forward::{self, ForwardPlan, IncomingMessage, MessageRef, ReplyTarget};
use crate::prelude::*;
use crate::tg::{self, ChatClient};
use crate::util::DynResult;
use std::sync::Arc;
use teloxide::types::{MediaKind, Message, MessageKind};

/// Only these kinds of messages are relayed. Stickers, polls, and service
/// messages stay in the source chat.
fn is_forwardable(msg: &Message) -> bool {
    let MessageKind::Common(common) = &msg.kind else {
        return false;
    };

    use MediaKind::*;
    matches!(
        common.media_kind,
        Text(_)
            | Audio(_)
            | Contact(_)
            | Document(_)
            | Location(_)
            | Photo(_)
            | Venue(_)
            | Video(_)
            | VideoNote(_)
            | Voice(_)
    )
}

/// In forum supergroups every message of a topic replies to the message
/// that opened the topic, even if the user didn't reply to anything
fn is_topic_root(msg: &Message, target: &Message) -> bool {
    let is_topic_message = matches!(
        &msg.kind,
        MessageKind::Common(common) if common.is_topic_message
    );
    is_topic_message && msg.thread_id == Some(target.id.0)
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef {
        chat: msg.chat.id,
        id: msg.id,
    }
}

pub(crate) fn filter_map(msg: Message) -> Option<IncomingMessage> {
    if !is_forwardable(&msg) {
        return None;
    }

    // Messages sent on behalf of channels or anonymous admins have no user
    let sender = msg.from()?.id;

    let reply_target = msg
        .reply_to_message()
        .filter(|target| is_forwardable(target) && !is_topic_root(&msg, target))
        .map(|target| ReplyTarget {
            message: message_ref(target),
            text: target.text().unwrap_or_default().to_owned(),
        });

    Some(IncomingMessage {
        message: message_ref(&msg),
        sender,
        text: msg.text().unwrap_or_default().to_owned(),
        reply_target,
    })
}

pub(crate) async fn handle(ctx: Arc<tg::Ctx>, msg: IncomingMessage) -> DynResult {
    let plan = forward::plan(&ctx.rules, &msg);

    if !plan.is_activity() {
        trace!(matched_rules = plan.matched_rules, "Nothing to forward");
        return Ok(());
    }

    let span = info_span!(
        "forward",
        source_chat = %msg.source_chat(),
        message_id = msg.message.id.0,
        sender = %msg.sender,
    );

    async {
        let delivered = execute(&*ctx.client, &plan).await;

        info!(
            matched_rules = plan.matched_rules,
            planned = plan.actions.len(),
            delivered,
            "Forwarded message"
        );
    }
    .instrument(span)
    .await;

    Ok(())
}

/// Sends the planned actions in order. Failed sends are logged, and the rest
/// of the plan is still executed. Returns the number of successful sends.
pub(crate) async fn execute(client: &dyn ChatClient, plan: &ForwardPlan) -> usize {
    let mut delivered = 0;

    for action in &plan.actions {
        let result = client
            .forward_to(action.destination, action.payload.message())
            .await;

        match result {
            Ok(_) => delivered += 1,
            Err(err) => warn!(
                err = tracing_err(&err),
                destination = %action.destination,
                payload = ?action.payload,
                "Failed to forward message"
            ),
        }
    }

    delivered
}
