use super::RuleSet;
use crate::prelude::*;
use teloxide::types::{ChatId, MessageId, UserId};

/// Address of a message that can be forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MessageRef {
    pub(crate) chat: ChatId,
    pub(crate) id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReplyTarget {
    pub(crate) message: MessageRef,
    pub(crate) text: String,
}

/// Transport-independent view of a received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IncomingMessage {
    pub(crate) message: MessageRef,
    pub(crate) sender: UserId,

    /// Empty for media messages without text
    pub(crate) text: String,
    pub(crate) reply_target: Option<ReplyTarget>,
}

impl IncomingMessage {
    pub(crate) fn source_chat(&self) -> ChatId {
        self.message.chat
    }

    /// Messages of exactly one character are reactions (a lone emoji or a
    /// punctuation mark), they are noise for the destination chats.
    fn is_noise(&self) -> bool {
        self.text.code_points() == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForwardPayload {
    /// The message that the incoming message replies to
    ReplyTarget(MessageRef),

    /// The incoming message itself
    Primary(MessageRef),
}

impl ForwardPayload {
    pub(crate) fn message(self) -> MessageRef {
        match self {
            Self::ReplyTarget(message) | Self::Primary(message) => message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SendAction {
    pub(crate) destination: ChatId,
    pub(crate) payload: ForwardPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ForwardPlan {
    pub(crate) actions: Vec<SendAction>,

    /// Number of rules that matched both the source chat and the sender
    pub(crate) matched_rules: usize,
}

impl ForwardPlan {
    /// Whether anything is going to be sent at all. A matched rule whose
    /// only message was suppressed doesn't count as activity.
    pub(crate) fn is_activity(&self) -> bool {
        !self.actions.is_empty()
    }
}

/// Decides where the message should be forwarded to. This is a pure function,
/// the returned actions must be executed in order.
pub(crate) fn plan(rules: &RuleSet, msg: &IncomingMessage) -> ForwardPlan {
    let source_chat = msg.source_chat();

    if rules.ignores(source_chat) {
        trace!(%source_chat, "Ignoring message from unwatched chat");
        return ForwardPlan::default();
    }

    let mut plan = ForwardPlan::default();

    for rule in rules.rules() {
        if !rule.allows(msg.sender) {
            if rule.source_chat == source_chat {
                debug!(
                    rule = rule.name.as_str(),
                    sender = %msg.sender,
                    "Ignoring sender that is not in the allow-list"
                );
            }
            continue;
        }

        // The same chat may be watched by several rules, so the source check
        // can't be replaced with the `ignores()` check above
        if rule.source_chat != source_chat {
            continue;
        }

        plan.matched_rules += 1;

        for &destination in &rule.destinations {
            if let Some(reply_target) = &msg.reply_target {
                plan.actions.push(SendAction {
                    destination,
                    payload: ForwardPayload::ReplyTarget(reply_target.message),
                });
            }

            if msg.is_noise() {
                debug!(
                    rule = rule.name.as_str(),
                    %destination,
                    "Suppressing a single-character message"
                );
                continue;
            }

            plan.actions.push(SendAction {
                destination,
                payload: ForwardPayload::Primary(msg.message),
            });
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::rules::tests::rule;
    use crate::forward::ForwardRuleConfig;
    use expect_test::{expect, Expect};

    fn rules(configs: &[ForwardRuleConfig]) -> RuleSet {
        RuleSet::from_config(configs).unwrap()
    }

    /// One rule: source 100, destinations [200], senders [5, 9]
    fn scenario_rules() -> RuleSet {
        rules(&[rule("news", 100, &[200], &[5, 9])])
    }

    fn message(chat: i64, sender: u64, text: &str) -> IncomingMessage {
        IncomingMessage {
            message: MessageRef {
                chat: ChatId(chat),
                id: MessageId(10),
            },
            sender: UserId(sender),
            text: text.to_owned(),
            reply_target: None,
        }
    }

    fn replying(mut msg: IncomingMessage, text: &str) -> IncomingMessage {
        msg.reply_target = Some(ReplyTarget {
            message: MessageRef {
                chat: msg.message.chat,
                id: MessageId(3),
            },
            text: text.to_owned(),
        });
        msg
    }

    /// Renders the plan as `destination <- payload` lines
    #[track_caller]
    fn assert_plan(rules: &RuleSet, msg: &IncomingMessage, expected: Expect) {
        let plan = plan(rules, msg);
        let actions = plan
            .actions
            .iter()
            .map(|action| {
                let (kind, msg) = match action.payload {
                    ForwardPayload::ReplyTarget(msg) => ("reply-target", msg),
                    ForwardPayload::Primary(msg) => ("primary", msg),
                };
                format!(
                    "{} <- {kind} {}/{}\n",
                    action.destination, msg.chat, msg.id.0
                )
            })
            .collect::<String>();

        let actual = format!(
            "matched: {}, activity: {}\n{actions}",
            plan.matched_rules,
            plan.is_activity()
        );
        expected.assert_eq(&actual);
    }

    #[test]
    fn allowed_sender_is_forwarded() {
        assert_plan(
            &scenario_rules(),
            &message(-100, 5, "hello"),
            expect![[r#"
                matched: 1, activity: true
                -200 <- primary -100/10
            "#]],
        );
    }

    #[test]
    fn disallowed_sender_is_ignored() {
        assert_plan(
            &scenario_rules(),
            &message(-100, 7, "hello"),
            expect![[r#"
                matched: 0, activity: false
            "#]],
        );
    }

    #[test]
    fn unwatched_chat_is_ignored() {
        // Positive id is the config magnitude, not the real group chat id
        for chat in [100, -101, -200] {
            assert_plan(
                &scenario_rules(),
                &message(chat, 5, "hello"),
                expect![[r#"
                    matched: 0, activity: false
                "#]],
            );
        }
    }

    #[test]
    fn single_code_point_is_suppressed() {
        for text in ["👍", "!", "я"] {
            assert_plan(
                &scenario_rules(),
                &message(-100, 5, text),
                expect![[r#"
                    matched: 1, activity: false
                "#]],
            );
        }
    }

    #[test]
    fn empty_and_multi_char_texts_are_forwarded() {
        // Media messages without text have zero length
        for text in ["", "ok", "👍👍"] {
            assert_plan(
                &scenario_rules(),
                &message(-100, 9, text),
                expect![[r#"
                    matched: 1, activity: true
                    -200 <- primary -100/10
                "#]],
            );
        }
    }

    #[test]
    fn reply_target_goes_before_primary() {
        assert_plan(
            &scenario_rules(),
            &replying(message(-100, 5, "ok"), "context"),
            expect![[r#"
                matched: 1, activity: true
                -200 <- reply-target -100/3
                -200 <- primary -100/10
            "#]],
        );
    }

    #[test]
    fn reply_target_is_sent_even_if_primary_is_suppressed() {
        assert_plan(
            &scenario_rules(),
            &replying(message(-100, 5, "👍"), "context"),
            expect![[r#"
                matched: 1, activity: true
                -200 <- reply-target -100/3
            "#]],
        );
    }

    #[test]
    fn destinations_are_notified_in_config_order() {
        let rules = rules(&[rule("fanout", 100, &[300, 200, 300], &[5])]);
        assert_plan(
            &rules,
            &replying(message(-100, 5, "news"), "context"),
            expect![[r#"
                matched: 1, activity: true
                -300 <- reply-target -100/3
                -300 <- primary -100/10
                -200 <- reply-target -100/3
                -200 <- primary -100/10
                -300 <- reply-target -100/3
                -300 <- primary -100/10
            "#]],
        );
    }

    #[test]
    fn rules_sharing_a_source_are_evaluated_independently() {
        let rules = rules(&[
            rule("first", 100, &[200, 300], &[5]),
            rule("other-source", 101, &[400], &[5]),
            rule("second", 100, &[300], &[5, 6]),
            rule("no-sender", 100, &[500], &[6]),
        ]);

        assert_plan(
            &rules,
            &message(-100, 5, "hello"),
            expect![[r#"
                matched: 2, activity: true
                -200 <- primary -100/10
                -300 <- primary -100/10
                -300 <- primary -100/10
            "#]],
        );

        assert_plan(
            &rules,
            &message(-100, 6, "hello"),
            expect![[r#"
                matched: 2, activity: true
                -300 <- primary -100/10
                -500 <- primary -100/10
            "#]],
        );
    }

    #[test_log::test]
    fn rules_of_other_sources_do_not_affect_the_plan() {
        let rules = rules(&[
            rule("elsewhere", 101, &[400], &[6]),
            rule("news", 100, &[200], &[5]),
        ]);

        assert_plan(
            &rules,
            &message(-100, 5, "hello"),
            expect![[r#"
                matched: 1, activity: true
                -200 <- primary -100/10
            "#]],
        );
    }

    #[test]
    fn planning_is_idempotent() {
        let rules = rules(&[
            rule("first", 100, &[200, 300], &[5]),
            rule("second", 100, &[300], &[5]),
        ]);
        let msg = replying(message(-100, 5, "hello"), "context");

        assert_eq!(plan(&rules, &msg), plan(&rules, &msg));
    }
}
