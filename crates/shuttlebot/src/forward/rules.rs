use super::membership::SortedSet;
use crate::config::ConfigError;
use crate::prelude::*;
use crate::{err, Result};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use teloxide::types::{ChatId, UserId};

/// Forwarding rule as it is written in the config file
#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct ForwardRuleConfig {
    pub(crate) name: String,

    /// Positive magnitude of the watched group chat id
    pub(crate) from: i64,

    /// Positive magnitudes of the destination chat ids. Older configs
    /// stored them as strings, so both forms are accepted.
    #[serde_as(as = "Vec<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub(crate) to: Vec<i64>,

    /// IDs of the users whose messages trigger forwarding
    #[serde(default)]
    pub(crate) user: Vec<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct ForwardRule {
    pub(crate) name: String,
    pub(crate) source_chat: ChatId,
    pub(crate) destinations: Vec<ChatId>,
    allowed_senders: SortedSet<u64>,
}

impl ForwardRule {
    pub(crate) fn allows(&self, sender: UserId) -> bool {
        self.allowed_senders.contains(&sender.0)
    }
}

/// All forwarding rules of the bot. Built once at startup and never mutated.
#[derive(Debug)]
pub(crate) struct RuleSet {
    rules: Vec<ForwardRule>,
    watched_sources: SortedSet<i64>,
}

impl RuleSet {
    pub(crate) fn from_config(configs: &[ForwardRuleConfig]) -> Result<Self> {
        let rules = configs
            .iter()
            .map(ForwardRule::from_config)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(rules))
    }

    fn new(rules: Vec<ForwardRule>) -> Self {
        let watched_sources = rules.iter().map(|rule| rule.source_chat.0).collect();
        Self {
            rules,
            watched_sources,
        }
    }

    pub(crate) fn rules(&self) -> &[ForwardRule] {
        &self.rules
    }

    /// Whether the chat isn't a source of any rule
    pub(crate) fn ignores(&self, chat: ChatId) -> bool {
        self.watched_sources.lacks(&chat.0)
    }

    pub(crate) fn watched_sources(&self) -> impl Iterator<Item = ChatId> + '_ {
        self.watched_sources.iter().copied().map(ChatId)
    }
}

impl ForwardRule {
    fn from_config(config: &ForwardRuleConfig) -> Result<Self> {
        let source_chat = group_chat_id(&config.name, config.from)?;

        let destinations = config
            .to
            .iter()
            .map(|&magnitude| group_chat_id(&config.name, magnitude))
            .collect::<Result<Vec<_>>>()?;

        let allowed_senders = SortedSet::new(config.user.clone());

        if allowed_senders.is_empty() {
            warn!(
                rule = config.name.as_str(),
                "Forwarding rule has no allowed senders, it will never fire"
            );
        }

        if destinations.is_empty() {
            warn!(
                rule = config.name.as_str(),
                "Forwarding rule has no destinations, it will never forward anything"
            );
        }

        Ok(Self {
            name: config.name.clone(),
            source_chat,
            destinations,
            allowed_senders,
        })
    }
}

/// Telegram represents group chats with negative ids, while the config
/// stores their positive magnitude.
fn group_chat_id(rule: &str, magnitude: i64) -> Result<ChatId> {
    if magnitude <= 0 {
        return Err(err!(ConfigError::InvalidChat {
            rule: rule.to_owned(),
            value: magnitude,
        }));
    }
    Ok(ChatId(-magnitude))
}
