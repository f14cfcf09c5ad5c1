//! Forwarding rule engine: which messages go where

mod decision;
mod membership;
mod rules;

pub(crate) use decision::*;
pub(crate) use membership::SortedSet;
pub(crate) use rules::{ForwardRuleConfig, RuleSet};
