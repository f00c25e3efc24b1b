//! Authorizers
//!
//! [`Authorizer`] implementations used by the CLI and tests.

use crate::domain::path;
use crate::domain::{Action, Authorizer, RequestContext};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Grants every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _ctx: &RequestContext, _path: &str, _action: Action) -> Result<bool> {
        Ok(true)
    }
}

/// A deny rule. Unset user or action fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyRule {
    #[serde(default)]
    pub user: Option<String>,
    pub prefix: String,
    #[serde(default)]
    pub action: Option<Action>,
}

impl DenyRule {
    fn matches(&self, ctx: &RequestContext, target: &str, action: Action) -> bool {
        self.user.as_deref().map_or(true, |u| u == ctx.user)
            && self.action.map_or(true, |a| a == action)
            && path::is_within(&self.prefix, target)
    }
}

/// Grants everything not covered by a deny rule
#[derive(Debug, Clone, Default)]
pub struct PrefixAuthorizer {
    rules: Vec<DenyRule>,
}

impl PrefixAuthorizer {
    pub fn new(rules: Vec<DenyRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|mut r| {
                r.prefix = path::normalize(&r.prefix);
                r
            })
            .collect();
        Self { rules }
    }

    /// Deny `user` every action under `prefix`
    pub fn deny(mut self, user: impl Into<String>, prefix: &str) -> Self {
        self.rules.push(DenyRule {
            user: Some(user.into()),
            prefix: path::normalize(prefix),
            action: None,
        });
        self
    }
}

#[async_trait]
impl Authorizer for PrefixAuthorizer {
    async fn authorize(&self, ctx: &RequestContext, raw_path: &str, action: Action) -> Result<bool> {
        let target = path::normalize(path::resource_part(raw_path));
        Ok(!self.rules.iter().any(|r| r.matches(ctx, &target, action)))
    }
}
