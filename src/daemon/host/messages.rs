use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tracking::session::FocusTarget;

/// Messages the extension sends to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostRequest {
    /// The active tab changed or finished loading. `error` is set when the extension couldn't
    /// read the tab.
    FocusChanged {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    /// The browser window lost focus or the active tab was closed.
    FocusLost,
    /// Any tab finished loading. Used to spot the blocked page.
    PageLoaded { url: String },
    RecordBlockedAttempt { domain: String },
    AddBlockedSite { domain: String },
    RemoveBlockedSite { domain: String },
    GetRules,
    TopSites {
        #[serde(default)]
        n: Option<usize>,
    },
    AttemptHeatmap,
    SiteProfile { domain: String },
    BlockedAttemptCounts,
    Flush,
    Prune,
}

impl HostRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            HostRequest::FocusChanged { .. } => "focusChanged",
            HostRequest::FocusLost => "focusLost",
            HostRequest::PageLoaded { .. } => "pageLoaded",
            HostRequest::RecordBlockedAttempt { .. } => "recordBlockedAttempt",
            HostRequest::AddBlockedSite { .. } => "addBlockedSite",
            HostRequest::RemoveBlockedSite { .. } => "removeBlockedSite",
            HostRequest::GetRules => "getRules",
            HostRequest::TopSites { .. } => "topSites",
            HostRequest::AttemptHeatmap => "attemptHeatmap",
            HostRequest::SiteProfile { .. } => "siteProfile",
            HostRequest::BlockedAttemptCounts => "blockedAttemptCounts",
            HostRequest::Flush => "flush",
            HostRequest::Prune => "prune",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl HostReply {
    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            data: Value::Null,
        }
    }
}

impl From<Result<Value>> for HostReply {
    fn from(value: Result<Value>) -> Self {
        match value {
            Ok(data) => Self {
                success: true,
                error: None,
                data,
            },
            Err(e) => Self::failure(format!("{e:#}")),
        }
    }
}

/// Focus target described by a [HostRequest::FocusChanged] message.
pub struct MessageTarget {
    pub url: Option<String>,
    pub error: Option<String>,
}

impl FocusTarget for MessageTarget {
    fn url(&self) -> Result<Option<String>> {
        match &self.error {
            Some(error) => Err(anyhow!("Extension couldn't read the tab: {error}")),
            None => Ok(self.url.clone()),
        }
    }
}
