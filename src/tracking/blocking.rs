use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::{form_urlencoded, Url};

use crate::daemon::storage::{
    entities::BlockList,
    record_storage::{put_record, take_record, RecordKey, RecordStorage},
};

/// Page inside the extension that blocked navigations are redirected to.
pub const BLOCKED_PAGE: &str = "/blocked.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    pub extension_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    Redirect { redirect: Redirect },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub request_domains: Vec<String>,
    pub resource_types: Vec<ResourceType>,
}

/// One request interception rule, in the browser's dynamic redirect rule format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

/// Path of the blocked page for `domain`, with the domain passed in the query.
pub fn blocked_page_path(domain: &str) -> String {
    let encoded = form_urlencoded::byte_serialize(domain.as_bytes()).collect::<String>();
    format!("{BLOCKED_PAGE}?domain={encoded}")
}

/// Full rule set for `block_list`. The consumer replaces all previous rules with these, so ids
/// always start from 1.
pub fn redirect_rules(block_list: &BlockList) -> Vec<RedirectRule> {
    block_list
        .iter()
        .zip(1..)
        .map(|(domain, id)| RedirectRule {
            id,
            priority: 1,
            action: RuleAction::Redirect {
                redirect: Redirect {
                    extension_path: blocked_page_path(domain),
                },
            },
            condition: RuleCondition {
                request_domains: vec![domain.to_string()],
                resource_types: vec![ResourceType::MainFrame],
            },
        })
        .collect()
}

/// Recognizes the extension's blocked page and returns the domain it was shown for.
pub fn blocked_domain_from_page(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    if !url.scheme().ends_with("-extension") || !url.path().contains("blocked.html") {
        return None;
    }
    url.query_pairs()
        .find(|(key, _)| key == "domain")
        .map(|(_, value)| value.into_owned())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockListUpdate {
    pub changed: bool,
    /// Present only when the list changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RedirectRule>>,
}

impl BlockListUpdate {
    fn unchanged() -> Self {
        Self {
            changed: false,
            rules: None,
        }
    }
}

/// Edits the persisted block list. Every effective edit is written immediately and answered with
/// the regenerated rule set.
pub struct BlockListService<S> {
    storage: S,
}

impl<S: RecordStorage> BlockListService<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub async fn load(&self) -> Result<BlockList> {
        let mut values = self.storage.get(&[RecordKey::BlockedSites]).await?;
        Ok(take_record(&mut values, RecordKey::BlockedSites)?)
    }

    /// Applies `edit` to the stored list in one locked update. `edit` returns whether it changed
    /// anything.
    async fn edit(&self, edit: impl FnOnce(&mut BlockList) -> bool) -> Result<BlockListUpdate> {
        let update = self
            .storage
            .update(&[RecordKey::BlockedSites], |values| {
                let mut block_list: BlockList = take_record(values, RecordKey::BlockedSites)?;
                if !edit(&mut block_list) {
                    return Ok(BlockListUpdate::unchanged());
                }
                put_record(values, RecordKey::BlockedSites, &block_list)?;
                Ok(BlockListUpdate {
                    changed: true,
                    rules: Some(redirect_rules(&block_list)),
                })
            })
            .await?;
        Ok(update)
    }

    /// Adds user input to the list. Empty input and duplicates leave the list untouched.
    pub async fn add(&self, raw: &str) -> Result<BlockListUpdate> {
        let update = self.edit(|block_list| block_list.add(raw)).await?;
        if update.changed {
            info!("Blocked {}", raw.trim());
        }
        Ok(update)
    }

    pub async fn remove(&self, domain: &str) -> Result<BlockListUpdate> {
        let update = self.edit(|block_list| block_list.remove(domain)).await?;
        if update.changed {
            info!("Unblocked {domain}");
        }
        Ok(update)
    }

    pub async fn rules(&self) -> Result<Vec<RedirectRule>> {
        Ok(redirect_rules(&self.load().await?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use serde_json::json;

    use super::{blocked_domain_from_page, blocked_page_path, redirect_rules, BlockListService};
    use crate::daemon::storage::{
        entities::BlockList,
        record_storage::{test_storage::FailingStore, MemoryStore},
    };

    #[test]
    fn test_rules_shape() -> Result<()> {
        let block_list: BlockList = ["a.com", "b.com"].into_iter().collect();
        let rules = redirect_rules(&block_list);
        assert_eq!(rules.len(), 2);
        assert_eq!(
            serde_json::to_value(&rules[1])?,
            json!({
                "id": 2,
                "priority": 1,
                "action": {
                    "type": "redirect",
                    "redirect": {"extensionPath": "/blocked.html?domain=b.com"}
                },
                "condition": {"requestDomains": ["b.com"], "resourceTypes": ["main_frame"]},
            })
        );
        Ok(())
    }

    #[test]
    fn test_blocked_page_path_is_encoded() {
        assert_eq!(
            blocked_page_path("a.com:8080&x"),
            "/blocked.html?domain=a.com%3A8080%26x"
        );
    }

    #[test]
    fn test_blocked_page_detection() {
        assert_eq!(
            blocked_domain_from_page("chrome-extension://abcdef/blocked.html?domain=a.com")
                .as_deref(),
            Some("a.com")
        );
        assert_eq!(
            blocked_domain_from_page("moz-extension://abcdef/blocked.html?domain=b.com")
                .as_deref(),
            Some("b.com")
        );
        assert_eq!(
            blocked_domain_from_page("https://a.com/blocked.html?domain=a.com"),
            None
        );
        assert_eq!(
            blocked_domain_from_page("chrome-extension://abcdef/options.html?domain=a.com"),
            None
        );
        assert_eq!(
            blocked_domain_from_page("chrome-extension://abcdef/blocked.html"),
            None
        );
    }

    #[tokio::test]
    async fn test_service_add_remove() -> Result<()> {
        let service = BlockListService::new(Arc::new(MemoryStore::new()));

        let update = service.add("https://Example.com/feed").await?;
        assert!(update.changed);
        assert_eq!(update.rules.as_ref().map(Vec::len), Some(1));

        assert!(!service.add("example.com").await?.changed);
        assert!(!service.add("   ").await?.changed);
        assert_eq!(service.load().await?.len(), 1);

        let update = service.remove("example.com").await?;
        assert!(update.changed);
        assert_eq!(update.rules, Some(vec![]));
        assert!(!service.remove("example.com").await?.changed);
        Ok(())
    }

    #[tokio::test]
    async fn test_service_reports_storage_errors() {
        let service = BlockListService::new(FailingStore);
        assert!(service.add("a.com").await.is_err());
    }
}
