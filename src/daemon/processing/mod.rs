use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    daemon::{
        host::messages::{HostRequest, MessageTarget},
        storage::record_storage::RecordStorage,
    },
    tracking::{
        aggregator::Aggregator,
        blocking::{blocked_domain_from_page, BlockListService},
        config::{store_match_rule, MatchRule, TrackerConfig},
        pruner::Pruner,
        query::UsageQueries,
        session::TimeAccumulator,
    },
    utils::clock::Clock,
};

const CHANNEL_CAPACITY: usize = 16;

/// Number of sites the popup shows when the request doesn't say.
const DEFAULT_TOP_SITES: usize = 3;

pub struct TrackerRequest {
    request: HostRequest,
    reply: oneshot::Sender<Result<Value>>,
}

/// Cloneable way to talk to a running [TrackerModule].
#[derive(Clone)]
pub struct TrackerHandle {
    sender: mpsc::Sender<TrackerRequest>,
}

impl TrackerHandle {
    /// Queues `request` and waits until the tracker has handled it.
    pub async fn request(&self, request: HostRequest) -> Result<Value> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(TrackerRequest { request, reply })
            .await
            .map_err(|_| anyhow!("Tracker is not running"))?;
        receiver
            .await
            .map_err(|_| anyhow!("Tracker stopped before replying"))?
    }
}

/// Owner of the session and the only writer of the store inside the host. Requests and both
/// timers are handled one at a time, so read-modify-write cycles on the tables never interleave.
pub struct TrackerModule<S> {
    storage: Arc<S>,
    receiver: mpsc::Receiver<TrackerRequest>,
    accumulator: TimeAccumulator<Arc<S>>,
    pruner: Pruner<Arc<S>>,
    block_list: BlockListService<Arc<S>>,
    queries: UsageQueries<Arc<S>>,
    clock: Arc<dyn Clock>,
    match_rule: MatchRule,
    flush_interval: Duration,
    prune_interval: Duration,
    shutdown: CancellationToken,
}

impl<S: RecordStorage> TrackerModule<S> {
    pub fn new(
        storage: Arc<S>,
        config: &TrackerConfig,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> (TrackerHandle, Self) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let aggregator = Aggregator::new(storage.clone(), clock.clone(), config.hour_split);
        let module = Self {
            storage: storage.clone(),
            receiver,
            accumulator: TimeAccumulator::new(aggregator, clock.clone()),
            pruner: Pruner::new(
                storage.clone(),
                clock.clone(),
                config.keep_top,
                config.match_rule,
                config.retention_days,
            ),
            block_list: BlockListService::new(storage.clone()),
            queries: UsageQueries::new(storage, clock.clone(), config.match_rule),
            clock,
            match_rule: config.match_rule,
            flush_interval: config.flush_interval(),
            prune_interval: config.prune_interval(),
            shutdown,
        };
        (TrackerHandle { sender }, module)
    }

    async fn handle(&mut self, request: HostRequest) -> Result<Value> {
        match request {
            HostRequest::FocusChanged { url, error } => {
                let target = MessageTarget { url, error };
                self.accumulator.on_focus_change(Some(&target)).await?;
                Ok(Value::Null)
            }
            HostRequest::FocusLost => {
                self.accumulator.on_focus_change(None).await?;
                Ok(Value::Null)
            }
            HostRequest::PageLoaded { url } => match blocked_domain_from_page(&url) {
                Some(domain) => {
                    self.accumulator
                        .aggregator()
                        .record_blocked_attempt(&domain)
                        .await?;
                    Ok(json!({ "blockedDomain": domain }))
                }
                None => Ok(Value::Null),
            },
            HostRequest::RecordBlockedAttempt { domain } => {
                self.accumulator
                    .aggregator()
                    .record_blocked_attempt(&domain)
                    .await?;
                Ok(Value::Null)
            }
            HostRequest::AddBlockedSite { domain } => {
                Ok(serde_json::to_value(self.block_list.add(&domain).await?)?)
            }
            HostRequest::RemoveBlockedSite { domain } => {
                Ok(serde_json::to_value(self.block_list.remove(&domain).await?)?)
            }
            HostRequest::GetRules => Ok(serde_json::to_value(self.block_list.rules().await?)?),
            HostRequest::TopSites { n } => {
                let today = self.queries.today();
                let sites = self
                    .queries
                    .top_sites(today, n.unwrap_or(DEFAULT_TOP_SITES))
                    .await?;
                Ok(serde_json::to_value(sites)?)
            }
            HostRequest::AttemptHeatmap => {
                let today = self.queries.today();
                Ok(serde_json::to_value(self.queries.attempt_heatmap(today).await?)?)
            }
            HostRequest::SiteProfile { domain } => {
                let today = self.queries.today();
                let profile = self.queries.site_hourly_profile(today, &domain).await?;
                Ok(serde_json::to_value(profile)?)
            }
            HostRequest::BlockedAttemptCounts => {
                let today = self.queries.today();
                let counts = self.queries.blocked_attempt_counts(today).await?;
                Ok(serde_json::to_value(counts)?)
            }
            HostRequest::Flush => {
                self.accumulator.on_periodic_flush().await?;
                Ok(Value::Null)
            }
            HostRequest::Prune => {
                let report = self.pruner.run_scheduled().await?;
                Ok(json!({ "sites": report.sites, "days": report.days }))
            }
        }
    }

    /// Executes the tracker event loop until shutdown or until every [TrackerHandle] is dropped.
    pub async fn run(mut self) -> Result<()> {
        if let Err(e) = store_match_rule(&self.storage, self.match_rule).await {
            error!("Failed to store the match rule {e:?}");
        }
        if let Err(e) = self.pruner.run_scheduled().await {
            error!("Startup pruning failed {e:?}");
        }

        let mut next_flush = self.clock.instant() + self.flush_interval;
        let mut next_prune = self.clock.instant() + self.prune_interval;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break
                }
                message = self.receiver.recv() => {
                    let Some(TrackerRequest { request, reply }) = message else {
                        break
                    };
                    let span = info_span!("Handling request", kind = request.kind());
                    debug!(parent: &span, "Handling {request:?}");
                    let result = self.handle(request).instrument(span).await;
                    if let Err(e) = &result {
                        warn!("Request failed {e:?}");
                    }
                    if reply.send(result).is_err() {
                        warn!("Requester went away before the reply");
                    }
                }
                _ = self.clock.sleep_until(next_flush) => {
                    next_flush += self.flush_interval;
                    if let Err(e) = self.accumulator.on_periodic_flush().await {
                        error!("Periodic flush failed {e:?}");
                    }
                }
                _ = self.clock.sleep_until(next_prune) => {
                    next_prune += self.prune_interval;
                    if let Err(e) = self.pruner.run_scheduled().await {
                        error!("Scheduled pruning failed {e:?}");
                    }
                }
            }
        }

        // Whatever was focused until now would otherwise be lost.
        if let Err(e) = self.accumulator.on_periodic_flush().await {
            error!("Final flush failed {e:?}");
        }
        self.receiver.close();
        info!("Tracker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use super::{TrackerHandle, TrackerModule};
    use crate::{
        daemon::{
            host::messages::HostRequest,
            storage::record_storage::{test_storage::FailingStore, MemoryStore},
        },
        tracking::config::{stored_match_rule, MatchRule, TrackerConfig},
        utils::{clock::test_clock::ManualClock, logging::TEST_LOGGING},
    };

    fn clock() -> ManualClock {
        ManualClock::at_local(NaiveDateTime::new(
            NaiveDate::from_ymd_opt(2025, 3, 7).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        ))
    }

    fn focus(url: &str) -> HostRequest {
        HostRequest::FocusChanged {
            url: Some(url.into()),
            error: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_serialized() -> Result<()> {
        *TEST_LOGGING;
        let clock = clock();
        let shutdown = CancellationToken::new();
        let (handle, module) = TrackerModule::new(
            Arc::new(MemoryStore::new()),
            &TrackerConfig::default(),
            Arc::new(clock.clone()),
            shutdown.clone(),
        );

        let script = async move {
            handle.request(focus("https://a.com/")).await?;
            clock.advance(chrono::Duration::seconds(90));
            handle.request(focus("https://b.com/")).await?;

            // Concurrent writers on the same table must not lose updates.
            let attempts = (0..5).map(|_| {
                let handle: TrackerHandle = handle.clone();
                async move {
                    handle
                        .request(HostRequest::RecordBlockedAttempt {
                            domain: "blocked.com".into(),
                        })
                        .await
                }
            });
            for result in futures::future::join_all(attempts).await {
                result?;
            }

            handle
                .request(HostRequest::AddBlockedSite {
                    domain: "blocked.com".into(),
                })
                .await?;
            let top = handle.request(HostRequest::TopSites { n: None }).await?;
            let counts = handle.request(HostRequest::BlockedAttemptCounts).await?;
            let heatmap = handle.request(HostRequest::AttemptHeatmap).await?;
            shutdown.cancel();
            anyhow::Ok((top, counts, heatmap))
        };

        let (run_result, script_result) = tokio::join!(module.run(), script);
        run_result?;
        let (top, counts, heatmap) = script_result?;

        assert_eq!(top, json!([{"domain": "a.com", "time": 90_000}]));
        assert_eq!(counts, json!([{"domain": "blocked.com", "count": 5}]));
        assert_eq!(heatmap[9], json!(5));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_focused_site() -> Result<()> {
        let clock = clock();
        let shutdown = CancellationToken::new();
        let config = TrackerConfig::default();
        let flush_interval = config.flush_interval();
        let (handle, module) = TrackerModule::new(
            Arc::new(MemoryStore::new()),
            &config,
            Arc::new(clock.clone()),
            shutdown.clone(),
        );

        let script = async move {
            handle.request(focus("https://a.com/")).await?;
            clock.advance(chrono::Duration::minutes(3));
            tokio::time::sleep(flush_interval + Duration::from_secs(1)).await;
            let top = handle.request(HostRequest::TopSites { n: Some(10) }).await?;
            shutdown.cancel();
            anyhow::Ok(top)
        };

        let (run_result, top) = tokio::join!(module.run(), script);
        run_result?;
        assert_eq!(top?, json!([{"domain": "a.com", "time": 180_000}]));
        Ok(())
    }

    #[tokio::test]
    async fn test_match_rule_is_stored_for_other_processes() -> Result<()> {
        let storage = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let config = TrackerConfig {
            match_rule: MatchRule::Suffix,
            ..TrackerConfig::default()
        };
        let (_handle, module) =
            TrackerModule::new(storage.clone(), &config, Arc::new(clock()), shutdown.clone());

        shutdown.cancel();
        module.run().await?;
        assert_eq!(stored_match_rule(&storage).await?, MatchRule::Suffix);
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_errors_reach_the_caller() -> Result<()> {
        let shutdown = CancellationToken::new();
        let (handle, module) = TrackerModule::new(
            Arc::new(FailingStore),
            &TrackerConfig::default(),
            Arc::new(clock()),
            shutdown.clone(),
        );

        let script = async move {
            let result = handle
                .request(HostRequest::RecordBlockedAttempt {
                    domain: "a.com".into(),
                })
                .await;
            let page = handle
                .request(HostRequest::PageLoaded {
                    url: "https://a.com/".into(),
                })
                .await;
            drop(handle);
            (result, page)
        };

        let (run_result, (result, page)) = tokio::join!(module.run(), script);
        run_result?;
        assert!(result.is_err());
        // Not the blocked page, so the store is never touched.
        assert_eq!(page?, Value::Null);
        assert!(!shutdown.is_cancelled());
        Ok(())
    }
}
