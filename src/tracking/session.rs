use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use url::Url;

use crate::{daemon::storage::record_storage::RecordStorage, utils::clock::Clock};

use super::aggregator::Aggregator;

/// Tab the browser currently considers active.
#[cfg_attr(test, mockall::automock)]
pub trait FocusTarget {
    /// URL loaded in the target. Fails when the target can no longer be inspected, e.g. it was
    /// closed while being looked up.
    fn url(&self) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveFocus {
    pub domain: String,
    pub start: DateTime<Utc>,
}

/// What is being timed right now. A domain and its start instant only exist together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    active: Option<ActiveFocus>,
}

impl Session {
    pub fn focused_domain(&self) -> Option<&str> {
        self.active.as_ref().map(|v| v.domain.as_str())
    }

    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        self.active.as_ref().map(|v| v.start)
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }
}

/// Hostname of `url` when it is a web page. Everything else (extension pages, `file:`, `about:`)
/// does not count as focus.
pub fn focus_domain(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    match url.scheme() {
        "http" | "https" => url.host_str().map(str::to_string),
        _ => None,
    }
}

fn resolve_target(target: &dyn FocusTarget) -> Option<String> {
    match target.url() {
        Ok(Some(url)) => focus_domain(&url),
        Ok(None) => None,
        Err(e) => {
            warn!("Couldn't resolve focused target {e:?}");
            None
        }
    }
}

/// Owns the [Session] and turns focus changes into durations for the [Aggregator].
pub struct TimeAccumulator<S> {
    session: Session,
    aggregator: Aggregator<S>,
    clock: Arc<dyn Clock>,
}

impl<S: RecordStorage> TimeAccumulator<S> {
    pub fn new(aggregator: Aggregator<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            session: Session::default(),
            aggregator,
            clock,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn aggregator(&self) -> &Aggregator<S> {
        &self.aggregator
    }

    async fn record_until(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(active) = &self.session.active else {
            return Ok(());
        };
        self.aggregator
            .record_duration(&active.domain, now - active.start, active.start)
            .await
    }

    /// Closes the current session and starts timing `target`. The session moves on even if the
    /// closed part couldn't be saved; the storage error is still returned.
    pub async fn on_focus_change(&mut self, target: Option<&dyn FocusTarget>) -> Result<()> {
        let now = self.clock.time();
        let recorded = self
            .record_until(now)
            .await
            .inspect_err(|e| error!("Failed to save closed session {e:?}"));

        self.session.active = target
            .and_then(resolve_target)
            .map(|domain| ActiveFocus { domain, start: now });
        debug!("Focus is now {:?}", self.session.focused_domain());
        recorded
    }

    /// Saves time of the open session without closing it. If saving fails the start stays where
    /// it was, so the next flush covers the same time again.
    pub async fn on_periodic_flush(&mut self) -> Result<()> {
        let now = self.clock.time();
        self.record_until(now).await?;
        if let Some(active) = self.session.active.as_mut() {
            active.start = now;
        }
        Ok(())
    }
}
