//! The clock service.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bulwark_core::{NodeId, Timestamp};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{ClockError, ClockResult};
use crate::source::{SystemTimeSource, TimeSource};

/// Largest forward drift accepted from a remote node by default (5 minutes).
pub const DEFAULT_MAX_DRIFT: Duration = Duration::from_secs(300);

/// Monotonic, drift-corrected timestamp authority.
///
/// Local timestamps are strictly increasing: each call to [`now`](Self::now)
/// returns at least one microsecond more than the previous one, regardless of
/// wall-clock steps. Offsets are stored per node in milliseconds as
/// `remote_clock - local_clock`.
pub struct ClockService {
    node: NodeId,
    source: Arc<dyn TimeSource>,
    last_micros: AtomicI64,
    offsets: DashMap<NodeId, i64>,
    max_drift_ms: i64,
}

impl std::fmt::Debug for ClockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockService")
            .field("node", &self.node)
            .field("last_micros", &self.last_micros.load(Ordering::Relaxed))
            .field("known_nodes", &self.offsets.len())
            .finish_non_exhaustive()
    }
}

impl ClockService {
    /// Create a clock over an arbitrary time source.
    #[must_use]
    pub fn new(node: NodeId, source: Arc<dyn TimeSource>) -> Self {
        Self {
            node,
            source,
            last_micros: AtomicI64::new(i64::MIN),
            offsets: DashMap::new(),
            max_drift_ms: i64::try_from(DEFAULT_MAX_DRIFT.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Create a clock over the host's wall clock.
    #[must_use]
    pub fn system(node: NodeId) -> Self {
        Self::new(node, Arc::new(SystemTimeSource))
    }

    /// Override the forward-drift limit applied by [`observe`](Self::observe).
    #[must_use]
    pub fn with_max_drift(mut self, max_drift: Duration) -> Self {
        self.max_drift_ms = i64::try_from(max_drift.as_millis()).unwrap_or(i64::MAX);
        self
    }

    /// This node's identity.
    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Next local timestamp, strictly greater than every one handed out
    /// or observed before.
    pub fn now(&self) -> Timestamp {
        let physical = self.source.now_micros();
        let mut current = self.last_micros.load(Ordering::SeqCst);
        loop {
            let next = physical.max(current.saturating_add(1));
            match self.last_micros.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    if next > physical {
                        debug!(
                            lag_us = next.saturating_sub(physical),
                            "physical clock behind logical floor"
                        );
                    }
                    return Timestamp::from_micros(next);
                },
                Err(actual) => current = actual,
            }
        }
    }

    /// Guarantee that every later [`now`](Self::now) sorts after `at`,
    /// e.g. the newest timestamp persisted before a restart.
    pub fn raise_floor(&self, at: Timestamp) {
        let previous = self.last_micros.fetch_max(at.as_micros(), Ordering::SeqCst);
        if previous < at.as_micros() {
            debug!(floor = %at, "raised clock floor");
        }
    }

    /// A deadline `after` from now.
    pub fn deadline(&self, after: Duration) -> Timestamp {
        self.now().saturating_add(after)
    }

    /// Whether `deadline` has passed by this clock.
    pub fn has_passed(&self, deadline: Timestamp) -> bool {
        self.now() >= deadline
    }

    /// Record the offset (milliseconds, `remote - local`) learned for `node`.
    pub fn set_offset(&self, node: NodeId, offset_ms: i64) {
        debug!(node = %node, offset_ms, "recorded clock offset");
        self.offsets.insert(node, offset_ms);
    }

    /// The recorded offset for `node`, if any.
    #[must_use]
    pub fn offset(&self, node: &NodeId) -> Option<i64> {
        self.offsets.get(node).map(|o| *o)
    }

    /// Translate a remote timestamp into local time by removing `offset_ms`.
    #[must_use]
    pub fn normalize(&self, remote: Timestamp, offset_ms: i64) -> Timestamp {
        let shift = offset_ms.saturating_mul(1000);
        Timestamp::from_micros(remote.as_micros().saturating_sub(shift))
    }

    /// [`normalize`](Self::normalize) using the offset recorded for `node`;
    /// unknown nodes are assumed to be in sync.
    #[must_use]
    pub fn normalize_from(&self, node: &NodeId, remote: Timestamp) -> Timestamp {
        let offset = self.offset(node).unwrap_or_else(|| {
            debug!(node = %node, "no offset recorded, assuming zero");
            0
        });
        self.normalize(remote, offset)
    }

    /// Normalize a remote event's timestamp and advance the local floor past
    /// it, so that anything stamped locally afterwards sorts after the event.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::ExcessiveDrift`] if the normalized timestamp is
    /// further ahead of physical time than the configured limit; the floor
    /// is left untouched in that case.
    pub fn observe(&self, node: &NodeId, remote: Timestamp) -> ClockResult<Timestamp> {
        let normalized = self.normalize_from(node, remote);
        let physical = self.source.now_micros();
        let drift_ms = normalized.as_micros().saturating_sub(physical) / 1000;
        if drift_ms > self.max_drift_ms {
            warn!(node = %node, drift_ms, "rejecting timestamp beyond drift limit");
            return Err(ClockError::ExcessiveDrift {
                node: node.clone(),
                drift_ms,
                max_ms: self.max_drift_ms,
            });
        }
        self.last_micros
            .fetch_max(normalized.as_micros(), Ordering::SeqCst);
        Ok(normalized)
    }
}
