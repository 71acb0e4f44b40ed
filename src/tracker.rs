//! Append-only usage event log, keyed by (user, session).
//!
//! Every metered call records the actual units and cost it incurred here.
//! The tracker explains how aggregate quota numbers came to be and feeds
//! projections; it never participates in the allow/deny decision.
//!
//! Per-session logs are bounded, and sessions idle past a configurable age
//! are evicted by a background sweep that never shares a lock with the
//! request path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Default cap on retained events per session.
pub const DEFAULT_EVENT_CAP: usize = 1_000;

/// Default idle age after which a session is evicted (24 hours).
pub fn default_max_idle() -> Duration {
    Duration::hours(24)
}

fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(6, RoundingStrategy::MidpointNearestEven)
}

/// One metered call. Immutable once written; a refund is a new event with
/// negated sign, never an edit of the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub provider: String,
    pub actor: String,
    pub units: f64,
    pub cost: Decimal,
}

impl UsageEvent {
    pub fn new(
        service: impl Into<String>,
        provider: impl Into<String>,
        actor: impl Into<String>,
        units: f64,
        cost: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            service: service.into(),
            provider: provider.into(),
            actor: actor.into(),
            units,
            cost,
        }
    }

    /// The reversing event for a refunded call.
    pub fn negated(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            service: self.service.clone(),
            provider: self.provider.clone(),
            actor: self.actor.clone(),
            units: -self.units,
            cost: -self.cost,
        }
    }
}

/// Accumulated units/cost/calls for one grouping key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub units: f64,
    pub cost: Decimal,
    pub calls: u64,
}

impl Breakdown {
    fn add(&mut self, event: &UsageEvent) {
        self.units += event.units;
        self.cost += event.cost;
        self.calls += 1;
    }
}

/// On-demand aggregate over one session's events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub user_id: String,
    pub session_id: String,
    pub total_units: f64,
    pub total_cost: Decimal,
    pub call_count: u64,
    pub by_service: HashMap<String, Breakdown>,
    pub by_actor: HashMap<String, Breakdown>,
    pub by_provider: HashMap<String, Breakdown>,
}

/// Aggregate across all of one user's sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserTotals {
    pub total_units: f64,
    pub total_cost: Decimal,
    pub call_count: u64,
    pub session_count: u64,
}

/// Aggregate across everything the tracker holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_units: f64,
    pub total_cost: Decimal,
    pub call_count: u64,
    pub session_count: u64,
    /// Highest-cost services first, at most ten.
    pub top_services: Vec<(String, Breakdown)>,
}

#[derive(Debug)]
struct SessionLog {
    user_id: String,
    session_id: String,
    last_activity: DateTime<Utc>,
    events: VecDeque<UsageEvent>,
}

/// Bounded, concurrently-writable usage event log.
#[derive(Debug)]
pub struct UsageTracker {
    sessions: DashMap<String, SessionLog>,
    event_cap: usize,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            event_cap: DEFAULT_EVENT_CAP,
        }
    }

    pub fn with_event_cap(mut self, cap: usize) -> Self {
        self.event_cap = cap.max(1);
        self
    }

    fn key(user_id: &str, session_id: &str) -> String {
        format!("{user_id}:{session_id}")
    }

    /// Append one event to a session's log, dropping the oldest entry when
    /// the cap is reached.
    pub fn record(&self, user_id: &str, session_id: &str, event: UsageEvent) {
        let key = Self::key(user_id, session_id);
        let mut log = self.sessions.entry(key).or_insert_with(|| SessionLog {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            last_activity: event.timestamp,
            events: VecDeque::new(),
        });

        log.last_activity = event.timestamp;
        debug!(
            user_id,
            session_id,
            service = %event.service,
            units = event.units,
            cost = %event.cost,
            "Usage event recorded"
        );
        log.events.push_back(event);
        while log.events.len() > self.event_cap {
            log.events.pop_front();
        }
    }

    /// Totals and by-service/actor/provider breakdowns for one session.
    /// An unseen session yields an all-zero summary.
    pub fn session_summary(&self, user_id: &str, session_id: &str) -> SessionSummary {
        let mut summary = SessionSummary {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            ..Default::default()
        };

        let Some(log) = self.sessions.get(&Self::key(user_id, session_id)) else {
            return summary;
        };

        for event in &log.events {
            summary.total_units += event.units;
            summary.total_cost += event.cost;
            summary.call_count += 1;
            summary
                .by_service
                .entry(event.service.clone())
                .or_default()
                .add(event);
            summary
                .by_actor
                .entry(event.actor.clone())
                .or_default()
                .add(event);
            summary
                .by_provider
                .entry(event.provider.clone())
                .or_default()
                .add(event);
        }
        summary.total_cost = round_cost(summary.total_cost);
        summary
    }

    /// Aggregate usage for one user across all their sessions.
    pub fn user_totals(&self, user_id: &str) -> UserTotals {
        let mut totals = UserTotals::default();
        for entry in self.sessions.iter() {
            if entry.user_id != user_id {
                continue;
            }
            totals.session_count += 1;
            for event in &entry.events {
                totals.total_units += event.units;
                totals.total_cost += event.cost;
                totals.call_count += 1;
            }
        }
        totals.total_cost = round_cost(totals.total_cost);
        totals
    }

    /// Tracker-wide totals plus the top services by cost.
    pub fn global_stats(&self) -> GlobalStats {
        let mut stats = GlobalStats::default();
        let mut by_service: HashMap<String, Breakdown> = HashMap::new();

        for entry in self.sessions.iter() {
            stats.session_count += 1;
            for event in &entry.events {
                stats.total_units += event.units;
                stats.total_cost += event.cost;
                stats.call_count += 1;
                by_service
                    .entry(event.service.clone())
                    .or_default()
                    .add(event);
            }
        }
        stats.total_cost = round_cost(stats.total_cost);

        let mut ranked: Vec<(String, Breakdown)> = by_service.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cost.cmp(&a.1.cost));
        ranked.truncate(10);
        stats.top_services = ranked;
        stats
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions idle longer than `max_idle`. Returns how many were
    /// evicted. Safe to skip or delay under load.
    pub fn evict_stale(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        // Counted inside the closure: a length snapshot taken around the
        // sweep can race with concurrent inserts.
        let mut evicted = 0usize;
        self.sessions.retain(|_, log| {
            let keep = log.last_activity >= cutoff;
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            info!(evicted, "Evicted stale usage sessions");
        }
        evicted
    }

    /// Run [`evict_stale`](Self::evict_stale) on a timer off the request
    /// path. The task ends on its own once the tracker is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: std::time::Duration,
        max_idle: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match tracker.upgrade() {
                    Some(tracker) => {
                        tracker.evict_stale(max_idle);
                    }
                    None => break,
                }
            }
        })
    }
}
