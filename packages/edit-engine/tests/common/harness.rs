//! Test harness over the in-memory store.
//!
//! Each test builds its own harness: a fresh store, a recording notifier and
//! a clock that only moves when the test moves it.

use chrono::{DateTime, Duration, TimeZone, Utc};
use edit_engine::config::{ConfigHandle, VotingConfig};
use edit_engine::domains::edits::{run_vote_tick, TickReport};
use edit_engine::kernel::{EngineDeps, MemoryEditStore, MockClock, MockNotifier};
use std::sync::Arc;

pub struct TestHarness {
    pub store: MemoryEditStore,
    pub notifier: MockNotifier,
    pub clock: MockClock,
    pub config: ConfigHandle,
    pub deps: EngineDeps,
}

/// Thresholds used throughout the tests: promotion 2, application 3,
/// 72h voting period, 24h destructive floor.
pub fn scenario_config() -> VotingConfig {
    VotingConfig {
        vote_promotion_threshold: 2,
        vote_application_threshold: 3,
        voting_period: std::time::Duration::from_secs(72 * 60 * 60),
        min_destructive_voting_period: std::time::Duration::from_secs(24 * 60 * 60),
        edit_update_limit: 1,
        max_apply_attempts: 3,
        transaction_timeout: std::time::Duration::from_secs(5),
        ..VotingConfig::default()
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(scenario_config())
    }

    pub fn with_config(config: VotingConfig) -> Self {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let store = MemoryEditStore::new();
        let notifier = MockNotifier::new();
        let clock = MockClock::new(start_time());
        let config = ConfigHandle::new(config);
        let deps = EngineDeps::new(
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
            Arc::new(clock.clone()),
            config.clone(),
        );

        Self {
            store,
            notifier,
            clock,
            config,
            deps,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use edit_engine::kernel::BaseClock;
        self.clock.now()
    }

    pub fn advance_hours(&self, hours: i64) -> DateTime<Utc> {
        self.clock.advance(Duration::hours(hours))
    }

    /// Run one scheduler tick at the clock's current time.
    pub async fn tick(&self) -> TickReport {
        run_vote_tick(&self.deps, self.now())
            .await
            .expect("vote tick failed")
    }
}
