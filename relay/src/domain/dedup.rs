//! Consumer-side duplicate-event detection.
//!
//! The broker delivers at least once: consumer rebalances and slow
//! acknowledgments redeliver events the consumer already processed. The
//! detector keeps a TTL-bounded "seen" set in the shared store, keyed by
//! event id, so side effects run once per event within the window.
//!
//! The window must exceed the maximum plausible redelivery delay. Too short
//! risks reprocessing genuine duplicates; too long wastes storage. It is a
//! tunable, not a derived constant.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ports::ExpiryStore;

/// Environment variable for the dedup window in hours.
pub const DEDUP_TTL_HOURS_ENV: &str = "DEDUP_TTL_HOURS";

/// Environment variable for the store-outage policy (`new` or `duplicate`).
pub const DEDUP_OUTAGE_POLICY_ENV: &str = "DEDUP_OUTAGE_POLICY";

/// Environment variable for the expiry jitter spread in seconds.
pub const DEDUP_TTL_JITTER_SECONDS_ENV: &str = "DEDUP_TTL_JITTER_SECONDS";

/// Environment abstraction for dedup configuration lookups.
///
/// Allows testing with a stub environment without unsafe env var mutation.
pub trait DedupEnv {
    /// Fetch a string value by name.
    fn string(&self, name: &str) -> Option<String>;
}

/// Environment access backed by the real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDedupEnv;

impl DedupEnv for DefaultDedupEnv {
    fn string(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// How the detector classifies an event when the seen-set store is down.
///
/// Neither answer is safe in general: treating unknown events as new risks
/// duplicate side effects, treating them as duplicates risks dropping
/// legitimate events. The choice is per-deployment configuration, never
/// inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutagePolicy {
    /// Fail open: admit the event and accept possible duplicate side
    /// effects. Suits handlers that are naturally idempotent.
    TreatAsNew,
    /// Fail closed: skip the event and rely on later redelivery once the
    /// store recovers.
    TreatAsDuplicate,
}

/// Classification of one inbound event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventNovelty {
    /// First sighting within the window; the caller applies side effects.
    New,
    /// Already seen; the caller must skip side effects.
    Duplicate,
}

/// Configuration for the duplicate-event detector.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    ttl: Duration,
    ttl_jitter: Duration,
    outage_policy: StoreOutagePolicy,
}

impl DedupConfig {
    /// Default window in hours.
    const DEFAULT_TTL_HOURS: u64 = 48;

    /// Minimum allowed window in hours.
    ///
    /// Prevents pathologically short windows that would expire before the
    /// broker's redelivery horizon.
    const MIN_TTL_HOURS: u64 = 1;

    /// Maximum allowed window in hours (30 days).
    const MAX_TTL_HOURS: u64 = 24 * 30;

    /// Load configuration from the real process environment.
    ///
    /// Reads `DEDUP_TTL_HOURS` (default 48, clamped to [1, 720]),
    /// `DEDUP_TTL_JITTER_SECONDS` (default 0, capped at the window), and
    /// `DEDUP_OUTAGE_POLICY` (`new` or `duplicate`, default `new`).
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(&DefaultDedupEnv)
    }

    /// Load configuration from a custom environment source.
    pub fn from_env_with(env: &impl DedupEnv) -> Self {
        let hours = env
            .string(DEDUP_TTL_HOURS_ENV)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_TTL_HOURS)
            .clamp(Self::MIN_TTL_HOURS, Self::MAX_TTL_HOURS);
        let ttl = Duration::from_secs(hours.saturating_mul(3600));
        let jitter_seconds = env
            .string(DEDUP_TTL_JITTER_SECONDS_ENV)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        // A spread wider than the window itself would dominate the expiry.
        let ttl_jitter = Duration::from_secs(jitter_seconds).min(ttl);
        let outage_policy = match env.string(DEDUP_OUTAGE_POLICY_ENV).as_deref() {
            Some("duplicate") => StoreOutagePolicy::TreatAsDuplicate,
            _ => StoreOutagePolicy::TreatAsNew,
        };
        Self {
            ttl,
            ttl_jitter,
            outage_policy,
        }
    }

    /// Create with an explicit window.
    #[must_use]
    pub const fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ttl_jitter: Duration::ZERO,
            outage_policy: StoreOutagePolicy::TreatAsNew,
        }
    }

    /// Spread entry expiry by up to `jitter` to avoid synchronized expiry
    /// load on the store.
    #[must_use]
    pub const fn with_ttl_jitter(mut self, jitter: Duration) -> Self {
        self.ttl_jitter = jitter;
        self
    }

    /// Set the store-outage policy.
    #[must_use]
    pub const fn with_outage_policy(mut self, policy: StoreOutagePolicy) -> Self {
        self.outage_policy = policy;
        self
    }

    /// The configured dedup window.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The configured expiry jitter spread.
    #[must_use]
    pub const fn ttl_jitter(&self) -> Duration {
        self.ttl_jitter
    }

    /// The configured store-outage policy.
    #[must_use]
    pub const fn outage_policy(&self) -> StoreOutagePolicy {
        self.outage_policy
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(Self::DEFAULT_TTL_HOURS * 3600),
            ttl_jitter: Duration::ZERO,
            outage_policy: StoreOutagePolicy::TreatAsNew,
        }
    }
}

/// Idempotency gate over the shared seen-set store.
pub struct DuplicateEventDetector {
    store: Arc<dyn ExpiryStore>,
    config: DedupConfig,
}

impl DuplicateEventDetector {
    /// Build a detector over the shared store.
    pub fn new(store: Arc<dyn ExpiryStore>, config: DedupConfig) -> Self {
        Self { store, config }
    }

    /// Classify `event_id` with a single atomic test-and-set.
    ///
    /// An absent key is set with the configured TTL in the same store
    /// operation that tested it, so concurrent deliveries of the same id
    /// yield exactly one `New`. Store outages are classified per the
    /// configured policy and logged at warning level.
    pub async fn is_new_event(&self, event_id: Uuid) -> EventNovelty {
        let key = seen_key(event_id);
        match self.store.set_if_absent(&key, self.entry_ttl()).await {
            Ok(true) => EventNovelty::New,
            Ok(false) => {
                debug!(%event_id, "duplicate event skipped");
                EventNovelty::Duplicate
            }
            Err(error) => {
                let novelty = match self.config.outage_policy() {
                    StoreOutagePolicy::TreatAsNew => EventNovelty::New,
                    StoreOutagePolicy::TreatAsDuplicate => EventNovelty::Duplicate,
                };
                warn!(
                    %event_id,
                    error = %error,
                    policy = ?self.config.outage_policy(),
                    "dedup store unreachable; applying outage policy"
                );
                novelty
            }
        }
    }

    /// Confirm successful processing of `event_id`, refreshing its TTL.
    ///
    /// Best effort: the test-and-set in [`Self::is_new_event`] already
    /// guards repeat side effects, so a failed refresh is only logged.
    pub async fn mark_processed(&self, event_id: Uuid) {
        let key = seen_key(event_id);
        if let Err(error) = self.store.refresh_expiry(&key, self.entry_ttl()).await {
            warn!(%event_id, error = %error, "failed to refresh dedup entry");
        }
    }

    /// Release the seen-set entry for `event_id` after a failed handler.
    ///
    /// Without this a failed event would stay classified as a duplicate for
    /// the whole window and its redeliveries would be silently skipped.
    /// Best effort: if the removal fails, the entry expires with its TTL
    /// and the event is lost until then, so the failure is logged loudly.
    pub async fn forget(&self, event_id: Uuid) {
        let key = seen_key(event_id);
        if let Err(error) = self.store.remove(&key).await {
            warn!(
                %event_id,
                error = %error,
                "failed to release dedup entry; redeliveries stay suppressed until it expires"
            );
        }
    }

    fn entry_ttl(&self) -> Duration {
        let jitter_ms = u64::try_from(self.config.ttl_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.config.ttl();
        }
        let extra = SmallRng::from_entropy().gen_range(0..=jitter_ms);
        self.config.ttl().saturating_add(Duration::from_millis(extra))
    }
}

fn seen_key(event_id: Uuid) -> String {
    format!("events:seen:{event_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ExpiryStoreError, MockExpiryStore};
    use crate::outbound::keyvalue::InMemoryExpiryStore;
    use crate::test_support::{test_instant, MutableClock};
    use mockable::Clock;
    use rstest::{fixture, rstest};

    const TTL: Duration = Duration::from_secs(48 * 3600);

    struct StubEnv(Vec<(&'static str, &'static str)>);

    impl DedupEnv for StubEnv {
        fn string(&self, name: &str) -> Option<String> {
            self.0
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_owned())
        }
    }

    #[fixture]
    fn clock() -> Arc<MutableClock> {
        Arc::new(MutableClock::new(test_instant()))
    }

    fn detector(store: Arc<dyn ExpiryStore>) -> DuplicateEventDetector {
        DuplicateEventDetector::new(store, DedupConfig::with_ttl(TTL))
    }

    #[rstest]
    #[tokio::test]
    async fn repeat_delivery_yields_one_new_then_duplicates(clock: Arc<MutableClock>) {
        let store = Arc::new(InMemoryExpiryStore::new(clock));
        let detector = detector(store);
        let event_id = Uuid::new_v4();

        assert_eq!(detector.is_new_event(event_id).await, EventNovelty::New);
        assert_eq!(
            detector.is_new_event(event_id).await,
            EventNovelty::Duplicate
        );
        assert_eq!(
            detector.is_new_event(event_id).await,
            EventNovelty::Duplicate
        );
    }

    #[rstest]
    #[tokio::test]
    async fn entry_expires_at_the_window_edge(clock: Arc<MutableClock>) {
        let store = Arc::new(InMemoryExpiryStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
        let detector = detector(store);
        let event_id = Uuid::new_v4();

        assert_eq!(detector.is_new_event(event_id).await, EventNovelty::New);

        clock.advance(TTL - Duration::from_secs(1));
        assert_eq!(
            detector.is_new_event(event_id).await,
            EventNovelty::Duplicate,
            "still inside the window"
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(
            detector.is_new_event(event_id).await,
            EventNovelty::New,
            "window elapsed; the id is new again"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn mark_processed_refreshes_the_window(clock: Arc<MutableClock>) {
        let store = Arc::new(InMemoryExpiryStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
        let detector = detector(store);
        let event_id = Uuid::new_v4();

        assert_eq!(detector.is_new_event(event_id).await, EventNovelty::New);

        clock.advance(TTL - Duration::from_secs(1));
        detector.mark_processed(event_id).await;

        // Past the original expiry but inside the refreshed window.
        clock.advance(Duration::from_secs(2));
        assert_eq!(
            detector.is_new_event(event_id).await,
            EventNovelty::Duplicate
        );
    }

    #[rstest]
    #[tokio::test]
    async fn forgotten_event_is_new_on_redelivery(clock: Arc<MutableClock>) {
        let store = Arc::new(InMemoryExpiryStore::new(clock));
        let detector = detector(store);
        let event_id = Uuid::new_v4();

        assert_eq!(detector.is_new_event(event_id).await, EventNovelty::New);
        detector.forget(event_id).await;
        assert_eq!(
            detector.is_new_event(event_id).await,
            EventNovelty::New,
            "released entry no longer suppresses the redelivery"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn forget_swallows_store_failures() {
        let mut store = MockExpiryStore::new();
        store
            .expect_remove()
            .returning(|_| Err(ExpiryStoreError::unavailable("connection refused")));
        let detector = DuplicateEventDetector::new(Arc::new(store), DedupConfig::with_ttl(TTL));

        detector.forget(Uuid::new_v4()).await;
    }

    #[rstest]
    #[tokio::test]
    async fn outage_policy_treat_as_new_admits_the_event() {
        let mut store = MockExpiryStore::new();
        store
            .expect_set_if_absent()
            .returning(|_, _| Err(ExpiryStoreError::unavailable("connection refused")));
        let detector = DuplicateEventDetector::new(
            Arc::new(store),
            DedupConfig::with_ttl(TTL).with_outage_policy(StoreOutagePolicy::TreatAsNew),
        );

        assert_eq!(
            detector.is_new_event(Uuid::new_v4()).await,
            EventNovelty::New
        );
    }

    #[rstest]
    #[tokio::test]
    async fn outage_policy_treat_as_duplicate_skips_the_event() {
        let mut store = MockExpiryStore::new();
        store
            .expect_set_if_absent()
            .returning(|_, _| Err(ExpiryStoreError::unavailable("connection refused")));
        let detector = DuplicateEventDetector::new(
            Arc::new(store),
            DedupConfig::with_ttl(TTL).with_outage_policy(StoreOutagePolicy::TreatAsDuplicate),
        );

        assert_eq!(
            detector.is_new_event(Uuid::new_v4()).await,
            EventNovelty::Duplicate
        );
    }

    #[rstest]
    fn config_defaults_to_forty_eight_hours() {
        let config = DedupConfig::default();
        assert_eq!(config.ttl(), Duration::from_secs(48 * 3600));
        assert_eq!(config.outage_policy(), StoreOutagePolicy::TreatAsNew);
    }

    #[rstest]
    fn config_env_values_are_clamped() {
        let config = DedupConfig::from_env_with(&StubEnv(vec![("DEDUP_TTL_HOURS", "0")]));
        assert_eq!(config.ttl(), Duration::from_secs(3600));

        let config = DedupConfig::from_env_with(&StubEnv(vec![("DEDUP_TTL_HOURS", "99999")]));
        assert_eq!(config.ttl(), Duration::from_secs(24 * 30 * 3600));
    }

    #[rstest]
    fn config_env_loads_the_jitter_spread() {
        let config = DedupConfig::from_env_with(&StubEnv(vec![(
            "DEDUP_TTL_JITTER_SECONDS",
            "900",
        )]));
        assert_eq!(config.ttl_jitter(), Duration::from_secs(900));

        // The spread never exceeds the window itself.
        let config = DedupConfig::from_env_with(&StubEnv(vec![
            ("DEDUP_TTL_HOURS", "1"),
            ("DEDUP_TTL_JITTER_SECONDS", "999999"),
        ]));
        assert_eq!(config.ttl_jitter(), Duration::from_secs(3600));

        let config = DedupConfig::from_env_with(&StubEnv(vec![]));
        assert_eq!(config.ttl_jitter(), Duration::ZERO);
    }

    #[rstest]
    fn jittered_entry_ttl_stays_within_the_spread() {
        let jitter = Duration::from_secs(900);
        let detector = DuplicateEventDetector::new(
            Arc::new(crate::domain::ports::FixtureExpiryStore),
            DedupConfig::with_ttl(TTL).with_ttl_jitter(jitter),
        );

        for _ in 0..32 {
            let ttl = detector.entry_ttl();
            assert!(ttl >= TTL && ttl <= TTL + jitter);
        }
    }

    #[rstest]
    fn config_env_selects_the_outage_policy() {
        let config = DedupConfig::from_env_with(&StubEnv(vec![("DEDUP_OUTAGE_POLICY", "duplicate")]));
        assert_eq!(config.outage_policy(), StoreOutagePolicy::TreatAsDuplicate);

        let config = DedupConfig::from_env_with(&StubEnv(vec![]));
        assert_eq!(config.outage_policy(), StoreOutagePolicy::TreatAsNew);
    }
}
