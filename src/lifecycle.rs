//! Report lifecycle management for Marquee POS.
//!
//! Once per elapsed business day, snapshots the previous day's nightly
//! report into the key/value store and prunes orders and snapshots older
//! than the retention window. All work funnels through a single
//! [`LifecycleManager::run_daily_tasks`] entry point guarded against
//! re-entrant runs, so a startup invocation and the background scheduler
//! can never both win the same daily transition.
//!
//! Persistence failures are caught, logged, and recorded for diagnostics;
//! the state markers stay unchanged on failure so the work is retried on
//! the next invocation. Nothing here ever panics or propagates an error to
//! the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{error, info, warn};

use crate::calendar::{business_date_minus_days, business_date_of};
use crate::classifier::TicketCategories;
use crate::reconcile::verify;
use crate::report::{aggregate, NightlyReport};
use crate::store::{KvStore, OrderLog, StoreError};

/// Days of orders and report snapshots kept before pruning.
pub const RETENTION_DAYS: u64 = 14;

const KEY_LAST_PROCESSED: &str = "last_processed_business_date";
const KEY_LAST_CLEAN: &str = "last_clean_business_date";
const KEY_RETAINED_DATES: &str = "retained_report_dates";
const KEY_LAST_ERROR: &str = "lifecycle_last_error";

fn snapshot_key(date: &str) -> String {
    format!("nightly_report:{date}")
}

/// Summary of one lifecycle run. Errors are reported here (and logged),
/// never propagated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleOutcome {
    /// Business date the run executed under.
    pub business_date: String,
    /// Date whose snapshot was persisted this run, if any.
    pub snapshot_written: Option<String>,
    pub pruned_orders: usize,
    pub pruned_snapshots: usize,
    /// `true` when another run was already in flight and this one bailed.
    pub skipped: bool,
    pub errors: Vec<String>,
}

/// Owns the daily snapshot/retention state machine over a [`KvStore`] and
/// an [`OrderLog`].
pub struct LifecycleManager {
    store: Arc<dyn KvStore>,
    orders: Arc<dyn OrderLog>,
    tickets: TicketCategories,
    retention_days: u64,
    running: AtomicBool,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        orders: Arc<dyn OrderLog>,
        tickets: TicketCategories,
    ) -> Self {
        Self {
            store,
            orders,
            tickets,
            retention_days: RETENTION_DAYS,
            running: AtomicBool::new(false),
        }
    }

    /// Override the retention window (tests and short-lived venues).
    pub fn with_retention_days(mut self, days: u64) -> Self {
        self.retention_days = days;
        self
    }

    /// Run the daily transition and retention cleanup for the business
    /// date containing `now`. Idempotent: safe to call on every app start
    /// and on every scheduler tick.
    pub async fn run_daily_tasks(&self, now: NaiveDateTime) -> LifecycleOutcome {
        let today = business_date_of(now);
        let mut outcome = LifecycleOutcome {
            business_date: today.clone(),
            ..LifecycleOutcome::default()
        };

        if self.running.swap(true, Ordering::SeqCst) {
            info!(business_date = %today, "lifecycle run already in flight, skipping");
            outcome.skipped = true;
            return outcome;
        }

        if let Err(e) = self.process_daily_transition(&today, &mut outcome).await {
            error!(error = %e, "daily transition failed; will retry next run");
            self.record_error("daily_transition", &e).await;
            outcome.errors.push(e.to_string());
        }
        if let Err(e) = self.run_retention_cleanup(&today, &mut outcome).await {
            error!(error = %e, "retention cleanup failed; will retry next run");
            self.record_error("retention_cleanup", &e).await;
            outcome.errors.push(e.to_string());
        }

        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    /// Snapshot the last processed business date's report once today's
    /// date has moved past it, then advance the marker. The marker is only
    /// written after the snapshot writes succeed.
    async fn process_daily_transition(
        &self,
        today: &str,
        outcome: &mut LifecycleOutcome,
    ) -> Result<(), StoreError> {
        match self.get_string(KEY_LAST_PROCESSED).await? {
            None => {
                // First run on this terminal: nothing elapsed to report.
                self.set_string(KEY_LAST_PROCESSED, today).await?;
                info!(business_date = %today, "lifecycle initialized");
            }
            Some(ref last) if last.as_str() == today => {}
            Some(previous) => {
                let orders = self.orders.load_all().await?;
                let report = aggregate(&orders, &previous, &self.tickets);

                let verification = verify(&report);
                if !verification.pass {
                    warn!(
                        date = %previous,
                        discrepancies = verification.discrepancies.len(),
                        "nightly report failed reconciliation; snapshotting anyway"
                    );
                }

                if report.is_empty() {
                    info!(date = %previous, "no activity for elapsed business day, skipping snapshot");
                } else {
                    self.persist_snapshot(&report).await?;
                    outcome.snapshot_written = Some(previous.clone());
                }

                self.set_string(KEY_LAST_PROCESSED, today).await?;
                info!(from = %previous, to = %today, "business day transition processed");
            }
        }
        Ok(())
    }

    async fn persist_snapshot(&self, report: &NightlyReport) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(report)?;
        self.store.set(&snapshot_key(&report.date), &bytes).await?;

        let mut dates = self.retained_dates().await?;
        if !dates.iter().any(|d| d == &report.date) {
            dates.push(report.date.clone());
            dates.sort();
            self.store
                .set(KEY_RETAINED_DATES, &serde_json::to_vec(&dates)?)
                .await?;
        }

        info!(
            date = %report.date,
            total_sales = report.total_sales,
            total_orders = report.total_orders,
            "nightly report snapshot persisted"
        );
        Ok(())
    }

    /// Prune orders and snapshots older than the retention cutoff, at most
    /// once per business day. A snapshot dated exactly at the cutoff is
    /// retained.
    async fn run_retention_cleanup(
        &self,
        today: &str,
        outcome: &mut LifecycleOutcome,
    ) -> Result<(), StoreError> {
        if self.get_string(KEY_LAST_CLEAN).await?.as_deref() == Some(today) {
            return Ok(());
        }

        let Some(cutoff) = business_date_minus_days(today, self.retention_days) else {
            warn!(business_date = %today, "cannot derive retention cutoff, skipping cleanup");
            return Ok(());
        };

        outcome.pruned_orders = self.orders.delete_older_than(&cutoff).await?;

        let dates = self.retained_dates().await?;
        let (expired, kept): (Vec<String>, Vec<String>) =
            dates.into_iter().partition(|d| d.as_str() < cutoff.as_str());
        for date in &expired {
            self.store.delete(&snapshot_key(date)).await?;
        }
        if !expired.is_empty() {
            self.store
                .set(KEY_RETAINED_DATES, &serde_json::to_vec(&kept)?)
                .await?;
        }
        outcome.pruned_snapshots = expired.len();

        self.set_string(KEY_LAST_CLEAN, today).await?;
        info!(
            cutoff = %cutoff,
            pruned_orders = outcome.pruned_orders,
            pruned_snapshots = outcome.pruned_snapshots,
            "retention cleanup complete"
        );
        Ok(())
    }

    /// Business dates with a persisted snapshot, ascending.
    pub async fn retained_dates(&self) -> Result<Vec<String>, StoreError> {
        match self.store.get(KEY_RETAINED_DATES).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Load the persisted snapshot for a business date, if present.
    pub async fn load_snapshot(&self, date: &str) -> Result<Option<NightlyReport>, StoreError> {
        match self.store.get(&snapshot_key(date)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The last recorded lifecycle failure, for diagnostics surfaces.
    pub async fn last_error(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get(KEY_LAST_ERROR)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Best-effort: a failing error record must not mask the original
    /// failure.
    async fn record_error(&self, operation: &str, err: &StoreError) {
        let record = serde_json::json!({
            "operation": operation,
            "error": err.to_string(),
            "at": chrono::Utc::now().to_rfc3339(),
        })
        .to_string();
        if let Err(e) = self.store.set(KEY_LAST_ERROR, record.as_bytes()).await {
            warn!(error = %e, "failed to record lifecycle error");
        }
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get(key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.store.set(key, value.as_bytes()).await
    }
}

// ---------------------------------------------------------------------------
// Background scheduler
// ---------------------------------------------------------------------------

/// Control handle for the background lifecycle loop.
pub struct SchedulerHandle {
    is_running: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the loop to stop after its current tick.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst) && !self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.stop();
        self.handle.abort();
    }
}

/// Spawn the lifecycle loop: one scheduled task that runs the idempotent
/// daily check every `interval`.
pub fn start_lifecycle_loop(
    manager: Arc<LifecycleManager>,
    interval: Duration,
) -> SchedulerHandle {
    let is_running = Arc::new(AtomicBool::new(true));
    let flag = is_running.clone();

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "lifecycle loop started");
        loop {
            if !flag.load(Ordering::SeqCst) {
                info!("lifecycle loop stopped");
                break;
            }

            let now = chrono::Local::now().naive_local();
            let outcome = manager.run_daily_tasks(now).await;
            if !outcome.errors.is_empty() {
                warn!(
                    errors = outcome.errors.len(),
                    business_date = %outcome.business_date,
                    "lifecycle run completed with errors"
                );
            }

            tokio::time::sleep(interval).await;
        }
    });

    SchedulerHandle { is_running, handle }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Department, Order, OrderItem, PaymentMethod, ShowType};
    use crate::store::{MemoryOrderLog, MemoryStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    fn at(date: &str, hour: u32) -> NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn ticket_order(id: &str, date: &str, hour: u32, total: f64) -> Order {
        Order {
            id: id.into(),
            items: vec![OrderItem {
                product_id: "tkt".into(),
                name: "Ticket".into(),
                quantity: 1,
                unit_price: total,
                category: "ticket".into(),
            }],
            subtotal: total,
            credit_card_fee: 0.0,
            total,
            timestamp: at(date, hour),
            payment_method: PaymentMethod::Cash,
            department: Department::BoxOffice,
            is_after_closing: false,
            user_id: "u1".into(),
            user_name: "Ada Lovelace".into(),
            user_role: "staff".into(),
            show_type: Some(ShowType::NightlyShow),
        }
    }

    fn manager_with(orders: Vec<Order>) -> (Arc<MemoryStore>, LifecycleManager) {
        let store = Arc::new(MemoryStore::new());
        let log = Arc::new(MemoryOrderLog::with_orders(orders));
        let manager =
            LifecycleManager::new(store.clone(), log, TicketCategories::new());
        (store, manager)
    }

    /// KvStore wrapper whose writes fail, for failure-path tests. The
    /// diagnostic error record is still allowed through.
    struct FailingWrites<S: KvStore> {
        inner: S,
    }

    #[async_trait]
    impl<S: KvStore> KvStore for FailingWrites<S> {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            if key == KEY_LAST_ERROR {
                return self.inner.set(key, value).await;
            }
            Err(StoreError::LockPoisoned)
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_first_run_seeds_marker_without_snapshot() {
        init_logging();
        let (_, manager) = manager_with(vec![ticket_order("o1", "2025-03-15", 20, 25.0)]);

        let outcome = manager.run_daily_tasks(at("2025-03-15", 21)).await;
        assert!(!outcome.skipped);
        assert_eq!(outcome.snapshot_written, None);
        assert!(manager.retained_dates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_daily_transition_snapshots_previous_date() {
        let (_, manager) = manager_with(vec![
            ticket_order("o1", "2025-03-15", 20, 25.0),
            // 01:30 next morning, same business day.
            ticket_order("o2", "2025-03-16", 1, 10.0),
        ]);

        manager.run_daily_tasks(at("2025-03-15", 21)).await;
        let outcome = manager.run_daily_tasks(at("2025-03-16", 9)).await;

        assert_eq!(outcome.snapshot_written.as_deref(), Some("2025-03-15"));
        assert_eq!(
            manager.retained_dates().await.unwrap(),
            vec!["2025-03-15".to_string()]
        );
        let snapshot = manager
            .load_snapshot("2025-03-15")
            .await
            .unwrap()
            .expect("snapshot persisted");
        assert_eq!(snapshot.total_orders, 2);
        assert_eq!(snapshot.total_sales, 35.0);
    }

    #[tokio::test]
    async fn test_daily_transition_is_idempotent() {
        let (_, manager) = manager_with(vec![ticket_order("o1", "2025-03-15", 20, 25.0)]);

        manager.run_daily_tasks(at("2025-03-15", 21)).await;
        let first = manager.run_daily_tasks(at("2025-03-16", 9)).await;
        let second = manager.run_daily_tasks(at("2025-03-16", 10)).await;

        assert_eq!(first.snapshot_written.as_deref(), Some("2025-03-15"));
        assert_eq!(second.snapshot_written, None);
        assert_eq!(second.pruned_orders, 0);
        assert_eq!(second.pruned_snapshots, 0);
        assert_eq!(manager.retained_dates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_day_writes_no_snapshot_but_advances() {
        let (_, manager) = manager_with(vec![]);

        manager.run_daily_tasks(at("2025-03-15", 21)).await;
        let outcome = manager.run_daily_tasks(at("2025-03-16", 9)).await;
        assert_eq!(outcome.snapshot_written, None);
        assert!(manager.retained_dates().await.unwrap().is_empty());

        // The marker advanced: re-running the same day does nothing more.
        let again = manager.run_daily_tasks(at("2025-03-16", 10)).await;
        assert!(again.errors.is_empty());
    }

    #[tokio::test]
    async fn test_retention_boundary() {
        // Today 2025-03-20, retention 14 days: cutoff is 2025-03-06.
        let (store, manager) = manager_with(vec![
            ticket_order("o-cutoff", "2025-03-06", 20, 10.0),
            ticket_order("o-older", "2025-03-05", 20, 10.0),
            ticket_order("o-recent", "2025-03-19", 20, 10.0),
        ]);

        // Seed retained snapshots on both sides of the cutoff.
        for date in ["2025-03-05", "2025-03-06"] {
            let report = NightlyReport {
                date: date.into(),
                total_sales: 10.0,
                total_orders: 1,
                ..NightlyReport::default()
            };
            store
                .set(&snapshot_key(date), &serde_json::to_vec(&report).unwrap())
                .await
                .unwrap();
        }
        store
            .set(
                KEY_RETAINED_DATES,
                &serde_json::to_vec(&vec!["2025-03-05", "2025-03-06"]).unwrap(),
            )
            .await
            .unwrap();

        let outcome = manager.run_daily_tasks(at("2025-03-20", 9)).await;

        // Strictly-older-than-cutoff pruned; exactly-at-cutoff retained.
        assert_eq!(outcome.pruned_orders, 1);
        assert_eq!(outcome.pruned_snapshots, 1);
        assert_eq!(
            manager.retained_dates().await.unwrap(),
            vec!["2025-03-06".to_string()]
        );
        assert!(manager.load_snapshot("2025-03-05").await.unwrap().is_none());
        assert!(manager.load_snapshot("2025-03-06").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_runs_at_most_once_per_day() {
        let (_, manager) = manager_with(vec![ticket_order("o-old", "2025-03-01", 20, 10.0)]);

        let first = manager.run_daily_tasks(at("2025-03-20", 9)).await;
        assert_eq!(first.pruned_orders, 1);

        let second = manager.run_daily_tasks(at("2025-03-20", 15)).await;
        assert_eq!(second.pruned_orders, 0);
    }

    #[tokio::test]
    async fn test_write_failure_leaves_markers_unchanged() {
        let store = Arc::new(FailingWrites {
            inner: MemoryStore::new(),
        });
        let log = Arc::new(MemoryOrderLog::with_orders(vec![ticket_order(
            "o1",
            "2025-03-15",
            20,
            25.0,
        )]));
        let manager = LifecycleManager::new(store.clone(), log, TicketCategories::new());

        let outcome = manager.run_daily_tasks(at("2025-03-15", 21)).await;
        assert!(!outcome.errors.is_empty());
        // Neither marker was persisted, so the next run retries both steps.
        assert!(store.get(KEY_LAST_PROCESSED).await.unwrap().is_none());
        assert!(store.get(KEY_LAST_CLEAN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_for_diagnostics() {
        let failing = Arc::new(FailingWrites {
            inner: MemoryStore::new(),
        });
        let log = Arc::new(MemoryOrderLog::new());
        let manager = LifecycleManager::new(failing, log, TicketCategories::new());

        let outcome = manager.run_daily_tasks(at("2025-03-15", 21)).await;
        assert_eq!(outcome.errors.len(), 2);
        let record = manager.last_error().await.unwrap().expect("error recorded");
        assert!(record.contains("retention_cleanup"));

        // A healthy manager records nothing.
        let (_, healthy) = manager_with(vec![]);
        healthy.run_daily_tasks(at("2025-03-15", 21)).await;
        assert!(healthy.last_error().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reentrancy_guard_skips_overlapping_run() {
        let (_, manager) = manager_with(vec![]);
        manager.running.store(true, Ordering::SeqCst);

        let outcome = manager.run_daily_tasks(at("2025-03-15", 21)).await;
        assert!(outcome.skipped);

        manager.running.store(false, Ordering::SeqCst);
        let outcome = manager.run_daily_tasks(at("2025-03-15", 21)).await;
        assert!(!outcome.skipped);
    }

    #[tokio::test]
    async fn test_scheduler_loop_runs_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let log = Arc::new(MemoryOrderLog::new());
        let manager = Arc::new(LifecycleManager::new(
            store.clone(),
            log,
            TicketCategories::new(),
        ));

        let handle = start_lifecycle_loop(manager, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_running());
        // The loop seeded the daily marker.
        assert!(store.get(KEY_LAST_PROCESSED).await.unwrap().is_some());

        handle.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_running());
    }
}
