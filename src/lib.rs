//! Marquee POS nightly sales reconciliation engine.
//!
//! Core backend for a theatre's tablet point-of-sale: takes the
//! append-only log of box-office and candy-counter transactions and
//! deterministically partitions, aggregates, and verifies them into a
//! nightly report broken down by department, show, payment method, and
//! staff member.
//!
//! The pipeline, leaf to root:
//! - [`calendar`] assigns every timestamp a business date (02:00 cutoff).
//! - [`classifier`] splits each order into department allocations,
//!   apportioning mixed ticket/concession orders by item subtotal share.
//! - [`report`] folds one business date's allocations into an immutable
//!   [`NightlyReport`].
//! - [`reconcile`] cross-checks the report's views against each other and
//!   reports every discrepancy as structured data.
//! - [`lifecycle`] snapshots each elapsed business day's report and prunes
//!   orders/snapshots past the retention window, via the [`store`]
//!   persistence boundary.
//!
//! UI rendering, authentication, printer handling, and cross-device sync
//! live outside this crate; it consumes orders as values and emits plain
//! data.

pub mod calendar;
pub mod classifier;
pub mod lifecycle;
pub mod money;
pub mod order;
pub mod reconcile;
pub mod report;
pub mod store;

pub use calendar::business_date_of;
pub use classifier::{classify, AllocationBucket, OrderAllocation, TicketCategories};
pub use lifecycle::{start_lifecycle_loop, LifecycleManager, LifecycleOutcome, RETENTION_DAYS};
pub use order::{Department, Order, OrderItem, PaymentMethod, ShowType};
pub use reconcile::{verify, Discrepancy, ReconcileCheck, VerificationResult};
pub use report::{aggregate, NightlyReport};
pub use store::{KvStore, MemoryOrderLog, MemoryStore, OrderLog, SqliteBackend, StoreError};
