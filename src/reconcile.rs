//! Reconciliation verification for Marquee POS.
//!
//! Cross-checks that the independently computed views inside a
//! [`NightlyReport`] agree with each other within tolerance. This is a
//! diagnostic, not a gate: a failing report is still returned to the
//! caller, but every discrepancy is logged *and* handed back as structured
//! data so nothing can fail silently.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::classifier::AllocationBucket;
use crate::money::{add2, within_tolerance};
use crate::report::NightlyReport;

/// Which cross-check a discrepancy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileCheck {
    /// `cash_sales + card_sales` vs `total_sales`.
    PaymentMethodsVsTotal,
    /// Sum of department sales vs `total_sales`.
    DepartmentsVsTotal,
    /// Cash across department payment breakdowns vs `cash_sales`.
    CashAcrossDepartments,
    /// Card across department payment breakdowns vs `card_sales`.
    CardAcrossDepartments,
    /// Sum of show sales vs the box-office department's sales.
    ShowsVsBoxOffice,
}

/// One failed cross-check, with both sides and their delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub check: ReconcileCheck,
    pub expected: f64,
    pub actual: f64,
    pub delta: f64,
}

/// Outcome of verifying a report. `pass` is `true` iff no check failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub pass: bool,
    pub discrepancies: Vec<Discrepancy>,
}

fn run_check(
    check: ReconcileCheck,
    expected: f64,
    actual: f64,
    out: &mut Vec<Discrepancy>,
) {
    if !within_tolerance(expected, actual) {
        let d = Discrepancy {
            check,
            expected,
            actual,
            delta: actual - expected,
        };
        warn!(
            check = ?d.check,
            expected = d.expected,
            actual = d.actual,
            delta = d.delta,
            "reconciliation discrepancy"
        );
        out.push(d);
    }
}

/// Verify a nightly report's internal consistency.
///
/// Each check tolerates a difference of up to
/// [`RECONCILE_TOLERANCE`](crate::money::RECONCILE_TOLERANCE). The show
/// check only runs when box-office orders exist.
pub fn verify(report: &NightlyReport) -> VerificationResult {
    let mut discrepancies = Vec::new();

    run_check(
        ReconcileCheck::PaymentMethodsVsTotal,
        report.total_sales,
        add2(report.cash_sales, report.card_sales),
        &mut discrepancies,
    );

    let department_sales = report
        .department_breakdown
        .values()
        .fold(0.0, |acc, slot| add2(acc, slot.sales));
    run_check(
        ReconcileCheck::DepartmentsVsTotal,
        report.total_sales,
        department_sales,
        &mut discrepancies,
    );

    let (cash_across, card_across) = report
        .payment_breakdown
        .values()
        .fold((0.0, 0.0), |(cash, card), slot| {
            (add2(cash, slot.cash), add2(card, slot.card))
        });
    run_check(
        ReconcileCheck::CashAcrossDepartments,
        report.cash_sales,
        cash_across,
        &mut discrepancies,
    );
    run_check(
        ReconcileCheck::CardAcrossDepartments,
        report.card_sales,
        card_across,
        &mut discrepancies,
    );

    let box_office = report
        .department_breakdown
        .get(&AllocationBucket::BoxOffice)
        .copied()
        .unwrap_or_default();
    if box_office.orders > 0 {
        let show_sales = report
            .show_breakdown
            .values()
            .fold(0.0, |acc, slot| add2(acc, slot.sales));
        run_check(
            ReconcileCheck::ShowsVsBoxOffice,
            box_office.sales,
            show_sales,
            &mut discrepancies,
        );
    }

    VerificationResult {
        pass: discrepancies.is_empty(),
        discrepancies,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
