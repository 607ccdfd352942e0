//! Nightly report aggregation for Marquee POS.
//!
//! Folds one business date's orders into a single immutable
//! [`NightlyReport`]: department, show, payment-method, and staff
//! breakdowns plus top-selling products, all consistent views over the same
//! order set. The headline totals (`total_sales`, `cash_sales`, ...) are
//! computed from the unsplit orders and serve as the ground truth the
//! allocation-derived breakdowns reconcile against.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calendar::business_date_of;
use crate::classifier::{classify, AllocationBucket, TicketCategories};
use crate::money::add2;
use crate::order::{role_priority, Department, Order, PaymentMethod};

/// How many products the `top_products` ranking keeps.
pub const TOP_PRODUCTS_LIMIT: usize = 10;

/// Staff names that mark seeded or placeholder accounts. Matching is exact
/// (case-insensitive, trimmed); a real surname that merely contains
/// "test" must not be filtered.
const USER_NAME_DENYLIST: &[&str] = &[
    "test user",
    "demo user",
    "guest user",
    "sample user",
    "placeholder user",
    "test",
    "demo",
];

/// Per-department sales and order counts.
///
/// A mixed order increments the order count of *two* departments: it
/// represents two lines of business activity. Revenue is never
/// double-counted; the two sales amounts are complementary splits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentSlot {
    pub sales: f64,
    pub orders: u32,
}

/// Per-department cash/card split of allocation amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSlot {
    pub cash: f64,
    pub card: f64,
}

/// Per-show aggregates, accumulated from unsplit box-office orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowSlot {
    pub sales: f64,
    pub orders: u32,
    pub cash_sales: f64,
    pub card_sales: f64,
    pub credit_card_fees: f64,
}

/// One staff member's whole-order totals for the night.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSales {
    pub user_id: String,
    pub user_name: String,
    pub user_role: String,
    pub sales: f64,
    pub orders: u32,
}

/// One product's sold quantity and revenue for the night.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub product_id: String,
    pub name: String,
    pub quantity_sold: u32,
    pub revenue: f64,
}

/// Immutable aggregate over one business date's orders.
///
/// Cheap to recompute on demand from the live order log; the lifecycle
/// manager snapshots one per elapsed business day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NightlyReport {
    /// Business date (`YYYY-MM-DD`) this report covers.
    pub date: String,
    pub total_sales: f64,
    pub total_orders: u32,
    pub cash_sales: f64,
    pub card_sales: f64,
    pub credit_card_fees: f64,
    pub department_breakdown: BTreeMap<AllocationBucket, DepartmentSlot>,
    pub show_breakdown: BTreeMap<crate::order::ShowType, ShowSlot>,
    pub payment_breakdown: BTreeMap<AllocationBucket, PaymentSlot>,
    pub user_breakdown: Vec<UserSales>,
    pub top_products: Vec<ProductSales>,
    /// Malformed orders excluded from every aggregate above.
    pub skipped_orders: u32,
}

impl NightlyReport {
    /// `true` when the business date had no bookable activity.
    pub fn is_empty(&self) -> bool {
        self.total_orders == 0 && self.total_sales == 0.0
    }
}

fn is_reportable_user_name(name: &str) -> bool {
    let normalized = name.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return false;
    }
    if USER_NAME_DENYLIST.contains(&normalized.as_str()) {
        return false;
    }
    // Bare numeric ids sometimes end up in the name field; not a real user.
    !normalized.chars().all(|c| c.is_ascii_digit())
}

struct UserAcc {
    user_name: String,
    role: String,
    priority: u8,
    sales: f64,
    orders: u32,
}

struct ProductAcc {
    name: String,
    quantity: u32,
    revenue: f64,
}

/// Aggregate `orders` falling on `business_date` into a [`NightlyReport`].
///
/// Orders outside the business date are ignored; malformed orders inside it
/// are skipped and counted in `skipped_orders`. Every monetary accumulation
/// is rounded to 2 decimals after each addition.
pub fn aggregate(
    orders: &[Order],
    business_date: &str,
    tickets: &TicketCategories,
) -> NightlyReport {
    let mut report = NightlyReport {
        date: business_date.to_string(),
        ..NightlyReport::default()
    };

    let mut users: HashMap<String, UserAcc> = HashMap::new();
    let mut products: HashMap<String, ProductAcc> = HashMap::new();

    for order in orders {
        if business_date_of(order.timestamp) != business_date {
            continue;
        }
        if order.is_malformed() {
            warn!(order_id = %order.id, "skipping malformed order in nightly aggregation");
            report.skipped_orders += 1;
            continue;
        }

        // Ground-truth totals from the unsplit order.
        report.total_sales = add2(report.total_sales, order.total);
        report.total_orders += 1;
        report.credit_card_fees = add2(report.credit_card_fees, order.credit_card_fee);
        match order.payment_method {
            PaymentMethod::Cash => report.cash_sales = add2(report.cash_sales, order.total),
            PaymentMethod::Card => report.card_sales = add2(report.card_sales, order.total),
        }

        // Department and payment breakdowns from allocations.
        for alloc in classify(order, tickets) {
            let dept = report.department_breakdown.entry(alloc.bucket).or_default();
            dept.sales = add2(dept.sales, alloc.amount);
            dept.orders += 1;

            let pay = report.payment_breakdown.entry(alloc.bucket).or_default();
            match alloc.payment_method {
                PaymentMethod::Cash => pay.cash = add2(pay.cash, alloc.amount),
                PaymentMethod::Card => pay.card = add2(pay.card, alloc.amount),
            }
        }

        // Show breakdown is box-office-only, so it never needs splitting.
        if order.department == Department::BoxOffice {
            if let Some(show) = order.show_type {
                let slot = report.show_breakdown.entry(show).or_default();
                slot.sales = add2(slot.sales, order.total);
                slot.orders += 1;
                slot.credit_card_fees = add2(slot.credit_card_fees, order.credit_card_fee);
                match order.payment_method {
                    PaymentMethod::Cash => slot.cash_sales = add2(slot.cash_sales, order.total),
                    PaymentMethod::Card => slot.card_sales = add2(slot.card_sales, order.total),
                }
            }
        }

        // Staff attribution is whole-order: a cashier is measured by the
        // transactions they processed, not by departmental revenue share.
        let user = users
            .entry(order.user_id.clone())
            .or_insert_with(|| UserAcc {
                user_name: order.user_name.clone(),
                role: order.user_role.clone(),
                priority: role_priority(&order.user_role),
                sales: 0.0,
                orders: 0,
            });
        user.sales = add2(user.sales, order.total);
        user.orders += 1;
        let priority = role_priority(&order.user_role);
        if priority > user.priority {
            user.priority = priority;
            user.role = order.user_role.clone();
        }

        for item in &order.items {
            let product = products
                .entry(item.product_id.clone())
                .or_insert_with(|| ProductAcc {
                    name: item.name.clone(),
                    quantity: 0,
                    revenue: 0.0,
                });
            product.quantity += item.quantity;
            product.revenue = add2(product.revenue, item.line_total());
        }
    }

    report.user_breakdown = users
        .into_iter()
        .filter(|(_, acc)| acc.sales > 0.0 && is_reportable_user_name(&acc.user_name))
        .map(|(user_id, acc)| UserSales {
            user_id,
            user_name: acc.user_name,
            user_role: acc.role,
            sales: acc.sales,
            orders: acc.orders,
        })
        .collect();
    report
        .user_breakdown
        .sort_by(|a, b| b.sales.total_cmp(&a.sales).then_with(|| a.user_id.cmp(&b.user_id)));

    report.top_products = products
        .into_iter()
        .filter(|(_, acc)| acc.revenue > 0.0)
        .map(|(product_id, acc)| ProductSales {
            product_id,
            name: acc.name,
            quantity_sold: acc.quantity,
            revenue: acc.revenue,
        })
        .collect();
    report.top_products.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    report.top_products.truncate(TOP_PRODUCTS_LIMIT);

    debug!(
        date = %report.date,
        total_orders = report.total_orders,
        total_sales = report.total_sales,
        skipped = report.skipped_orders,
        "nightly report aggregated"
    );

    report
}

// ===========================================================================
// Tests
// ===========================================================================
