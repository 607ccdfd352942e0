//! Order classification for Marquee POS.
//!
//! Splits each order into its department contributions. Most orders map to
//! a single bucket; a candy-counter order that mixes tickets with
//! concessions ("mixed order") is split proportionally by item subtotal
//! share, with the card fee distributed in the same proportion. The split
//! divides *attribution* only: the order was still tendered once, in
//! full, by one method.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::money::round2;
use crate::order::{Department, Order, PaymentMethod, ShowType};

/// Category ids recognized as tickets on every terminal.
const BUILTIN_TICKET_CATEGORIES: &[&str] = &["ticket", "tickets", "box-office-ticket"];

/// The single owner of the "is this category a ticket?" question.
///
/// Custom ticket categories configured by the theatre are added here at
/// construction; nothing else in the engine compares category strings.
#[derive(Debug, Clone, Default)]
pub struct TicketCategories {
    custom: HashSet<String>,
}

impl TicketCategories {
    /// Built-in ticket categories only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in ticket categories plus the given custom category ids.
    pub fn with_custom<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            custom: ids
                .into_iter()
                .map(|s| s.into().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Register an additional custom ticket category id.
    pub fn add(&mut self, id: &str) {
        self.custom.insert(id.trim().to_ascii_lowercase());
    }

    pub fn is_ticket_category(&self, category: &str) -> bool {
        let normalized = category.trim().to_ascii_lowercase();
        BUILTIN_TICKET_CATEGORIES.contains(&normalized.as_str())
            || self.custom.contains(&normalized)
    }
}

/// Revenue bucket an allocation is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationBucket {
    BoxOffice,
    CandyCounterConcessions,
    AfterClosingTickets,
}

/// One order's contribution to one revenue bucket. Derived and ephemeral:
/// allocations are recomputed from the order log on every aggregation and
/// are never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAllocation {
    /// Source order, kept for per-order traceability.
    pub order_id: String,
    pub bucket: AllocationBucket,
    /// Subtotal share plus the proportional card-fee share.
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub user_id: String,
    pub user_name: String,
    pub user_role: String,
    /// Carried only on box-office allocations.
    pub show_type: Option<ShowType>,
}

fn allocation(
    order: &Order,
    bucket: AllocationBucket,
    amount: f64,
    show_type: Option<ShowType>,
) -> OrderAllocation {
    OrderAllocation {
        order_id: order.id.clone(),
        bucket,
        amount,
        payment_method: order.payment_method,
        user_id: order.user_id.clone(),
        user_name: order.user_name.clone(),
        user_role: order.user_role.clone(),
        show_type,
    }
}

/// Classify an order into one or two allocations.
///
/// The allocation amounts always sum to `order.total`: on a proportional
/// split the ticket portion is rounded to 2 decimals and the concessions
/// portion is the exact complement, never rounded independently.
///
/// An order with no items produces no allocations.
pub fn classify(order: &Order, tickets: &TicketCategories) -> Vec<OrderAllocation> {
    if order.items.is_empty() {
        return Vec::new();
    }

    match order.department {
        // The box office is ticket-only in practice, but the whole order is
        // attributed there regardless of item mix.
        Department::BoxOffice => vec![allocation(
            order,
            AllocationBucket::BoxOffice,
            order.total,
            order.show_type,
        )],
        Department::CandyCounter => classify_candy_counter(order, tickets),
    }
}

fn classify_candy_counter(order: &Order, tickets: &TicketCategories) -> Vec<OrderAllocation> {
    let mut ticket_subtotal = 0.0_f64;
    let mut non_ticket_subtotal = 0.0_f64;
    let mut has_tickets = false;
    let mut has_non_tickets = false;

    for item in &order.items {
        if tickets.is_ticket_category(&item.category) {
            has_tickets = true;
            ticket_subtotal += item.line_total();
        } else {
            has_non_tickets = true;
            non_ticket_subtotal += item.line_total();
        }
    }

    if !has_tickets {
        return vec![allocation(
            order,
            AllocationBucket::CandyCounterConcessions,
            order.total,
            None,
        )];
    }
    if !has_non_tickets {
        return vec![allocation(
            order,
            AllocationBucket::AfterClosingTickets,
            order.total,
            None,
        )];
    }

    let combined = ticket_subtotal + non_ticket_subtotal;
    if combined <= 0.0 {
        // All items priced at zero: nothing to apportion, treat the order
        // as un-splittable concessions revenue.
        return vec![allocation(
            order,
            AllocationBucket::CandyCounterConcessions,
            order.total,
            None,
        )];
    }

    let proportion = ticket_subtotal / combined;
    let ticket_fee = order.credit_card_fee * proportion;
    let ticket_amount = round2(ticket_subtotal + ticket_fee);
    // Complement of the rounded ticket portion, so the two always sum to
    // order.total exactly.
    let concession_amount = round2(order.total - ticket_amount);

    vec![
        allocation(
            order,
            AllocationBucket::AfterClosingTickets,
            ticket_amount,
            None,
        ),
        allocation(
            order,
            AllocationBucket::CandyCounterConcessions,
            concession_amount,
            None,
        ),
    ]
}

// ===========================================================================
// Tests
// ===========================================================================
