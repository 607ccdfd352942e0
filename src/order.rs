//! Order data model for Marquee POS.
//!
//! Orders are append-only: once rung up, an order's line items, monetary
//! fields, and attribution never change. `subtotal`, `credit_card_fee`, and
//! `total` are stored at creation time (what the customer was actually
//! charged) and are never recomputed from the item snapshot during
//! reconciliation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::money::round2;

/// How an order was tendered. One order is paid once, in full, by one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Cash,
    Card,
}

/// Which physical terminal rang up the sale. Not necessarily where the
/// revenue is attributed; that is the classifier's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Department {
    BoxOffice,
    CandyCounter,
}

/// Show slot for box-office ticket sales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShowType {
    #[serde(rename = "1st-show")]
    FirstShow,
    #[serde(rename = "2nd-show")]
    SecondShow,
    #[serde(rename = "nightly-show")]
    NightlyShow,
    #[serde(rename = "matinee")]
    Matinee,
}

/// One line item, snapshotted at sale time. Prices and categories here are
/// frozen copies, not live catalog references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub category: String,
}

impl OrderItem {
    /// `unit_price * quantity`, rounded to 2 decimals.
    pub fn line_total(&self) -> f64 {
        round2(self.unit_price * f64::from(self.quantity))
    }
}

/// A point-of-sale transaction as persisted in the order log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Unique, creation-ordered identifier.
    pub id: String,
    pub items: Vec<OrderItem>,
    pub subtotal: f64,
    pub credit_card_fee: f64,
    /// `subtotal + credit_card_fee`, fixed at creation time.
    pub total: f64,
    /// Terminal-local wall-clock creation instant.
    pub timestamp: NaiveDateTime,
    pub payment_method: PaymentMethod,
    pub department: Department,
    /// Tickets sold through the candy-counter terminal after the box
    /// office has closed.
    #[serde(default)]
    pub is_after_closing: bool,
    pub user_id: String,
    pub user_name: String,
    /// Free text; unrecognized roles are tolerated and rank lowest.
    pub user_role: String,
    /// Only meaningful for box-office orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_type: Option<ShowType>,
}

impl Order {
    /// An order the reconciliation engine cannot book: no line items, or
    /// monetary fields that are non-finite or negative. Such orders are
    /// skipped and counted, never an error.
    pub fn is_malformed(&self) -> bool {
        self.items.is_empty()
            || !self.subtotal.is_finite()
            || !self.credit_card_fee.is_finite()
            || !self.total.is_finite()
            || self.total < 0.0
    }
}

/// Ranking used when one staff member appears under several roles in a
/// night's orders: admin > manager > staff > usher > anything else.
pub fn role_priority(role: &str) -> u8 {
    match role.trim().to_ascii_lowercase().as_str() {
        "admin" => 4,
        "manager" => 3,
        "staff" => 2,
        "usher" => 1,
        _ => 0,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
