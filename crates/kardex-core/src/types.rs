//! # Domain Types
//!
//! Core domain types shared by the ledgers and the document service.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Catalog (referenced only)     Ledgers (append-only)                   │
//! │  ┌─────────────────┐           ┌──────────────────┐                    │
//! │  │ Product         │◄──────────│ StockMovement    │ ordinal, kind,     │
//! │  │ Supplier        │           │                  │ before → after     │
//! │  │ Client          │           └──────────────────┘                    │
//! │  └─────────────────┘           ┌──────────────────┐                    │
//! │  ┌─────────────────┐◄──────────│ CashMovement     │                    │
//! │  │ CashRegister    │           └──────────────────┘                    │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! │  Documents                                                              │
//! │  ┌─────────────────┐   ┌──────────────────┐                            │
//! │  │ SalesReceipt    │   │ PurchaseOrder    │                            │
//! │  │  Active→Voided  │   │  Pending→...     │                            │
//! │  │  + lines        │   │  + lines         │                            │
//! │  └─────────────────┘   └──────────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Monetary columns are `*_cents: i64` with `Money` accessors; stock
//! quantities are whole units in `i64`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so the Peruvian IGV of 18% is 1800 bps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate(crate::DEFAULT_TAX_RATE_BPS)
    }
}

// =============================================================================
// Acting User
// =============================================================================

/// The authenticated user on whose behalf an operation runs.
///
/// Supplied by the caller; recorded on every movement and document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct UserRef {
    pub id: String,
    pub name: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        UserRef {
            id: id.into(),
            name: name.into(),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A stocked product. `current_stock` is a cache of the stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub current_stock: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A supplier purchase orders are addressed to.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub tax_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A client sales receipts are issued to.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub document_number: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Movement Vocabulary
// =============================================================================

/// Which way a movement moves the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    /// The direction that undoes this one.
    pub fn reversed(&self) -> Direction {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }
}

/// Kind of a stock movement as stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockMovementKind {
    /// Goods received (purchase reception, void reversal).
    Inbound,
    /// Goods leaving (sales).
    Outbound,
    /// Manual correction in either direction.
    Adjustment,
    /// One leg of a transfer between two products/locations.
    Transfer,
}

impl StockMovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockMovementKind::Inbound => "inbound",
            StockMovementKind::Outbound => "outbound",
            StockMovementKind::Adjustment => "adjustment",
            StockMovementKind::Transfer => "transfer",
        }
    }
}

/// A direct stock change requested through `AppendStockMovement`.
///
/// Transfers are not in here; they always go through the paired
/// transfer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockChange {
    Inbound,
    Outbound,
    AdjustmentIn,
    AdjustmentOut,
}

impl StockChange {
    pub fn kind(&self) -> StockMovementKind {
        match self {
            StockChange::Inbound => StockMovementKind::Inbound,
            StockChange::Outbound => StockMovementKind::Outbound,
            StockChange::AdjustmentIn | StockChange::AdjustmentOut => {
                StockMovementKind::Adjustment
            }
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            StockChange::Inbound | StockChange::AdjustmentIn => Direction::In,
            StockChange::Outbound | StockChange::AdjustmentOut => Direction::Out,
        }
    }
}

/// Kind of a cash movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CashMovementKind {
    /// Money into the register.
    Credit,
    /// Money out of the register.
    Debit,
}

impl CashMovementKind {
    pub fn direction(&self) -> Direction {
        match self {
            CashMovementKind::Credit => Direction::In,
            CashMovementKind::Debit => Direction::Out,
        }
    }
}

/// What a movement points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    SalesReceipt,
    PurchaseOrder,
    Transfer,
}

/// Optional back-reference carried by a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MovementReference {
    pub reference_type: ReferenceType,
    pub reference_id: String,
}

impl MovementReference {
    pub fn new(reference_type: ReferenceType, reference_id: impl Into<String>) -> Self {
        MovementReference {
            reference_type,
            reference_id: reference_id.into(),
        }
    }
}

// =============================================================================
// Movements
// =============================================================================

/// One immutable row of a product's stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    /// Position in the product's ledger, starting at 1.
    pub ordinal: i64,
    pub kind: StockMovementKind,
    pub direction: Direction,
    /// Always positive; the sign is carried by `direction`.
    pub quantity: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<String>,
    pub concept: Option<String>,
    pub user_id: String,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

/// One immutable row of a cash register's ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashMovement {
    pub id: String,
    pub register_id: String,
    pub ordinal: i64,
    pub kind: CashMovementKind,
    pub amount_cents: i64,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<String>,
    pub concept: Option<String>,
    pub user_id: String,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

impl CashMovement {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    #[inline]
    pub fn balance_after(&self) -> Money {
        Money::from_cents(self.balance_after_cents)
    }
}

// =============================================================================
// Cash Register
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RegisterStatus {
    Open,
    Closed,
}

/// A cash register session. `current_balance_cents` caches the cash ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashRegister {
    pub id: String,
    pub name: String,
    pub status: RegisterStatus,
    pub opening_balance_cents: i64,
    pub current_balance_cents: i64,
    /// Cash physically counted at closing, if it was counted.
    pub counted_balance_cents: Option<i64>,
    pub opened_by: String,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    pub closed_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl CashRegister {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == RegisterStatus::Open
    }

    #[inline]
    pub fn current_balance(&self) -> Money {
        Money::from_cents(self.current_balance_cents)
    }

    /// Counted minus expected cash. `None` until the register is closed
    /// with a count.
    pub fn difference(&self) -> Option<Money> {
        self.counted_balance_cents
            .map(|counted| Money::from_cents(counted - self.current_balance_cents))
    }
}

// =============================================================================
// Document Statuses
// =============================================================================

/// Lifecycle of a sales receipt. `Voided` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SalesStatus {
    Active,
    Voided,
}

impl fmt::Display for SalesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SalesStatus::Active => "active",
            SalesStatus::Voided => "voided",
        })
    }
}

/// Lifecycle of a purchase order.
///
/// ```text
/// Pending ──approve──► Approved ──receive──────────► Received
///    │                    │                             ▲
///    │                    └─receive(partial)─► PartiallyReceived
///    └──cancel──► Cancelled                        └─receive─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    Approved,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl PurchaseStatus {
    pub fn can_approve(&self) -> bool {
        matches!(self, PurchaseStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, PurchaseStatus::Pending)
    }

    pub fn can_edit_lines(&self) -> bool {
        matches!(self, PurchaseStatus::Pending)
    }

    pub fn can_receive(&self) -> bool {
        matches!(
            self,
            PurchaseStatus::Approved | PurchaseStatus::PartiallyReceived
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseStatus::Received | PurchaseStatus::Cancelled)
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Approved => "approved",
            PurchaseStatus::PartiallyReceived => "partially_received",
            PurchaseStatus::Received => "received",
            PurchaseStatus::Cancelled => "cancelled",
        })
    }
}

// =============================================================================
// Sales Receipt
// =============================================================================

/// Header of an issued sales receipt.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalesReceipt {
    pub id: String,
    pub series: String,
    /// Zero-padded sequence within the series, e.g. `00000001`.
    pub number: String,
    pub client_id: String,
    pub cash_register_id: Option<String>,
    pub status: SalesStatus,
    pub lines_total_cents: i64,
    pub discount_cents: i64,
    pub subtotal_cents: i64,
    pub tax_rate_bps: u32,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub voided_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
}

impl SalesReceipt {
    /// Printed number, e.g. `F001-00000001`.
    pub fn document_number(&self) -> String {
        format!("{}-{}", self.series, self.number)
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalesReceiptLine {
    pub id: String,
    pub receipt_id: String,
    pub line_no: i64,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    /// `max(0, quantity * unit_price - discount)`.
    pub subtotal_cents: i64,
}

/// A sales receipt with its lines, in line order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalesReceiptDocument {
    pub receipt: SalesReceipt,
    pub lines: Vec<SalesReceiptLine>,
}

// =============================================================================
// Purchase Order
// =============================================================================

/// Header of a purchase order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PurchaseOrder {
    pub id: String,
    /// Full number, e.g. `OC-000001`.
    pub number: String,
    pub supplier_id: String,
    pub status: PurchaseStatus,
    pub lines_total_cents: i64,
    pub discount_cents: i64,
    pub subtotal_cents: i64,
    pub tax_rate_bps: u32,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub approved_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl PurchaseOrder {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PurchaseOrderLine {
    pub id: String,
    pub order_id: String,
    pub line_no: i64,
    pub product_id: String,
    pub quantity: i64,
    pub received_quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    pub subtotal_cents: i64,
}

impl PurchaseOrderLine {
    /// Units still expected from the supplier.
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.quantity - self.received_quantity
    }
}

/// A purchase order with its lines, in line order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PurchaseOrderDocument {
    pub order: PurchaseOrder,
    pub lines: Vec<PurchaseOrderLine>,
}

impl PurchaseOrderDocument {
    pub fn is_fully_received(&self) -> bool {
        self.lines.iter().all(|line| line.remaining() == 0)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// One requested document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentLineInput {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub discount_cents: i64,
}

impl DocumentLineInput {
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price_cents: i64) -> Self {
        DocumentLineInput {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
            discount_cents: 0,
        }
    }

    pub fn with_discount(mut self, discount_cents: i64) -> Self {
        self.discount_cents = discount_cents;
        self
    }
}

/// Input of `CreateSalesReceipt`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateSalesReceipt {
    pub series: String,
    pub client_id: String,
    pub lines: Vec<DocumentLineInput>,
    #[serde(default)]
    pub discount_cents: i64,
    /// Register credited with the receipt total, if paid in cash.
    #[serde(default)]
    pub cash_register_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Input of `CreatePurchaseOrder`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreatePurchaseOrder {
    pub supplier_id: String,
    pub lines: Vec<DocumentLineInput>,
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Quantity received against one purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineReceipt {
    pub line_id: String,
    pub quantity: i64,
}

/// What `ReceivePurchaseOrder` receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "mode", content = "lines", rename_all = "snake_case")]
pub enum Reception {
    /// Everything still outstanding on every line.
    All,
    /// Explicit quantities for some lines.
    Lines(Vec<LineReceipt>),
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(1800);
        assert_eq!(rate.bps(), 1800);
        assert!((rate.percentage() - 18.0).abs() < 0.001);
    }

    #[test]
    fn test_default_tax_rate_is_igv() {
        assert_eq!(TaxRate::default().bps(), 1800);
    }

    #[test]
    fn test_stock_change_mapping() {
        assert_eq!(StockChange::AdjustmentOut.kind(), StockMovementKind::Adjustment);
        assert_eq!(StockChange::AdjustmentOut.direction(), Direction::Out);
        assert_eq!(StockChange::Inbound.direction(), Direction::In);
        assert_eq!(CashMovementKind::Debit.direction(), Direction::Out);
    }

    #[test]
    fn test_purchase_status_transitions() {
        assert!(PurchaseStatus::Pending.can_approve());
        assert!(PurchaseStatus::Pending.can_cancel());
        assert!(!PurchaseStatus::Approved.can_cancel());
        assert!(!PurchaseStatus::PartiallyReceived.can_cancel());
        assert!(!PurchaseStatus::Pending.can_receive());
        assert!(PurchaseStatus::Approved.can_receive());
        assert!(PurchaseStatus::PartiallyReceived.can_receive());
        assert!(PurchaseStatus::Received.is_terminal());
        assert_eq!(PurchaseStatus::PartiallyReceived.to_string(), "partially_received");
    }

    #[test]
    fn test_reception_serialization() {
        let all = serde_json::to_value(Reception::All).unwrap();
        assert_eq!(all, serde_json::json!({"mode": "all"}));

        let partial: Reception = serde_json::from_value(serde_json::json!({
            "mode": "lines",
            "lines": [{"line_id": "l-1", "quantity": 2}]
        }))
        .unwrap();
        assert_eq!(
            partial,
            Reception::Lines(vec![LineReceipt {
                line_id: "l-1".to_string(),
                quantity: 2
            }])
        );
    }

    #[test]
    fn test_register_difference() {
        let now = Utc::now();
        let mut register = CashRegister {
            id: "r-1".to_string(),
            name: "Caja 1".to_string(),
            status: RegisterStatus::Closed,
            opening_balance_cents: 10_000,
            current_balance_cents: 12_500,
            counted_balance_cents: None,
            opened_by: "u-1".to_string(),
            opened_at: now,
            closed_by: Some("u-1".to_string()),
            closed_at: Some(now),
        };
        assert_eq!(register.difference(), None);

        register.counted_balance_cents = Some(12_000);
        assert_eq!(register.difference(), Some(Money::from_cents(-500)));
    }
}
