//! # Document Service
//!
//! Sales receipts and purchase orders, each operation one atomic unit:
//! number, header, lines and every ledger movement commit together or not
//! at all.
//!
//! ## Sales Receipt
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate request ──► compute totals (pure)                            │
//! │       │                                                                 │
//! │  BEGIN ▼                                                                │
//! │  allocate number (claims the series lock)                              │
//! │  check client, products, register                                      │
//! │  INSERT receipt + lines                                                │
//! │  per line: stock Outbound      insufficient ──► ROLLBACK (number too)  │
//! │  cash register? Credit(total)                                          │
//! │  COMMIT                                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Purchase Order Lifecycle
//! ```text
//! Pending ──approve──► Approved ──receive──► PartiallyReceived ──► Received
//!    │                                │ (partial)        │ (rest)
//!    └──cancel──► Cancelled           └──────────────────┘
//! ```
//! Lines can only be replaced while `Pending`. Every reception appends one
//! `Inbound` movement per received line.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LedgerSettings;
use crate::error::LedgerResult;
use crate::repository::cash::{self, CashEntry};
use crate::repository::stock::{self, StockEntry};
use crate::repository::{catalog, locks, purchase, sale, sequence};
use kardex_core::validation::{validate_id, validate_note, validate_quantity};
use kardex_core::{
    compute_document_totals, CashMovementKind, CoreError, CreatePurchaseOrder, CreateSalesReceipt,
    Direction, DocumentLineInput, DocumentTotals, MovementReference, PurchaseOrder,
    PurchaseOrderDocument, PurchaseOrderLine, PurchaseStatus, Reception, ReferenceType,
    SalesReceipt, SalesReceiptDocument, SalesReceiptLine, SalesStatus, SequenceScope,
    StockMovementKind, TaxRate, UserRef, ValidationError,
};

const SALES_RECEIPT: &str = "SalesReceipt";
const PURCHASE_ORDER: &str = "PurchaseOrder";

/// Creates and transitions ledger-backed documents.
#[derive(Debug, Clone)]
pub struct DocumentService {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl DocumentService {
    pub fn new(pool: SqlitePool, settings: LedgerSettings) -> Self {
        DocumentService { pool, settings }
    }

    /// Tax rate applied to new documents.
    pub fn tax_rate(&self) -> TaxRate {
        self.settings.tax_rate
    }

    // =========================================================================
    // Sales Receipts
    // =========================================================================

    /// Issues a sales receipt: number, stock outbound per line and, when a
    /// register is given, a cash credit of the total.
    ///
    /// ## Errors
    /// - `Validation` for malformed input (nothing touched)
    /// - `ReferencedEntityNotFound` for an unknown client, product or register
    /// - `RegisterClosed` if the register session is closed
    /// - `InsufficientStock` if any line cannot be served
    ///
    /// On any error no receipt exists, no number is consumed and no
    /// movement is written.
    pub async fn create_sales_receipt(
        &self,
        request: &CreateSalesReceipt,
        user: &UserRef,
    ) -> LedgerResult<SalesReceiptDocument> {
        let scope = SequenceScope::sales(&request.series)?;
        validate_id("client_id", &request.client_id)?;
        if let Some(register_id) = request.cash_register_id.as_deref() {
            validate_id("cash_register_id", register_id)?;
        }
        validate_note("notes", request.notes.as_deref())?;
        validate_line_products(&request.lines)?;

        let totals =
            compute_document_totals(&request.lines, request.discount_cents, self.settings.tax_rate)?;

        self.settings
            .retry
            .run("documents.create_sales_receipt", || {
                self.create_sales_receipt_once(request, user, &scope, &totals)
            })
            .await
    }

    async fn create_sales_receipt_once(
        &self,
        request: &CreateSalesReceipt,
        user: &UserRef,
        scope: &SequenceScope,
        totals: &DocumentTotals,
    ) -> LedgerResult<SalesReceiptDocument> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4().to_string();

        let number = sequence::allocate(&mut *tx, scope, Some(&id)).await?;

        if !catalog::client_exists(&mut *tx, &request.client_id).await? {
            return Err(CoreError::missing_reference("Client", "client_id", &request.client_id).into());
        }
        ensure_products(&mut *tx, &request.lines).await?;

        if let Some(register_id) = request.cash_register_id.as_deref() {
            let register = cash::fetch_register(&mut *tx, register_id)
                .await?
                .ok_or_else(|| {
                    CoreError::missing_reference("CashRegister", "cash_register_id", register_id)
                })?;
            if !register.is_open() {
                return Err(CoreError::RegisterClosed {
                    register_id: register_id.to_string(),
                }
                .into());
            }
        }

        let now = Utc::now();
        let receipt = SalesReceipt {
            id: id.clone(),
            series: request.series.clone(),
            number: number.formatted.clone(),
            client_id: request.client_id.clone(),
            cash_register_id: request.cash_register_id.clone(),
            status: SalesStatus::Active,
            lines_total_cents: totals.lines_total.cents(),
            discount_cents: totals.discount.cents(),
            subtotal_cents: totals.subtotal.cents(),
            tax_rate_bps: totals.tax_rate.bps(),
            tax_cents: totals.tax.cents(),
            total_cents: totals.total.cents(),
            notes: request.notes.clone(),
            created_by: user.id.clone(),
            created_at: now,
            voided_by: None,
            voided_at: None,
            void_reason: None,
        };

        let lines: Vec<SalesReceiptLine> = request
            .lines
            .iter()
            .zip(&totals.line_subtotals)
            .enumerate()
            .map(|(index, (line, subtotal))| SalesReceiptLine {
                id: Uuid::new_v4().to_string(),
                receipt_id: id.clone(),
                line_no: index as i64 + 1,
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                discount_cents: line.discount_cents,
                subtotal_cents: subtotal.cents(),
            })
            .collect();

        sale::insert_receipt(&mut *tx, &receipt).await?;
        sale::insert_lines(&mut *tx, &lines).await?;

        let reference = MovementReference::new(ReferenceType::SalesReceipt, &id);
        let concept = format!("Sale {}", number);

        for line in &lines {
            stock::append_in_tx(
                &mut *tx,
                &StockEntry {
                    product_id: &line.product_id,
                    kind: StockMovementKind::Outbound,
                    direction: Direction::Out,
                    quantity: line.quantity,
                    reference: Some(&reference),
                    concept: Some(&concept),
                    user,
                },
            )
            .await?;
        }

        if let Some(register_id) = receipt.cash_register_id.as_deref() {
            if totals.total.is_positive() {
                cash::append_in_tx(
                    &mut *tx,
                    &CashEntry {
                        register_id,
                        kind: CashMovementKind::Credit,
                        amount: totals.total,
                        reference: Some(&reference),
                        concept: Some(&concept),
                        user,
                    },
                )
                .await?;
            }
        }

        tx.commit().await?;

        info!(
            id = %receipt.id,
            number = %number,
            lines = lines.len(),
            total = %totals.total,
            user = %user.name,
            "Sales receipt issued"
        );

        Ok(SalesReceiptDocument { receipt, lines })
    }

    /// Voids a receipt and reverses its effects: one `Inbound` per line
    /// and, if it was paid into a register, a `Debit` of the total.
    ///
    /// The register must still be open and hold enough cash.
    pub async fn void_sales_receipt(
        &self,
        receipt_id: &str,
        reason: Option<&str>,
        user: &UserRef,
    ) -> LedgerResult<SalesReceiptDocument> {
        validate_id("receipt_id", receipt_id)?;
        validate_note("reason", reason)?;

        self.settings
            .retry
            .run("documents.void_sales_receipt", || {
                self.void_sales_receipt_once(receipt_id, reason, user)
            })
            .await
    }

    async fn void_sales_receipt_once(
        &self,
        receipt_id: &str,
        reason: Option<&str>,
        user: &UserRef,
    ) -> LedgerResult<SalesReceiptDocument> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::document_key(SALES_RECEIPT, receipt_id)).await?;

        let mut receipt = sale::fetch_receipt(&mut *tx, receipt_id)
            .await?
            .ok_or_else(|| CoreError::document_not_found(SALES_RECEIPT, receipt_id))?;

        if receipt.status == SalesStatus::Voided {
            return Err(CoreError::not_editable(
                SALES_RECEIPT,
                receipt_id,
                receipt.status.to_string(),
                "void",
            )
            .into());
        }

        let lines = sale::fetch_lines(&mut *tx, receipt_id).await?;
        let reference = MovementReference::new(ReferenceType::SalesReceipt, receipt_id);
        let concept = format!("Void {}", receipt.document_number());

        for line in &lines {
            stock::append_in_tx(
                &mut *tx,
                &StockEntry {
                    product_id: &line.product_id,
                    kind: StockMovementKind::Inbound,
                    direction: Direction::In,
                    quantity: line.quantity,
                    reference: Some(&reference),
                    concept: Some(&concept),
                    user,
                },
            )
            .await?;
        }

        if let Some(register_id) = receipt.cash_register_id.as_deref() {
            if receipt.total().is_positive() {
                cash::append_in_tx(
                    &mut *tx,
                    &CashEntry {
                        register_id,
                        kind: CashMovementKind::Debit,
                        amount: receipt.total(),
                        reference: Some(&reference),
                        concept: Some(&concept),
                        user,
                    },
                )
                .await?;
            }
        }

        let now = Utc::now();
        sale::mark_voided(&mut *tx, receipt_id, &user.id, reason, now).await?;
        tx.commit().await?;

        receipt.status = SalesStatus::Voided;
        receipt.voided_by = Some(user.id.clone());
        receipt.voided_at = Some(now);
        receipt.void_reason = reason.map(str::to_string);

        info!(
            id = %receipt.id,
            number = %receipt.document_number(),
            user = %user.name,
            "Sales receipt voided"
        );

        Ok(SalesReceiptDocument { receipt, lines })
    }

    pub async fn get_sales_receipt(&self, receipt_id: &str) -> LedgerResult<SalesReceiptDocument> {
        validate_id("receipt_id", receipt_id)?;
        let mut conn = self.pool.acquire().await?;

        let receipt = sale::fetch_receipt(&mut conn, receipt_id)
            .await?
            .ok_or_else(|| CoreError::document_not_found(SALES_RECEIPT, receipt_id))?;
        let lines = sale::fetch_lines(&mut conn, receipt_id).await?;

        Ok(SalesReceiptDocument { receipt, lines })
    }

    // =========================================================================
    // Purchase Orders
    // =========================================================================

    /// Creates a `Pending` purchase order. No stock moves until reception.
    pub async fn create_purchase_order(
        &self,
        request: &CreatePurchaseOrder,
        user: &UserRef,
    ) -> LedgerResult<PurchaseOrderDocument> {
        validate_id("supplier_id", &request.supplier_id)?;
        validate_note("notes", request.notes.as_deref())?;
        validate_line_products(&request.lines)?;

        let totals =
            compute_document_totals(&request.lines, request.discount_cents, self.settings.tax_rate)?;
        let scope = SequenceScope::purchase_orders();

        self.settings
            .retry
            .run("documents.create_purchase_order", || {
                self.create_purchase_order_once(request, user, &scope, &totals)
            })
            .await
    }

    async fn create_purchase_order_once(
        &self,
        request: &CreatePurchaseOrder,
        user: &UserRef,
        scope: &SequenceScope,
        totals: &DocumentTotals,
    ) -> LedgerResult<PurchaseOrderDocument> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4().to_string();

        let number = sequence::allocate(&mut *tx, scope, Some(&id)).await?;

        if !catalog::supplier_exists(&mut *tx, &request.supplier_id).await? {
            return Err(
                CoreError::missing_reference("Supplier", "supplier_id", &request.supplier_id).into(),
            );
        }
        ensure_products(&mut *tx, &request.lines).await?;

        let now = Utc::now();
        let order = PurchaseOrder {
            id: id.clone(),
            number: number.formatted.clone(),
            supplier_id: request.supplier_id.clone(),
            status: PurchaseStatus::Pending,
            lines_total_cents: totals.lines_total.cents(),
            discount_cents: totals.discount.cents(),
            subtotal_cents: totals.subtotal.cents(),
            tax_rate_bps: totals.tax_rate.bps(),
            tax_cents: totals.tax.cents(),
            total_cents: totals.total.cents(),
            notes: request.notes.clone(),
            created_by: user.id.clone(),
            created_at: now,
            updated_at: now,
            approved_by: None,
            approved_at: None,
            received_at: None,
            cancelled_by: None,
            cancelled_at: None,
        };
        let lines = order_lines(&id, &request.lines, totals);

        purchase::insert_order(&mut *tx, &order).await?;
        purchase::insert_lines(&mut *tx, &lines).await?;
        tx.commit().await?;

        info!(
            id = %order.id,
            number = %order.number,
            lines = lines.len(),
            total = %totals.total,
            user = %user.name,
            "Purchase order created"
        );

        Ok(PurchaseOrderDocument { order, lines })
    }

    /// Replaces every line of a `Pending` order and recomputes its totals.
    pub async fn replace_purchase_order_lines(
        &self,
        order_id: &str,
        lines: &[DocumentLineInput],
        discount_cents: i64,
        user: &UserRef,
    ) -> LedgerResult<PurchaseOrderDocument> {
        validate_id("order_id", order_id)?;
        validate_line_products(lines)?;
        let totals = compute_document_totals(lines, discount_cents, self.settings.tax_rate)?;

        self.settings
            .retry
            .run("documents.replace_purchase_order_lines", || {
                self.replace_lines_once(order_id, lines, &totals, user)
            })
            .await
    }

    async fn replace_lines_once(
        &self,
        order_id: &str,
        inputs: &[DocumentLineInput],
        totals: &DocumentTotals,
        user: &UserRef,
    ) -> LedgerResult<PurchaseOrderDocument> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::document_key(PURCHASE_ORDER, order_id)).await?;

        let mut order = load_order(&mut *tx, order_id).await?;
        if !order.status.can_edit_lines() {
            return Err(
                CoreError::not_editable(PURCHASE_ORDER, order_id, order.status.to_string(), "edit lines")
                    .into(),
            );
        }
        ensure_products(&mut *tx, inputs).await?;

        let now = Utc::now();
        let removed = purchase::delete_lines(&mut *tx, order_id).await?;
        let lines = order_lines(order_id, inputs, totals);
        purchase::insert_lines(&mut *tx, &lines).await?;
        purchase::update_totals(&mut *tx, order_id, totals, now).await?;
        tx.commit().await?;

        order.lines_total_cents = totals.lines_total.cents();
        order.discount_cents = totals.discount.cents();
        order.subtotal_cents = totals.subtotal.cents();
        order.tax_rate_bps = totals.tax_rate.bps();
        order.tax_cents = totals.tax.cents();
        order.total_cents = totals.total.cents();
        order.updated_at = now;

        debug!(
            id = %order_id,
            removed,
            added = lines.len(),
            user = %user.name,
            "Purchase order lines replaced"
        );

        Ok(PurchaseOrderDocument { order, lines })
    }

    /// `Pending` → `Approved`.
    pub async fn approve_purchase_order(
        &self,
        order_id: &str,
        user: &UserRef,
    ) -> LedgerResult<PurchaseOrder> {
        validate_id("order_id", order_id)?;

        self.settings
            .retry
            .run("documents.approve_purchase_order", || {
                self.approve_once(order_id, user)
            })
            .await
    }

    async fn approve_once(&self, order_id: &str, user: &UserRef) -> LedgerResult<PurchaseOrder> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::document_key(PURCHASE_ORDER, order_id)).await?;

        let mut order = load_order(&mut *tx, order_id).await?;
        if !order.status.can_approve() {
            return Err(
                CoreError::not_editable(PURCHASE_ORDER, order_id, order.status.to_string(), "approve")
                    .into(),
            );
        }

        let now = Utc::now();
        purchase::mark_approved(&mut *tx, order_id, &user.id, now).await?;
        tx.commit().await?;

        order.status = PurchaseStatus::Approved;
        order.approved_by = Some(user.id.clone());
        order.approved_at = Some(now);
        order.updated_at = now;

        info!(id = %order.id, number = %order.number, user = %user.name, "Purchase order approved");
        Ok(order)
    }

    /// `Pending` → `Cancelled`. Approved orders cannot be cancelled.
    pub async fn cancel_purchase_order(
        &self,
        order_id: &str,
        user: &UserRef,
    ) -> LedgerResult<PurchaseOrder> {
        validate_id("order_id", order_id)?;

        self.settings
            .retry
            .run("documents.cancel_purchase_order", || {
                self.cancel_once(order_id, user)
            })
            .await
    }

    async fn cancel_once(&self, order_id: &str, user: &UserRef) -> LedgerResult<PurchaseOrder> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::document_key(PURCHASE_ORDER, order_id)).await?;

        let mut order = load_order(&mut *tx, order_id).await?;
        if !order.status.can_cancel() {
            return Err(
                CoreError::not_editable(PURCHASE_ORDER, order_id, order.status.to_string(), "cancel")
                    .into(),
            );
        }

        let now = Utc::now();
        purchase::mark_cancelled(&mut *tx, order_id, &user.id, now).await?;
        tx.commit().await?;

        order.status = PurchaseStatus::Cancelled;
        order.cancelled_by = Some(user.id.clone());
        order.cancelled_at = Some(now);
        order.updated_at = now;

        info!(id = %order.id, number = %order.number, user = %user.name, "Purchase order cancelled");
        Ok(order)
    }

    /// Receives goods against an `Approved` or `PartiallyReceived` order.
    ///
    /// Appends one `Inbound` movement per received line, then moves the
    /// order to `Received` when nothing is outstanding, otherwise to
    /// `PartiallyReceived`.
    pub async fn receive_purchase_order(
        &self,
        order_id: &str,
        reception: &Reception,
        user: &UserRef,
    ) -> LedgerResult<PurchaseOrderDocument> {
        validate_id("order_id", order_id)?;
        validate_reception(reception)?;

        self.settings
            .retry
            .run("documents.receive_purchase_order", || {
                self.receive_once(order_id, reception, user)
            })
            .await
    }

    async fn receive_once(
        &self,
        order_id: &str,
        reception: &Reception,
        user: &UserRef,
    ) -> LedgerResult<PurchaseOrderDocument> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::document_key(PURCHASE_ORDER, order_id)).await?;

        let mut order = load_order(&mut *tx, order_id).await?;
        if !order.status.can_receive() {
            return Err(
                CoreError::not_editable(PURCHASE_ORDER, order_id, order.status.to_string(), "receive")
                    .into(),
            );
        }

        let mut lines = purchase::fetch_lines(&mut *tx, order_id).await?;
        let plan = plan_reception(&lines, reception)?;

        let reference = MovementReference::new(ReferenceType::PurchaseOrder, order_id);
        let concept = format!("Purchase order {}", order.number);

        for (index, quantity) in plan {
            let line = &mut lines[index];

            stock::append_in_tx(
                &mut *tx,
                &StockEntry {
                    product_id: &line.product_id,
                    kind: StockMovementKind::Inbound,
                    direction: Direction::In,
                    quantity,
                    reference: Some(&reference),
                    concept: Some(&concept),
                    user,
                },
            )
            .await?;

            line.received_quantity += quantity;
            purchase::set_received_quantity(&mut *tx, &line.id, line.received_quantity).await?;
        }

        let status = if lines.iter().all(|line| line.remaining() == 0) {
            PurchaseStatus::Received
        } else {
            PurchaseStatus::PartiallyReceived
        };

        let now = Utc::now();
        purchase::mark_reception(&mut *tx, order_id, status, now).await?;
        tx.commit().await?;

        order.status = status;
        order.updated_at = now;
        if status == PurchaseStatus::Received {
            order.received_at = Some(now);
        }

        info!(
            id = %order.id,
            number = %order.number,
            status = %order.status,
            user = %user.name,
            "Purchase order received"
        );

        Ok(PurchaseOrderDocument { order, lines })
    }

    pub async fn get_purchase_order(&self, order_id: &str) -> LedgerResult<PurchaseOrderDocument> {
        validate_id("order_id", order_id)?;
        let mut conn = self.pool.acquire().await?;

        let order = load_order(&mut conn, order_id).await?;
        let lines = purchase::fetch_lines(&mut conn, order_id).await?;

        Ok(PurchaseOrderDocument { order, lines })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn validate_line_products(lines: &[DocumentLineInput]) -> LedgerResult<()> {
    for (index, line) in lines.iter().enumerate() {
        validate_id(&format!("lines[{}].product_id", index), &line.product_id)?;
    }
    Ok(())
}

async fn ensure_products(conn: &mut SqliteConnection, lines: &[DocumentLineInput]) -> LedgerResult<()> {
    for (index, line) in lines.iter().enumerate() {
        if !catalog::product_exists(conn, &line.product_id).await? {
            return Err(CoreError::missing_reference(
                "Product",
                format!("lines[{}].product_id", index),
                &line.product_id,
            )
            .into());
        }
    }
    Ok(())
}

async fn load_order(conn: &mut SqliteConnection, order_id: &str) -> LedgerResult<PurchaseOrder> {
    purchase::fetch_order(conn, order_id)
        .await?
        .ok_or_else(|| CoreError::document_not_found(PURCHASE_ORDER, order_id).into())
}

fn order_lines(
    order_id: &str,
    inputs: &[DocumentLineInput],
    totals: &DocumentTotals,
) -> Vec<PurchaseOrderLine> {
    inputs
        .iter()
        .zip(&totals.line_subtotals)
        .enumerate()
        .map(|(index, (line, subtotal))| PurchaseOrderLine {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            line_no: index as i64 + 1,
            product_id: line.product_id.clone(),
            quantity: line.quantity,
            received_quantity: 0,
            unit_price_cents: line.unit_price_cents,
            discount_cents: line.discount_cents,
            subtotal_cents: subtotal.cents(),
        })
        .collect()
}

/// Shape checks that need no database.
fn validate_reception(reception: &Reception) -> LedgerResult<()> {
    if let Reception::Lines(receipts) = reception {
        if receipts.is_empty() {
            return Err(ValidationError::Required {
                field: "lines".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for receipt in receipts {
            validate_id("line_id", &receipt.line_id)?;
            validate_quantity(receipt.quantity)?;
            if !seen.insert(receipt.line_id.as_str()) {
                return Err(ValidationError::Duplicate {
                    field: "line_id".to_string(),
                    value: receipt.line_id.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Resolves a reception into `(line index, quantity)` pairs.
fn plan_reception(lines: &[PurchaseOrderLine], reception: &Reception) -> LedgerResult<Vec<(usize, i64)>> {
    match reception {
        Reception::All => Ok(lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.remaining() > 0)
            .map(|(index, line)| (index, line.remaining()))
            .collect()),

        Reception::Lines(receipts) => receipts
            .iter()
            .map(|receipt| -> LedgerResult<(usize, i64)> {
                let index = lines
                    .iter()
                    .position(|line| line.id == receipt.line_id)
                    .ok_or_else(|| {
                        CoreError::missing_reference("PurchaseOrderLine", "line_id", &receipt.line_id)
                    })?;

                let remaining = lines[index].remaining();
                if receipt.quantity > remaining {
                    return Err(ValidationError::OutOfRange {
                        field: "quantity".to_string(),
                        min: 1,
                        max: remaining,
                    }
                    .into());
                }
                Ok((index, receipt.quantity))
            })
            .collect(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::pool::{Database, DbConfig};
    use kardex_core::{LineReceipt, Money, StockChange};

    struct Fixture {
        db: Database,
        user: UserRef,
        client_id: String,
        supplier_id: String,
        p1: String,
        p2: String,
    }

    impl Fixture {
        async fn new() -> Self {
            let db = Database::new(DbConfig::in_memory()).await.unwrap();
            let catalog = db.catalog();
            let client_id = catalog.create_client("Walk-in", None).await.unwrap().id;
            let supplier_id = catalog.create_supplier("Acme", None).await.unwrap().id;
            let p1 = catalog.create_product("P1", "Product one").await.unwrap().id;
            let p2 = catalog.create_product("P2", "Product two").await.unwrap().id;

            Fixture {
                db,
                user: UserRef::new("u-1", "Clerk"),
                client_id,
                supplier_id,
                p1,
                p2,
            }
        }

        async fn stock_in(&self, product_id: &str, quantity: i64) {
            self.db
                .stock()
                .append(product_id, StockChange::Inbound, quantity, None, &self.user)
                .await
                .unwrap();
        }

        async fn balance(&self, product_id: &str) -> i64 {
            self.db.stock().current_balance(product_id).await.unwrap()
        }

        fn sale(&self, lines: Vec<DocumentLineInput>) -> CreateSalesReceipt {
            CreateSalesReceipt {
                series: "F001".to_string(),
                client_id: self.client_id.clone(),
                lines,
                discount_cents: 0,
                cash_register_id: None,
                notes: None,
            }
        }

        fn order(&self, lines: Vec<DocumentLineInput>) -> CreatePurchaseOrder {
            CreatePurchaseOrder {
                supplier_id: self.supplier_id.clone(),
                lines,
                discount_cents: 0,
                notes: None,
            }
        }
    }

    #[tokio::test]
    async fn test_sales_receipt_moves_stock_and_prices() {
        let fx = Fixture::new().await;
        fx.stock_in(&fx.p1, 10).await;

        let request = fx.sale(vec![DocumentLineInput::new(&fx.p1, 3, 1_000).with_discount(500)]);
        let doc = fx.db.documents().create_sales_receipt(&request, &fx.user).await.unwrap();

        assert_eq!(doc.receipt.number, "00000001");
        assert_eq!(doc.receipt.document_number(), "F001-00000001");
        assert_eq!(doc.lines[0].subtotal_cents, 2_500);
        assert_eq!(doc.receipt.tax_cents, 450);
        assert_eq!(doc.receipt.total_cents, 2_950);
        assert_eq!(fx.balance(&fx.p1).await, 7);

        let movement = fx.db.stock().latest(&fx.p1).await.unwrap().unwrap();
        assert_eq!(movement.kind, StockMovementKind::Outbound);
        assert_eq!(movement.reference_type, Some(ReferenceType::SalesReceipt));
        assert_eq!(movement.reference_id.as_deref(), Some(doc.receipt.id.as_str()));

        let stored = fx.db.documents().get_sales_receipt(&doc.receipt.id).await.unwrap();
        assert_eq!(stored.receipt.total_cents, 2_950);
        assert_eq!(stored.lines.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_line_rolls_back_everything() {
        let fx = Fixture::new().await;
        fx.stock_in(&fx.p1, 10).await;
        fx.stock_in(&fx.p2, 1).await;

        let request = fx.sale(vec![
            DocumentLineInput::new(&fx.p1, 2, 100),
            DocumentLineInput::new(&fx.p1, 2, 100),
            DocumentLineInput::new(&fx.p2, 5, 100),
        ]);
        let err = fx.db.documents().create_sales_receipt(&request, &fx.user).await.unwrap_err();

        match err {
            LedgerError::Domain(CoreError::InsufficientStock {
                product_id,
                available,
                requested,
            }) => {
                assert_eq!(product_id, fx.p2);
                assert_eq!((available, requested), (1, 5));
            }
            other => panic!("expected insufficient stock, got {:?}", other),
        }

        assert_eq!(fx.balance(&fx.p1).await, 10);
        assert_eq!(fx.db.stock().history(&fx.p1, None, None).await.unwrap().len(), 1);

        let receipts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales_receipts")
            .fetch_one(fx.db.pool())
            .await
            .unwrap();
        assert_eq!(receipts, 0);

        let scope = SequenceScope::sales("F001").unwrap();
        assert_eq!(fx.db.sequences().peek(&scope).await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_sales_receipt_unknown_references() {
        let fx = Fixture::new().await;

        let mut request = fx.sale(vec![DocumentLineInput::new("ghost", 1, 100)]);
        let err = fx.db.documents().create_sales_receipt(&request, &fx.user).await.unwrap_err();
        match err {
            LedgerError::Domain(CoreError::ReferencedEntityNotFound { entity, field, .. }) => {
                assert_eq!(entity, "Product");
                assert_eq!(field, "lines[0].product_id");
            }
            other => panic!("expected missing product, got {:?}", other),
        }

        request.lines = vec![DocumentLineInput::new(&fx.p1, 1, 100)];
        request.client_id = "ghost".to_string();
        let err = fx.db.documents().create_sales_receipt(&request, &fx.user).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(CoreError::ReferencedEntityNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sales_receipt_validation() {
        let fx = Fixture::new().await;

        let empty = fx.sale(vec![]);
        assert!(matches!(
            fx.db.documents().create_sales_receipt(&empty, &fx.user).await,
            Err(LedgerError::Domain(CoreError::Validation(_)))
        ));

        let mut bad_series = fx.sale(vec![DocumentLineInput::new(&fx.p1, 1, 100)]);
        bad_series.series = "f-1".to_string();
        assert!(matches!(
            fx.db.documents().create_sales_receipt(&bad_series, &fx.user).await,
            Err(LedgerError::Domain(CoreError::Validation(_)))
        ));

        let zero_qty = fx.sale(vec![DocumentLineInput::new(&fx.p1, 0, 100)]);
        assert!(matches!(
            fx.db.documents().create_sales_receipt(&zero_qty, &fx.user).await,
            Err(LedgerError::Domain(CoreError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_cash_sale_and_void_reversal() {
        let fx = Fixture::new().await;
        fx.stock_in(&fx.p1, 5).await;
        let register = fx
            .db
            .cash()
            .open_register("Front", Money::from_cents(10_000), &fx.user)
            .await
            .unwrap();

        let mut request = fx.sale(vec![DocumentLineInput::new(&fx.p1, 2, 1_000)]);
        request.cash_register_id = Some(register.id.clone());
        let doc = fx.db.documents().create_sales_receipt(&request, &fx.user).await.unwrap();

        // 2 x 10.00 = 20.00 + 18% = 23.60
        assert_eq!(doc.receipt.total_cents, 2_360);
        assert_eq!(fx.db.cash().current_balance(&register.id).await.unwrap().cents(), 12_360);
        assert_eq!(fx.balance(&fx.p1).await, 3);

        let voided = fx
            .db
            .documents()
            .void_sales_receipt(&doc.receipt.id, Some("customer returned"), &fx.user)
            .await
            .unwrap();
        assert_eq!(voided.receipt.status, SalesStatus::Voided);
        assert_eq!(fx.balance(&fx.p1).await, 5);
        assert_eq!(fx.db.cash().current_balance(&register.id).await.unwrap().cents(), 10_000);

        let reversal = fx.db.stock().latest(&fx.p1).await.unwrap().unwrap();
        assert_eq!(reversal.kind, StockMovementKind::Inbound);
        assert_eq!(reversal.reference_id.as_deref(), Some(doc.receipt.id.as_str()));

        let again = fx
            .db
            .documents()
            .void_sales_receipt(&doc.receipt.id, None, &fx.user)
            .await
            .unwrap_err();
        assert!(matches!(
            again,
            LedgerError::Domain(CoreError::DocumentNotInEditableState { .. })
        ));

        // Numbers are never reused, even after a void.
        let request = fx.sale(vec![DocumentLineInput::new(&fx.p1, 1, 100)]);
        let next = fx.db.documents().create_sales_receipt(&request, &fx.user).await.unwrap();
        assert_eq!(next.receipt.number, "00000002");
    }

    #[tokio::test]
    async fn test_sale_into_closed_register_fails() {
        let fx = Fixture::new().await;
        fx.stock_in(&fx.p1, 5).await;
        let cash = fx.db.cash();
        let register = cash.open_register("Back", Money::zero(), &fx.user).await.unwrap();
        cash.close_register(&register.id, None, &fx.user).await.unwrap();

        let mut request = fx.sale(vec![DocumentLineInput::new(&fx.p1, 1, 500)]);
        request.cash_register_id = Some(register.id.clone());
        let err = fx.db.documents().create_sales_receipt(&request, &fx.user).await.unwrap_err();

        assert!(matches!(err, LedgerError::Domain(CoreError::RegisterClosed { .. })));
        assert_eq!(fx.balance(&fx.p1).await, 5);
    }

    #[tokio::test]
    async fn test_void_unknown_receipt() {
        let fx = Fixture::new().await;
        let err = fx
            .db
            .documents()
            .void_sales_receipt("missing", None, &fx.user)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(CoreError::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_void_rolls_back_when_register_cannot_refund() {
        let fx = Fixture::new().await;
        fx.stock_in(&fx.p1, 5).await;
        let cash = fx.db.cash();
        let register = cash.open_register("Front", Money::zero(), &fx.user).await.unwrap();

        let mut request = fx.sale(vec![DocumentLineInput::new(&fx.p1, 2, 1_000)]);
        request.cash_register_id = Some(register.id.clone());
        let doc = fx.db.documents().create_sales_receipt(&request, &fx.user).await.unwrap();
        assert_eq!(cash.current_balance(&register.id).await.unwrap().cents(), 2_360);

        // Payout leaves less cash than the refund needs.
        cash.append(&register.id, CashMovementKind::Debit, Money::from_cents(2_000), None, &fx.user)
            .await
            .unwrap();
        let history_len = fx.db.stock().history(&fx.p1, None, None).await.unwrap().len();

        let err = fx
            .db
            .documents()
            .void_sales_receipt(&doc.receipt.id, None, &fx.user)
            .await
            .unwrap_err();
        match err {
            LedgerError::Domain(CoreError::InsufficientBalance {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available.cents(), 360);
                assert_eq!(requested.cents(), 2_360);
            }
            other => panic!("expected insufficient balance, got {:?}", other),
        }

        let stored = fx.db.documents().get_sales_receipt(&doc.receipt.id).await.unwrap();
        assert_eq!(stored.receipt.status, SalesStatus::Active);
        assert_eq!(fx.balance(&fx.p1).await, 3);
        assert_eq!(
            fx.db.stock().history(&fx.p1, None, None).await.unwrap().len(),
            history_len
        );

        cash.close_register(&register.id, None, &fx.user).await.unwrap();

        let err = fx
            .db
            .documents()
            .void_sales_receipt(&doc.receipt.id, None, &fx.user)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(CoreError::RegisterClosed { .. })));

        let stored = fx.db.documents().get_sales_receipt(&doc.receipt.id).await.unwrap();
        assert_eq!(stored.receipt.status, SalesStatus::Active);
        assert_eq!(stored.receipt.voided_at, None);
        assert_eq!(fx.balance(&fx.p1).await, 3);
        assert_eq!(
            fx.db.stock().history(&fx.p1, None, None).await.unwrap().len(),
            history_len
        );
        assert_eq!(cash.current_balance(&register.id).await.unwrap().cents(), 360);
    }

    #[tokio::test]
    async fn test_purchase_order_full_reception() {
        let fx = Fixture::new().await;
        let docs = fx.db.documents();

        let created = docs
            .create_purchase_order(
                &fx.order(vec![
                    DocumentLineInput::new(&fx.p1, 10, 250),
                    DocumentLineInput::new(&fx.p2, 4, 900),
                ]),
                &fx.user,
            )
            .await
            .unwrap();
        assert_eq!(created.order.number, "OC-000001");
        assert_eq!(created.order.status, PurchaseStatus::Pending);
        assert_eq!(fx.balance(&fx.p1).await, 0);

        // Receiving before approval is refused.
        let early = docs
            .receive_purchase_order(&created.order.id, &Reception::All, &fx.user)
            .await
            .unwrap_err();
        assert!(matches!(
            early,
            LedgerError::Domain(CoreError::DocumentNotInEditableState { .. })
        ));

        docs.approve_purchase_order(&created.order.id, &fx.user).await.unwrap();
        let received = docs
            .receive_purchase_order(&created.order.id, &Reception::All, &fx.user)
            .await
            .unwrap();

        assert_eq!(received.order.status, PurchaseStatus::Received);
        assert!(received.order.received_at.is_some());
        assert!(received.is_fully_received());
        assert_eq!(fx.balance(&fx.p1).await, 10);
        assert_eq!(fx.balance(&fx.p2).await, 4);

        let movement = fx.db.stock().latest(&fx.p2).await.unwrap().unwrap();
        assert_eq!(movement.kind, StockMovementKind::Inbound);
        assert_eq!(movement.reference_type, Some(ReferenceType::PurchaseOrder));

        let again = docs
            .receive_purchase_order(&created.order.id, &Reception::All, &fx.user)
            .await
            .unwrap_err();
        assert!(matches!(
            again,
            LedgerError::Domain(CoreError::DocumentNotInEditableState { .. })
        ));
        assert_eq!(fx.balance(&fx.p1).await, 10);
    }

    #[tokio::test]
    async fn test_partial_reception() {
        let fx = Fixture::new().await;
        let docs = fx.db.documents();

        let created = docs
            .create_purchase_order(&fx.order(vec![DocumentLineInput::new(&fx.p1, 10, 100)]), &fx.user)
            .await
            .unwrap();
        docs.approve_purchase_order(&created.order.id, &fx.user).await.unwrap();
        let line_id = created.lines[0].id.clone();

        let partial = docs
            .receive_purchase_order(
                &created.order.id,
                &Reception::Lines(vec![LineReceipt {
                    line_id: line_id.clone(),
                    quantity: 4,
                }]),
                &fx.user,
            )
            .await
            .unwrap();
        assert_eq!(partial.order.status, PurchaseStatus::PartiallyReceived);
        assert_eq!(partial.lines[0].received_quantity, 4);
        assert_eq!(fx.balance(&fx.p1).await, 4);

        let too_many = docs
            .receive_purchase_order(
                &created.order.id,
                &Reception::Lines(vec![LineReceipt {
                    line_id: line_id.clone(),
                    quantity: 7,
                }]),
                &fx.user,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            too_many,
            LedgerError::Domain(CoreError::Validation(ValidationError::OutOfRange { max: 6, .. }))
        ));

        let rest = docs
            .receive_purchase_order(&created.order.id, &Reception::All, &fx.user)
            .await
            .unwrap();
        assert_eq!(rest.order.status, PurchaseStatus::Received);
        assert_eq!(fx.balance(&fx.p1).await, 10);
        assert_eq!(fx.db.stock().history(&fx.p1, None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reception_of_foreign_line() {
        let fx = Fixture::new().await;
        let docs = fx.db.documents();

        let created = docs
            .create_purchase_order(&fx.order(vec![DocumentLineInput::new(&fx.p1, 1, 100)]), &fx.user)
            .await
            .unwrap();
        docs.approve_purchase_order(&created.order.id, &fx.user).await.unwrap();

        let err = docs
            .receive_purchase_order(
                &created.order.id,
                &Reception::Lines(vec![LineReceipt {
                    line_id: "other-line".to_string(),
                    quantity: 1,
                }]),
                &fx.user,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(CoreError::ReferencedEntityNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_lines_only_while_pending() {
        let fx = Fixture::new().await;
        let docs = fx.db.documents();

        let created = docs
            .create_purchase_order(&fx.order(vec![DocumentLineInput::new(&fx.p1, 1, 100)]), &fx.user)
            .await
            .unwrap();

        let replaced = docs
            .replace_purchase_order_lines(
                &created.order.id,
                &[
                    DocumentLineInput::new(&fx.p1, 2, 1_000),
                    DocumentLineInput::new(&fx.p2, 1, 500),
                ],
                500,
                &fx.user,
            )
            .await
            .unwrap();
        assert_eq!(replaced.lines.len(), 2);
        // 2000 + 500 - 500 = 2000, + 18% = 2360
        assert_eq!(replaced.order.subtotal_cents, 2_000);
        assert_eq!(replaced.order.total_cents, 2_360);

        let stored = docs.get_purchase_order(&created.order.id).await.unwrap();
        assert_eq!(stored.lines.len(), 2);
        assert_eq!(stored.order.total_cents, 2_360);

        docs.approve_purchase_order(&created.order.id, &fx.user).await.unwrap();
        let err = docs
            .replace_purchase_order_lines(
                &created.order.id,
                &[DocumentLineInput::new(&fx.p1, 1, 100)],
                0,
                &fx.user,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(CoreError::DocumentNotInEditableState { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let fx = Fixture::new().await;
        let docs = fx.db.documents();

        let pending = docs
            .create_purchase_order(&fx.order(vec![DocumentLineInput::new(&fx.p1, 1, 100)]), &fx.user)
            .await
            .unwrap();
        let cancelled = docs.cancel_purchase_order(&pending.order.id, &fx.user).await.unwrap();
        assert_eq!(cancelled.status, PurchaseStatus::Cancelled);

        let approved = docs
            .create_purchase_order(&fx.order(vec![DocumentLineInput::new(&fx.p1, 1, 100)]), &fx.user)
            .await
            .unwrap();
        assert_eq!(approved.order.number, "OC-000002");
        docs.approve_purchase_order(&approved.order.id, &fx.user).await.unwrap();

        let err = docs
            .cancel_purchase_order(&approved.order.id, &fx.user)
            .await
            .unwrap_err();
        match err {
            LedgerError::Domain(CoreError::DocumentNotInEditableState { status, operation, .. }) => {
                assert_eq!(status, "approved");
                assert_eq!(operation, "cancel");
            }
            other => panic!("expected not editable, got {:?}", other),
        }

        let missing = docs.approve_purchase_order("nope", &fx.user).await.unwrap_err();
        assert!(matches!(missing, LedgerError::Domain(CoreError::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_unknown_supplier() {
        let fx = Fixture::new().await;
        let mut request = fx.order(vec![DocumentLineInput::new(&fx.p1, 1, 100)]);
        request.supplier_id = "ghost".to_string();

        let err = fx.db.documents().create_purchase_order(&request, &fx.user).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(CoreError::ReferencedEntityNotFound { .. })
        ));

        let scope = SequenceScope::purchase_orders();
        assert_eq!(fx.db.sequences().peek(&scope).await.unwrap().formatted, "OC-000001");
    }

    #[tokio::test]
    async fn test_reception_shape_validation() {
        let empty = validate_reception(&Reception::Lines(vec![]));
        assert!(empty.is_err());

        let duplicate = validate_reception(&Reception::Lines(vec![
            LineReceipt { line_id: "a".into(), quantity: 1 },
            LineReceipt { line_id: "a".into(), quantity: 2 },
        ]));
        assert!(matches!(
            duplicate,
            Err(LedgerError::Domain(CoreError::Validation(ValidationError::Duplicate { .. })))
        ));

        assert!(validate_reception(&Reception::All).is_ok());
    }
}
