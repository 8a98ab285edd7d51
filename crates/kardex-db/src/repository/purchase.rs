//! # Purchase Order Rows
//!
//! Row-level SQL for purchase orders and their lines. Status checks live
//! in the document service; these functions only write what they are told.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use kardex_core::{DocumentTotals, PurchaseOrder, PurchaseOrderLine, PurchaseStatus};

const ORDER_COLUMNS: &str = r#"
    id, number, supplier_id, status,
    lines_total_cents, discount_cents, subtotal_cents, tax_rate_bps,
    tax_cents, total_cents, notes, created_by, created_at, updated_at,
    approved_by, approved_at, received_at, cancelled_by, cancelled_at
"#;

const LINE_COLUMNS: &str = r#"
    id, order_id, line_no, product_id, quantity, received_quantity,
    unit_price_cents, discount_cents, subtotal_cents
"#;

pub(crate) async fn insert_order(conn: &mut SqliteConnection, order: &PurchaseOrder) -> DbResult<()> {
    debug!(id = %order.id, number = %order.number, "Inserting purchase order");

    sqlx::query(
        r#"
        INSERT INTO purchase_orders (
            id, number, supplier_id, status,
            lines_total_cents, discount_cents, subtotal_cents, tax_rate_bps,
            tax_cents, total_cents, notes, created_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(&order.id)
    .bind(&order.number)
    .bind(&order.supplier_id)
    .bind(order.status)
    .bind(order.lines_total_cents)
    .bind(order.discount_cents)
    .bind(order.subtotal_cents)
    .bind(order.tax_rate_bps)
    .bind(order.tax_cents)
    .bind(order.total_cents)
    .bind(&order.notes)
    .bind(&order.created_by)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn insert_lines(conn: &mut SqliteConnection, lines: &[PurchaseOrderLine]) -> DbResult<()> {
    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO purchase_order_lines (
                id, order_id, line_no, product_id, quantity, received_quantity,
                unit_price_cents, discount_cents, subtotal_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&line.id)
        .bind(&line.order_id)
        .bind(line.line_no)
        .bind(&line.product_id)
        .bind(line.quantity)
        .bind(line.received_quantity)
        .bind(line.unit_price_cents)
        .bind(line.discount_cents)
        .bind(line.subtotal_cents)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub(crate) async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<PurchaseOrder>> {
    let order = sqlx::query_as::<_, PurchaseOrder>(&format!(
        "SELECT {} FROM purchase_orders WHERE id = ?1",
        ORDER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(order)
}

pub(crate) async fn fetch_lines(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<PurchaseOrderLine>> {
    let lines = sqlx::query_as::<_, PurchaseOrderLine>(&format!(
        "SELECT {} FROM purchase_order_lines WHERE order_id = ?1 ORDER BY line_no",
        LINE_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(lines)
}

pub(crate) async fn delete_lines(conn: &mut SqliteConnection, order_id: &str) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM purchase_order_lines WHERE order_id = ?1")
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Rewrites the header totals after the lines were replaced.
pub(crate) async fn update_totals(
    conn: &mut SqliteConnection,
    order_id: &str,
    totals: &DocumentTotals,
    at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE purchase_orders
        SET lines_total_cents = ?1, discount_cents = ?2, subtotal_cents = ?3,
            tax_rate_bps = ?4, tax_cents = ?5, total_cents = ?6, updated_at = ?7
        WHERE id = ?8
        "#,
    )
    .bind(totals.lines_total.cents())
    .bind(totals.discount.cents())
    .bind(totals.subtotal.cents())
    .bind(totals.tax_rate.bps())
    .bind(totals.tax.cents())
    .bind(totals.total.cents())
    .bind(at)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn mark_approved(
    conn: &mut SqliteConnection,
    order_id: &str,
    user_id: &str,
    at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE purchase_orders
        SET status = ?1, approved_by = ?2, approved_at = ?3, updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(PurchaseStatus::Approved)
    .bind(user_id)
    .bind(at)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn mark_cancelled(
    conn: &mut SqliteConnection,
    order_id: &str,
    user_id: &str,
    at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE purchase_orders
        SET status = ?1, cancelled_by = ?2, cancelled_at = ?3, updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(PurchaseStatus::Cancelled)
    .bind(user_id)
    .bind(at)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn set_received_quantity(
    conn: &mut SqliteConnection,
    line_id: &str,
    received_quantity: i64,
) -> DbResult<()> {
    sqlx::query("UPDATE purchase_order_lines SET received_quantity = ?1 WHERE id = ?2")
        .bind(received_quantity)
        .bind(line_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Moves the order to `PartiallyReceived` or `Received`.
pub(crate) async fn mark_reception(
    conn: &mut SqliteConnection,
    order_id: &str,
    status: PurchaseStatus,
    at: DateTime<Utc>,
) -> DbResult<()> {
    let received_at = (status == PurchaseStatus::Received).then_some(at);

    sqlx::query(
        r#"
        UPDATE purchase_orders
        SET status = ?1, received_at = ?2, updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(status)
    .bind(received_at)
    .bind(at)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
