//! # Sales Receipt Rows
//!
//! Row-level SQL for sales receipts and their lines. Every function runs
//! on the caller's connection; the document service owns the transaction.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use kardex_core::{SalesReceipt, SalesReceiptLine, SalesStatus};

const RECEIPT_COLUMNS: &str = r#"
    id, series, number, client_id, cash_register_id, status,
    lines_total_cents, discount_cents, subtotal_cents, tax_rate_bps,
    tax_cents, total_cents, notes, created_by, created_at,
    voided_by, voided_at, void_reason
"#;

const LINE_COLUMNS: &str = r#"
    id, receipt_id, line_no, product_id, quantity,
    unit_price_cents, discount_cents, subtotal_cents
"#;

pub(crate) async fn insert_receipt(conn: &mut SqliteConnection, receipt: &SalesReceipt) -> DbResult<()> {
    debug!(id = %receipt.id, number = %receipt.document_number(), "Inserting sales receipt");

    sqlx::query(
        r#"
        INSERT INTO sales_receipts (
            id, series, number, client_id, cash_register_id, status,
            lines_total_cents, discount_cents, subtotal_cents, tax_rate_bps,
            tax_cents, total_cents, notes, created_by, created_at,
            voided_by, voided_at, void_reason
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15,
            NULL, NULL, NULL
        )
        "#,
    )
    .bind(&receipt.id)
    .bind(&receipt.series)
    .bind(&receipt.number)
    .bind(&receipt.client_id)
    .bind(&receipt.cash_register_id)
    .bind(receipt.status)
    .bind(receipt.lines_total_cents)
    .bind(receipt.discount_cents)
    .bind(receipt.subtotal_cents)
    .bind(receipt.tax_rate_bps)
    .bind(receipt.tax_cents)
    .bind(receipt.total_cents)
    .bind(&receipt.notes)
    .bind(&receipt.created_by)
    .bind(receipt.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn insert_lines(conn: &mut SqliteConnection, lines: &[SalesReceiptLine]) -> DbResult<()> {
    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO sales_receipt_lines (
                id, receipt_id, line_no, product_id, quantity,
                unit_price_cents, discount_cents, subtotal_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&line.id)
        .bind(&line.receipt_id)
        .bind(line.line_no)
        .bind(&line.product_id)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(line.discount_cents)
        .bind(line.subtotal_cents)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub(crate) async fn fetch_receipt(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<SalesReceipt>> {
    let receipt = sqlx::query_as::<_, SalesReceipt>(&format!(
        "SELECT {} FROM sales_receipts WHERE id = ?1",
        RECEIPT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(receipt)
}

pub(crate) async fn fetch_lines(conn: &mut SqliteConnection, receipt_id: &str) -> DbResult<Vec<SalesReceiptLine>> {
    let lines = sqlx::query_as::<_, SalesReceiptLine>(&format!(
        "SELECT {} FROM sales_receipt_lines WHERE receipt_id = ?1 ORDER BY line_no",
        LINE_COLUMNS
    ))
    .bind(receipt_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(lines)
}

pub(crate) async fn mark_voided(
    conn: &mut SqliteConnection,
    id: &str,
    user_id: &str,
    reason: Option<&str>,
    at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE sales_receipts
        SET status = ?1, voided_by = ?2, voided_at = ?3, void_reason = ?4
        WHERE id = ?5
        "#,
    )
    .bind(SalesStatus::Voided)
    .bind(user_id)
    .bind(at)
    .bind(reason)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
