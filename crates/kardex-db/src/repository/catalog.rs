//! # Catalog Repository
//!
//! Products, suppliers and clients. The ledgers only reference these rows;
//! this module exists so callers (and the seed binary) can create them and
//! so document operations can check references inside their transaction.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbResult, LedgerResult};
use kardex_core::validation::{validate_id, validate_name, validate_note, validate_sku};
use kardex_core::{Client, Product, Supplier};

/// Repository for catalog rows.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Creates a product with zero stock.
    ///
    /// Stock only ever enters through the stock ledger.
    pub async fn create_product(&self, sku: &str, name: &str) -> LedgerResult<Product> {
        validate_sku(sku)?;
        validate_name("name", name)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: sku.to_string(),
            name: name.to_string(),
            current_stock: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, current_stock, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(product)
    }

    pub async fn create_supplier(&self, name: &str, tax_id: Option<&str>) -> LedgerResult<Supplier> {
        validate_name("name", name)?;
        validate_note("tax_id", tax_id)?;

        let supplier = Supplier {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            tax_id: tax_id.map(str::to_string),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO suppliers (id, name, tax_id, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&supplier.id)
            .bind(&supplier.name)
            .bind(&supplier.tax_id)
            .bind(supplier.created_at)
            .execute(&self.pool)
            .await?;

        Ok(supplier)
    }

    pub async fn create_client(
        &self,
        name: &str,
        document_number: Option<&str>,
    ) -> LedgerResult<Client> {
        validate_name("name", name)?;
        validate_note("document_number", document_number)?;

        let client = Client {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            document_number: document_number.map(str::to_string),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO clients (id, name, document_number, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.document_number)
        .bind(client.created_at)
        .execute(&self.pool)
        .await?;

        Ok(client)
    }

    /// Gets a product by ID.
    pub async fn get_product(&self, id: &str) -> LedgerResult<Option<Product>> {
        validate_id("product_id", id)?;
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_product(&mut conn, id).await?)
    }

    /// Gets a product by SKU.
    pub async fn get_product_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, current_stock, is_active, created_at, updated_at
            FROM products
            WHERE sku = ?1
            "#,
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }
}

// =============================================================================
// Transaction-level helpers
// =============================================================================

pub(crate) async fn fetch_product(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(
        r#"
        SELECT id, sku, name, current_stock, is_active, created_at, updated_at
        FROM products
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(product)
}

pub(crate) async fn product_exists(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    row_exists(conn, "SELECT 1 FROM products WHERE id = ?1", id).await
}

pub(crate) async fn supplier_exists(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    row_exists(conn, "SELECT 1 FROM suppliers WHERE id = ?1", id).await
}

pub(crate) async fn client_exists(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    row_exists(conn, "SELECT 1 FROM clients WHERE id = ?1", id).await
}

async fn row_exists(conn: &mut SqliteConnection, sql: &str, id: &str) -> DbResult<bool> {
    let found: Option<i64> = sqlx::query_scalar(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use crate::error::{DbError, LedgerError};
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_create_and_fetch_product() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        let product = catalog.create_product("COKE-500", "Coca-Cola 500ml").await.unwrap();
        assert_eq!(product.current_stock, 0);

        let fetched = catalog.get_product(&product.id).await.unwrap().unwrap();
        assert_eq!(fetched.sku, "COKE-500");

        let by_sku = catalog.get_product_by_sku("COKE-500").await.unwrap();
        assert_eq!(by_sku.map(|p| p.id), Some(product.id));
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        catalog.create_product("SKU-1", "First").await.unwrap();
        let err = catalog.create_product("SKU-1", "Second").await.unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Storage(DbError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_existence_checks() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let supplier = db.catalog().create_supplier("Acme", Some("20123456789")).await.unwrap();
        let client = db.catalog().create_client("Walk-in", None).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(super::supplier_exists(&mut conn, &supplier.id).await.unwrap());
        assert!(super::client_exists(&mut conn, &client.id).await.unwrap());
        assert!(!super::product_exists(&mut conn, "missing").await.unwrap());
    }
}
