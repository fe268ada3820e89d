//! PostgreSQL store implementation

use super::{CourierStore, StoreResult};
use crate::error::CourierError;
use crate::types::{
    Account, CourierFilter, CourierItem, CourierStatus, CourierTransaction, MovementLeg,
    NewBinding, NewCourier, ReceiptMovement, TechnicianStockBinding,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;

const COURIER_COLUMNS: &str = r#"
    c.id,
    c.courier_id,
    c.created_by,
    c.status,
    c.items,
    c.notes,
    c.document,
    c.sent_time,
    c.received_time,
    c.created_at,
    c.updated_at,
    ARRAY(
        SELECT r.account_id FROM courier_recipients r
        WHERE r.courier_pk = c.id
        ORDER BY r.account_id
    ) AS recipients
"#;

#[derive(Debug, Clone)]
pub struct PostgresCourierStore {
    pool: PgPool,
}

impl PostgresCourierStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(connect_timeout_secs.max(1)))
            .connect(database_url)
            .await
            .map_err(|e| CourierError::storage("postgres connect failed", e))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id BIGINT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                is_staff BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS technician_stock_bindings (
                id BIGSERIAL PRIMARY KEY,
                account_id BIGINT NOT NULL UNIQUE REFERENCES accounts (id),
                sheet_identity TEXT NULL,
                sheet_id TEXT NULL,
                last_sync TIMESTAMPTZ NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS courier_transactions (
                id BIGSERIAL PRIMARY KEY,
                courier_id TEXT NOT NULL UNIQUE,
                created_by BIGINT NULL REFERENCES accounts (id) ON DELETE SET NULL,
                status TEXT NOT NULL,
                items JSONB NOT NULL,
                notes TEXT NOT NULL DEFAULT '',
                document TEXT NULL,
                sent_time TIMESTAMPTZ NOT NULL,
                received_time TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS courier_recipients (
                courier_pk BIGINT NOT NULL REFERENCES courier_transactions (id),
                account_id BIGINT NOT NULL REFERENCES accounts (id),
                PRIMARY KEY (courier_pk, account_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS receipt_movements (
                seq BIGSERIAL,
                courier_pk BIGINT NOT NULL REFERENCES courier_transactions (id),
                recipient_id BIGINT NOT NULL,
                spare_id TEXT NOT NULL,
                leg TEXT NOT NULL,
                qty BIGINT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (courier_pk, recipient_id, spare_id, leg)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_courier_transactions_status ON courier_transactions (status)",
            "CREATE INDEX IF NOT EXISTS idx_courier_transactions_sent_time ON courier_transactions (sent_time DESC)",
            "CREATE INDEX IF NOT EXISTS idx_courier_recipients_account ON courier_recipients (account_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| CourierError::storage("postgres schema create failed", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CourierStore for PostgresCourierStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    async fn upsert_account(&self, account: Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, username, first_name, last_name, email, is_staff)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                email = EXCLUDED.email,
                is_staff = EXCLUDED.is_staff
            "#,
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.email)
        .bind(account.is_staff)
        .execute(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres account upsert failed", e))?;
        Ok(())
    }

    async fn get_account(&self, id: i64) -> StoreResult<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, username, first_name, last_name, email, is_staff FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres account load failed", e))?;

        row.as_ref().map(decode_account).transpose()
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, username, first_name, last_name, email, is_staff FROM accounts ORDER BY username, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres account list failed", e))?;

        rows.iter().map(decode_account).collect()
    }

    async fn get_binding_for_account(
        &self,
        account_id: i64,
    ) -> StoreResult<Option<TechnicianStockBinding>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, sheet_identity, sheet_id, last_sync
            FROM technician_stock_bindings
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres binding load failed", e))?;

        row.as_ref().map(decode_binding).transpose()
    }

    async fn list_bindings(&self) -> StoreResult<Vec<TechnicianStockBinding>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, sheet_identity, sheet_id, last_sync
            FROM technician_stock_bindings
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres binding list failed", e))?;

        rows.iter().map(decode_binding).collect()
    }

    async fn insert_binding(&self, binding: NewBinding) -> StoreResult<TechnicianStockBinding> {
        let row = sqlx::query(
            r#"
            INSERT INTO technician_stock_bindings (account_id, sheet_identity, sheet_id)
            VALUES ($1, $2, $3)
            RETURNING id, account_id, sheet_identity, sheet_id, last_sync
            "#,
        )
        .bind(binding.account_id)
        .bind(&binding.sheet_identity)
        .bind(&binding.sheet_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CourierError::BindingExists(binding.account_id)
            }
            _ => CourierError::storage("postgres binding insert failed", e),
        })?;

        decode_binding(&row)
    }

    async fn touch_binding_sync(&self, account_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE technician_stock_bindings SET last_sync = $2 WHERE account_id = $1")
            .bind(account_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| CourierError::storage("postgres binding sync update failed", e))?;
        Ok(())
    }

    async fn insert_courier(&self, courier: NewCourier) -> StoreResult<CourierTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CourierError::storage("postgres begin failed", e))?;
        let now = Utc::now();

        let id: i64 = sqlx::query(
            r#"
            INSERT INTO courier_transactions (
                courier_id,
                created_by,
                status,
                items,
                notes,
                sent_time,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING id
            "#,
        )
        .bind(&courier.courier_id)
        .bind(courier.created_by)
        .bind(CourierStatus::InTransit.as_str())
        .bind(Json(&courier.items))
        .bind(&courier.notes)
        .bind(courier.sent_time)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => CourierError::StateConflict(
                format!("courier id '{}' already exists", courier.courier_id),
            ),
            _ => CourierError::storage("postgres courier insert failed", e),
        })?
        .try_get("id")
        .map_err(|e| CourierError::storage("postgres decode id failed", e))?;

        for recipient in &courier.recipients {
            sqlx::query("INSERT INTO courier_recipients (courier_pk, account_id) VALUES ($1, $2)")
                .bind(id)
                .bind(recipient)
                .execute(&mut *tx)
                .await
                .map_err(|e| CourierError::storage("postgres recipient insert failed", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| CourierError::storage("postgres commit failed", e))?;

        let mut recipients = courier.recipients;
        recipients.sort_unstable();
        Ok(CourierTransaction {
            id,
            courier_id: courier.courier_id,
            created_by: courier.created_by,
            recipients,
            status: CourierStatus::InTransit,
            items: courier.items,
            notes: courier.notes,
            document: None,
            sent_time: courier.sent_time,
            received_time: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_courier(&self, id: i64) -> StoreResult<Option<CourierTransaction>> {
        let sql = format!("SELECT {COURIER_COLUMNS} FROM courier_transactions c WHERE c.id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CourierError::storage("postgres courier load failed", e))?;

        row.as_ref().map(decode_courier).transpose()
    }

    async fn get_courier_by_code(
        &self,
        courier_id: &str,
    ) -> StoreResult<Option<CourierTransaction>> {
        let sql =
            format!("SELECT {COURIER_COLUMNS} FROM courier_transactions c WHERE c.courier_id = $1");
        let row = sqlx::query(&sql)
            .bind(courier_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CourierError::storage("postgres courier load failed", e))?;

        row.as_ref().map(decode_courier).transpose()
    }

    async fn list_couriers(&self, filter: &CourierFilter) -> StoreResult<Vec<CourierTransaction>> {
        let sql = format!(
            r#"
            SELECT {COURIER_COLUMNS}
            FROM courier_transactions c
            WHERE ($1::TEXT IS NULL OR c.status = $1)
              AND ($2::BIGINT IS NULL OR EXISTS (
                  SELECT 1 FROM courier_recipients r
                  WHERE r.courier_pk = c.id AND r.account_id = $2
              ))
            ORDER BY c.sent_time DESC, c.id DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(CourierStatus::as_str))
            .bind(filter.recipient)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CourierError::storage("postgres courier list failed", e))?;

        rows.iter().map(decode_courier).collect()
    }

    async fn mark_received(&self, id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE courier_transactions
            SET status = $2, received_time = $3, updated_at = $3
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id)
        .bind(CourierStatus::Received.as_str())
        .bind(at)
        .bind(CourierStatus::InTransit.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres status update failed", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn attach_document(&self, id: i64, reference: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE courier_transactions SET document = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(reference)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres document update failed", e))?;

        if result.rows_affected() == 0 {
            return Err(CourierError::not_found("courier", id.to_string()));
        }
        Ok(())
    }

    async fn get_movement(
        &self,
        courier_pk: i64,
        recipient_id: i64,
        spare_id: &str,
        leg: MovementLeg,
    ) -> StoreResult<Option<ReceiptMovement>> {
        let row = sqlx::query(
            r#"
            SELECT courier_pk, recipient_id, spare_id, leg, qty, applied_at
            FROM receipt_movements
            WHERE courier_pk = $1 AND recipient_id = $2 AND spare_id = $3 AND leg = $4
            "#,
        )
        .bind(courier_pk)
        .bind(recipient_id)
        .bind(spare_id)
        .bind(leg.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres movement load failed", e))?;

        row.as_ref().map(decode_movement).transpose()
    }

    async fn record_movement(&self, movement: ReceiptMovement) -> StoreResult<()> {
        let qty: i64 = movement.qty.try_into().map_err(|_| {
            CourierError::Storage("movement quantity exceeds postgres BIGINT range".to_string())
        })?;
        sqlx::query(
            r#"
            INSERT INTO receipt_movements (courier_pk, recipient_id, spare_id, leg, qty, applied_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (courier_pk, recipient_id, spare_id, leg) DO NOTHING
            "#,
        )
        .bind(movement.courier_pk)
        .bind(movement.recipient_id)
        .bind(&movement.spare_id)
        .bind(movement.leg.as_str())
        .bind(qty)
        .bind(movement.applied_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres movement insert failed", e))?;
        Ok(())
    }

    async fn list_movements(&self, courier_pk: i64) -> StoreResult<Vec<ReceiptMovement>> {
        let rows = sqlx::query(
            r#"
            SELECT courier_pk, recipient_id, spare_id, leg, qty, applied_at
            FROM receipt_movements
            WHERE courier_pk = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(courier_pk)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CourierError::storage("postgres movement list failed", e))?;

        rows.iter().map(decode_movement).collect()
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| CourierError::Storage(format!("postgres decode {name} failed: {e}")))
}

fn decode_account(row: &PgRow) -> StoreResult<Account> {
    Ok(Account {
        id: column(row, "id")?,
        username: column(row, "username")?,
        first_name: column(row, "first_name")?,
        last_name: column(row, "last_name")?,
        email: column(row, "email")?,
        is_staff: column(row, "is_staff")?,
    })
}

fn decode_binding(row: &PgRow) -> StoreResult<TechnicianStockBinding> {
    Ok(TechnicianStockBinding {
        id: column(row, "id")?,
        account_id: column(row, "account_id")?,
        sheet_identity: column(row, "sheet_identity")?,
        sheet_id: column(row, "sheet_id")?,
        last_sync: column(row, "last_sync")?,
    })
}

fn decode_courier(row: &PgRow) -> StoreResult<CourierTransaction> {
    let status: String = column(row, "status")?;
    let items: Json<Vec<CourierItem>> = column(row, "items")?;
    Ok(CourierTransaction {
        id: column(row, "id")?,
        courier_id: column(row, "courier_id")?,
        created_by: column(row, "created_by")?,
        recipients: column(row, "recipients")?,
        status: parse_status(&status)?,
        items: items.0,
        notes: column(row, "notes")?,
        document: column(row, "document")?,
        sent_time: column(row, "sent_time")?,
        received_time: column(row, "received_time")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn decode_movement(row: &PgRow) -> StoreResult<ReceiptMovement> {
    let leg: String = column(row, "leg")?;
    let qty: i64 = column(row, "qty")?;
    Ok(ReceiptMovement {
        courier_pk: column(row, "courier_pk")?,
        recipient_id: column(row, "recipient_id")?,
        spare_id: column(row, "spare_id")?,
        leg: MovementLeg::parse(&leg).ok_or_else(|| {
            CourierError::Storage(format!("unknown movement leg '{leg}' in postgres"))
        })?,
        qty: qty
            .try_into()
            .map_err(|_| CourierError::Storage("negative movement quantity in storage".to_string()))?,
        applied_at: column(row, "applied_at")?,
    })
}

fn parse_status(value: &str) -> StoreResult<CourierStatus> {
    CourierStatus::parse(value).ok_or_else(|| {
        CourierError::Storage(format!("unknown courier status '{value}' in postgres"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip_through_storage_parser() {
        for status in [CourierStatus::InTransit, CourierStatus::Received] {
            assert_eq!(parse_status(status.as_str()).unwrap(), status);
        }
        assert!(matches!(
            parse_status("cancelled"),
            Err(CourierError::Storage(_))
        ));
    }

    #[test]
    fn movement_leg_strings_roundtrip() {
        for leg in [MovementLeg::Debit, MovementLeg::Credit] {
            assert_eq!(MovementLeg::parse(leg.as_str()), Some(leg));
        }
    }
}
