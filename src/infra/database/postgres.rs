//! PostgreSQL database client implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    PgConnection, PgPool, Postgres, Row,
    postgres::{PgPoolOptions, PgRow},
};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::keyset::KeysetQuery;
use crate::domain::amount::{amount_from_decimal, amount_to_decimal};
use crate::domain::{
    AccountingService, Amount, AppError, Asset, ClaimProcessor, CreateAssetRequest,
    CreatePeerRequest, CreateWalletAddressRequest, DatabaseClient, DatabaseError, NewWebhookEvent,
    PagePlan, Peer, WalletAddress, WebhookEvent, WebhookEventType, Withdrawal,
};

const ASSET_COLUMNS: &str =
    "x.id, x.code, x.scale, x.withdrawal_threshold, x.liquidity_threshold, x.created_at";

/// Columns of the joined asset, prefixed with `asset_`
const JOINED_ASSET_COLUMNS: &str = "a.id AS asset_id, a.code AS asset_code, a.scale AS asset_scale, \
     a.withdrawal_threshold AS asset_withdrawal_threshold, \
     a.liquidity_threshold AS asset_liquidity_threshold, a.created_at AS asset_created_at";

const PEER_COLUMNS: &str =
    "p.id, p.name, p.static_ilp_address, p.liquidity_threshold, p.created_at";

const WALLET_ADDRESS_COLUMNS: &str = "w.id, w.url, w.public_name, w.total_events_amount, \
     w.process_at, w.deactivated_at, w.created_at";

const WEBHOOK_EVENT_COLUMNS: &str = "e.id, e.type, e.data, e.wallet_address_id, e.asset_id, \
     e.peer_id, e.withdrawal_account_id, e.withdrawal_asset_id, e.withdrawal_amount, e.created_at";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

fn query_error(e: sqlx::Error) -> AppError {
    AppError::Database(DatabaseError::Query(e.to_string()))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(query_error)
}

fn optional_amount(row: &PgRow, name: &str) -> Result<Option<Amount>, AppError> {
    column::<Option<Decimal>>(row, name)?
        .map(|value| amount_from_decimal(value, name))
        .transpose()
}

fn scale_from_row(row: &PgRow, name: &str) -> Result<u8, AppError> {
    let scale: i16 = column(row, name)?;
    u8::try_from(scale).map_err(|_| {
        AppError::Database(DatabaseError::Query(format!(
            "column {name} is out of range: {scale}"
        )))
    })
}

fn new_id() -> String {
    Uuid::now_v7().to_string()
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Parse an asset whose columns carry `prefix`
    fn row_to_asset(row: &PgRow, prefix: &str) -> Result<Asset, AppError> {
        Ok(Asset {
            id: column(row, &format!("{prefix}id"))?,
            code: column(row, &format!("{prefix}code"))?,
            scale: scale_from_row(row, &format!("{prefix}scale"))?,
            withdrawal_threshold: optional_amount(row, &format!("{prefix}withdrawal_threshold"))?,
            liquidity_threshold: optional_amount(row, &format!("{prefix}liquidity_threshold"))?,
            created_at: column(row, &format!("{prefix}created_at"))?,
        })
    }

    fn row_to_peer(row: &PgRow) -> Result<Peer, AppError> {
        Ok(Peer {
            id: column(row, "id")?,
            asset: Self::row_to_asset(row, "asset_")?,
            name: column(row, "name")?,
            static_ilp_address: column(row, "static_ilp_address")?,
            liquidity_threshold: optional_amount(row, "liquidity_threshold")?,
            created_at: column(row, "created_at")?,
        })
    }

    fn row_to_wallet_address(row: &PgRow) -> Result<WalletAddress, AppError> {
        Ok(WalletAddress {
            id: column(row, "id")?,
            url: column(row, "url")?,
            asset: Self::row_to_asset(row, "asset_")?,
            public_name: column(row, "public_name")?,
            total_events_amount: amount_from_decimal(
                column(row, "total_events_amount")?,
                "total_events_amount",
            )?,
            process_at: column(row, "process_at")?,
            deactivated_at: column(row, "deactivated_at")?,
            created_at: column(row, "created_at")?,
        })
    }

    fn row_to_webhook_event(row: &PgRow) -> Result<WebhookEvent, AppError> {
        let event_type: String = column(row, "type")?;
        let withdrawal = match (
            column::<Option<String>>(row, "withdrawal_account_id")?,
            column::<Option<String>>(row, "withdrawal_asset_id")?,
            optional_amount(row, "withdrawal_amount")?,
        ) {
            (Some(account_id), Some(asset_id), Some(amount)) => Some(Withdrawal {
                account_id,
                asset_id,
                amount,
            }),
            _ => None,
        };

        Ok(WebhookEvent {
            id: column(row, "id")?,
            event_type: event_type
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            data: column(row, "data")?,
            wallet_address_id: column(row, "wallet_address_id")?,
            asset_id: column(row, "asset_id")?,
            peer_id: column(row, "peer_id")?,
            withdrawal,
            created_at: column(row, "created_at")?,
        })
    }

    fn peer_select() -> String {
        format!(
            "SELECT {PEER_COLUMNS}, {JOINED_ASSET_COLUMNS} \
             FROM peers p JOIN assets a ON a.id = p.asset_id"
        )
    }

    fn wallet_address_select() -> String {
        format!(
            "SELECT {WALLET_ADDRESS_COLUMNS}, {JOINED_ASSET_COLUMNS} \
             FROM wallet_addresses w JOIN assets a ON a.id = w.asset_id"
        )
    }

    /// Insert an event and its pending delivery record on an open connection
    async fn insert_event_on(
        conn: &mut PgConnection,
        event: &NewWebhookEvent,
    ) -> Result<WebhookEvent, AppError> {
        let sql = format!(
            "WITH e AS (
                INSERT INTO webhook_events (
                    id, type, data, wallet_address_id, asset_id, peer_id,
                    withdrawal_account_id, withdrawal_asset_id, withdrawal_amount
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING *
            )
            SELECT {WEBHOOK_EVENT_COLUMNS} FROM e"
        );
        let withdrawal = event.withdrawal.as_ref();
        let row = sqlx::query(&sql)
            .bind(new_id())
            .bind(event.event_type.as_str())
            .bind(&event.data)
            .bind(&event.wallet_address_id)
            .bind(&event.asset_id)
            .bind(&event.peer_id)
            .bind(withdrawal.map(|w| w.account_id.as_str()))
            .bind(withdrawal.map(|w| w.asset_id.as_str()))
            .bind(withdrawal.map(|w| amount_to_decimal(w.amount)))
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        let inserted = Self::row_to_webhook_event(&row)?;

        sqlx::query(
            r#"
            INSERT INTO webhooks (id, event_id, attempts, process_at)
            VALUES ($1, $2, 0, NOW())
            "#,
        )
        .bind(new_id())
        .bind(&inserted.id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        debug!(id = %inserted.id, event_type = %inserted.event_type, "Webhook event inserted");
        Ok(inserted)
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, data), fields(code = %data.code, scale = data.scale))]
    async fn create_asset(&self, data: &CreateAssetRequest) -> Result<Asset, AppError> {
        let sql = format!(
            "WITH x AS (
                INSERT INTO assets (id, code, scale, withdrawal_threshold, liquidity_threshold)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
            )
            SELECT {ASSET_COLUMNS} FROM x"
        );
        let row = sqlx::query(&sql)
            .bind(new_id())
            .bind(&data.code)
            .bind(i16::from(data.scale))
            .bind(data.withdrawal_threshold.map(amount_to_decimal))
            .bind(data.liquidity_threshold.map(amount_to_decimal))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Self::row_to_asset(&row, "")
    }

    #[instrument(skip(self))]
    async fn get_asset(&self, id: &str) -> Result<Option<Asset>, AppError> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets x WHERE x.id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(|row| Self::row_to_asset(&row, "")).transpose()
    }

    #[instrument(skip(self))]
    async fn list_assets(&self, plan: &PagePlan) -> Result<Vec<Asset>, AppError> {
        let select = format!("SELECT {ASSET_COLUMNS} FROM assets x");
        let mut query = KeysetQuery::new(&select, "assets", "x").page(plan);
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.iter().map(|row| Self::row_to_asset(row, "")).collect()
    }

    #[instrument(skip(self, data), fields(asset_id = %data.asset_id))]
    async fn create_peer(&self, data: &CreatePeerRequest) -> Result<Peer, AppError> {
        let sql = format!(
            "WITH p AS (
                INSERT INTO peers (id, asset_id, name, static_ilp_address, liquidity_threshold)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
            )
            SELECT {PEER_COLUMNS}, {JOINED_ASSET_COLUMNS}
            FROM p JOIN assets a ON a.id = p.asset_id"
        );
        let row = sqlx::query(&sql)
            .bind(new_id())
            .bind(&data.asset_id)
            .bind(&data.name)
            .bind(&data.static_ilp_address)
            .bind(data.liquidity_threshold.map(amount_to_decimal))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Self::row_to_peer(&row)
    }

    #[instrument(skip(self))]
    async fn get_peer(&self, id: &str) -> Result<Option<Peer>, AppError> {
        let sql = format!("{} WHERE p.id = $1", Self::peer_select());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(|row| Self::row_to_peer(&row)).transpose()
    }

    #[instrument(skip(self))]
    async fn list_peers(
        &self,
        asset_id: Option<&str>,
        plan: &PagePlan,
    ) -> Result<Vec<Peer>, AppError> {
        let select = Self::peer_select();
        let mut keyset = KeysetQuery::new(&select, "peers", "p");
        if let Some(asset_id) = asset_id {
            keyset = keyset.filter_eq("p.asset_id", asset_id);
        }
        let mut query = keyset.page(plan);
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.iter().map(Self::row_to_peer).collect()
    }

    #[instrument(skip(self, data), fields(url = %data.url, asset_id = %data.asset_id))]
    async fn create_wallet_address(
        &self,
        data: &CreateWalletAddressRequest,
    ) -> Result<WalletAddress, AppError> {
        let sql = format!(
            "WITH w AS (
                INSERT INTO wallet_addresses (id, url, asset_id, public_name)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            )
            SELECT {WALLET_ADDRESS_COLUMNS}, {JOINED_ASSET_COLUMNS}
            FROM w JOIN assets a ON a.id = w.asset_id"
        );
        let row = sqlx::query(&sql)
            .bind(new_id())
            .bind(&data.url)
            .bind(&data.asset_id)
            .bind(&data.public_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Self::row_to_wallet_address(&row)
    }

    #[instrument(skip(self))]
    async fn get_wallet_address(&self, id: &str) -> Result<Option<WalletAddress>, AppError> {
        let sql = format!("{} WHERE w.id = $1", Self::wallet_address_select());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(|row| Self::row_to_wallet_address(&row))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_wallet_address_by_url(
        &self,
        url: &str,
    ) -> Result<Option<WalletAddress>, AppError> {
        let sql = format!("{} WHERE w.url = $1", Self::wallet_address_select());
        let row = sqlx::query(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(|row| Self::row_to_wallet_address(&row))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn list_wallet_addresses(
        &self,
        plan: &PagePlan,
    ) -> Result<Vec<WalletAddress>, AppError> {
        let select = Self::wallet_address_select();
        let mut query = KeysetQuery::new(&select, "wallet_addresses", "w").page(plan);
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.iter().map(Self::row_to_wallet_address).collect()
    }

    #[instrument(skip(self))]
    async fn trigger_withdrawal(
        &self,
        id: &str,
        max_total_events_amount: Amount,
    ) -> Result<Option<WalletAddress>, AppError> {
        // The amount predicate is re-evaluated under the row lock taken by UPDATE
        let sql = format!(
            "WITH w AS (
                UPDATE wallet_addresses
                SET process_at = NOW()
                WHERE id = $1 AND total_events_amount <= $2
                RETURNING *
            )
            SELECT {WALLET_ADDRESS_COLUMNS}, {JOINED_ASSET_COLUMNS}
            FROM w JOIN assets a ON a.id = w.asset_id"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(amount_to_decimal(max_total_events_amount))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(|row| Self::row_to_wallet_address(&row))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn schedule_withdrawal(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<WalletAddress>, AppError> {
        let sql = format!(
            "WITH w AS (
                UPDATE wallet_addresses
                SET process_at = $2
                WHERE id = $1 AND process_at IS NULL
                RETURNING *
            )
            SELECT {WALLET_ADDRESS_COLUMNS}, {JOINED_ASSET_COLUMNS}
            FROM w JOIN assets a ON a.id = w.asset_id"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(|row| Self::row_to_wallet_address(&row))
            .transpose()
    }

    #[instrument(skip(self, processor))]
    async fn claim_due_wallet_addresses(
        &self,
        limit: i64,
        processor: &dyn ClaimProcessor,
    ) -> Result<Vec<String>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;

        let sql = format!(
            "{} WHERE w.process_at <= NOW() \
             ORDER BY w.process_at, w.id \
             LIMIT $1 \
             FOR UPDATE OF w SKIP LOCKED",
            Self::wallet_address_select()
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await
            .map_err(query_error)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let wallet_address = Self::row_to_wallet_address(row)?;
            let emitted = match processor.process(&wallet_address).await? {
                Some(event) => {
                    Self::insert_event_on(&mut tx, &event).await?;
                    event.withdrawal.map(|w| w.amount).unwrap_or(0)
                }
                None => 0,
            };

            sqlx::query(
                r#"
                UPDATE wallet_addresses
                SET process_at = NULL,
                    total_events_amount = total_events_amount + $2
                WHERE id = $1
                "#,
            )
            .bind(&wallet_address.id)
            .bind(amount_to_decimal(emitted))
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

            claimed.push(wallet_address.id);
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed due wallet addresses");
        }
        Ok(claimed)
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn insert_webhook_event(
        &self,
        event: &NewWebhookEvent,
    ) -> Result<WebhookEvent, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;
        let inserted = Self::insert_event_on(&mut tx, event).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn list_webhook_events(
        &self,
        event_type: Option<WebhookEventType>,
        plan: &PagePlan,
    ) -> Result<Vec<WebhookEvent>, AppError> {
        let select = format!("SELECT {WEBHOOK_EVENT_COLUMNS} FROM webhook_events e");
        let mut keyset = KeysetQuery::new(&select, "webhook_events", "e");
        if let Some(event_type) = event_type {
            keyset = keyset.filter_eq("e.type", event_type.as_str());
        }
        let mut query = keyset.page(plan);
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.iter().map(Self::row_to_webhook_event).collect()
    }
}

/// Reads the running totals the ledger keeps in `ledger_totals`
#[async_trait]
impl AccountingService for PostgresClient {
    #[instrument(skip(self))]
    async fn get_total_received(&self, account_id: &str) -> Result<Option<Amount>, AppError> {
        let row = sqlx::query("SELECT total_received FROM ledger_totals WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(|row| amount_from_decimal(column(&row, "total_received")?, "total_received"))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }

    #[test]
    fn test_joined_selects_alias_asset_columns() {
        let select = PostgresClient::wallet_address_select();
        assert!(select.contains("a.scale AS asset_scale"));
        assert!(select.ends_with("FROM wallet_addresses w JOIN assets a ON a.id = w.asset_id"));

        let select = PostgresClient::peer_select();
        assert!(select.contains("a.id AS asset_id"));
        assert!(select.ends_with("FROM peers p JOIN assets a ON a.id = p.asset_id"));
    }
}
