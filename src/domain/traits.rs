//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::amount::Amount;
use super::error::AppError;
use super::pagination::PagePlan;
use super::types::{
    Asset, CreateAssetRequest, CreatePeerRequest, CreateWalletAddressRequest, NewWebhookEvent,
    Peer, WalletAddress, WebhookEvent, WebhookEventType,
};

/// Database client trait for persistence operations
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    async fn create_asset(&self, data: &CreateAssetRequest) -> Result<Asset, AppError>;

    async fn get_asset(&self, id: &str) -> Result<Option<Asset>, AppError>;

    /// One keyset page of assets
    async fn list_assets(&self, plan: &PagePlan) -> Result<Vec<Asset>, AppError>;

    async fn create_peer(&self, data: &CreatePeerRequest) -> Result<Peer, AppError>;

    async fn get_peer(&self, id: &str) -> Result<Option<Peer>, AppError>;

    /// One keyset page of peers, optionally restricted to one asset
    async fn list_peers(
        &self,
        asset_id: Option<&str>,
        plan: &PagePlan,
    ) -> Result<Vec<Peer>, AppError>;

    async fn create_wallet_address(
        &self,
        data: &CreateWalletAddressRequest,
    ) -> Result<WalletAddress, AppError>;

    async fn get_wallet_address(&self, id: &str) -> Result<Option<WalletAddress>, AppError>;

    async fn get_wallet_address_by_url(&self, url: &str)
    -> Result<Option<WalletAddress>, AppError>;

    /// One keyset page of wallet addresses
    async fn list_wallet_addresses(&self, plan: &PagePlan)
    -> Result<Vec<WalletAddress>, AppError>;

    /// Set `process_at = now` if `total_events_amount` is still at most
    /// `max_total_events_amount` when the update runs.
    ///
    /// Returns `None` when the condition no longer holds, which means a
    /// concurrent caller already triggered the withdrawal.
    async fn trigger_withdrawal(
        &self,
        id: &str,
        max_total_events_amount: Amount,
    ) -> Result<Option<WalletAddress>, AppError>;

    /// Set `process_at = at` unless a withdrawal is already scheduled
    async fn schedule_withdrawal(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<WalletAddress>, AppError>;

    /// Claim up to `limit` due wallet addresses and hand each one to `processor`
    /// inside a single transaction.
    ///
    /// Rows locked by a concurrent claim are skipped. For every claimed row the
    /// event returned by the processor (if any) is inserted and its withdrawal
    /// amount added to `total_events_amount`; `process_at` is always cleared.
    /// Any error rolls the whole batch back. Returns the claimed ids.
    async fn claim_due_wallet_addresses(
        &self,
        limit: i64,
        processor: &dyn ClaimProcessor,
    ) -> Result<Vec<String>, AppError>;

    /// Insert an event together with its pending delivery record
    async fn insert_webhook_event(&self, event: &NewWebhookEvent)
    -> Result<WebhookEvent, AppError>;

    /// One keyset page of webhook events, optionally of a single type
    async fn list_webhook_events(
        &self,
        event_type: Option<WebhookEventType>,
        plan: &PagePlan,
    ) -> Result<Vec<WebhookEvent>, AppError>;
}

/// Decides what a claimed wallet address emits
#[async_trait]
pub trait ClaimProcessor: Send + Sync {
    async fn process(
        &self,
        wallet_address: &WalletAddress,
    ) -> Result<Option<NewWebhookEvent>, AppError>;
}

/// Ledger balance collaborator
#[async_trait]
pub trait AccountingService: Send + Sync {
    /// Total amount ever received by an account, `None` if the ledger has no account for it
    async fn get_total_received(&self, account_id: &str) -> Result<Option<Amount>, AppError>;
}

/// TTL-based mutual exclusion keyed by string
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take the lock if nobody holds it. Returns `false` if it is already held.
    async fn acquire(&self, key: &str) -> Result<bool, AppError>;

    /// Drop the lock regardless of who holds it
    async fn release(&self, key: &str) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Expiring cache of serialized idempotency records
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

/// Ledger account with a liquidity-low threshold
pub trait LiquidityAccount: Send + Sync {
    fn account_id(&self) -> &str;

    fn asset(&self) -> &Asset;

    fn liquidity_threshold(&self) -> Option<Amount>;

    fn liquidity_low_event_type(&self) -> WebhookEventType;
}

impl LiquidityAccount for Asset {
    fn account_id(&self) -> &str {
        &self.id
    }

    fn asset(&self) -> &Asset {
        self
    }

    fn liquidity_threshold(&self) -> Option<Amount> {
        self.liquidity_threshold
    }

    fn liquidity_low_event_type(&self) -> WebhookEventType {
        WebhookEventType::AssetLiquidityLow
    }
}

impl LiquidityAccount for Peer {
    fn account_id(&self) -> &str {
        &self.id
    }

    fn asset(&self) -> &Asset {
        &self.asset
    }

    fn liquidity_threshold(&self) -> Option<Amount> {
        self.liquidity_threshold
    }

    fn liquidity_low_event_type(&self) -> WebhookEventType {
        WebhookEventType::PeerLiquidityLow
    }
}
