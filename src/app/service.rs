//! Application service layer.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::domain::{
    AccountingService, AppError, Asset, Connection, CreateAssetRequest, CreatePeerRequest,
    CreateWalletAddressRequest, DatabaseClient, DatabaseError, DebitNotification, HealthResponse,
    HealthStatus, IdempotencyError, LiquidityAccountType, NewWebhookEvent, PaginationWindow, Peer,
    SortOrder, ValidationError, WalletAddress, WebhookEvent, WebhookEventType,
};

use super::idempotency::IdempotencyMiddleware;
use super::pagination::paginate;
use super::poll::poll;
use super::scheduler::EventScheduler;
use super::threshold::ThresholdTrigger;

/// Service-level tunables
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Delay before a credit that did not cross the withdrawal threshold
    /// makes the wallet address due anyway. `None` disables throttling.
    pub withdrawal_throttle_delay: Option<Duration>,
    /// Pause between lookups while waiting for an unknown wallet address
    pub wallet_address_polling_frequency: Duration,
    /// How long to wait for an unknown wallet address to be created
    pub wallet_address_lookup_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            withdrawal_throttle_delay: None,
            wallet_address_polling_frequency: Duration::from_millis(100),
            wallet_address_lookup_timeout: Duration::from_millis(1500),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |name: &str| {
            env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        Self {
            withdrawal_throttle_delay: millis("WITHDRAWAL_THROTTLE_DELAY_MS"),
            wallet_address_polling_frequency: millis("WALLET_ADDRESS_POLLING_FREQUENCY_MS")
                .unwrap_or(defaults.wallet_address_polling_frequency),
            wallet_address_lookup_timeout: millis("WALLET_ADDRESS_LOOKUP_TIMEOUT_MS")
                .unwrap_or(defaults.wallet_address_lookup_timeout),
        }
    }
}

/// Application service containing business logic
pub struct AppService {
    db_client: Arc<dyn DatabaseClient>,
    accounting: Arc<dyn AccountingService>,
    idempotency: IdempotencyMiddleware,
    scheduler: Arc<EventScheduler>,
    threshold: ThresholdTrigger,
    config: ServiceConfig,
}

impl AppService {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        accounting: Arc<dyn AccountingService>,
        idempotency: IdempotencyMiddleware,
        config: ServiceConfig,
    ) -> Self {
        let scheduler = Arc::new(EventScheduler::new(
            Arc::clone(&db_client),
            Arc::clone(&accounting),
        ));
        let threshold = ThresholdTrigger::new(Arc::clone(&db_client));
        Self {
            db_client,
            accounting,
            idempotency,
            scheduler,
            threshold,
            config,
        }
    }

    pub fn scheduler(&self) -> Arc<EventScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Run a create operation under its idempotency key
    async fn idempotent<P, R, F, Fut>(
        &self,
        key: Option<&str>,
        operation_name: &str,
        params: &P,
        request: F,
    ) -> Result<R, AppError>
    where
        P: Serialize + ?Sized,
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R, AppError>>,
    {
        self.idempotency
            .execute(
                key,
                operation_name,
                params,
                request,
                || IdempotencyError::ConcurrentRequest.into(),
                || {
                    IdempotencyError::ParamsMismatch {
                        operation: operation_name.to_string(),
                    }
                    .into()
                },
            )
            .await
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_asset(
        &self,
        request: &CreateAssetRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Asset, AppError> {
        validate(request)?;
        self.idempotent(idempotency_key, "createAsset", request, || async {
            let asset = self.db_client.create_asset(request).await?;
            info!(id = %asset.id, "Created asset");
            Ok(asset)
        })
        .await
    }

    pub async fn get_asset(&self, id: &str) -> Result<Asset, AppError> {
        self.db_client
            .get_asset(id)
            .await?
            .ok_or_else(|| not_found("Asset", id))
    }

    pub async fn list_assets(
        &self,
        window: &PaginationWindow,
        order: SortOrder,
    ) -> Result<Connection<Asset>, AppError> {
        let db = &self.db_client;
        paginate(|plan| async move { db.list_assets(&plan).await }, window, order).await
    }

    #[instrument(skip(self, request), fields(asset_id = %request.asset_id))]
    pub async fn create_peer(
        &self,
        request: &CreatePeerRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Peer, AppError> {
        validate(request)?;
        self.idempotent(idempotency_key, "createPeer", request, || async {
            let peer = self
                .db_client
                .create_peer(request)
                .await
                .map_err(unknown_asset)?;
            info!(id = %peer.id, "Created peer");
            Ok(peer)
        })
        .await
    }

    pub async fn get_peer(&self, id: &str) -> Result<Peer, AppError> {
        self.db_client
            .get_peer(id)
            .await?
            .ok_or_else(|| not_found("Peer", id))
    }

    /// List peers, optionally only those of one asset. An unknown asset is a 404.
    pub async fn list_peers(
        &self,
        asset_id: Option<&str>,
        window: &PaginationWindow,
        order: SortOrder,
    ) -> Result<Connection<Peer>, AppError> {
        if let Some(asset_id) = asset_id {
            self.get_asset(asset_id).await?;
        }
        let db = &self.db_client;
        paginate(
            |plan| async move { db.list_peers(asset_id, &plan).await },
            window,
            order,
        )
        .await
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn create_wallet_address(
        &self,
        request: &CreateWalletAddressRequest,
        idempotency_key: Option<&str>,
    ) -> Result<WalletAddress, AppError> {
        validate(request)?;
        self.idempotent(idempotency_key, "createWalletAddress", request, || async {
            let wallet_address = self
                .db_client
                .create_wallet_address(request)
                .await
                .map_err(unknown_asset)?;
            info!(id = %wallet_address.id, "Created wallet address");
            Ok(wallet_address)
        })
        .await
    }

    pub async fn get_wallet_address(&self, id: &str) -> Result<WalletAddress, AppError> {
        self.db_client
            .get_wallet_address(id)
            .await?
            .ok_or_else(|| not_found("Wallet address", id))
    }

    pub async fn list_wallet_addresses(
        &self,
        window: &PaginationWindow,
        order: SortOrder,
    ) -> Result<Connection<WalletAddress>, AppError> {
        let db = &self.db_client;
        paginate(
            |plan| async move { db.list_wallet_addresses(&plan).await },
            window,
            order,
        )
        .await
    }

    /// Resolve a wallet address by URL.
    ///
    /// An unknown URL emits a `wallet_address.not_found` event so the account
    /// provider can create it, then the URL is polled until it appears or the
    /// lookup timeout elapses.
    #[instrument(skip(self))]
    pub async fn get_or_poll_wallet_address(
        &self,
        url: &str,
    ) -> Result<Option<WalletAddress>, AppError> {
        if let Some(wallet_address) = self.db_client.get_wallet_address_by_url(url).await? {
            return Ok(Some(wallet_address));
        }

        let event = self
            .db_client
            .insert_webhook_event(&NewWebhookEvent::wallet_address_not_found(url))
            .await?;
        debug!(event_id = %event.id, "Wallet address not found, waiting for it to be created");

        let db = &self.db_client;
        let found = poll(
            || async move { db.get_wallet_address_by_url(url).await },
            self.config.wallet_address_polling_frequency,
            self.config.wallet_address_lookup_timeout,
        )
        .await?;
        if found.is_none() {
            warn!("Could not get wallet address");
        }
        Ok(found)
    }

    pub async fn list_webhook_events(
        &self,
        event_type: Option<WebhookEventType>,
        window: &PaginationWindow,
        order: SortOrder,
    ) -> Result<Connection<WebhookEvent>, AppError> {
        let db = &self.db_client;
        paginate(
            |plan| async move { db.list_webhook_events(event_type, &plan).await },
            window,
            order,
        )
        .await
    }

    /// Handle a ledger credit to a wallet address
    #[instrument(skip(self))]
    pub async fn on_credit(&self, wallet_address_id: &str) -> Result<WalletAddress, AppError> {
        let wallet_address = self.get_wallet_address(wallet_address_id).await?;
        let Some(total_received) = self
            .accounting
            .get_total_received(wallet_address_id)
            .await?
        else {
            warn!("Credited wallet address has no ledger account");
            return Ok(wallet_address);
        };
        self.threshold
            .on_credit(
                &wallet_address,
                total_received,
                self.config.withdrawal_throttle_delay,
            )
            .await
    }

    /// Handle a ledger debit from an asset or peer liquidity account
    #[instrument(skip(self, notification), fields(account_id = %notification.account_id))]
    pub async fn on_debit(
        &self,
        notification: &DebitNotification,
    ) -> Result<Option<WebhookEvent>, AppError> {
        match notification.account_type {
            LiquidityAccountType::Asset => {
                let asset = self.get_asset(&notification.account_id).await?;
                self.threshold.on_debit(&asset, notification.balance).await
            }
            LiquidityAccountType::Peer => {
                let peer = self.get_peer(&notification.account_id).await?;
                self.threshold.on_debit(&peer, notification.balance).await
            }
        }
    }

    /// Run one scheduler pass on demand
    pub async fn trigger_events(&self, limit: i64) -> Result<usize, AppError> {
        self.scheduler.trigger_events(limit).await
    }

    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.db_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let lock_health = match self.idempotency.lock_store().health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(db_health, lock_health)
    }
}

fn validate<T: Validate>(request: &T) -> Result<(), AppError> {
    request.validate().map_err(|e| {
        warn!(error = %e, "Validation failed");
        AppError::Validation(ValidationError::Multiple(e.to_string()))
    })
}

fn not_found(entity: &str, id: &str) -> AppError {
    AppError::Database(DatabaseError::NotFound(format!("{entity} {id}")))
}

fn unknown_asset(err: AppError) -> AppError {
    match err {
        AppError::Database(DatabaseError::ForeignKey(_)) => {
            AppError::Validation(ValidationError::InvalidField {
                field: "asset_id".to_string(),
                message: "Unknown asset".to_string(),
            })
        }
        other => other,
    }
}
