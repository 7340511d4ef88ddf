//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    AccountingService, Amount, AppError, Asset, ClaimProcessor, CreateAssetRequest,
    CreatePeerRequest, CreateWalletAddressRequest, DatabaseClient, DatabaseError, NewWebhookEvent,
    PagePlan, Peer, WalletAddress, WebhookEvent, WebhookEventType, apply_keyset,
    apply_keyset_where,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Default)]
struct Tables {
    assets: Vec<Asset>,
    peers: Vec<Peer>,
    wallet_addresses: Vec<WalletAddress>,
    webhook_events: Vec<WebhookEvent>,
    /// Rows held by an in-flight claim, the in-memory `FOR UPDATE SKIP LOCKED`
    claimed: HashSet<String>,
    last_created_at: Option<DateTime<Utc>>,
}

impl Tables {
    /// Strictly increasing creation time so keyset order matches insert order
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(created_at);
        created_at
    }

    fn asset(&self, id: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.id == id)
    }

    fn wallet_address_mut(&mut self, id: &str) -> Option<&mut WalletAddress> {
        self.wallet_addresses.iter_mut().find(|w| w.id == id)
    }

    fn insert_event(&mut self, event: &NewWebhookEvent) -> WebhookEvent {
        let event = WebhookEvent {
            id: new_id(),
            event_type: event.event_type,
            data: event.data.clone(),
            wallet_address_id: event.wallet_address_id.clone(),
            asset_id: event.asset_id.clone(),
            peer_id: event.peer_id.clone(),
            withdrawal: event.withdrawal.clone(),
            created_at: self.next_created_at(),
        };
        self.webhook_events.push(event.clone());
        event
    }
}

fn new_id() -> String {
    Uuid::now_v7().to_string()
}

fn unknown_asset(id: &str) -> AppError {
    AppError::Database(DatabaseError::ForeignKey(format!("asset {id}")))
}

/// In-memory database client emulating the Postgres semantics the service relies on
pub struct MockDatabaseClient {
    tables: Arc<Mutex<Tables>>,
    config: MockConfig,
    should_fail: AtomicBool,
    is_healthy: AtomicBool,
}

impl MockDatabaseClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            should_fail: AtomicBool::new(config.should_fail),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.should_fail.load(Ordering::Relaxed) {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }

    pub fn seed_asset(&self, code: &str, withdrawal_threshold: Option<Amount>) -> Asset {
        let mut tables = self.tables.lock().unwrap();
        let asset = Asset {
            id: new_id(),
            code: code.to_string(),
            scale: 2,
            withdrawal_threshold,
            liquidity_threshold: None,
            created_at: tables.next_created_at(),
        };
        tables.assets.push(asset.clone());
        asset
    }

    pub fn seed_asset_with_liquidity(&self, code: &str, liquidity_threshold: Amount) -> Asset {
        let mut tables = self.tables.lock().unwrap();
        let asset = Asset {
            id: new_id(),
            code: code.to_string(),
            scale: 2,
            withdrawal_threshold: None,
            liquidity_threshold: Some(liquidity_threshold),
            created_at: tables.next_created_at(),
        };
        tables.assets.push(asset.clone());
        asset
    }

    pub fn seed_peer(&self, asset: &Asset, static_ilp_address: &str) -> Peer {
        let mut tables = self.tables.lock().unwrap();
        let peer = Peer {
            id: new_id(),
            asset: asset.clone(),
            name: None,
            static_ilp_address: static_ilp_address.to_string(),
            liquidity_threshold: None,
            created_at: tables.next_created_at(),
        };
        tables.peers.push(peer.clone());
        peer
    }

    pub fn seed_wallet_address(
        &self,
        asset: &Asset,
        url: &str,
        total_events_amount: Amount,
        process_at: Option<DateTime<Utc>>,
    ) -> WalletAddress {
        let mut tables = self.tables.lock().unwrap();
        let wallet_address = WalletAddress {
            id: new_id(),
            url: url.to_string(),
            asset: asset.clone(),
            public_name: None,
            total_events_amount,
            process_at,
            deactivated_at: None,
            created_at: tables.next_created_at(),
        };
        tables.wallet_addresses.push(wallet_address.clone());
        wallet_address
    }

    /// Overwrite `total_events_amount` behind the caller's back
    pub fn set_total_events_amount(&self, id: &str, amount: Amount) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(wallet_address) = tables.wallet_address_mut(id) {
            wallet_address.total_events_amount = amount;
        }
    }

    /// All stored events in insertion order
    pub fn webhook_events(&self) -> Vec<WebhookEvent> {
        self.tables.lock().unwrap().webhook_events.clone()
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn create_asset(&self, data: &CreateAssetRequest) -> Result<Asset, AppError> {
        self.check_should_fail()?;
        let mut tables = self.tables.lock().unwrap();
        if tables
            .assets
            .iter()
            .any(|a| a.code == data.code && a.scale == data.scale)
        {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "asset {} scale {}",
                data.code, data.scale
            ))));
        }
        let asset = Asset {
            id: new_id(),
            code: data.code.clone(),
            scale: data.scale,
            withdrawal_threshold: data.withdrawal_threshold,
            liquidity_threshold: data.liquidity_threshold,
            created_at: tables.next_created_at(),
        };
        tables.assets.push(asset.clone());
        Ok(asset)
    }

    async fn get_asset(&self, id: &str) -> Result<Option<Asset>, AppError> {
        self.check_should_fail()?;
        Ok(self.tables.lock().unwrap().asset(id).cloned())
    }

    async fn list_assets(&self, plan: &PagePlan) -> Result<Vec<Asset>, AppError> {
        self.check_should_fail()?;
        Ok(apply_keyset(&self.tables.lock().unwrap().assets, plan))
    }

    async fn create_peer(&self, data: &CreatePeerRequest) -> Result<Peer, AppError> {
        self.check_should_fail()?;
        let mut tables = self.tables.lock().unwrap();
        let asset = tables
            .asset(&data.asset_id)
            .cloned()
            .ok_or_else(|| unknown_asset(&data.asset_id))?;
        let peer = Peer {
            id: new_id(),
            asset,
            name: data.name.clone(),
            static_ilp_address: data.static_ilp_address.clone(),
            liquidity_threshold: data.liquidity_threshold,
            created_at: tables.next_created_at(),
        };
        tables.peers.push(peer.clone());
        Ok(peer)
    }

    async fn get_peer(&self, id: &str) -> Result<Option<Peer>, AppError> {
        self.check_should_fail()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.peers.iter().find(|p| p.id == id).cloned())
    }

    async fn list_peers(
        &self,
        asset_id: Option<&str>,
        plan: &PagePlan,
    ) -> Result<Vec<Peer>, AppError> {
        self.check_should_fail()?;
        let tables = self.tables.lock().unwrap();
        Ok(apply_keyset_where(&tables.peers, plan, |p| {
            asset_id.is_none_or(|id| p.asset.id == id)
        }))
    }

    async fn create_wallet_address(
        &self,
        data: &CreateWalletAddressRequest,
    ) -> Result<WalletAddress, AppError> {
        self.check_should_fail()?;
        let mut tables = self.tables.lock().unwrap();
        let asset = tables
            .asset(&data.asset_id)
            .cloned()
            .ok_or_else(|| unknown_asset(&data.asset_id))?;
        if tables.wallet_addresses.iter().any(|w| w.url == data.url) {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "wallet address {}",
                data.url
            ))));
        }
        let wallet_address = WalletAddress {
            id: new_id(),
            url: data.url.clone(),
            asset,
            public_name: data.public_name.clone(),
            total_events_amount: 0,
            process_at: None,
            deactivated_at: None,
            created_at: tables.next_created_at(),
        };
        tables.wallet_addresses.push(wallet_address.clone());
        Ok(wallet_address)
    }

    async fn get_wallet_address(&self, id: &str) -> Result<Option<WalletAddress>, AppError> {
        self.check_should_fail()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.wallet_addresses.iter().find(|w| w.id == id).cloned())
    }

    async fn get_wallet_address_by_url(
        &self,
        url: &str,
    ) -> Result<Option<WalletAddress>, AppError> {
        self.check_should_fail()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .wallet_addresses
            .iter()
            .find(|w| w.url == url)
            .cloned())
    }

    async fn list_wallet_addresses(
        &self,
        plan: &PagePlan,
    ) -> Result<Vec<WalletAddress>, AppError> {
        self.check_should_fail()?;
        Ok(apply_keyset(
            &self.tables.lock().unwrap().wallet_addresses,
            plan,
        ))
    }

    async fn trigger_withdrawal(
        &self,
        id: &str,
        max_total_events_amount: Amount,
    ) -> Result<Option<WalletAddress>, AppError> {
        self.check_should_fail()?;
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .wallet_address_mut(id)
            .filter(|w| w.total_events_amount <= max_total_events_amount)
            .map(|w| {
                w.process_at = Some(Utc::now());
                w.clone()
            }))
    }

    async fn schedule_withdrawal(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<WalletAddress>, AppError> {
        self.check_should_fail()?;
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .wallet_address_mut(id)
            .filter(|w| w.process_at.is_none())
            .map(|w| {
                w.process_at = Some(at);
                w.clone()
            }))
    }

    async fn claim_due_wallet_addresses(
        &self,
        limit: i64,
        processor: &dyn ClaimProcessor,
    ) -> Result<Vec<String>, AppError> {
        self.check_should_fail()?;
        let now = Utc::now();
        let due: Vec<WalletAddress> = {
            let mut tables = self.tables.lock().unwrap();
            let mut due: Vec<WalletAddress> = tables
                .wallet_addresses
                .iter()
                .filter(|w| w.process_at.is_some_and(|at| at <= now))
                .filter(|w| !tables.claimed.contains(&w.id))
                .cloned()
                .collect();
            due.sort_by(|a, b| (a.process_at, &a.id).cmp(&(b.process_at, &b.id)));
            due.truncate(usize::try_from(limit).unwrap_or(0));
            for w in &due {
                tables.claimed.insert(w.id.clone());
            }
            due
        };

        let mut outcomes = Vec::with_capacity(due.len());
        let mut failure = None;
        for wallet_address in &due {
            match processor.process(wallet_address).await {
                Ok(event) => outcomes.push((wallet_address.id.clone(), event)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut tables = self.tables.lock().unwrap();
        for w in &due {
            tables.claimed.remove(&w.id);
        }
        if let Some(e) = failure {
            return Err(e);
        }
        let mut ids = Vec::with_capacity(outcomes.len());
        for (id, event) in outcomes {
            let emitted = event
                .as_ref()
                .and_then(|e| e.withdrawal.as_ref())
                .map_or(0, |w| w.amount);
            if let Some(event) = &event {
                tables.insert_event(event);
            }
            if let Some(w) = tables.wallet_address_mut(&id) {
                w.process_at = None;
                w.total_events_amount = w.total_events_amount.saturating_add(emitted);
            }
            ids.push(id);
        }
        Ok(ids)
    }

    async fn insert_webhook_event(
        &self,
        event: &NewWebhookEvent,
    ) -> Result<WebhookEvent, AppError> {
        self.check_should_fail()?;
        Ok(self.tables.lock().unwrap().insert_event(event))
    }

    async fn list_webhook_events(
        &self,
        event_type: Option<WebhookEventType>,
        plan: &PagePlan,
    ) -> Result<Vec<WebhookEvent>, AppError> {
        self.check_should_fail()?;
        let tables = self.tables.lock().unwrap();
        Ok(apply_keyset_where(&tables.webhook_events, plan, |e| {
            event_type.is_none_or(|t| e.event_type == t)
        }))
    }
}

/// Mock ledger reporting configurable received totals
pub struct MockAccountingService {
    totals: Mutex<HashMap<String, Amount>>,
    fail_next: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockAccountingService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(None),
            delay: Mutex::new(None),
        }
    }

    pub fn set_total_received(&self, account_id: &str, total: Amount) {
        self.totals
            .lock()
            .unwrap()
            .insert(account_id.to_string(), total);
    }

    /// Make the next lookup fail with `message`
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap() = Some(message.into());
    }

    /// Delay every lookup, widening race windows in concurrency tests
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

impl Default for MockAccountingService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountingService for MockAccountingService {
    async fn get_total_received(&self, account_id: &str) -> Result<Option<Amount>, AppError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(AppError::Internal(message));
        }
        Ok(self.totals.lock().unwrap().get(account_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PaginationWindow, SortOrder};

    fn plan(first: i64) -> PagePlan {
        PagePlan::from_window(&PaginationWindow::first(first), SortOrder::Asc).unwrap()
    }

    #[tokio::test]
    async fn test_mock_database_failure() {
        let db = MockDatabaseClient::failing("db down");
        let err = db.list_assets(&plan(10)).await.unwrap_err();
        assert!(err.to_string().contains("db down"));
    }

    #[tokio::test]
    async fn test_seeded_rows_keep_insert_order() {
        let db = MockDatabaseClient::new();
        let ids: Vec<String> = (0..5)
            .map(|i| db.seed_asset(&format!("A{i:02}"), None).id)
            .collect();
        let listed: Vec<String> = db
            .list_assets(&plan(10))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_filtered_list_accepts_cursor_outside_filter() {
        let db = MockDatabaseClient::new();
        let usd = db.seed_asset("USD", None);
        let eur = db.seed_asset("EUR", None);
        let first_usd = db.seed_peer(&usd, "g.usd.1");
        let eur_peer = db.seed_peer(&eur, "g.eur");
        let second_usd = db.seed_peer(&usd, "g.usd.2");

        let after_eur = PagePlan::from_window(
            &PaginationWindow::after(eur_peer.id.clone(), 10),
            SortOrder::Asc,
        )
        .unwrap();
        let page = db.list_peers(Some(&usd.id), &after_eur).await.unwrap();
        assert_eq!(page, vec![second_usd]);

        let before_eur = PagePlan::from_window(
            &PaginationWindow::before(eur_peer.id.clone(), 10),
            SortOrder::Asc,
        )
        .unwrap();
        let page = db.list_peers(Some(&usd.id), &before_eur).await.unwrap();
        assert_eq!(page, vec![first_usd]);
    }

    #[tokio::test]
    async fn test_duplicate_wallet_address_url() {
        let db = MockDatabaseClient::new();
        let asset = db.seed_asset("USD", None);
        let request = CreateWalletAddressRequest {
            asset_id: asset.id.clone(),
            url: "https://w.example/a".to_string(),
            public_name: None,
        };
        db.create_wallet_address(&request).await.unwrap();
        let err = db.create_wallet_address(&request).await.unwrap_err();
        assert!(matches!(err, AppError::Database(DatabaseError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_accounting_fail_next_is_one_shot() {
        let accounting = MockAccountingService::new();
        accounting.set_total_received("wa-1", 5);
        accounting.fail_next("boom");
        assert!(accounting.get_total_received("wa-1").await.is_err());
        assert_eq!(accounting.get_total_received("wa-1").await.unwrap(), Some(5));
    }
}
