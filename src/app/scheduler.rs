//! Claim-and-process scheduling of withdrawal events.
//!
//! Wallet addresses become due when `process_at` passes. Each pass claims a
//! batch of due rows with skip-locked row locks, so concurrent passes (other
//! tasks or other processes) never see the same row, and emits one
//! withdrawal event per row for the amount received since the last event.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::domain::{
    AccountingService, AppError, ClaimProcessor, DatabaseClient, NewWebhookEvent, WalletAddress,
};

pub struct EventScheduler {
    db_client: Arc<dyn DatabaseClient>,
    accounting: Arc<dyn AccountingService>,
}

impl EventScheduler {
    #[must_use]
    pub fn new(db_client: Arc<dyn DatabaseClient>, accounting: Arc<dyn AccountingService>) -> Self {
        Self {
            db_client,
            accounting,
        }
    }

    /// Claim and process up to `limit` due wallet addresses. Returns their ids.
    #[instrument(skip(self))]
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<String>, AppError> {
        self.db_client.claim_due_wallet_addresses(limit, self).await
    }

    /// Claim and process the next due wallet address, if any
    pub async fn process_next(&self) -> Result<Option<String>, AppError> {
        Ok(self.claim_due(1).await?.into_iter().next())
    }

    /// Run one pass and return how many wallet addresses were processed
    pub async fn trigger_events(&self, limit: i64) -> Result<usize, AppError> {
        let claimed = self.claim_due(limit).await?;
        if !claimed.is_empty() {
            info!(count = claimed.len(), "Processed due wallet addresses");
        }
        Ok(claimed.len())
    }
}

#[async_trait]
impl ClaimProcessor for EventScheduler {
    async fn process(
        &self,
        wallet_address: &WalletAddress,
    ) -> Result<Option<NewWebhookEvent>, AppError> {
        let total_received = match self
            .accounting
            .get_total_received(&wallet_address.id)
            .await?
        {
            Some(total) if total > 0 => total,
            _ => {
                warn!(wallet_address_id = %wallet_address.id, "Wallet address has a missing or empty balance");
                return Ok(None);
            }
        };

        let amount = total_received.saturating_sub(wallet_address.total_events_amount);
        if amount == 0 {
            warn!(
                wallet_address_id = %wallet_address.id,
                total_received,
                total_events_amount = wallet_address.total_events_amount,
                "Wallet address has no amount to withdraw"
            );
            return Ok(None);
        }

        Ok(Some(NewWebhookEvent::web_monetization(wallet_address, amount)))
    }
}
