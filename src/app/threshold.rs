//! Balance-threshold reactions to ledger credits and debits.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, Amount, DatabaseClient, LiquidityAccount, NewWebhookEvent, WalletAddress,
    WebhookEvent,
};

pub struct ThresholdTrigger {
    db_client: Arc<dyn DatabaseClient>,
}

impl ThresholdTrigger {
    #[must_use]
    pub fn new(db_client: Arc<dyn DatabaseClient>) -> Self {
        Self { db_client }
    }

    /// React to a credit on a wallet address.
    ///
    /// When the amount received since the last withdrawal event reaches the
    /// asset's withdrawal threshold the wallet address is made due now. The
    /// update is conditional on `total_events_amount` so concurrent credits
    /// trigger at most once. Otherwise, with a throttle delay configured, a
    /// withdrawal is scheduled after the delay unless one is already pending.
    #[instrument(skip(self, wallet_address), fields(wallet_address_id = %wallet_address.id))]
    pub async fn on_credit(
        &self,
        wallet_address: &WalletAddress,
        total_received: Amount,
        throttle_delay: Option<Duration>,
    ) -> Result<WalletAddress, AppError> {
        if let Some(threshold) = wallet_address.asset.withdrawal_threshold {
            if let Some(max_total_events_amount) = total_received.checked_sub(threshold) {
                if wallet_address.total_events_amount <= max_total_events_amount {
                    match self
                        .db_client
                        .trigger_withdrawal(&wallet_address.id, max_total_events_amount)
                        .await?
                    {
                        Some(updated) => {
                            info!(total_received, threshold, "Withdrawal threshold reached");
                            return Ok(updated);
                        }
                        None => debug!("Withdrawal already triggered by a concurrent credit"),
                    }
                }
            }
        }

        if let Some(delay) = throttle_delay {
            if wallet_address.process_at.is_none() {
                let at = TimeDelta::from_std(delay)
                    .ok()
                    .and_then(|delay| Utc::now().checked_add_signed(delay))
                    .ok_or_else(|| {
                        AppError::Internal(format!("Invalid withdrawal throttle delay {delay:?}"))
                    })?;
                if let Some(updated) = self
                    .db_client
                    .schedule_withdrawal(&wallet_address.id, at)
                    .await?
                {
                    debug!(process_at = %at, "Scheduled throttled withdrawal");
                    return Ok(updated);
                }
            }
        }

        Ok(wallet_address.clone())
    }

    /// React to a debit on an asset or peer liquidity account.
    ///
    /// Emits a liquidity-low event when `balance` is at or below the account's
    /// threshold. Accounts without a threshold never emit.
    #[instrument(skip(self, account), fields(account_id = %account.account_id()))]
    pub async fn on_debit<A>(
        &self,
        account: &A,
        balance: Amount,
    ) -> Result<Option<WebhookEvent>, AppError>
    where
        A: LiquidityAccount + ?Sized,
    {
        let Some(threshold) = account.liquidity_threshold() else {
            return Ok(None);
        };
        if balance > threshold {
            return Ok(None);
        }

        let event = NewWebhookEvent::liquidity_low(
            account.liquidity_low_event_type(),
            account.account_id(),
            account.asset(),
            threshold,
            balance,
        );
        let event = self.db_client.insert_webhook_event(&event).await?;
        info!(balance, threshold, event_id = %event.id, "Liquidity low");
        Ok(Some(event))
    }
}
