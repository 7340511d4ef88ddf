//! Domain types with validation support.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::amount::{Amount, amount_string, option_amount_string};
use super::pagination::{Paginated, PaginationWindow, SortOrder};

/// Ledger asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Asset {
    /// Unique identifier (UUID)
    #[schema(example = "0190a3c4-5d8e-7f00-9a1b-2c3d4e5f6a7b")]
    pub id: String,
    /// Asset code
    #[schema(example = "USD")]
    pub code: String,
    /// Difference in orders of magnitude between the standard unit and the ledger unit
    #[schema(example = 2)]
    pub scale: u8,
    /// Received amount that makes a wallet address due for a withdrawal event
    #[serde(default, with = "option_amount_string")]
    #[schema(value_type = Option<String>, example = "1000")]
    pub withdrawal_threshold: Option<Amount>,
    /// Balance at or below which a liquidity-low event is emitted
    #[serde(default, with = "option_amount_string")]
    #[schema(value_type = Option<String>, example = "500")]
    pub liquidity_threshold: Option<Amount>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// ILP peer, always loaded together with its asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Peer {
    pub id: String,
    pub asset: Asset,
    #[schema(example = "Partner bank")]
    pub name: Option<String>,
    #[schema(example = "g.partner.bank")]
    pub static_ilp_address: String,
    #[serde(default, with = "option_amount_string")]
    #[schema(value_type = Option<String>, example = "500")]
    pub liquidity_threshold: Option<Amount>,
    pub created_at: DateTime<Utc>,
}

/// Wallet address, always loaded together with its asset.
///
/// `process_at` is the scheduling column: `None` means nothing is pending,
/// a past timestamp makes the row claimable by the event scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct WalletAddress {
    pub id: String,
    #[schema(example = "https://wallet.example.com/alice")]
    pub url: String,
    pub asset: Asset,
    #[schema(example = "Alice")]
    pub public_name: Option<String>,
    /// Sum of all amounts already reported in withdrawal events
    #[serde(with = "amount_string")]
    #[schema(value_type = String, example = "0")]
    pub total_events_amount: Amount,
    pub process_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WalletAddress {
    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none_or(|at| at > Utc::now())
    }
}

impl Paginated for Asset {
    fn cursor(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Paginated for Peer {
    fn cursor(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Paginated for WalletAddress {
    fn cursor(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Type of an emitted webhook event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum WebhookEventType {
    #[serde(rename = "wallet_address.web_monetization")]
    WalletAddressWebMonetization,
    #[serde(rename = "wallet_address.not_found")]
    WalletAddressNotFound,
    #[serde(rename = "asset.liquidity_low")]
    AssetLiquidityLow,
    #[serde(rename = "peer.liquidity_low")]
    PeerLiquidityLow,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WalletAddressWebMonetization => "wallet_address.web_monetization",
            Self::WalletAddressNotFound => "wallet_address.not_found",
            Self::AssetLiquidityLow => "asset.liquidity_low",
            Self::PeerLiquidityLow => "peer.liquidity_low",
        }
    }
}

impl std::str::FromStr for WebhookEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallet_address.web_monetization" => Ok(Self::WalletAddressWebMonetization),
            "wallet_address.not_found" => Ok(Self::WalletAddressNotFound),
            "asset.liquidity_low" => Ok(Self::AssetLiquidityLow),
            "peer.liquidity_low" => Ok(Self::PeerLiquidityLow),
            _ => Err(format!("Invalid webhook event type: {}", s)),
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Liquidity to move out of the ledger alongside an event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Withdrawal {
    pub account_id: String,
    pub asset_id: String,
    #[serde(with = "amount_string")]
    #[schema(value_type = String, example = "250")]
    pub amount: Amount,
}

/// Persisted webhook event, consumed by the delivery collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    #[schema(value_type = Object)]
    pub data: Value,
    pub wallet_address_id: Option<String>,
    pub asset_id: Option<String>,
    pub peer_id: Option<String>,
    pub withdrawal: Option<Withdrawal>,
    pub created_at: DateTime<Utc>,
}

impl Paginated for WebhookEvent {
    fn cursor(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Webhook event about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookEvent {
    pub event_type: WebhookEventType,
    pub data: Value,
    pub wallet_address_id: Option<String>,
    pub asset_id: Option<String>,
    pub peer_id: Option<String>,
    pub withdrawal: Option<Withdrawal>,
}

impl NewWebhookEvent {
    /// Withdrawal event for the amount a wallet address received since its last event
    #[must_use]
    pub fn web_monetization(wallet_address: &WalletAddress, amount: Amount) -> Self {
        Self {
            event_type: WebhookEventType::WalletAddressWebMonetization,
            data: json!({
                "wallet_address": {
                    "id": wallet_address.id,
                    "created_at": wallet_address.created_at,
                    "received_amount": {
                        "value": amount.to_string(),
                        "asset_code": wallet_address.asset.code,
                        "asset_scale": wallet_address.asset.scale,
                    },
                },
            }),
            wallet_address_id: Some(wallet_address.id.clone()),
            asset_id: None,
            peer_id: None,
            withdrawal: Some(Withdrawal {
                account_id: wallet_address.id.clone(),
                asset_id: wallet_address.asset.id.clone(),
                amount,
            }),
        }
    }

    #[must_use]
    pub fn wallet_address_not_found(url: &str) -> Self {
        Self {
            event_type: WebhookEventType::WalletAddressNotFound,
            data: json!({ "wallet_address_url": url }),
            wallet_address_id: None,
            asset_id: None,
            peer_id: None,
            withdrawal: None,
        }
    }

    /// Liquidity-low event for an asset or a peer whose balance hit its threshold
    #[must_use]
    pub fn liquidity_low(
        event_type: WebhookEventType,
        id: &str,
        asset: &Asset,
        liquidity_threshold: Amount,
        balance: Amount,
    ) -> Self {
        let (asset_id, peer_id) = match event_type {
            WebhookEventType::PeerLiquidityLow => (None, Some(id.to_string())),
            _ => (Some(id.to_string()), None),
        };
        Self {
            event_type,
            data: json!({
                "id": id,
                "asset": {
                    "id": asset.id,
                    "code": asset.code,
                    "scale": asset.scale,
                },
                "liquidity_threshold": liquidity_threshold.to_string(),
                "balance": balance.to_string(),
            }),
            wallet_address_id: None,
            asset_id,
            peer_id,
            withdrawal: None,
        }
    }
}

/// Request to create an asset
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateAssetRequest {
    #[validate(custom(function = "validate_asset_code"))]
    #[schema(example = "USD")]
    pub code: String,
    #[schema(example = 2)]
    pub scale: u8,
    #[serde(default, with = "option_amount_string")]
    #[schema(value_type = Option<String>, example = "1000")]
    pub withdrawal_threshold: Option<Amount>,
    #[serde(default, with = "option_amount_string")]
    #[schema(value_type = Option<String>, example = "500")]
    pub liquidity_threshold: Option<Amount>,
}

/// Request to create a peer
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePeerRequest {
    #[validate(length(min = 1, message = "Asset ID is required"))]
    pub asset_id: String,
    #[validate(length(max = 255, message = "Name must be at most 255 characters"))]
    pub name: Option<String>,
    #[validate(custom(function = "validate_ilp_address"))]
    #[schema(example = "g.partner.bank")]
    pub static_ilp_address: String,
    #[serde(default, with = "option_amount_string")]
    #[schema(value_type = Option<String>, example = "500")]
    pub liquidity_threshold: Option<Amount>,
}

/// Request to create a wallet address
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateWalletAddressRequest {
    #[validate(length(min = 1, message = "Asset ID is required"))]
    pub asset_id: String,
    #[validate(custom(function = "validate_wallet_address_url"))]
    #[schema(example = "https://wallet.example.com/alice")]
    pub url: String,
    #[validate(length(max = 255, message = "Public name must be at most 255 characters"))]
    pub public_name: Option<String>,
}

/// Credit notification from the ledger
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditNotification {
    pub wallet_address_id: String,
}

/// Kind of account a debit notification refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityAccountType {
    Asset,
    Peer,
}

/// Debit notification from the ledger
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DebitNotification {
    pub account_type: LiquidityAccountType,
    pub account_id: String,
    /// Balance after the debit
    #[serde(with = "amount_string")]
    #[schema(value_type = String, example = "400")]
    pub balance: Amount,
}

/// Outcome of a debit notification
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DebitResponse {
    /// Liquidity-low event emitted by this debit, if any
    pub event: Option<WebhookEvent>,
}

/// Query of `POST /internal/scheduler/trigger`
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TriggerEventsParams {
    /// Maximum number of wallet addresses to claim (1-100, default 10)
    pub limit: Option<i64>,
}

impl TriggerEventsParams {
    pub const DEFAULT_LIMIT: i64 = 10;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, super::pagination::MAX_PAGE_SIZE)
    }
}

/// Outcome of a manual scheduler pass
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TriggerEventsResponse {
    /// Number of wallet addresses claimed
    pub processed: usize,
}

const ILP_ALLOCATION_SCHEMES: [&str; 10] = [
    "g", "private", "example", "peer", "self", "test", "test1", "test2", "test3", "local",
];

const MAX_ILP_ADDRESS_LENGTH: usize = 1023;

/// Path prefixes owned by resource servers, never valid as a wallet address
const RESERVED_WALLET_ADDRESS_PATHS: [&str; 3] =
    ["/incoming-payments", "/outgoing-payments", "/quotes"];

fn field_error(code: &'static str, message: &'static str) -> validator::ValidationError {
    validator::ValidationError::new(code).with_message(message.into())
}

fn validate_asset_code(code: &str) -> Result<(), validator::ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(field_error(
            "asset_code",
            "Asset code must be 3 upper-case letters",
        ))
    }
}

pub(crate) fn validate_ilp_address(address: &str) -> Result<(), validator::ValidationError> {
    if address.is_empty() || address.len() > MAX_ILP_ADDRESS_LENGTH {
        return Err(field_error(
            "ilp_address",
            "ILP address must be between 1 and 1023 characters",
        ));
    }
    let mut segments = address.split('.');
    let scheme = segments.next().unwrap_or_default();
    if !ILP_ALLOCATION_SCHEMES.contains(&scheme) {
        return Err(field_error(
            "ilp_address",
            "ILP address has an unknown allocation scheme",
        ));
    }
    let mut count = 0;
    for segment in segments {
        count += 1;
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '~' | '-'));
        if !valid {
            return Err(field_error("ilp_address", "ILP address has an invalid segment"));
        }
    }
    if count == 0 {
        return Err(field_error(
            "ilp_address",
            "ILP address needs at least one segment after the scheme",
        ));
    }
    Ok(())
}

fn validate_wallet_address_url(raw: &str) -> Result<(), validator::ValidationError> {
    let url = url::Url::parse(raw)
        .map_err(|_| field_error("wallet_address_url", "Wallet address URL is invalid"))?;
    if url.scheme() != "https" {
        return Err(field_error(
            "wallet_address_url",
            "Wallet address URL must use https",
        ));
    }
    let path = url.path().trim_end_matches('/');
    if path.is_empty() {
        return Err(field_error(
            "wallet_address_url",
            "Wallet address URL must have a path",
        ));
    }
    if RESERVED_WALLET_ADDRESS_PATHS
        .iter()
        .any(|reserved| path == *reserved || path.starts_with(&format!("{reserved}/")))
    {
        return Err(field_error(
            "wallet_address_url",
            "Wallet address URL uses a reserved path",
        ));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(field_error(
            "wallet_address_url",
            "Wallet address URL must not carry a query or fragment",
        ));
    }
    Ok(())
}

/// Pagination query parameters shared by every list endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Return rows after this cursor
    pub after: Option<String>,
    /// Return rows before this cursor
    pub before: Option<String>,
    /// Forward page size (0-100, default 20)
    pub first: Option<i64>,
    /// Backward page size (0-100, default 20, requires `before`)
    pub last: Option<i64>,
    /// `asc` or `desc` (default)
    pub sort_order: Option<SortOrder>,
}

impl ListParams {
    #[must_use]
    pub fn window(&self) -> PaginationWindow {
        PaginationWindow {
            after: self.after.clone(),
            before: self.before.clone(),
            first: self.first,
            last: self.last,
        }
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order.unwrap_or_default()
    }
}

/// Event type filter for `GET /webhook-events`
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WebhookEventFilter {
    /// Only return events of this type
    #[serde(rename = "type")]
    pub event_type: Option<WebhookEventType>,
}

/// Query of `GET /wallet-addresses/lookup`
#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LookupParams {
    /// Wallet address URL
    pub url: String,
}

/// Relay page info
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// Single element of a connection
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Edge<T: ToSchema> {
    pub cursor: String,
    pub node: T,
}

/// Relay connection: one page of nodes plus its page info
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Connection<T: ToSchema> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T: ToSchema + Paginated> Connection<T> {
    pub fn new(nodes: Vec<T>, page_info: PageInfo) -> Self {
        let edges = nodes
            .into_iter()
            .map(|node| Edge {
                cursor: node.cursor().to_string(),
                node,
            })
            .collect();
        Self { edges, page_info }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|edge| &edge.node)
    }
}

/// Cached outcome of an idempotent operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdempotencyRecord {
    pub operation_name: String,
    pub params: Value,
    pub result: Value,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Relational store health status
    pub database: HealthStatus,
    /// Lock / idempotency store health status
    pub lock_store: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    /// The lock store is advisory, so losing it only degrades the service.
    #[must_use]
    pub fn new(database: HealthStatus, lock_store: HealthStatus) -> Self {
        let status = match (&database, &lock_store) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            lock_store,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "validation_error")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "Asset code must be 3 upper-case letters")]
    pub message: String,
}
