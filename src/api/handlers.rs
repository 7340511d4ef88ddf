//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::{error, info};
use utoipa::OpenApi;

use crate::app::AppState;
use crate::domain::{
    AppError, Asset, CacheError, Connection, CreateAssetRequest, CreatePeerRequest,
    CreateWalletAddressRequest, CreditNotification, DatabaseError, DebitNotification,
    DebitResponse, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus, IdempotencyError,
    LiquidityAccountType, ListParams, LookupParams, PageInfo, Peer, SortOrder,
    TriggerEventsParams, TriggerEventsResponse, WalletAddress, WebhookEvent, WebhookEventFilter,
    WebhookEventType, Withdrawal,
};

/// Header carrying the client-chosen idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ledger Core API",
        version = "0.1.0",
        description = "Multi-tenant ledger entities, keyset pagination, withdrawal scheduling and idempotent writes",
        license(
            name = "MIT"
        )
    ),
    paths(
        list_assets_handler,
        create_asset_handler,
        get_asset_handler,
        list_asset_peers_handler,
        list_peers_handler,
        create_peer_handler,
        get_peer_handler,
        list_wallet_addresses_handler,
        create_wallet_address_handler,
        lookup_wallet_address_handler,
        get_wallet_address_handler,
        list_webhook_events_handler,
        ledger_credit_handler,
        ledger_debit_handler,
        trigger_events_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            Asset,
            Peer,
            WalletAddress,
            WebhookEvent,
            WebhookEventType,
            Withdrawal,
            CreateAssetRequest,
            CreatePeerRequest,
            CreateWalletAddressRequest,
            CreditNotification,
            DebitNotification,
            DebitResponse,
            LiquidityAccountType,
            TriggerEventsResponse,
            SortOrder,
            PageInfo,
            Connection<Asset>,
            Connection<Peer>,
            Connection<WalletAddress>,
            Connection<WebhookEvent>,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "assets", description = "Asset management endpoints"),
        (name = "peers", description = "Peer management endpoints"),
        (name = "wallet-addresses", description = "Wallet address endpoints"),
        (name = "webhook-events", description = "Emitted event log"),
        (name = "internal", description = "Ledger hooks and scheduler control"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Read the idempotency key header. Empty or non-ASCII values count as absent.
pub fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// List assets
#[utoipa::path(
    get,
    path = "/assets",
    tag = "assets",
    params(ListParams),
    responses(
        (status = 200, description = "Page of assets", body = Connection<Asset>),
        (status = 400, description = "Invalid pagination window", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_assets_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Connection<Asset>>, AppError> {
    let page = state
        .service
        .list_assets(&params.window(), params.sort_order())
        .await?;
    Ok(Json(page))
}

/// Create an asset
///
/// Retries carrying the same `Idempotency-Key` replay the first result.
#[utoipa::path(
    post,
    path = "/assets",
    tag = "assets",
    request_body = CreateAssetRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Client-chosen idempotency key")
    ),
    responses(
        (status = 201, description = "Asset created", body = Asset),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Duplicate asset or concurrent request with the same key", body = ErrorResponse),
        (status = 422, description = "Idempotency key reused for a different request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_asset_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateAssetRequest>,
) -> Result<(StatusCode, Json<Asset>), AppError> {
    let asset = state
        .service
        .create_asset(&payload, idempotency_key(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(asset)))
}

/// Get a single asset by ID
#[utoipa::path(
    get,
    path = "/assets/{id}",
    tag = "assets",
    params(
        ("id" = String, Path, description = "Asset ID")
    ),
    responses(
        (status = 200, description = "Asset found", body = Asset),
        (status = 404, description = "Asset not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_asset_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Asset>, AppError> {
    let asset = state.service.get_asset(&id).await?;
    Ok(Json(asset))
}

/// List the peers of one asset
#[utoipa::path(
    get,
    path = "/assets/{id}/peers",
    tag = "assets",
    params(
        ("id" = String, Path, description = "Asset ID"),
        ListParams
    ),
    responses(
        (status = 200, description = "Page of peers", body = Connection<Peer>),
        (status = 400, description = "Invalid pagination window", body = ErrorResponse),
        (status = 404, description = "Asset not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_asset_peers_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Connection<Peer>>, AppError> {
    let page = state
        .service
        .list_peers(Some(&id), &params.window(), params.sort_order())
        .await?;
    Ok(Json(page))
}

/// List peers
#[utoipa::path(
    get,
    path = "/peers",
    tag = "peers",
    params(ListParams),
    responses(
        (status = 200, description = "Page of peers", body = Connection<Peer>),
        (status = 400, description = "Invalid pagination window", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_peers_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Connection<Peer>>, AppError> {
    let page = state
        .service
        .list_peers(None, &params.window(), params.sort_order())
        .await?;
    Ok(Json(page))
}

/// Create a peer
#[utoipa::path(
    post,
    path = "/peers",
    tag = "peers",
    request_body = CreatePeerRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Client-chosen idempotency key")
    ),
    responses(
        (status = 201, description = "Peer created", body = Peer),
        (status = 400, description = "Validation error or unknown asset", body = ErrorResponse),
        (status = 409, description = "Concurrent request with the same key", body = ErrorResponse),
        (status = 422, description = "Idempotency key reused for a different request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_peer_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreatePeerRequest>,
) -> Result<(StatusCode, Json<Peer>), AppError> {
    let peer = state
        .service
        .create_peer(&payload, idempotency_key(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(peer)))
}

/// Get a single peer by ID
#[utoipa::path(
    get,
    path = "/peers/{id}",
    tag = "peers",
    params(
        ("id" = String, Path, description = "Peer ID")
    ),
    responses(
        (status = 200, description = "Peer found", body = Peer),
        (status = 404, description = "Peer not found", body = ErrorResponse)
    )
)]
pub async fn get_peer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Peer>, AppError> {
    let peer = state.service.get_peer(&id).await?;
    Ok(Json(peer))
}

/// List wallet addresses
#[utoipa::path(
    get,
    path = "/wallet-addresses",
    tag = "wallet-addresses",
    params(ListParams),
    responses(
        (status = 200, description = "Page of wallet addresses", body = Connection<WalletAddress>),
        (status = 400, description = "Invalid pagination window", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_wallet_addresses_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Connection<WalletAddress>>, AppError> {
    let page = state
        .service
        .list_wallet_addresses(&params.window(), params.sort_order())
        .await?;
    Ok(Json(page))
}

/// Create a wallet address
#[utoipa::path(
    post,
    path = "/wallet-addresses",
    tag = "wallet-addresses",
    request_body = CreateWalletAddressRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Client-chosen idempotency key")
    ),
    responses(
        (status = 201, description = "Wallet address created", body = WalletAddress),
        (status = 400, description = "Validation error or unknown asset", body = ErrorResponse),
        (status = 409, description = "URL already taken or concurrent request with the same key", body = ErrorResponse),
        (status = 422, description = "Idempotency key reused for a different request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_wallet_address_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateWalletAddressRequest>,
) -> Result<(StatusCode, Json<WalletAddress>), AppError> {
    let wallet_address = state
        .service
        .create_wallet_address(&payload, idempotency_key(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(wallet_address)))
}

/// Look up a wallet address by URL
///
/// An unknown URL emits a `wallet_address.not_found` event and waits a
/// bounded time for the wallet address to be created.
#[utoipa::path(
    get,
    path = "/wallet-addresses/lookup",
    tag = "wallet-addresses",
    params(LookupParams),
    responses(
        (status = 200, description = "Wallet address found", body = WalletAddress),
        (status = 404, description = "Wallet address did not appear in time", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn lookup_wallet_address_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LookupParams>,
) -> Result<Json<WalletAddress>, AppError> {
    let wallet_address = state
        .service
        .get_or_poll_wallet_address(&params.url)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(params.url)))?;
    Ok(Json(wallet_address))
}

/// Get a single wallet address by ID
#[utoipa::path(
    get,
    path = "/wallet-addresses/{id}",
    tag = "wallet-addresses",
    params(
        ("id" = String, Path, description = "Wallet address ID")
    ),
    responses(
        (status = 200, description = "Wallet address found", body = WalletAddress),
        (status = 404, description = "Wallet address not found", body = ErrorResponse)
    )
)]
pub async fn get_wallet_address_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WalletAddress>, AppError> {
    let wallet_address = state.service.get_wallet_address(&id).await?;
    Ok(Json(wallet_address))
}

/// List emitted webhook events
#[utoipa::path(
    get,
    path = "/webhook-events",
    tag = "webhook-events",
    params(ListParams, WebhookEventFilter),
    responses(
        (status = 200, description = "Page of webhook events", body = Connection<WebhookEvent>),
        (status = 400, description = "Invalid pagination window", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_webhook_events_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
    Query(filter): Query<WebhookEventFilter>,
) -> Result<Json<Connection<WebhookEvent>>, AppError> {
    let page = state
        .service
        .list_webhook_events(filter.event_type, &params.window(), params.sort_order())
        .await?;
    Ok(Json(page))
}

/// Ledger hook: a wallet address was credited
///
/// Makes the wallet address due when its withdrawal threshold is reached,
/// or schedules a throttled withdrawal.
#[utoipa::path(
    post,
    path = "/internal/ledger/credit",
    tag = "internal",
    request_body = CreditNotification,
    responses(
        (status = 200, description = "Wallet address after the credit", body = WalletAddress),
        (status = 404, description = "Wallet address not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn ledger_credit_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreditNotification>,
) -> Result<Json<WalletAddress>, AppError> {
    let wallet_address = state.service.on_credit(&payload.wallet_address_id).await?;
    Ok(Json(wallet_address))
}

/// Ledger hook: an asset or peer liquidity account was debited
#[utoipa::path(
    post,
    path = "/internal/ledger/debit",
    tag = "internal",
    request_body = DebitNotification,
    responses(
        (status = 200, description = "Emitted liquidity-low event, if any", body = DebitResponse),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn ledger_debit_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DebitNotification>,
) -> Result<Json<DebitResponse>, AppError> {
    let event = state.service.on_debit(&payload).await?;
    Ok(Json(DebitResponse { event }))
}

/// Run one scheduler pass now
#[utoipa::path(
    post,
    path = "/internal/scheduler/trigger",
    tag = "internal",
    params(TriggerEventsParams),
    responses(
        (status = 200, description = "Number of wallet addresses processed", body = TriggerEventsResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn trigger_events_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TriggerEventsParams>,
) -> Result<Json<TriggerEventsResponse>, AppError> {
    let processed = state.scheduler.trigger_events(params.limit()).await?;
    info!(processed, "Manual scheduler pass finished");
    Ok(Json(TriggerEventsResponse { processed }))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                DatabaseError::ForeignKey(_) => (
                    StatusCode::BAD_REQUEST,
                    "invalid_reference",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Pagination(_) => (
                StatusCode::BAD_REQUEST,
                "pagination_error",
                self.to_string(),
            ),
            AppError::Idempotency(idem_err) => match idem_err {
                IdempotencyError::ConcurrentRequest => (
                    StatusCode::CONFLICT,
                    "concurrent_request",
                    self.to_string(),
                ),
                IdempotencyError::ParamsMismatch { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "idempotency_mismatch",
                    self.to_string(),
                ),
            },
            AppError::Cache(cache_err) => match cache_err {
                CacheError::Connection(_) | CacheError::Command(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "cache_error",
                    self.to_string(),
                ),
            },
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PaginationError;
    use axum::http::HeaderValue;

    #[test]
    fn test_idempotency_key_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers), None);

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("  "));
        assert_eq!(idempotency_key(&headers), None);

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(idempotency_key(&headers), Some("abc-123"));
    }

    #[test]
    fn test_error_status_codes() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (
                PaginationError::BackwardPaginationRequiresCursor.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                IdempotencyError::ConcurrentRequest.into(),
                StatusCode::CONFLICT,
            ),
            (
                IdempotencyError::ParamsMismatch {
                    operation: "createAsset".to_string(),
                }
                .into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DatabaseError::NotFound("x".to_string()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                DatabaseError::Connection("down".to_string()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CacheError::Command("boom".to_string()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::Internal("x".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
