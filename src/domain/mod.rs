//! Domain layer containing core business types, traits, and error definitions.

pub mod amount;
pub mod error;
pub mod pagination;
pub mod traits;
pub mod types;

pub use amount::Amount;
pub use error::{
    AppError, CacheError, DatabaseError, IdempotencyError, PaginationError, ValidationError,
};
pub use pagination::{
    DEFAULT_PAGE_SIZE, Direction, KEYSET_COLUMNS, MAX_PAGE_SIZE, PagePlan, Paginated,
    PaginationWindow, SortOrder, apply_keyset, apply_keyset_where,
};
pub use traits::{
    AccountingService, ClaimProcessor, DatabaseClient, IdempotencyStore, LiquidityAccount,
    LockStore,
};
pub use types::{
    Asset, Connection, CreateAssetRequest, CreatePeerRequest, CreateWalletAddressRequest,
    CreditNotification, DebitNotification, DebitResponse, Edge, ErrorDetail, ErrorResponse,
    HealthResponse, HealthStatus, IdempotencyRecord, LiquidityAccountType, ListParams,
    LookupParams, NewWebhookEvent, PageInfo, Peer, TriggerEventsParams, TriggerEventsResponse,
    WalletAddress, WebhookEvent, WebhookEventFilter, WebhookEventType, Withdrawal,
};
