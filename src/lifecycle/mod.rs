//! Document lifecycle against the ERP.
//!
//! [`LifecycleController`] is the entry point. It builds drafts through
//! [`DocumentDraftBuilder`], allocates fiscal numbers with
//! [`NumberAllocator`], turns upstream rejections into [`FailureKind`]s,
//! keeps linked records in step via [`LinkedRecordSynchronizer`] and hands
//! amendments to [`CompensationCoordinator`].
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), comprobantes::ComprobanteError> {
//! use std::sync::Arc;
//!
//! use comprobantes::core::*;
//! use comprobantes::erp::HttpErpClient;
//! use comprobantes::lifecycle::*;
//!
//! let client = Arc::new(HttpErpClient::from_env()?);
//! let controller = LifecycleController::new(ErpContext::new(client, LifecycleSettings::default()));
//!
//! let request = DraftRequest::new(Direction::Sales, DocumentKind::Invoice, "Cliente SA", "Empresa")
//!     .numbering_method("FE-FAC-A-00003-00000007")
//!     .line(RawLine::item("SERV-01", rust_decimal_macros::dec!(1), rust_decimal_macros::dec!(1000)));
//! let outcome = controller.create(&request, false).await?;
//! let response = ApiResponse::from(&outcome);
//! assert_eq!(response.http_status(), 200);
//! # Ok(())
//! # }
//! ```

mod allocator;
mod classifier;
mod compensation;
mod context;
mod controller;
mod draft;
mod linked;
mod resolver;
mod response;
mod settings;

pub use allocator::{
    BOOK_DOCTYPE, BOOK_LAST_USED_FIELD, BOOK_LETTER_FIELD, BOOK_POINT_OF_SALE_FIELD,
    CommitOutcome, MAX_COMMIT_ATTEMPTS, NumberAllocator,
};
pub use classifier::{
    Detected, FailureClassifier, FailureKind, MissingValuation, RECONCILIATION_LOG_DOCTYPE,
    RemediationPlan, StockShortage, ValuationSource, ValuationSuggestion, WarehouseStock,
    blocking_log, detect, plan_stock_remediation,
};
pub use compensation::{AmendGuard, AmendOutcome, AmendTicket, CompensationCoordinator};
pub use context::ErpContext;
pub use controller::{
    CancelOutcome, ConfirmOutcome, CreateOutcome, DiscardOutcome, LifecycleController,
    LifecycleWarning, WarningCode, WithdrawOutcome,
};
pub use draft::{DocumentDraftBuilder, DraftRequest, ITEM_DOCTYPE, ItemInfo, ad_hoc_item_code};
pub use linked::{
    AUTO_GENERATED_FIELD, EnsuredRecord, LinkedRecordSynchronizer, SOURCE_KEY_FIELD, SyncReport,
    source_key,
};
pub use resolver::{
    COMPANY_WAREHOUSE_FIELD, CompanyDefaults, ErpTaxResolver, TAX_TEMPLATE_DOCTYPE,
    TEMPLATE_DIRECTION_FIELD, TaxResolver, TemplateCache, TemplateMap,
};
pub use response::{ApiResponse, STATUS_STOCK_SHORTAGE};
pub use settings::{
    DEFAULT_TEMPLATE_CAPACITY, DEFAULT_TEMPLATE_TTL_SECONDS, LifecycleSettings, NumberingConfig,
};
