//! # comprobantes
//!
//! Fiscal invoice lifecycle for an Argentine tax context, on top of a
//! document-oriented ERP REST API: draft building, confirmation with
//! sequential numbering, cancellation, and cancel-and-recreate amendment
//! with rollback.
//!
//! All monetary values use [`rust_decimal::Decimal`]. Ledger totals and tax
//! amounts are computed by the ERP and never recomputed here.
//!
//! ## Quick Start
//!
//! ```rust
//! use comprobantes::core::*;
//!
//! let method: NumberingMethod = "FE-FAC-A-00003-00000007".parse().unwrap();
//! assert_eq!(method.format_number(8).unwrap(), "FE-FAC-A-00003-00000008");
//!
//! // Fewer than five segments is rejected before anything leaves the process.
//! assert!(matches!(
//!     NumberingMethod::parse("FE-FAC-A"),
//!     Err(ComprobanteError::Format(_))
//! ));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | Document model, numbering methods, validation, ERP JSON mapping |
//! | `lifecycle` (default) | `ErpClient` trait, draft builder, number allocator, failure classifier, linked records, lifecycle controller, amend protocol |
//! | `http` (default) | reqwest-backed `HttpErpClient` and `ErpConfig` |
//! | `telemetry` | JSON `tracing` subscriber setup |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "lifecycle")]
pub mod erp;

#[cfg(feature = "lifecycle")]
pub mod lifecycle;

#[cfg(feature = "telemetry")]
pub mod telemetry;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
