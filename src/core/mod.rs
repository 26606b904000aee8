//! Document model, numbering methods, pre-submission validation and the
//! mapping to the ERP's JSON shape.
//!
//! Nothing in here performs I/O.

mod builder;
mod error;
mod numbering;
mod types;
mod validation;
pub mod wire;

pub use builder::*;
pub use error::*;
pub use numbering::*;
pub use types::*;
pub use validation::*;
pub use wire::{
    FISCAL_NUMBER_FIELD, LINKED_RECORDS_FIELD, NUMBERING_METHOD_FIELD, REPLACES_FIELD, TAX_RATE_FIELD,
};
