//! Capability boundary to the ERP's document REST API.
//!
//! Everything the lifecycle does upstream goes through [`ErpClient`]. The
//! `http` feature provides [`HttpErpClient`]; tests substitute an in-memory
//! implementation.

#[cfg(feature = "http")]
mod config;
#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use config::{ErpConfig, ErpConfigBuilder};
#[cfg(feature = "http")]
pub use http::HttpErpClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::ExternalError;

/// Resource-oriented operations of the document API.
///
/// Documents are exchanged as JSON objects. State transitions are field
/// updates on `docstatus` (0 Draft, 1 Confirmed, 2 Cancelled) except
/// cancellation, which goes through the `cancel` RPC.
#[async_trait]
pub trait ErpClient: Send + Sync {
    /// Fetch one document by name.
    async fn get(&self, doctype: &str, name: &str) -> Result<Value, ExternalError>;

    /// List documents matching `query`.
    async fn list(&self, doctype: &str, query: &ListQuery) -> Result<Vec<Value>, ExternalError>;

    /// Create a document and return it as stored (with its assigned `name`).
    async fn insert(&self, doctype: &str, doc: Value) -> Result<Value, ExternalError>;

    /// Update fields of a document and return it as stored.
    async fn update(&self, doctype: &str, name: &str, fields: Value)
    -> Result<Value, ExternalError>;

    /// Hard delete. The ERP refuses this for Confirmed documents.
    async fn delete(&self, doctype: &str, name: &str) -> Result<(), ExternalError>;

    /// Cancel a Confirmed document.
    async fn cancel(&self, doctype: &str, name: &str) -> Result<(), ExternalError>;
}

/// Filter, field selection and paging for [`ErpClient::list`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    /// Fields to return; empty means the API default (`name` only).
    pub fields: Vec<String>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            child: None,
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    /// Condition on a child table: matches parents with at least one row of
    /// `child` satisfying it.
    pub fn child_filter(
        mut self,
        child: &str,
        field: &str,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter {
            child: Some(child.to_string()),
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    /// Shorthand for an equality filter.
    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filters in the API's `[[field, op, value], ...]` form.
    pub fn filters_value(&self) -> Value {
        Value::Array(self.filters.iter().map(Filter::to_value).collect())
    }
}

/// One `[field, operator, value]` condition, or
/// `[child_doctype, field, operator, value]` on a child table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<String>,
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn to_value(&self) -> Value {
        match &self.child {
            Some(child) => json!([child, self.field, self.op.as_str(), self.value]),
            None => json!([self.field, self.op.as_str(), self.value]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    In,
    Like,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::In => "in",
            Self::Like => "like",
        }
    }
}
