//! `{success, message, data?, error_type?, warning?}` response bodies and
//! their HTTP statuses.

use serde::Serialize;
use serde_json::{Value, json};

use super::classifier::FailureKind;
use super::compensation::AmendOutcome;
use super::controller::{
    CancelOutcome, ConfirmOutcome, CreateOutcome, DiscardOutcome, LifecycleWarning,
    WithdrawOutcome,
};
use crate::core::{ComprobanteError, Document, ExternalError};

/// Reserved for correctable stock shortages.
pub const STATUS_STOCK_SHORTAGE: u16 = 417;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<Value>,
    #[serde(skip)]
    status: u16,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error_type: None,
            warning: None,
            status: 200,
        }
    }

    pub fn error(status: u16, error_type: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error_type: Some(error_type.to_string()),
            warning: None,
            status,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_warning(mut self, warning: Value) -> Self {
        self.warning = Some(warning);
        self
    }

    fn with_warnings(self, warnings: &[LifecycleWarning]) -> Self {
        if warnings.is_empty() {
            self
        } else {
            self.with_warning(json!({ "warnings": warnings }))
        }
    }

    pub fn http_status(&self) -> u16 {
        self.status
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Response for a correctable failure with the preserved document under
    /// `key`.
    fn correctable(key: &str, doc: &Document, failure: &FailureKind) -> Self {
        let name = doc_name(doc);
        match failure {
            FailureKind::StockShortage(shortage) => Self::error(
                STATUS_STOCK_SHORTAGE,
                failure.error_type(),
                format!(
                    "insufficient stock of {} in {}: {} required; {name} kept as draft",
                    shortage.item_code, shortage.warehouse, shortage.required
                ),
            )
            .with_data(json!({ key: doc_value(doc), "remediation": failure.detail() })),
            FailureKind::MissingValuation(missing) => Self {
                error_type: Some(failure.error_type().to_string()),
                ..Self::ok(format!(
                    "valuation rate missing for {}; {name} kept unchanged",
                    missing.item_code
                ))
            }
            .with_data(json!({ key: doc_value(doc) }))
            .with_warning(json!({ "missing_valuation": [failure.detail()] })),
            FailureKind::Fatal(err) => Self::from(err).with_data(json!({ key: doc_value(doc) })),
        }
    }
}

fn doc_value(doc: &Document) -> Value {
    serde_json::to_value(doc).unwrap_or(Value::Null)
}

fn doc_name(doc: &Document) -> &str {
    doc.name.as_deref().unwrap_or("document")
}

fn external_status(err: &ExternalError) -> u16 {
    match err.status {
        Some(status) if (400..500).contains(&status) && status != STATUS_STOCK_SHORTAGE => status,
        _ => 500,
    }
}

impl From<&ExternalError> for ApiResponse {
    fn from(err: &ExternalError) -> Self {
        Self::error(external_status(err), "ExternalFatalError", err.to_string())
            .with_data(json!({ "upstream": err.body }))
    }
}

impl From<&ComprobanteError> for ApiResponse {
    fn from(err: &ComprobanteError) -> Self {
        let message = err.to_string();
        match err {
            ComprobanteError::Validation(_) => Self::error(400, "ValidationError", message),
            ComprobanteError::Format(_) => Self::error(400, "FormatError", message),
            ComprobanteError::Conflict(_) => Self::error(400, "ConflictError", message),
            ComprobanteError::InvalidState { .. } => Self::error(400, "InvalidStateError", message),
            ComprobanteError::NotFound(_) => Self::error(404, "NotFoundError", message),
            ComprobanteError::External(e) => Self::from(e),
            ComprobanteError::AmendAborted {
                original,
                replacement,
                rolled_back,
                ..
            } => Self::error(500, "AmendAborted", message).with_data(json!({
                "original": original,
                "replacement": replacement,
                "rolled_back": rolled_back,
            })),
            ComprobanteError::Config(_) => Self::error(500, "ConfigError", message),
        }
    }
}

impl From<&ConfirmOutcome> for ApiResponse {
    fn from(outcome: &ConfirmOutcome) -> Self {
        match outcome {
            ConfirmOutcome::Confirmed {
                document, warnings, ..
            } => Self::ok(format!(
                "{} confirmed as {}",
                doc_name(document),
                document.fiscal_number.as_deref().unwrap_or("-")
            ))
            .with_data(doc_value(document))
            .with_warnings(warnings),
            ConfirmOutcome::NeedsAttention { draft, missing } => Self {
                error_type: Some("MissingValuation".into()),
                ..Self::ok(format!(
                    "{} kept as draft: {} item(s) lack a valuation rate",
                    doc_name(draft),
                    missing.len()
                ))
            }
            .with_data(json!({ "draft": doc_value(draft) }))
            .with_warning(json!({ "missing_valuation": missing })),
            ConfirmOutcome::Correctable { draft, failure } => {
                Self::correctable("draft", draft, failure)
            }
            ConfirmOutcome::Rejected { draft, error } => {
                Self::from(error).with_data(json!({ "draft": doc_value(draft), "upstream": error.body }))
            }
        }
    }
}

impl From<&CreateOutcome> for ApiResponse {
    fn from(outcome: &CreateOutcome) -> Self {
        match outcome {
            CreateOutcome::Drafted(doc) => {
                Self::ok(format!("draft {} created", doc_name(doc))).with_data(doc_value(doc))
            }
            CreateOutcome::Confirmation(confirm) => Self::from(confirm),
            CreateOutcome::ConfirmFailed { draft, error } => {
                Self::from(error).with_data(json!({ "draft": doc_value(draft) }))
            }
        }
    }
}

impl From<&CancelOutcome> for ApiResponse {
    fn from(outcome: &CancelOutcome) -> Self {
        Self::ok(format!("{} cancelled", outcome.name))
            .with_data(json!({ "name": outcome.name, "linked_records": outcome.linked }))
            .with_warnings(&outcome.warnings)
    }
}

impl From<&DiscardOutcome> for ApiResponse {
    fn from(outcome: &DiscardOutcome) -> Self {
        Self::ok(format!("draft {} deleted", outcome.name))
            .with_data(json!({ "name": outcome.name, "linked_records": outcome.linked }))
            .with_warnings(&outcome.warnings)
    }
}

impl From<&WithdrawOutcome> for ApiResponse {
    fn from(outcome: &WithdrawOutcome) -> Self {
        match outcome {
            WithdrawOutcome::Discarded(discard) => Self::from(discard),
            WithdrawOutcome::Cancelled(cancel) => Self::from(cancel),
        }
    }
}

impl From<&AmendOutcome> for ApiResponse {
    fn from(outcome: &AmendOutcome) -> Self {
        match outcome {
            AmendOutcome::Replaced {
                original,
                replacement,
                warnings,
                ..
            } => Self::ok(format!("{original} replaced by {}", doc_name(replacement)))
                .with_data(json!({
                    "original": original,
                    "replacement": replacement.name,
                    "fiscal_number": replacement.fiscal_number,
                    "document": doc_value(replacement),
                }))
                .with_warnings(warnings),
            AmendOutcome::Correctable { original, failure } => {
                Self::correctable("original", original, failure)
            }
        }
    }
}

macro_rules! from_result {
    ($($outcome:ty),+ $(,)?) => {
        $(
            impl From<&Result<$outcome, ComprobanteError>> for ApiResponse {
                fn from(result: &Result<$outcome, ComprobanteError>) -> Self {
                    match result {
                        Ok(outcome) => Self::from(outcome),
                        Err(err) => Self::from(err),
                    }
                }
            }
        )+
    };
}

from_result!(
    CreateOutcome,
    ConfirmOutcome,
    CancelOutcome,
    WithdrawOutcome,
    DiscardOutcome,
    AmendOutcome,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        let cases = [
            (ComprobanteError::Validation("x".into()), 400, "ValidationError"),
            (ComprobanteError::Format("x".into()), 400, "FormatError"),
            (ComprobanteError::Conflict("x".into()), 400, "ConflictError"),
            (ComprobanteError::NotFound("x".into()), 404, "NotFoundError"),
            (
                ComprobanteError::External(ExternalError::new(500, None, "boom")),
                500,
                "ExternalFatalError",
            ),
        ];
        for (err, status, kind) in cases {
            let resp = ApiResponse::from(&err);
            assert_eq!(resp.http_status(), status);
            assert_eq!(resp.error_type.as_deref(), Some(kind));
            assert!(!resp.success);
        }
    }

    #[test]
    fn upstream_417_is_not_a_stock_shortage() {
        let err = ExternalError::new(417, Some("ValidationError"), "Posting date is closed");
        assert_eq!(ApiResponse::from(&err).http_status(), 500);
        let err = ExternalError::new(403, Some("PermissionError"), "Not permitted");
        assert_eq!(ApiResponse::from(&err).http_status(), 403);
    }

    #[test]
    fn results_map_through_outcome_or_error() {
        let ok: Result<CancelOutcome, ComprobanteError> = Ok(CancelOutcome {
            name: "SINV-00001".into(),
            linked: Default::default(),
            warnings: Vec::new(),
        });
        let resp = ApiResponse::from(&ok);
        assert!(resp.success);
        assert_eq!(resp.data.as_ref().unwrap()["name"], json!("SINV-00001"));

        let err: Result<CancelOutcome, ComprobanteError> =
            Err(ComprobanteError::NotFound("Sales Invoice SINV-9".into()));
        assert_eq!(ApiResponse::from(&err).http_status(), 404);
    }

    #[test]
    fn optional_fields_omitted() {
        let json = ApiResponse::ok("done").to_json();
        assert_eq!(json, json!({ "success": true, "message": "done" }));
    }
}
