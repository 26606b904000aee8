//! Draft → Confirmed → Cancelled state machine.

use serde::Serialize;
use serde_json::{Value, json};

use super::allocator::{CommitOutcome, NumberAllocator};
use super::classifier::{
    FailureClassifier, FailureKind, MissingValuation, RECONCILIATION_LOG_DOCTYPE, blocking_log,
};
use super::compensation::{AmendOutcome, CompensationCoordinator};
use super::context::ErpContext;
use super::draft::{DocumentDraftBuilder, DraftRequest};
use super::linked::{LinkedRecordSynchronizer, SyncReport};
use crate::core::*;

/// Non-fatal problem in a step that followed a successful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleWarning {
    pub code: WarningCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// The sequence book was not advanced to the confirmed number.
    SequenceNotCommitted,
    /// A linked record's status could not be updated.
    LinkedRecordNotSynced,
    /// A suggested valuation rate was written to an item.
    ValuationApplied,
    /// A reconciliation log blocking cancellation was deleted.
    BlockingRecordDeleted,
}

impl LifecycleWarning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result of [`LifecycleController::confirm`]. Every variant except
/// `Confirmed` carries the untouched Draft.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed {
        document: Document,
        number: u64,
        commit: Option<CommitOutcome>,
        warnings: Vec<LifecycleWarning>,
    },
    /// Pre-check found stock items without a valuation rate; nothing was
    /// attempted.
    NeedsAttention {
        draft: Document,
        missing: Vec<MissingValuation>,
    },
    /// The transition failed for a reason the caller can fix.
    Correctable { draft: Document, failure: FailureKind },
    /// The transition failed; the upstream error is passed through.
    Rejected { draft: Document, error: ExternalError },
}

impl ConfirmOutcome {
    /// The confirmed document, or the preserved Draft.
    pub fn document(&self) -> &Document {
        match self {
            Self::Confirmed { document, .. } => document,
            Self::NeedsAttention { draft, .. }
            | Self::Correctable { draft, .. }
            | Self::Rejected { draft, .. } => draft,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// Result of [`LifecycleController::create`].
#[derive(Debug)]
pub enum CreateOutcome {
    /// Created and left as Draft.
    Drafted(Document),
    /// Created, then a confirmation was attempted.
    Confirmation(ConfirmOutcome),
    /// Created, but the confirmation could not even be attempted.
    ConfirmFailed {
        draft: Document,
        error: ComprobanteError,
    },
}

impl CreateOutcome {
    /// The created document as it stands after the call.
    pub fn document(&self) -> &Document {
        match self {
            Self::Drafted(doc) | Self::ConfirmFailed { draft: doc, .. } => doc,
            Self::Confirmation(outcome) => outcome.document(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelOutcome {
    pub name: String,
    pub linked: SyncReport,
    pub warnings: Vec<LifecycleWarning>,
}

/// Result of [`LifecycleController::discard_draft`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardOutcome {
    pub name: String,
    /// Auto-generated records the Draft was the last to reference.
    pub linked: SyncReport,
    pub warnings: Vec<LifecycleWarning>,
}

/// Result of [`LifecycleController::cancel_or_discard`].
#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawOutcome {
    Discarded(DiscardOutcome),
    Cancelled(CancelOutcome),
}

/// Drives documents through their states against the ERP.
///
/// Calls are issued one after another; nothing is persisted locally. Once a
/// Draft exists upstream, no failure path deletes it.
pub struct LifecycleController {
    ctx: ErpContext,
}

impl LifecycleController {
    pub fn new(ctx: ErpContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ErpContext {
        &self.ctx
    }

    /// Load a document by name.
    pub async fn fetch(&self, direction: Direction, name: &str) -> Result<Document, ComprobanteError> {
        let doctype = direction.invoice_doctype();
        let value = self.ctx.client.get(doctype, name).await.map_err(|e| {
            if e.is_not_found() {
                ComprobanteError::NotFound(format!("{doctype} {name}"))
            } else {
                ComprobanteError::External(e)
            }
        })?;
        Document::from_payload(direction, &value)
    }

    /// The document's own method, else the configured one for its kind.
    pub fn resolve_method(
        &self,
        method: Option<&str>,
        kind: DocumentKind,
    ) -> Result<NumberingMethod, ComprobanteError> {
        let raw = method
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .or_else(|| self.ctx.settings.numbering.method_for(kind))
            .ok_or_else(|| {
                ComprobanteError::Format(format!(
                    "no numbering method configured under '{}'",
                    NumberAllocator::field_for(kind)
                ))
            })?;
        NumberingMethod::parse(raw)
    }

    /// Create a Draft and, unless `as_draft`, confirm it right away.
    ///
    /// The Draft stays upstream whatever happens to the confirmation.
    pub async fn create(
        &self,
        request: &DraftRequest,
        as_draft: bool,
    ) -> Result<CreateOutcome, ComprobanteError> {
        if !as_draft || request.numbering_method.is_some() {
            self.resolve_method(request.numbering_method.as_deref(), request.kind)?;
        }

        let mut draft = DocumentDraftBuilder::new(&self.ctx).build(request).await?;
        if let Some(ensured) = LinkedRecordSynchronizer::new(&self.ctx)
            .ensure_linked(draft.direction, &mut draft.lines, &draft.party, &draft.company)
            .await?
        {
            tracing::info!(record = %ensured.name, lines = ensured.lines.len(), "unlinked stock lines attached to linked record");
        }

        let created = self.insert(&draft).await?;
        let name = created.name.clone().unwrap_or_default();
        tracing::info!(doctype = created.doctype(), name = %name, "draft created");

        if as_draft {
            return Ok(CreateOutcome::Drafted(created));
        }
        match self.confirm(&created).await {
            Ok(outcome) => Ok(CreateOutcome::Confirmation(outcome)),
            Err(error) => {
                tracing::warn!(name = %name, error = %error, "draft created but confirmation failed");
                Ok(CreateOutcome::ConfirmFailed {
                    draft: created,
                    error,
                })
            }
        }
    }

    /// Confirm a Draft, assigning the next fiscal number.
    ///
    /// Fails with an error only when the request is invalid (no identity,
    /// unparseable numbering method, wrong state). Upstream rejections of the
    /// transition come back as outcomes carrying the Draft.
    pub async fn confirm(&self, doc: &Document) -> Result<ConfirmOutcome, ComprobanteError> {
        let name = identity(doc)?;
        let method = self.resolve_method(doc.numbering_method.as_deref(), doc.kind)?;

        let draft = self.fetch(doc.direction, name).await?;
        if !draft.is_draft() {
            return Err(invalid_state(name, "Draft", draft.status));
        }
        let doctype = draft.doctype();
        let classifier = FailureClassifier::new(&self.ctx);
        let mut warnings = Vec::new();

        let missing = classifier.missing_valuations(&draft).await?;
        if !missing.is_empty() {
            let all_suggested = missing.iter().all(|m| m.suggestion.is_some());
            if !(self.ctx.settings.auto_apply_valuation && all_suggested) {
                tracing::info!(doctype, name, items = missing.len(), "confirmation held: valuation rates missing");
                return Ok(ConfirmOutcome::NeedsAttention { draft, missing });
            }
            for entry in &missing {
                if let Some(suggestion) = &entry.suggestion {
                    classifier
                        .apply_valuation(&entry.item_code, suggestion.rate)
                        .await?;
                    warnings.push(valuation_applied(&entry.item_code, suggestion.rate));
                }
            }
        }

        let allocator = NumberAllocator::new(self.ctx.client.as_ref());
        let number = allocator
            .next_number(method.point_of_sale(), method.letter())
            .await;
        let fiscal_number = method.format_number(number)?;
        let fields = json!({
            "docstatus": DocStatus::Confirmed.code(),
            FISCAL_NUMBER_FIELD: fiscal_number,
            NUMBERING_METHOD_FIELD: method.to_string(),
        });

        let mut valuation_retried = false;
        let stored = loop {
            match self.ctx.client.update(doctype, name, fields.clone()).await {
                Ok(stored) => break stored,
                Err(e) => {
                    let failure = classifier.classify(e, &draft).await;
                    if let FailureKind::MissingValuation(MissingValuation {
                        item_code,
                        suggestion: Some(suggestion),
                    }) = &failure
                    {
                        if self.ctx.settings.auto_apply_valuation
                            && !valuation_retried
                            && classifier
                                .apply_valuation(item_code, suggestion.rate)
                                .await
                                .is_ok()
                        {
                            warnings.push(valuation_applied(item_code, suggestion.rate));
                            valuation_retried = true;
                            continue;
                        }
                    }
                    return Ok(match failure {
                        FailureKind::Fatal(error) => {
                            tracing::warn!(doctype, name, error = %error, "confirmation rejected, draft kept");
                            ConfirmOutcome::Rejected { draft, error }
                        }
                        failure => {
                            tracing::info!(doctype, name, failure = failure.error_type(), "confirmation failed with correctable error, draft kept");
                            ConfirmOutcome::Correctable { draft, failure }
                        }
                    });
                }
            }
        };

        let mut fallback = draft.clone();
        fallback.status = DocStatus::Confirmed;
        fallback.fiscal_number = Some(fiscal_number.clone());
        let document = stored_document(doc.direction, &stored, fallback);
        tracing::info!(doctype, name, fiscal_number = %fiscal_number, number, "document confirmed");

        let commit = self
            .commit_sequence(&method, &fiscal_number, &mut warnings)
            .await;
        let linked = LinkedRecordSynchronizer::new(&self.ctx)
            .mark_referenced(&document)
            .await;
        warnings.extend(sync_warnings(&linked));

        Ok(ConfirmOutcome::Confirmed {
            document,
            number,
            commit,
            warnings,
        })
    }

    /// Cancel a Confirmed document and revert its linked records.
    pub async fn cancel(&self, doc: &Document) -> Result<CancelOutcome, ComprobanteError> {
        self.cancel_retaining(doc, &[]).await
    }

    /// Cancel, leaving the linked records in `retain` invoiced.
    pub(crate) async fn cancel_retaining(
        &self,
        doc: &Document,
        retain: &[String],
    ) -> Result<CancelOutcome, ComprobanteError> {
        let name = identity(doc)?;
        let current = self.fetch(doc.direction, name).await?;
        if !current.is_confirmed() {
            return Err(invalid_state(name, "Confirmed", current.status));
        }

        let mut warnings = self.cancel_upstream(current.doctype(), name).await?;
        tracing::info!(doctype = current.doctype(), name, "document cancelled");

        let linked = LinkedRecordSynchronizer::new(&self.ctx)
            .revert_retaining(&current, retain)
            .await;
        warnings.extend(sync_warnings(&linked));
        Ok(CancelOutcome {
            name: name.to_string(),
            linked,
            warnings,
        })
    }

    /// Issue the cancel RPC. A reconciliation log blocking it is deleted and
    /// the cancellation retried once.
    pub(crate) async fn cancel_upstream(
        &self,
        doctype: &str,
        name: &str,
    ) -> Result<Vec<LifecycleWarning>, ExternalError> {
        let err = match self.ctx.client.cancel(doctype, name).await {
            Ok(()) => return Ok(Vec::new()),
            Err(err) => err,
        };
        let Some(log) = blocking_log(&err) else {
            return Err(err);
        };

        tracing::warn!(doctype, name, log = %log, "deleting reconciliation log that blocks cancellation");
        if let Err(delete_err) = self
            .ctx
            .client
            .delete(RECONCILIATION_LOG_DOCTYPE, &log)
            .await
        {
            tracing::error!(log = %log, error = %delete_err, "could not delete blocking reconciliation log");
            return Err(err);
        }
        self.ctx.client.cancel(doctype, name).await?;
        Ok(vec![LifecycleWarning::new(
            WarningCode::BlockingRecordDeleted,
            format!("{RECONCILIATION_LOG_DOCTYPE} {log} was deleted to allow cancellation"),
        )])
    }

    /// Hard-delete a Draft, then void the auto-generated linked records no
    /// other invoice references.
    pub async fn discard_draft(&self, doc: &Document) -> Result<DiscardOutcome, ComprobanteError> {
        let name = identity(doc)?;
        let current = self.fetch(doc.direction, name).await?;
        if !current.is_draft() {
            return Err(invalid_state(name, "Draft", current.status));
        }
        self.ctx.client.delete(current.doctype(), name).await?;
        tracing::info!(doctype = current.doctype(), name, "draft discarded");

        let linked = LinkedRecordSynchronizer::new(&self.ctx)
            .release_discarded(&current)
            .await;
        let warnings = sync_warnings(&linked);
        Ok(DiscardOutcome {
            name: name.to_string(),
            linked,
            warnings,
        })
    }

    /// A cancel request: Drafts are discarded, Confirmed documents cancelled.
    pub async fn cancel_or_discard(&self, doc: &Document) -> Result<WithdrawOutcome, ComprobanteError> {
        let name = identity(doc)?;
        let current = self.fetch(doc.direction, name).await?;
        match current.status {
            DocStatus::Draft => Ok(WithdrawOutcome::Discarded(
                self.discard_draft(&current).await?,
            )),
            DocStatus::Confirmed => Ok(WithdrawOutcome::Cancelled(self.cancel(&current).await?)),
            DocStatus::Cancelled => Err(invalid_state(name, "Draft or Confirmed", current.status)),
        }
    }

    /// Replace a Confirmed document with an edited copy.
    pub async fn amend(
        &self,
        doc: &Document,
        changes: DocumentChanges,
    ) -> Result<AmendOutcome, ComprobanteError> {
        CompensationCoordinator::new(self).replace(doc, changes).await
    }

    pub(crate) async fn insert(&self, doc: &Document) -> Result<Document, ComprobanteError> {
        let stored = self.ctx.client.insert(doc.doctype(), doc.to_payload()).await?;
        if stored.get("name").and_then(Value::as_str).is_none() {
            return Err(ComprobanteError::Format(format!(
                "{} was created without a name",
                doc.doctype()
            )));
        }
        Ok(stored_document(doc.direction, &stored, doc.clone()))
    }

    /// Advance the sequence book, turning failures into warnings.
    pub(crate) async fn commit_sequence(
        &self,
        method: &NumberingMethod,
        fiscal_number: &str,
        warnings: &mut Vec<LifecycleWarning>,
    ) -> Option<CommitOutcome> {
        let allocator = NumberAllocator::new(self.ctx.client.as_ref());
        match allocator.commit(method, fiscal_number).await {
            Ok(outcome) => {
                match &outcome {
                    CommitOutcome::Committed { .. } => {}
                    CommitOutcome::Stale { book, last_used, .. } => warnings.push(LifecycleWarning::new(
                        WarningCode::SequenceNotCommitted,
                        format!("sequence book {book} already at {last_used}, {fiscal_number} may be duplicated"),
                    )),
                    CommitOutcome::NoBook { .. } => warnings.push(LifecycleWarning::new(
                        WarningCode::SequenceNotCommitted,
                        format!("no sequence book for {}/{}", method.point_of_sale(), method.letter().code()),
                    )),
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(fiscal_number, error = %e, "sequence commit failed");
                warnings.push(LifecycleWarning::new(
                    WarningCode::SequenceNotCommitted,
                    format!("sequence book not advanced to {fiscal_number}: {e}"),
                ));
                None
            }
        }
    }
}

pub(crate) fn identity(doc: &Document) -> Result<&str, ComprobanteError> {
    doc.name.as_deref().ok_or_else(|| {
        ComprobanteError::Validation(format!(
            "{} has no identity yet; create it first",
            doc.doctype()
        ))
    })
}

pub(crate) fn invalid_state(name: &str, expected: &'static str, actual: DocStatus) -> ComprobanteError {
    ComprobanteError::InvalidState {
        name: name.to_string(),
        expected,
        actual: actual.label(),
    }
}

/// Parse what the ERP returned after a write; fall back to `expected` with
/// the returned name if the response is not a full document.
pub(crate) fn stored_document(direction: Direction, stored: &Value, expected: Document) -> Document {
    match Document::from_payload(direction, stored) {
        Ok(doc) if doc.name.is_some() => doc,
        Ok(_) | Err(_) => {
            let mut doc = expected;
            if let Some(name) = stored.get("name").and_then(Value::as_str) {
                doc.name = Some(name.to_string());
            }
            doc
        }
    }
}

pub(crate) fn sync_warnings(report: &SyncReport) -> Vec<LifecycleWarning> {
    report
        .failed
        .iter()
        .map(|(record, error)| {
            LifecycleWarning::new(
                WarningCode::LinkedRecordNotSynced,
                format!("{record}: {error}"),
            )
        })
        .collect()
}

fn valuation_applied(item_code: &str, rate: rust_decimal::Decimal) -> LifecycleWarning {
    LifecycleWarning::new(
        WarningCode::ValuationApplied,
        format!("valuation rate {rate} applied to item {item_code}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_document_falls_back_to_expected() {
        let expected = DocumentBuilder::new(Direction::Sales, DocumentKind::Invoice, "C", "E")
            .add_line(LineItemBuilder::new("SERV", rust_decimal::Decimal::ONE, rust_decimal::Decimal::TEN).build())
            .build()
            .unwrap();
        let doc = stored_document(Direction::Sales, &json!({"name": "SINV-1", "docstatus": 9}), expected.clone());
        assert_eq!(doc.name.as_deref(), Some("SINV-1"));
        assert_eq!(doc.lines, expected.lines);
    }

    #[test]
    fn invalid_state_names_both_states() {
        let err = invalid_state("SINV-1", "Draft", DocStatus::Cancelled);
        assert_eq!(err.to_string(), "document SINV-1 is Cancelled, expected Draft");
    }
}
