//! Replacing a Confirmed document: create the edited copy Confirmed, then
//! cancel the original, deleting the copy again if that fails.

use dashmap::DashSet;
use serde_json::Value;

use super::allocator::{CommitOutcome, NumberAllocator};
use super::classifier::{FailureClassifier, FailureKind};
use super::controller::{
    CancelOutcome, LifecycleController, LifecycleWarning, identity, invalid_state,
    stored_document, sync_warnings,
};
use super::draft::DocumentDraftBuilder;
use super::linked::LinkedRecordSynchronizer;
use crate::core::*;

/// In-process "amend in progress" markers, one per document name.
#[derive(Debug, Default)]
pub struct AmendGuard {
    in_progress: DashSet<String>,
}

impl AmendGuard {
    /// Mark `name` as being amended until the ticket is dropped.
    pub fn acquire(&self, name: &str) -> Result<AmendTicket<'_>, ComprobanteError> {
        if !self.in_progress.insert(name.to_string()) {
            return Err(ComprobanteError::Conflict(format!(
                "document {name} is already being amended"
            )));
        }
        Ok(AmendTicket {
            guard: self,
            name: name.to_string(),
        })
    }

    pub fn is_amending(&self, name: &str) -> bool {
        self.in_progress.contains(name)
    }
}

/// Releases its [`AmendGuard`] marker on drop.
#[derive(Debug)]
pub struct AmendTicket<'a> {
    guard: &'a AmendGuard,
    name: String,
}

impl Drop for AmendTicket<'_> {
    fn drop(&mut self) {
        self.guard.in_progress.remove(&self.name);
    }
}

/// Result of an amend that did not abort.
#[derive(Debug, Clone, PartialEq)]
pub enum AmendOutcome {
    /// Both identities, for audit linkage. The original is Cancelled.
    Replaced {
        original: String,
        replacement: Document,
        number: u64,
        commit: Option<CommitOutcome>,
        cancellation: CancelOutcome,
        warnings: Vec<LifecycleWarning>,
    },
    /// The replacement was refused for a reason the caller can fix. Nothing
    /// was created; the original is still Confirmed.
    Correctable { original: Document, failure: FailureKind },
}

/// Implements amend on top of [`LifecycleController`].
pub struct CompensationCoordinator<'a> {
    controller: &'a LifecycleController,
}

impl<'a> CompensationCoordinator<'a> {
    pub fn new(controller: &'a LifecycleController) -> Self {
        Self { controller }
    }

    /// Replace the Confirmed `doc` with a copy carrying `changes`.
    ///
    /// Until the original is cancelled both documents are Confirmed; a crash
    /// inside that window needs manual reconciliation. If cancelling the
    /// original fails the replacement is rolled back (best-effort) and
    /// [`ComprobanteError::AmendAborted`] reports whether that worked.
    pub async fn replace(
        &self,
        doc: &Document,
        changes: DocumentChanges,
    ) -> Result<AmendOutcome, ComprobanteError> {
        let ctx = self.controller.context();
        let name = identity(doc)?;
        let _ticket = ctx.amend_guard.acquire(name)?;

        let original = self.controller.fetch(doc.direction, name).await?;
        if !original.is_confirmed() {
            return Err(invalid_state(name, "Confirmed", original.status));
        }
        let method = self
            .controller
            .resolve_method(original.numbering_method.as_deref(), original.kind)?;

        let mut replacement = self.merge(&original, changes).await?;
        LinkedRecordSynchronizer::new(ctx)
            .ensure_linked(
                replacement.direction,
                &mut replacement.lines,
                &replacement.party,
                &replacement.company,
            )
            .await?;

        let number = NumberAllocator::new(ctx.client.as_ref())
            .next_number(method.point_of_sale(), method.letter())
            .await;
        let fiscal_number = method.format_number(number)?;
        replacement.status = DocStatus::Confirmed;
        replacement.fiscal_number = Some(fiscal_number.clone());
        replacement.numbering_method = Some(method.to_string());

        let doctype = replacement.doctype();
        let stored = match ctx.client.insert(doctype, replacement.to_payload()).await {
            Ok(stored) => stored,
            Err(e) => {
                return match FailureClassifier::new(ctx).classify(e, &original).await {
                    FailureKind::Fatal(error) => {
                        tracing::warn!(doctype, original = name, error = %error, "replacement refused, original untouched");
                        Err(error.into())
                    }
                    failure => Ok(AmendOutcome::Correctable { original, failure }),
                };
            }
        };
        let Some(replacement_name) = stored.get("name").and_then(Value::as_str).map(str::to_string)
        else {
            tracing::error!(doctype, original = name, "replacement created without a name, cannot roll back");
            return Err(ComprobanteError::Format(format!(
                "replacement of {name} was created without a name"
            )));
        };
        let replacement = stored_document(original.direction, &stored, replacement);
        tracing::info!(doctype, original = name, replacement = %replacement_name, fiscal_number = %fiscal_number, "replacement confirmed");

        let retain = replacement.referenced_records();
        let cancellation = match self.controller.cancel_retaining(&original, &retain).await {
            Ok(cancellation) => cancellation,
            Err(err) => {
                tracing::error!(original = name, replacement = %replacement_name, error = %err, "cancelling original failed, rolling back replacement");
                let rolled_back = self.roll_back(doctype, &replacement_name).await;
                return Err(ComprobanteError::AmendAborted {
                    original: name.to_string(),
                    replacement: replacement_name,
                    rolled_back,
                    source: Box::new(err),
                });
            }
        };

        let mut warnings = cancellation.warnings.clone();
        let commit = self
            .controller
            .commit_sequence(&method, &fiscal_number, &mut warnings)
            .await;
        let linked = LinkedRecordSynchronizer::new(ctx)
            .mark_referenced(&replacement)
            .await;
        warnings.extend(sync_warnings(&linked));
        tracing::info!(original = name, replacement = %replacement_name, "amend complete");

        Ok(AmendOutcome::Replaced {
            original: name.to_string(),
            replacement,
            number,
            commit,
            cancellation,
            warnings,
        })
    }

    /// The ERP only deletes non-Confirmed documents, so the replacement is
    /// cancelled first. Returns whether it is gone.
    async fn roll_back(&self, doctype: &str, replacement: &str) -> bool {
        if let Err(e) = self.controller.cancel_upstream(doctype, replacement).await {
            tracing::error!(doctype, replacement, error = %e, "rollback: could not cancel replacement, two confirmed documents remain");
            return false;
        }
        let client = &self.controller.context().client;
        if let Err(e) = client.delete(doctype, replacement).await {
            tracing::error!(doctype, replacement, error = %e, "rollback: replacement cancelled but not deleted");
            return false;
        }
        tracing::warn!(doctype, replacement, "rollback: replacement deleted, original still confirmed");
        true
    }

    /// Apply `changes` to a copy of `original`. Kept lines are matched by row
    /// identity so their upstream links survive; new lines go through the
    /// draft builder.
    pub async fn merge(
        &self,
        original: &Document,
        changes: DocumentChanges,
    ) -> Result<Document, ComprobanteError> {
        let name = identity(original)?;
        let lines: Vec<LineItem> = match changes.lines {
            None => original
                .lines
                .iter()
                .cloned()
                .map(|mut line| {
                    line.row_id = None;
                    line
                })
                .collect(),
            Some(edits) => self.merge_lines(original, name, edits).await?,
        };
        let bills_receipts = lines
            .iter()
            .any(|l| matches!(&l.upstream, Some(link) if link.kind == LinkKind::Receipt));

        let mut builder = DocumentBuilder::new(
            original.direction,
            original.kind,
            changes.party.unwrap_or_else(|| original.party.clone()),
            original.company.clone(),
        )
        .lines(lines)
        .update_stock(original.update_stock && !bills_receipts)
        .amended_from(name);
        if let Some(date) = changes.posting_date.or(original.posting_date) {
            builder = builder.posting_date(date);
        }
        if let Some(method) = &original.numbering_method {
            builder = builder.numbering_method(method);
        }
        if let Some(against) = &original.return_against {
            builder = builder.return_against(against);
        }
        for record in &original.linked_records {
            builder = builder.linked_record(record);
        }
        builder.build()
    }

    async fn merge_lines(
        &self,
        original: &Document,
        name: &str,
        edits: Vec<LineEdit>,
    ) -> Result<Vec<LineItem>, ComprobanteError> {
        enum Slot {
            Kept(LineItem),
            Added(usize),
        }

        let mut slots = Vec::with_capacity(edits.len());
        let mut added = Vec::new();
        let mut seen_rows: Vec<String> = Vec::new();
        for edit in edits {
            match edit {
                LineEdit::Keep {
                    row_id,
                    quantity,
                    rate,
                    tax_rate,
                    warehouse,
                } => {
                    if seen_rows.contains(&row_id) {
                        return Err(ComprobanteError::Validation(format!(
                            "lines: row '{row_id}' is kept twice"
                        )));
                    }
                    let mut line = original
                        .lines
                        .iter()
                        .find(|l| l.row_id.as_deref() == Some(row_id.as_str()))
                        .cloned()
                        .ok_or_else(|| {
                            ComprobanteError::Validation(format!(
                                "lines: row '{row_id}' does not belong to {name}"
                            ))
                        })?;
                    line.row_id = None;
                    if let Some(quantity) = quantity {
                        line.quantity = quantity;
                    }
                    if let Some(rate) = rate {
                        line.rate = rate;
                    }
                    if let Some(tax_rate) = tax_rate {
                        if tax_rate != line.tax_rate {
                            line.tax_rate = tax_rate;
                            line.tax_template = None;
                        }
                    }
                    if let Some(warehouse) = warehouse {
                        line.warehouse = Some(warehouse);
                    }
                    seen_rows.push(row_id);
                    slots.push(Slot::Kept(line));
                }
                LineEdit::Add(raw) => {
                    slots.push(Slot::Added(added.len()));
                    added.push(raw);
                }
            }
        }

        let needs_template = slots
            .iter()
            .any(|s| matches!(s, Slot::Kept(l) if l.tax_template.is_none() && !l.tax_rate.is_zero()));
        let ctx = self.controller.context();
        let normalized = if added.is_empty() {
            Vec::new()
        } else {
            DocumentDraftBuilder::new(ctx)
                .normalize_lines(original.direction, &original.company, &added)
                .await?
        };
        if needs_template {
            let templates = ctx
                .templates
                .get_or_fetch(&original.company, original.direction, ctx.resolver.as_ref())
                .await?;
            for slot in &mut slots {
                if let Slot::Kept(line) = slot {
                    if line.tax_template.is_none() && !line.tax_rate.is_zero() {
                        let template = templates.template_for(line.tax_rate).ok_or_else(|| {
                            ComprobanteError::Validation(format!(
                                "no item tax template for {}% in company '{}'",
                                line.tax_rate.normalize(),
                                original.company
                            ))
                        })?;
                        line.tax_template = Some(template.to_string());
                    }
                }
            }
        }

        let mut taken: Vec<Option<LineItem>> = normalized.into_iter().map(Some).collect();
        Ok(slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Kept(line) => Some(line),
                Slot::Added(i) => taken.get_mut(i).and_then(Option::take),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_rejects_second_amend_until_released() {
        let guard = AmendGuard::default();
        let ticket = guard.acquire("SINV-1").unwrap();
        assert!(guard.is_amending("SINV-1"));
        assert!(matches!(
            guard.acquire("SINV-1"),
            Err(ComprobanteError::Conflict(_))
        ));
        assert!(guard.acquire("SINV-2").is_ok());
        drop(ticket);
        assert!(!guard.is_amending("SINV-1"));
        assert!(guard.acquire("SINV-1").is_ok());
    }
}
