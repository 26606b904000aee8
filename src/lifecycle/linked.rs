//! Keeps goods receipts and delivery notes in step with the invoices that
//! reference them.

use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::context::ErpContext;
use crate::core::wire::{decimal_value, str_field, truthy};
use crate::core::*;
use crate::erp::{FilterOp, ListQuery};

/// Marks a linked record created by [`LinkedRecordSynchronizer::ensure_linked`].
pub const AUTO_GENERATED_FIELD: &str = "custom_auto_generated";
/// Deterministic key of the rows an auto-generated record covers.
pub const SOURCE_KEY_FIELD: &str = "custom_source_key";

/// Per-record results of a status sync. Failures are reported, not raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records moved to the target status.
    pub updated: Vec<String>,
    /// Auto-generated records cancelled outright.
    pub voided: Vec<String>,
    /// Records left alone because the caller retained them.
    pub retained: Vec<String>,
    /// `(record, error)` pairs.
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What `ensure_linked` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsuredRecord {
    pub name: String,
    /// False when an identical earlier record was reused.
    pub created: bool,
    /// Indices of the lines that now reference it.
    pub lines: Vec<usize>,
}

pub struct LinkedRecordSynchronizer<'a> {
    ctx: &'a ErpContext,
}

impl<'a> LinkedRecordSynchronizer<'a> {
    pub fn new(ctx: &'a ErpContext) -> Self {
        Self { ctx }
    }

    /// Set every record `doc` references to FullyInvoiced.
    pub async fn mark_referenced(&self, doc: &Document) -> SyncReport {
        let mut report = SyncReport::default();
        let doctype = doc.direction.linked_record_doctype();
        for record in doc.referenced_records() {
            match self
                .set_status(doctype, &record, LinkedRecordStatus::FullyInvoiced)
                .await
            {
                Ok(()) => report.updated.push(record),
                Err(e) => {
                    tracing::warn!(doctype, record = %record, error = %e, "could not mark linked record invoiced");
                    report.failed.push((record, e.to_string()));
                }
            }
        }
        report
    }

    /// Undo [`mark_referenced`](Self::mark_referenced) after a cancellation.
    pub async fn revert(&self, doc: &Document) -> SyncReport {
        self.revert_retaining(doc, &[]).await
    }

    /// Revert every referenced record except those in `retain`, which stay
    /// invoiced because another document still references them.
    /// Auto-generated records are cancelled instead of reverted.
    pub async fn revert_retaining(&self, doc: &Document, retain: &[String]) -> SyncReport {
        let mut report = SyncReport::default();
        let doctype = doc.direction.linked_record_doctype();
        for record in doc.referenced_records() {
            if retain.contains(&record) {
                report.retained.push(record);
                continue;
            }
            match self.revert_one(doctype, &record).await {
                Ok(true) => report.voided.push(record),
                Ok(false) => report.updated.push(record),
                Err(e) => {
                    tracing::warn!(doctype, record = %record, error = %e, "could not revert linked record");
                    report.failed.push((record, e.to_string()));
                }
            }
        }
        report
    }

    /// Void the auto-generated records a discarded Draft referenced.
    ///
    /// A Draft never marks records invoiced, so only auto-generated ones need
    /// undoing. Records another live invoice still references are retained.
    pub async fn release_discarded(&self, doc: &Document) -> SyncReport {
        let mut report = SyncReport::default();
        let doctype = doc.direction.linked_record_doctype();
        for record in doc.referenced_records() {
            match self.release_one(doc, doctype, &record).await {
                Ok(Some(true)) => report.voided.push(record),
                Ok(Some(false)) => report.retained.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(doctype, record = %record, error = %e, "could not release linked record");
                    report.failed.push((record, e.to_string()));
                }
            }
        }
        report
    }

    /// `None` when the record is not an auto-generated, Confirmed one.
    async fn release_one(
        &self,
        doc: &Document,
        doctype: &str,
        record: &str,
    ) -> Result<Option<bool>, ComprobanteError> {
        let current = self.ctx.client.get(doctype, record).await?;
        let confirmed = current.get("docstatus").and_then(Value::as_i64)
            == Some(i64::from(DocStatus::Confirmed.code()));
        if !truthy(current.get(AUTO_GENERATED_FIELD)) || !confirmed {
            return Ok(None);
        }
        if self.referenced_elsewhere(doc, record).await? {
            tracing::info!(doctype, record, "auto-generated linked record still referenced, kept");
            return Ok(Some(false));
        }
        self.ctx.client.cancel(doctype, record).await?;
        tracing::info!(doctype, record, status = LinkedRecordStatus::Voided.erp_status(), "auto-generated linked record voided");
        Ok(Some(true))
    }

    /// Whether a non-cancelled invoice other than `doc` has a line on `record`.
    async fn referenced_elsewhere(&self, doc: &Document, record: &str) -> Result<bool, ComprobanteError> {
        let (parent_field, _) = doc.direction.receipt_link_fields();
        let mut query = ListQuery::new()
            .child_filter(
                doc.direction.invoice_item_doctype(),
                parent_field,
                FilterOp::Eq,
                record,
            )
            .filter("docstatus", FilterOp::NotEq, DocStatus::Cancelled.code())
            .fields(&["name"])
            .limit(1);
        if let Some(name) = &doc.name {
            query = query.filter("name", FilterOp::NotEq, name.as_str());
        }
        let rows = self
            .ctx
            .client
            .list(doc.direction.invoice_doctype(), &query)
            .await?;
        Ok(!rows.is_empty())
    }

    /// Returns whether the record was voided.
    async fn revert_one(&self, doctype: &str, record: &str) -> Result<bool, ComprobanteError> {
        let current = self.ctx.client.get(doctype, record).await?;
        if truthy(current.get(AUTO_GENERATED_FIELD)) {
            self.ctx.client.cancel(doctype, record).await?;
            tracing::info!(doctype, record, status = LinkedRecordStatus::Voided.erp_status(), "auto-generated linked record voided");
            return Ok(true);
        }
        self.set_status(doctype, record, LinkedRecordStatus::PendingInvoice)
            .await?;
        Ok(false)
    }

    async fn set_status(
        &self,
        doctype: &str,
        record: &str,
        status: LinkedRecordStatus,
    ) -> Result<(), ComprobanteError> {
        self.ctx
            .client
            .update(
                doctype,
                record,
                json!({
                    "status": status.erp_status(),
                    "per_billed": decimal_value(status.per_billed()),
                }),
            )
            .await?;
        tracing::info!(doctype, record, status = status.erp_status(), "linked record status updated");
        Ok(())
    }

    /// Give stock lines without an upstream link their own confirmed linked
    /// record when other lines already reference one.
    ///
    /// The ERP cannot move stock directly while also billing existing
    /// receipts, so the unlinked stock lines get a minimal record covering
    /// just them. Only those lines are rewritten. Documents that are not
    /// mixed are left untouched and no call is made.
    pub async fn ensure_linked(
        &self,
        direction: Direction,
        lines: &mut [LineItem],
        party: &str,
        company: &str,
    ) -> Result<Option<EnsuredRecord>, ComprobanteError> {
        let has_receipt = lines
            .iter()
            .any(|l| matches!(&l.upstream, Some(link) if link.kind == LinkKind::Receipt));
        let unlinked: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_stock_item && l.upstream.is_none())
            .map(|(i, _)| i)
            .collect();
        if !has_receipt || unlinked.is_empty() {
            return Ok(None);
        }

        let doctype = direction.linked_record_doctype();
        let covered: Vec<&LineItem> = unlinked.iter().map(|&i| &lines[i]).collect();
        let key = source_key(direction, party, company, &covered);

        let existing = self
            .ctx
            .client
            .list(
                doctype,
                &ListQuery::new()
                    .eq(SOURCE_KEY_FIELD, key.as_str())
                    .eq("docstatus", 1)
                    .fields(&["name"])
                    .limit(1),
            )
            .await?
            .first()
            .and_then(Value::as_object)
            .and_then(|row| str_field(row, "name"));

        let (record, created) = match existing {
            Some(name) => {
                tracing::info!(doctype, record = %name, "reusing auto-generated linked record");
                (self.ctx.client.get(doctype, &name).await?, false)
            }
            None => {
                let items: Vec<Value> = covered
                    .iter()
                    .map(|l| {
                        json!({
                            "item_code": l.item_code,
                            "qty": decimal_value(l.quantity),
                            "rate": decimal_value(l.rate),
                            "warehouse": l.warehouse,
                        })
                    })
                    .collect();
                let mut payload = json!({
                    "doctype": doctype,
                    "company": company,
                    AUTO_GENERATED_FIELD: 1,
                    SOURCE_KEY_FIELD: key,
                    "docstatus": 1,
                    "items": items,
                });
                payload[direction.party_field()] = json!(party);
                (self.ctx.client.insert(doctype, payload).await?, true)
            }
        };

        let name = record
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ComprobanteError::Format(format!("{doctype} returned without a name"))
            })?;
        if created {
            tracing::info!(doctype, record = %name, lines = unlinked.len(), "auto-generated linked record created");
        }

        // Rows come back in the order they were sent.
        let rows: Vec<Option<String>> = record
            .get("items")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .map(|r| r.as_object().and_then(|o| str_field(o, "name")))
                    .collect()
            })
            .unwrap_or_default();
        for (n, &i) in unlinked.iter().enumerate() {
            lines[i].upstream = Some(UpstreamLink::receipt(
                name.clone(),
                rows.get(n).cloned().flatten(),
            ));
        }

        Ok(Some(EnsuredRecord {
            name,
            created,
            lines: unlinked,
        }))
    }
}

/// sha256 over the counterparty, company and covered rows, hex encoded.
pub fn source_key(direction: Direction, party: &str, company: &str, lines: &[&LineItem]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(direction.label().as_bytes());
    hasher.update(b"\0");
    hasher.update(party.as_bytes());
    hasher.update(b"\0");
    hasher.update(company.as_bytes());
    for line in lines {
        hasher.update(b"\0");
        hasher.update(
            format!(
                "{}|{}|{}|{}",
                line.item_code,
                line.quantity.normalize(),
                line.rate.normalize(),
                line.warehouse.as_deref().unwrap_or_default()
            )
            .as_bytes(),
        );
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
