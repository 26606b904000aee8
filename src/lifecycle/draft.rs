//! Normalization of raw request lines into [`LineItem`]s.

use chrono::NaiveDate;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::context::ErpContext;
use super::resolver::CompanyDefaults;
use crate::core::wire::{str_field, truthy};
use crate::core::*;
use crate::erp::ListQuery;

pub const ITEM_DOCTYPE: &str = "Item";

const AD_HOC_PREFIX: &str = "ADHOC";
const AD_HOC_SLUG_LEN: usize = 24;
const ITEM_NAME_MAX: usize = 140;

/// A document as requested by a caller, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftRequest {
    pub direction: Direction,
    pub kind: DocumentKind,
    pub party: String,
    pub company: String,
    pub posting_date: Option<NaiveDate>,
    /// Overrides the configured method for `kind`.
    pub numbering_method: Option<String>,
    pub lines: Vec<RawLine>,
    pub linked_records: Vec<String>,
    pub update_stock: bool,
    pub return_against: Option<String>,
}

impl DraftRequest {
    pub fn new(
        direction: Direction,
        kind: DocumentKind,
        party: impl Into<String>,
        company: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            kind,
            party: party.into(),
            company: company.into(),
            posting_date: None,
            numbering_method: None,
            lines: Vec::new(),
            linked_records: Vec::new(),
            update_stock: false,
            return_against: None,
        }
    }

    pub fn line(mut self, line: RawLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn posting_date(mut self, date: NaiveDate) -> Self {
        self.posting_date = Some(date);
        self
    }

    pub fn numbering_method(mut self, method: impl Into<String>) -> Self {
        self.numbering_method = Some(method.into());
        self
    }

    pub fn linked_record(mut self, name: impl Into<String>) -> Self {
        self.linked_records.push(name.into());
        self
    }

    pub fn update_stock(mut self, update: bool) -> Self {
        self.update_stock = update;
        self
    }

    pub fn return_against(mut self, original: impl Into<String>) -> Self {
        self.return_against = Some(original.into());
        self
    }
}

/// Catalog facts needed to normalize a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub code: String,
    pub name: Option<String>,
    pub is_stock_item: bool,
    /// Item-level default warehouse for the requested company.
    pub default_warehouse: Option<String>,
}

/// Resolves items, tax templates and warehouses for raw lines.
///
/// Ad hoc catalog items created here are not removed if a later step
/// fails; their codes are deterministic so a retry reuses them.
pub struct DocumentDraftBuilder<'a> {
    ctx: &'a ErpContext,
}

impl<'a> DocumentDraftBuilder<'a> {
    pub fn new(ctx: &'a ErpContext) -> Self {
        Self { ctx }
    }

    /// Normalize every line of `request` and assemble a Draft document.
    pub async fn build(&self, request: &DraftRequest) -> Result<Document, ComprobanteError> {
        let mut errors = Vec::new();
        if request.party.trim().is_empty() {
            errors.push(ValidationError::new(
                request.direction.party_field(),
                "party must not be empty",
            ));
        }
        if request.company.trim().is_empty() {
            errors.push(ValidationError::new("company", "company must not be empty"));
        }
        if !errors.is_empty() {
            return Err(ValidationError::into_error(&errors));
        }

        let lines = self
            .normalize_lines(request.direction, &request.company, &request.lines)
            .await?;

        // Billing receipts excludes a direct stock update; unlinked stock
        // lines get their own linked record instead.
        let bills_receipts = lines
            .iter()
            .any(|l| matches!(&l.upstream, Some(link) if link.kind == LinkKind::Receipt));
        let update_stock = request.update_stock && !bills_receipts;
        if request.update_stock && bills_receipts {
            tracing::info!(
                party = %request.party,
                "stock moves through linked records, direct stock update dropped"
            );
        }

        let mut builder = DocumentBuilder::new(
            request.direction,
            request.kind,
            request.party.trim(),
            request.company.trim(),
        )
        .lines(lines)
        .update_stock(update_stock);
        if let Some(date) = request.posting_date {
            builder = builder.posting_date(date);
        }
        if let Some(method) = &request.numbering_method {
            builder = builder.numbering_method(method.trim());
        }
        if let Some(original) = &request.return_against {
            builder = builder.return_against(original);
        }
        for record in &request.linked_records {
            builder = builder.linked_record(record);
        }
        builder.build()
    }

    /// Resolve raw lines. Validation and duplicate detection run before any
    /// external call.
    pub async fn normalize_lines(
        &self,
        direction: Direction,
        company: &str,
        lines: &[RawLine],
    ) -> Result<Vec<LineItem>, ComprobanteError> {
        let errors = validate_raw_lines(lines);
        if !errors.is_empty() {
            return Err(ValidationError::into_error(&errors));
        }
        check_raw_conflicts(lines)?;

        let templates = self
            .ctx
            .templates
            .get_or_fetch(company, direction, self.ctx.resolver.as_ref())
            .await?;
        let mut company_defaults: Option<CompanyDefaults> = None;

        let mut normalized = Vec::with_capacity(lines.len());
        for (i, raw) in lines.iter().enumerate() {
            let item = self.resolve_item(raw, company).await?;

            let tax_template = match templates.template_for(raw.tax_rate) {
                Some(template) => Some(template.to_string()),
                None if raw.tax_rate.is_zero() => None,
                None => {
                    return Err(ComprobanteError::Validation(format!(
                        "lines.{i}.tax_rate: no item tax template for {}% in company '{company}'",
                        raw.tax_rate.normalize()
                    )));
                }
            };

            let warehouse = if item.is_stock_item {
                let explicit = raw
                    .warehouse
                    .clone()
                    .or_else(|| item.default_warehouse.clone());
                match explicit {
                    Some(w) => Some(w),
                    None => {
                        if company_defaults.is_none() {
                            company_defaults =
                                Some(self.ctx.resolver.company_defaults(company).await?);
                        }
                        let fallback = company_defaults
                            .as_ref()
                            .and_then(|d| d.default_warehouse.clone());
                        if fallback.is_none() {
                            return Err(ComprobanteError::Validation(format!(
                                "lines.{i}.warehouse: stock item '{}' has no warehouse and \
                                 company '{company}' has no default",
                                item.code
                            )));
                        }
                        fallback
                    }
                }
            } else {
                None
            };

            normalized.push(LineItem {
                row_id: None,
                item_code: item.code,
                item_name: item.name.or_else(|| raw.description.clone()),
                quantity: raw.quantity,
                rate: raw.rate,
                tax_rate: raw.tax_rate,
                tax_template,
                warehouse,
                is_stock_item: item.is_stock_item,
                upstream: raw.upstream.clone(),
            });
        }
        Ok(normalized)
    }

    /// Existing item by code, then by exact name, else an ad hoc item.
    pub async fn resolve_item(
        &self,
        raw: &RawLine,
        company: &str,
    ) -> Result<ItemInfo, ComprobanteError> {
        if let Some(code) = raw
            .item_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            match self.fetch_item(code, company).await? {
                Some(item) => return Ok(item),
                None if raw.description.is_none() => {
                    return Err(ComprobanteError::NotFound(format!("item '{code}'")));
                }
                None => {}
            }
        }

        let description = raw
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                ComprobanteError::Validation("line needs an item code or a description".into())
            })?;

        let query = ListQuery::new()
            .eq("item_name", description)
            .eq("disabled", 0)
            .fields(&["name"])
            .limit(1);
        let matches = self.ctx.client.list(ITEM_DOCTYPE, &query).await?;
        if let Some(code) = matches
            .first()
            .and_then(Value::as_object)
            .and_then(|row| str_field(row, "name"))
        {
            if let Some(item) = self.fetch_item(&code, company).await? {
                return Ok(item);
            }
        }

        self.ensure_ad_hoc_item(description, company).await
    }

    /// Create the catalog entry for a free-text line unless one with the
    /// derived code already exists.
    pub async fn ensure_ad_hoc_item(
        &self,
        description: &str,
        company: &str,
    ) -> Result<ItemInfo, ComprobanteError> {
        let code = ad_hoc_item_code(description);
        if let Some(existing) = self.fetch_item(&code, company).await? {
            tracing::debug!(item_code = %code, "reusing ad hoc item");
            return Ok(existing);
        }

        let item_name: String = description.chars().take(ITEM_NAME_MAX).collect();
        let payload = json!({
            "doctype": ITEM_DOCTYPE,
            "item_code": code,
            "item_name": item_name,
            "description": description,
            "item_group": self.ctx.settings.ad_hoc_item_group,
            "stock_uom": self.ctx.settings.ad_hoc_uom,
            "is_stock_item": 0,
            "is_sales_item": 1,
            "is_purchase_item": 1,
        });
        match self.ctx.client.insert(ITEM_DOCTYPE, payload).await {
            Ok(_) => {
                tracing::info!(item_code = %code, company, "ad hoc item created");
            }
            Err(e) if e.is_duplicate() => {
                tracing::debug!(item_code = %code, "ad hoc item created concurrently");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(ItemInfo {
            code,
            name: Some(item_name),
            is_stock_item: false,
            default_warehouse: None,
        })
    }

    async fn fetch_item(
        &self,
        code: &str,
        company: &str,
    ) -> Result<Option<ItemInfo>, ComprobanteError> {
        let record = match self.ctx.client.get(ITEM_DOCTYPE, code).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(record.as_object().map(|obj| item_info(obj, code, company)))
    }
}

fn item_info(obj: &serde_json::Map<String, Value>, code: &str, company: &str) -> ItemInfo {
    let default_warehouse = obj
        .get("item_defaults")
        .and_then(Value::as_array)
        .and_then(|defaults| {
            defaults
                .iter()
                .filter_map(Value::as_object)
                .find(|d| str_field(d, "company").as_deref() == Some(company))
                .and_then(|d| str_field(d, "default_warehouse"))
        });
    ItemInfo {
        code: str_field(obj, "item_code")
            .or_else(|| str_field(obj, "name"))
            .unwrap_or_else(|| code.to_string()),
        name: str_field(obj, "item_name"),
        is_stock_item: truthy(obj.get("is_stock_item")),
        default_warehouse,
    }
}

/// Deterministic catalog code for a free-text description:
/// `ADHOC-<SLUG>-<first 8 hex chars of sha256>`.
///
/// Case and whitespace differences map to the same code.
pub fn ad_hoc_item_code(description: &str) -> String {
    let normalized = description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut slug = String::new();
    for c in normalized.chars() {
        if slug.len() >= AD_HOC_SLUG_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_uppercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');

    let digest = Sha256::digest(normalized.as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    if slug.is_empty() {
        format!("{AD_HOC_PREFIX}-{hash}")
    } else {
        format!("{AD_HOC_PREFIX}-{slug}-{hash}")
    }
}
