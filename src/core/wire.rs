//! Mapping between [`Document`] and the ERP's JSON document shape.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Number, Value, json};

use super::error::ComprobanteError;
use super::types::*;

/// Header field holding the numbering method.
pub const NUMBERING_METHOD_FIELD: &str = "custom_numbering_method";
/// Header field holding the fiscal number assigned at confirmation.
pub const FISCAL_NUMBER_FIELD: &str = "custom_fiscal_number";
/// Header field listing document-level linked records, one per line.
pub const LINKED_RECORDS_FIELD: &str = "custom_linked_records";
/// Line field carrying the tax rate the template was resolved from.
pub const TAX_RATE_FIELD: &str = "custom_tax_rate";
/// Header field naming the Confirmed document a replacement supersedes.
/// Kept apart from `amended_from`, which the ERP reserves for amendments of
/// already cancelled documents.
pub const REPLACES_FIELD: &str = "custom_replaces";

const DATE_FORMAT: &str = "%Y-%m-%d";

impl Document {
    /// Serialize for `POST`/`PUT`. Row identities are sent when present so the
    /// ERP updates rows in place.
    pub fn to_payload(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("doctype".into(), json!(self.doctype()));
        if let Some(name) = &self.name {
            doc.insert("name".into(), json!(name));
        }
        doc.insert(self.direction.party_field().into(), json!(self.party));
        doc.insert("company".into(), json!(self.company));
        if let Some(date) = self.posting_date {
            doc.insert(
                "posting_date".into(),
                json!(date.format(DATE_FORMAT).to_string()),
            );
            doc.insert("set_posting_time".into(), json!(1));
        }
        doc.insert(
            "is_return".into(),
            json!(flag(self.kind == DocumentKind::CreditNote)),
        );
        doc.insert(
            "is_debit_note".into(),
            json!(flag(self.kind == DocumentKind::DebitNote)),
        );
        if let Some(original) = &self.return_against {
            doc.insert("return_against".into(), json!(original));
        }
        if let Some(original) = &self.amended_from {
            doc.insert(REPLACES_FIELD.into(), json!(original));
        }
        doc.insert("update_stock".into(), json!(flag(self.update_stock)));
        if let Some(method) = &self.numbering_method {
            doc.insert(NUMBERING_METHOD_FIELD.into(), json!(method));
        }
        if let Some(number) = &self.fiscal_number {
            doc.insert(FISCAL_NUMBER_FIELD.into(), json!(number));
        }
        if !self.linked_records.is_empty() {
            doc.insert(
                LINKED_RECORDS_FIELD.into(),
                json!(self.linked_records.join("\n")),
            );
        }
        doc.insert("docstatus".into(), json!(self.status.code()));
        let items: Vec<Value> = self
            .lines
            .iter()
            .map(|line| line_payload(self.direction, line))
            .collect();
        doc.insert("items".into(), Value::Array(items));
        Value::Object(doc)
    }

    /// Parse a document returned by the ERP.
    pub fn from_payload(direction: Direction, value: &Value) -> Result<Self, ComprobanteError> {
        let obj = value.as_object().ok_or_else(|| {
            ComprobanteError::Format(format!(
                "expected a {} object, got {value}",
                direction.invoice_doctype()
            ))
        })?;

        let status_code = obj.get("docstatus").and_then(Value::as_i64).unwrap_or(0);
        let status = DocStatus::from_code(status_code).ok_or_else(|| {
            ComprobanteError::Format(format!("unknown docstatus {status_code}"))
        })?;

        let kind = if truthy(obj.get("is_return")) {
            DocumentKind::CreditNote
        } else if truthy(obj.get("is_debit_note")) {
            DocumentKind::DebitNote
        } else {
            DocumentKind::Invoice
        };

        let posting_date = match str_field(obj, "posting_date") {
            Some(raw) => Some(NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
                ComprobanteError::Format(format!("invalid posting_date '{raw}': {e}"))
            })?),
            None => None,
        };

        let linked_records = str_field(obj, LINKED_RECORDS_FIELD)
            .map(|raw| {
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let lines = obj
            .get("items")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_object)
                    .map(|row| line_from_row(direction, row))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name: str_field(obj, "name"),
            direction,
            kind,
            status,
            party: str_field(obj, direction.party_field()).unwrap_or_default(),
            company: str_field(obj, "company").unwrap_or_default(),
            posting_date,
            numbering_method: str_field(obj, NUMBERING_METHOD_FIELD),
            fiscal_number: str_field(obj, FISCAL_NUMBER_FIELD),
            lines,
            linked_records,
            update_stock: truthy(obj.get("update_stock")),
            return_against: str_field(obj, "return_against"),
            amended_from: str_field(obj, REPLACES_FIELD).or_else(|| str_field(obj, "amended_from")),
        })
    }
}

fn line_payload(direction: Direction, line: &LineItem) -> Value {
    let mut row = Map::new();
    if let Some(id) = &line.row_id {
        row.insert("name".into(), json!(id));
    }
    row.insert("item_code".into(), json!(line.item_code));
    if let Some(name) = &line.item_name {
        row.insert("item_name".into(), json!(name));
    }
    row.insert("qty".into(), decimal_value(line.quantity));
    row.insert("rate".into(), decimal_value(line.rate));
    row.insert(TAX_RATE_FIELD.into(), decimal_value(line.tax_rate));
    if let Some(template) = &line.tax_template {
        row.insert("item_tax_template".into(), json!(template));
    }
    if let Some(warehouse) = &line.warehouse {
        row.insert("warehouse".into(), json!(warehouse));
    }
    if let Some(link) = &line.upstream {
        let (parent_field, row_field) = match link.kind {
            LinkKind::Receipt => direction.receipt_link_fields(),
            LinkKind::Order => direction.order_link_fields(),
        };
        row.insert(parent_field.into(), json!(link.parent));
        if let Some(detail) = &link.row {
            row.insert(row_field.into(), json!(detail));
        }
    }
    Value::Object(row)
}

fn line_from_row(direction: Direction, row: &Map<String, Value>) -> LineItem {
    let (receipt_field, receipt_row_field) = direction.receipt_link_fields();
    let (order_field, order_row_field) = direction.order_link_fields();
    let upstream = if let Some(parent) = str_field(row, receipt_field) {
        Some(UpstreamLink::receipt(parent, str_field(row, receipt_row_field)))
    } else {
        str_field(row, order_field)
            .map(|parent| UpstreamLink::order(parent, str_field(row, order_row_field)))
    };
    let warehouse = str_field(row, "warehouse");

    LineItem {
        row_id: str_field(row, "name"),
        item_code: str_field(row, "item_code").unwrap_or_default(),
        item_name: str_field(row, "item_name"),
        quantity: decimal_field(row, "qty"),
        rate: decimal_field(row, "rate"),
        tax_rate: decimal_field(row, TAX_RATE_FIELD),
        tax_template: str_field(row, "item_tax_template"),
        is_stock_item: row
            .get("is_stock_item")
            .map(|v| truthy(Some(v)))
            .unwrap_or(warehouse.is_some()),
        warehouse,
        upstream,
    }
}

/// Non-empty string field.
pub fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric field as a decimal; absent or unparseable values read as zero.
pub fn decimal_field(obj: &Map<String, Value>, key: &str) -> Decimal {
    obj.get(key).and_then(decimal_of).unwrap_or(Decimal::ZERO)
}

/// Decimal from a JSON number or numeric string.
pub fn decimal_of(value: &Value) -> Option<Decimal> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    raw.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

/// Decimal as a JSON number.
pub fn decimal_value(value: Decimal) -> Value {
    value
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Check fields stored as 0/1, booleans or "1".
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "1" | "true" | "Yes"),
        _ => false,
    }
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}
