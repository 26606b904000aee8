use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::error::{ComprobanteError, ValidationError};
use super::types::*;
use super::validation;

/// Builder for documents about to be sent upstream.
///
/// ```
/// use comprobantes::core::*;
/// use rust_decimal_macros::dec;
///
/// let doc = DocumentBuilder::new(Direction::Sales, DocumentKind::Invoice, "Cliente SA", "Empresa SRL")
///     .numbering_method("FE-FAC-A-00003-########")
///     .add_line(LineItemBuilder::new("SERV-01", dec!(2), dec!(1500))
///         .tax(dec!(21), "IVA 21% Ventas")
///         .build())
///     .build()
///     .unwrap();
///
/// assert!(doc.is_draft());
/// assert!(doc.name.is_none());
/// ```
pub struct DocumentBuilder {
    direction: Direction,
    kind: DocumentKind,
    party: String,
    company: String,
    posting_date: Option<NaiveDate>,
    numbering_method: Option<String>,
    lines: Vec<LineItem>,
    linked_records: Vec<String>,
    update_stock: bool,
    return_against: Option<String>,
    amended_from: Option<String>,
}

impl DocumentBuilder {
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
            amended_from: None,
        }
    }

    pub fn posting_date(mut self, date: NaiveDate) -> Self {
        self.posting_date = Some(date);
        self
    }

    pub fn numbering_method(mut self, method: impl Into<String>) -> Self {
        self.numbering_method = Some(method.into());
        self
    }

    pub fn add_line(mut self, line: LineItem) -> Self {
        self.lines.push(line);
        self
    }

    pub fn lines(mut self, lines: Vec<LineItem>) -> Self {
        self.lines = lines;
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

    pub fn amended_from(mut self, original: impl Into<String>) -> Self {
        self.amended_from = Some(original.into());
        self
    }

    /// Build the document as a Draft, running duplicate and field validation.
    /// Returns all validation errors (not just the first).
    pub fn build(self) -> Result<Document, ComprobanteError> {
        if self.lines.len() > 1_000 {
            return Err(ComprobanteError::Validation(
                "document cannot have more than 1,000 line items".into(),
            ));
        }

        validation::check_line_conflicts(&self.lines)?;

        let doc = Document {
            name: None,
            direction: self.direction,
            kind: self.kind,
            status: DocStatus::Draft,
            party: self.party,
            company: self.company,
            posting_date: self.posting_date,
            numbering_method: self.numbering_method,
            fiscal_number: None,
            lines: self.lines,
            linked_records: self.linked_records,
            update_stock: self.update_stock,
            return_against: self.return_against,
            amended_from: self.amended_from,
        };

        let errors = validation::validate_document(&doc);
        if !errors.is_empty() {
            return Err(ValidationError::into_error(&errors));
        }

        Ok(doc)
    }
}

/// Builder for [`LineItem`].
pub struct LineItemBuilder {
    item_code: String,
    item_name: Option<String>,
    quantity: Decimal,
    rate: Decimal,
    tax_rate: Decimal,
    tax_template: Option<String>,
    warehouse: Option<String>,
    is_stock_item: bool,
    upstream: Option<UpstreamLink>,
    row_id: Option<String>,
}

impl LineItemBuilder {
    pub fn new(item_code: impl Into<String>, quantity: Decimal, rate: Decimal) -> Self {
        Self {
            item_code: item_code.into(),
            item_name: None,
            quantity,
            rate,
            tax_rate: Decimal::ZERO,
            tax_template: None,
            warehouse: None,
            is_stock_item: false,
            upstream: None,
            row_id: None,
        }
    }

    pub fn item_name(mut self, name: impl Into<String>) -> Self {
        self.item_name = Some(name.into());
        self
    }

    /// Tax rate and the item tax template it resolved to.
    pub fn tax(mut self, rate: Decimal, template: impl Into<String>) -> Self {
        self.tax_rate = rate;
        self.tax_template = Some(template.into());
        self
    }

    /// Mark the item stock-tracked, stored in `warehouse`.
    pub fn stock(mut self, warehouse: impl Into<String>) -> Self {
        self.is_stock_item = true;
        self.warehouse = Some(warehouse.into());
        self
    }

    pub fn upstream(mut self, link: UpstreamLink) -> Self {
        self.upstream = Some(link);
        self
    }

    pub fn row_id(mut self, id: impl Into<String>) -> Self {
        self.row_id = Some(id.into());
        self
    }

    pub fn build(self) -> LineItem {
        LineItem {
            row_id: self.row_id,
            item_code: self.item_code,
            item_name: self.item_name,
            quantity: self.quantity,
            rate: self.rate,
            tax_rate: self.tax_rate,
            tax_template: self.tax_template,
            warehouse: self.warehouse,
            is_stock_item: self.is_stock_item,
            upstream: self.upstream,
        }
    }
}

impl RawLine {
    /// Line for an existing catalog item.
    pub fn item(code: impl Into<String>, quantity: Decimal, rate: Decimal) -> Self {
        Self {
            item_code: Some(code.into()),
            description: None,
            quantity,
            rate,
            tax_rate: Decimal::ZERO,
            warehouse: None,
            upstream: None,
        }
    }

    /// Free-text line; resolved by name or created as an ad hoc item.
    pub fn described(description: impl Into<String>, quantity: Decimal, rate: Decimal) -> Self {
        Self {
            item_code: None,
            description: Some(description.into()),
            quantity,
            rate,
            tax_rate: Decimal::ZERO,
            warehouse: None,
            upstream: None,
        }
    }

    pub fn tax_rate(mut self, rate: Decimal) -> Self {
        self.tax_rate = rate;
        self
    }

    pub fn warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn linked_to(mut self, link: UpstreamLink) -> Self {
        self.upstream = Some(link);
        self
    }
}
