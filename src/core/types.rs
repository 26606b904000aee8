use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A fiscal invoice as tracked through Draft, Confirmed and Cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// ERP identity. Present only once the document has been created upstream.
    pub name: Option<String>,
    /// Sales or purchase side; selects the ERP doctype.
    pub direction: Direction,
    /// Invoice, credit note or debit note. Fixed at creation time.
    pub kind: DocumentKind,
    /// Current `docstatus`.
    pub status: DocStatus,
    /// Customer (sales) or supplier (purchase).
    pub party: String,
    /// Owning company.
    pub company: String,
    /// Posting date. `None` lets the ERP default to today.
    pub posting_date: Option<NaiveDate>,
    /// Numbering method (`prefix-docType-letter-pointOfSale-sequence`).
    pub numbering_method: Option<String>,
    /// Fiscal number assigned at confirmation.
    pub fiscal_number: Option<String>,
    /// Ordered line items.
    pub lines: Vec<LineItem>,
    /// Document-level linked records (goods receipts / delivery notes).
    pub linked_records: Vec<String>,
    /// Whether this document moves stock itself instead of through a linked record.
    pub update_stock: bool,
    /// Original invoice a credit/debit note is issued against.
    pub return_against: Option<String>,
    /// Confirmed document this one replaces (set by amend).
    pub amended_from: Option<String>,
}

impl Document {
    /// ERP doctype holding this document.
    pub fn doctype(&self) -> &'static str {
        self.direction.invoice_doctype()
    }

    pub fn is_draft(&self) -> bool {
        self.status == DocStatus::Draft
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == DocStatus::Confirmed
    }

    /// Every linked record referenced either at document level or through a
    /// line-item receipt back-reference, deduplicated in first-seen order.
    pub fn referenced_records(&self) -> Vec<String> {
        let mut records: Vec<String> = Vec::new();
        let line_refs = self.lines.iter().filter_map(|l| match &l.upstream {
            Some(link) if link.kind == LinkKind::Receipt => Some(&link.parent),
            _ => None,
        });
        for name in self.linked_records.iter().chain(line_refs) {
            if !records.contains(name) {
                records.push(name.clone());
            }
        }
        records
    }

    /// True when confirming this document takes stock out of a warehouse,
    /// which requires a valuation rate for every stock item.
    pub fn consumes_stock(&self) -> bool {
        if !self.update_stock {
            return false;
        }
        match self.direction {
            Direction::Sales => self.kind != DocumentKind::CreditNote,
            Direction::Purchase => self.kind == DocumentKind::CreditNote,
        }
    }
}

/// A normalized invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// ERP child-row identity, stable across edits of the same document.
    pub row_id: Option<String>,
    /// Canonical item code.
    pub item_code: String,
    /// Item display name.
    pub item_name: Option<String>,
    /// Quantity (negative on returns).
    pub quantity: Decimal,
    /// Unit price.
    pub rate: Decimal,
    /// Tax rate percentage.
    pub tax_rate: Decimal,
    /// Resolved item tax template.
    pub tax_template: Option<String>,
    /// Warehouse; required iff the item is stock-tracked.
    pub warehouse: Option<String>,
    /// Whether the item is stock-tracked.
    pub is_stock_item: bool,
    /// Upstream receipt or order this line bills.
    pub upstream: Option<UpstreamLink>,
}

/// A line as submitted by a caller, before item/tax/warehouse resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLine {
    /// Existing item code, if known.
    pub item_code: Option<String>,
    /// Free-text description, used for matching or ad hoc creation.
    pub description: Option<String>,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub tax_rate: Decimal,
    /// Explicit warehouse, overriding item and company defaults.
    pub warehouse: Option<String>,
    pub upstream: Option<UpstreamLink>,
}

impl RawLine {
    /// Key used for duplicate detection: the item code, else the description.
    pub fn item_key(&self) -> Option<&str> {
        self.item_code
            .as_deref()
            .or(self.description.as_deref())
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Back-reference from an invoice line to the upstream document it bills.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpstreamLink {
    pub kind: LinkKind,
    /// Upstream document name (e.g. a purchase receipt).
    pub parent: String,
    /// Upstream child-row name.
    pub row: Option<String>,
}

impl UpstreamLink {
    pub fn receipt(parent: impl Into<String>, row: Option<String>) -> Self {
        Self {
            kind: LinkKind::Receipt,
            parent: parent.into(),
            row,
        }
    }

    pub fn order(parent: impl Into<String>, row: Option<String>) -> Self {
        Self {
            kind: LinkKind::Order,
            parent: parent.into(),
            row,
        }
    }
}

/// What an upstream link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    /// Goods receipt (purchase) or delivery note (sales).
    Receipt,
    /// Purchase or sales order.
    Order,
}

/// `docstatus` values of the document API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocStatus {
    /// 0
    Draft,
    /// 1
    Confirmed,
    /// 2
    Cancelled,
}

impl DocStatus {
    pub fn code(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Confirmed => 1,
            Self::Cancelled => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Confirmed => "Confirmed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Draft),
            1 => Some(Self::Confirmed),
            2 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Sales or purchase side of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Sales,
    Purchase,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sales => "Sales",
            Self::Purchase => "Purchase",
        }
    }

    pub fn invoice_doctype(&self) -> &'static str {
        match self {
            Self::Sales => "Sales Invoice",
            Self::Purchase => "Purchase Invoice",
        }
    }

    /// Child doctype of the invoice's `items` table.
    pub fn invoice_item_doctype(&self) -> &'static str {
        match self {
            Self::Sales => "Sales Invoice Item",
            Self::Purchase => "Purchase Invoice Item",
        }
    }

    /// Doctype of the linked record that moves stock for this side.
    pub fn linked_record_doctype(&self) -> &'static str {
        match self {
            Self::Sales => "Delivery Note",
            Self::Purchase => "Purchase Receipt",
        }
    }

    /// Field carrying the counterparty.
    pub fn party_field(&self) -> &'static str {
        match self {
            Self::Sales => "customer",
            Self::Purchase => "supplier",
        }
    }

    /// Line fields `(parent, row)` referencing a linked record.
    pub fn receipt_link_fields(&self) -> (&'static str, &'static str) {
        match self {
            Self::Sales => ("delivery_note", "dn_detail"),
            Self::Purchase => ("purchase_receipt", "pr_detail"),
        }
    }

    /// Line fields `(parent, row)` referencing an order.
    pub fn order_link_fields(&self) -> (&'static str, &'static str) {
        match self {
            Self::Sales => ("sales_order", "so_detail"),
            Self::Purchase => ("purchase_order", "po_detail"),
        }
    }
}

/// Fiscal document kind. Explicit tag, never inferred from titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Factura.
    Invoice,
    /// Nota de crédito.
    CreditNote,
    /// Nota de débito.
    DebitNote,
}

impl DocumentKind {
    /// Document-type segment used in numbering methods.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invoice => "FAC",
            Self::CreditNote => "NCC",
            Self::DebitNote => "NDB",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "FAC" => Some(Self::Invoice),
            "NCC" => Some(Self::CreditNote),
            "NDB" => Some(Self::DebitNote),
            _ => None,
        }
    }
}

/// AFIP invoice letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Letter {
    A,
    B,
    C,
    E,
    M,
}

impl Letter {
    pub fn code(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::E => "E",
            Self::M => "M",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "E" => Some(Self::E),
            "M" => Some(Self::M),
            _ => None,
        }
    }
}

/// Billing status of a linked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkedRecordStatus {
    PendingInvoice,
    PartiallyInvoiced,
    FullyInvoiced,
    Voided,
}

impl LinkedRecordStatus {
    /// Status string stored upstream.
    pub fn erp_status(&self) -> &'static str {
        match self {
            Self::PendingInvoice => "To Bill",
            Self::PartiallyInvoiced => "Partly Billed",
            Self::FullyInvoiced => "Completed",
            Self::Voided => "Cancelled",
        }
    }

    pub fn from_erp_status(status: &str) -> Option<Self> {
        match status {
            "To Bill" => Some(Self::PendingInvoice),
            "Partly Billed" => Some(Self::PartiallyInvoiced),
            "Completed" => Some(Self::FullyInvoiced),
            "Cancelled" => Some(Self::Voided),
            _ => None,
        }
    }

    /// Billed percentage written alongside the status.
    pub fn per_billed(&self) -> Decimal {
        match self {
            Self::FullyInvoiced => Decimal::ONE_HUNDRED,
            _ => Decimal::ZERO,
        }
    }
}

/// Requested edits to a Confirmed document, applied by amend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentChanges {
    pub party: Option<String>,
    pub posting_date: Option<NaiveDate>,
    /// Full replacement line list. `None` keeps every existing line.
    pub lines: Option<Vec<LineEdit>>,
}

/// One line of an amended document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LineEdit {
    /// Keep an existing line, matched by row identity, with optional overrides.
    Keep {
        row_id: String,
        quantity: Option<Decimal>,
        rate: Option<Decimal>,
        tax_rate: Option<Decimal>,
        warehouse: Option<String>,
    },
    /// Add a new line.
    Add(RawLine),
}

impl LineEdit {
    /// Keep an existing row unchanged.
    pub fn keep(row_id: impl Into<String>) -> Self {
        Self::Keep {
            row_id: row_id.into(),
            quantity: None,
            rate: None,
            tax_rate: None,
            warehouse: None,
        }
    }
}
