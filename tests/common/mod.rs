//! In-memory ERP used by the integration tests.
//!
//! Behaves like the document API closely enough for the lifecycle: names are
//! assigned on insert, `modified` stamps are checked on update, Confirmed
//! documents cannot be deleted and `cancel` moves them to docstatus 2.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use comprobantes::core::*;
use comprobantes::erp::{ErpClient, FilterOp, ListQuery};
use comprobantes::lifecycle::*;

pub const COMPANY: &str = "Empresa SRL";
pub const CUSTOMER: &str = "Cliente SA";
pub const SUPPLIER: &str = "Proveedor SRL";
pub const MAIN_WAREHOUSE: &str = "Depósito - E";
pub const SECOND_WAREHOUSE: &str = "Sucursal - E";
pub const INVOICE_METHOD: &str = "FE-FAC-A-00003-00000007";
pub const CREDIT_NOTE_METHOD: &str = "FE-NCC-A-00003-########";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    List,
    Insert,
    Update,
    Delete,
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Op,
    pub doctype: String,
    pub name: Option<String>,
    pub body: Option<Value>,
}

struct Injected {
    op: Op,
    doctype: String,
    name: Option<String>,
    error: ExternalError,
    remaining: usize,
}

#[derive(Default)]
struct State {
    docs: HashMap<String, Vec<Value>>,
    calls: Vec<Call>,
    injected: Vec<Injected>,
    counters: HashMap<String, u64>,
    clock: u64,
}

#[derive(Default)]
pub struct FakeErp {
    state: Mutex<State>,
}

impl FakeErp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a document as-is (a `name` is required).
    pub fn seed(&self, doctype: &str, doc: Value) {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        let stamp = stamp(state.clock);
        let mut doc = doc;
        if doc.get("modified").is_none() {
            doc["modified"] = json!(stamp);
        }
        state.docs.entry(doctype.to_string()).or_default().push(doc);
    }

    /// Fail the next `times` matching calls with `error`. `name` of `None`
    /// matches any document of the doctype.
    pub fn fail(&self, op: Op, doctype: &str, name: Option<&str>, times: usize, error: ExternalError) {
        self.state.lock().unwrap().injected.push(Injected {
            op,
            doctype: doctype.to_string(),
            name: name.map(str::to_string),
            error,
            remaining: times,
        });
    }

    pub fn doc(&self, doctype: &str, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .docs
            .get(doctype)?
            .iter()
            .find(|d| d.get("name").and_then(Value::as_str) == Some(name))
            .cloned()
    }

    pub fn docs(&self, doctype: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state.docs.get(doctype).cloned().unwrap_or_default()
    }

    pub fn docstatus(&self, doctype: &str, name: &str) -> Option<i64> {
        self.doc(doctype, name)
            .and_then(|d| d.get("docstatus").and_then(Value::as_i64))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, op: Op, doctype: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op && c.doctype == doctype)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Simulate another process touching a record.
    pub fn touch(&self, doctype: &str, name: &str, fields: Value) {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        let stamp = stamp(state.clock);
        if let Some(doc) = find_mut(&mut state, doctype, name) {
            merge(doc, &fields);
            doc["modified"] = json!(stamp);
        }
    }

    fn record(&self, state: &mut State, op: Op, doctype: &str, name: Option<&str>, body: Option<&Value>) -> Result<(), ExternalError> {
        state.calls.push(Call {
            op,
            doctype: doctype.to_string(),
            name: name.map(str::to_string),
            body: body.cloned(),
        });
        for injected in state.injected.iter_mut() {
            let name_matches = match (&injected.name, name) {
                (None, _) => true,
                (Some(expected), Some(actual)) => expected == actual,
                (Some(_), None) => false,
            };
            if injected.op == op && injected.doctype == doctype && name_matches && injected.remaining > 0 {
                injected.remaining -= 1;
                return Err(injected.error.clone());
            }
        }
        Ok(())
    }
}

fn stamp(clock: u64) -> String {
    format!("2024-05-02 10:00:{:02}.{:06}", clock / 1_000_000 % 60, clock % 1_000_000)
}

fn find_mut<'a>(state: &'a mut State, doctype: &str, name: &str) -> Option<&'a mut Value> {
    state
        .docs
        .get_mut(doctype)?
        .iter_mut()
        .find(|d| d.get("name").and_then(Value::as_str) == Some(name))
}

fn merge(doc: &mut Value, fields: &Value) {
    if let (Some(doc), Some(fields)) = (doc.as_object_mut(), fields.as_object()) {
        for (k, v) in fields {
            doc.insert(k.clone(), v.clone());
        }
    }
}

fn not_found(doctype: &str, name: &str) -> ExternalError {
    ExternalError::new(404, Some("DoesNotExistError"), format!("{doctype} {name} not found"))
}

fn abbreviation(doctype: &str) -> String {
    match doctype {
        "Sales Invoice" => "SINV".into(),
        "Purchase Invoice" => "PINV".into(),
        "Delivery Note" => "DN".into(),
        "Purchase Receipt" => "PR".into(),
        other => other
            .split_whitespace()
            .filter_map(|w| w.chars().next())
            .collect::<String>()
            .to_uppercase(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

fn loosely_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        // Unset check fields read as 0.
        (None | Some(Value::Null), Value::Number(n)) => n.as_f64() == Some(0.0),
        (None, _) => false,
        (Some(a), e) => a == e || matches!((as_f64(a), as_f64(e)), (Some(x), Some(y)) if x == y),
    }
}

fn matches_filter(doc: &Value, field: &str, op: FilterOp, value: &Value) -> bool {
    let actual = doc.get(field);
    match op {
        FilterOp::Eq => loosely_equal(actual, value),
        FilterOp::NotEq => !loosely_equal(actual, value),
        FilterOp::Gt => matches!((actual.and_then(as_f64), as_f64(value)), (Some(a), Some(b)) if a > b),
        FilterOp::Lt => matches!((actual.and_then(as_f64), as_f64(value)), (Some(a), Some(b)) if a < b),
        FilterOp::In => value
            .as_array()
            .is_some_and(|options| options.iter().any(|o| loosely_equal(actual, o))),
        FilterOp::Like => {
            let pattern = value.as_str().unwrap_or_default().replace('%', "");
            actual
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(&pattern))
        }
    }
}

#[async_trait]
impl ErpClient for FakeErp {
    async fn get(&self, doctype: &str, name: &str) -> Result<Value, ExternalError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, Op::Get, doctype, Some(name), None)?;
        find_mut(&mut state, doctype, name)
            .map(|d| d.clone())
            .ok_or_else(|| not_found(doctype, name))
    }

    async fn list(&self, doctype: &str, query: &ListQuery) -> Result<Vec<Value>, ExternalError> {
        let mut state = self.state.lock().unwrap();
        let body = serde_json::to_value(query).ok();
        self.record(&mut state, Op::List, doctype, None, body.as_ref())?;
        let docs = state.docs.get(doctype).cloned().unwrap_or_default();
        let rows = docs
            .into_iter()
            .filter(|d| {
                query
                    .filters
                    .iter()
                    .all(|f| match &f.child {
                        Some(_) => d
                            .get("items")
                            .and_then(Value::as_array)
                            .is_some_and(|rows| {
                                rows.iter().any(|r| matches_filter(r, &f.field, f.op, &f.value))
                            }),
                        None => matches_filter(d, &f.field, f.op, &f.value),
                    })
            })
            .map(|d| {
                if query.fields.is_empty() {
                    return json!({ "name": d.get("name") });
                }
                let mut row = Map::new();
                for field in &query.fields {
                    if let Some(v) = d.get(field) {
                        row.insert(field.clone(), v.clone());
                    }
                }
                Value::Object(row)
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(rows)
    }

    async fn insert(&self, doctype: &str, doc: Value) -> Result<Value, ExternalError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, Op::Insert, doctype, None, Some(&doc))?;
        let mut doc = doc;

        let name = match doc.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None if doctype == "Item" => doc
                .get("item_code")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            None => {
                let counter = state.counters.entry(doctype.to_string()).or_insert(0);
                *counter += 1;
                format!("{}-{:05}", abbreviation(doctype), counter)
            }
        };
        if find_mut(&mut state, doctype, &name).is_some() {
            return Err(ExternalError::new(
                409,
                Some("DuplicateEntryError"),
                format!("{doctype} {name} already exists"),
            ));
        }

        doc["name"] = json!(name);
        if doc.get("docstatus").is_none() {
            doc["docstatus"] = json!(0);
        }
        if let Some(items) = doc.get_mut("items").and_then(Value::as_array_mut) {
            for (i, row) in items.iter_mut().enumerate() {
                if row.get("name").is_none() {
                    row["name"] = json!(format!("{name}-row-{}", i + 1));
                }
            }
        }
        state.clock += 1;
        doc["modified"] = json!(stamp(state.clock));
        state
            .docs
            .entry(doctype.to_string())
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    async fn update(&self, doctype: &str, name: &str, fields: Value) -> Result<Value, ExternalError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, Op::Update, doctype, Some(name), Some(&fields))?;
        state.clock += 1;
        let now = stamp(state.clock);
        let doc = find_mut(&mut state, doctype, name).ok_or_else(|| not_found(doctype, name))?;

        let mut fields = fields;
        if let Some(expected) = fields.as_object_mut().and_then(|f| f.remove("modified")) {
            if doc.get("modified") != Some(&expected) {
                return Err(ExternalError::new(
                    417,
                    Some("TimestampMismatchError"),
                    format!("{doctype} {name} has been modified after you opened it"),
                ));
            }
        }
        let current = doc.get("docstatus").and_then(Value::as_i64).unwrap_or(0);
        if current == 2 {
            return Err(ExternalError::new(
                417,
                Some("ValidationError"),
                format!("cannot edit cancelled {doctype} {name}"),
            ));
        }
        merge(doc, &fields);
        doc["modified"] = json!(now);
        Ok(doc.clone())
    }

    async fn delete(&self, doctype: &str, name: &str) -> Result<(), ExternalError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, Op::Delete, doctype, Some(name), None)?;
        let docs = state
            .docs
            .get_mut(doctype)
            .ok_or_else(|| not_found(doctype, name))?;
        let index = docs
            .iter()
            .position(|d| d.get("name").and_then(Value::as_str) == Some(name))
            .ok_or_else(|| not_found(doctype, name))?;
        if docs[index].get("docstatus").and_then(Value::as_i64) == Some(1) {
            return Err(ExternalError::new(
                417,
                Some("ValidationError"),
                format!("cannot delete submitted {doctype} {name}"),
            ));
        }
        docs.remove(index);
        Ok(())
    }

    async fn cancel(&self, doctype: &str, name: &str) -> Result<(), ExternalError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, Op::Cancel, doctype, Some(name), None)?;
        state.clock += 1;
        let now = stamp(state.clock);
        let doc = find_mut(&mut state, doctype, name).ok_or_else(|| not_found(doctype, name))?;
        if doc.get("docstatus").and_then(Value::as_i64) != Some(1) {
            return Err(ExternalError::new(
                417,
                Some("ValidationError"),
                format!("only submitted {doctype} can be cancelled"),
            ));
        }
        doc["docstatus"] = json!(2);
        doc["modified"] = json!(now);
        Ok(())
    }
}

/// Catalog, templates, warehouses and the 00003/A sequence book at 7.
pub fn seeded() -> Arc<FakeErp> {
    let erp = FakeErp::new();
    erp.seed(
        "Company",
        json!({
            "name": COMPANY,
            "custom_default_warehouse": MAIN_WAREHOUSE,
            "default_income_account": "Ventas - E",
        }),
    );
    for (name, is_group) in [(MAIN_WAREHOUSE, 0), (SECOND_WAREHOUSE, 0), ("Todos - E", 1)] {
        erp.seed(
            "Warehouse",
            json!({ "name": name, "company": COMPANY, "is_group": is_group }),
        );
    }
    for (direction, suffix) in [("Sales", "V"), ("Purchase", "C")] {
        for rate in [21.0, 10.5] {
            erp.seed(
                TAX_TEMPLATE_DOCTYPE,
                json!({
                    "name": format!("IVA {rate} {suffix} - E"),
                    "company": COMPANY,
                    TEMPLATE_DIRECTION_FIELD: direction,
                    "disabled": 0,
                    TAX_RATE_FIELD: rate,
                }),
            );
        }
    }
    erp.seed(
        ITEM_DOCTYPE,
        json!({
            "name": "SERV-01",
            "item_code": "SERV-01",
            "item_name": "Servicio de instalación",
            "is_stock_item": 0,
            "disabled": 0,
        }),
    );
    for (code, name, valuation) in [("ART-1", "Tornillo", 50.0), ("ART-2", "Tuerca", 12.5), ("ART-3", "Arandela", 3.0)] {
        erp.seed(
            ITEM_DOCTYPE,
            json!({
                "name": code,
                "item_code": code,
                "item_name": name,
                "is_stock_item": 1,
                "valuation_rate": valuation,
                "disabled": 0,
                "item_defaults": [{ "company": COMPANY, "default_warehouse": MAIN_WAREHOUSE }],
            }),
        );
    }
    seed_book(&erp, "00003", "A", 7);
    erp
}

pub fn seed_book(erp: &FakeErp, point_of_sale: &str, letter: &str, last_used: u64) {
    erp.seed(
        BOOK_DOCTYPE,
        json!({
            "name": format!("TAL-{point_of_sale}-{letter}"),
            BOOK_POINT_OF_SALE_FIELD: point_of_sale,
            BOOK_LETTER_FIELD: letter,
            BOOK_LAST_USED_FIELD: last_used,
        }),
    );
}

pub fn book_last_used(erp: &FakeErp, point_of_sale: &str, letter: &str) -> Option<u64> {
    erp.doc(BOOK_DOCTYPE, &format!("TAL-{point_of_sale}-{letter}"))
        .and_then(|b| b.get(BOOK_LAST_USED_FIELD).and_then(Value::as_u64))
}

pub fn settings() -> LifecycleSettings {
    LifecycleSettings {
        auto_apply_valuation: false,
        ..LifecycleSettings::default()
    }
    .with_numbering(
        NumberingConfig::new()
            .set(DocumentKind::Invoice, INVOICE_METHOD)
            .set(DocumentKind::CreditNote, CREDIT_NOTE_METHOD),
    )
}

pub fn controller(erp: &Arc<FakeErp>) -> LifecycleController {
    controller_with(erp, settings())
}

pub fn controller_with(erp: &Arc<FakeErp>, settings: LifecycleSettings) -> LifecycleController {
    let client: Arc<dyn ErpClient> = erp.clone();
    LifecycleController::new(ErpContext::new(client, settings))
}

pub fn sales_request() -> DraftRequest {
    DraftRequest::new(Direction::Sales, DocumentKind::Invoice, CUSTOMER, COMPANY)
}

pub fn shortage_error(qty: &str, item: &str, warehouse: &str) -> ExternalError {
    ExternalError::new(
        417,
        Some("NegativeStockError"),
        format!("{qty} units of Item {item}: Tornillo needed in Warehouse {warehouse} to complete this transaction."),
    )
}

/// A Confirmed sales invoice created through the controller.
pub async fn confirmed_invoice(controller: &LifecycleController, request: &DraftRequest) -> Document {
    match controller.create(request, false).await.unwrap() {
        CreateOutcome::Confirmation(ConfirmOutcome::Confirmed { document, .. }) => document,
        other => panic!("expected a confirmed invoice, got {other:?}"),
    }
}
