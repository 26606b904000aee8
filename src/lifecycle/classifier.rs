//! Classification of ERP failures into correctable and fatal outcomes,
//! with the stock and valuation lookups that make them actionable.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};

use super::context::ErpContext;
use super::draft::ITEM_DOCTYPE;
use crate::core::wire::{decimal_field, str_field};
use crate::core::*;
use crate::erp::{FilterOp, ListQuery};

/// Doctype of the record that blocks cancelling a reconciled invoice.
pub const RECONCILIATION_LOG_DOCTYPE: &str = "Process Payment Reconciliation Log";

static STOCK_SHORTAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([\d.,]+)\s+units?\s+of\s+(?:item\s+)?(.+?)\s+needed\s+in\s+warehouse\s+(.+?)(?:\s+(?:on|to|for)\s|\.\s*$|$)",
    )
    .expect("stock shortage pattern should compile")
});

static STOCK_SHORTAGE_ES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)se\s+necesitan\s+([\d.,]+)\s+unidades\s+(?:del?\s+)?(?:producto|art[ií]culo|item)\s+(.+?)\s+en\s+(?:el\s+)?almac[eé]n\s+(.+?)(?:\s+(?:el|para|en)\s|\.\s*$|$)",
    )
    .expect("stock shortage pattern should compile")
});

static MISSING_VALUATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:valuation rate for the item|tasa de valoraci[oó]n (?:para|del) (?:el )?(?:art[ií]culo|producto))\s+(.+?)(?:,|\s+is\s+required|\s+es\s+requerid)",
    )
    .expect("valuation pattern should compile")
});

static BLOCKING_LOG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Process Payment Reconciliation Log\s+([A-Za-z0-9][\w.\-/]*\w)")
        .expect("reconciliation log pattern should compile")
});

/// What a failure means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// Not enough stock; fix by moving stock or switching warehouse.
    StockShortage(StockShortage),
    /// Stock item without a valuation rate.
    MissingValuation(MissingValuation),
    /// Anything else, passed through unchanged.
    Fatal(ExternalError),
}

impl FailureKind {
    pub fn is_correctable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    /// Tag used in the response contract.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::StockShortage(_) => "StockShortage",
            Self::MissingValuation(_) => "MissingValuation",
            Self::Fatal(_) => "ExternalFatalError",
        }
    }

    /// Remediation data for the response body.
    pub fn detail(&self) -> Value {
        let detail = match self {
            Self::StockShortage(shortage) => serde_json::to_value(shortage),
            Self::MissingValuation(missing) => serde_json::to_value(missing),
            Self::Fatal(err) => Ok(err.body.clone()),
        };
        detail.unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockShortage {
    pub item_code: String,
    pub warehouse: String,
    pub required: Decimal,
    /// Stock on hand per warehouse of the company, largest first.
    pub on_hand: Vec<WarehouseStock>,
    pub plan: RemediationPlan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarehouseStock {
    pub warehouse: String,
    pub quantity: Decimal,
}

/// Suggested fix for a shortage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemediationPlan {
    /// Another warehouse holds the full quantity.
    SwitchWarehouse { warehouse: String, available: Decimal },
    /// No single warehouse suffices; take what each has. `shortfall` is what
    /// is still missing after all of them.
    SplitAcross {
        allocations: Vec<WarehouseStock>,
        shortfall: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingValuation {
    pub item_code: String,
    pub suggestion: Option<ValuationSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValuationSuggestion {
    pub rate: Decimal,
    pub source: ValuationSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationSource {
    /// Incoming rate of a past receipt in the same company.
    CompanyHistory,
    /// Incoming rate of a past receipt in any company.
    GlobalHistory,
    /// Buying price list.
    BuyingPrice,
}

/// Pattern match on an error, without lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detected {
    StockShortage {
        item_code: String,
        warehouse: String,
        required: Decimal,
    },
    MissingValuation {
        item_code: String,
    },
    Unrecognized,
}

/// Recognize correctable conditions in an upstream error.
pub fn detect(err: &ExternalError) -> Detected {
    let text = err.text();
    for pattern in [&*STOCK_SHORTAGE, &*STOCK_SHORTAGE_ES] {
        if let Some(caps) = pattern.captures(&text) {
            let required = parse_quantity(&caps[1]);
            let item = caps[2].split(':').next().unwrap_or_default().trim();
            if let Some(required) = required {
                return Detected::StockShortage {
                    item_code: item.to_string(),
                    warehouse: caps[3].trim().trim_end_matches('.').to_string(),
                    required,
                };
            }
        }
    }
    if let Some(caps) = MISSING_VALUATION.captures(&text) {
        return Detected::MissingValuation {
            item_code: caps[1].split(':').next().unwrap_or_default().trim().to_string(),
        };
    }
    Detected::Unrecognized
}

/// Name of the reconciliation log blocking a cancellation, if that is what
/// the error reports.
pub fn blocking_log(err: &ExternalError) -> Option<String> {
    BLOCKING_LOG
        .captures(&err.text())
        .map(|caps| caps[1].to_string())
}

fn parse_quantity(raw: &str) -> Option<Decimal> {
    let cleaned = raw.trim().trim_end_matches('.').replace(',', "");
    cleaned.parse::<Decimal>().ok()
}

/// Decide how to cover `required` units given what each warehouse holds.
pub fn plan_stock_remediation(
    required: Decimal,
    failing_warehouse: &str,
    on_hand: &[WarehouseStock],
) -> RemediationPlan {
    if let Some(alt) = on_hand
        .iter()
        .filter(|s| s.warehouse != failing_warehouse && s.quantity >= required)
        .max_by(|a, b| a.quantity.cmp(&b.quantity))
    {
        return RemediationPlan::SwitchWarehouse {
            warehouse: alt.warehouse.clone(),
            available: alt.quantity,
        };
    }

    let mut sorted: Vec<&WarehouseStock> = on_hand.iter().filter(|s| s.quantity > Decimal::ZERO).collect();
    sorted.sort_by(|a, b| b.quantity.cmp(&a.quantity));

    let mut remaining = required;
    let mut allocations = Vec::new();
    for stock in sorted {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = stock.quantity.min(remaining);
        allocations.push(WarehouseStock {
            warehouse: stock.warehouse.clone(),
            quantity: take,
        });
        remaining -= take;
    }
    RemediationPlan::SplitAcross {
        allocations,
        shortfall: remaining.max(Decimal::ZERO),
    }
}

/// Turns upstream errors into [`FailureKind`]s, querying stock and purchase
/// history as needed.
pub struct FailureClassifier<'a> {
    ctx: &'a ErpContext,
}

impl<'a> FailureClassifier<'a> {
    pub fn new(ctx: &'a ErpContext) -> Self {
        Self { ctx }
    }

    /// Classify a failure raised while transitioning `doc`.
    ///
    /// Lookups that fail degrade the remediation data; they never turn a
    /// correctable failure into a fatal one.
    pub async fn classify(&self, err: ExternalError, doc: &Document) -> FailureKind {
        match detect(&err) {
            Detected::StockShortage {
                item_code,
                warehouse,
                required,
            } => {
                let on_hand = self
                    .stock_on_hand(&item_code, &doc.company)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(item_code = %item_code, error = %e, "stock lookup failed");
                        Vec::new()
                    });
                let plan = plan_stock_remediation(required, &warehouse, &on_hand);
                tracing::info!(item_code = %item_code, warehouse = %warehouse, %required, "stock shortage");
                FailureKind::StockShortage(StockShortage {
                    item_code,
                    warehouse,
                    required,
                    on_hand,
                    plan,
                })
            }
            Detected::MissingValuation { item_code } => {
                let suggestion = self
                    .suggest_valuation(&item_code, &doc.company)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(item_code = %item_code, error = %e, "valuation lookup failed");
                        None
                    });
                FailureKind::MissingValuation(MissingValuation {
                    item_code,
                    suggestion,
                })
            }
            Detected::Unrecognized => FailureKind::Fatal(err),
        }
    }

    /// Positive stock of `item_code` in each non-group warehouse of `company`,
    /// largest first.
    pub async fn stock_on_hand(
        &self,
        item_code: &str,
        company: &str,
    ) -> Result<Vec<WarehouseStock>, ComprobanteError> {
        let bins = self
            .ctx
            .client
            .list(
                "Bin",
                &ListQuery::new()
                    .eq("item_code", item_code)
                    .filter("actual_qty", FilterOp::Gt, 0)
                    .fields(&["warehouse", "actual_qty"]),
            )
            .await?;
        let warehouses = self
            .ctx
            .client
            .list(
                "Warehouse",
                &ListQuery::new()
                    .eq("company", company)
                    .eq("is_group", 0)
                    .fields(&["name"]),
            )
            .await?;
        let company_warehouses: Vec<String> = warehouses
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|w| str_field(w, "name"))
            .collect();

        let mut stock: Vec<WarehouseStock> = bins
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|bin| {
                let warehouse = str_field(bin, "warehouse")?;
                let quantity = decimal_field(bin, "actual_qty");
                (quantity > Decimal::ZERO && company_warehouses.contains(&warehouse))
                    .then_some(WarehouseStock { warehouse, quantity })
            })
            .collect();
        stock.sort_by(|a, b| b.quantity.cmp(&a.quantity));
        Ok(stock)
    }

    /// Most recent positive incoming rate for the item in `company`, then in
    /// any company, then its buying price.
    pub async fn suggest_valuation(
        &self,
        item_code: &str,
        company: &str,
    ) -> Result<Option<ValuationSuggestion>, ComprobanteError> {
        let history = |company: Option<&str>| {
            let mut query = ListQuery::new()
                .eq("item_code", item_code)
                .eq("is_cancelled", 0)
                .filter("incoming_rate", FilterOp::Gt, 0)
                .fields(&["incoming_rate"])
                .order_by("posting_date desc, creation desc")
                .limit(1);
            if let Some(company) = company {
                query = query.eq("company", company);
            }
            query
        };

        let sources = [
            (history(Some(company)), "Stock Ledger Entry", "incoming_rate", ValuationSource::CompanyHistory),
            (history(None), "Stock Ledger Entry", "incoming_rate", ValuationSource::GlobalHistory),
            (
                ListQuery::new()
                    .eq("item_code", item_code)
                    .eq("buying", 1)
                    .filter("price_list_rate", FilterOp::Gt, 0)
                    .fields(&["price_list_rate"])
                    .order_by("modified desc")
                    .limit(1),
                "Item Price",
                "price_list_rate",
                ValuationSource::BuyingPrice,
            ),
        ];

        for (query, doctype, field, source) in sources {
            let rows = self.ctx.client.list(doctype, &query).await?;
            let rate = rows
                .first()
                .and_then(Value::as_object)
                .map(|row| decimal_field(row, field))
                .filter(|rate| *rate > Decimal::ZERO);
            if let Some(rate) = rate {
                return Ok(Some(ValuationSuggestion { rate, source }));
            }
        }
        Ok(None)
    }

    /// Write `rate` as the item's valuation rate.
    pub async fn apply_valuation(&self, item_code: &str, rate: Decimal) -> Result<(), ComprobanteError> {
        self.ctx
            .client
            .update(
                ITEM_DOCTYPE,
                item_code,
                json!({ "valuation_rate": crate::core::wire::decimal_value(rate) }),
            )
            .await?;
        tracing::info!(item_code, %rate, "valuation rate applied");
        Ok(())
    }

    /// Stock items of a stock-consuming document whose catalog entry has no
    /// valuation rate. Read-only.
    pub async fn missing_valuations(
        &self,
        doc: &Document,
    ) -> Result<Vec<MissingValuation>, ComprobanteError> {
        if !doc.consumes_stock() {
            return Ok(Vec::new());
        }
        let mut checked: Vec<&str> = Vec::new();
        let mut missing = Vec::new();
        for line in doc.lines.iter().filter(|l| l.is_stock_item) {
            if checked.contains(&line.item_code.as_str()) {
                continue;
            }
            checked.push(&line.item_code);
            let item = self.ctx.client.get(ITEM_DOCTYPE, &line.item_code).await?;
            let rate = item
                .as_object()
                .map(|obj| decimal_field(obj, "valuation_rate"))
                .unwrap_or(Decimal::ZERO);
            if rate <= Decimal::ZERO {
                let suggestion = self.suggest_valuation(&line.item_code, &doc.company).await?;
                missing.push(MissingValuation {
                    item_code: line.item_code.clone(),
                    suggestion,
                });
            }
        }
        Ok(missing)
    }
}
