//! Tax-template and company-default lookups, plus the TTL cache that keeps
//! rate→template maps across calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::core::wire::{decimal_field, str_field};
use crate::core::{ComprobanteError, Direction};
use crate::erp::{ErpClient, ListQuery};

pub const TAX_TEMPLATE_DOCTYPE: &str = "Item Tax Template";
/// Template field naming the side (Sales/Purchase) it applies to.
pub const TEMPLATE_DIRECTION_FIELD: &str = "custom_direction";
/// Company field holding the warehouse used when an item has none.
pub const COMPANY_WAREHOUSE_FIELD: &str = "custom_default_warehouse";

/// Tax rate → item tax template for one (company, direction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateMap {
    by_rate: HashMap<Decimal, String>,
}

impl TemplateMap {
    pub fn insert(&mut self, rate: Decimal, template: impl Into<String>) {
        self.by_rate.insert(rate.normalize(), template.into());
    }

    /// Template for `rate`; `21`, `21.0` and `21.00` all match.
    pub fn template_for(&self, rate: Decimal) -> Option<&str> {
        self.by_rate.get(&rate.normalize()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rate.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(Decimal, S)> for TemplateMap {
    fn from_iter<I: IntoIterator<Item = (Decimal, S)>>(iter: I) -> Self {
        let mut map = Self::default();
        for (rate, template) in iter {
            map.insert(rate, template);
        }
        map
    }
}

/// Company-level defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyDefaults {
    pub default_warehouse: Option<String>,
    pub income_account: Option<String>,
    pub expense_account: Option<String>,
}

/// Tax and account resolution, owned by the ERP side.
#[async_trait]
pub trait TaxResolver: Send + Sync {
    async fn tax_templates(
        &self,
        company: &str,
        direction: Direction,
    ) -> Result<TemplateMap, ComprobanteError>;

    async fn company_defaults(&self, company: &str) -> Result<CompanyDefaults, ComprobanteError>;
}

/// [`TaxResolver`] reading templates and company records through the
/// document API.
pub struct ErpTaxResolver {
    client: Arc<dyn ErpClient>,
}

impl ErpTaxResolver {
    pub fn new(client: Arc<dyn ErpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaxResolver for ErpTaxResolver {
    async fn tax_templates(
        &self,
        company: &str,
        direction: Direction,
    ) -> Result<TemplateMap, ComprobanteError> {
        let query = ListQuery::new()
            .eq("company", company)
            .eq(TEMPLATE_DIRECTION_FIELD, direction.label())
            .eq("disabled", 0)
            .fields(&["name", crate::core::TAX_RATE_FIELD]);
        let rows = self.client.list(TAX_TEMPLATE_DOCTYPE, &query).await?;
        let map: TemplateMap = rows
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|row| {
                let name = str_field(row, "name")?;
                Some((decimal_field(row, crate::core::TAX_RATE_FIELD), name))
            })
            .collect();
        tracing::debug!(company, direction = direction.label(), templates = map.len(), "tax templates loaded");
        Ok(map)
    }

    async fn company_defaults(&self, company: &str) -> Result<CompanyDefaults, ComprobanteError> {
        let record = self.client.get("Company", company).await.map_err(|e| {
            if e.is_not_found() {
                ComprobanteError::NotFound(format!("company '{company}'"))
            } else {
                ComprobanteError::External(e)
            }
        })?;
        let Some(obj) = record.as_object() else {
            return Ok(CompanyDefaults::default());
        };
        Ok(CompanyDefaults {
            default_warehouse: str_field(obj, COMPANY_WAREHOUSE_FIELD),
            income_account: str_field(obj, "default_income_account"),
            expense_account: str_field(obj, "default_expense_account"),
        })
    }
}

/// Bounded TTL cache of template maps keyed by (company, direction).
///
/// Only successful lookups are cached.
pub struct TemplateCache {
    maps: Cache<(String, Direction), Arc<TemplateMap>>,
}

impl TemplateCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            maps: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get_or_fetch(
        &self,
        company: &str,
        direction: Direction,
        resolver: &dyn TaxResolver,
    ) -> Result<Arc<TemplateMap>, ComprobanteError> {
        let key = (company.to_string(), direction);
        if let Some(hit) = self.maps.get(&key) {
            tracing::debug!(company, direction = direction.label(), "template cache hit");
            return Ok(hit);
        }
        tracing::debug!(company, direction = direction.label(), "template cache miss");
        let map = Arc::new(resolver.tax_templates(company, direction).await?);
        self.maps.insert(key, Arc::clone(&map));
        Ok(map)
    }

    pub fn invalidate(&self, company: &str, direction: Direction) {
        self.maps.invalidate(&(company.to_string(), direction));
    }
}
