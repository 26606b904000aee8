use std::sync::Arc;

use super::compensation::AmendGuard;
use super::resolver::{ErpTaxResolver, TaxResolver, TemplateCache};
use super::settings::LifecycleSettings;
use crate::erp::ErpClient;

/// Collaborators shared by every lifecycle operation.
///
/// Cloning is cheap; clones share the client, the template cache and the
/// amend markers.
#[derive(Clone)]
pub struct ErpContext {
    pub client: Arc<dyn ErpClient>,
    pub resolver: Arc<dyn TaxResolver>,
    pub templates: Arc<TemplateCache>,
    pub amend_guard: Arc<AmendGuard>,
    pub settings: LifecycleSettings,
}

impl ErpContext {
    /// Context resolving taxes and company defaults through `client`.
    pub fn new(client: Arc<dyn ErpClient>, settings: LifecycleSettings) -> Self {
        let resolver: Arc<dyn TaxResolver> = Arc::new(ErpTaxResolver::new(Arc::clone(&client)));
        Self {
            templates: Arc::new(TemplateCache::new(
                settings.template_ttl,
                settings.template_capacity,
            )),
            amend_guard: Arc::new(AmendGuard::default()),
            client,
            resolver,
            settings,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn TaxResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}
