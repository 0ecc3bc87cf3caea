use crate::diagnostics::{Diagnostics, RequestTimer};
use crate::error::ProtocolError;
use crate::inventory::ResourceTypeManager;
use crate::protocol::{AttributeLocation, AttributeValue, Driver, LocationResolver, NodeLocation};
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Everything one discovery scan or collection batch needs to talk to an endpoint
///
/// A session owns its driver and is never shared between threads. Dropping
/// it closes the driver, so it is closed on every exit path.
pub struct Session<L: NodeLocation> {
    feed_id: String,
    endpoint_name: String,
    protocol: &'static str,
    driver: Box<dyn Driver<L>>,
    resolver: Arc<dyn LocationResolver<L>>,
    type_manager: Arc<ResourceTypeManager<L>>,
    diagnostics: Arc<Diagnostics>,
    opened_at: Instant,
}

impl<L: NodeLocation> Session<L> {
    pub fn new(
        feed_id: &str,
        endpoint_name: &str,
        protocol: &'static str,
        driver: Box<dyn Driver<L>>,
        resolver: Arc<dyn LocationResolver<L>>,
        type_manager: Arc<ResourceTypeManager<L>>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        debug!("Opening {} session for endpoint [{}]", protocol, endpoint_name);
        Self {
            feed_id: feed_id.to_string(),
            endpoint_name: endpoint_name.to_string(),
            protocol,
            driver,
            resolver,
            type_manager,
            diagnostics,
            opened_at: Instant::now(),
        }
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    pub fn resolver(&self) -> &dyn LocationResolver<L> {
        self.resolver.as_ref()
    }

    pub fn type_manager(&self) -> &ResourceTypeManager<L> {
        &self.type_manager
    }

    pub fn fetch_nodes(&self, query: &L) -> Result<BTreeMap<L, Value>, ProtocolError> {
        RequestTimer::start(&self.diagnostics, self.protocol).finish(self.driver.fetch_nodes(query))
    }

    pub fn attribute_exists(&self, location: &AttributeLocation<L>) -> Result<bool, ProtocolError> {
        RequestTimer::start(&self.diagnostics, self.protocol)
            .finish(self.driver.attribute_exists(location))
    }

    pub fn fetch_attribute(
        &self,
        location: &AttributeLocation<L>,
    ) -> Result<AttributeValue, ProtocolError> {
        RequestTimer::start(&self.diagnostics, self.protocol)
            .finish(self.driver.fetch_attribute(location))
    }
}

impl<L: NodeLocation> Drop for Session<L> {
    fn drop(&mut self) {
        debug!(
            "Closing {} session for endpoint [{}] after {:?}",
            self.protocol,
            self.endpoint_name,
            self.opened_at.elapsed()
        );
    }
}
