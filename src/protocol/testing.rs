//! In-memory driver for exercising discovery and collection without a server

use crate::error::ProtocolError;
use crate::protocol::dmr::{DmrLocationResolver, DmrNodeLocation};
use crate::protocol::{
    AttributeLocation, AttributeValue, Driver, DriverFactory, LocationResolver,
    MeasurementConsumer, NodeLocation,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

struct State<L> {
    nodes: BTreeSet<L>,
    attributes: HashMap<(L, String), Value>,
    failing_queries: BTreeSet<L>,
    unreachable: bool,
}

/// A fake endpoint whose model can be changed while sessions use it
///
/// Clones share state, so a test can keep one handle and mutate the model
/// after handing another to an endpoint service.
#[derive(Clone)]
pub struct InMemoryDriver<L: NodeLocation> {
    state: Arc<Mutex<State<L>>>,
    resolver: Arc<dyn LocationResolver<L>>,
}

impl InMemoryDriver<DmrNodeLocation> {
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(DmrLocationResolver))
    }
}

impl<L: NodeLocation> InMemoryDriver<L> {
    pub fn with_resolver(resolver: Arc<dyn LocationResolver<L>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                nodes: BTreeSet::new(),
                attributes: HashMap::new(),
                failing_queries: BTreeSet::new(),
                unreachable: false,
            })),
            resolver,
        }
    }

    fn state(&self) -> MutexGuard<'_, State<L>> {
        self.state.lock().unwrap()
    }

    pub fn with_node(self, location: L) -> Self {
        self.add_node(location);
        self
    }

    pub fn with_attribute(self, location: L, name: &str, value: Value) -> Self {
        self.set_attribute(location, name, value);
        self
    }

    /// Make `fetch_nodes` fail for exactly this query
    pub fn failing_query(self, query: L) -> Self {
        self.fail_query(query);
        self
    }

    pub fn add_node(&self, location: L) {
        self.state().nodes.insert(location);
    }

    pub fn fail_query(&self, query: L) {
        self.state().failing_queries.insert(query);
    }

    pub fn set_attribute(&self, location: L, name: &str, value: Value) {
        self.state().attributes.insert((location, name.to_string()), value);
    }

    pub fn remove_node(&self, location: &L) {
        let mut state = self.state();
        state.nodes.remove(location);
        state.attributes.retain(|(node, _), _| node != location);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    fn check_reachable(state: &State<L>) -> Result<(), ProtocolError> {
        if state.unreachable {
            Err(ProtocolError::Connectivity("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn values(&self, state: &State<L>, location: &AttributeLocation<L>) -> Vec<Value> {
        state
            .attributes
            .iter()
            .filter(|((node, name), _)| {
                name == &location.attribute && self.resolver.matches(&location.location, node)
            })
            .map(|(_, value)| match &location.sub_reference {
                Some(sub) => value.get(sub).cloned().unwrap_or(Value::Null),
                None => value.clone(),
            })
            .collect()
    }
}

impl<L: NodeLocation> Driver<L> for InMemoryDriver<L> {
    fn fetch_nodes(&self, query: &L) -> Result<BTreeMap<L, Value>, ProtocolError> {
        let state = self.state();
        Self::check_reachable(&state)?;
        if state.failing_queries.contains(query) {
            return Err(ProtocolError::Protocol(format!("query [{query}] failed")));
        }
        Ok(state
            .nodes
            .iter()
            .filter(|node| self.resolver.matches(query, node))
            .map(|node| (node.clone(), Value::Null))
            .collect())
    }

    fn attribute_exists(&self, location: &AttributeLocation<L>) -> Result<bool, ProtocolError> {
        let state = self.state();
        Self::check_reachable(&state)?;
        Ok(!self.values(&state, location).is_empty())
    }

    fn fetch_attribute(&self, location: &AttributeLocation<L>) -> Result<AttributeValue, ProtocolError> {
        let state = self.state();
        Self::check_reachable(&state)?;
        let mut values = self.values(&state, location);
        if self.resolver.is_multi_target(&location.location) {
            return Ok(AttributeValue::Multiple(values));
        }
        values
            .pop()
            .map(AttributeValue::Single)
            .ok_or_else(|| ProtocolError::Protocol(format!("attribute [{location}] not found")))
    }
}

impl<L: NodeLocation> DriverFactory<L> for InMemoryDriver<L> {
    fn protocol(&self) -> &'static str {
        "memory"
    }

    fn create_driver(&self) -> Result<Box<dyn Driver<L>>, ProtocolError> {
        Ok(Box::new(self.clone()))
    }
}

/// Keeps every data point it is handed
pub struct CollectingConsumer<P> {
    points: Mutex<Vec<P>>,
}

impl<P> Default for CollectingConsumer<P> {
    fn default() -> Self {
        Self {
            points: Mutex::new(Vec::new()),
        }
    }
}

impl<P: Clone> CollectingConsumer<P> {
    pub fn points(&self) -> Vec<P> {
        self.points.lock().unwrap().clone()
    }
}

impl<P: Send> MeasurementConsumer<P> for CollectingConsumer<P> {
    fn accept(&self, point: P) {
        self.points.lock().unwrap().push(point);
    }
}
