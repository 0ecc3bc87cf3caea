use crate::error::ConfigError;
use crate::inventory::types::{ResourceType, TypeSet};
use crate::protocol::NodeLocation;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// The immutable resource type graph of one endpoint
///
/// Built from the type sets an endpoint references. The graph is a DAG: a
/// type may declare several parents. Only types reachable from a root are
/// kept, so a type whose parents are all unknown or disabled is dropped
/// together with its descendants.
#[derive(Debug)]
pub struct ResourceTypeManager<L: NodeLocation> {
    types: BTreeMap<String, Arc<ResourceType<L>>>,
    children: BTreeMap<String, Vec<String>>,
    roots: Vec<String>,
}

impl<L: NodeLocation> ResourceTypeManager<L> {
    /// Build the type graph
    ///
    /// # Arguments
    ///
    /// * `type_sets` - All type sets known for the protocol
    /// * `sets_to_use` - Names of the sets the endpoint references; `None` uses all of them
    /// * `min_interval_millis` - Measurement types collected more often than this are excluded
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateResourceType` if two used sets define the same type name.
    pub fn new(
        type_sets: &[TypeSet<L>],
        sets_to_use: Option<&[String]>,
        min_interval_millis: u64,
    ) -> Result<Self, ConfigError> {
        if let Some(names) = sets_to_use {
            for name in names {
                if !type_sets.iter().any(|set| &set.name == name) {
                    warn!("Type set [{}] is referenced but not defined, ignoring it", name);
                }
            }
        }

        let used_sets = type_sets.iter().filter(|set| {
            sets_to_use.map_or(true, |names| names.iter().any(|n| n == &set.name))
        });

        let mut candidates: BTreeMap<String, ResourceType<L>> = BTreeMap::new();
        let mut disabled: BTreeSet<String> = BTreeSet::new();

        for set in used_sets {
            for resource_type in &set.types {
                if candidates.contains_key(&resource_type.name)
                    || disabled.contains(&resource_type.name)
                {
                    return Err(ConfigError::DuplicateResourceType(
                        resource_type.name.clone(),
                    ));
                }
                if set.enabled {
                    candidates.insert(
                        resource_type.name.clone(),
                        Self::without_short_intervals(resource_type.clone(), min_interval_millis),
                    );
                } else {
                    debug!(
                        "Type [{}] belongs to disabled type set [{}]",
                        resource_type.name, set.name
                    );
                    disabled.insert(resource_type.name.clone());
                }
            }
        }

        // parent -> children edges between known types
        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for resource_type in candidates.values() {
            for parent in &resource_type.parents {
                if candidates.contains_key(parent) {
                    edges
                        .entry(parent.clone())
                        .or_default()
                        .push(resource_type.name.clone());
                } else if !disabled.contains(parent) {
                    debug!(
                        "Type [{}] declares unknown parent type [{}]",
                        resource_type.name, parent
                    );
                }
            }
        }

        let roots: Vec<String> = candidates
            .values()
            .filter(|t| t.is_root())
            .map(|t| t.name.clone())
            .collect();

        let mut reachable: BTreeSet<String> = roots.iter().cloned().collect();
        let mut pending: VecDeque<String> = roots.iter().cloned().collect();
        while let Some(name) = pending.pop_front() {
            for child in edges.get(&name).into_iter().flatten() {
                if reachable.insert(child.clone()) {
                    pending.push_back(child.clone());
                }
            }
        }

        for resource_type in candidates.values() {
            if reachable.contains(&resource_type.name) {
                continue;
            }
            let has_disabled_parent = resource_type.parents.iter().any(|p| disabled.contains(p));
            if has_disabled_parent {
                debug!(
                    "Type [{}] is excluded because its parent types are disabled",
                    resource_type.name
                );
            } else {
                warn!(
                    "Type [{}] is excluded because none of its parent types {:?} can be resolved",
                    resource_type.name, resource_type.parents
                );
            }
        }

        let types: BTreeMap<String, Arc<ResourceType<L>>> = candidates
            .into_iter()
            .filter(|(name, _)| reachable.contains(name))
            .map(|(name, t)| (name, Arc::new(t)))
            .collect();

        let children = edges
            .into_iter()
            .filter(|(parent, _)| types.contains_key(parent))
            .map(|(parent, kids)| {
                let kids = kids.into_iter().filter(|k| types.contains_key(k)).collect();
                (parent, kids)
            })
            .collect();

        for root in &roots {
            if let Some(root_type) = types.get(root) {
                if root_type.enabled_measurement_count() == 0 {
                    info!("Root type [{}] has no enabled measurements", root);
                }
            }
        }

        Ok(Self {
            types,
            children,
            roots,
        })
    }

    fn without_short_intervals(mut resource_type: ResourceType<L>, min_millis: u64) -> ResourceType<L> {
        let type_name = resource_type.name.clone();
        resource_type.metric_types.retain(|m| {
            let keep = m.interval.millis() >= min_millis;
            if !keep {
                warn!(
                    "Metric [{}] of type [{}] has interval {} below the minimum of {}ms, excluding it",
                    m.name, type_name, m.interval, min_millis
                );
            }
            keep
        });
        resource_type.avail_types.retain(|a| {
            let keep = a.interval.millis() >= min_millis;
            if !keep {
                warn!(
                    "Avail [{}] of type [{}] has interval {} below the minimum of {}ms, excluding it",
                    a.name, type_name, a.interval, min_millis
                );
            }
            keep
        });
        resource_type
    }

    pub fn get_type(&self, name: &str) -> Option<&Arc<ResourceType<L>>> {
        self.types.get(name)
    }

    /// Types without parents, in name order
    pub fn root_types(&self) -> Vec<Arc<ResourceType<L>>> {
        self.roots
            .iter()
            .filter_map(|name| self.types.get(name))
            .cloned()
            .collect()
    }

    /// Direct child types of the named type
    pub fn child_types(&self, name: &str) -> Vec<Arc<ResourceType<L>>> {
        self.children
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|child| self.types.get(child))
            .cloned()
            .collect()
    }

    /// All types, parents before children
    pub fn types_breadth_first(&self) -> Vec<Arc<ResourceType<L>>> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::with_capacity(self.types.len());
        let mut pending: VecDeque<Arc<ResourceType<L>>> = self.root_types().into();
        while let Some(resource_type) = pending.pop_front() {
            if !seen.insert(resource_type.name.clone()) {
                continue;
            }
            pending.extend(self.child_types(&resource_type.name));
            ordered.push(resource_type);
        }
        ordered
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
