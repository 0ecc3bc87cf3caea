use crate::inventory::{Id, Resource};
use crate::protocol::{LocationResolver, NodeLocation};
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::sync::Arc;

/// Receives resource graph changes synchronously, while the graph is being modified
pub trait ResourceObserver<L: NodeLocation>: Send + Sync {
    fn resource_added(&self, resource: &Arc<Resource<L>>);
    fn resource_modified(&self, resource: &Arc<Resource<L>>);
    fn resource_removed(&self, resource: &Arc<Resource<L>>);
}

/// Outcome of [`ResourceManager::add_resource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    Added,
    Modified,
    Unchanged,
}

#[derive(Debug)]
struct Node<L: NodeLocation> {
    resource: Arc<Resource<L>>,
    children: BTreeSet<Id>,
}

/// The resource graph of one endpoint
///
/// Stored as an adjacency map keyed by resource id. Parent links are ids, so
/// replacing a resource never leaves children pointing at a stale copy.
pub struct ResourceManager<L: NodeLocation> {
    endpoint_name: String,
    nodes: HashMap<Id, Node<L>>,
    roots: BTreeSet<Id>,
    observers: Vec<Arc<dyn ResourceObserver<L>>>,
}

impl<L: NodeLocation> ResourceManager<L> {
    pub fn new(endpoint_name: &str) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            nodes: HashMap::new(),
            roots: BTreeSet::new(),
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ResourceObserver<L>>) {
        self.observers.push(observer);
    }

    /// Add a resource or replace the one with the same id
    ///
    /// A resource whose parent is not in the graph is attached as a root.
    /// Observers hear about added and modified resources, never about
    /// unchanged ones.
    pub fn add_resource(&mut self, resource: Resource<L>) -> AddResult {
        let id = resource.id.clone();

        if let Some(existing) = self.nodes.get(&id) {
            if existing.resource.same_as(&resource) {
                return AddResult::Unchanged;
            }
        }

        let resource = Arc::new(resource);
        let previous = self.nodes.remove(&id);
        let children = match &previous {
            Some(node) => {
                self.detach(&node.resource);
                node.children.clone()
            }
            None => BTreeSet::new(),
        };

        self.attach(&resource);
        self.nodes.insert(
            id,
            Node {
                resource: Arc::clone(&resource),
                children,
            },
        );

        if previous.is_some() {
            for observer in &self.observers {
                observer.resource_modified(&resource);
            }
            AddResult::Modified
        } else {
            for observer in &self.observers {
                observer.resource_added(&resource);
            }
            AddResult::Added
        }
    }

    fn attach(&mut self, resource: &Arc<Resource<L>>) {
        match resource
            .parent
            .as_ref()
            .and_then(|parent| self.nodes.get_mut(parent))
        {
            Some(parent) => {
                parent.children.insert(resource.id.clone());
            }
            None => {
                self.roots.insert(resource.id.clone());
            }
        }
    }

    fn detach(&mut self, resource: &Arc<Resource<L>>) {
        self.roots.remove(&resource.id);
        if let Some(parent) = resource.parent.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.remove(&resource.id);
        }
    }

    /// Remove a resource and all of its descendants
    ///
    /// # Returns
    ///
    /// The removed resources, descendants before their ancestors
    pub fn remove_resource(&mut self, id: &Id) -> Vec<Arc<Resource<L>>> {
        let Some(root) = self.nodes.get(id).map(|n| Arc::clone(&n.resource)) else {
            return Vec::new();
        };
        self.detach(&root);

        let subtree = self.subtree_depth_first(id);
        let mut removed = Vec::with_capacity(subtree.len());
        for resource in subtree.into_iter().rev() {
            if let Some(node) = self.nodes.remove(&resource.id) {
                for observer in &self.observers {
                    observer.resource_removed(&node.resource);
                }
                removed.push(node.resource);
            }
        }
        removed
    }

    /// Remove every resource whose location matches `query`, with descendants
    pub fn remove_resources(
        &mut self,
        query: &L,
        resolver: &dyn LocationResolver<L>,
    ) -> Vec<Arc<Resource<L>>> {
        let matching: Vec<Id> = self
            .find_resources(query, resolver)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();

        let mut removed = Vec::new();
        for id in matching {
            removed.extend(self.remove_resource(&id));
        }
        debug!(
            "Removed [{}] resources matching [{}] from endpoint [{}]",
            removed.len(),
            query,
            self.endpoint_name
        );
        removed
    }

    /// Resources whose location matches `query`
    pub fn find_resources(
        &self,
        query: &L,
        resolver: &dyn LocationResolver<L>,
    ) -> Vec<Arc<Resource<L>>> {
        self.resources_depth_first()
            .into_iter()
            .filter(|r| resolver.matches(query, &r.location))
            .collect()
    }

    pub fn get_resource(&self, id: &Id) -> Option<Arc<Resource<L>>> {
        self.nodes.get(id).map(|n| Arc::clone(&n.resource))
    }

    pub fn get_children(&self, id: &Id) -> Vec<Arc<Resource<L>>> {
        self.nodes
            .get(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.get_resource(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn root_resources(&self) -> Vec<Arc<Resource<L>>> {
        self.roots.iter().filter_map(|id| self.get_resource(id)).collect()
    }

    /// All resources, each parent before its children
    pub fn resources_depth_first(&self) -> Vec<Arc<Resource<L>>> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            ordered.extend(self.subtree_depth_first(root));
        }
        ordered
    }

    fn subtree_depth_first(&self, id: &Id) -> Vec<Arc<Resource<L>>> {
        let mut ordered = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                ordered.push(Arc::clone(&node.resource));
                // reversed so children come out in id order
                stack.extend(node.children.iter().rev());
            }
        }
        ordered
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Render the graph as an indented tree
    pub fn tree_graph(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<(&Id, usize)> = self.roots.iter().rev().map(|id| (id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            if let Some(node) = self.nodes.get(id) {
                let _ = writeln!(
                    out,
                    "{}{} [{}] ({})",
                    "...".repeat(depth),
                    node.resource.name,
                    node.resource.resource_type.name,
                    node.resource.location
                );
                stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
            }
        }
        out
    }

    /// Log the graph at debug level
    pub fn log_tree_graph(&self) {
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "Resource tree for endpoint [{}]:\n{}",
                self.endpoint_name,
                self.tree_graph()
            );
        }
    }
}
