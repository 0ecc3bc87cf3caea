//! Stable identifiers for resources and measurement instances

use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = '~';

/// An opaque, stable identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Id(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id(s.to_string())
    }
}

/// The parts a resource id is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdParts {
    pub feed_id: String,
    pub endpoint_name: String,
    pub location: String,
}

/// Build the id of a resource discovered at `location` on the given endpoint
///
/// The id only depends on its inputs, so rediscovering the same node always
/// yields the same id.
pub fn resource_id(feed_id: &str, endpoint_name: &str, location: &impl fmt::Display) -> Id {
    Id(format!(
        "{feed_id}{SEPARATOR}{endpoint_name}{SEPARATOR}{location}"
    ))
}

/// Split a resource id back into feed, endpoint and location
///
/// # Returns
///
/// `None` if the id was not built by [`resource_id`]
pub fn parse_resource_id(id: &Id) -> Option<ResourceIdParts> {
    let mut parts = id.as_str().splitn(3, SEPARATOR);
    let feed_id = parts.next()?;
    let endpoint_name = parts.next()?;
    let location = parts.next()?;
    if feed_id.is_empty() || endpoint_name.is_empty() {
        return None;
    }
    Some(ResourceIdParts {
        feed_id: feed_id.to_string(),
        endpoint_name: endpoint_name.to_string(),
        location: location.to_string(),
    })
}

/// Id of a metric instance owned by `resource_id`
pub fn metric_instance_id(resource_id: &Id, metric_type_name: &str) -> Id {
    Id(format!("MI~R~[{resource_id}]~MT~{metric_type_name}"))
}

/// Id of an availability instance owned by `resource_id`
pub fn avail_instance_id(resource_id: &Id, avail_type_name: &str) -> Id {
    Id(format!("AI~R~[{resource_id}]~AT~{avail_type_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_format() {
        let id = resource_id("feed1", "local", &"/subsystem=datasources");
        assert_eq!(id.as_str(), "feed1~local~/subsystem=datasources");
    }

    #[test]
    fn test_parse_resource_id_keeps_separator_in_location() {
        let id = Id::new("feed1~local~/a=b~c");
        let parts = parse_resource_id(&id).unwrap();
        assert_eq!(parts.feed_id, "feed1");
        assert_eq!(parts.endpoint_name, "local");
        assert_eq!(parts.location, "/a=b~c");
    }

    #[test]
    fn test_parse_resource_id_rejects_foreign_ids() {
        assert!(parse_resource_id(&Id::new("no-separators")).is_none());
        assert!(parse_resource_id(&Id::new("~ep~/")).is_none());
    }

    #[test]
    fn test_instance_ids() {
        let rid = resource_id("f", "e", &"/");
        assert_eq!(
            metric_instance_id(&rid, "Heap Used").as_str(),
            "MI~R~[f~e~/]~MT~Heap Used"
        );
        assert_eq!(
            avail_instance_id(&rid, "Server Availability").as_str(),
            "AI~R~[f~e~/]~AT~Server Availability"
        );
    }
}
