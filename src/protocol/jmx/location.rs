use crate::error::ProtocolError;
use crate::protocol::{LocationResolver, NodeLocation};
use globset::Glob;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A JMX object name or object name pattern, e.g. `java.lang:type=GarbageCollector,name=*`
///
/// Key properties are kept in canonical (sorted) order. A trailing `,*`
/// makes the name a property-list pattern that also matches names with
/// additional keys. The empty name stands for "the owning resource's name"
/// when used as a measurement location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct JmxNodeLocation {
    domain: String,
    properties: BTreeMap<String, String>,
    property_list_pattern: bool,
}

impl JmxNodeLocation {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn key_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn key_properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.domain.is_empty() && self.properties.is_empty() && !self.property_list_pattern
    }

    pub fn is_pattern(&self) -> bool {
        self.property_list_pattern
            || is_wildcard(&self.domain)
            || self.properties.values().any(|v| is_wildcard(v))
    }
}

fn is_wildcard(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

impl NodeLocation for JmxNodeLocation {}

impl fmt::Display for JmxNodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        write!(f, "{}:", self.domain)?;
        let mut first = true;
        for (key, value) in &self.properties {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        if self.property_list_pattern {
            if !first {
                f.write_str(",")?;
            }
            f.write_str("*")?;
        }
        Ok(())
    }
}

impl FromStr for JmxNodeLocation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }

        let (domain, key_list) = s
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidLocation(format!("[{s}] has no domain separator")))?;

        let mut location = JmxNodeLocation {
            domain: domain.to_string(),
            ..Default::default()
        };

        for part in key_list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part == "*" {
                location.property_list_pattern = true;
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                ProtocolError::InvalidLocation(format!("[{part}] in [{s}] is not key=value"))
            })?;
            if key.is_empty() || value.is_empty() {
                return Err(ProtocolError::InvalidLocation(format!(
                    "empty key or value in [{s}]"
                )));
            }
            if location
                .properties
                .insert(key.to_string(), value.to_string())
                .is_some()
            {
                return Err(ProtocolError::InvalidLocation(format!(
                    "duplicate key [{key}] in [{s}]"
                )));
            }
        }

        if location.properties.is_empty() && !location.property_list_pattern {
            return Err(ProtocolError::InvalidLocation(format!(
                "[{s}] has no key properties"
            )));
        }
        Ok(location)
    }
}

/// Match a domain or key property value against an object name pattern
///
/// Values that do not compile as a glob only match themselves.
fn pattern_matches(pattern: &str, value: &str) -> bool {
    if !is_wildcard(pattern) {
        return pattern == value;
    }
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(value),
        Err(_) => pattern == value,
    }
}

/// Location rules for JMX object names
#[derive(Debug, Clone, Copy, Default)]
pub struct JmxLocationResolver;

impl JmxLocationResolver {
    fn properties_match(query: &JmxNodeLocation, candidate: &JmxNodeLocation) -> bool {
        query.properties.iter().all(|(key, pattern)| {
            candidate
                .properties
                .get(key)
                .is_some_and(|value| pattern_matches(pattern, value))
        })
    }
}

impl LocationResolver<JmxNodeLocation> for JmxLocationResolver {
    fn is_multi_target(&self, location: &JmxNodeLocation) -> bool {
        location.is_pattern()
    }

    fn find_wildcard_match(
        &self,
        multi_target: &JmxNodeLocation,
        single: &JmxNodeLocation,
    ) -> Result<String, ProtocolError> {
        let mismatch = || ProtocolError::LocationMismatch {
            multi_target: multi_target.to_string(),
            single: single.to_string(),
        };

        if !self.matches(multi_target, single) {
            return Err(mismatch());
        }

        let (key, _) = multi_target
            .properties
            .iter()
            .find(|(_, value)| is_wildcard(value))
            .ok_or_else(mismatch)?;

        single.key_property(key).map(str::to_string).ok_or_else(mismatch)
    }

    fn is_parent(&self, parent: &JmxNodeLocation, child: &JmxNodeLocation) -> bool {
        parent.properties.len() < child.properties.len()
            && pattern_matches(&parent.domain, &child.domain)
            && Self::properties_match(parent, child)
    }

    fn matches(&self, query: &JmxNodeLocation, candidate: &JmxNodeLocation) -> bool {
        if !pattern_matches(&query.domain, &candidate.domain) {
            return false;
        }
        if !query.property_list_pattern && query.properties.len() != candidate.properties.len() {
            return false;
        }
        Self::properties_match(query, candidate)
    }

    fn apply_template(&self, template: &str, location: &JmxNodeLocation, endpoint_name: &str) -> String {
        let mut name = template.replace("%_ManagedServerName%", endpoint_name);
        for (key, value) in &location.properties {
            if !name.contains('%') {
                break;
            }
            name = name.replace(&format!("%{key}%"), value);
        }
        name
    }

    /// Object names are absolute; only the empty name resolves to `base`
    fn absolutize(&self, base: &JmxNodeLocation, location: &JmxNodeLocation) -> JmxNodeLocation {
        if location.is_empty() {
            base.clone()
        } else {
            location.clone()
        }
    }
}
