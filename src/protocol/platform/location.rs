use crate::error::ProtocolError;
use crate::protocol::{LocationResolver, NodeLocation};
use std::fmt;
use std::str::FromStr;

/// Matches any name in a platform path segment
pub const ANY_NAME: &str = "*";

/// A path in the host platform tree, e.g. `[Operating System=myhost][File Store=/home]`
///
/// Each segment is a (type, name) pair. The empty path is relative and
/// resolves to its base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PlatformNodeLocation {
    segments: Vec<(String, String)>,
}

impl PlatformNodeLocation {
    pub fn new(segments: Vec<(String, String)>) -> Self {
        Self { segments }
    }

    pub fn segment(resource_type: &str, name: &str) -> Self {
        Self::new(vec![(resource_type.to_string(), name.to_string())])
    }

    /// Extend this path with one more segment
    pub fn child(&self, resource_type: &str, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push((resource_type.to_string(), name.to_string()));
        Self { segments }
    }

    pub fn segments(&self) -> &[(String, String)] {
        &self.segments
    }

    pub fn last_segment(&self) -> Option<&(String, String)> {
        self.segments.last()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl NodeLocation for PlatformNodeLocation {}

impl fmt::Display for PlatformNodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (resource_type, name) in &self.segments {
            write!(f, "[{resource_type}={name}]")?;
        }
        Ok(())
    }
}

impl FromStr for PlatformNodeLocation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| ProtocolError::InvalidLocation(format!("[{s}] is not a platform path")))?;

        let segments = inner
            .split("][")
            .map(|segment| {
                segment
                    .split_once('=')
                    .filter(|(t, n)| !t.is_empty() && !n.is_empty())
                    .map(|(t, n)| (t.to_string(), n.to_string()))
                    .ok_or_else(|| {
                        ProtocolError::InvalidLocation(format!("bad segment [{segment}] in [{s}]"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }
}

fn segment_matches(pattern: &(String, String), segment: &(String, String)) -> bool {
    pattern.0 == segment.0 && (pattern.1 == ANY_NAME || pattern.1 == segment.1)
}

/// Location rules for the host platform tree
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformLocationResolver;

impl LocationResolver<PlatformNodeLocation> for PlatformLocationResolver {
    fn is_multi_target(&self, location: &PlatformNodeLocation) -> bool {
        location.segments.iter().any(|(_, name)| name == ANY_NAME)
    }

    fn find_wildcard_match(
        &self,
        multi_target: &PlatformNodeLocation,
        single: &PlatformNodeLocation,
    ) -> Result<String, ProtocolError> {
        let mismatch = || ProtocolError::LocationMismatch {
            multi_target: multi_target.to_string(),
            single: single.to_string(),
        };

        let (index, (resource_type, _)) = multi_target
            .segments
            .iter()
            .enumerate()
            .find(|(_, (_, name))| name == ANY_NAME)
            .ok_or_else(mismatch)?;

        match single.segments.get(index) {
            Some((single_type, name)) if single_type == resource_type => Ok(name.clone()),
            _ => Err(mismatch()),
        }
    }

    fn is_parent(&self, parent: &PlatformNodeLocation, child: &PlatformNodeLocation) -> bool {
        parent.segments.len() < child.segments.len()
            && parent
                .segments
                .iter()
                .zip(&child.segments)
                .all(|(p, c)| segment_matches(p, c))
    }

    fn matches(&self, query: &PlatformNodeLocation, candidate: &PlatformNodeLocation) -> bool {
        query.segments.len() == candidate.segments.len()
            && query
                .segments
                .iter()
                .zip(&candidate.segments)
                .all(|(q, c)| segment_matches(q, c))
    }

    /// Supports `%<type>%` for any segment name, `%s` for the last segment's
    /// name and `%_ManagedServerName%`.
    fn apply_template(&self, template: &str, location: &PlatformNodeLocation, endpoint_name: &str) -> String {
        let mut name = template.replace("%_ManagedServerName%", endpoint_name);
        for (resource_type, segment_name) in &location.segments {
            name = name.replace(&format!("%{resource_type}%"), segment_name);
        }
        match location.last_segment() {
            Some((_, last)) => name.replace("%s", last),
            None => name,
        }
    }

    fn absolutize(&self, base: &PlatformNodeLocation, location: &PlatformNodeLocation) -> PlatformNodeLocation {
        if base.is_empty() {
            location.clone()
        } else if location.is_empty() {
            base.clone()
        } else {
            let mut segments = base.segments.clone();
            segments.extend(location.segments.iter().cloned());
            PlatformNodeLocation { segments }
        }
    }
}
