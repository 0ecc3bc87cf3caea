use crate::error::ProtocolError;
use crate::protocol::{LocationResolver, NodeLocation};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

const WILDCARD: &str = "*";

/// A path address in a WildFly management model, e.g. `/subsystem=datasources/data-source=*`
///
/// The empty address `/` is the root of the model. Only values may be
/// wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DmrNodeLocation {
    segments: Vec<(String, String)>,
}

impl DmrNodeLocation {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[(String, String)] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// The address in the JSON form the HTTP management API expects
    pub fn to_json_address(&self) -> Value {
        Value::Array(
            self.segments
                .iter()
                .map(|(key, value)| {
                    let mut element = Map::new();
                    element.insert(key.clone(), Value::String(value.clone()));
                    Value::Object(element)
                })
                .collect(),
        )
    }

    /// Parse an address as returned by the HTTP management API
    pub fn from_json_address(address: &Value) -> Result<Self, ProtocolError> {
        let elements = address
            .as_array()
            .ok_or_else(|| ProtocolError::InvalidLocation(format!("not an address: {address}")))?;

        let mut segments = Vec::with_capacity(elements.len());
        for element in elements {
            let (key, value) = element
                .as_object()
                .and_then(|object| object.iter().next())
                .ok_or_else(|| {
                    ProtocolError::InvalidLocation(format!("bad address element: {element}"))
                })?;
            let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            segments.push((key.clone(), value));
        }
        Ok(Self { segments })
    }
}

impl NodeLocation for DmrNodeLocation {}

fn escape(part: &str) -> String {
    part.replace('\\', "\\\\").replace('/', "\\/").replace('=', "\\=")
}

impl fmt::Display for DmrNodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for (key, value) in &self.segments {
            write!(f, "/{}={}", escape(key), escape(value))?;
        }
        Ok(())
    }
}

impl FromStr for DmrNodeLocation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "/" {
            return Ok(Self::root());
        }

        // split on unescaped separators
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => {
                        current.push('\\');
                        current.push(escaped);
                    }
                    None => {
                        return Err(ProtocolError::InvalidLocation(format!(
                            "dangling escape in [{s}]"
                        )))
                    }
                },
                '/' => parts.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        parts.push(current);

        let mut segments = Vec::new();
        for part in parts.into_iter().filter(|p| !p.is_empty()) {
            let (key, value) = split_unescaped_equals(&part)
                .ok_or_else(|| ProtocolError::InvalidLocation(format!("[{part}] in [{s}] is not key=value")))?;
            if key.is_empty() || value.is_empty() {
                return Err(ProtocolError::InvalidLocation(format!(
                    "empty key or value in [{s}]"
                )));
            }
            segments.push((key, value));
        }
        Ok(Self { segments })
    }
}

fn split_unescaped_equals(part: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => key.push(chars.next()?),
            '=' => {
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    if c == '\\' {
                        value.push(chars.next()?);
                    } else {
                        value.push(c);
                    }
                }
                return Some((key, value));
            }
            other => key.push(other),
        }
    }
    None
}

fn element_matches(pattern: &(String, String), element: &(String, String)) -> bool {
    pattern.0 == element.0 && (pattern.1 == WILDCARD || pattern.1 == element.1)
}

/// Location rules for WildFly path addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct DmrLocationResolver;

impl LocationResolver<DmrNodeLocation> for DmrLocationResolver {
    fn is_multi_target(&self, location: &DmrNodeLocation) -> bool {
        location.segments.iter().any(|(_, value)| value == WILDCARD)
    }

    fn find_wildcard_match(
        &self,
        multi_target: &DmrNodeLocation,
        single: &DmrNodeLocation,
    ) -> Result<String, ProtocolError> {
        let mismatch = || ProtocolError::LocationMismatch {
            multi_target: multi_target.to_string(),
            single: single.to_string(),
        };

        if !self.matches(multi_target, single) {
            return Err(mismatch());
        }

        let (index, (key, _)) = multi_target
            .segments
            .iter()
            .enumerate()
            .find(|(_, (_, value))| value == WILDCARD)
            .ok_or_else(mismatch)?;

        match single.segments.get(index) {
            Some((single_key, single_value)) if single_key == key => Ok(single_value.clone()),
            _ => Err(mismatch()),
        }
    }

    fn is_parent(&self, parent: &DmrNodeLocation, child: &DmrNodeLocation) -> bool {
        parent.len() < child.len()
            && parent
                .segments
                .iter()
                .zip(&child.segments)
                .all(|(p, c)| element_matches(p, c))
    }

    fn matches(&self, query: &DmrNodeLocation, candidate: &DmrNodeLocation) -> bool {
        query.len() == candidate.len()
            && query
                .segments
                .iter()
                .zip(&candidate.segments)
                .all(|(q, c)| element_matches(q, c))
    }

    /// Supports `%key%`, positional `%N` over the interleaved key/value list
    /// (1-based), `%-` for the last value and `%ManagedServerName`.
    fn apply_template(&self, template: &str, location: &DmrNodeLocation, endpoint_name: &str) -> String {
        let mut name = template.replace("%_ManagedServerName%", endpoint_name);
        let mut args: Vec<&str> = Vec::with_capacity(location.len() * 2);
        for (key, value) in &location.segments {
            args.push(key);
            args.push(value);
            name = name.replace(&format!("%{key}%"), value);
        }

        let mut out = String::with_capacity(name.len());
        let mut rest = name.as_str();
        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                match digits.parse::<usize>().ok().and_then(|n| n.checked_sub(1)).and_then(|i| args.get(i)) {
                    Some(arg) => out.push_str(arg),
                    None => {
                        out.push('%');
                        out.push_str(&digits);
                    }
                }
                rest = &after[digits.len()..];
            } else if let Some(stripped) = after.strip_prefix('-') {
                out.push_str(args.last().copied().unwrap_or_default());
                rest = stripped;
            } else if let Some(stripped) = after.strip_prefix("ManagedServerName") {
                out.push_str(endpoint_name);
                rest = stripped;
            } else {
                out.push('%');
                rest = after;
            }
        }
        out.push_str(rest);
        out
    }

    fn absolutize(&self, base: &DmrNodeLocation, location: &DmrNodeLocation) -> DmrNodeLocation {
        if base.is_root() {
            location.clone()
        } else if location.is_root() {
            base.clone()
        } else {
            let mut segments = base.segments.clone();
            segments.extend(location.segments.iter().cloned());
            DmrNodeLocation { segments }
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// A concrete DMR address with 0-4 segments
    #[derive(Debug, Clone)]
    struct ArbitraryLocation(DmrNodeLocation);

    impl Arbitrary for ArbitraryLocation {
        fn arbitrary(g: &mut Gen) -> Self {
            let words = ["subsystem", "datasources", "deployment", "app.war", "a/b", "x=y", "pool"];
            let len = usize::arbitrary(g) % 5;
            let segments = (0..len)
                .map(|_| {
                    (
                        g.choose(&words).unwrap().to_string(),
                        g.choose(&words).unwrap().to_string(),
                    )
                })
                .collect();
            ArbitraryLocation(DmrNodeLocation { segments })
        }
    }

    #[quickcheck]
    fn prop_display_parses_back(location: ArbitraryLocation) -> bool {
        location.0.to_string().parse::<DmrNodeLocation>().ok() == Some(location.0)
    }

    #[quickcheck]
    fn prop_absolutized_child_has_parent(base: ArbitraryLocation, relative: ArbitraryLocation) -> bool {
        let resolver = DmrLocationResolver;
        let child = resolver.absolutize(&base.0, &relative.0);
        if base.0.is_root() || relative.0.is_root() {
            return true;
        }
        resolver.is_parent(&base.0, &child)
    }
}
