use crate::error::ProtocolError;
use crate::protocol::jmx::JmxNodeLocation;
use crate::protocol::{AttributeLocation, AttributeValue, Driver, DriverFactory};
use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const INSTANCE_NOT_FOUND: &str = "javax.management.InstanceNotFoundException";
const ATTRIBUTE_NOT_FOUND: &str = "javax.management.AttributeNotFoundException";

/// Connection settings for a Jolokia agent
#[derive(Debug, Clone)]
pub struct JolokiaConnection {
    /// Agent URL, e.g. `http://localhost:8778/jolokia`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct JolokiaResponse {
    status: u16,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Builds [`JolokiaDriver`]s for one endpoint
pub struct JolokiaDriverFactory {
    connection: JolokiaConnection,
}

impl JolokiaDriverFactory {
    /// Create a factory
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidLocation` if the URL cannot be parsed.
    pub fn new(connection: JolokiaConnection) -> Result<Self, ProtocolError> {
        reqwest::Url::parse(&connection.url)
            .map_err(|e| ProtocolError::InvalidLocation(format!("{}: {}", connection.url, e)))?;
        Ok(Self { connection })
    }
}

impl DriverFactory<JmxNodeLocation> for JolokiaDriverFactory {
    fn protocol(&self) -> &'static str {
        "jmx"
    }

    fn create_driver(&self) -> Result<Box<dyn Driver<JmxNodeLocation>>, ProtocolError> {
        let client = Client::builder()
            .timeout(self.connection.timeout)
            .build()
            .map_err(|e| ProtocolError::Connectivity(format!("Failed to create HTTP client: {e}")))?;
        Ok(Box::new(JolokiaDriver {
            client,
            connection: self.connection.clone(),
        }))
    }
}

/// Reads MBeans through a Jolokia HTTP agent
pub struct JolokiaDriver {
    client: Client,
    connection: JolokiaConnection,
}

impl JolokiaDriver {
    /// Send one request; `Ok(None)` means the MBean or attribute does not exist
    fn execute(&self, request: Value) -> Result<Option<Value>, ProtocolError> {
        debug!("Jolokia request: {}", request);
        let mut http = self.client.post(&self.connection.url).json(&request);
        if let Some(username) = &self.connection.username {
            http = http.basic_auth(username, self.connection.password.as_ref());
        }

        let response = http.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Protocol(format!(
                "Jolokia agent at {} returned HTTP {}",
                self.connection.url, status
            )));
        }

        let body: JolokiaResponse = response
            .json()
            .map_err(|e| ProtocolError::Protocol(format!("invalid Jolokia response: {e}")))?;
        Self::interpret(body)
    }

    fn interpret(body: JolokiaResponse) -> Result<Option<Value>, ProtocolError> {
        if body.status == 200 {
            return Ok(Some(body.value));
        }
        match body.error_type.as_deref() {
            Some(INSTANCE_NOT_FOUND) | Some(ATTRIBUTE_NOT_FOUND) => Ok(None),
            _ => Err(ProtocolError::Protocol(
                body.error
                    .unwrap_or_else(|| format!("Jolokia status {}", body.status)),
            )),
        }
    }

    fn read_request(location: &AttributeLocation<JmxNodeLocation>, with_path: bool) -> Value {
        let mut request = json!({
            "type": "read",
            "mbean": location.location.to_string(),
            "attribute": location.attribute,
        });
        if with_path {
            if let Some(sub) = &location.sub_reference {
                request["path"] = Value::String(sub.clone());
            }
        }
        request
    }

    fn extract(value: Value, sub_reference: Option<&str>) -> Value {
        match sub_reference {
            Some(sub) => value.get(sub).cloned().unwrap_or(Value::Null),
            None => value,
        }
    }
}

impl Driver<JmxNodeLocation> for JolokiaDriver {
    fn fetch_nodes(&self, query: &JmxNodeLocation) -> Result<BTreeMap<JmxNodeLocation, Value>, ProtocolError> {
        let request = json!({ "type": "search", "mbean": query.to_string() });
        let Some(value) = self.execute(request)? else {
            return Ok(BTreeMap::new());
        };

        let names = value
            .as_array()
            .ok_or_else(|| ProtocolError::Protocol(format!("unexpected search result: {value}")))?;

        let mut nodes = BTreeMap::new();
        for name in names.iter().filter_map(Value::as_str) {
            match name.parse::<JmxNodeLocation>() {
                Ok(location) => {
                    nodes.insert(location, Value::Null);
                }
                Err(e) => debug!("Ignoring unparsable MBean name [{}]: {}", name, e),
            }
        }
        Ok(nodes)
    }

    fn attribute_exists(&self, location: &AttributeLocation<JmxNodeLocation>) -> Result<bool, ProtocolError> {
        let request = Self::read_request(location, false);
        Ok(self.execute(request)?.is_some())
    }

    fn fetch_attribute(
        &self,
        location: &AttributeLocation<JmxNodeLocation>,
    ) -> Result<AttributeValue, ProtocolError> {
        let multi_target = location.location.is_pattern();
        // Jolokia cannot apply a path across a pattern read, so extract locally
        let request = Self::read_request(location, !multi_target);
        let value = self.execute(request)?.ok_or_else(|| {
            ProtocolError::Protocol(format!("attribute [{location}] not found"))
        })?;

        if !multi_target {
            return Ok(AttributeValue::Single(value));
        }

        // pattern reads answer {"<mbean>": {"<attribute>": value}}
        let per_mbean = value
            .as_object()
            .ok_or_else(|| ProtocolError::Protocol(format!("unexpected pattern read result: {value}")))?;
        let sub = location.sub_reference.as_deref();
        let values = per_mbean
            .values()
            .map(|attributes| {
                let attribute = attributes
                    .get(&location.attribute)
                    .cloned()
                    .unwrap_or(Value::Null);
                Self::extract(attribute, sub)
            })
            .collect();
        Ok(AttributeValue::Multiple(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: Value) -> JolokiaResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_interpret_success() {
        let body = response(json!({"status": 200, "value": 42}));
        assert_eq!(JolokiaDriver::interpret(body).unwrap(), Some(json!(42)));
    }

    #[test]
    fn test_interpret_not_found_is_none() {
        let body = response(json!({
            "status": 404,
            "error_type": "javax.management.InstanceNotFoundException",
            "error": "javax.management.InstanceNotFoundException : java.lang:type=Nope"
        }));
        assert_eq!(JolokiaDriver::interpret(body).unwrap(), None);
    }

    #[test]
    fn test_interpret_other_errors() {
        let body = response(json!({
            "status": 500,
            "error_type": "java.lang.IllegalStateException",
            "error": "boom"
        }));
        assert_eq!(
            JolokiaDriver::interpret(body).unwrap_err(),
            ProtocolError::Protocol("boom".to_string())
        );
    }

    #[test]
    fn test_read_request_path() {
        let location = AttributeLocation::new(
            "java.lang:type=Memory".parse::<JmxNodeLocation>().unwrap(),
            "HeapMemoryUsage#used",
        );

        let request = JolokiaDriver::read_request(&location, true);
        assert_eq!(request["mbean"], "java.lang:type=Memory");
        assert_eq!(request["attribute"], "HeapMemoryUsage");
        assert_eq!(request["path"], "used");

        let without_path = JolokiaDriver::read_request(&location, false);
        assert!(without_path.get("path").is_none());
    }
}
