use crate::error::ProtocolError;
use crate::protocol::dmr::{DmrLocationResolver, DmrNodeLocation};
use crate::protocol::{AttributeLocation, AttributeValue, Driver, DriverFactory, LocationResolver};
use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Failure description prefix WildFly uses for missing resources
const NOT_FOUND_CODE: &str = "WFLYCTL0216";

/// Connection settings for a WildFly HTTP management endpoint
#[derive(Debug, Clone)]
pub struct DmrConnection {
    /// Base URL, e.g. `http://localhost:9990`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

/// Response envelope of the HTTP management API
#[derive(Debug, Deserialize)]
struct OperationResponse {
    outcome: String,
    #[serde(default)]
    result: Value,
    #[serde(rename = "failure-description", default)]
    failure_description: Value,
}

/// One entry of a wildcard operation result
#[derive(Debug, Deserialize)]
struct StepResult {
    address: Value,
    outcome: String,
    #[serde(default)]
    result: Value,
}

/// Builds [`DmrDriver`]s for one endpoint
pub struct DmrDriverFactory {
    connection: DmrConnection,
}

impl DmrDriverFactory {
    /// Create a factory
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidLocation` if the URL is not an http(s) URL.
    pub fn new(connection: DmrConnection) -> Result<Self, ProtocolError> {
        let url = reqwest::Url::parse(&connection.url)
            .map_err(|e| ProtocolError::InvalidLocation(format!("{}: {}", connection.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ProtocolError::InvalidLocation(format!(
                "unsupported scheme in [{}]",
                connection.url
            )));
        }
        Ok(Self { connection })
    }
}

impl DriverFactory<DmrNodeLocation> for DmrDriverFactory {
    fn protocol(&self) -> &'static str {
        "dmr"
    }

    fn create_driver(&self) -> Result<Box<dyn Driver<DmrNodeLocation>>, ProtocolError> {
        let client = Client::builder()
            .timeout(self.connection.timeout)
            .build()
            .map_err(|e| ProtocolError::Connectivity(format!("Failed to create HTTP client: {e}")))?;
        Ok(Box::new(DmrDriver {
            client,
            connection: self.connection.clone(),
        }))
    }
}

/// Talks to the WildFly HTTP management API
pub struct DmrDriver {
    client: Client,
    connection: DmrConnection,
}

impl DmrDriver {
    fn management_url(&self) -> String {
        format!("{}/management", self.connection.url.trim_end_matches('/'))
    }

    /// Execute one operation; `Ok(None)` means the addressed resource does not exist
    fn execute(&self, operation: Value) -> Result<Option<Value>, ProtocolError> {
        debug!("DMR request: {}", operation);
        let mut request = self.client.post(self.management_url()).json(&operation);
        if let Some(username) = &self.connection.username {
            request = request.basic_auth(username, self.connection.password.as_ref());
        }

        let response = request.send()?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProtocolError::Protocol(format!(
                "authentication failed against {}",
                self.connection.url
            )));
        }

        let body: OperationResponse = response.json().map_err(|e| {
            ProtocolError::Protocol(format!("invalid management response (HTTP {status}): {e}"))
        })?;

        if body.outcome == "success" {
            return Ok(Some(body.result));
        }

        let description = match &body.failure_description {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if description.contains(NOT_FOUND_CODE) {
            Ok(None)
        } else {
            Err(ProtocolError::Protocol(description))
        }
    }

    /// Split a wildcard operation result into per-address values
    fn step_results(result: Value) -> Result<Vec<(DmrNodeLocation, Value)>, ProtocolError> {
        let steps: Vec<StepResult> = serde_json::from_value(result)
            .map_err(|e| ProtocolError::Protocol(format!("unexpected wildcard result: {e}")))?;
        steps
            .into_iter()
            .filter(|step| step.outcome == "success")
            .map(|step| Ok((DmrNodeLocation::from_json_address(&step.address)?, step.result)))
            .collect()
    }

    fn extract(value: Value, sub_reference: Option<&str>) -> Value {
        match sub_reference {
            Some(sub) => value.get(sub).cloned().unwrap_or(Value::Null),
            None => value,
        }
    }
}

impl Driver<DmrNodeLocation> for DmrDriver {
    fn fetch_nodes(&self, query: &DmrNodeLocation) -> Result<BTreeMap<DmrNodeLocation, Value>, ProtocolError> {
        let operation = json!({
            "operation": "read-resource",
            "address": query.to_json_address(),
            "include-runtime": true,
        });

        let Some(result) = self.execute(operation)? else {
            return Ok(BTreeMap::new());
        };

        if DmrLocationResolver.is_multi_target(query) {
            Ok(Self::step_results(result)?.into_iter().collect())
        } else {
            Ok(BTreeMap::from([(query.clone(), result)]))
        }
    }

    fn attribute_exists(&self, location: &AttributeLocation<DmrNodeLocation>) -> Result<bool, ProtocolError> {
        let operation = json!({
            "operation": "read-resource-description",
            "address": location.location.to_json_address(),
        });

        let description = match self.execute(operation)? {
            None => return Ok(false),
            Some(result) if DmrLocationResolver.is_multi_target(&location.location) => {
                match Self::step_results(result)?.into_iter().next() {
                    Some((_, description)) => description,
                    None => return Ok(false),
                }
            }
            Some(result) => result,
        };

        Ok(description
            .get("attributes")
            .and_then(|attributes| attributes.get(&location.attribute))
            .is_some())
    }

    fn fetch_attribute(
        &self,
        location: &AttributeLocation<DmrNodeLocation>,
    ) -> Result<AttributeValue, ProtocolError> {
        let operation = json!({
            "operation": "read-attribute",
            "address": location.location.to_json_address(),
            "name": location.attribute,
            "include-defaults": true,
        });

        let result = self.execute(operation)?.ok_or_else(|| {
            ProtocolError::Protocol(format!("resource [{}] not found", location.location))
        })?;
        let sub = location.sub_reference.as_deref();

        if DmrLocationResolver.is_multi_target(&location.location) {
            let values = Self::step_results(result)?
                .into_iter()
                .map(|(_, value)| Self::extract(value, sub))
                .collect();
            Ok(AttributeValue::Multiple(values))
        } else {
            Ok(AttributeValue::Single(Self::extract(result, sub)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(url: &str) -> DmrConnection {
        DmrConnection {
            url: url.to_string(),
            username: None,
            password: None,
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_factory_rejects_bad_urls() {
        assert!(DmrDriverFactory::new(connection("not a url")).is_err());
        assert!(DmrDriverFactory::new(connection("ftp://host:9990")).is_err());
        assert!(DmrDriverFactory::new(connection("http://localhost:9990")).is_ok());
    }

    #[test]
    fn test_step_results_parse_addresses() {
        let result = json!([
            {
                "address": [{"subsystem": "datasources"}, {"data-source": "ExampleDS"}],
                "outcome": "success",
                "result": {"enabled": true}
            },
            {
                "address": [{"subsystem": "datasources"}, {"data-source": "Broken"}],
                "outcome": "failed"
            }
        ]);

        let steps = DmrDriver::step_results(result).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].0.to_string(), "/subsystem=datasources/data-source=ExampleDS");
        assert_eq!(steps[0].1["enabled"], true);
    }

    #[test]
    fn test_extract_sub_reference() {
        let value = json!({"used": 42, "max": 100});
        assert_eq!(DmrDriver::extract(value.clone(), Some("used")), json!(42));
        assert_eq!(DmrDriver::extract(value.clone(), Some("missing")), Value::Null);
        assert_eq!(DmrDriver::extract(value.clone(), None), value);
    }

    #[test]
    fn test_unreachable_endpoint_is_connectivity_error() {
        // nothing listens on port 1
        let factory = DmrDriverFactory::new(connection("http://127.0.0.1:1")).unwrap();
        let driver = factory.create_driver().unwrap();

        let error = driver.fetch_nodes(&DmrNodeLocation::root()).unwrap_err();
        assert!(error.is_connectivity(), "unexpected error: {error}");
    }
}
