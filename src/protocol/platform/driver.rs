use crate::error::ProtocolError;
use crate::protocol::platform::{PlatformLocationResolver, PlatformNodeLocation};
use crate::protocol::{AttributeLocation, AttributeValue, Driver, DriverFactory, LocationResolver};
use log::debug;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sysinfo::{CpuExt, DiskExt, System, SystemExt};

pub const OPERATING_SYSTEM: &str = "Operating System";
pub const FILE_STORE: &str = "File Store";
pub const MEMORY: &str = "Memory";
pub const PROCESSOR: &str = "Processor";

pub const MACHINE_ID: &str = "Machine Id";
pub const SYSTEM_CPU_LOAD: &str = "System CPU Load";
pub const SYSTEM_LOAD_AVERAGE: &str = "System Load Average";
pub const PROCESS_COUNT: &str = "Process Count";
pub const USABLE_SPACE: &str = "Usable Space";
pub const TOTAL_SPACE: &str = "Total Space";
pub const AVAILABLE_MEMORY: &str = "Available Memory";
pub const TOTAL_MEMORY: &str = "Total Memory";
pub const CPU_USAGE: &str = "CPU Usage";

type Attributes = BTreeMap<String, Value>;

/// Every platform node with its attribute values at one instant
#[derive(Debug, Clone, Default)]
pub struct PlatformSnapshot {
    nodes: BTreeMap<PlatformNodeLocation, Attributes>,
}

impl PlatformSnapshot {
    pub fn from_nodes(nodes: BTreeMap<PlatformNodeLocation, Attributes>) -> Self {
        Self { nodes }
    }

    /// Read the host through an already refreshed [`System`]
    fn capture(system: &System, machine_id: &str) -> Self {
        let host = system.host_name().unwrap_or_else(|| "localhost".to_string());
        let os = PlatformNodeLocation::segment(OPERATING_SYSTEM, &host);
        let mut nodes = BTreeMap::new();

        let load = system.load_average();
        nodes.insert(
            os.clone(),
            Attributes::from([
                (MACHINE_ID.to_string(), json!(machine_id)),
                // sysinfo reports percent, the metric is a 0-1 ratio
                (
                    SYSTEM_CPU_LOAD.to_string(),
                    json!(f64::from(system.global_cpu_info().cpu_usage()) / 100.0),
                ),
                (SYSTEM_LOAD_AVERAGE.to_string(), json!(load.one)),
                (PROCESS_COUNT.to_string(), json!(system.processes().len())),
            ]),
        );

        nodes.insert(
            os.child(MEMORY, MEMORY),
            Attributes::from([
                (AVAILABLE_MEMORY.to_string(), json!(system.available_memory())),
                (TOTAL_MEMORY.to_string(), json!(system.total_memory())),
            ]),
        );

        for disk in system.disks() {
            let mount_point = disk.mount_point().to_string_lossy();
            nodes.insert(
                os.child(FILE_STORE, &mount_point),
                Attributes::from([
                    (USABLE_SPACE.to_string(), json!(disk.available_space())),
                    (TOTAL_SPACE.to_string(), json!(disk.total_space())),
                ]),
            );
        }

        for (index, cpu) in system.cpus().iter().enumerate() {
            nodes.insert(
                os.child(PROCESSOR, &index.to_string()),
                Attributes::from([(
                    CPU_USAGE.to_string(),
                    json!(f64::from(cpu.cpu_usage()) / 100.0),
                )]),
            );
        }

        Self { nodes }
    }

    fn matching<'a>(
        &'a self,
        query: &'a PlatformNodeLocation,
    ) -> impl Iterator<Item = (&'a PlatformNodeLocation, &'a Attributes)> + 'a {
        self.nodes
            .iter()
            .filter(move |(location, _)| PlatformLocationResolver.matches(query, location))
    }
}

/// Builds drivers over the local host
///
/// The `System` handle is shared so CPU usage deltas stay meaningful
/// between refreshes.
pub struct PlatformDriverFactory {
    system: Arc<Mutex<System>>,
    machine_id: String,
}

impl PlatformDriverFactory {
    pub fn new(machine_id: Option<String>) -> Self {
        let machine_id = machine_id
            .or_else(read_machine_id)
            .unwrap_or_default();
        Self {
            system: Arc::new(Mutex::new(System::new_all())),
            machine_id,
        }
    }
}

fn read_machine_id() -> Option<String> {
    std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

impl DriverFactory<PlatformNodeLocation> for PlatformDriverFactory {
    fn protocol(&self) -> &'static str {
        "platform"
    }

    fn create_driver(&self) -> Result<Box<dyn Driver<PlatformNodeLocation>>, ProtocolError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| ProtocolError::Protocol("platform sensor lock poisoned".to_string()))?;
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        system.refresh_disks();
        system.refresh_processes();

        let snapshot = PlatformSnapshot::capture(&system, &self.machine_id);
        debug!("Captured [{}] platform nodes", snapshot.nodes.len());
        Ok(Box::new(PlatformDriver { snapshot }))
    }
}

/// Serves reads from a snapshot taken when the session opened
pub struct PlatformDriver {
    snapshot: PlatformSnapshot,
}

impl PlatformDriver {
    pub fn new(snapshot: PlatformSnapshot) -> Self {
        Self { snapshot }
    }

    fn extract(value: &Value, sub_reference: Option<&str>) -> Value {
        match sub_reference {
            Some(sub) => value.get(sub).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        }
    }
}

impl Driver<PlatformNodeLocation> for PlatformDriver {
    fn fetch_nodes(
        &self,
        query: &PlatformNodeLocation,
    ) -> Result<BTreeMap<PlatformNodeLocation, Value>, ProtocolError> {
        Ok(self
            .snapshot
            .matching(query)
            .map(|(location, _)| (location.clone(), Value::Null))
            .collect())
    }

    fn attribute_exists(
        &self,
        location: &AttributeLocation<PlatformNodeLocation>,
    ) -> Result<bool, ProtocolError> {
        Ok(self
            .snapshot
            .matching(&location.location)
            .any(|(_, attributes)| attributes.contains_key(&location.attribute)))
    }

    fn fetch_attribute(
        &self,
        location: &AttributeLocation<PlatformNodeLocation>,
    ) -> Result<AttributeValue, ProtocolError> {
        let sub = location.sub_reference.as_deref();
        let mut values: Vec<Value> = self
            .snapshot
            .matching(&location.location)
            .filter_map(|(_, attributes)| attributes.get(&location.attribute))
            .map(|value| Self::extract(value, sub))
            .collect();

        if PlatformLocationResolver.is_multi_target(&location.location) {
            return Ok(AttributeValue::Multiple(values));
        }
        match values.pop() {
            Some(value) => Ok(AttributeValue::Single(value)),
            None => Err(ProtocolError::Protocol(format!("attribute [{location}] not found"))),
        }
    }
}
