use clap::Parser;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use vigil::config::{AgentConfig, ProtocolSection, RemoteEndpointConfig};
use vigil::error::{ConfigError, EndpointError};
use vigil::events::{AvailDataPoint, MetricDataPoint};
use vigil::inventory::{InventoryListener, LoggingInventoryListener, ResourceTypeManager, TypeSet};
use vigil::protocol::dmr::{DmrConnection, DmrDriverFactory, DmrLocationResolver, DmrNodeLocation};
use vigil::protocol::jmx::{
    JmxLocationResolver, JmxNodeLocation, JolokiaConnection, JolokiaDriverFactory,
};
use vigil::protocol::platform::{self, PlatformDriverFactory, PlatformLocationResolver};
use vigil::protocol::{
    DriverFactory, EndpointDefinition, EndpointService, LocationResolver, MeasurementConsumer,
    NodeLocation,
};
use vigil::scheduler::{EndpointScheduler, ManagedEndpoint, SystemClock};
use vigil::storage::{BufferedDispatcher, LoggingStorageAdapter, StorageAdapter};
use vigil::Diagnostics;

/// Name of the endpoint monitoring the local host
const PLATFORM_ENDPOINT: &str = "Platform";

/// Command-line arguments for the monitoring agent
#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Monitoring agent - discovers managed resources and collects their metrics",
    long_about = "Discovers resources exposed by WildFly management endpoints, Jolokia agents \
                  and the local host, then periodically collects metrics and availability \
                  for them and hands the data points to storage."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing files are allowed and fall back to defaults later.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() && !config_path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    config_path.display()
                ));
            }
            if config_path.extension().is_some_and(|ext| ext != "toml") {
                warn!(
                    "Configuration file does not have .toml extension: {}",
                    config_path.display()
                );
            }
        }
        Ok(())
    }
}

/// Things every endpoint of the agent shares
struct Wiring {
    config: AgentConfig,
    diagnostics: Arc<Diagnostics>,
    metric_consumer: Arc<dyn MeasurementConsumer<MetricDataPoint>>,
    avail_consumer: Arc<dyn MeasurementConsumer<AvailDataPoint>>,
}

impl Wiring {
    /// Build one endpoint's service and scheduler
    fn build_endpoint<L: NodeLocation>(
        &self,
        name: &str,
        wait_for: &[String],
        driver_factory: Arc<dyn DriverFactory<L>>,
        resolver: Arc<dyn LocationResolver<L>>,
        type_sets: &[TypeSet<L>],
        sets_to_use: Option<&[String]>,
    ) -> Result<EndpointScheduler<L>, EndpointError> {
        let type_manager = ResourceTypeManager::new(
            type_sets,
            sets_to_use,
            self.config.min_collection_interval_millis(),
        )
        .map_err(|source| EndpointError::Types {
            endpoint: name.to_string(),
            source,
        })?;

        let mut definition = EndpointDefinition::new(name, &self.config.agent.feed_id);
        definition.wait_for = wait_for
            .iter()
            .map(|location| location.parse())
            .collect::<Result<Vec<L>, _>>()
            .map_err(|e| EndpointError::InvalidAddress {
                endpoint: name.to_string(),
                reason: format!("wait_for: {e}"),
            })?;

        let service = Arc::new(EndpointService::new(
            definition,
            driver_factory,
            resolver,
            Arc::new(type_manager),
            Arc::clone(&self.diagnostics),
        ));
        let listener: Arc<dyn InventoryListener<L>> = Arc::new(LoggingInventoryListener);
        service.add_inventory_listener(listener);

        Ok(EndpointScheduler::new(
            service,
            Arc::clone(&self.metric_consumer),
            Arc::clone(&self.avail_consumer),
            Arc::clone(&self.diagnostics),
            Arc::new(SystemClock),
            self.config.scheduler_config(),
        ))
    }

    fn dmr_endpoint(
        &self,
        endpoint: &RemoteEndpointConfig,
        type_sets: &[TypeSet<DmrNodeLocation>],
    ) -> Result<Box<dyn ManagedEndpoint>, EndpointError> {
        let factory = DmrDriverFactory::new(DmrConnection {
            url: endpoint.url.clone(),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            timeout: endpoint.timeout(),
        })
        .map_err(|e| EndpointError::InvalidAddress {
            endpoint: endpoint.name.clone(),
            reason: e.to_string(),
        })?;
        let scheduler = self.build_endpoint(
            &endpoint.name,
            &endpoint.wait_for,
            Arc::new(factory),
            Arc::new(DmrLocationResolver),
            type_sets,
            endpoint.resource_type_sets.as_deref(),
        )?;
        Ok(Box::new(scheduler))
    }

    fn jmx_endpoint(
        &self,
        endpoint: &RemoteEndpointConfig,
        type_sets: &[TypeSet<JmxNodeLocation>],
    ) -> Result<Box<dyn ManagedEndpoint>, EndpointError> {
        let factory = JolokiaDriverFactory::new(JolokiaConnection {
            url: endpoint.url.clone(),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            timeout: endpoint.timeout(),
        })
        .map_err(|e| EndpointError::InvalidAddress {
            endpoint: endpoint.name.clone(),
            reason: e.to_string(),
        })?;
        let scheduler = self.build_endpoint(
            &endpoint.name,
            &endpoint.wait_for,
            Arc::new(factory),
            Arc::new(JmxLocationResolver),
            type_sets,
            endpoint.resource_type_sets.as_deref(),
        )?;
        Ok(Box::new(scheduler))
    }

    fn platform_endpoint(&self) -> Result<Box<dyn ManagedEndpoint>, EndpointError> {
        let scheduler = self.build_endpoint(
            PLATFORM_ENDPOINT,
            &[],
            Arc::new(PlatformDriverFactory::new(self.config.platform.machine_id.clone())),
            Arc::new(PlatformLocationResolver),
            &[platform::type_set(self.config.platform.interval())],
            None,
        )?;
        Ok(Box::new(scheduler))
    }

    /// Every enabled endpoint that could be constructed
    ///
    /// An endpoint that fails to build is logged and skipped; the others
    /// still run.
    fn build_endpoints(&self) -> Vec<Box<dyn ManagedEndpoint>> {
        let mut endpoints: Vec<Box<dyn ManagedEndpoint>> = Vec::new();
        let mut keep = |result: Result<Box<dyn ManagedEndpoint>, EndpointError>| match result {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => error!("Endpoint will not be monitored: {}", e),
        };

        let dmr_sets = convert_type_sets("dmr", &self.config.dmr);
        for endpoint in self.config.dmr.enabled_endpoints() {
            keep(self.dmr_endpoint(endpoint, &dmr_sets));
        }

        let jmx_sets = convert_type_sets("jmx", &self.config.jmx);
        for endpoint in self.config.jmx.enabled_endpoints() {
            keep(self.jmx_endpoint(endpoint, &jmx_sets));
        }

        if self.config.platform.enabled {
            keep(self.platform_endpoint());
        }

        endpoints
    }
}

/// Type sets of one protocol; a set that cannot be converted is left out
fn convert_type_sets<L: NodeLocation>(protocol: &str, section: &ProtocolSection) -> Vec<TypeSet<L>> {
    section
        .type_sets
        .iter()
        .filter_map(|set| match set.to_type_set() {
            Ok(type_set) => Some(type_set),
            Err(e) => {
                warn!("Ignoring {} type set [{}]: {}", protocol, set.name, e);
                None
            }
        })
        .collect()
}

/// The running agent: dispatchers, endpoints and the diagnostics reporter
struct MonitoringAgent {
    config: AgentConfig,
    diagnostics: Arc<Diagnostics>,
    metrics: Arc<BufferedDispatcher<MetricDataPoint>>,
    avails: Arc<BufferedDispatcher<AvailDataPoint>>,
    endpoints: Vec<Box<dyn ManagedEndpoint>>,
    reporter: Option<JoinHandle<()>>,
}

impl MonitoringAgent {
    /// Load configuration, falling back to defaults when the file is
    /// missing or invalid
    fn load_config(config_path: Option<&Path>) -> AgentConfig {
        match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                match AgentConfig::from_file(path) {
                    Ok(config) => config,
                    Err(ConfigError::ReadError(_)) => {
                        warn!(
                            "Configuration file '{}' not found or unreadable, using defaults",
                            path.display()
                        );
                        AgentConfig::default()
                    }
                    Err(e) => {
                        error!("Configuration error in '{}': {}", path.display(), e);
                        warn!("Using default configuration due to invalid config file");
                        AgentConfig::default()
                    }
                }
            }
            None => {
                info!("Using default configuration");
                AgentConfig::default()
            }
        }
    }

    fn new(config: AgentConfig, adapter: Arc<dyn StorageAdapter>) -> Self {
        let diagnostics = Arc::new(Diagnostics::new());
        let metrics = Arc::new(BufferedDispatcher::spawn(
            Arc::clone(&adapter),
            config.metric_dispatcher_config(),
            Arc::clone(&diagnostics),
        ));
        let avails = Arc::new(BufferedDispatcher::spawn(
            adapter,
            config.avail_dispatcher_config(),
            Arc::clone(&diagnostics),
        ));

        let wiring = Wiring {
            config: config.clone(),
            diagnostics: Arc::clone(&diagnostics),
            metric_consumer: Arc::clone(&metrics) as Arc<dyn MeasurementConsumer<MetricDataPoint>>,
            avail_consumer: Arc::clone(&avails) as Arc<dyn MeasurementConsumer<AvailDataPoint>>,
        };
        let endpoints = wiring.build_endpoints();
        info!("Configured [{}] endpoints", endpoints.len());

        Self {
            config,
            diagnostics,
            metrics,
            avails,
            endpoints,
            reporter: None,
        }
    }

    /// Start every endpoint and the diagnostics reporter
    ///
    /// Must be called from within the tokio runtime.
    fn start(&mut self) {
        for endpoint in &self.endpoints {
            endpoint.start();
        }

        if self.config.diagnostics.enabled {
            let diagnostics = Arc::clone(&self.diagnostics);
            let period = Duration::from_secs(self.config.diagnostics.report_interval_secs);
            self.reporter = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    diagnostics.report();
                }
            }));
        }
    }

    /// Stop endpoints first, then drain the buffers into storage
    async fn stop(&mut self) {
        for endpoint in &self.endpoints {
            endpoint.stop().await;
        }
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }

        let metrics = Arc::clone(&self.metrics);
        let avails = Arc::clone(&self.avails);
        let timeout = self.config.shutdown_timeout();
        let drained = tokio::task::spawn_blocking(move || {
            let metrics_done = metrics.shutdown(timeout);
            let avails_done = avails.shutdown(timeout);
            metrics_done && avails_done
        })
        .await;
        match drained {
            Ok(true) => debug!("Storage buffers drained"),
            Ok(false) => warn!("Storage buffers were not fully drained before shutdown"),
            Err(e) => error!("Failed to drain storage buffers: {}", e),
        }

        self.diagnostics.report();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting monitoring agent");

    if let Err(e) = cli.validate() {
        anyhow::bail!("Invalid arguments: {}", e);
    }

    let config = MonitoringAgent::load_config(cli.config.as_deref());
    let mut agent = MonitoringAgent::new(config, Arc::new(LoggingStorageAdapter));

    let (shutdown_sender, mut shutdown_receiver) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })?;

    agent.start();
    info!("Monitoring agent is running. Press Ctrl+C to stop.");

    shutdown_receiver.recv().await;
    agent.stop().await;

    info!("Monitoring agent shutdown complete");
    Ok(())
}
