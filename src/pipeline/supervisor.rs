//! Pipeline supervisor
//!
//! Owns every task of a running node under one root `CancellationToken`:
//! one poller per sensor type (each on its own child token so it can be
//! rebuilt alone), the publish loop and the connection watchdog.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    initial_states, run_publish_loop, CurrentPoller, PollerContext, SensorRegistry,
    TemperaturePoller, VibrationPoller,
};
use crate::acquisition::SensorPorts;
use crate::background::ConnectionWatchdog;
use crate::config::{self, ConfigError, NodeConfig, SharedConfig};
use crate::publish::{status_channel, ConnectionTracker, PublishCoordinator, QoS, Transport};
use crate::storage::DurableOutboundQueue;
use crate::types::{SensorKind, StatusEvent};

/// Runtime control of a running pipeline
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Swap in a new configuration; only pollers whose settings changed are rebuilt
    Reconfigure(NodeConfig),
    /// Rebuild one poller with calibration forced on
    Recalibrate(SensorKind),
}

/// Long-running service tasks, reported when they finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskName {
    PublishLoop,
    ConnectionWatchdog,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::PublishLoop => write!(f, "PublishLoop"),
            TaskName::ConnectionWatchdog => write!(f, "ConnectionWatchdog"),
        }
    }
}

struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A running node
pub struct Pipeline {
    config: SharedConfig,
    registry: Arc<SensorRegistry>,
    ports: Arc<dyn SensorPorts>,
    coordinator: Arc<PublishCoordinator>,
    events: broadcast::Sender<StatusEvent>,
    cancel: CancellationToken,
    pollers: BTreeMap<SensorKind, PollerHandle>,
    services: JoinSet<TaskName>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("device_id", &self.config.load().device_id)
            .field("pollers", &self.pollers.keys().collect::<Vec<_>>())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Register every configured sensor and spawn all tasks.
    ///
    /// Fails only when the configuration lists no sensors at all; any
    /// individual sensor problem is reported through its registry entry.
    pub fn start(
        config: NodeConfig,
        ports: Arc<dyn SensorPorts>,
        transport: Arc<dyn Transport>,
        queue: Arc<DurableOutboundQueue>,
    ) -> Result<Self> {
        if config.sensor_count() == 0 {
            return Err(ConfigError::NoSensors).context("Pipeline startup refused");
        }
        let qos = QoS::from_level(config.broker.qos)
            .with_context(|| format!("Unsupported QoS level {}", config.broker.qos))?;

        let events = status_channel();
        let connection = Arc::new(ConnectionTracker::new(events.clone()));
        let coordinator = Arc::new(PublishCoordinator::new(
            transport,
            queue,
            connection,
            config.broker.topic.clone(),
            qos,
        ));

        let mut pipeline = Self {
            config: config::shared(config),
            registry: Arc::new(SensorRegistry::new()),
            ports,
            coordinator,
            events,
            cancel: CancellationToken::new(),
            pollers: BTreeMap::new(),
            services: JoinSet::new(),
        };

        let snapshot = pipeline.config.load_full();
        info!(
            device = %snapshot.device_id,
            vibration = snapshot.sensors.vibration.len(),
            temperature = snapshot.sensors.temperature.len(),
            current = snapshot.sensors.current.channels.len(),
            "[Supervisor] Starting pipeline"
        );

        for kind in SensorKind::ALL {
            pipeline.spawn_poller(kind, Arc::clone(&snapshot));
        }
        pipeline.spawn_services(&snapshot);
        Ok(pipeline)
    }

    fn spawn_poller(&mut self, kind: SensorKind, config: Arc<NodeConfig>) {
        let entries = initial_states(&config, kind);
        let has_sensors = !entries.is_empty();
        self.registry.reset_kind(kind, entries);
        if !has_sensors {
            info!(kind = %kind, "[Supervisor] No sensors of this type configured");
            return;
        }

        let cancel = self.cancel.child_token();
        let ctx = PollerContext {
            config,
            registry: Arc::clone(&self.registry),
            ports: Arc::clone(&self.ports),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(async move {
            match kind {
                SensorKind::Vibration => VibrationPoller::new(ctx).run().await,
                SensorKind::Temperature => TemperaturePoller::new(ctx).run().await,
                SensorKind::Current => CurrentPoller::new(ctx).run().await,
            }
        });
        self.pollers.insert(kind, PollerHandle { cancel, task });
    }

    fn spawn_services(&mut self, config: &NodeConfig) {
        let registry = Arc::clone(&self.registry);
        let coordinator = Arc::clone(&self.coordinator);
        let cancel = self.cancel.child_token();
        let device_id = config.device_id.clone();
        let period = config.intervals.publish();
        self.services.spawn(async move {
            run_publish_loop(device_id, period, registry, coordinator, cancel).await;
            TaskName::PublishLoop
        });

        let watchdog = ConnectionWatchdog::new(
            Arc::clone(&self.coordinator),
            config.intervals.watchdog(),
            config.intervals.heartbeat_timeout(),
        );
        let cancel = self.cancel.child_token();
        self.services.spawn(async move {
            watchdog.run(cancel).await;
            TaskName::ConnectionWatchdog
        });
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<PublishCoordinator> {
        &self.coordinator
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<NodeConfig> {
        self.config.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Token cancelled when the pipeline shuts down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply a runtime command; returns the sensor types that were rebuilt
    pub async fn handle_command(&mut self, command: PipelineCommand) -> Result<Vec<SensorKind>> {
        match command {
            PipelineCommand::Reconfigure(next) => self.reconfigure(next).await,
            PipelineCommand::Recalibrate(kind) => {
                info!(kind = %kind, "[Supervisor] Recalibration requested");
                self.rebuild(kind, true).await;
                Ok(vec![kind])
            }
        }
    }

    async fn reconfigure(&mut self, next: NodeConfig) -> Result<Vec<SensorKind>> {
        next.validate().context("Rejected new configuration")?;
        if next.sensor_count() == 0 {
            return Err(ConfigError::NoSensors).context("Rejected new configuration");
        }

        let current = self.config.load_full();
        if next.device_id != current.device_id
            || next.broker != current.broker
            || next.queue != current.queue
            || next.intervals.publish_ms != current.intervals.publish_ms
            || next.intervals.watchdog_secs != current.intervals.watchdog_secs
            || next.intervals.heartbeat_timeout_secs != current.intervals.heartbeat_timeout_secs
        {
            warn!(
                "[Supervisor] Identity, broker, queue and publish settings apply on restart only"
            );
        }

        let changed = current.changed_pollers(&next);
        self.config.store(Arc::new(next));
        for kind in &changed {
            self.rebuild(*kind, false).await;
        }
        info!(rebuilt = ?changed, "[Supervisor] Configuration applied");
        Ok(changed)
    }

    /// Stop a poller the way shutdown does, then start it again
    async fn rebuild(&mut self, kind: SensorKind, force_calibration: bool) {
        if let Some(handle) = self.pollers.remove(&kind) {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                error!(kind = %kind, error = %e, "[Supervisor] Poller task panicked");
            }
        }

        let mut config = NodeConfig::clone(&self.config.load_full());
        if force_calibration {
            match kind {
                SensorKind::Vibration => config.calibration.vibration = true,
                SensorKind::Current => config.calibration.current = true,
                SensorKind::Temperature => {}
            }
        }
        self.spawn_poller(kind, Arc::new(config));
    }

    /// Serve commands until the root token is cancelled, then shut down.
    ///
    /// A service task that ends on its own cancels the whole pipeline.
    pub async fn run(mut self, mut commands: mpsc::Receiver<PipelineCommand>) {
        info!("[Supervisor] All tasks spawned, monitoring...");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("[Supervisor] Shutdown signal received");
                    break;
                }
                Some(command) = commands.recv() => {
                    if let Err(e) = self.handle_command(command).await {
                        warn!(error = %format!("{e:#}"), "[Supervisor] Command rejected");
                    }
                }
                Some(result) = self.services.join_next() => {
                    match result {
                        Ok(task) => warn!("[Supervisor] Task {} stopped unexpectedly", task),
                        Err(e) => error!("[Supervisor] Task panicked: {}", e),
                    }
                    self.cancel.cancel();
                }
            }
        }
        self.shutdown().await;
    }

    /// Cancel every task and wait for it to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for (kind, handle) in std::mem::take(&mut self.pollers) {
            if let Err(e) = handle.task.await {
                error!(kind = %kind, error = %e, "[Supervisor] Poller task panicked");
            }
        }
        while let Some(result) = self.services.join_next().await {
            match result {
                Ok(task) => info!("[Supervisor] Task {} completed normally", task),
                Err(e) => error!("[Supervisor] Task panicked: {}", e),
            }
        }
        info!(pending = self.coordinator.queue().len(), "[Supervisor] All tasks stopped");
    }
}
