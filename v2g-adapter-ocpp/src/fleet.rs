//! Fleet runner
//!
//! Launches N independent charge points, each a `ConnectionSupervisor` in
//! its own task with its own bridge, rotator and simulated session. Nothing
//! is shared between charge points, so one failing session cannot take
//! another down.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::iso::session::{ChargingSession, SimSession, SimSessionConfig};
use crate::metrics::MetricsSink;
use crate::supervisor::ConnectionSupervisor;

/// A set of isolated charge point supervisors
pub struct FleetRunner {
    supervisors: Vec<ConnectionSupervisor>,
}

impl FleetRunner {
    pub fn new() -> Self {
        Self {
            supervisors: Vec::new(),
        }
    }

    /// Add one charge point driven by the given session
    pub fn add(&mut self, config: BridgeConfig, session: Arc<dyn ChargingSession>) {
        self.supervisors
            .push(ConnectionSupervisor::new(config, session));
    }

    /// Add one charge point driven by the given session, with a latency sink
    pub fn add_with_metrics(
        &mut self,
        config: BridgeConfig,
        session: Arc<dyn ChargingSession>,
        metrics: Arc<dyn MetricsSink>,
    ) {
        self.supervisors
            .push(ConnectionSupervisor::new(config, session).with_metrics(metrics));
    }

    /// Build a fleet of `count` simulated charge points.
    ///
    /// Identities are `{prefix}001`, `{prefix}002`, ... and each charge
    /// point gets its own simulated ISO 15118 session.
    pub fn simulated(
        base: BridgeConfig,
        prefix: &str,
        count: usize,
        sim: SimSessionConfig,
    ) -> Self {
        let mut fleet = Self::new();
        for n in 1..=count {
            let mut config = base.clone();
            config.station.identity = format!("{}{:03}", prefix, n);
            let session = SimSession::spawn(sim.clone());
            fleet.add(config, session);
        }
        fleet
    }

    /// Number of charge points in the fleet
    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    /// Run every supervisor to completion (normally forever)
    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        let count = self.supervisors.len();

        for supervisor in self.supervisors {
            tasks.spawn(supervisor.run());
        }

        info!("fleet of {} charge points started", count);

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                // Supervisors retry forever; a task ending means it panicked
                // or was aborted. Isolation keeps the rest of the fleet up.
                warn!("charge point task ended: {}", e);
            }
        }
    }
}

impl Default for FleetRunner {
    fn default() -> Self {
        Self::new()
    }
}
