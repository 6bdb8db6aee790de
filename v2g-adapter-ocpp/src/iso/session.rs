//! ISO 15118 session collaborator
//!
//! The SECC/EVCC state machine itself lives outside this crate; the bridge
//! only observes it. `ChargingSession` is that seam: a state accessor, a
//! charging-needs accessor and a sink for translated schedules.
//!
//! `SimSession` walks a scripted ISO 15118-2 AC session for fleet
//! experiments, with exponentially distributed EV inter-arrival times.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::iso::schedule::SaScheduleTuple;

/// SECC protocol states of an ISO 15118-2 session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeccState {
    NotStarted,
    SupportedAppProtocol,
    SessionSetup,
    ServiceDiscovery,
    PaymentServiceSelection,
    Authorization,
    ChargeParameterDiscovery,
    PowerDelivery,
    ChargingStatus,
    SessionStop,
}

impl std::fmt::Display for SeccState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for SeccState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotStarted" => Ok(SeccState::NotStarted),
            "SupportedAppProtocol" => Ok(SeccState::SupportedAppProtocol),
            "SessionSetup" => Ok(SeccState::SessionSetup),
            "ServiceDiscovery" => Ok(SeccState::ServiceDiscovery),
            "PaymentServiceSelection" => Ok(SeccState::PaymentServiceSelection),
            "Authorization" => Ok(SeccState::Authorization),
            "ChargeParameterDiscovery" => Ok(SeccState::ChargeParameterDiscovery),
            "PowerDelivery" => Ok(SeccState::PowerDelivery),
            "ChargingStatus" => Ok(SeccState::ChargingStatus),
            "SessionStop" => Ok(SeccState::SessionStop),
            other => Err(format!("unknown SECC state: {}", other)),
        }
    }
}

/// Charging needs negotiated by the EV during session setup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargingNeeds {
    /// Requested energy amount in Wh
    pub energy_amount: f64,
    /// Departure time as seconds from session start
    pub departure_time: i64,
    pub min_current: f64,
    pub max_current: f64,
    pub max_voltage: f64,
}

impl Default for ChargingNeeds {
    fn default() -> Self {
        Self {
            energy_amount: 60_000.0,
            departure_time: 3_600,
            min_current: 6.0,
            max_current: 32.0,
            max_voltage: 400.0,
        }
    }
}

/// External ISO 15118 session observed by the bridge
pub trait ChargingSession: Send + Sync {
    /// Current protocol state of the session
    fn state(&self) -> SeccState;

    /// Charging needs once negotiated, None before that
    fn charging_needs(&self) -> Option<ChargingNeeds>;

    /// Deliver a translated schedule back into the session
    fn accept_schedule(&self, schedule: SaScheduleTuple);
}

/// Configuration of the simulated session
#[derive(Debug, Clone)]
pub struct SimSessionConfig {
    /// Average EV arrivals per second; closer to 0.0 means longer gaps
    pub arrival_rate: f64,
    /// Dwell time in each protocol state
    pub state_dwell: Duration,
    /// Needs announced by every simulated EV
    pub needs: ChargingNeeds,
}

impl Default for SimSessionConfig {
    fn default() -> Self {
        Self {
            arrival_rate: 0.1,
            state_dwell: Duration::from_secs(2),
            needs: ChargingNeeds::default(),
        }
    }
}

/// The scripted walk of one AC charging session
const SESSION_WALK: [SeccState; 10] = [
    SeccState::NotStarted,
    SeccState::SupportedAppProtocol,
    SeccState::SessionSetup,
    SeccState::ServiceDiscovery,
    SeccState::PaymentServiceSelection,
    SeccState::Authorization,
    SeccState::ChargeParameterDiscovery,
    SeccState::PowerDelivery,
    SeccState::ChargingStatus,
    SeccState::SessionStop,
];

struct SimInner {
    phase: usize,
    state: SeccState,
    needs: Option<ChargingNeeds>,
    delivered: Vec<SaScheduleTuple>,
}

/// Simulated ISO 15118 session walking `SESSION_WALK` forever
pub struct SimSession {
    config: SimSessionConfig,
    inner: Mutex<SimInner>,
}

impl SimSession {
    pub fn new(config: SimSessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(SimInner {
                phase: 0,
                state: SeccState::NotStarted,
                needs: None,
                delivered: Vec::new(),
            }),
        }
    }

    /// Create a session and spawn its driver task
    pub fn spawn(config: SimSessionConfig) -> Arc<Self> {
        let session = Arc::new(Self::new(config));
        let driver = session.clone();
        tokio::spawn(async move { driver.run().await });
        session
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Step to the next protocol state of the scripted walk
    pub fn advance(&self) -> SeccState {
        let mut inner = self.lock();
        inner.phase = (inner.phase + 1) % SESSION_WALK.len();
        inner.state = SESSION_WALK[inner.phase];

        match inner.state {
            SeccState::SessionSetup => inner.needs = Some(self.config.needs),
            SeccState::NotStarted => inner.needs = None,
            _ => {}
        }

        debug!("SECC state -> {}", inner.state);
        inner.state
    }

    /// Schedules delivered into this session so far
    pub fn delivered_schedules(&self) -> Vec<SaScheduleTuple> {
        self.lock().delivered.clone()
    }

    /// Drive the scripted walk until the task is dropped
    pub async fn run(&self) {
        loop {
            let wait = match self.state() {
                SeccState::NotStarted => sample_inter_arrival(self.config.arrival_rate),
                _ => self.config.state_dwell,
            };
            tokio::time::sleep(wait).await;
            self.advance();
        }
    }
}

impl ChargingSession for SimSession {
    fn state(&self) -> SeccState {
        self.lock().state
    }

    fn charging_needs(&self) -> Option<ChargingNeeds> {
        self.lock().needs
    }

    fn accept_schedule(&self, schedule: SaScheduleTuple) {
        info!(
            "session accepted schedule tuple {} ({} entries)",
            schedule.sa_schedule_tuple_id,
            schedule.p_max_schedule.schedule_entries.len()
        );
        self.lock().delivered.push(schedule);
    }
}

/// Sample the waiting time until the next EV arrival for the given rate
pub fn sample_inter_arrival(arrival_rate: f64) -> Duration {
    let rate = arrival_rate.max(f64::EPSILON);
    let u: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
    Duration::from_secs_f64(-u.ln() / rate)
}
