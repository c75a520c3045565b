//! The control loop: wait for a frame, decode, store, evaluate, actuate, then
//! drain pending overrides. One iteration per [`Coordinator::step`].
//!
//! The coordinator owns the actuator table, the threshold policy and the
//! override sources outright, so the loop needs no locks. The shared status
//! mirror is only written to.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorCommand, ActuatorStateMachine, Endpoints, Transition};
use crate::frame::{decode_reading, Clock, SystemClock};
use crate::overrides::{consume_override, OverrideFeed, PlantTable};
use crate::radio::{Frame, Radio, Reception};
use crate::state::SharedState;
use crate::store::ReadingStore;
use crate::thresholds::ThresholdPolicy;

const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause after a failed receive so a dead bridge does not spin the loop.
const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(2);

pub struct Coordinator<R, S, P, C = SystemClock> {
    radio: R,
    store: S,
    thresholds: P,
    plants: PlantTable,
    actuators: ActuatorStateMachine,
    overrides: Vec<OverrideFeed>,
    shared: SharedState,
    clock: C,
    receive_timeout: Duration,
    error_backoff: Duration,
}

impl<R, S, P> Coordinator<R, S, P, SystemClock>
where
    R: Radio,
    S: ReadingStore,
    P: ThresholdPolicy,
{
    pub fn new(
        radio: R,
        store: S,
        thresholds: P,
        plants: PlantTable,
        endpoints: Endpoints,
        shared: SharedState,
    ) -> Self {
        Self {
            radio,
            store,
            thresholds,
            plants,
            actuators: ActuatorStateMachine::new(endpoints),
            overrides: Vec::new(),
            shared,
            clock: SystemClock,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

impl<R, S, P, C> Coordinator<R, S, P, C>
where
    R: Radio,
    S: ReadingStore,
    P: ThresholdPolicy,
    C: Clock,
{
    #[cfg(test)]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Coordinator<R, S, P, C2> {
        Coordinator {
            radio: self.radio,
            store: self.store,
            thresholds: self.thresholds,
            plants: self.plants,
            actuators: self.actuators,
            overrides: self.overrides,
            shared: self.shared,
            clock,
            receive_timeout: self.receive_timeout,
            error_backoff: self.error_backoff,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    #[cfg(test)]
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_override_source(mut self, source: OverrideFeed) -> Self {
        self.overrides.push(source);
        self
    }

    /// Run until the process is terminated.
    pub async fn run(&mut self) {
        info!(
            timeout_sec = self.receive_timeout.as_secs(),
            override_sources = self.overrides.len(),
            plants = self.plants.len(),
            "coordinator loop started"
        );
        loop {
            self.step().await;
        }
    }

    /// One loop iteration. Returns the commands that went out.
    pub async fn step(&mut self) -> Vec<ActuatorCommand> {
        let mut sent = Vec::new();

        match self.radio.receive(self.receive_timeout).await {
            Ok(Reception::Frame(frame)) => self.handle_frame(frame, &mut sent).await,
            Ok(Reception::Timeout) => {
                info!(
                    timeout_sec = self.receive_timeout.as_secs(),
                    "no frame from any node within the receive timeout"
                );
            }
            Err(e) => {
                warn!("radio receive failed: {e}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("radio receive failed: {e}"));
                sleep(self.error_backoff).await;
            }
        }

        self.poll_overrides(&mut sent).await;
        sent
    }

    async fn handle_frame(&mut self, frame: Frame, sent: &mut Vec<ActuatorCommand>) {
        let node = frame.sender;
        info!(%node, bytes = frame.payload.len(), "frame received");
        debug!(%node, payload = ?frame.payload, "frame payload");

        let reading = match decode_reading(&frame.payload, &self.clock) {
            Ok(r) => r,
            Err(e) => {
                warn!(%node, payload = ?frame.payload, "{e}; frame skipped");
                self.shared
                    .write()
                    .await
                    .record_error(format!("{node}: {e}"));
                return;
            }
        };

        // Best-effort: storage health never gates actuator control.
        if let Err(e) = self.store.append(node, &reading).await {
            warn!(%node, "reading not stored: {e:#}");
            self.shared
                .write()
                .await
                .record_error(format!("{node}: reading not stored: {e}"));
        }
        self.shared.write().await.record_reading(node, &reading);

        let cfg = match self.thresholds.thresholds_for(node) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(
                    %node,
                    soil_moisture = reading.soil_moisture,
                    light = reading.light,
                    "{e}; evaluation skipped"
                );
                self.shared.write().await.record_error(e.to_string());
                return;
            }
        };

        for t in self.actuators.evaluate(node, &reading, &cfg) {
            debug!(
                %node,
                kind = %t.kind,
                soil_moisture = reading.soil_moisture,
                light = reading.light,
                ?cfg,
                "threshold crossed"
            );
            self.dispatch(t, sent).await;
        }
    }

    async fn poll_overrides(&mut self, sent: &mut Vec<ActuatorCommand>) {
        let mut commands = Vec::new();
        for source in &mut self.overrides {
            if let Some(cmd) = consume_override(source, &self.plants).await {
                commands.push(cmd);
            }
        }
        for cmd in commands {
            self.dispatch(cmd.transition(), sent).await;
        }
    }

    /// Send one command; state and status follow only if the radio took it.
    async fn dispatch(&mut self, t: Transition, sent: &mut Vec<ActuatorCommand>) {
        match self.actuators.drive(&self.radio, t).await {
            Ok(cmd) => {
                info!(
                    node = %t.node,
                    kind = %t.kind,
                    level = t.level,
                    origin = ?t.origin,
                    target = %cmd.target,
                    "{} will turn {}",
                    t.kind,
                    if t.turns_on() { "on" } else { "off" }
                );
                if let Err(e) = self.store.record_command(&t, &cmd).await {
                    warn!(node = %t.node, "command not recorded: {e:#}");
                }
                self.shared
                    .write()
                    .await
                    .record_actuator(t.node, t.kind, t.level, t.origin);
                debug!(table = ?self.actuators.snapshot(), "actuator table");
                sent.push(cmd);
            }
            Err(e) => {
                warn!(node = %t.node, kind = %t.kind, "{e}; actuator state unchanged");
                self.shared.write().await.record_error(e.to_string());
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
