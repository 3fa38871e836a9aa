//! Drives one scenario activation from launch to teardown.
//!
//! ```text
//! Idle -> Launching -> Probing -> Configuring -> Active -> ShuttingDown -> Terminated
//! ```
//!
//! Signals, engine bind conflicts and unexpected engine exits all arrive
//! through a single inbox and can pre-empt any wait. Every path ends in
//! `Terminated` with the engine stopped.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::control::{ControlApi, RouteSpec, DEFAULT_API_URL};
use crate::engine::EngineLocator;
use crate::error::{Error, Result};
use crate::probe::{self, ProbePolicy};
use crate::route;
use crate::scenario::{ScenarioDescriptor, ScenarioStore};
use crate::supervisor::{Supervisor, DEFAULT_GRACE};
use crate::toxics::{self, ApplyReport};

// How long to wait for a dying engine's stderr to explain itself.
const EXIT_DRAIN: Duration = Duration::from_millis(250);

const DEFAULT_CONTROL_PORT: u16 = 8474;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Launching,
    Probing,
    Configuring,
    Active,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Launching => "launching engine",
            Self::Probing => "waiting for control API",
            Self::Configuring => "configuring route",
            Self::Active => "active",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        })
    }
}

/// An event that ends the run early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// SIGINT/SIGTERM from the environment.
    Signal,
    /// The engine could not bind its control port.
    BindConflict(String),
    /// The engine exited on its own.
    EngineExited(String),
}

impl Interrupt {
    fn into_error(self, state: State) -> Error {
        match self {
            Self::Signal => Error::Interrupted(state),
            Self::BindConflict(line) => Error::EngineBindConflict(line),
            Self::EngineExited(status) => Error::EngineExited(status),
        }
    }
}

/// Sending half of a controller's inbox.
#[derive(Debug, Clone)]
pub struct Interrupter(UnboundedSender<Interrupt>);

impl Interrupter {
    pub fn channel() -> (Self, UnboundedReceiver<Interrupt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    pub fn send(&self, interrupt: Interrupt) {
        // A closed inbox means the run already finished.
        let _ = self.0.send(interrupt);
    }

    pub fn signal(&self) {
        self.send(Interrupt::Signal);
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub api_url: String,
    pub probe: ProbePolicy,
    pub grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            probe: ProbePolicy::default(),
            grace: DEFAULT_GRACE,
        }
    }
}

pub struct Controller {
    api: ControlApi,
    control_port: u16,
    probe: ProbePolicy,
    state: State,
    history: Vec<State>,
    supervisor: Supervisor,
    interrupter: Interrupter,
    inbox: UnboundedReceiver<Interrupt>,
    toxics: Option<ApplyReport>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("api", &self.api.base_url())
            .field("state", &self.state)
            .field("supervisor", &self.supervisor)
            .finish()
    }
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        let (interrupter, inbox) = Interrupter::channel();
        let api = ControlApi::new(&config.api_url);
        Self {
            control_port: api.port().unwrap_or(DEFAULT_CONTROL_PORT),
            api,
            probe: config.probe,
            state: State::Idle,
            history: vec![State::Idle],
            supervisor: Supervisor::new(config.grace),
            interrupter,
            inbox,
            toxics: None,
        }
    }

    /// Handle for event sources (signal handlers, tests) to stop the run.
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[State] {
        &self.history
    }

    /// How many times a live engine was stopped.
    pub fn terminations(&self) -> usize {
        self.supervisor.terminations()
    }

    /// Result of toxic application, once configuration got that far.
    pub fn toxics(&self) -> Option<&ApplyReport> {
        self.toxics.as_ref()
    }

    /// Activate `scenario` and stay resident until interrupted.
    ///
    /// Returns `Ok(())` only for a signal received while `Active`.
    pub async fn run(
        &mut self,
        store: &ScenarioStore,
        scenario: &str,
        locator: &EngineLocator,
    ) -> Result<()> {
        let prepared = store
            .scenario(scenario)
            .and_then(|descriptor| Ok((descriptor, locator.locate()?)));
        let (descriptor, executable) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.enter(State::Terminated);
                return Err(err);
            }
        };

        self.enter(State::Launching);
        let result = self.activate(store, scenario, descriptor, &executable).await;
        if let Err(err) = &result {
            warn!("Run ended while {}: {err}", self.state);
        }

        self.shutdown().await;
        result
    }

    async fn activate(
        &mut self,
        store: &ScenarioStore,
        scenario: &str,
        descriptor: &ScenarioDescriptor,
        executable: &Path,
    ) -> Result<()> {
        self.supervisor
            .launch(executable, self.control_port, self.interrupter.clone())?;

        self.enter(State::Probing);
        let api = self.api.clone();
        let readiness = self
            .interruptible(probe::wait_until_ready(&api, self.probe))
            .await?;
        if !readiness.is_ready() {
            return Err(Error::EngineUnreachable {
                url: api.base_url().to_owned(),
                attempts: readiness.attempts(),
            });
        }

        self.enter(State::Configuring);
        let route = RouteSpec::for_store(store);
        self.interruptible(route::ensure_route(&api, &route))
            .await??;

        let directives = toxics::translate(descriptor);
        let report = self
            .interruptible(toxics::apply(&api, &route.name, &directives))
            .await?;
        if !report.warnings.is_empty() {
            warn!(
                "{} of {} toxics could not be applied",
                report.warnings.len(),
                directives.len()
            );
        }
        self.toxics = Some(report);

        self.enter(State::Active);
        info!(
            scenario,
            "Active: {} -> {} (ctrl-c to stop)",
            route.listen,
            route.upstream
        );

        let state = self.state;
        match next_interrupt(&mut self.inbox, &mut self.supervisor).await {
            Interrupt::Signal => Ok(()),
            other => Err(other.into_error(state)),
        }
    }

    /// Run `fut` unless an interrupt arrives first.
    async fn interruptible<F: Future>(&mut self, fut: F) -> Result<F::Output> {
        let state = self.state;
        tokio::select! {
            biased;
            interrupt = next_interrupt(&mut self.inbox, &mut self.supervisor) => {
                Err(interrupt.into_error(state))
            }
            output = fut => Ok(output),
        }
    }

    async fn shutdown(&mut self) {
        if self.state == State::Terminated {
            return;
        }

        self.enter(State::ShuttingDown);
        if !self.supervisor.terminate().await {
            debug!("No running engine to stop");
        }
        self.enter(State::Terminated);
    }

    fn enter(&mut self, state: State) {
        debug!(from = %self.state, to = %state, "state transition");
        self.state = state;
        self.history.push(state);
    }
}

async fn next_interrupt(
    inbox: &mut UnboundedReceiver<Interrupt>,
    supervisor: &mut Supervisor,
) -> Interrupt {
    tokio::select! {
        Some(interrupt) = inbox.recv() => interrupt,
        status = supervisor.exited() => {
            let status = match status {
                Ok(status) => status.to_string(),
                Err(err) => err.to_string(),
            };
            drain_exit(inbox, status).await
        }
    }
}

/// The engine has exited with `status`. A bind conflict it reported just
/// before dying is the better explanation, so give stderr a moment to deliver
/// one. Anything else still arriving is superseded by the exit.
async fn drain_exit(inbox: &mut UnboundedReceiver<Interrupt>, status: String) -> Interrupt {
    let deadline = Instant::now() + EXIT_DRAIN;
    while let Ok(Some(interrupt)) = tokio::time::timeout_at(deadline, inbox.recv()).await {
        match interrupt {
            conflict @ Interrupt::BindConflict(_) => return conflict,
            other => debug!(?other, "engine already exited ({status})"),
        }
    }

    Interrupt::EngineExited(status)
}

/// Forward SIGINT (and SIGTERM on unix) into `interrupter` until the process exits.
pub fn forward_signals(interrupter: Interrupter) -> io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            let received = tokio::select! {
                res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
                Some(()) = terminate.recv() => Ok("SIGTERM"),
            };
            #[cfg(not(unix))]
            let received = tokio::signal::ctrl_c().await.map(|()| "ctrl-c");

            match received {
                Ok(name) => {
                    info!("Received {name}, shutting down");
                    interrupter.signal();
                }
                Err(err) => {
                    error!("Failed to listen for signals: {err}");
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_mapping() {
        assert!(matches!(
            Interrupt::Signal.into_error(State::Probing),
            Error::Interrupted(State::Probing)
        ));
        assert!(matches!(
            Interrupt::BindConflict("bind".into()).into_error(State::Probing),
            Error::EngineBindConflict(_)
        ));
        assert_eq!(
            Error::Interrupted(State::Probing).to_string(),
            "interrupted while waiting for control API"
        );
    }

    #[tokio::test]
    async fn test_signal_during_exit_does_not_hide_conflict() {
        let (interrupter, mut inbox) = Interrupter::channel();
        interrupter.signal();
        interrupter.send(Interrupt::BindConflict("bind: address already in use".into()));

        let interrupt = drain_exit(&mut inbox, "exit status: 1".into()).await;
        assert!(matches!(interrupt, Interrupt::BindConflict(_)));
    }

    #[tokio::test]
    async fn test_exit_without_conflict_is_reported_as_exit() {
        let (interrupter, mut inbox) = Interrupter::channel();
        interrupter.signal();

        let interrupt = drain_exit(&mut inbox, "exit status: 1".into()).await;
        assert_eq!(interrupt, Interrupt::EngineExited("exit status: 1".into()));
    }

    #[test]
    fn test_control_port_from_api_url() {
        let controller = Controller::new(ControllerConfig {
            api_url: "http://127.0.0.1:18474".into(),
            ..Default::default()
        });
        assert_eq!(controller.control_port, 18474);
        assert_eq!(
            Controller::new(ControllerConfig::default()).control_port,
            DEFAULT_CONTROL_PORT
        );
    }

    #[tokio::test]
    async fn test_interrupter_survives_closed_inbox() {
        let (interrupter, inbox) = Interrupter::channel();
        drop(inbox);
        interrupter.signal();
    }

    #[tokio::test]
    async fn test_unknown_scenario_terminates_from_idle() {
        let mut controller = Controller::new(ControllerConfig::default());
        let err = controller
            .run(
                &ScenarioStore::default(),
                "dialup",
                &EngineLocator::new("/nonexistent"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ScenarioNotFound { .. }));
        assert_eq!(controller.history(), &[State::Idle, State::Terminated]);
        assert_eq!(controller.terminations(), 0);
    }
}
