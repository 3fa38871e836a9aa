//! Drive a Toxiproxy engine into named network fault scenarios.
//!
//! A run loads a [`scenario::ScenarioStore`], launches the engine binary,
//! waits for its control API, installs a single route to the upstream under
//! test and applies the scenario's toxics. It then stays resident until
//! interrupted, and always stops the engine on the way out.
//!
//! - [`lifecycle::Controller`] - the run state machine
//! - [`supervisor::Supervisor`] - owns the engine subprocess
//! - [`probe`] - readiness polling
//! - [`route`] - idempotent route setup
//! - [`toxics`] - scenario to toxic translation
//! - [`control::ControlApi`] - HTTP client for the engine
//! - [`engine`] - locating and installing the engine binary
//!
//! # Example
//!
//! ```rust,ignore
//! use pughost::{Controller, ControllerConfig, EngineLocator, ScenarioStore};
//!
//! let store = ScenarioStore::load("pughost.json".as_ref())?;
//! let mut controller = Controller::new(ControllerConfig::default());
//! pughost::lifecycle::forward_signals(controller.interrupter())?;
//! controller.run(&store, "mobile_3g_slow", &EngineLocator::new("bin")).await?;
//! ```
//!
//! # Features
//!
//! - `test-utils` - fake control API and engine fixtures for integration tests

pub mod control;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod probe;
pub mod route;
pub mod scenario;
pub mod supervisor;
pub mod test_utils;
pub mod toxics;

pub use control::{ControlApi, ControlApiError, RouteSpec, ToxicDirective, ToxicKind};
pub use engine::{EngineLocator, Platform};
pub use error::{Error, Result, ToxicApplyWarning};
pub use lifecycle::{Controller, ControllerConfig, State};
pub use scenario::{ScenarioDescriptor, ScenarioStore};
