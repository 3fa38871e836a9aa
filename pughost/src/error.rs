use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::control::{ControlApiError, ToxicKind};
use crate::lifecycle::State;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can stop a run, grouped so the CLI can tell the operator
/// which phase failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no scenario store at {}; run `pughost init` first", .0.display())]
    ConfigMissing(PathBuf),
    #[error("invalid scenario store {}: {reason}", .path.display())]
    ConfigInvalid { path: PathBuf, reason: String },
    #[error("unknown scenario '{name}' (available: {})", .available.join(", "))]
    ScenarioNotFound { name: String, available: Vec<String> },
    #[error("engine executable not found at {}; run `pughost install`", .0.display())]
    EngineNotFound(PathBuf),
    #[error("failed to launch engine {}: {source}", .path.display())]
    EngineLaunch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("engine could not bind its control port, another instance is running: {0}")]
    EngineBindConflict(String),
    #[error("engine control API at {url} not reachable after {attempts} attempts")]
    EngineUnreachable { url: String, attempts: u32 },
    #[error("engine exited unexpectedly ({0})")]
    EngineExited(String),
    #[error("route '{route}' rejected: {source}")]
    RouteConfig {
        route: String,
        #[source]
        source: ControlApiError,
    },
    #[error("interrupted while {0}")]
    Interrupted(State),
    #[error("no engine release for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },
    #[error("engine download from {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: ControlApiError,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Process exit code for this failure. Distinct per phase so scripts can
    /// tell a bad scenario name apart from an engine or route problem.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ConfigMissing(_) | Self::ConfigInvalid { .. } => 2,
            Self::ScenarioNotFound { .. } => 3,
            Self::EngineNotFound(_) => 4,
            Self::EngineLaunch { .. }
            | Self::EngineBindConflict(_)
            | Self::EngineUnreachable { .. }
            | Self::EngineExited(_) => 5,
            Self::RouteConfig { .. } => 6,
            Self::Interrupted(_) => 130,
            Self::UnsupportedPlatform { .. } | Self::Download { .. } | Self::Io(_) => 1,
        }
    }

    pub(crate) fn invalid(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ConfigInvalid {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A single toxic the engine refused. Reported, never fatal.
#[derive(Debug, Error)]
#[error("{kind} toxic not applied to '{route}': {source}")]
pub struct ToxicApplyWarning {
    pub kind: ToxicKind,
    pub route: String,
    #[source]
    pub source: ControlApiError,
}
