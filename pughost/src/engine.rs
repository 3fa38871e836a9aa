//! Finding and fetching the Toxiproxy server binary.

use std::env;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::control::ControlApiError;
use crate::error::{Error, Result};

/// Toxiproxy release fetched by `install`.
pub const ENGINE_VERSION: &str = "v2.11.0";

/// Environment override for the engine executable path.
pub const ENGINE_ENV: &str = "PUGHOST_ENGINE";

const RELEASE_BASE: &str = "https://github.com/Shopify/toxiproxy/releases/download";

/// Release naming for the host, e.g. `linux`/`amd64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub fn detect() -> Result<Self> {
        Self::from_parts(env::consts::OS, env::consts::ARCH)
    }

    fn from_parts(os: &str, arch: &str) -> Result<Self> {
        let unsupported = || Error::UnsupportedPlatform {
            os: os.to_owned(),
            arch: arch.to_owned(),
        };

        let os = match os {
            "macos" => "darwin",
            "linux" => "linux",
            "windows" => "windows",
            _ => return Err(unsupported()),
        };
        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" if os != "darwin" => "386",
            _ => return Err(unsupported()),
        };

        Ok(Self { os, arch })
    }

    fn exe_suffix(&self) -> &'static str {
        if self.os == "windows" {
            ".exe"
        } else {
            ""
        }
    }

    /// Asset name on the release page.
    pub fn binary_name(&self) -> String {
        format!(
            "toxiproxy-server-{}-{}{}",
            self.os,
            self.arch,
            self.exe_suffix()
        )
    }

    /// File name the binary is installed under.
    pub fn installed_name(&self) -> String {
        format!("toxiproxy-server{}", self.exe_suffix())
    }

    pub fn download_url(&self, version: &str) -> String {
        format!("{RELEASE_BASE}/{version}/{}", self.binary_name())
    }
}

/// Resolves the engine executable. An explicit path wins over `PUGHOST_ENGINE`,
/// which wins over the install directory.
#[derive(Debug, Clone)]
pub struct EngineLocator {
    explicit: Option<PathBuf>,
    install_dir: PathBuf,
}

impl EngineLocator {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            explicit: None,
            install_dir: install_dir.into(),
        }
    }

    pub fn with_explicit(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    /// The path that will be tried, whether or not it exists.
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.explicit {
            return path.clone();
        }
        if let Some(path) = env::var_os(ENGINE_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(path);
        }

        let name = Platform::detect()
            .map(|p| p.installed_name())
            .unwrap_or_else(|_| "toxiproxy-server".to_owned());
        self.install_dir.join(name)
    }

    /// Resolve and check the executable is present.
    pub fn locate(&self) -> Result<PathBuf> {
        let path = self.resolve();
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::EngineNotFound(path))
        }
    }
}

/// Download the engine for `platform` into `dir`, returning the installed path.
pub async fn install(dir: &Path, platform: &Platform, version: &str) -> Result<PathBuf> {
    let url = platform.download_url(version);
    info!("Fetching engine {version} for {}/{}", platform.os, platform.arch);

    let download_err = |source: ControlApiError| Error::Download {
        url: url.clone(),
        source,
    };

    let resp = reqwest::get(&url)
        .await
        .map_err(|e| download_err(e.into()))?;
    if !resp.status().is_success() {
        let status = resp.status();
        return Err(download_err(ControlApiError::Api {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_owned(),
        }));
    }
    let bytes = resp.bytes().await.map_err(|e| download_err(e.into()))?;

    fs::create_dir_all(dir).await?;
    let path = dir.join(platform.installed_name());
    fs::write(&path, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
    }

    info!("Engine installed at {}", path.display());
    Ok(path)
}
