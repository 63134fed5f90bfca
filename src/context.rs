//! Per-process state threaded through every operation.

use crate::compose::version::ComposeBinary;
use crate::compose::{ComposeDriver, ComposeRunner};
use crate::docker::{ContainerEngine, DockerClient};
use crate::error::Result;
use crate::global::GlobalState;
use crate::host::{self, HostProfile};
use crate::project::settings::{CmsSettings, SettingsRenderer};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Environment switches read once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvFlags {
    pub debug: bool,
    pub verbose: bool,
    pub no_instrumentation: bool,
    pub noninteractive: bool,
    pub no_color: bool,
}

fn flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => !matches!(v.trim().to_lowercase().as_str(), "" | "0" | "false" | "no"),
        Err(_) => false,
    }
}

impl EnvFlags {
    pub fn from_env() -> Self {
        Self {
            debug: flag("DDEV_DEBUG"),
            verbose: flag("DDEV_VERBOSE"),
            no_instrumentation: flag("DDEV_NO_INSTRUMENTATION"),
            noninteractive: flag("DDEV_NONINTERACTIVE"),
            // NO_COLOR counts when present at all.
            no_color: std::env::var_os("NO_COLOR").is_some(),
        }
    }
}

pub struct Context {
    engine: Arc<dyn ContainerEngine>,
    compose: Arc<dyn ComposeRunner>,
    state: GlobalState,
    settings: Arc<dyn SettingsRenderer>,
    cancel: CancellationToken,
    flags: EnvFlags,
    host: OnceCell<HostProfile>,
}

impl Context {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        compose: Arc<dyn ComposeRunner>,
        state: GlobalState,
    ) -> Self {
        Self {
            engine,
            compose,
            state,
            settings: Arc::new(CmsSettings),
            cancel: CancellationToken::new(),
            flags: EnvFlags::default(),
            host: OnceCell::new(),
        }
    }

    /// The production wiring: docker CLI, managed docker-compose, user config dir.
    pub fn from_env() -> Result<Self> {
        let state = GlobalState::from_env()?;
        let global = state.load()?;
        let binary = ComposeBinary::new(
            state.bin_dir(),
            global.use_docker_compose_from_path,
            global.required_compose_version(),
        );
        Ok(Self::new(
            Arc::new(DockerClient::new()),
            Arc::new(ComposeDriver::new(binary)),
            state,
        )
        .with_flags(EnvFlags::from_env()))
    }

    pub fn with_flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsRenderer>) -> Self {
        self.settings = settings;
        self
    }

    /// Skip probing and use `profile`.
    pub fn with_host(self, profile: HostProfile) -> Self {
        let _ = self.host.set(profile);
        self
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn compose(&self) -> &dyn ComposeRunner {
        self.compose.as_ref()
    }

    pub fn state(&self) -> &GlobalState {
        &self.state
    }

    pub fn settings(&self) -> &dyn SettingsRenderer {
        self.settings.as_ref()
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn flags(&self) -> EnvFlags {
        self.flags
    }

    /// The host profile, probed on first use.
    pub async fn host(&self) -> Result<&HostProfile> {
        self.host
            .get_or_try_init(|| async {
                let global = self.state.load()?;
                host::probe(self.engine.as_ref(), &global.xdebug_ide_location, &self.cancel).await
            })
            .await
    }
}
