//! The provider capability contract and the registry of backends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::backends::{FleetProvider, LocalProvider, RemoteHostProvider};
use crate::cancel::CancelSignal;
use crate::error::{FleetError, Result};
use crate::poll::{poll_until_ready, Probe};
use crate::settings::Settings;
use crate::shell::Connector;
use crate::ssh::SshKeyPair;
use crate::vm::Vm;

/// Instance lifecycle operations a backend provides.
///
/// Implementations own their transport state; callers only see [`Vm`]s.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create and bootstrap an instance named `name`.
    ///
    /// With `wait`, returns only once the instance is reachable. On failure
    /// the partial instance is torn down before the error is returned.
    async fn create(&self, name: &str, wait: bool) -> Result<Vm>;

    /// Destroy an instance. Unknown ids are a no-op.
    async fn destroy(&self, id: &str) -> Result<()>;

    /// Look up an instance.
    async fn get(&self, id: &str) -> Result<Option<Vm>>;

    /// Instances whose name starts with `prefix`, in creation order.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<Vm>>;

    /// Poll until `vm` answers a shell probe.
    ///
    /// Returns `Ok(false)` on timeout. Cancellation is an error.
    async fn wait_ready(&self, vm: &Vm, timeout: Duration, interval: Duration) -> Result<bool>;
}

/// Probe `vm` with `echo ready` through `connector` until it answers.
pub async fn wait_for_shell(
    connector: &dyn Connector,
    vm: &Vm,
    timeout: Duration,
    interval: Duration,
    cancel: &CancelSignal,
) -> Result<bool> {
    poll_until_ready(&vm.name, timeout, interval, cancel, || async {
        let result: Result<bool> = async {
            let shell = connector.connect(vm)?;
            let output = shell.run("echo ready").await?;
            Ok(output.success() && output.stdout.trim() == "ready")
        }
        .await;
        match result {
            // A connector that cannot address this endpoint never will.
            Err(e @ FleetError::Configuration(_)) => Probe::Fatal(e),
            other => Probe::from_result(other),
        }
    })
    .await
}

/// A provider together with the connector that reaches its instances.
#[derive(Clone)]
pub struct Backend {
    pub name: &'static str,
    pub provider: Arc<dyn Provider>,
    pub connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name).finish()
    }
}

/// Everything a backend needs to be built.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub settings: Settings,
    pub keys: SshKeyPair,
    pub cancel: CancelSignal,
}

/// Builds a backend from the shared context.
pub type Constructor = fn(&ProviderContext) -> Result<Backend>;

/// Backend name → constructor, populated once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of built-in backends.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(LocalProvider::NAME, LocalProvider::backend);
        registry.register(RemoteHostProvider::NAME, RemoteHostProvider::backend);
        registry.register(FleetProvider::NAME, FleetProvider::backend);
        registry
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: &'static str, constructor: Constructor) -> &mut Self {
        self.constructors.insert(name, constructor);
        self
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build the backend registered under `name`.
    pub fn build(&self, name: &str, ctx: &ProviderContext) -> Result<Backend> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            FleetError::Configuration(format!(
                "unknown provider '{name}' (available: {})",
                self.names().join(", ")
            ))
        })?;
        debug!(provider = %name, "Building provider");
        constructor(ctx)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}
