//! In-memory provider and scripted shells for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::provider::Provider;
use crate::shell::{CommandOutput, Connector, RemoteShell};
use crate::vm::{Endpoint, Vm};

/// Provider whose instances exist only in memory.
///
/// Creation can be made to fail for chosen names, and destroy calls are
/// recorded so tests can assert on cleanup.
#[derive(Default)]
pub struct MockProvider {
    vms: RwLock<Vec<Vm>>,
    fail_names: HashSet<String>,
    destroyed: Mutex<Vec<String>>,
    ip_counter: AtomicU32,
}

impl MockProvider {
    /// Create a new mock provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock provider whose `create` fails for every name in `names`.
    pub fn failing<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fail_names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Ids passed to `destroy`, in call order.
    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn next_endpoint(&self) -> Endpoint {
        let n = self.ip_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Endpoint::ssh_on(Some("ubuntu"), format!("100.64.0.{n}"), 2222)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn create(&self, name: &str, _wait: bool) -> Result<Vm> {
        if self.fail_names.contains(name) {
            info!(name = %name, "[MOCK] Failing create");
            return Err(FleetError::provision_with(
                format!("mock provider refused to create {name}"),
                "mock bootstrap output",
            ));
        }

        let mut vms = self.vms.write().await;
        if vms.iter().any(|vm| vm.name == name) {
            return Err(FleetError::provision(format!("{name} already exists")));
        }

        let vm = Vm::running(name, self.next_endpoint());
        info!(name = %name, endpoint = %vm.endpoint, "[MOCK] Created instance");
        vms.push(vm.clone());
        Ok(vm)
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        if let Ok(mut destroyed) = self.destroyed.lock() {
            destroyed.push(id.to_string());
        }
        let mut vms = self.vms.write().await;
        vms.retain(|vm| vm.id != id);
        debug!(id = %id, "[MOCK] Destroyed instance");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vm>> {
        let vms = self.vms.read().await;
        Ok(vms.iter().find(|vm| vm.id == id).cloned())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<Vm>> {
        let vms = self.vms.read().await;
        Ok(vms
            .iter()
            .filter(|vm| prefix.is_none_or(|p| vm.name.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn wait_ready(&self, vm: &Vm, _timeout: Duration, _interval: Duration) -> Result<bool> {
        Ok(self.get(&vm.id).await?.is_some())
    }
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    output: CommandOutput,
    once: bool,
}

#[derive(Debug, Default)]
struct ShellState {
    rules: Vec<Rule>,
    commands: Vec<String>,
    files: HashMap<String, Vec<u8>>,
}

/// A [`RemoteShell`] that records commands and answers from a script.
///
/// Rules match when their pattern is a substring of the command; the first
/// matching rule wins. One-shot rules are consumed. Without a match, `cat`
/// of a previously `put` path returns its contents and anything else
/// succeeds with empty output. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedShell {
    state: Arc<Mutex<ShellState>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next command containing `pattern` with `output`.
    pub fn respond(self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.push_rule(pattern.into(), output, true)
    }

    /// Answer every command containing `pattern` with `output`.
    pub fn always(self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.push_rule(pattern.into(), output, false)
    }

    /// Seed a file as if it had been written.
    pub fn with_file(self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.files.insert(path.into(), contents.into());
        }
        self
    }

    /// Every command run so far (uploads appear as `put <path>`).
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    /// Contents written to `path`, as UTF-8.
    pub fn file(&self, path: &str) -> Option<String> {
        let state = self.state.lock().ok()?;
        state
            .files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Returns true if some command contains `needle`.
    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }

    fn push_rule(self, pattern: String, output: CommandOutput, once: bool) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.rules.push(Rule {
                pattern,
                output,
                once,
            });
        }
        self
    }

    fn answer(&self, command: &str) -> CommandOutput {
        let Ok(mut state) = self.state.lock() else {
            return CommandOutput::failed(-1, "scripted shell poisoned");
        };
        state.commands.push(command.to_string());

        if let Some(pos) = state
            .rules
            .iter()
            .position(|rule| command.contains(&rule.pattern))
        {
            let output = state.rules[pos].output.clone();
            if state.rules[pos].once {
                state.rules.remove(pos);
            }
            return output;
        }

        if let Some(path) = command.strip_prefix("cat ") {
            if let Some(contents) = state.files.get(path.trim()) {
                return CommandOutput::ok(String::from_utf8_lossy(contents).into_owned());
            }
            return CommandOutput::failed(1, format!("cat: {path}: No such file or directory"));
        }

        CommandOutput::ok("")
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        Ok(self.answer(command))
    }

    async fn put(&self, contents: &[u8], path: &str) -> Result<()> {
        let output = self.answer(&format!("put {path}"));
        if !output.success() {
            return Err(FleetError::Command {
                command: format!("put {path}"),
                status: output.status,
                output: output.combined(),
            });
        }
        if let Ok(mut state) = self.state.lock() {
            state.files.insert(path.to_string(), contents.to_vec());
        }
        Ok(())
    }
}

/// Connector handing out [`ScriptedShell`]s.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    default: ScriptedShell,
    shells: HashMap<String, ScriptedShell>,
    connected: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    /// A connector returning `shell` for every instance.
    pub fn new(shell: ScriptedShell) -> Self {
        Self {
            default: shell,
            ..Self::default()
        }
    }

    /// Use `shell` for the instance named `name`.
    pub fn with_shell(mut self, name: impl Into<String>, shell: ScriptedShell) -> Self {
        self.shells.insert(name.into(), shell);
        self
    }

    /// The shell that would be used for `name`.
    pub fn shell(&self, name: &str) -> ScriptedShell {
        self.shells.get(name).unwrap_or(&self.default).clone()
    }

    /// Names of instances connected to, in order.
    pub fn connected(&self) -> Vec<String> {
        self.connected
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl Connector for MockConnector {
    fn connect(&self, vm: &Vm) -> Result<Arc<dyn RemoteShell>> {
        if let Ok(mut connected) = self.connected.lock() {
            connected.push(vm.name.clone());
        }
        Ok(Arc::new(self.shell(&vm.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_create_and_list() {
        let provider = MockProvider::new();
        provider.create("voyage-a-storage", true).await.unwrap();
        provider.create("voyage-a-ship0", true).await.unwrap();
        provider.create("other", true).await.unwrap();

        let names: Vec<_> = provider
            .list(Some("voyage-a"))
            .await
            .unwrap()
            .into_iter()
            .map(|vm| vm.name)
            .collect();
        assert_eq!(names, vec!["voyage-a-storage", "voyage-a-ship0"]);
    }

    #[tokio::test]
    async fn test_mock_provider_failing() {
        let provider = MockProvider::failing(["bad"]);
        let err = provider.create("bad", true).await.unwrap_err();
        assert_eq!(err.reason_code(), "provision_failed");
        assert!(provider.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_shell_rules() {
        let shell = ScriptedShell::new()
            .respond("git clone", CommandOutput::failed(128, "fatal: repository not found"))
            .always("whoami", CommandOutput::ok("ubuntu\n"));

        assert_eq!(shell.run("git clone x").await.unwrap().status, 128);
        assert!(shell.run("git clone x").await.unwrap().success());
        assert_eq!(shell.run("whoami").await.unwrap().stdout, "ubuntu\n");
        assert_eq!(shell.run("whoami").await.unwrap().stdout, "ubuntu\n");
        assert_eq!(shell.commands().len(), 4);
    }

    #[tokio::test]
    async fn test_scripted_shell_files() {
        let shell = ScriptedShell::new();
        shell.put(b"hello", "~/voyage/prompt.md").await.unwrap();

        assert_eq!(shell.file("~/voyage/prompt.md").as_deref(), Some("hello"));
        let out = shell.run("cat ~/voyage/prompt.md").await.unwrap();
        assert_eq!(out.stdout, "hello");
        assert!(!shell.run("cat ~/missing").await.unwrap().success());
    }
}
