//! Managed fleet service backend.
//!
//! Instances live in an organization on a hosted service and are reached
//! only through its API: lifecycle calls are REST requests and commands run
//! through the exec endpoint. Interactive sessions go through the service's
//! own CLI.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bootstrap::{BootstrapParams, BootstrapPlan, OverlayJoin};
use crate::cancel::CancelSignal;
use crate::cleanup::with_cleanup;
use crate::error::{FleetError, Result};
use crate::provider::{wait_for_shell, Backend, Provider, ProviderContext};
use crate::settings::ReadinessSettings;
use crate::shell::{CommandOutput, Connector, RemoteShell, DIAGNOSTIC_TAIL};
use crate::vm::{Endpoint, Vm, VmStatus};

/// An instance as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    command: [&'a str; 3],
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    exit_code: i32,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

/// HTTP client for one organization on the fleet service.
#[derive(Debug, Clone)]
pub struct FleetClient {
    client: reqwest::Client,
    base_url: String,
    org: String,
}

impl FleetClient {
    /// Create a client for `org`, authenticating with `token` if given.
    pub fn new(api_url: &str, org: impl Into<String>, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                FleetError::Configuration("fleet token contains invalid characters".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
            org: org.into(),
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/orgs/{}/instances{}", self.base_url, self.org, path)
    }

    /// Create an instance.
    pub async fn create(&self, name: &str) -> Result<InstanceRecord> {
        let response = self
            .client
            .post(self.url(""))
            .json(&CreateRequest { name })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Fetch an instance; `None` if the service does not know it.
    pub async fn get(&self, name: &str) -> Result<Option<InstanceRecord>> {
        let response = self.client.get(self.url(&format!("/{name}"))).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    /// List instances, optionally filtered by name prefix.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<InstanceRecord>> {
        let mut request = self.client.get(self.url(""));
        if let Some(prefix) = prefix {
            request = request.query(&[("prefix", prefix)]);
        }
        let response = Self::check(request.send().await?).await?;
        let listing: ListResponse = response.json().await?;
        Ok(listing
            .instances
            .into_iter()
            .filter(|i| prefix.is_none_or(|p| i.name.starts_with(p)))
            .collect())
    }

    /// Delete an instance. Returns false if it did not exist.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.url(&format!("/{name}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }

    /// Run `command` through `bash -c` on an instance.
    pub async fn exec(&self, name: &str, command: &str) -> Result<CommandOutput> {
        let response = self
            .client
            .post(self.url(&format!("/{name}/exec")))
            .json(&ExecRequest {
                command: ["bash", "-c", command],
            })
            .send()
            .await?;
        let result: ExecResponse = Self::check(response).await?.json().await?;
        Ok(CommandOutput {
            status: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|json| json.get("error")?.as_str().map(str::to_string))
            .unwrap_or(body);
        Err(FleetError::Api {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

/// Shell on one fleet instance through the exec endpoint.
#[derive(Debug, Clone)]
pub struct FleetShell {
    client: FleetClient,
    name: String,
}

impl FleetShell {
    pub fn new(client: FleetClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }
}

#[async_trait]
impl RemoteShell for FleetShell {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!(name = %self.name, "Running command through fleet exec");
        self.client.exec(&self.name, command).await
    }
}

/// Connects to instances with fleet endpoints in the client's organization.
#[derive(Debug, Clone)]
pub struct FleetConnector {
    client: FleetClient,
}

impl FleetConnector {
    pub fn new(client: FleetClient) -> Self {
        Self { client }
    }
}

impl Connector for FleetConnector {
    fn connect(&self, vm: &Vm) -> Result<Arc<dyn RemoteShell>> {
        match &vm.endpoint {
            Endpoint::Fleet { org, name } if org == self.client.org() => {
                Ok(Arc::new(FleetShell::new(self.client.clone(), name.clone())))
            }
            other => Err(FleetError::Configuration(format!(
                "{other} is not an instance of fleet org '{}'",
                self.client.org()
            ))),
        }
    }
}

/// Argv running `command` interactively on an instance through the
/// service CLI.
pub fn exec_argv(cli: &str, org: &str, name: &str, command: &str) -> Vec<String> {
    [cli, "exec", "-o", org, "-s", name, "-tty", "bash", "-c", command]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Provider for managed fleet instances.
pub struct FleetProvider {
    client: FleetClient,
    connector: Arc<dyn Connector>,
    overlay: Option<OverlayJoin>,
    public_key: String,
    agent_install_url: String,
    readiness: ReadinessSettings,
    cancel: CancelSignal,
}

impl FleetProvider {
    pub const NAME: &'static str = "fleet";

    pub fn new(ctx: &ProviderContext, client: FleetClient) -> Self {
        let settings = &ctx.settings;
        let overlay = settings.overlay.auth_key.clone().map(|secret| OverlayJoin {
            secret,
            tag: settings.overlay.ship_tag.clone(),
        });
        Self {
            connector: Arc::new(FleetConnector::new(client.clone())),
            client,
            overlay,
            public_key: ctx.keys.public_key.clone(),
            agent_install_url: settings.agent.install_url.clone(),
            readiness: settings.readiness.clone(),
            cancel: ctx.cancel.clone(),
        }
    }

    /// Registry constructor.
    pub fn backend(ctx: &ProviderContext) -> Result<Backend> {
        let fleet = &ctx.settings.fleet;
        let org = fleet.org.as_deref().ok_or_else(|| {
            FleetError::Configuration(
                "fleet organization is not set (fleet.org or FLOTILLA_FLEET_ORG)".to_string(),
            )
        })?;
        let token = fleet.token.as_deref().ok_or_else(|| {
            FleetError::Configuration("fleet token is not set (FLOTILLA_FLEET_TOKEN)".to_string())
        })?;

        let client = FleetClient::new(&fleet.api_url, org, Some(token))?;
        let provider = Self::new(ctx, client.clone());
        let connector = Arc::clone(&provider.connector);
        Ok(Backend {
            name: Self::NAME,
            provider: Arc::new(provider),
            connector,
        })
    }

    fn to_vm(&self, record: InstanceRecord) -> Vm {
        let status = record
            .status
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(VmStatus::Pending);
        Vm {
            id: record.name.clone(),
            endpoint: Endpoint::Fleet {
                org: self.client.org().to_string(),
                name: record.name.clone(),
            },
            name: record.name,
            status,
        }
    }

    async fn provision(&self, vm: &Vm, overlay: &OverlayJoin) -> Result<()> {
        let ready = self
            .wait_ready(vm, self.readiness.timeout(), self.readiness.interval())
            .await?;
        if !ready {
            return Err(FleetError::provision(format!(
                "{} never accepted exec requests",
                vm.name
            )));
        }

        let plan = BootstrapPlan::full(BootstrapParams {
            hostname: vm.name.clone(),
            public_key: self.public_key.clone(),
            private_key: None,
            overlay: Some(overlay.clone()),
            gateway: None,
            agent_install_url: self.agent_install_url.clone(),
        });

        info!(name = %vm.name, "Bootstrapping fleet instance");
        let output = self.client.exec(&vm.name, &plan.render()).await?;
        if !output.success() {
            return Err(FleetError::provision_with(
                format!("bootstrap of {} exited with status {}", vm.name, output.status),
                output.tail(DIAGNOSTIC_TAIL),
            ));
        }
        info!(name = %vm.name, output = %output.tail(DIAGNOSTIC_TAIL), "Bootstrap output");
        Ok(())
    }
}

#[async_trait]
impl Provider for FleetProvider {
    async fn create(&self, name: &str, wait: bool) -> Result<Vm> {
        let overlay = self.overlay.as_ref().ok_or_else(|| {
            FleetError::Configuration(
                "overlay auth key is not set (FLOTILLA_OVERLAY_AUTH_KEY)".to_string(),
            )
        })?;

        let record = self.client.create(name).await.map_err(|e| {
            FleetError::provision(format!("fleet service refused to create {name}: {e}"))
        })?;
        let mut vm = self.to_vm(record);
        info!(name = %vm.name, endpoint = %vm.endpoint, "Instance created");

        if !wait {
            return Ok(vm);
        }

        with_cleanup(name, self.provision(&vm, overlay), || self.destroy(name)).await?;
        vm.status = VmStatus::Running;
        Ok(vm)
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        if self.client.delete(id).await? {
            info!(id = %id, "Deleted fleet instance");
        } else {
            debug!(id = %id, "Destroy of unknown instance ignored");
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vm>> {
        Ok(self.client.get(id).await?.map(|r| self.to_vm(r)))
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<Vm>> {
        Ok(self
            .client
            .list(prefix)
            .await?
            .into_iter()
            .map(|r| self.to_vm(r))
            .collect())
    }

    async fn wait_ready(&self, vm: &Vm, timeout: Duration, interval: Duration) -> Result<bool> {
        wait_for_shell(self.connector.as_ref(), vm, timeout, interval, &self.cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = FleetClient::new("https://api.example.com/", "acme", None).unwrap();
        assert_eq!(
            client.url("/voyage-abc-ship0/exec"),
            "https://api.example.com/v1/orgs/acme/instances/voyage-abc-ship0/exec"
        );
    }

    #[test]
    fn test_exec_argv() {
        let argv = exec_argv("sprite", "acme", "voyage-abc-ship0", "echo hi");
        assert_eq!(
            argv,
            vec![
                "sprite",
                "exec",
                "-o",
                "acme",
                "-s",
                "voyage-abc-ship0",
                "-tty",
                "bash",
                "-c",
                "echo hi"
            ]
        );
    }

    #[test]
    fn test_connector_rejects_foreign_endpoints() {
        let client = FleetClient::new("http://localhost", "acme", None).unwrap();
        let connector = FleetConnector::new(client);

        let other_org = Vm::running(
            "n",
            Endpoint::Fleet {
                org: "other".into(),
                name: "n".into(),
            },
        );
        assert!(connector.connect(&other_org).is_err());

        let ssh = Vm::running("n", Endpoint::ssh(None, "10.0.0.1"));
        assert!(connector.connect(&ssh).is_err());
    }
}
