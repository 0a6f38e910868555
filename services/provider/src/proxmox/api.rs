//! Proxmox VE HTTP API client.
//!
//! Authenticates with a ticket (`POST /access/ticket`) and sends it as the
//! `PVEAuthCookie` cookie on later requests; mutating requests also carry the
//! `CSRFPreventionToken` header. Mutating guest calls start an asynchronous
//! task whose UPID is polled until it stops.
//!
//! Reference: https://pve.proxmox.com/pve-docs/api-viewer/

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use pxp_id::VmId;
use reqwest::header::COOKIE;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use super::types::{Envelope, IdValue, TaskStatus, TicketData};
use crate::config::{ConfigError, ProviderConfig};
use crate::error::{ApiError, ProviderError};
use crate::hypervisor::{HypervisorApi, VmConfig, VmSpec};

/// Default delay between task status polls.
pub const DEFAULT_TASK_POLL_INTERVAL: Duration = Duration::from_secs(1);

const CSRF_HEADER: &str = "CSRFPreventionToken";

struct AuthTicket {
    ticket: String,
    csrf_token: String,
}

/// Proxmox VE API client.
///
/// Safe to share between tasks; the ticket is only written by `login`.
pub struct ProxmoxClient {
    client: reqwest::Client,
    base_url: Url,
    user: String,
    password: String,
    auth: RwLock<Option<AuthTicket>>,
    task_poll_interval: Duration,
}

impl ProxmoxClient {
    /// Create a client bound to the configured API URL. Does not log in.
    ///
    /// Certificate verification is disabled only when `tls_insecure` is set.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        config.validate()?;

        let base_url = Url::parse(config.api_url.trim_end_matches('/')).map_err(|e| {
            ConfigError::InvalidUrl {
                url: config.api_url.clone(),
                message: e.to_string(),
            }
        })?;

        if config.tls_insecure {
            warn!(api_url = %config.api_url, "TLS certificate verification disabled");
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.tls_insecure)
            .build()
            .map_err(ApiError::Http)?;

        Ok(Self {
            client,
            base_url,
            user: config.user.clone(),
            password: config.password().to_string(),
            auth: RwLock::new(None),
            task_poll_interval: DEFAULT_TASK_POLL_INTERVAL,
        })
    }

    /// Override the delay between task status polls.
    pub fn with_task_poll_interval(mut self, interval: Duration) -> Self {
        self.task_poll_interval = interval;
        self
    }

    /// Whether a ticket is held.
    pub fn is_authenticated(&self) -> bool {
        self.auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Poll a task until it stops.
    pub async fn wait_for_task(&self, node: &str, upid: &str) -> Result<(), ApiError> {
        loop {
            let status: TaskStatus = self
                .request(Method::GET, &["nodes", node, "tasks", upid, "status"], &[], &[])
                .await?;

            if !status.is_running() {
                if status.is_ok() {
                    debug!(node = node, upid = upid, "Proxmox task finished");
                    return Ok(());
                }
                let exit_status = status.exitstatus.unwrap_or_else(|| "unknown".to_string());
                error!(node = node, upid = upid, exit_status = %exit_status, "Proxmox task failed");
                return Err(ApiError::Task {
                    upid: upid.to_string(),
                    exit_status,
                });
            }

            tokio::time::sleep(self.task_poll_interval).await;
        }
    }

    async fn settle(&self, node: &str, upid: Option<String>) -> Result<(), ApiError> {
        match upid {
            Some(upid) => self.wait_for_task(node, &upid).await,
            None => Ok(()),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder, mutating: bool) -> Result<RequestBuilder, ApiError> {
        let auth = self.auth.read().unwrap_or_else(PoisonError::into_inner);
        let ticket = auth.as_ref().ok_or(ApiError::NotAuthenticated)?;

        let mut request = request.header(COOKIE, format!("PVEAuthCookie={}", ticket.ticket));
        if mutating {
            request = request.header(CSRF_HEADER, ticket.csrf_token.as_str());
        }
        Ok(request)
    }

    /// Perform an authenticated request and unwrap the `data` payload.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        form: &[(String, String)],
    ) -> Result<T, ApiError> {
        let url = self.endpoint(segments)?;
        debug!(method = %method, path = %url.path(), "Request to Proxmox API");

        let mutating = method != Method::GET;
        let mut request = self.authorize(self.client.request(method, url), mutating)?;
        if !query.is_empty() {
            request = request.query(query);
        }
        if !form.is_empty() {
            request = request.form(form);
        }

        read_data(request.send().await?).await
    }
}

async fn read_data<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::Api {
            status: status.as_u16(),
            message: error_message(status, &body),
        });
    }

    let envelope: Envelope<T> = serde_json::from_str(&body)?;
    Ok(envelope.data)
}

fn error_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() || body == r#"{"data":null}"# {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.to_string()
    }
}

fn is_id_taken(err: &ApiError) -> bool {
    matches!(err, ApiError::Api { status: 400, message } if message.contains("already exists"))
}

#[async_trait]
impl HypervisorApi for ProxmoxClient {
    async fn login(&self) -> Result<(), ApiError> {
        let url = self.endpoint(&["access", "ticket"])?;
        debug!(user = %self.user, "Requesting Proxmox API ticket");

        let response = self
            .client
            .post(url)
            .form(&[
                ("username", self.user.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        let data: TicketData = read_data(response).await.inspect_err(|e| {
            error!(user = %self.user, error = %e, "Proxmox login failed");
        })?;

        *self.auth.write().unwrap_or_else(PoisonError::into_inner) = Some(AuthTicket {
            ticket: data.ticket,
            csrf_token: data.csrf_prevention_token,
        });
        debug!(user = %self.user, "Proxmox API ticket acquired");
        Ok(())
    }

    async fn next_free_id(&self, floor: u32) -> Result<VmId, ApiError> {
        if floor < VmId::MIN.value() {
            let id: IdValue = self
                .request(Method::GET, &["cluster", "nextid"], &[], &[])
                .await?;
            return id.into_vm_id();
        }

        // The API only says whether one candidate is free, so walk upwards.
        // Only a 400 saying "already exists" counts as taken; a 200 carrying
        // an `errors` object is not treated as a rejection.
        for candidate in floor..=VmId::MAX.value() {
            let answer: Result<IdValue, ApiError> = self
                .request(
                    Method::GET,
                    &["cluster", "nextid"],
                    &[("vmid", candidate.to_string())],
                    &[],
                )
                .await;

            match answer {
                Ok(id) => return id.into_vm_id(),
                Err(e) if is_id_taken(&e) => {
                    debug!(candidate, "VM id taken, probing next");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ApiError::IdSpaceExhausted { floor })
    }

    async fn create_vm(&self, node: &str, id: VmId, spec: &VmSpec) -> Result<(), ApiError> {
        let mut form = vec![("vmid".to_string(), id.to_string())];
        form.extend(spec.to_params());

        let upid: Option<String> = self
            .request(Method::POST, &["nodes", node, "qemu"], &[], &form)
            .await?;
        self.settle(node, upid).await
    }

    async fn read_vm(&self, node: &str, id: VmId) -> Result<VmConfig, ApiError> {
        let id = id.to_string();
        self.request(Method::GET, &["nodes", node, "qemu", id.as_str(), "config"], &[], &[])
            .await
    }

    async fn update_vm(&self, node: &str, id: VmId, spec: &VmSpec) -> Result<(), ApiError> {
        let id = id.to_string();
        let upid: Option<String> = self
            .request(
                Method::POST,
                &["nodes", node, "qemu", id.as_str(), "config"],
                &[],
                &spec.to_params(),
            )
            .await?;
        self.settle(node, upid).await
    }

    async fn delete_vm(&self, node: &str, id: VmId) -> Result<(), ApiError> {
        let id = id.to_string();
        let upid: Option<String> = self
            .request(Method::DELETE, &["nodes", node, "qemu", id.as_str()], &[], &[])
            .await?;
        self.settle(node, upid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> ProxmoxClient {
        ProxmoxClient::new(&ProviderConfig::new(url, "root@pam", "pw")).unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let client = client("https://pve.example:8006/api2/json/");
        let url = client.endpoint(&["nodes", "pve1", "qemu", "100", "config"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://pve.example:8006/api2/json/nodes/pve1/qemu/100/config"
        );
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = client("https://pve.example:8006/api2/json");
        let url = client.endpoint(&["nodes", "a/b"]).unwrap();
        assert_eq!(url.path(), "/api2/json/nodes/a%2Fb");
    }

    #[test]
    fn test_requests_need_login() {
        let client = client("https://pve.example:8006/api2/json");
        assert!(!client.is_authenticated());
        let result = client.authorize(client.client.get("https://pve.example"), false);
        assert!(matches!(result, Err(ApiError::NotAuthenticated)));
    }

    #[test]
    fn test_error_message_prefers_body() {
        assert_eq!(
            error_message(StatusCode::UNAUTHORIZED, r#"{"data":null}"#),
            "Unauthorized"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"errors":{"vmid":"VM 100 already exists"}}"#),
            r#"{"errors":{"vmid":"VM 100 already exists"}}"#
        );
    }

    #[test]
    fn test_is_id_taken() {
        assert!(is_id_taken(&ApiError::Api {
            status: 400,
            message: "VM 100 already exists".to_string(),
        }));
        assert!(!is_id_taken(&ApiError::Api {
            status: 400,
            message: "value must be a positive integer".to_string(),
        }));
        assert!(!is_id_taken(&ApiError::Api {
            status: 500,
            message: "VM 100 already exists".to_string(),
        }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ProxmoxClient::new(&ProviderConfig::new("", "root@pam", "pw"));
        assert!(matches!(
            result,
            Err(ProviderError::Config(ConfigError::EmptyUrl))
        ));
    }
}
