//! HTTP client for the external provisioning service.
//!
//! This module provides the `Provisioner` trait the pool uses to create
//! billing projects, poll their creation status and hand them to users.

use std::time::Duration;

use async_trait::async_trait;
use billing_buffer_core::{ResourceName, Tier};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionResult};

/// Trait for provisioning service communication.
///
/// This trait abstracts the provisioning client interface, allowing for
/// mock implementations in tests.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Ask the service to start creating a resource.
    ///
    /// Creation is asynchronous; completion is observed via
    /// [`Provisioner::get_create_status`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the service rejects it.
    async fn start_create(&self, name: &ResourceName, params: &TierParams) -> ProvisionResult<()>;

    /// Poll the creation status of a resource.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::NotFound` if the service has no record of the
    /// resource, or another error if the request fails.
    async fn get_create_status(&self, name: &ResourceName) -> ProvisionResult<CreationStatus>;

    /// Grant a principal ownership of a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the service rejects it.
    async fn grant_access(&self, principal: &str, name: &ResourceName) -> ProvisionResult<()>;
}

/// Per-tier parameters passed along with a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierParams {
    /// The tier the resource is created for.
    pub tier: Tier,
    /// Service perimeter the resource must be placed in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_perimeter: Option<String>,
}

/// Outcome of polling a resource's creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreationStatus {
    /// Creation is still running.
    Pending,
    /// The resource is ready for use.
    Ready,
    /// Creation failed and will not recover.
    Failed,
}

impl CreationStatus {
    /// Map a status string reported by the service.
    ///
    /// Anything that is neither done nor failed counts as still in progress.
    #[must_use]
    pub fn from_wire(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "READY" | "DONE" | "SUCCEEDED" => Self::Ready,
            "FAILED" | "ERROR" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// HTTP client for the provisioning service.
#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvisioner {
    /// Create a new provisioning client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the provisioning service (e.g., "http://provisioner:8080")
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Transport` if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> ProvisionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProvisionError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a new provisioning client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL of the provisioning service.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Turn a non-success response into a `Rejected` error.
    async fn rejection(response: reqwest::Response) -> ProvisionError {
        let status = response.status();
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("provisioning service returned status {status}"));

        ProvisionError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Request body for starting a resource creation.
#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    #[serde(flatten)]
    params: &'a TierParams,
}

/// Request body for granting ownership.
///
/// The principal travels in the body so it never becomes part of the path.
#[derive(Debug, Serialize)]
struct GrantRequest<'a> {
    principal: &'a str,
}

/// Response from the creation status endpoint.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Error response from the provisioning service.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn start_create(&self, name: &ResourceName, params: &TierParams) -> ProvisionResult<()> {
        let url = format!("{}/v1/projects", self.base_url);

        let request = CreateRequest {
            name: name.as_str(),
            params,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProvisionError::Transport(e.to_string()))?;

        if response.status().is_success() {
            tracing::debug!(resource = %name, tier = %params.tier, "Requested resource creation");
            Ok(())
        } else {
            let err = Self::rejection(response).await;
            tracing::error!(resource = %name, error = %err, "Failed to start resource creation");
            Err(err)
        }
    }

    async fn get_create_status(&self, name: &ResourceName) -> ProvisionResult<CreationStatus> {
        let url = format!("{}/v1/projects/{}/status", self.base_url, name);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProvisionError::Transport(e.to_string()))?;

        if response.status().is_success() {
            let body: StatusResponse = response
                .json()
                .await
                .map_err(|e| ProvisionError::InvalidResponse(e.to_string()))?;

            let status = CreationStatus::from_wire(&body.status);
            if status == CreationStatus::Failed {
                tracing::debug!(
                    resource = %name,
                    message = body.message.as_deref().unwrap_or_default(),
                    "Resource creation failed"
                );
            }
            Ok(status)
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            Err(ProvisionError::NotFound(name.clone()))
        } else {
            Err(Self::rejection(response).await)
        }
    }

    async fn grant_access(&self, principal: &str, name: &ResourceName) -> ProvisionResult<()> {
        let url = format!("{}/v1/projects/{}/owners", self.base_url, name);

        let response = self
            .client
            .put(&url)
            .json(&GrantRequest { principal })
            .send()
            .await
            .map_err(|e| ProvisionError::Transport(e.to_string()))?;

        if response.status().is_success() {
            tracing::debug!(resource = %name, principal, "Granted resource access");
            Ok(())
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            Err(ProvisionError::NotFound(name.clone()))
        } else {
            let err = Self::rejection(response).await;
            tracing::error!(resource = %name, principal, error = %err, "Failed to grant access");
            Err(err)
        }
    }
}

/// A no-op provisioner for when no provisioning service is configured.
///
/// Every resource is reported as ready immediately.
#[derive(Debug, Clone, Default)]
pub struct NoopProvisioner;

impl NoopProvisioner {
    /// Create a new no-op provisioner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn start_create(&self, name: &ResourceName, _params: &TierParams) -> ProvisionResult<()> {
        tracing::warn!(
            resource = %name,
            "NoopProvisioner: start_create called but no provisioner configured"
        );
        Ok(())
    }

    async fn get_create_status(&self, _name: &ResourceName) -> ProvisionResult<CreationStatus> {
        Ok(CreationStatus::Ready)
    }

    async fn grant_access(&self, principal: &str, name: &ResourceName) -> ProvisionResult<()> {
        tracing::warn!(
            resource = %name,
            principal,
            "NoopProvisioner: grant_access called but no provisioner configured"
        );
        Ok(())
    }
}

/// In-memory provisioner for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::{HashMap, HashSet};

    use parking_lot::Mutex;

    use super::{
        async_trait, CreationStatus, ProvisionError, ProvisionResult, Provisioner, ResourceName,
        TierParams,
    };

    #[derive(Debug)]
    struct MockState {
        statuses: HashMap<ResourceName, CreationStatus>,
        default_status: CreationStatus,
        fail_start: bool,
        fail_grant: bool,
        unknown: bool,
        unreachable: HashSet<ResourceName>,
        started: Vec<(ResourceName, TierParams)>,
        status_calls: Vec<ResourceName>,
        grants: Vec<(String, ResourceName)>,
    }

    /// A scriptable provisioner that records every call.
    ///
    /// Resources report `Pending` until scripted otherwise.
    #[derive(Debug)]
    pub struct MockProvisioner {
        state: Mutex<MockState>,
    }

    impl Default for MockProvisioner {
        fn default() -> Self {
            Self {
                state: Mutex::new(MockState {
                    statuses: HashMap::new(),
                    default_status: CreationStatus::Pending,
                    fail_start: false,
                    fail_grant: false,
                    unknown: false,
                    unreachable: HashSet::new(),
                    started: Vec::new(),
                    status_calls: Vec::new(),
                    grants: Vec::new(),
                }),
            }
        }
    }

    impl MockProvisioner {
        /// Create a mock where every resource is pending.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Script the status reported for one resource.
        pub fn set_status(&self, name: &ResourceName, status: CreationStatus) {
            self.state.lock().statuses.insert(name.clone(), status);
        }

        /// Script the status reported for resources without their own script.
        pub fn set_default_status(&self, status: CreationStatus) {
            self.state.lock().default_status = status;
        }

        /// Make `start_create` fail.
        pub fn fail_start(&self, fail: bool) {
            self.state.lock().fail_start = fail;
        }

        /// Make `grant_access` fail.
        pub fn fail_grant(&self, fail: bool) {
            self.state.lock().fail_grant = fail;
        }

        /// Make `get_create_status` report every resource as unknown.
        pub fn report_unknown(&self, unknown: bool) {
            self.state.lock().unknown = unknown;
        }

        /// Make polls of one resource fail with a transport error.
        pub fn set_unreachable(&self, name: &ResourceName, unreachable: bool) {
            let mut state = self.state.lock();
            if unreachable {
                state.unreachable.insert(name.clone());
            } else {
                state.unreachable.remove(name);
            }
        }

        /// Resources passed to `start_create`, in call order.
        #[must_use]
        pub fn started(&self) -> Vec<(ResourceName, TierParams)> {
            self.state.lock().started.clone()
        }

        /// Resources passed to `get_create_status`, in call order.
        #[must_use]
        pub fn status_calls(&self) -> Vec<ResourceName> {
            self.state.lock().status_calls.clone()
        }

        /// Successful grants, in call order.
        #[must_use]
        pub fn grants(&self) -> Vec<(String, ResourceName)> {
            self.state.lock().grants.clone()
        }
    }

    #[async_trait]
    impl Provisioner for MockProvisioner {
        async fn start_create(
            &self,
            name: &ResourceName,
            params: &TierParams,
        ) -> ProvisionResult<()> {
            let mut state = self.state.lock();
            state.started.push((name.clone(), params.clone()));
            if state.fail_start {
                return Err(ProvisionError::Transport("connection refused".to_string()));
            }
            Ok(())
        }

        async fn get_create_status(&self, name: &ResourceName) -> ProvisionResult<CreationStatus> {
            let mut state = self.state.lock();
            state.status_calls.push(name.clone());
            if state.unknown {
                return Err(ProvisionError::NotFound(name.clone()));
            }
            if state.unreachable.contains(name) {
                return Err(ProvisionError::Transport("connection reset".to_string()));
            }
            Ok(state
                .statuses
                .get(name)
                .copied()
                .unwrap_or(state.default_status))
        }

        async fn grant_access(&self, principal: &str, name: &ResourceName) -> ProvisionResult<()> {
            let mut state = self.state.lock();
            if state.fail_grant {
                return Err(ProvisionError::Rejected {
                    status: 500,
                    message: "grant failed".to_string(),
                });
            }
            state.grants.push((principal.to_string(), name.clone()));
            Ok(())
        }
    }
}
