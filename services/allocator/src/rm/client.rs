//! Resource manager dispatch client.
//!
//! Stateless request/response wrapper around one RM endpoint per call:
//! probe (non-committing feasibility check), commit (binding fulfillment),
//! release, and status-check. RM endpoints are numerous and short-lived
//! relative to the store connection, so connections are opened per call and
//! never pooled.
//!
//! A transport failure (`Unreachable`) and an RM saying no (`Rejected`) are
//! different error kinds; callers decide differently on each and the two
//! must never be conflated.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use hwbroker_types::AllocationId;

/// Timeout policy for RM calls.
///
/// One policy covers all four operations. Probes get a tighter default
/// because a probe that cannot answer quickly is as good as a rejection,
/// while a commit may legitimately take a while to provision.
#[derive(Debug, Clone)]
pub struct RmClientConfig {
    /// Applied to `probe` calls.
    pub probe_timeout: Duration,

    /// Applied to `commit`, `release`, and `status` calls.
    pub request_timeout: Duration,
}

impl Default for RmClientConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Resource manager call errors.
#[derive(Debug, Error)]
pub enum RmError {
    /// The RM could not be contacted at all (connection refused, DNS
    /// failure, timeout).
    #[error("resource manager {endpoint} unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The RM was reachable and answered with a non-success status.
    #[error("resource manager {endpoint} rejected the request ({status}): {body}")]
    Rejected {
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    /// The RM answered success but the payload could not be decoded.
    #[error("resource manager {endpoint} returned a malformed response: {source}")]
    InvalidResponse {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

impl RmError {
    /// True for transport-level failures, as opposed to an RM-level no.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Client for the RM dispatch protocol.
#[derive(Clone)]
pub struct RmClient {
    client: reqwest::Client,
    config: RmClientConfig,
}

impl RmClient {
    pub fn new(config: RmClientConfig) -> Self {
        let client = reqwest::Client::builder()
            // No idle connections: every call opens its own session.
            .pool_max_idle_per_host(0)
            .build()
            .expect("Failed to build HTTP client");

        Self { client, config }
    }

    /// Ask whether the RM could theoretically fulfill the demands.
    ///
    /// Commits nothing on the RM side.
    pub async fn probe(
        &self,
        endpoint: &str,
        demands: &serde_json::Value,
    ) -> Result<(), RmError> {
        let url = format!("http://{endpoint}/fulfill/theoretically");
        debug!(url = %url, "Probing resource manager");

        let response = self
            .client
            .post(&url)
            .json(demands)
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|source| RmError::Unreachable {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(self.rejected(endpoint, response).await);
        }
        Ok(())
    }

    /// Bindingly fulfill the demands, returning the RM's raw fulfillment
    /// payload (machine list under `info`).
    pub async fn commit(
        &self,
        endpoint: &str,
        demands: &serde_json::Value,
    ) -> Result<serde_json::Value, RmError> {
        let url = format!("http://{endpoint}/fulfill/now");
        debug!(url = %url, "Committing allocation");

        let response = self
            .client
            .post(&url)
            .json(demands)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|source| RmError::Unreachable {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(self.rejected(endpoint, response).await);
        }
        response
            .json()
            .await
            .map_err(|source| RmError::InvalidResponse {
                endpoint: endpoint.to_string(),
                source,
            })
    }

    /// Release a previously committed resource. Safe to retry from the
    /// caller's side; the RM's own idempotence is its business.
    pub async fn release(
        &self,
        endpoint: &str,
        resource_name: &str,
    ) -> Result<serde_json::Value, RmError> {
        let url = format!("http://{endpoint}/deallocate/{resource_name}");
        debug!(url = %url, "Releasing resource");

        let response = self
            .client
            .delete(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|source| RmError::Unreachable {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(self.rejected(endpoint, response).await);
        }
        response
            .json()
            .await
            .map_err(|source| RmError::InvalidResponse {
                endpoint: endpoint.to_string(),
                source,
            })
    }

    /// The RM-side view of an allocation. Reconciliation aid, not part of
    /// the primary dispatch path.
    pub async fn status(
        &self,
        endpoint: &str,
        allocation_id: &AllocationId,
    ) -> Result<serde_json::Value, RmError> {
        let url = format!("http://{endpoint}/allocations/{allocation_id}");
        debug!(url = %url, "Checking RM-side allocation status");

        let response = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|source| RmError::Unreachable {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(self.rejected(endpoint, response).await);
        }
        response
            .json()
            .await
            .map_err(|source| RmError::InvalidResponse {
                endpoint: endpoint.to_string(),
                source,
            })
    }

    async fn rejected(&self, endpoint: &str, response: reqwest::Response) -> RmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        RmError::Rejected {
            endpoint: endpoint.to_string(),
            status,
            body,
        }
    }
}

impl Default for RmClient {
    fn default() -> Self {
        Self::new(RmClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(server: &MockServer) -> String {
        server.address().to_string()
    }

    #[tokio::test]
    async fn test_probe_ok_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fulfill/theoretically"))
            .and(body_json(json!({"cpu": 4})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"feasible": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = RmClient::default();
        client
            .probe(&endpoint(&server), &json!({"cpu": 4}))
            .await
            .unwrap();
    }

    #[rstest]
    #[case(400)]
    #[case(409)]
    #[case(503)]
    #[tokio::test]
    async fn test_probe_non_success_is_rejected(#[case] status: u16) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fulfill/theoretically"))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(json!({"error": "no capacity"})),
            )
            .mount(&server)
            .await;

        let client = RmClient::default();
        let err = client
            .probe(&endpoint(&server), &json!({"cpu": 4}))
            .await
            .unwrap_err();

        match err {
            RmError::Rejected {
                status: got, body, ..
            } => {
                assert_eq!(got.as_u16(), status);
                assert!(body.contains("no capacity"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_connection_failure_is_unreachable() {
        // Port 1 is never listening.
        let client = RmClient::default();
        let err = client
            .probe("127.0.0.1:1", &json!({"cpu": 4}))
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_probe_timeout_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fulfill/theoretically"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let client = RmClient::new(RmClientConfig {
            probe_timeout: std::time::Duration::from_millis(50),
            ..RmClientConfig::default()
        });
        let err = client
            .probe(&endpoint(&server), &json!({"cpu": 4}))
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_commit_returns_raw_payload() {
        let server = MockServer::start().await;
        let payload = json!({
            "info": [{"name": "vm-1", "net_ifaces": [{"ip": "10.0.0.5"}]}]
        });
        Mock::given(method("POST"))
            .and(path("/fulfill/now"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let client = RmClient::default();
        let result = client
            .commit(&endpoint(&server), &json!({"cpu": 4}))
            .await
            .unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces_body_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fulfill/now"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"error": "capacity exceeded"})),
            )
            .mount(&server)
            .await;

        let client = RmClient::default();
        let err = client
            .commit(&endpoint(&server), &json!({"cpu": 4}))
            .await
            .unwrap_err();
        match err {
            RmError::Rejected { status, body, .. } => {
                assert_eq!(status.as_u16(), 500);
                assert!(body.contains("capacity exceeded"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_uses_delete_on_resource_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/deallocate/vm-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"released": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = RmClient::default();
        let result = client.release(&endpoint(&server), "vm-1").await.unwrap();
        assert_eq!(result, json!({"released": true}));
    }

    #[tokio::test]
    async fn test_status_fetches_rm_side_view() {
        let server = MockServer::start().await;
        let id: AllocationId = "6f0e3c76-7c5a-4f35-9c2e-5b9f0a3d8e11".parse().unwrap();
        Mock::given(method("GET"))
            .and(path(format!("/allocations/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "running"})))
            .mount(&server)
            .await;

        let client = RmClient::default();
        let result = client.status(&endpoint(&server), &id).await.unwrap();
        assert_eq!(result["state"], "running");
    }
}
