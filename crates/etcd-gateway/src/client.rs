//! Etcd v3 JSON gateway client
//!
//! Talks to `/v3/cluster/member/*` and `/v3/maintenance/*` over HTTPS
//! with a client certificate signed by the cluster's etcd CA.

use crate::error::EtcdError;
use crate::etcd_trait::{EtcdClientTrait, EtcdConnector};
use crate::models::*;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Certificate, Client, Identity, RequestBuilder};
use std::time::Duration;
use tracing::debug;

/// Deadline for membership and status calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a full snapshot
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Etcd gateway client
#[derive(Debug, Clone)]
pub struct EtcdClient {
    client: Client,
    endpoint: String,
}

impl EtcdClient {
    /// Create a new etcd client
    ///
    /// # Arguments
    /// * `endpoint` - Etcd client URL (e.g., "https://10.0.0.5:2379")
    /// * `tls` - CA bundle and client identity; `None` for plain HTTP
    pub fn new(endpoint: impl Into<String>, tls: Option<&EtcdTls>) -> Result<Self, EtcdError> {
        let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));

        if let Some(tls) = tls {
            let ca = Certificate::from_pem(&tls.ca_pem)
                .map_err(|e| EtcdError::Tls(format!("etcd CA: {e}")))?;
            let mut identity_pem = tls.cert_pem.clone();
            identity_pem.push(b'\n');
            identity_pem.extend_from_slice(&tls.key_pem);
            let identity = Identity::from_pem(&identity_pem)
                .map_err(|e| EtcdError::Tls(format!("client identity: {e}")))?;
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(ca)
                .identity(identity);
        }

        let endpoint: String = endpoint.into();
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn post(&self, endpoint: &str, path: &str, timeout: Duration) -> RequestBuilder {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), path);
        debug!("POST {}", url);
        self.client
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
    }

    async fn send_json<T: for<'de> serde::Deserialize<'de>>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> Result<T, EtcdError> {
        let response = request.send().await.map_err(|e| timeout_or_http(e, operation))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| timeout_or_http(e, operation))?;

        if status == reqwest::StatusCode::NOT_FOUND || body.contains("member not found") {
            return Err(EtcdError::NotFound(format!("{operation}: {body}")));
        }
        if !status.is_success() {
            return Err(EtcdError::Api(format!("{operation} failed: {status} - {body}")));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn timeout_or_http(error: reqwest::Error, operation: &str) -> EtcdError {
    if error.is_timeout() {
        EtcdError::Timeout(format!("{operation}: {error}"))
    } else {
        EtcdError::Http(error)
    }
}

/// Concatenates the base64 blobs of a newline-delimited snapshot stream.
pub(crate) fn decode_snapshot_stream(body: &str) -> Result<Vec<u8>, EtcdError> {
    let mut snapshot = Vec::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let chunk: SnapshotChunk = serde_json::from_str(line)?;
        if let Some(err) = chunk.error {
            return Err(EtcdError::Api(format!("snapshot stream: {}", err.message)));
        }
        if let Some(result) = chunk.result {
            if result.blob.is_empty() {
                continue;
            }
            let bytes = STANDARD
                .decode(result.blob.as_bytes())
                .map_err(|e| EtcdError::Api(format!("snapshot chunk is not base64: {e}")))?;
            snapshot.extend_from_slice(&bytes);
        }
    }
    Ok(snapshot)
}

#[async_trait::async_trait]
impl EtcdClientTrait for EtcdClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list_members(&self) -> Result<Vec<EtcdMember>, EtcdError> {
        let request = self
            .post(&self.endpoint, "/v3/cluster/member/list", REQUEST_TIMEOUT)
            .body("{}");
        let response: MemberListResponse = self.send_json(request, "list etcd members").await?;
        Ok(response.members)
    }

    async fn remove_member(&self, id: u64) -> Result<(), EtcdError> {
        let request = self
            .post(&self.endpoint, "/v3/cluster/member/remove", REQUEST_TIMEOUT)
            .json(&MemberRemoveRequest { id: id.to_string() });
        let _: serde_json::Value = self
            .send_json(request, &format!("remove etcd member {id:x}"))
            .await?;
        Ok(())
    }

    async fn member_status(&self, endpoint: &str) -> Result<MemberStatus, EtcdError> {
        let request = self
            .post(endpoint, "/v3/maintenance/status", REQUEST_TIMEOUT)
            .body("{}");
        self.send_json(request, &format!("status of {endpoint}")).await
    }

    async fn snapshot(&self) -> Result<Vec<u8>, EtcdError> {
        let response = self
            .post(&self.endpoint, "/v3/maintenance/snapshot", SNAPSHOT_TIMEOUT)
            .body("{}")
            .send()
            .await
            .map_err(|e| timeout_or_http(e, "snapshot"))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| timeout_or_http(e, "snapshot"))?;
        if !status.is_success() {
            return Err(EtcdError::Api(format!("snapshot failed: {status} - {body}")));
        }

        decode_snapshot_stream(&body)
    }
}

/// Connector producing [`EtcdClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpEtcdConnector;

impl EtcdConnector for HttpEtcdConnector {
    fn connect(&self, endpoint: &str, tls: &EtcdTls) -> Result<Box<dyn EtcdClientTrait>, EtcdError> {
        Ok(Box::new(EtcdClient::new(endpoint, Some(tls))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_snapshot_stream_concatenates_chunks() {
        let body = format!(
            "{{\"result\":{{\"remaining_bytes\":\"3\",\"blob\":\"{}\"}}}}\n{{\"result\":{{\"remaining_bytes\":\"0\",\"blob\":\"{}\"}}}}\n",
            STANDARD.encode(b"abc"),
            STANDARD.encode(b"def"),
        );
        assert_eq!(decode_snapshot_stream(&body).unwrap(), b"abcdef".to_vec());
    }

    #[test]
    fn test_decode_snapshot_stream_surfaces_errors() {
        let body = r#"{"error":{"grpc_code":14,"message":"etcdserver: not capable"}}"#;
        let err = decode_snapshot_stream(body).unwrap_err();
        assert!(err.to_string().contains("not capable"));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = EtcdClient::new("http://127.0.0.1:2379/", None).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:2379");
    }
}
