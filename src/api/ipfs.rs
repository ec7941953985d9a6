//! Purpose: Fetch app data JSON from an IPFS HTTP gateway.
//! Exports: `GatewayClient`.
//! Role: Production `ContentSource`; one GET per attempt with a short timeout.
//! Invariants: A non-JSON body, a non-2xx status or a timeout is a failed attempt.
//! Invariants: Retrying is the caller's job (`resolve_content`).
#![allow(clippy::result_large_err)]

use serde_json::Value;
use url::Url;

use crate::core::cid::Cid;
use crate::core::error::{Error, ErrorKind};
use crate::core::reconcile::ContentSource;
use crate::core::retry::RetryPolicy;

#[derive(Clone)]
pub struct GatewayClient {
    gateway: String,
    agent: ureq::Agent,
}

impl GatewayClient {
    /// Builds a client whose per-request timeout is `policy.timeout`.
    pub fn new(gateway: impl Into<String>, policy: &RetryPolicy) -> Result<Self, Error> {
        policy.validate()?;
        let gateway = gateway.into();
        let parsed = Url::parse(&gateway).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid ipfs gateway url {gateway:?}"))
                .with_source(err)
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("ipfs gateway url must use http or https scheme"));
        }
        let agent = ureq::AgentBuilder::new().timeout(policy.timeout).build();
        Ok(Self {
            gateway: gateway.trim_end_matches('/').to_string(),
            agent,
        })
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }
}

impl ContentSource for GatewayClient {
    fn fetch(&self, cid: &Cid) -> Result<Value, Error> {
        let url = cid.url(&self.gateway);
        let response = match self.agent.get(&url).set("Accept", "application/json").call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                let kind = if code == 404 {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::Remote
                };
                return Err(Error::new(kind).with_message(format!("gateway status {code} for {cid}")));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Remote)
                    .with_message(format!("gateway request for {cid} failed"))
                    .with_source(err));
            }
        };
        let body = response.into_string().map_err(|err| {
            Error::new(ErrorKind::Remote)
                .with_message(format!("failed to read gateway body for {cid}"))
                .with_source(err)
        })?;
        serde_json::from_str(&body).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message(format!("content at {cid} is not json"))
                .with_source(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayClient;
    use crate::core::error::ErrorKind;
    use crate::core::retry::RetryPolicy;
    use std::time::Duration;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = GatewayClient::new("http://127.0.0.1:8080/", &RetryPolicy::default())
            .expect("client");
        assert_eq!(client.gateway(), "http://127.0.0.1:8080");
    }

    #[test]
    fn non_http_gateway_is_rejected() {
        let err = GatewayClient::new("ipfs://gateway", &RetryPolicy::default())
            .err()
            .expect("scheme");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn zero_timeout_policy_is_rejected() {
        let policy = RetryPolicy {
            timeout: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let err = GatewayClient::new("http://127.0.0.1:8080", &policy)
            .err()
            .expect("zero timeout");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
