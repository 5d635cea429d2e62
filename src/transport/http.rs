//! JSON over HTTP transport
//!
//! Requests go to the peer's axum API under `/{kind}/members` and
//! `/{kind}/events`. Every call carries connect and request timeouts so a stuck
//! peer shows up as a failure instead of a hung relay.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Connector, PeerClient};
use crate::api::paths;
use crate::auth::{Authenticator, CREDENTIAL_HEADER};
use crate::error::{CollectiveError, Result};
use crate::event::{CollectiveKind, Event};
use crate::member::Member;
use crate::settings::{normalize_address, CollectiveSettings};

/// Builds peer clients that share one connection pool
#[derive(Clone)]
pub struct HttpConnector {
    kind: CollectiveKind,
    client: reqwest::Client,
    auth: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector")
            .field("kind", &self.kind)
            .finish()
    }
}

impl HttpConnector {
    pub fn new(settings: &CollectiveSettings, auth: Arc<dyn Authenticator>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            kind: settings.kind,
            client,
            auth,
        })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn PeerClient>> {
        Ok(Arc::new(HttpPeerClient {
            base: normalize_address(address).to_string(),
            kind: self.kind,
            client: self.client.clone(),
            auth: self.auth.clone(),
        }))
    }
}

pub struct HttpPeerClient {
    base: String,
    kind: CollectiveKind,
    client: reqwest::Client,
    auth: Arc<dyn Authenticator>,
}

impl HttpPeerClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(match self.auth.credential()? {
            Some(credential) => request.header(CREDENTIAL_HEADER, credential),
            None => request,
        })
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn members(&self) -> Result<Vec<Member>> {
        let url = self.url(&paths::members(self.kind));
        let response = self.authorize(self.client.get(&url))?.send().await?;
        if !response.status().is_success() {
            return Err(CollectiveError::from(response.status()));
        }
        let members: Vec<Member> = response.json().await?;
        debug!("[{}] Pulled {} members from {}", self.kind, members.len(), url);
        Ok(members)
    }

    async fn on_event(&self, event: Event) -> Result<()> {
        let url = self.url(&paths::events(self.kind));
        let response = self
            .authorize(self.client.post(&url))?
            .json(&event)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CollectiveError::from(response.status()));
        }
        Ok(())
    }
}
