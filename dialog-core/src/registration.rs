//! REGISTER client: initial registration, digest-auth retry on 401/407,
//! and a timer that refreshes the registration before it expires.
//!
//! Grounded in the original dialer's `register()`/`_auto_reregister()`
//! pair: send REGISTER, answer a challenge if one comes back, then sleep
//! until 80% of the granted `Expires` has elapsed and do it again.

use crate::digest;
use crate::error::{Error, Result};
use crate::transport::SipTransport;
use dialer_sip_core::builder::{generate_call_id, generate_tag, RequestBuilder};
use dialer_sip_core::message::Method;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything needed to build and refresh a REGISTER request toward one
/// SIP server.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub server_uri: String,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub contact_uri: String,
    pub requested_expires: u32,
}

/// Current status of a registration, mirroring the states the original
/// client tracked (`registered: bool`) plus the explicit failure case a
/// long-running dialer needs to alert on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Unregistered,
    Active,
    Failed,
}

struct Cseq(AtomicU32);

impl Cseq {
    fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Owns registration state for one identity against one server, and the
/// background re-register task once `start()` is called.
pub struct Registrar {
    transport: Arc<SipTransport>,
    config: RegistrationConfig,
    cseq: Cseq,
    status: Mutex<RegistrationStatus>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Registrar {
    pub fn new(transport: Arc<SipTransport>, config: RegistrationConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            cseq: Cseq(AtomicU32::new(1)),
            status: Mutex::new(RegistrationStatus::Unregistered),
            refresh_task: Mutex::new(None),
        })
    }

    pub async fn status(&self) -> RegistrationStatus {
        *self.status.lock().await
    }

    /// Perform one REGISTER, answering a digest challenge if the server
    /// sends one. Returns the `Expires` the server actually granted (not
    /// necessarily what was requested).
    async fn register_once(&self, expires: u32) -> Result<u32> {
        let call_id = generate_call_id(&self.config.domain);
        let from_tag = generate_tag();
        let from_uri = format!("sip:{}@{}", self.config.username, self.config.domain);

        let request = RequestBuilder::new(Method::Register, self.config.server_uri.clone())
            .via("UDP", &self.transport.local_addr()?.to_string())
            .from_header(None, &from_uri, &from_tag)
            .to_header(None, &from_uri, None)
            .call_id(&call_id)
            .cseq(self.cseq.next())
            .contact(&self.config.contact_uri)
            .expires(expires)
            .build();

        let response = self
            .transport
            .send_request(&request, Duration::from_secs(5))
            .await?;

        let response = match response.status() {
            Some(401) | Some(407) => {
                let header_name = if response.status() == Some(401) {
                    "WWW-Authenticate"
                } else {
                    "Proxy-Authenticate"
                };
                let challenge_header = response
                    .header(header_name)
                    .ok_or_else(|| Error::MalformedChallenge("missing challenge header".into()))?;
                let challenge = digest::parse_challenge(challenge_header)?;
                let auth = digest::build_authorization_header(
                    &self.config.username,
                    &challenge.realm,
                    &self.config.password,
                    "REGISTER",
                    &self.config.server_uri,
                    &challenge.nonce,
                );

                let authed_request =
                    RequestBuilder::new(Method::Register, self.config.server_uri.clone())
                        .via("UDP", &self.transport.local_addr()?.to_string())
                        .from_header(None, &from_uri, &from_tag)
                        .to_header(None, &from_uri, None)
                        .call_id(&call_id)
                        .cseq(self.cseq.next())
                        .contact(&self.config.contact_uri)
                        .expires(expires)
                        .authorization(auth)
                        .build();

                self.transport
                    .send_request(&authed_request, Duration::from_secs(5))
                    .await?
            }
            _ => response,
        };

        match response.status() {
            Some(status) if (200..300).contains(&status) => {
                // Use the server's granted Expires if present; otherwise
                // assume it honored what we asked for.
                let granted = response
                    .header("Expires")
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(expires);
                Ok(granted)
            }
            Some(status) => Err(Error::RegistrationRejected { status }),
            None => Err(Error::RegistrationRejected { status: 0 }),
        }
    }

    /// Register, then spawn the background task that re-registers at 80%
    /// of the granted expiry for as long as the registrar is alive.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let granted = match self.register_once(self.config.requested_expires).await {
            Ok(g) => g,
            Err(e) => {
                *self.status.lock().await = RegistrationStatus::Failed;
                return Err(e);
            }
        };
        *self.status.lock().await = RegistrationStatus::Active;
        info!(expires = granted, "registered");

        let registrar = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut expires = granted;
            loop {
                let refresh_after = Duration::from_secs_f64(expires as f64 * 0.8);
                tokio::time::sleep(refresh_after).await;

                match registrar.register_once(registrar.config.requested_expires).await {
                    Ok(new_expires) => {
                        expires = new_expires;
                        *registrar.status.lock().await = RegistrationStatus::Active;
                        info!(expires, "re-registered");
                    }
                    Err(e) => {
                        warn!(error = %e, "re-registration failed");
                        *registrar.status.lock().await = RegistrationStatus::Failed;
                        // Retry on the same cadence rather than giving up —
                        // the registrar may be back by the next attempt.
                    }
                }
            }
        });
        *self.refresh_task.lock().await = Some(handle);
        Ok(())
    }

    /// Send a REGISTER with `Expires: 0` and stop the refresh task.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        if let Some(handle) = self.refresh_task.lock().await.take() {
            handle.abort();
        }
        let result = self.register_once(0).await;
        *self.status.lock().await = RegistrationStatus::Unregistered;
        result.map(|_| ())
    }
}
