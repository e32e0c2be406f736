//! INVITE dialog state machine: idle → calling → ringing → answered →
//! ended/failed, per the call flow the original dialer's
//! `originate_call`/`_handle_sip_response`/`hangup` implemented by hand
//! over raw sockets.

use crate::error::{Error, Result};
use crate::transport::SipTransport;
use dialer_sip_core::builder::{generate_call_id, generate_tag, RequestBuilder};
use dialer_sip_core::message::Method;
use dialer_sip_core::sdp::{self, RemoteMedia};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Dialog lifecycle state (spec §4.3 `CallInfo.state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Idle,
    Calling,
    Ringing,
    Answered,
    Ended,
    Failed,
}

/// What an INVITE attempt resolved to.
#[derive(Debug, Clone)]
pub enum InviteOutcome {
    Answered { remote_media: Option<RemoteMedia> },
    Rejected { status: u16, reason: String },
    RingTimeout,
    NoResponse,
}

struct DialogInner {
    state: DialogState,
    to_tag: Option<String>,
    invite_cseq: Option<u32>,
}

/// One outbound call leg: a Call-ID, its own From tag, and whatever To
/// tag the far end assigns once it starts ringing.
pub struct Dialog {
    transport: Arc<SipTransport>,
    call_id: String,
    from_tag: String,
    from_uri: String,
    to_uri: String,
    contact_uri: String,
    local_addr: String,
    cseq: AtomicU32,
    inner: Mutex<DialogInner>,
}

impl Dialog {
    pub fn new(
        transport: Arc<SipTransport>,
        from_uri: String,
        to_uri: String,
        contact_uri: String,
        local_addr: String,
    ) -> Self {
        Self {
            transport,
            call_id: generate_call_id(&local_addr),
            from_tag: generate_tag(),
            from_uri,
            to_uri,
            contact_uri,
            local_addr,
            cseq: AtomicU32::new(1),
            inner: Mutex::new(DialogInner {
                state: DialogState::Idle,
                to_tag: None,
                invite_cseq: None,
            }),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub async fn state(&self) -> DialogState {
        self.inner.lock().await.state
    }

    /// Send INVITE with `local_sdp` as the offer, wait up to
    /// `ring_timeout` total for a final response, and ACK a 200 OK
    /// before returning. A CANCEL is sent if `ring_timeout` elapses while
    /// still ringing.
    pub async fn invite(
        &self,
        destination_uri: &str,
        caller_id_display: Option<&str>,
        local_sdp: String,
        ring_timeout: Duration,
    ) -> Result<InviteOutcome> {
        {
            let mut inner = self.inner.lock().await;
            inner.state = DialogState::Calling;
        }

        let invite_cseq = self.cseq.fetch_add(1, Ordering::Relaxed);
        {
            let mut inner = self.inner.lock().await;
            inner.invite_cseq = Some(invite_cseq);
        }

        let request = RequestBuilder::new(Method::Invite, destination_uri.to_string())
            .via("UDP", &self.local_addr)
            .from_header(caller_id_display, &self.from_uri, &self.from_tag)
            .to_header(None, &self.to_uri, None)
            .call_id(&self.call_id)
            .cseq(invite_cseq)
            .contact(&self.contact_uri)
            .sdp_body(local_sdp)
            .build();

        let mut responses = self
            .transport
            .send_request_stream(&request, ring_timeout)
            .await?;

        loop {
            let Some(response) = responses.recv().await else {
                let mut inner = self.inner.lock().await;
                let was_ringing = inner.state == DialogState::Ringing;
                inner.state = DialogState::Failed;
                drop(inner);
                if was_ringing {
                    self.cancel(invite_cseq).await?;
                    return Ok(InviteOutcome::RingTimeout);
                }
                return Ok(InviteOutcome::NoResponse);
            };

            if let Some(tag) = response.to_tag() {
                self.inner.lock().await.to_tag = Some(tag);
            }

            match response.status() {
                Some(180) | Some(183) => {
                    self.inner.lock().await.state = DialogState::Ringing;
                    info!(call_id = %self.call_id, "ringing");
                }
                Some(status) if (200..300).contains(&status) => {
                    self.inner.lock().await.state = DialogState::Answered;
                    let remote_media = if response.body.is_empty() {
                        None
                    } else {
                        std::str::from_utf8(&response.body)
                            .ok()
                            .and_then(|s| sdp::parse(s).ok())
                    };
                    self.ack(invite_cseq).await?;
                    return Ok(InviteOutcome::Answered { remote_media });
                }
                Some(status) => {
                    self.inner.lock().await.state = DialogState::Failed;
                    let reason = format!("{status}");
                    return Ok(InviteOutcome::Rejected { status, reason });
                }
                None => continue,
            }
        }
    }

    /// ACK a 2xx response. Per RFC 3261 §13.2.2.4 the ACK for a 2xx
    /// reuses the INVITE's CSeq number but is its own transaction (no
    /// response expected), so this is a fire-and-forget send.
    async fn ack(&self, invite_cseq: u32) -> Result<()> {
        let to_tag = self.inner.lock().await.to_tag.clone();
        let ack = RequestBuilder::new(Method::Ack, self.to_uri.clone())
            .via("UDP", &self.local_addr)
            .from_header(None, &self.from_uri, &self.from_tag)
            .to_header(None, &self.to_uri, to_tag.as_deref())
            .call_id(&self.call_id)
            .cseq(invite_cseq)
            .build();
        self.transport.send_raw(&ack).await
    }

    /// CANCEL an in-flight INVITE. Per RFC 3261 §9.1, CANCEL is a
    /// separate request sharing the INVITE's Call-ID/From-tag/CSeq
    /// number but its own branch.
    async fn cancel(&self, invite_cseq: u32) -> Result<()> {
        let cancel = RequestBuilder::new(Method::Cancel, self.to_uri.clone())
            .via("UDP", &self.local_addr)
            .from_header(None, &self.from_uri, &self.from_tag)
            .to_header(None, &self.to_uri, None)
            .call_id(&self.call_id)
            .cseq(invite_cseq)
            .build();
        self.transport
            .send_request(&cancel, Duration::from_secs(5))
            .await
            .map(|_| ())
    }

    /// Send BYE to tear down an answered dialog.
    pub async fn bye(&self) -> Result<()> {
        let to_tag = self.inner.lock().await.to_tag.clone();
        let seq = self.cseq.fetch_add(1, Ordering::Relaxed);
        let bye = RequestBuilder::new(Method::Bye, self.to_uri.clone())
            .via("UDP", &self.local_addr)
            .from_header(None, &self.from_uri, &self.from_tag)
            .to_header(None, &self.to_uri, to_tag.as_deref())
            .call_id(&self.call_id)
            .cseq(seq)
            .build();
        let response = self
            .transport
            .send_request(&bye, Duration::from_secs(5))
            .await?;
        self.inner.lock().await.state = DialogState::Ended;
        match response.status() {
            Some(status) if (200..300).contains(&status) => Ok(()),
            Some(status) => Err(Error::CallRejected {
                status,
                reason: "BYE rejected".into(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialer_sip_core::builder::ResponseBuilder;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    async fn transport_pair() -> (Arc<SipTransport>, Arc<SipTransport>) {
        let (callee, mut callee_inbound) = SipTransport::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        )
        .await
        .unwrap();
        let callee_addr = callee.local_addr().unwrap();

        let (caller, _caller_inbound) =
            SipTransport::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0), callee_addr)
                .await
                .unwrap();

        // Minimal responder: answer the first INVITE with 180 then 200.
        let responder_transport = Arc::clone(&callee);
        tokio::spawn(async move {
            let Some(inbound) = callee_inbound.recv().await else {
                return;
            };
            let invite = inbound.message;
            let (seq, _) = invite.cseq().unwrap();
            let to_tag = generate_tag();

            let ringing = ResponseBuilder::new(180, "Ringing")
                .header("Call-ID", invite.call_id().unwrap().to_string())
                .header("CSeq", format!("{seq} INVITE"))
                .header(
                    "To",
                    format!("{};tag={}", invite.header("To").unwrap(), to_tag),
                )
                .build();
            responder_transport
                .send_to(&ringing, inbound.from)
                .await
                .unwrap();

            let ok = ResponseBuilder::new(200, "OK")
                .header("Call-ID", invite.call_id().unwrap().to_string())
                .header("CSeq", format!("{seq} INVITE"))
                .header(
                    "To",
                    format!("{};tag={}", invite.header("To").unwrap(), to_tag),
                )
                .build();
            responder_transport
                .send_to(&ok, inbound.from)
                .await
                .unwrap();
        });

        (caller, callee)
    }

    #[tokio::test]
    async fn invite_reaches_answered_on_200_ok() {
        let (caller, _callee) = transport_pair().await;
        let local_addr = caller.local_addr().unwrap().to_string();
        let dialog = Dialog::new(
            caller,
            "sip:alice@example.com".to_string(),
            "sip:bob@example.com".to_string(),
            "sip:alice@127.0.0.1:0".to_string(),
            local_addr,
        );

        let outcome = dialog
            .invite(
                "sip:bob@example.com",
                None,
                "v=0\r\n".to_string(),
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, InviteOutcome::Answered { .. }));
        assert_eq!(dialog.state().await, DialogState::Answered);
    }
}
