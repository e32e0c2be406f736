//! UDP SIP transport with request/response correlation.
//!
//! A single UDP socket serves every dialog toward one SIP server. Requests
//! are matched to their response by `(Call-ID, CSeq number, CSeq method)`
//! — the same triple RFC 3261 transactions key off of — rather than by
//! assuming strict request/response ordering on the wire, since a
//! REGISTER refresh and an in-flight INVITE can legitimately be
//! outstanding at the same time.

use crate::error::{Error, Result};
use dashmap::DashMap;
use dialer_sip_core::SipMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

type PendingKey = (String, u32, String);

/// A SIP request that arrived without matching any pending transaction —
/// typically an in-dialog BYE/INFO from the remote party, or an OPTIONS
/// keepalive.
pub struct InboundRequest {
    pub message: SipMessage,
    pub from: SocketAddr,
}

pub struct SipTransport {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    pending: DashMap<PendingKey, mpsc::UnboundedSender<SipMessage>>,
    inbound_tx: mpsc::UnboundedSender<InboundRequest>,
}

impl SipTransport {
    /// Bind a UDP socket on `local_addr` and wire it to `remote_addr`.
    /// Returns the transport plus a receiver for SIP requests that don't
    /// correlate to any pending transaction.
    pub async fn bind(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<InboundRequest>)> {
        let socket = UdpSocket::bind(local_addr).await?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            socket: Arc::new(socket),
            remote_addr,
            pending: DashMap::new(),
            inbound_tx,
        });
        Arc::clone(&transport).spawn_receive_loop();
        Ok((transport, inbound_rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn spawn_receive_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; 65536];
            loop {
                match self.socket.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        let message = match dialer_sip_core::parse(&buf[..n]) {
                            Ok(m) => m,
                            Err(e) => {
                                warn!(error = %e, "dropping malformed SIP datagram");
                                continue;
                            }
                        };
                        self.dispatch(message, from);
                    }
                    Err(e) => {
                        warn!(error = %e, "SIP transport socket error, stopping receive loop");
                        break;
                    }
                }
            }
        })
    }

    fn dispatch(&self, message: SipMessage, from: SocketAddr) {
        if message.is_request() {
            if self
                .inbound_tx
                .send(InboundRequest { message, from })
                .is_err()
            {
                debug!("inbound SIP request dropped, no receiver listening");
            }
            return;
        }

        let Some(call_id) = message.call_id().map(str::to_string) else {
            debug!("dropping SIP response without Call-ID");
            return;
        };
        let Some((seq, method)) = message.cseq() else {
            debug!("dropping SIP response without CSeq");
            return;
        };
        let key = (call_id, seq, method.to_string());
        let is_final = !message.is_provisional();

        let delivered = match self.pending.get(&key) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        };
        if !delivered {
            debug!("dropping response with no matching transaction");
        }
        if is_final {
            self.pending.remove(&key);
        }
    }

    /// Send `message` and wait for the first final (non-1xx) response,
    /// giving up after `timeout`. Provisional responses are observed and
    /// discarded by this call — use [`Self::send_request_stream`] when
    /// the caller needs to react to 180 Ringing itself.
    pub async fn send_request(
        self: &Arc<Self>,
        message: &SipMessage,
        timeout: Duration,
    ) -> Result<SipMessage> {
        let mut responses = self.send_request_stream(message, timeout).await?;
        loop {
            match responses.recv().await {
                Some(resp) if resp.is_provisional() => continue,
                Some(resp) => return Ok(resp),
                None => return Err(Error::Timeout),
            }
        }
    }

    /// Send `message` and return a channel carrying every response
    /// (provisional and final) received for this transaction. The
    /// channel closes once a final response arrives or `timeout` elapses,
    /// whichever comes first.
    pub async fn send_request_stream(
        self: &Arc<Self>,
        message: &SipMessage,
        timeout: Duration,
    ) -> Result<mpsc::UnboundedReceiver<SipMessage>> {
        let call_id = message
            .call_id()
            .ok_or(Error::Sip(dialer_sip_core::Error::MissingHeader("Call-ID")))?
            .to_string();
        let (seq, method) = message
            .cseq()
            .ok_or(Error::Sip(dialer_sip_core::Error::MissingHeader("CSeq")))?;
        let key = (call_id, seq, method.to_string());

        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.insert(key.clone(), tx);

        self.send_raw(message).await?;

        // Best-effort cleanup: if no final response ever arrives, drop
        // the waiter after `timeout` so the pending map doesn't grow
        // forever. If a final response already removed the entry, this
        // is a harmless no-op.
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            transport.pending.remove(&key);
        });

        Ok(rx)
    }

    /// Fire-and-forget send (ACK, or a response to an inbound request) to
    /// this transport's configured remote address.
    pub async fn send_raw(&self, message: &SipMessage) -> Result<()> {
        self.send_to(message, self.remote_addr).await
    }

    /// Fire-and-forget send to an explicit address — used to reply to an
    /// [`InboundRequest`], whose source may not be this transport's
    /// configured remote (e.g. a server-side UDP listener answering
    /// whichever client just reached it).
    pub async fn send_to(&self, message: &SipMessage, addr: SocketAddr) -> Result<()> {
        let bytes = message.to_bytes();
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialer_sip_core::builder::RequestBuilder;
    use dialer_sip_core::message::Method;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn timeout_fires_when_no_response_arrives() {
        // `b` binds a real socket but never replies, so `a`'s request
        // goes unanswered and must time out rather than hang.
        let (_b, _b_inbound) = SipTransport::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        )
        .await
        .unwrap();
        let b_addr = _b.local_addr().unwrap();

        let (a, _a_inbound) = SipTransport::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            b_addr,
        )
        .await
        .unwrap();

        let req = RequestBuilder::new(Method::Options, "sip:nobody@example.com")
            .call_id("test-call-1")
            .cseq(1)
            .build();
        let err = a
            .send_request(&req, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
