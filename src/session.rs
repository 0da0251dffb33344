//! Per-connection session handling
//!
//! `ConnectionHandler` services one secured session: it answers the auth
//! callbacks, accepts exactly one `session` channel, grants exactly one
//! `shell` request on it, and then plumbs the channel to the local
//! stdin/stdout until both directions have finished.
//!
//! The transport multiplexes channels and requests over the connection and
//! consumes every message itself, so the session cannot stall on unread
//! traffic; requests this server does not recognize get an explicit failure
//! reply whenever the peer asked for one.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Disconnect, MethodSet, Pty};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::auth::Authenticator;
use crate::SshPipeError;

/// Byte counts (or the error that ended the copy) for the two pipe
/// directions of one channel.
pub struct PipeSummary {
    /// Local stdin -> channel.
    pub to_peer: io::Result<u64>,
    /// Channel -> local stdout.
    pub from_peer: io::Result<u64>,
}

/// What one connection amounted to, reported back to the accept loop.
pub enum SessionVerdict {
    /// A shell ran to completion; byte counts for both directions.
    Piped(PipeSummary),
    /// The connection failed before any piping could start.
    Fatal(SshPipeError),
}

/// Where the single serviced channel currently stands.
enum ChannelPhase {
    /// No channel opened yet.
    AwaitingChannel,
    /// A session channel was accepted; waiting for its shell request.
    Accepted(Channel<Msg>),
    /// The shell was granted and the pipes are running (or finished).
    ShellGranted,
}

/// Handler for one accepted connection.
pub struct ConnectionHandler {
    auth: Arc<Authenticator>,
    phase: ChannelPhase,
    /// Fires once the connection's fate is known: both pipe directions
    /// finished, or a fatal error before any shell ran. Dropped unfired
    /// if the peer goes away without either.
    done: Option<oneshot::Sender<SessionVerdict>>,
}

impl ConnectionHandler {
    pub fn new(auth: Arc<Authenticator>, done: oneshot::Sender<SessionVerdict>) -> Self {
        Self {
            auth,
            phase: ChannelPhase::AwaitingChannel,
            done: Some(done),
        }
    }

    fn reject_channel(&mut self, kind: &str, session: &mut Session) -> crate::Result<bool> {
        match self.phase {
            // A first channel of the wrong type means the peer is not here
            // for a shell session. The open-failure reply still goes out,
            // then the whole connection is shut down.
            ChannelPhase::AwaitingChannel => {
                log::warn!("First channel was {}, not a session; closing the connection", kind);
                if let Some(done) = self.done.take() {
                    let _ = done.send(SessionVerdict::Fatal(SshPipeError::ChannelType(
                        kind.into(),
                    )));
                }
                session.disconnect(Disconnect::ByApplication, "unsupported channel type", "");
                Ok(false)
            }
            _ => {
                log::warn!("Rejecting extra {} channel: only one channel permitted", kind);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Handler for ConnectionHandler {
    type Error = SshPipeError;

    async fn auth_none(&mut self, user: &str) -> crate::Result<Auth> {
        if self.auth.open_access() {
            log::info!("Accepting user {} (wideopen)", user);
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: Some(MethodSet::PASSWORD),
            })
        }
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> crate::Result<Auth> {
        if self.auth.check(password) {
            log::info!("User {} authenticated", user);
            Ok(Auth::Accept)
        } else {
            log::warn!("Rejected credentials for user {}", user);
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> crate::Result<bool> {
        match self.phase {
            ChannelPhase::AwaitingChannel => {
                log::debug!("Session channel {} opened", channel.id());
                self.phase = ChannelPhase::Accepted(channel);
                Ok(true)
            }
            _ => {
                log::warn!("Rejecting second session channel: only one channel permitted");
                Ok(false)
            }
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> crate::Result<bool> {
        self.reject_channel("direct-tcpip", session)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> crate::Result<bool> {
        self.reject_channel("x11", session)
    }

    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> crate::Result<()> {
        match std::mem::replace(&mut self.phase, ChannelPhase::ShellGranted) {
            ChannelPhase::Accepted(channel) if channel.id() == channel_id => {
                session.channel_success(channel_id);
                log::info!("Shell granted on channel {}, piping stdio", channel_id);

                let handle = session.handle();
                let done = self.done.take();
                tokio::spawn(async move {
                    // Stdin reads run on tokio's blocking pool; a read in
                    // flight when this session dies early is not cancelled
                    // and can carry its bytes into a later session's pipe.
                    let summary =
                        bridge(tokio::io::stdin(), tokio::io::stdout(), channel.into_stream())
                            .await;
                    match &summary.to_peer {
                        Ok(n) => log::info!("stdin -> peer finished ({} bytes)", n),
                        Err(e) => log::warn!("stdin -> peer failed: {}", e),
                    }
                    match &summary.from_peer {
                        Ok(n) => log::info!("peer -> stdout finished ({} bytes)", n),
                        Err(e) => log::warn!("peer -> stdout failed: {}", e),
                    }
                    // Both directions are done; tell the peer the channel
                    // is over before releasing the connection.
                    let _ = handle.close(channel_id).await;
                    if let Some(done) = done {
                        let _ = done.send(SessionVerdict::Piped(summary));
                    }
                });
                Ok(())
            }
            other => {
                self.phase = other;
                log::warn!("Refusing shell request on channel {}", channel_id);
                session.channel_failure(channel_id);
                Ok(())
            }
        }
    }

    // Only the default shell is supported; a command payload is refused.
    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> crate::Result<()> {
        log::warn!("Refusing exec request on channel {}", channel_id);
        session.channel_failure(channel_id);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> crate::Result<()> {
        log::warn!("Refusing subsystem request {:?} on channel {}", name, channel_id);
        session.channel_failure(channel_id);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel_id: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> crate::Result<()> {
        // There is no terminal on this side, only a pipe.
        log::debug!("Refusing pty request on channel {}", channel_id);
        session.channel_failure(channel_id);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel_id: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> crate::Result<()> {
        session.channel_failure(channel_id);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel_id: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> crate::Result<()> {
        // Carries no reply flag; nothing to do.
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> crate::Result<bool> {
        log::warn!("Refusing tcpip-forward request for {}:{}", address, port);
        Ok(false)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> crate::Result<bool> {
        log::warn!("Refusing cancel-tcpip-forward request for {}:{}", address, port);
        Ok(false)
    }
}

/// Plumb `input` into the channel and the channel into `output`.
///
/// The two directions run as independent tasks; each forwards bytes
/// verbatim and in order until its source reaches end-of-stream or errors.
/// An error in one direction does not pre-empt the other: this returns, and
/// the channel halves are released, only once BOTH directions have
/// finished. There are no timeouts and no cancellation; a peer that keeps
/// its side open blocks that direction indefinitely.
pub async fn bridge<I, O, C>(input: I, output: O, channel: C) -> PipeSummary
where
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
    C: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut from_peer, mut to_peer) = tokio::io::split(channel);

    let outbound = tokio::spawn(async move {
        let mut input = input;
        let copied = tokio::io::copy(&mut input, &mut to_peer).await;
        // Local input is exhausted; let the peer see end-of-stream.
        let _ = to_peer.shutdown().await;
        copied
    });

    let inbound = tokio::spawn(async move {
        let mut output = output;
        let copied = tokio::io::copy(&mut from_peer, &mut output).await;
        let _ = output.flush().await;
        copied
    });

    let (to_peer, from_peer) = tokio::join!(outbound, inbound);
    PipeSummary {
        to_peer: to_peer.unwrap_or_else(|e| Err(io::Error::other(e))),
        from_peer: from_peer.unwrap_or_else(|e| Err(io::Error::other(e))),
    }
}
