//! Accept loop and session establishment
//!
//! Binds the configured port and feeds raw TCP connections, strictly one at
//! a time, through the SSH handshake into a `ConnectionHandler`. In
//! single-shot mode the listener is dropped right after the first accept so
//! no further connection can ever be made; in repeat mode the next accept
//! happens only after the previous session has fully finished.

use std::net::SocketAddr;
use std::sync::Arc;

use russh::{MethodSet, SshId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::auth::Authenticator;
use crate::config::{AuthPolicy, ServerPolicy};
use crate::keys::HostIdentity;
use crate::session::{ConnectionHandler, SessionVerdict};
use crate::{Result, SshPipeError};

/// Run the server to completion under the given policy and host identity.
///
/// Fatal errors (bind, accept) are returned; handshake and channel-type
/// failures are scoped to the offending connection and, in repeat mode,
/// never stop later connections from being served.
pub async fn run(policy: ServerPolicy, identity: HostIdentity) -> Result<()> {
    let config = Arc::new(session_config(&policy, identity));
    let auth = Arc::new(Authenticator::new(policy.auth.clone()));

    let listener = TcpListener::bind(("0.0.0.0", policy.port))
        .await
        .map_err(SshPipeError::Bind)?;
    log::info!("Listening on port {}", policy.port);

    if policy.repeat {
        loop {
            let (stream, peer) = accept(&listener).await?;
            if let Err(e) = process(config.clone(), auth.clone(), stream, peer).await {
                log::warn!("Connection from {} failed: {}", peer, e);
            }
        }
    } else {
        let (stream, peer) = accept(&listener).await?;
        // No further connections, ever: close the listening port before the
        // session is serviced.
        drop(listener);
        process(config, auth, stream, peer).await
    }
}

async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept().await.map_err(SshPipeError::Accept)?;
    log::info!("Connection from {}", peer);
    Ok((stream, peer))
}

/// Drive one connection from handshake to teardown.
async fn process(
    config: Arc<russh::server::Config>,
    auth: Arc<Authenticator>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let (done_tx, done_rx) = oneshot::channel();
    let handler = ConnectionHandler::new(auth, done_tx);

    // Key exchange, host identity proof and client authentication all
    // happen inside the transport; we only learn the outcome.
    let session = russh::server::run_stream(config, stream, handler)
        .await
        .map_err(|e| SshPipeError::Handshake(e.to_string()))?;

    let outcome = session.await;
    log::info!("Connection from {} closed", peer);

    // The connection is only released once its fate is known: both pipe
    // directions finished, or the handler declared it dead on arrival. A
    // dropped sender means the peer left without ever getting a shell.
    match done_rx.await {
        Ok(SessionVerdict::Piped(summary)) => {
            summary.to_peer?;
            summary.from_peer?;
        }
        Ok(SessionVerdict::Fatal(e)) => return Err(e),
        Err(_) => {}
    }

    match outcome {
        // A peer that just hangs up after the session is a normal ending,
        // not a fault of this connection.
        Err(SshPipeError::Ssh(russh::Error::Disconnect)) => Ok(()),
        Err(SshPipeError::Ssh(russh::Error::IO(ref e)))
            if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ) =>
        {
            Ok(())
        }
        other => other,
    }
}

/// Build the transport configuration for this run: version banner, the
/// ephemeral host key, and the auth methods the policy allows.
fn session_config(policy: &ServerPolicy, identity: HostIdentity) -> russh::server::Config {
    let mut config = russh::server::Config::default();
    config.server_id = SshId::Standard(policy.server_id.clone());
    config.methods = match policy.auth {
        AuthPolicy::Open => MethodSet::NONE,
        AuthPolicy::SharedSecret(_) => MethodSet::PASSWORD,
    };
    config.keys.push(identity.into_key_pair());
    config
}
