//! Per-connection handler: the ready handshake and the frame pump.
//!
//! Each accepted device socket gets one task running this handler:
//!   1. First frame must be `ready` with credentials → authenticate
//!   2. Resume the presented mediator id, or create a fresh session
//!   3. Attach the socket and join the user's pod
//!   4. Pump frames to the nexus until the socket closes
//!   5. Suspend the session so a reconnecting device can resume it

use std::sync::Arc;

use wayfinder_protocol::{FlowTarget, RoutedMessage};
use wayfinder_room::SiteDirectory;
use wayfinder_session::{AuthClaims, Authenticator, ClientMediator};
use wayfinder_transport::{Connection, ServerWsConnection};

use crate::server::ServerState;
use crate::WayfinderError;

/// Drop guard that suspends the session when the handler exits, even if
/// it panics. `Drop` is synchronous, so the async suspend is spawned.
struct SuspendGuard<D: SiteDirectory> {
    client: Arc<ClientMediator<D>>,
}

impl<D: SiteDirectory> Drop for SuspendGuard<D> {
    fn drop(&mut self) {
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            client.suspend().await;
        });
    }
}

/// Handles a single device socket from accept to close.
pub(crate) async fn handle_connection<D, A>(
    conn: ServerWsConnection,
    state: Arc<ServerState<D, A>>,
) -> Result<(), WayfinderError>
where
    D: SiteDirectory,
    A: Authenticator,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new device connection");

    let ready = receive_ready(&conn, &state).await?;
    let user_id = ready
        .user_id()
        .ok_or_else(|| WayfinderError::Handshake("ready frame has no userId".into()))?;
    let token = ready.body()["token"].as_str().unwrap_or_default();
    let claims = state.auth.authenticate(user_id, token).await?;
    tracing::info!(%conn_id, user_id = %claims.user_id, "device authenticated");

    // A valid mediator id resumes the suspended session, queue and all;
    // anything else starts fresh.
    let presented = ready.body()["mediatorId"].as_str();
    let client = presented
        .and_then(|id| state.nexus.resume_session(id, &claims.user_id))
        .unwrap_or_else(|| {
            state.nexus.create_session(
                &claims.user_id,
                &resolve_username(&claims, &ready),
            )
        });

    client.attach(Arc::clone(&conn)).await;
    client
        .ready(
            ready.room_id().unwrap_or_default(),
            ready.bookmark().unwrap_or(0),
        )
        .await?;
    let guard = SuspendGuard {
        client: Arc::clone(&client),
    };

    loop {
        match conn.recv().await {
            Ok(Some(frame)) => match RoutedMessage::decode(&frame) {
                Ok(msg) if msg.flow_target() == FlowTarget::Ready => {
                    // Re-sync on a live socket: rejoin with the new
                    // bookmark and room expectation.
                    guard
                        .client
                        .ready(
                            msg.room_id().unwrap_or_default(),
                            msg.bookmark().unwrap_or(0),
                        )
                        .await?;
                }
                Ok(msg) => {
                    if let Err(e) = guard.client.send_to_room(&msg).await {
                        tracing::debug!(%conn_id, error = %e, "frame not routed");
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        %conn_id,
                        error = %e,
                        "dropping malformed device frame"
                    );
                }
            },
            Ok(None) => {
                tracing::info!(%conn_id, "device connection closed");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "device recv failed");
                break;
            }
        }
    }

    // guard drops here and suspends the session.
    Ok(())
}

/// The display name for a fresh session. The authenticator's claim
/// wins; a claim without one falls back to the username the device sent
/// in the ready body, and failing that the user id.
fn resolve_username(claims: &AuthClaims, ready: &RoutedMessage) -> String {
    if !claims.username.is_empty() {
        return claims.username.clone();
    }
    ready
        .username()
        .filter(|u| !u.is_empty())
        .unwrap_or(&claims.user_id)
        .to_string()
}

/// Waits for the opening `ready` frame, within the handshake timeout.
async fn receive_ready<D, A>(
    conn: &ServerWsConnection,
    state: &ServerState<D, A>,
) -> Result<RoutedMessage, WayfinderError> {
    let frame = match tokio::time::timeout(state.handshake_timeout, conn.recv())
        .await
    {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => {
            return Err(WayfinderError::Handshake(
                "connection closed before ready".into(),
            ));
        }
        Ok(Err(e)) => return Err(WayfinderError::Transport(e)),
        Err(_) => {
            return Err(WayfinderError::Handshake("ready timed out".into()));
        }
    };
    let msg = RoutedMessage::decode(&frame)?;
    if msg.flow_target() != FlowTarget::Ready {
        return Err(WayfinderError::Handshake(format!(
            "expected ready, got {}",
            msg.flow_target()
        )));
    }
    Ok(msg)
}
