//! Device-authorization handshake.

use super::Session;
use crate::error::{IotError, Result};

/// Handshake steps, in order.
const STEPS: [u8; 2] = [1, 2];

/// Run every handshake step the strategy produces.
///
/// Each step is a request sent with `sync_call` on the bare transport. A
/// missing answer or a non-2xx answer aborts the handshake.
pub(crate) async fn run(session: &Session) -> Result<()> {
    let auth = session.auth();
    let timeout = session.config().sync_timeout();

    for step in STEPS {
        let Some(request) = auth.build_handshake_message(step) else {
            tracing::debug!(step, "handshake step skipped");
            continue;
        };

        tracing::info!(step, auth = auth.type_name(), "DEVICE AUTHORIZATION");
        let answer = session
            .sync_call_unauthorized(request, timeout)
            .await
            .ok_or(IotError::HandshakeTimeout)?;

        auth.on_handshake_response(&answer)?;
    }

    Ok(())
}
