//! Talking to servers through their presence markers.
//!
//! Every helper here runs as its own task and reports success through a
//! [`Confirmer`], so the caller can fan out to many servers and then wait
//! on one [`AwaitGroup`](crate::await_group::AwaitGroup).

use std::sync::Arc;

use coordination::{CoordinationError, CoordinationService, EventKind};
use protocol::{DirectiveKind, DirectiveMessage};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::await_group::Confirmer;
use crate::error::Result;

/// Confirm once `marker` exists.
pub async fn await_registration(
    session: Arc<dyn CoordinationService>,
    marker: String,
    deadline: Instant,
    confirmer: Confirmer,
) {
    loop {
        let watch = match session.watch(&marker).await {
            Ok(watch) => watch,
            Err(err) => {
                warn!(%marker, error = %err, "cannot watch marker");
                return;
            }
        };
        match session.exists(&marker).await {
            Ok(true) => {
                confirmer.confirm();
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%marker, error = %err, "cannot check marker");
                return;
            }
        }
        if tokio::time::timeout_at(deadline, watch.fired()).await.is_err() {
            debug!(%marker, "server did not register in time");
            return;
        }
    }
}

/// Write `directive` to `marker` and confirm when the server echoes it back.
pub async fn deliver(
    session: Arc<dyn CoordinationService>,
    marker: String,
    directive: DirectiveMessage,
    deadline: Instant,
    confirmer: Confirmer,
) {
    if let Err(err) = try_deliver(session.as_ref(), &marker, &directive, deadline, &confirmer).await {
        warn!(%marker, kind = %directive.kind, error = %err, "directive not delivered");
    }
}

async fn try_deliver(
    session: &dyn CoordinationService,
    marker: &str,
    directive: &DirectiveMessage,
    deadline: Instant,
    confirmer: &Confirmer,
) -> Result<()> {
    let written = session.set_data(marker, directive.encode()?).await?;
    loop {
        let watch = session.watch(marker).await?;
        let (data, version) = match session.get_data(marker).await {
            Ok(found) => found,
            // A server that acted on SHUTDOWN takes its marker with it.
            Err(CoordinationError::NoNode(_)) => {
                if directive.kind == DirectiveKind::Shutdown {
                    confirmer.confirm();
                }
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if version > written {
            match DirectiveMessage::decode(&data) {
                Ok(echo) if !echo.is_from_coordinator() && echo.kind == directive.kind => {
                    confirmer.confirm();
                    return Ok(());
                }
                // Overwritten by someone else; this directive is lost.
                _ => return Ok(()),
            }
        }
        match tokio::time::timeout_at(deadline, watch.fired()).await {
            Ok(event) if event.kind == EventKind::SessionClosed => return Ok(()),
            Ok(_) => {}
            Err(_) => {
                debug!(%marker, kind = %directive.kind, "no acknowledgement in time");
                return Ok(());
            }
        }
    }
}
