//! Comms subsystem: manages all external I/O channels.
//!
//! # Architecture
//!
//! Each channel (console, HTTP) implements [`Component`] and is spawned as
//! an independent concurrent task by [`start`] via [`spawn_components`].
//! Channels capture their shared [`Arc<CommsState>`] at construction time;
//! no state is passed through the generic `Component::run` signature.
//!
//! An intra-subsystem [`mpsc`] channel lets running channels signal the
//! comms manager (lifecycle events, session tracking). This is drained in a
//! short-lived background task that dies naturally when all channel senders
//! are dropped.
//!
//! # Starting
//!
//! [`start`] is synchronous and returns a [`SubsystemHandle`] as soon as
//! the tasks are spawned. The caller decides when (or whether) to await it.

mod state;
#[cfg(feature = "channel-pty")]
pub mod pty;
#[cfg(feature = "channel-axum")]
pub mod axum_channel;

pub use state::{CommsEvent, CommsState, RequestError};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::subsystems::runtime::{Component, SubsystemHandle, spawn_components};
use crate::supervisor::bus::BusHandle;

// ── start ───────────────────────────────────────────────────────────────────

/// Spawn all configured comms channels and return a [`SubsystemHandle`].
///
/// The console channel loads when `[comms.pty]` is enabled (the binary turns
/// it off unless run with `-i`); the HTTP channel loads when `[comms.http]`
/// is enabled. If any
/// channel exits with an error the shared `shutdown` token is cancelled so
/// siblings stop cooperatively.
pub fn start(
    config: &Config,
    bus: BusHandle,
    shutdown: CancellationToken,
) -> SubsystemHandle {
    let (event_tx, event_rx) = mpsc::channel::<CommsEvent>(32);
    let state = Arc::new(CommsState::new(bus, event_tx, config.workflow.default_role));

    let mut components: Vec<Box<dyn Component>> = Vec::new();

    if config.comms.pty.enabled {
        #[cfg(feature = "channel-pty")]
        {
            info!("loading pty channel");
            components.push(Box::new(pty::PtyChannel::new("pty0", state.clone())));
        }
        #[cfg(not(feature = "channel-pty"))]
        tracing::warn!("console requested but the `channel-pty` feature is disabled");
    }

    if config.comms.http.enabled {
        #[cfg(feature = "channel-axum")]
        {
            info!(bind = %config.comms.http.bind, "loading http channel");
            components.push(Box::new(axum_channel::AxumChannel::new(
                "http0",
                config.comms.http.bind.clone(),
                state.clone(),
            )));
        }
        #[cfg(not(feature = "channel-axum"))]
        tracing::warn!("[comms.http] is enabled but the `channel-axum` feature is disabled");
    }

    if components.is_empty() {
        info!("no comms channels configured; waiting for shutdown");
    }

    // Monitoring-only drain; ends when every channel has dropped its sender.
    tokio::spawn(async move {
        let mut rx = event_rx;
        while let Some(event) = rx.recv().await {
            match event {
                CommsEvent::ChannelShutdown { ref channel_id } => {
                    debug!(%channel_id, "channel reported shutdown");
                }
                CommsEvent::SessionStarted { ref channel_id } => {
                    debug!(%channel_id, "channel session started");
                }
            }
        }
    });

    spawn_components(components, shutdown)
}
