//! Supervisor: owns the event bus and routes messages between channels and
//! subsystems.

pub mod bus;
pub mod dispatch;

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use bus::{BusError, BusMessage, ERR_METHOD_NOT_FOUND, SupervisorBus};
use dispatch::{BusHandler, split_method};

/// Run the supervisor message loop until `shutdown` is cancelled or every
/// bus handle has been dropped.
///
/// The supervisor is a pure router: it reads each message, determines the
/// target subsystem by the first `/`-delimited method segment, and hands
/// off ownership of `reply_tx` to the matching [`BusHandler`]. Handlers
/// spawn any long-running work, so this loop never waits on a case.
///
/// Two handlers sharing a prefix is a wiring error reported before the loop starts.
pub async fn run(
    mut bus: SupervisorBus,
    shutdown: CancellationToken,
    handlers: Vec<Box<dyn BusHandler>>,
) -> Result<(), AppError> {
    let mut table: HashMap<String, Box<dyn BusHandler>> = HashMap::new();
    for h in handlers {
        let prefix = h.prefix().to_string();
        if table.insert(prefix.clone(), h).is_some() {
            return Err(AppError::Config(format!(
                "duplicate bus handler prefix registered: {prefix:?}"
            )));
        }
    }

    // The supervisor keeps its own handle only for cloning; drop it so the
    // loop ends once every channel has gone away.
    drop(bus.handle);

    info!(
        handlers = ?table.keys().collect::<Vec<_>>(),
        "supervisor ready"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("supervisor shutting down");
                break;
            }

            msg = bus.rx.recv() => {
                match msg {
                    Some(BusMessage::Request { id, method, payload, reply_tx }) => {
                        let (prefix, _) = split_method(&method);
                        match table.get(prefix) {
                            Some(handler) => {
                                debug!(%id, %method, "routing request");
                                handler.handle_request(&method, payload, reply_tx);
                            }
                            None => {
                                warn!(%method, "unhandled request method");
                                let _ = reply_tx.send(Err(BusError::new(
                                    ERR_METHOD_NOT_FOUND,
                                    format!("method not found: {method}"),
                                )));
                            }
                        }
                    }
                    Some(BusMessage::Notification { method, payload }) => {
                        let (prefix, _) = split_method(&method);
                        match table.get(prefix) {
                            Some(handler) => {
                                debug!(%method, "routing notification");
                                handler.handle_notification(&method, payload);
                            }
                            None => {
                                debug!(%method, "unhandled notification");
                            }
                        }
                    }
                    None => {
                        info!("bus closed, supervisor exiting");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::{BusPayload, BusResult};
    use tokio::sync::oneshot;

    struct Echo(&'static str);

    impl BusHandler for Echo {
        fn prefix(&self) -> &str {
            self.0
        }

        fn handle_request(&self, method: &str, _payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
            let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data: method.to_string() }));
        }
    }

    #[tokio::test]
    async fn routes_by_prefix_and_rejects_unknown() {
        let bus = SupervisorBus::new(8);
        let handle = bus.handle.clone();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(bus, shutdown.clone(), vec![Box::new(Echo("cases"))]));

        let ok = handle.request("cases/stats", BusPayload::Empty).await.unwrap();
        assert!(matches!(ok, Ok(BusPayload::JsonResponse { ref data }) if data == "cases/stats"));

        let missing = handle.request("nope/x", BusPayload::Empty).await.unwrap();
        assert_eq!(missing.unwrap_err().code, ERR_METHOD_NOT_FOUND);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn duplicate_prefix_is_error() {
        let bus = SupervisorBus::new(1);
        let res = run(
            bus,
            CancellationToken::new(),
            vec![Box::new(Echo("cases")), Box::new(Echo("cases"))],
        )
        .await;
        assert!(res.is_err());
    }
}
