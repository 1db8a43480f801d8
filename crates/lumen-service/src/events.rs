use tokio::sync::mpsc;
use tracing::info;

/// A fire-and-forget business event.
#[derive(Debug)]
pub struct BusinessEvent {
    pub name: String,
    pub properties: serde_json::Value,
}

/// Emits business events (`nwc_payment_succeeded`, …) without ever blocking
/// the emitting handler. Events flow over an unbounded channel into a drain
/// task that writes structured log lines.
#[derive(Clone)]
pub struct EventLogger {
    tx: mpsc::UnboundedSender<BusinessEvent>,
}

impl EventLogger {
    /// Start the drain task and return the logger handle.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BusinessEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                info!(
                    target: "lumen::events",
                    event = %event.name,
                    properties = %event.properties,
                    "business event"
                );
            }
        });
        Self { tx }
    }

    /// Emit an event. Dropped silently if the drain task is gone.
    pub fn emit(&self, name: &str, properties: serde_json::Value) {
        let _ = self.tx.send(BusinessEvent {
            name: name.to_string(),
            properties,
        });
    }
}
