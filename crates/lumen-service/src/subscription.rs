//! Relay subscription lifecycle: filter, EOSE, per-event task fan-out,
//! bounded concurrency and cancellation.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use lumen_core::constants::{DEFAULT_HANDLER_CONCURRENCY, REQUEST_KIND};
use lumen_core::LumenError;
use lumen_relay::Filter;

use crate::announcer;
use crate::router;
use crate::service::Service;

#[derive(Clone, Debug)]
pub struct SubscriptionOptions {
    /// Maximum number of concurrently processed events.
    pub concurrency: usize,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_HANDLER_CONCURRENCY,
        }
    }
}

/// Subscribe and process events until the relay closes or `shutdown` flips.
///
/// Returns `Ok(())` on clean shutdown (after draining in-flight handlers)
/// and `Err` when the relay connection failed — the caller owns reconnects.
pub async fn run(
    service: Arc<Service>,
    options: SubscriptionOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), LumenError> {
    let since = match service.store().last_seen_timestamp()? {
        Some(ts) => ts,
        None => Utc::now().timestamp(),
    };
    let filter = Filter::new()
        .kind(REQUEST_KIND)
        .p_tag(&service.keys().pubkey())
        .since(since);

    let mut sub = service
        .relay()
        .subscribe(filter)
        .await
        .map_err(|e| LumenError::Relay(e.to_string()))?;
    info!(since, "subscribed to relay");

    // Stored events replay before the marker; both are processed the same
    // way, the marker is only logged.
    let eose = sub.eose;
    tokio::spawn(async move {
        if eose.await.is_ok() {
            info!("end of stored events");
        }
    });

    announcer::publish_info(&service).await;

    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mut handlers = JoinSet::new();

    let closed_reason = loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("shutdown requested, draining in-flight handlers");
                    break None;
                }
            }

            // Reap finished handlers so the set does not grow unbounded.
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}

            maybe_event = sub.events.recv() => match maybe_event {
                Some(event) => {
                    if let Err(e) = service.store().set_last_seen_timestamp(event.created_at) {
                        warn!(error = %e, "failed to advance last-seen timestamp");
                    }
                    // Backpressure: wait for a handler slot instead of
                    // spawning without bound.
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break None,
                    };
                    let service = Arc::clone(&service);
                    handlers.spawn(async move {
                        router::handle_event(&service, event).await;
                        drop(permit);
                    });
                }
                None => {
                    let reason = sub
                        .error
                        .borrow()
                        .clone()
                        .unwrap_or_else(|| "event stream ended".to_string());
                    break Some(reason);
                }
            },
        }
    };

    while handlers.join_next().await.is_some() {}

    match closed_reason {
        Some(reason) => Err(LumenError::Relay(reason)),
        None => Ok(()),
    }
}
