//! Capability advertisement: one plaintext event listing supported methods,
//! published on every successful relay attach.

use chrono::Utc;
use tracing::{info, warn};

use lumen_core::constants::INFO_KIND;
use lumen_core::payload::supported_methods_content;
use lumen_crypto::sign_event;
use lumen_relay::PublishOutcome;

use crate::service::Service;

pub async fn publish_info(service: &Service) {
    let event = sign_event(
        service.keys(),
        Utc::now().timestamp(),
        INFO_KIND,
        Vec::new(),
        supported_methods_content(),
    );
    match service.relay().publish(event).await {
        PublishOutcome::Succeeded => info!("capability advertisement published"),
        PublishOutcome::Failed(reason) => {
            warn!(%reason, "capability advertisement rejected")
        }
        PublishOutcome::Unconfirmed => warn!("capability advertisement unconfirmed"),
    }
}
