//! Response publishing: encrypt, sign, persist, publish, record outcome.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use lumen_core::constants::RESPONSE_KIND;
use lumen_core::model::{ResponseEvent, ResponseEventState};
use lumen_core::payload::Response;
use lumen_core::{EventId, LumenError, Pubkey};
use lumen_crypto::{envelope, sign_event};
use lumen_relay::PublishOutcome;

use crate::service::Service;

/// Encrypt and sign `response`, persist it, publish it, and record the
/// publish outcome on both the response row and (on success) the request row.
///
/// If envelope construction fails nothing is persisted or published.
pub async fn publish_response(
    service: &Service,
    request_id: &EventId,
    app_id: Option<u64>,
    recipient: &Pubkey,
    secret: &[u8; 32],
    response: &Response,
    extra_tags: Vec<Vec<String>>,
) -> Result<(), LumenError> {
    let plaintext =
        serde_json::to_string(response).map_err(|e| LumenError::Serialization(e.to_string()))?;
    let ciphertext = envelope::encrypt(&plaintext, secret);

    let mut tags = vec![
        vec!["p".to_string(), recipient.to_hex()],
        vec!["e".to_string(), request_id.to_hex()],
    ];
    tags.extend(extra_tags);

    let event = sign_event(
        service.keys(),
        Utc::now().timestamp(),
        RESPONSE_KIND,
        tags,
        ciphertext,
    );
    let response_id = event.id;

    service.store().insert_response_event(&ResponseEvent {
        app_id,
        request_event_id: *request_id,
        nostr_id: response_id,
        content: event.content.clone(),
        state: ResponseEventState::Received,
        replied_at: None,
    })?;

    debug!(request = %request_id, response = %response_id, "publishing response");
    match service.relay().publish(event).await {
        PublishOutcome::Succeeded => {
            let replied_at = Utc::now().timestamp();
            service.store().update_response_event_state(
                &response_id,
                ResponseEventState::Confirmed,
                Some(replied_at),
            )?;
            service.store().mark_request_replied(request_id, replied_at)?;
            service.logger().emit(
                "nwc_response_published",
                json!({ "request": request_id.to_hex(), "result_type": response.result_type }),
            );
        }
        PublishOutcome::Failed(reason) => {
            warn!(response = %response_id, %reason, "relay rejected response");
            service.store().update_response_event_state(
                &response_id,
                ResponseEventState::Failed,
                None,
            )?;
        }
        PublishOutcome::Unconfirmed => {
            warn!(response = %response_id, "no acknowledgement for response");
            service.store().update_response_event_state(
                &response_id,
                ResponseEventState::Unconfirmed,
                None,
            )?;
        }
    }
    Ok(())
}
