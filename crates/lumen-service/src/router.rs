//! Per-event request routing.
//!
//! Each inbound event runs: dedup → verify signature → resolve app →
//! derive secret → decrypt → parse → persist → authorize → dispatch →
//! respond. Errors never escape: they become a persisted response or a
//! dropped event.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use lightning_invoice::Bolt11Invoice;
use serde_json::json;
use tracing::{debug, info, warn};

use lumen_core::constants::{DEFAULT_INVOICE_EXPIRY_SECS, MSATS_PER_SAT, REQUEST_KIND};
use lumen_core::model::{App, RequestEvent, RequestEventState};
use lumen_core::payload::{
    ErrorCode, ListTransactionsParams, LookupInvoiceParams, MakeInvoiceParams, Method,
    MultiPayInvoiceParams, MultiPayKeysendParams, PayInvoiceParams, PayKeysendParams, PayResult,
    Request, Response, SUPPORTED_METHODS,
};
use lumen_core::{Event, EventId, LumenError, Pubkey};
use lumen_crypto::{envelope, verify_event};
use lumen_wallet::{WalletBackend, WalletError};

use crate::policy::{self, PolicyDecision};
use crate::publisher;
use crate::service::Service;

struct RequestContext {
    request_id: EventId,
    sender: Pubkey,
    app: App,
    secret: [u8; 32],
}

/// Entry point for one inbound event. Never propagates an error.
pub async fn handle_event(service: &Arc<Service>, event: Event) {
    if let Err(e) = process_event(service, &event).await {
        warn!(event_id = %event.id, error = %e, "event processing aborted");
    }
}

async fn process_event(service: &Arc<Service>, event: &Event) -> Result<(), LumenError> {
    if event.kind != REQUEST_KIND {
        debug!(event_id = %event.id, kind = event.kind, "ignoring non-request event");
        return Ok(());
    }

    // Dedup: a replayed event must produce no further side effects.
    if service
        .store()
        .find_request_event_by_nostr_id(&event.id)?
        .is_some()
    {
        warn!(event_id = %event.id, "already seen, dropping replay");
        return Ok(());
    }

    if let Err(e) = verify_event(event) {
        warn!(event_id = %event.id, error = %e, "signature verification failed, dropping");
        return Ok(());
    }

    // Unknown sender: we can still encrypt toward the claimed pubkey, so an
    // unauthorized error is returned rather than silence.
    let Some(app) = service.store().find_app_by_pubkey(&event.pubkey)? else {
        info!(sender = %event.pubkey, "request from unregistered pubkey");
        let secret = envelope::shared_secret(&event.pubkey, service.keys().secret_key())?;
        let response = Response::error("", ErrorCode::Unauthorized, "app not registered");
        return publisher::publish_response(
            service,
            &event.id,
            None,
            &event.pubkey,
            &secret,
            &response,
            Vec::new(),
        )
        .await;
    };

    // Re-derive from the registry pubkey rather than trusting the event copy.
    let secret = envelope::shared_secret(&app.nostr_pubkey, service.keys().secret_key())?;

    let plaintext = match envelope::decrypt(&event.content, &secret) {
        Ok(pt) => pt,
        Err(e) => {
            // Cannot respond securely without a provably shared key.
            warn!(event_id = %event.id, error = %e, "undecryptable content, dropping");
            return Ok(());
        }
    };

    let request: Request = match serde_json::from_str(&plaintext) {
        Ok(r) => r,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "unparseable request payload, dropping");
            return Ok(());
        }
    };

    service.store().insert_request_event(&RequestEvent {
        app_id: Some(app.id),
        nostr_id: event.id,
        content: event.content.clone(),
        state: RequestEventState::Received,
        replied_at: None,
    })?;

    let ctx = RequestContext {
        request_id: event.id,
        sender: event.pubkey,
        app,
        secret,
    };

    debug!(event_id = %event.id, app = ctx.app.id, method = %request.method, "dispatching");
    dispatch(service, &ctx, request).await?;

    service.store().mark_request_processed(&event.id)?;
    Ok(())
}

async fn dispatch(
    service: &Arc<Service>,
    ctx: &RequestContext,
    request: Request,
) -> Result<(), LumenError> {
    let Ok(method) = Method::from_str(&request.method) else {
        let response = Response::error(
            &request.method,
            ErrorCode::NotImplemented,
            format!("method {} is not implemented", request.method),
        );
        return publish(service, ctx, &response, Vec::new()).await;
    };

    service.logger().emit(
        "nwc_request_handled",
        json!({ "app_id": ctx.app.id, "method": method.as_str() }),
    );

    // Multi methods fan out: each sub-request is authorized, dispatched and
    // answered independently, and one failure does not halt the batch.
    match method {
        Method::MultiPayInvoice => {
            let params: MultiPayInvoiceParams = match parse_params(method, &request.params) {
                Ok(p) => p,
                Err(resp) => return publish(service, ctx, &resp, Vec::new()).await,
            };
            let subs = params.invoices.into_iter().map(|sub| async move {
                let (sub_id, response) = pay_invoice(service, ctx, method, sub).await;
                publish_sub(service, ctx, sub_id, &response).await;
            });
            join_all(subs).await;
            return Ok(());
        }
        Method::MultiPayKeysend => {
            let params: MultiPayKeysendParams = match parse_params(method, &request.params) {
                Ok(p) => p,
                Err(resp) => return publish(service, ctx, &resp, Vec::new()).await,
            };
            let subs = params.keysends.into_iter().map(|sub| async move {
                let (sub_id, response) = pay_keysend(service, ctx, method, sub).await;
                publish_sub(service, ctx, sub_id, &response).await;
            });
            join_all(subs).await;
            return Ok(());
        }
        _ => {}
    }

    let response = match method {
        Method::PayInvoice => match parse_params(method, &request.params) {
            Ok(p) => pay_invoice(service, ctx, method, p).await.1,
            Err(resp) => resp,
        },
        Method::PayKeysend => match parse_params(method, &request.params) {
            Ok(p) => pay_keysend(service, ctx, method, p).await.1,
            Err(resp) => resp,
        },
        Method::MakeInvoice => match parse_params(method, &request.params) {
            Ok(p) => make_invoice(service, ctx, method, p).await,
            Err(resp) => resp,
        },
        Method::LookupInvoice => match parse_params(method, &request.params) {
            Ok(p) => lookup_invoice(service, ctx, method, p).await,
            Err(resp) => resp,
        },
        Method::ListTransactions => {
            let params = if request.params.is_null() {
                Ok(ListTransactionsParams::default())
            } else {
                parse_params(method, &request.params)
            };
            match params {
                Ok(p) => list_transactions(service, ctx, method, p).await,
                Err(resp) => resp,
            }
        }
        Method::GetBalance => get_balance(service, ctx, method).await,
        Method::GetInfo => get_info(service, ctx, method).await,
        Method::MultiPayInvoice | Method::MultiPayKeysend => return Ok(()),
    };
    publish(service, ctx, &response, Vec::new()).await
}

// ── Publish helpers ───────────────────────────────────────────────────────────

async fn publish(
    service: &Service,
    ctx: &RequestContext,
    response: &Response,
    extra_tags: Vec<Vec<String>>,
) -> Result<(), LumenError> {
    publisher::publish_response(
        service,
        &ctx.request_id,
        Some(ctx.app.id),
        &ctx.sender,
        &ctx.secret,
        response,
        extra_tags,
    )
    .await
}

/// Publish a sub-response with its `d` identification tag. Failures are
/// logged and confined to this sub-request.
async fn publish_sub(service: &Service, ctx: &RequestContext, sub_id: String, response: &Response) {
    let tags = vec![vec!["d".to_string(), sub_id]];
    if let Err(e) = publish(service, ctx, response, tags).await {
        warn!(request = %ctx.request_id, error = %e, "sub-response publish failed");
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    method: Method,
    value: &serde_json::Value,
) -> Result<T, Response> {
    serde_json::from_value(value.clone()).map_err(|e| {
        Response::error(
            method.as_str(),
            ErrorCode::Other,
            format!("invalid params: {e}"),
        )
    })
}

// ── Payment handlers ──────────────────────────────────────────────────────────

/// Pay a BOLT-11 invoice. Returns the sub-request identifier (for the `d`
/// tag of multi responses) alongside the response.
async fn pay_invoice(
    service: &Service,
    ctx: &RequestContext,
    method: Method,
    params: PayInvoiceParams,
) -> (String, Response) {
    let invoice_str = params.invoice.trim().to_string();
    let (amount_msat, sub_id) = match Bolt11Invoice::from_str(&invoice_str) {
        Ok(inv) => (
            // The amount param only applies to zero-amount invoices.
            inv.amount_milli_satoshis().or(params.amount).unwrap_or(0),
            params
                .id
                .clone()
                .unwrap_or_else(|| inv.payment_hash().to_string()),
        ),
        Err(e) => {
            let sub_id = params.id.clone().unwrap_or_else(|| invoice_str.clone());
            let response = Response::error(
                method.as_str(),
                ErrorCode::Other,
                format!("invalid invoice: {e}"),
            );
            return (sub_id, response);
        }
    };

    let payment_request = invoice_str.clone();
    let amount_override = params.amount;
    let response = settle_payment(
        service,
        ctx,
        method,
        amount_msat,
        Some(payment_request),
        |wallet| async move { wallet.send_payment(&invoice_str, amount_override).await },
    )
    .await;
    (sub_id, response)
}

async fn pay_keysend(
    service: &Service,
    ctx: &RequestContext,
    method: Method,
    params: PayKeysendParams,
) -> (String, Response) {
    let sub_id = params.id.clone().unwrap_or_else(|| params.pubkey.clone());
    let amount_msat = params.amount;
    let dest = params.pubkey.clone();
    let preimage = params.preimage.clone();
    let tlv_records = params.tlv_records.clone().unwrap_or_default();
    let response = settle_payment(service, ctx, method, amount_msat, None, |wallet| async move {
        wallet
            .send_keysend(amount_msat, &dest, preimage, tlv_records)
            .await
    })
    .await;
    (sub_id, response)
}

/// Shared payment path: authorize against the budget, record the payment
/// attempt, invoke the backend, settle the row on success.
///
/// The whole sequence holds the app's payment lock so two concurrent
/// payments cannot both pass the budget check before either settles.
async fn settle_payment<F, Fut>(
    service: &Service,
    ctx: &RequestContext,
    method: Method,
    amount_msat: u64,
    payment_request: Option<String>,
    pay: F,
) -> Response
where
    F: FnOnce(Arc<dyn WalletBackend>) -> Fut,
    Fut: Future<Output = Result<String, WalletError>>,
{
    let result_type = method.as_str();
    let lock = service.pay_lock(ctx.app.id).await;
    let _guard = lock.lock().await;

    let now = Utc::now().timestamp();
    match policy::authorize(service.store(), &ctx.app, method, amount_msat, now) {
        Ok(PolicyDecision::Allow) => {}
        Ok(PolicyDecision::Deny { code, message }) => {
            info!(app = ctx.app.id, method = %method, code = ?code, "payment denied");
            return Response::error(result_type, code, message);
        }
        Err(e) => {
            warn!(app = ctx.app.id, error = %e, "authorization lookup failed");
            return Response::error(result_type, ErrorCode::Internal, e.to_string());
        }
    }

    let payment = match service.store().insert_payment(
        ctx.app.id,
        &ctx.request_id,
        amount_msat / MSATS_PER_SAT,
        payment_request,
        now,
    ) {
        Ok(p) => p,
        Err(e) => {
            warn!(app = ctx.app.id, error = %e, "failed to record payment");
            return Response::error(result_type, ErrorCode::Internal, e.to_string());
        }
    };

    let wallet = service.wallet().await;
    match pay(wallet).await {
        Ok(preimage) => {
            if let Err(e) = service.store().update_payment_preimage(&payment, &preimage) {
                warn!(payment = payment.id, error = %e, "failed to record preimage");
            }
            service.logger().emit(
                "nwc_payment_succeeded",
                json!({ "app_id": ctx.app.id, "amount_msat": amount_msat }),
            );
            Response::ok(result_type, &PayResult { preimage })
        }
        Err(e) => {
            service.logger().emit(
                "nwc_payment_failed",
                json!({ "app_id": ctx.app.id, "amount_msat": amount_msat }),
            );
            let (code, message) = map_payment_error(&e);
            Response::error(result_type, code, message)
        }
    }
}

// ── Query handlers ────────────────────────────────────────────────────────────

fn check_permission(service: &Service, ctx: &RequestContext, method: Method) -> Option<Response> {
    match policy::authorize(
        service.store(),
        &ctx.app,
        method,
        0,
        Utc::now().timestamp(),
    ) {
        Ok(PolicyDecision::Allow) => None,
        Ok(PolicyDecision::Deny { code, message }) => {
            info!(app = ctx.app.id, method = %method, code = ?code, "request denied");
            Some(Response::error(method.as_str(), code, message))
        }
        Err(e) => Some(Response::error(
            method.as_str(),
            ErrorCode::Internal,
            e.to_string(),
        )),
    }
}

async fn make_invoice(
    service: &Service,
    ctx: &RequestContext,
    method: Method,
    params: MakeInvoiceParams,
) -> Response {
    if let Some(denied) = check_permission(service, ctx, method) {
        return denied;
    }
    let wallet = service.wallet().await;
    match wallet
        .make_invoice(
            params.amount,
            params.description.as_deref().unwrap_or(""),
            params.description_hash.as_deref().unwrap_or(""),
            params.expiry.unwrap_or(DEFAULT_INVOICE_EXPIRY_SECS),
        )
        .await
    {
        Ok(invoice) => Response::ok(method.as_str(), &invoice),
        Err(e) => wallet_error_response(method, &e),
    }
}

async fn lookup_invoice(
    service: &Service,
    ctx: &RequestContext,
    method: Method,
    params: LookupInvoiceParams,
) -> Response {
    if let Some(denied) = check_permission(service, ctx, method) {
        return denied;
    }
    let wallet = service.wallet().await;
    match wallet.lookup_invoice(&params.payment_hash).await {
        Ok(invoice) => Response::ok(method.as_str(), &invoice),
        Err(WalletError::NotFound) => {
            Response::error(method.as_str(), ErrorCode::Internal, "invoice not found")
        }
        Err(e) => wallet_error_response(method, &e),
    }
}

async fn list_transactions(
    service: &Service,
    ctx: &RequestContext,
    method: Method,
    params: ListTransactionsParams,
) -> Response {
    if let Some(denied) = check_permission(service, ctx, method) {
        return denied;
    }
    let wallet = service.wallet().await;
    match wallet.list_transactions(&params).await {
        Ok(transactions) => Response::ok(method.as_str(), &json!({ "transactions": transactions })),
        Err(e) => wallet_error_response(method, &e),
    }
}

async fn get_balance(service: &Service, ctx: &RequestContext, method: Method) -> Response {
    if let Some(denied) = check_permission(service, ctx, method) {
        return denied;
    }
    let wallet = service.wallet().await;
    match wallet.get_balance().await {
        Ok(balance) => Response::ok(method.as_str(), &json!({ "balance": balance })),
        Err(e) => wallet_error_response(method, &e),
    }
}

async fn get_info(service: &Service, ctx: &RequestContext, method: Method) -> Response {
    if let Some(denied) = check_permission(service, ctx, method) {
        return denied;
    }
    let wallet = service.wallet().await;
    match wallet.get_info().await {
        Ok(info) => Response::ok(
            method.as_str(),
            &json!({
                "alias": info.alias,
                "color": info.color,
                "pubkey": info.pubkey,
                "network": info.network,
                "block_height": info.block_height,
                "block_hash": info.block_hash,
                "methods": SUPPORTED_METHODS.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
            }),
        ),
        Err(e) => wallet_error_response(method, &e),
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

fn map_payment_error(e: &WalletError) -> (ErrorCode, String) {
    match e {
        WalletError::InsufficientBalance => {
            (ErrorCode::InsufficientBalance, "insufficient balance".into())
        }
        WalletError::RouteNotFound => (ErrorCode::PaymentFailed, "no route to destination".into()),
        WalletError::NotFound => (ErrorCode::PaymentFailed, "destination not found".into()),
        WalletError::Internal(m) => (ErrorCode::PaymentFailed, m.clone()),
    }
}

fn wallet_error_response(method: Method, e: &WalletError) -> Response {
    Response::error(method.as_str(), ErrorCode::Internal, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_errors_map_to_wire_codes() {
        let (code, _) = map_payment_error(&WalletError::InsufficientBalance);
        assert_eq!(code, ErrorCode::InsufficientBalance);
        let (code, _) = map_payment_error(&WalletError::RouteNotFound);
        assert_eq!(code, ErrorCode::PaymentFailed);
        let (code, _) = map_payment_error(&WalletError::Internal("boom".into()));
        assert_eq!(code, ErrorCode::PaymentFailed);
    }

    #[test]
    fn parse_params_reports_shape_errors() {
        let err = parse_params::<PayKeysendParams>(
            Method::PayKeysend,
            &json!({ "pubkey": "02abc" }), // missing amount
        )
        .unwrap_err();
        assert_eq!(err.error.unwrap().code, ErrorCode::Other);
    }
}
