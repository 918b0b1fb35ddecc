//! Webhook ingestion for lender push notifications.
//!
//! The raw body is kept unparsed until the signature check has run. The
//! ledger insert is the idempotency point: the first delivery of an event id
//! wins the processing path, every later delivery is acknowledged without
//! side effects. Business-logic failures are acknowledged with 200 so the
//! lender does not retry-storm on events that can never succeed; only
//! malformed, unverifiable or pre-ledger infrastructure failures ask for a
//! retry.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::{ApplicationStatus, ProposalStatus, ResponseData};
use crate::lender::{Contract, ContractStatus, PaymentSchedule};
use crate::store::{ApplicationStore, ProposalStore, WebhookEventRecord, WebhookLedger};

pub const PROVIDER: &str = "helios";
pub const SIGNATURE_HEADER: &str = "x-helios-signature";

#[derive(Clone)]
pub struct WebhookState {
    pub applications: Arc<dyn ApplicationStore>,
    pub ledger: Arc<dyn WebhookLedger>,
    pub proposals: Arc<dyn ProposalStore>,
    pub secret: Option<String>,
}

pub fn router(state: WebhookState) -> axum::Router {
    axum::Router::new()
        .route("/webhooks/helios", post(receive_event))
        .route("/health", get(healthcheck))
        .with_state(state)
}

async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn ack(status: StatusCode, success: bool, message: &str, event_id: Option<&str>) -> impl IntoResponse {
    (
        status,
        Json(json!({
            "success": success,
            "message": message,
            "eventId": event_id,
        })),
    )
}

/// Verifies an HMAC-SHA256 hex signature over the raw body.
///
/// `Ok(false)` means the signature is wrong (attacker territory); `Err`
/// means our own verification machinery failed and the event should be
/// treated as unverifiable rather than invalid.
fn verify_signature(
    secret: &str,
    signature: &str,
    body: &[u8],
) -> std::result::Result<bool, String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| format!("hmac key setup: {e}"))?;
    mac.update(body);

    match hex::decode(signature.trim()) {
        // Constant-time comparison via the Mac verifier.
        Ok(bytes) => Ok(mac.verify_slice(&bytes).is_ok()),
        // A header that is not even hex is an invalid signature, not an
        // implementation failure.
        Err(_) => Ok(false),
    }
}

async fn receive_event(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    // Signature policy: with a secret configured we fail closed, both on a
    // bad signature and on a missing header. Verification only becomes
    // optional when no secret is configured at all.
    if let Some(secret) = &state.secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        match signature {
            None => {
                warn!("webhook rejected: secret configured but no signature header");
                return ack(
                    StatusCode::UNAUTHORIZED,
                    false,
                    "missing webhook signature",
                    None,
                )
                .into_response();
            }
            Some(signature) => match verify_signature(secret, signature, &body) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("webhook rejected: signature verification failed");
                    return ack(
                        StatusCode::UNAUTHORIZED,
                        false,
                        "invalid webhook signature",
                        None,
                    )
                    .into_response();
                }
                Err(reason) => {
                    // Broken verifier, not a bad caller. Continue so an
                    // infrastructure bug cannot dam up event delivery.
                    error!(%reason, "webhook signature verification errored, continuing unverified");
                }
            },
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "webhook body is not valid JSON");
            return ack(StatusCode::BAD_REQUEST, false, "request body is not valid JSON", None)
                .into_response();
        }
    };

    let event_id = payload.get("eventId").and_then(Value::as_str).unwrap_or("");
    let event_type = payload.get("eventType").and_then(Value::as_str).unwrap_or("");
    if event_id.is_empty() || event_type.is_empty() {
        return ack(
            StatusCode::BAD_REQUEST,
            false,
            "eventId and eventType are required",
            None,
        )
        .into_response();
    }

    // The ledger insert is the mutual-exclusion point for duplicate
    // deliveries, including two copies racing each other.
    let record = WebhookEventRecord {
        provider: PROVIDER.to_string(),
        event_id: event_id.to_string(),
        event_type: event_type.to_string(),
        payload: payload.clone(),
        received_at: Utc::now(),
        processed_at: None,
        last_error: None,
    };
    match state.ledger.insert_if_absent(record).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(event_id, "duplicate webhook delivery, already recorded");
            return ack(StatusCode::OK, true, "event already processed", Some(event_id))
                .into_response();
        }
        Err(e) => {
            e.log_details();
            return ack(
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
                "failed to record event",
                Some(event_id),
            )
            .into_response();
        }
    }

    let outcome = process_event(&state, event_type, &payload).await;
    let (message, last_error) = match &outcome {
        Ok(message) => (message.clone(), None),
        Err(reason) => {
            warn!(event_id, event_type, %reason, "webhook processing failed");
            (reason.clone(), Some(reason.clone()))
        }
    };

    // The event itself is already durable; a failed outcome write must not
    // turn the acknowledgment into a retry.
    if let Err(e) = state
        .ledger
        .record_outcome(PROVIDER, event_id, last_error)
        .await
    {
        warn!(event_id, error = %e, "could not record webhook outcome");
    }

    ack(StatusCode::OK, true, &message, Some(event_id)).into_response()
}

fn external_id_of(payload: &Value) -> Option<&str> {
    payload
        .get("accountId")
        .and_then(Value::as_str)
        .or_else(|| {
            payload
                .get("data")
                .and_then(|d| d.get("accountId"))
                .and_then(Value::as_str)
        })
}

/// Applies one event to the matching application. Errors here are business
/// outcomes, recorded on the ledger row and acknowledged with 200.
async fn process_event(
    state: &WebhookState,
    event_type: &str,
    payload: &Value,
) -> std::result::Result<String, String> {
    let external_id =
        external_id_of(payload).ok_or_else(|| "payload carries no accountId".to_string())?;

    let mut application = state
        .applications
        .find_by_external_id(PROVIDER, external_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no finance application for account {external_id}"))?;

    match event_type {
        "application.submitted" => {
            application
                .transition(ApplicationStatus::Submitted)
                .map_err(|e| e.to_string())?;
        }
        "application.conditional" => {
            application
                .transition(ApplicationStatus::Conditional)
                .map_err(|e| e.to_string())?;
        }
        "application.approved" => {
            application
                .transition(ApplicationStatus::Approved)
                .map_err(|e| e.to_string())?;
        }
        "application.denied" => {
            application
                .transition(ApplicationStatus::Denied)
                .map_err(|e| e.to_string())?;
        }
        "payment_schedule.updated" => {
            let schedule: PaymentSchedule = payload
                .get("data")
                .and_then(|d| d.get("paymentSchedule"))
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .ok_or_else(|| "payload carries no paymentSchedule".to_string())?;
            application.merge_response_data(ResponseData {
                payment_schedule: Some(schedule),
                ..Default::default()
            });
        }
        "document.complete" => {
            application
                .transition(ApplicationStatus::ContractSigned)
                .map_err(|e| e.to_string())?;
            if let Some(contract) = application.response_data.contract.clone() {
                application.merge_response_data(ResponseData {
                    contract: Some(Contract {
                        status: ContractStatus::Signed,
                        signed_at: Some(Utc::now()),
                        ..contract
                    }),
                    ..Default::default()
                });
            }
            // Signing the financing contract accepts the owning proposal.
            state
                .proposals
                .set_proposal_status(application.proposal_id, ProposalStatus::Accepted)
                .await
                .map_err(|e| e.to_string())?;
            info!(
                application_id = %application.id,
                proposal_id = %application.proposal_id,
                "contract signed, proposal accepted"
            );
        }
        "document.voided" => {
            // Back to a pre-contract state; the application status itself
            // stays wherever approval left it.
            if let Some(contract) = application.response_data.contract.clone() {
                application.merge_response_data(ResponseData {
                    contract: Some(Contract {
                        status: ContractStatus::Voided,
                        ..contract
                    }),
                    ..Default::default()
                });
            }
        }
        other => return Err(format!("unhandled event type '{other}'")),
    }

    state
        .applications
        .update(&application)
        .await
        .map_err(|e| e.to_string())?;

    Ok(format!("applied {event_type} to application {}", application.id))
}
