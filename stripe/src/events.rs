//! Stripe event JSON → [`GatewayEvent`].

use crate::types::{StripeEvent, StripeSession};
use payment_saga_core::gateway::{GatewayError, GatewayEvent};
use payment_saga_core::payment::{PaymentRef, SessionRef};

/// Decode a verified webhook body.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidEvent`] if the body is not an event, or if a
/// checkout event does not carry a session object.
pub fn parse_event(payload: &[u8]) -> Result<GatewayEvent, GatewayError> {
    let event: StripeEvent =
        serde_json::from_slice(payload).map_err(|e| GatewayError::InvalidEvent(e.to_string()))?;

    let session = || {
        serde_json::from_value::<StripeSession>(event.data.object.clone())
            .map_err(|e| GatewayError::InvalidEvent(format!("{}: {e}", event.event_type)))
    };

    Ok(match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session = session()?;
            GatewayEvent::CheckoutCompleted {
                paid: session.is_paid(),
                payment_ref: session.payment_intent_id().map(PaymentRef::from),
                session_ref: SessionRef::from(session.id),
                event_id: event.id,
            }
        }
        "checkout.session.async_payment_succeeded" => {
            let session = session()?;
            GatewayEvent::AsyncPaymentSucceeded {
                payment_ref: session.payment_intent_id().map(PaymentRef::from),
                session_ref: SessionRef::from(session.id),
                event_id: event.id,
            }
        }
        "checkout.session.async_payment_failed" => GatewayEvent::AsyncPaymentFailed {
            session_ref: SessionRef::from(session()?.id),
            event_id: event.id,
        },
        "checkout.session.expired" => GatewayEvent::SessionExpired {
            session_ref: SessionRef::from(session()?.id),
            event_id: event.id,
        },
        _ => GatewayEvent::Other {
            event_id: event.id,
            event_type: event.event_type,
        },
    })
}
