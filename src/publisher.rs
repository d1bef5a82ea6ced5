//! Transaction publishing.
//!
//! The caller's payload is spliced into the outgoing envelope byte-for-byte;
//! re-encoding it could change numeric representation or field order, and
//! consumers hash raw field values into reference counts.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::AppError;
use crate::models::transaction::TrType;
use crate::registry;

/// Build the wire envelope around a raw JSON payload.
pub fn build_envelope(tr_type: TrType, payload: &str) -> String {
    format!("{{\"tr_type\": \"{tr_type}\", \"payload\": {payload}}}")
}

/// Publish one transaction on a resource channel.
///
/// Fails with 404 when no active analytics subscribes to the channel, and
/// with 503 when the store reports a listener count different from the
/// registered subscriber count.
pub async fn publish_transaction(
    conn: &mut ConnectionManager,
    channel: &str,
    tr_type: TrType,
    payload: &str,
) -> Result<(), AppError> {
    let subscribed: i64 = conn.scard(registry::channel_analytics_key(channel)).await?;
    if subscribed == 0 {
        return Err(AppError::not_found(
            "Channel not found",
            format!("Channel '{channel}' is not found or has 0 subscriptions"),
        ));
    }
    let listened: i64 = conn.publish(channel, build_envelope(tr_type, payload)).await?;
    if listened != subscribed {
        return Err(AppError::service_unavailable(
            "Subscription-Listened mismatch",
            format!("Listened count = {listened} doesn't match Subscribed count = {subscribed}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_splices_payload_verbatim() {
        // Odd spacing, field order, and numeric forms must survive.
        let payload = r#"{"b": 1.50, "a":"x"}"#;
        let envelope = build_envelope(TrType::Insert, payload);
        assert_eq!(
            envelope,
            r#"{"tr_type": "insert", "payload": {"b": 1.50, "a":"x"}}"#
        );
    }

    #[test]
    fn envelope_parses_back() {
        let envelope = build_envelope(TrType::Delete, r#"{"amount": 0.5}"#);
        let parsed: crate::models::transaction::TransactionEnvelope =
            serde_json::from_str(&envelope).unwrap();
        assert_eq!(parsed.tr_type, TrType::Delete);
        assert_eq!(parsed.payload["amount"], 0.5);
    }
}
