use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// The JSON wrapper delivered to the tenant sink.
///
/// Field order is the canonical serialization order; the signature covers the
/// serialized bytes exactly as sent. An empty `tenant_id` is omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    pub wa_account_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub request_id: String,
}

impl Envelope {
    /// Build an envelope with a fresh request id and the current time.
    #[must_use]
    pub fn new(
        event_type: &str,
        wa_account_id: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            wa_account_id: wa_account_id.to_string(),
            tenant_id: String::new(),
            timestamp: Utc::now(),
            data,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = tenant_id.to_string();
        self
    }

    /// A `status` envelope, the shape used for connection transitions.
    #[must_use]
    pub fn status(wa_account_id: &str, status: &str, message: &str) -> Self {
        let mut data = serde_json::Map::new();
        data.insert("status".into(), status.into());
        if !message.is_empty() {
            data.insert("message".into(), message.into());
        }
        Self::new("status", wa_account_id, data)
    }

    /// An `error` envelope for surfacing session failures to the sink.
    #[must_use]
    pub fn error(wa_account_id: &str, code: &str, message: &str) -> Self {
        let mut data = serde_json::Map::new();
        data.insert("error_code".into(), code.into());
        data.insert("error_message".into(), message.into());
        Self::new("error", wa_account_id, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tenant_id_is_omitted() {
        let envelope = Envelope::new("inbound", "acct-1", serde_json::Map::new());
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("tenant_id"));

        let with_tenant = envelope.with_tenant("tenant-9");
        let json = serde_json::to_string(&with_tenant).unwrap();
        assert!(json.contains("\"tenant_id\":\"tenant-9\""));
    }

    #[test]
    fn new_fills_request_id_and_timestamp() {
        let envelope = Envelope::new("inbound", "acct-1", serde_json::Map::new());
        assert!(!envelope.request_id.is_empty());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn status_envelope_shape() {
        let envelope = Envelope::status("acct-1", "logged_out", "device removed");
        assert_eq!(envelope.event_type, "status");
        assert_eq!(envelope.data["status"], "logged_out");
        assert_eq!(envelope.data["message"], "device removed");

        let bare = Envelope::status("acct-1", "connected", "");
        assert!(!bare.data.contains_key("message"));
    }

    #[test]
    fn round_trips_through_json() {
        let mut data = serde_json::Map::new();
        data.insert("message_id".into(), "3EB0AAA".into());
        let envelope = Envelope::new("delivery", "acct-1", data);

        let bytes = serde_json::to_vec(&envelope).unwrap();
        let back: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.event_type, "delivery");
        assert_eq!(back.wa_account_id, "acct-1");
        assert_eq!(back.data["message_id"], "3EB0AAA");
        assert_eq!(back.request_id, envelope.request_id);
    }
}
