use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::BusError;

fn published_now() -> String {
    Utc::now().to_rfc3339()
}

/// Envelope payload. The wire format allows either a single JSON object or a
/// list of JSON objects; anything else (scalars, mixed lists) is rejected at
/// decode time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Object(Map<String, Value>),
    List(Vec<Map<String, Value>>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Object(Map::new())
    }
}

impl TryFrom<Value> for Payload {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Payload::default()),
            Value::Object(map) => Ok(Payload::Object(map)),
            Value::Array(items) => {
                let mut maps = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(map) => maps.push(map),
                        other => {
                            return Err(format!(
                                "data list may only hold objects, got {}",
                                type_name(&other)
                            ))
                        }
                    }
                }
                Ok(Payload::List(maps))
            }
            other => Err(format!(
                "data must be an object or a list of objects, got {}",
                type_name(&other)
            )),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Payload::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// The wire envelope every topic message carries. Field names follow the
/// camelCase wire format; absent fields decode to their defaults so older
/// producers keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "messageId", default)]
    pub message_id: String,
    #[serde(rename = "messageType", default)]
    pub message_type: String,
    #[serde(rename = "publishedDate", default = "published_now")]
    pub published_date: String,
    #[serde(default)]
    pub data: Payload,
}

impl QueueEnvelope {
    /// Builds a fresh envelope with a generated message id and the current
    /// time as the published date.
    pub fn new(message: &str, message_type: &str, data: Payload) -> Self {
        QueueEnvelope {
            message: message.to_owned(),
            message_id: Uuid::now_v7().to_string(),
            message_type: message_type.to_owned(),
            published_date: published_now(),
            data,
        }
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, BusError> {
        serde_json::from_slice(body)
            .map_err(|e| BusError::Unprocessable(format!("invalid queue envelope: {}", e)))
    }

    pub fn to_bytes(&self) -> Result<Bytes, BusError> {
        let raw = serde_json::to_vec(self)
            .map_err(|e| BusError::Internal(format!("failed to encode envelope: {}", e)))?;
        Ok(Bytes::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decodes_full_envelope() {
        let raw = json!({
            "message": "order received",
            "messageId": "0190cafe-0000-7000-8000-000000000001",
            "messageType": "order",
            "publishedDate": "2024-05-01T12:00:00+00:00",
            "data": {"order_id": 42}
        });
        let envelope = QueueEnvelope::from_bytes(raw.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.message, "order received");
        assert_eq!(envelope.message_type, "order");
        assert_eq!(envelope.published_date, "2024-05-01T12:00:00+00:00");
        let Payload::Object(data) = envelope.data else {
            panic!("expected object payload");
        };
        assert_eq!(data.get("order_id"), Some(&json!(42)));
    }

    #[test]
    fn test_missing_fields_decode_to_defaults() {
        let envelope = QueueEnvelope::from_bytes(b"{}").unwrap();
        assert_eq!(envelope.message, "");
        assert_eq!(envelope.message_id, "");
        assert_eq!(envelope.message_type, "");
        assert!(!envelope.published_date.is_empty());
        assert_eq!(envelope.data, Payload::default());
    }

    #[test]
    fn test_null_data_decodes_to_empty_object() {
        let raw = json!({"message": "m", "data": null});
        let envelope = QueueEnvelope::from_bytes(raw.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.data, Payload::Object(Map::new()));
    }

    #[test]
    fn test_list_of_objects_data() {
        let raw = json!({"data": [{"a": 1}, {"b": 2}]});
        let envelope = QueueEnvelope::from_bytes(raw.to_string().as_bytes()).unwrap();
        let Payload::List(items) = envelope.data else {
            panic!("expected list payload");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_scalar_data_is_unprocessable() {
        let raw = json!({"data": "not an object"});
        let err = QueueEnvelope::from_bytes(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, BusError::Unprocessable(_)));

        let raw = json!({"data": 42});
        let err = QueueEnvelope::from_bytes(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, BusError::Unprocessable(_)));

        let raw = json!({"data": [1, 2, 3]});
        let err = QueueEnvelope::from_bytes(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, BusError::Unprocessable(_)));
    }

    #[test]
    fn test_invalid_json_is_unprocessable() {
        let err = QueueEnvelope::from_bytes(b"not json at all").unwrap_err();
        assert!(matches!(err, BusError::Unprocessable(_)));
    }

    #[test]
    fn test_round_trip_keeps_wire_field_names() {
        let envelope = QueueEnvelope::new(
            "order received",
            "order",
            Payload::try_from(json!({"order_id": 42})).unwrap(),
        );
        let raw = envelope.to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&raw).unwrap();
        assert_json_eq!(
            value,
            json!({
                "message": "order received",
                "messageId": envelope.message_id,
                "messageType": "order",
                "publishedDate": envelope.published_date,
                "data": {"order_id": 42}
            })
        );
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = QueueEnvelope::new("m", "t", Payload::default());
        let b = QueueEnvelope::new("m", "t", Payload::default());
        assert_ne!(a.message_id, b.message_id);
    }
}
