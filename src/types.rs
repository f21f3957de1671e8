use axum::body::Bytes;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub internal_id: u64,
    pub public_id: String,
    pub name: String,
    pub description: Option<String>,
    pub application: Option<String>,
    pub active: bool,
    #[serde(rename = "hasSecret", serialize_with = "serialize_present")]
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn serialize_present<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bool(value.is_some())
}

/// Webhook as shown in listings: metadata plus computed buffer stats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSummary {
    #[serde(flatten)]
    pub webhook: Webhook,
    pub event_count: usize,
    pub last_event_at: Option<DateTime<Utc>>,
    pub watchers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_webhooks: usize,
    pub total_events: usize,
    pub active_webhooks: usize,
    pub inactive_webhooks: usize,
    pub watchers: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateWebhook {
    pub name: Option<String>,
    pub description: Option<String>,
    pub application: Option<String>,
    pub secret: Option<String>,
}

/// Partial update. The outer `Option` is "field present", the inner one
/// is the value, so `{"description": null}` clears while an omitted key
/// leaves the field alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateWebhook {
    #[serde(default, deserialize_with = "present")]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub application: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub secret: Option<Option<String>>,
    pub active: Option<bool>,
}

fn present<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

// ─── Captured events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub query: BTreeMap<String, QueryValue>,
    pub body: Body,
    pub body_encoding: BodyEncoding,
    pub raw_body: String,
    pub body_size: usize,
    pub body_sha256: String,
    pub source_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureCheck>,
}

/// Header multimap in arrival order. Repeated names are folded into one
/// entry joined with ", ", and the whole thing serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn append(&mut self, name: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => self.0.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl QueryValue {
    pub fn push(&mut self, value: String) {
        match self {
            QueryValue::One(first) => {
                let first = std::mem::take(first);
                *self = QueryValue::Many(vec![first, value]);
            }
            QueryValue::Many(values) => values.push(value),
        }
    }
}

/// Fold `key=value` pairs into a map where repeated keys become arrays.
pub fn fold_pairs(pairs: Vec<(String, String)>) -> BTreeMap<String, QueryValue> {
    let mut map: BTreeMap<String, QueryValue> = BTreeMap::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                map.insert(key, QueryValue::One(value));
            }
        }
    }
    map
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Structured(serde_json::Value),
    Raw(Bytes),
}

impl Body {
    /// String form of the body: compact JSON when structured, the literal
    /// content otherwise.
    pub fn raw_text(&self) -> String {
        match self {
            Body::Structured(value) => value.to_string(),
            Body::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Body::Structured(value) => value.serialize(s),
            Body::Raw(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => s.serialize_str(text),
                Err(_) => s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes)),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Json,
    Form,
    Text,
    Base64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureCheck {
    pub scheme: &'static str,
    pub valid: bool,
}
