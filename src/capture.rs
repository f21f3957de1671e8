use crate::types::{fold_pairs, Body, BodyEncoding, EventRecord, Headers, QueryValue, SignatureCheck};
use crate::verification;
use axum::body::Bytes;
use axum::http::{header::CONTENT_TYPE, HeaderMap, Method, Uri};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// An inbound call captured but not yet numbered. Built outside the store
/// lock; the store assigns the id when appending.
#[derive(Debug, Clone)]
pub struct Capture {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub query: BTreeMap<String, QueryValue>,
    pub body: Body,
    pub body_encoding: BodyEncoding,
    pub body_size: usize,
    pub body_sha256: String,
    pub source_address: String,
    pub signature: Option<SignatureCheck>,
}

impl Capture {
    pub fn new(
        method: &Method,
        uri: &Uri,
        header_map: &HeaderMap,
        body: Bytes,
        remote: SocketAddr,
        secret: Option<&str>,
    ) -> Self {
        let mut headers = Headers::default();
        for (name, value) in header_map {
            headers.append(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
        }

        let query = uri
            .query()
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .map(fold_pairs)
            .unwrap_or_default();

        let signature = secret.and_then(|s| verification::check(s, &headers, &body));
        let body_sha256 = hex::encode(Sha256::digest(&body));
        let body_size = body.len();
        let (body, body_encoding) = classify_body(headers.get(CONTENT_TYPE.as_str()), body);

        Self {
            timestamp: Utc::now(),
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            headers,
            query,
            body,
            body_encoding,
            body_size,
            body_sha256,
            source_address: remote.to_string(),
            signature,
        }
    }

    pub fn into_record(self, id: u64) -> EventRecord {
        EventRecord {
            id,
            timestamp: self.timestamp,
            method: self.method,
            path: self.path,
            headers: self.headers,
            query: self.query,
            raw_body: self.body.raw_text(),
            body: self.body,
            body_encoding: self.body_encoding,
            body_size: self.body_size,
            body_sha256: self.body_sha256,
            source_address: self.source_address,
            signature: self.signature,
        }
    }
}

/// Decide once how a body is kept. JSON and form payloads that parse are
/// structured; everything else stays raw.
pub fn classify_body(content_type: Option<&str>, bytes: Bytes) -> (Body, BodyEncoding) {
    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mt| mt.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if media_type == "application/json" || media_type.ends_with("+json") {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
            return (Body::Structured(value), BodyEncoding::Json);
        }
    } else if media_type == "application/x-www-form-urlencoded" {
        if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes) {
            let value = serde_json::to_value(fold_pairs(pairs)).unwrap_or_default();
            return (Body::Structured(value), BodyEncoding::Form);
        }
    }

    let encoding = if std::str::from_utf8(&bytes).is_ok() {
        BodyEncoding::Text
    } else {
        BodyEncoding::Base64
    };
    (Body::Raw(bytes), encoding)
}
