#![forbid(unsafe_code)]

//! Fetch bridge messages exchanged with the embedding application. A
//! `FetchRequest` is pushed into the engine, carried over TCP by a browser
//! machine, and answered with a `FetchResponse` drained from the engine.
//! On the wire these are the camelCase payloads of the host's message
//! envelope; the envelope itself is the host's concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub request_id: u64,
    /// Identifies the requesting client; a browser machine only serves
    /// requests whose client id contains its own MAC string.
    pub client_id: String,
    pub url: String,
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub request_id: u64,
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// Set instead of a status when the transfer itself failed.
    pub error: Option<String>,
}

impl FetchResponse {
    pub fn failure(request_id: u64, error: impl Into<String>) -> Self {
        Self {
            request_id,
            ok: false,
            status: 0,
            status_text: String::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
            error: Some(error.into()),
        }
    }
}
