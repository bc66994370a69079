//! Feed message model
//!
//! Inbound feed records carry a header and one of several payload
//! variants. Variants are tagged by `"type"`; unrecognized tags decode to
//! `FeedPayload::Unknown` instead of failing, so routing can fall back
//! to a generated identity.

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A feed record as received from the event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMessage {
    pub header: FeedHeader,

    /// Absent when the producer sent a header-only record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<FeedPayload>,
}

impl FeedMessage {
    /// Create a message with the given type label and payload
    pub fn new(message_type: impl Into<String>, payload: FeedPayload) -> Self {
        Self {
            header: FeedHeader::new(message_type),
            payload: Some(payload),
        }
    }

    /// Decode a JSON-encoded feed record
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encode as JSON bytes
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Tag of the carried payload, or `"NONE"` for header-only records
    pub fn payload_case(&self) -> &str {
        self.payload.as_ref().map_or("NONE", FeedPayload::tag)
    }
}

/// Feed record header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedHeader {
    /// Producer-assigned type label (e.g. "LOGIN", "PAYMENT")
    pub message_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Unix timestamp in milliseconds
    #[serde(default)]
    pub timestamp: u64,
}

impl FeedHeader {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_id: None,
            timestamp: now_millis(),
        }
    }
}

/// Payload variants carried by feed records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedPayload {
    Trans(TransPayload),
    Login(LoginPayload),
    Logout(LogoutPayload),
    Registration(RegistrationPayload),
    AccountCreation(AccountCreationPayload),
    PaymentTrans(PaymentTransPayload),
    UpdateAccount(UpdateAccountPayload),
    ExtendSession(ExtendSessionPayload),
    /// Any tag this build does not know about
    #[serde(other)]
    Unknown,
}

impl FeedPayload {
    /// Wire tag of the variant
    pub fn tag(&self) -> &'static str {
        match self {
            FeedPayload::Trans(_) => "TRANS",
            FeedPayload::Login(_) => "LOGIN",
            FeedPayload::Logout(_) => "LOGOUT",
            FeedPayload::Registration(_) => "REGISTRATION",
            FeedPayload::AccountCreation(_) => "ACCOUNT_CREATION",
            FeedPayload::PaymentTrans(_) => "PAYMENT_TRANS",
            FeedPayload::UpdateAccount(_) => "UPDATE_ACCOUNT",
            FeedPayload::ExtendSession(_) => "EXTEND_SESSION",
            FeedPayload::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransPayload {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutPayload {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreationPayload {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub brand: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransPayload {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountPayload {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendSessionPayload {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub extend_by_secs: Option<u64>,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
