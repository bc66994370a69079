//! Session identity resolution for inbound feed records
//!
//! An explicit key always wins. Otherwise the routing key is the account id
//! carried by the payload variant. Anything that cannot be resolved degrades
//! to a freshly generated identity, which no registered session will match,
//! so the record is effectively dropped rather than misrouted.

use crate::payload::{FeedMessage, FeedPayload};
use crate::types::SessionIdentity;

/// Resolve the routing key for a feed record
///
/// Never fails. Pure with respect to registry state; only the fallback
/// path is non-deterministic.
pub fn resolve(explicit_key: Option<&str>, message: &FeedMessage) -> SessionIdentity {
    if let Some(identity) = explicit_key.and_then(|key| SessionIdentity::of(key).ok()) {
        return identity;
    }

    match account_identity(message) {
        Some(identity) => identity,
        None => {
            tracing::warn!(
                payload = message.payload_case(),
                message_type = %message.header.message_type,
                "Unable to derive session from payload, generating random session id"
            );
            SessionIdentity::generate()
        }
    }
}

/// Extract the account-derived identity from the payload, if any
pub fn account_identity(message: &FeedMessage) -> Option<SessionIdentity> {
    let account_id = match message.payload.as_ref()? {
        FeedPayload::Trans(p) => p.account_id,
        FeedPayload::Login(p) => p.account_id,
        FeedPayload::Logout(p) => p.account_id,
        FeedPayload::Registration(p) => p.account_id,
        FeedPayload::AccountCreation(p) => p.account_id,
        FeedPayload::PaymentTrans(p) => p.account_id,
        FeedPayload::UpdateAccount(p) => p.account_id,
        FeedPayload::ExtendSession(p) => p.account_id,
        FeedPayload::Unknown => None,
    }?;

    SessionIdentity::of(account_id.to_string()).ok()
}

/// Stateless resolver handle for components that hold one by value
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionIdResolver;

impl SessionIdResolver {
    pub fn resolve(&self, explicit_key: Option<&str>, message: &FeedMessage) -> SessionIdentity {
        resolve(explicit_key, message)
    }
}
