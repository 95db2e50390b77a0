//! Outbound requests
//!
//! A [`Request`] holds at most one payload variant, so the "exactly one
//! request kind is set" rule of the wire format holds by construction.

use serde::Serialize;

use super::action::Action;
use crate::registry::CorrelationKey;

/// An outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    action: Action,
    token: Option<String>,
    payload: Option<RequestPayload>,
}

impl Request {
    /// Create a request from a payload; the action follows the payload
    pub fn new(payload: RequestPayload) -> Self {
        Self {
            action: payload.action(),
            token: None,
            payload: Some(payload),
        }
    }

    /// Create a payload-less request authorized by `token`
    /// (`getInfo`, `requestProfile`, `guildInfo`, ...)
    pub fn token_only(action: Action, token: impl Into<String>) -> Self {
        Self {
            action,
            token: Some(token.into()),
            payload: None,
        }
    }

    /// Attach an access token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn payload(&self) -> Option<&RequestPayload> {
        self.payload.as_ref()
    }

    /// Correlation key the matching response will carry, when the payload
    /// names the user
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        self.payload.as_ref().and_then(RequestPayload::user_id)
    }
}

/// Request payload variants
///
/// Serialized without a tag: the action travels next to the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestPayload {
    CreateAuthCode(CreateAuthCode),
    GrantToken(GrantToken),
    AuthAdditionalOperation(AuthAdditionalOperation),
    GrantAdditionalOperation(GrantAdditionalOperation),
    AuthorizePayment(AuthorizePayment),
    Pay(Pay),
    Payout(Payout),
    WantToBuy(WantToBuy),
}

impl RequestPayload {
    pub fn action(&self) -> Action {
        match self {
            RequestPayload::CreateAuthCode(_) => Action::CreateAuthCode,
            RequestPayload::GrantToken(_) => Action::GrantToken,
            RequestPayload::AuthAdditionalOperation(_) => Action::AuthAdditionalOperation,
            RequestPayload::GrantAdditionalOperation(_) => Action::GrantAdditionalOperation,
            RequestPayload::AuthorizePayment(_) => Action::AuthorizePayment,
            RequestPayload::Pay(_) => Action::Pay,
            RequestPayload::Payout(_) => Action::Payout,
            RequestPayload::WantToBuy(_) => Action::WantToBuy,
        }
    }

    fn user_id(&self) -> Option<CorrelationKey> {
        match self {
            RequestPayload::CreateAuthCode(p) => Some(p.user_id),
            RequestPayload::GrantToken(p) => Some(p.user_id),
            RequestPayload::AuthAdditionalOperation(p) => Some(p.user_id),
            RequestPayload::AuthorizePayment(p) => Some(p.user_id),
            RequestPayload::Pay(p) => Some(p.user_id),
            RequestPayload::Payout(p) => Some(p.user_id),
            RequestPayload::GrantAdditionalOperation(_) | RequestPayload::WantToBuy(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAuthCode {
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantToken {
    pub user_id: i64,
    pub auth_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAdditionalOperation {
    pub operation: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAdditionalOperation {
    pub request_id: String,
    pub auth_code: String,
}

/// Amount of money moved by a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Amount {
    pub pouches: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizePayment {
    pub amount: Amount,
    pub transaction_id: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pay {
    pub amount: Amount,
    pub transaction_id: String,
    pub user_id: i64,
    pub confirmation_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub amount: Amount,
    pub transaction_id: String,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WantToBuy {
    pub item_code: String,
    pub quantity: u32,
    pub price: u32,
    pub exact_price: bool,
}
