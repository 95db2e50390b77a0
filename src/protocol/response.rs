//! Response envelope and per-action payload records
//!
//! Records only name the fields the client routes on or that callers
//! commonly read. Everything else lands in `extra` untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::action::Action;
use crate::registry::CorrelationKey;

/// A decoded inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Action tag, [`Action::Unknown`] for unrecognized tags
    pub action: Action,
    /// Top-level result string (`"Ok"`, `"Forbidden"`, ...)
    pub result: Option<String>,
    /// Operation the server requires to be granted before answering
    pub required_operation: Option<String>,
    /// Token attached to the response payload
    pub token: Option<String>,
    /// Tag-specific payload
    pub payload: ResponsePayload,
}

impl Response {
    /// Correlation key carried by the payload, if any
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        self.payload.user_id()
    }

    /// Whether the server reported success
    pub fn is_ok(&self) -> bool {
        self.result.as_deref() == Some("Ok")
    }
}

/// Tag-specific response payload
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    CreateAuthCode(CreateAuthCodeResult),
    GrantToken(GrantTokenResult),
    AuthAdditionalOperation(AuthAdditionalOperationResult),
    GrantAdditionalOperation(GrantAdditionalOperationResult),
    AuthorizePayment(PaymentResult),
    Pay(PaymentResult),
    Payout(PaymentResult),
    GetInfo(GetInfoResult),
    ViewCraftbook(ViewCraftbookResult),
    RequestProfile(ProfileResult),
    RequestBasicInfo(ProfileResult),
    RequestGearInfo(GearInfoResult),
    RequestStock(StockResult),
    GuildInfo(GuildInfoResult),
    WantToBuy(WantToBuyResult),
    /// No payload (unknown action)
    Empty,
}

impl ResponsePayload {
    /// The `userId` of the payload
    pub fn user_id(&self) -> Option<CorrelationKey> {
        match self {
            ResponsePayload::CreateAuthCode(p) => p.user_id,
            ResponsePayload::GrantToken(p) => p.user_id,
            ResponsePayload::AuthAdditionalOperation(p) => p.user_id,
            ResponsePayload::GrantAdditionalOperation(p) => p.user_id,
            ResponsePayload::AuthorizePayment(p)
            | ResponsePayload::Pay(p)
            | ResponsePayload::Payout(p) => p.user_id,
            ResponsePayload::ViewCraftbook(p) => p.user_id,
            ResponsePayload::RequestProfile(p) | ResponsePayload::RequestBasicInfo(p) => p.user_id,
            ResponsePayload::RequestGearInfo(p) => p.user_id,
            ResponsePayload::RequestStock(p) => p.user_id,
            ResponsePayload::GuildInfo(p) => p.user_id,
            ResponsePayload::WantToBuy(p) => p.user_id,
            ResponsePayload::GetInfo(_) | ResponsePayload::Empty => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAuthCodeResult {
    pub user_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantTokenResult {
    pub user_id: Option<i64>,
    /// In-game id of the user
    pub id: Option<String>,
    pub token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAdditionalOperationResult {
    pub user_id: Option<i64>,
    pub operation: Option<String>,
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAdditionalOperationResult {
    pub user_id: Option<i64>,
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Shared by `authorizePayment`, `pay` and `payout`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub user_id: Option<i64>,
    pub transaction_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInfoResult {
    pub balance: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewCraftbookResult {
    pub user_id: Option<i64>,
    #[serde(default)]
    pub alchemy: Vec<Value>,
    #[serde(default)]
    pub craft: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Shared by `requestProfile` and `requestBasicInfo`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResult {
    pub user_id: Option<i64>,
    pub profile: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GearInfoResult {
    pub user_id: Option<i64>,
    pub gear: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockResult {
    pub user_id: Option<i64>,
    pub stock: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildInfoResult {
    pub user_id: Option<i64>,
    pub tag: Option<String>,
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WantToBuyResult {
    pub user_id: Option<i64>,
    pub item_name: Option<String>,
    pub quantity: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
