//! Envelope codec
//!
//! Decoding is two-pass: the generic envelope is parsed first to get the
//! action tag, the top-level result and the fields every response payload
//! carries (`requiredOperation`, `token`). The tag then selects a payload
//! decoder from [`DISPATCH`].
//!
//! ```text
//! {"action": "grantToken", "result": "Ok",
//!  "payload": {"userId": 42, "token": "..", "requiredOperation": null}}
//!      │                          │
//!      └── DISPATCH["grantToken"] ┘──► ResponsePayload::GrantToken
//! ```
//!
//! Unknown tags are not an error: they decode to [`Action::Unknown`] with an
//! empty payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::Action;
use super::request::{Request, RequestPayload};
use super::response::{Response, ResponsePayload};
use crate::error::{DecodeError, PublishError};

type PayloadDecoder = fn(Value) -> Result<ResponsePayload, serde_json::Error>;

/// Tag → payload decoder
static DISPATCH: [(Action, PayloadDecoder); 15] = [
    (Action::CreateAuthCode, |v| {
        serde_json::from_value(v).map(ResponsePayload::CreateAuthCode)
    }),
    (Action::GrantToken, |v| {
        serde_json::from_value(v).map(ResponsePayload::GrantToken)
    }),
    (Action::AuthAdditionalOperation, |v| {
        serde_json::from_value(v).map(ResponsePayload::AuthAdditionalOperation)
    }),
    (Action::GrantAdditionalOperation, |v| {
        serde_json::from_value(v).map(ResponsePayload::GrantAdditionalOperation)
    }),
    (Action::AuthorizePayment, |v| {
        serde_json::from_value(v).map(ResponsePayload::AuthorizePayment)
    }),
    (Action::Pay, |v| serde_json::from_value(v).map(ResponsePayload::Pay)),
    (Action::Payout, |v| {
        serde_json::from_value(v).map(ResponsePayload::Payout)
    }),
    (Action::GetInfo, |v| {
        serde_json::from_value(v).map(ResponsePayload::GetInfo)
    }),
    (Action::ViewCraftbook, |v| {
        serde_json::from_value(v).map(ResponsePayload::ViewCraftbook)
    }),
    (Action::RequestProfile, |v| {
        serde_json::from_value(v).map(ResponsePayload::RequestProfile)
    }),
    (Action::RequestBasicInfo, |v| {
        serde_json::from_value(v).map(ResponsePayload::RequestBasicInfo)
    }),
    (Action::RequestGearInfo, |v| {
        serde_json::from_value(v).map(ResponsePayload::RequestGearInfo)
    }),
    (Action::RequestStock, |v| {
        serde_json::from_value(v).map(ResponsePayload::RequestStock)
    }),
    (Action::GuildInfo, |v| {
        serde_json::from_value(v).map(ResponsePayload::GuildInfo)
    }),
    (Action::WantToBuy, |v| {
        serde_json::from_value(v).map(ResponsePayload::WantToBuy)
    }),
];

fn lookup(tag: &str) -> Option<(Action, PayloadDecoder)> {
    DISPATCH
        .iter()
        .find(|(action, _)| action.as_str() == tag)
        .copied()
}

impl Action {
    /// Resolve a wire tag, `None` if the tag is not known
    pub fn from_tag(tag: &str) -> Option<Action> {
        lookup(tag).map(|(action, _)| action)
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    action: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    payload: Option<&'a RequestPayload>,
}

fn string_field(payload: &Value, name: &str) -> Option<String> {
    payload.get(name).and_then(Value::as_str).map(str::to_owned)
}

/// Decode an inbound frame
pub fn decode(frame: &[u8]) -> Result<Response, DecodeError> {
    let raw: RawEnvelope = serde_json::from_slice(frame).map_err(DecodeError::Envelope)?;

    let required_operation = string_field(&raw.payload, "requiredOperation");
    let token = string_field(&raw.payload, "token");

    let (action, payload) = match lookup(&raw.action) {
        Some((action, decode_payload)) => {
            // A null payload decodes as a record with every field unset
            let body = match raw.payload {
                Value::Null => Value::Object(Default::default()),
                body => body,
            };
            let payload = decode_payload(body).map_err(|source| DecodeError::Payload {
                action: action.as_str(),
                source,
            })?;
            (action, payload)
        }
        None => {
            tracing::debug!(action = %raw.action, "Unknown action tag");
            (Action::Unknown, ResponsePayload::Empty)
        }
    };

    Ok(Response {
        action,
        result: raw.result,
        required_operation,
        token,
        payload,
    })
}

/// Encode an outbound request
///
/// A request without a payload is encoded with an explicit `null` payload.
pub fn encode(request: &Request) -> Result<Bytes, PublishError> {
    let wire = WireRequest {
        action: request.action().as_str(),
        token: request.token(),
        payload: request.payload(),
    };

    serde_json::to_vec(&wire)
        .map(Bytes::from)
        .map_err(|source| PublishError::Encode {
            action: request.action().as_str(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::request::{Amount, CreateAuthCode, Payout, WantToBuy};

    fn frame(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_dispatch_covers_known_actions() {
        for action in Action::KNOWN {
            assert_eq!(Action::from_tag(action.as_str()), Some(action));
        }
        assert_eq!(Action::from_tag("unknownMethod"), None);
    }

    #[test]
    fn test_decode_every_known_tag() {
        for action in Action::KNOWN {
            let body = frame(json!({
                "action": action.as_str(),
                "result": "Ok",
                "payload": {"userId": 7, "balance": 100}
            }));

            let res = decode(&body).unwrap();
            assert_eq!(res.action, action);
            assert!(res.is_ok());

            if action.carries_correlation_key() {
                assert_eq!(res.correlation_key(), Some(7), "{}", action);
            } else {
                assert_eq!(res.correlation_key(), None);
            }
        }
    }

    #[test]
    fn test_decode_named_field_per_tag() {
        let fixtures = [
            ("createAuthCode", json!({"userId": 1, "code": "c-1"})),
            ("grantToken", json!({"userId": 1, "id": "g-1", "token": "tok"})),
            ("authAdditionalOperation", json!({"userId": 1, "operation": "GetStock", "requestId": "r-1"})),
            ("grantAdditionalOperation", json!({"userId": 1, "requestId": "r-2"})),
            ("authorizePayment", json!({"userId": 1, "transactionId": "t-1"})),
            ("pay", json!({"userId": 1, "transactionId": "t-2"})),
            ("payout", json!({"userId": 1, "transactionId": "t-3"})),
            ("getInfo", json!({"balance": 250})),
            ("viewCraftbook", json!({"userId": 1, "alchemy": [{"id": "p01"}], "craft": []})),
            ("requestProfile", json!({"userId": 1, "profile": {"class": "knight"}})),
            ("requestBasicInfo", json!({"userId": 1, "profile": {"atk": 10}})),
            ("requestGearInfo", json!({"userId": 1, "gear": {"head": "helmet"}})),
            ("requestStock", json!({"userId": 1, "stock": {"01": 5}})),
            ("guildInfo", json!({"userId": 1, "tag": "ABC", "name": "Turtles"})),
            ("wantToBuy", json!({"userId": 1, "itemName": "Thread", "quantity": -3})),
        ];
        assert_eq!(fixtures.len(), Action::KNOWN.len());

        for (tag, payload) in fixtures {
            let body = frame(json!({"action": tag, "result": "Ok", "payload": payload}));
            let res = decode(&body).unwrap();
            assert_eq!(res.action.as_str(), tag);

            match res.payload {
                ResponsePayload::CreateAuthCode(p) => assert_eq!(p.extra["code"], "c-1"),
                ResponsePayload::GrantToken(p) => assert_eq!(p.id.as_deref(), Some("g-1")),
                ResponsePayload::AuthAdditionalOperation(p) => {
                    assert_eq!(p.operation.as_deref(), Some("GetStock"));
                    assert_eq!(p.request_id.as_deref(), Some("r-1"));
                }
                ResponsePayload::GrantAdditionalOperation(p) => {
                    assert_eq!(p.request_id.as_deref(), Some("r-2"))
                }
                ResponsePayload::AuthorizePayment(p)
                | ResponsePayload::Pay(p)
                | ResponsePayload::Payout(p) => {
                    assert!(p.transaction_id.is_some_and(|id| id.starts_with("t-")))
                }
                ResponsePayload::GetInfo(p) => assert_eq!(p.balance, Some(250)),
                ResponsePayload::ViewCraftbook(p) => {
                    assert_eq!(p.alchemy.len(), 1);
                    assert!(p.craft.is_empty());
                }
                ResponsePayload::RequestProfile(p) | ResponsePayload::RequestBasicInfo(p) => {
                    assert!(p.profile.is_some())
                }
                ResponsePayload::RequestGearInfo(p) => {
                    assert_eq!(p.gear, Some(json!({"head": "helmet"})))
                }
                ResponsePayload::RequestStock(p) => assert_eq!(p.stock, Some(json!({"01": 5}))),
                ResponsePayload::GuildInfo(p) => assert_eq!(p.name.as_deref(), Some("Turtles")),
                ResponsePayload::WantToBuy(p) => {
                    assert_eq!(p.item_name.as_deref(), Some("Thread"));
                    assert_eq!(p.quantity, Some(-3));
                }
                ResponsePayload::Empty => panic!("{} decoded without a payload", tag),
            }
        }
    }

    #[test]
    fn test_decode_tag_specific_fields() {
        let body = frame(json!({
            "action": "grantToken",
            "result": "Ok",
            "payload": {"userId": 42, "id": "abc", "token": "secret"}
        }));

        let res = decode(&body).unwrap();
        assert_eq!(res.token.as_deref(), Some("secret"));
        match res.payload {
            ResponsePayload::GrantToken(p) => {
                assert_eq!(p.user_id, Some(42));
                assert_eq!(p.id.as_deref(), Some("abc"));
                assert_eq!(p.token.as_deref(), Some("secret"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_common_fields() {
        let body = frame(json!({
            "action": "requestProfile",
            "result": "Forbidden",
            "payload": {"userId": 3, "requiredOperation": "GetUserProfile"}
        }));

        let res = decode(&body).unwrap();
        assert!(!res.is_ok());
        assert_eq!(res.required_operation.as_deref(), Some("GetUserProfile"));
        assert_eq!(res.token, None);
    }

    #[test]
    fn test_decode_keeps_unnamed_fields() {
        let body = frame(json!({
            "action": "guildInfo",
            "payload": {"userId": 5, "tag": "ABC", "castle": "🐢", "level": 12}
        }));

        let res = decode(&body).unwrap();
        match res.payload {
            ResponsePayload::GuildInfo(p) => {
                assert_eq!(p.tag.as_deref(), Some("ABC"));
                assert_eq!(p.extra.get("level"), Some(&json!(12)));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        let body = frame(json!({
            "action": "summonDragon",
            "result": "Ok",
            "payload": {"userId": 9, "token": "t"}
        }));

        let res = decode(&body).unwrap();
        assert_eq!(res.action, Action::Unknown);
        assert_eq!(res.action.as_str(), "unknownMethod");
        assert_eq!(res.payload, ResponsePayload::Empty);
        assert_eq!(res.token.as_deref(), Some("t"));
        assert_eq!(res.correlation_key(), None);
    }

    #[test]
    fn test_decode_null_payload() {
        let res = decode(br#"{"action": "requestStock", "result": "NoOperation", "payload": null}"#)
            .unwrap();
        assert_eq!(res.action, Action::RequestStock);
        assert_eq!(res.correlation_key(), None);
        assert_eq!(res.result.as_deref(), Some("NoOperation"));
    }

    #[test]
    fn test_decode_malformed_envelope() {
        assert!(matches!(
            decode(b"{not json"),
            Err(DecodeError::Envelope(_))
        ));
        assert!(matches!(decode(b"[1, 2]"), Err(DecodeError::Envelope(_))));
    }

    #[test]
    fn test_decode_mismatched_payload() {
        let body = frame(json!({"action": "pay", "payload": {"userId": "not a number"}}));
        match decode(&body) {
            Err(DecodeError::Payload { action, .. }) => assert_eq!(action, "pay"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_encode_payload_request() {
        let req = Request::new(RequestPayload::CreateAuthCode(CreateAuthCode { user_id: 42 }));
        let value: Value = serde_json::from_slice(&encode(&req).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"action": "createAuthCode", "payload": {"userId": 42}})
        );
    }

    #[test]
    fn test_encode_nested_fields() {
        let req = Request::new(RequestPayload::Payout(Payout {
            amount: Amount { pouches: 3 },
            transaction_id: "tx-1".into(),
            user_id: 11,
            message: None,
        }));
        let value: Value = serde_json::from_slice(&encode(&req).unwrap()).unwrap();
        assert_eq!(
            value["payload"],
            json!({"amount": {"pouches": 3}, "transactionId": "tx-1", "userId": 11})
        );
    }

    #[test]
    fn test_encode_without_payload() {
        let req = Request::token_only(Action::GetInfo, "tok");
        let value: Value = serde_json::from_slice(&encode(&req).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"action": "getInfo", "token": "tok", "payload": null})
        );
    }

    #[test]
    fn test_encode_token_with_payload() {
        let req = Request::new(RequestPayload::WantToBuy(WantToBuy {
            item_code: "01".into(),
            quantity: 5,
            price: 2,
            exact_price: true,
        }))
        .with_token("tok");

        let value: Value = serde_json::from_slice(&encode(&req).unwrap()).unwrap();
        assert_eq!(value["action"], "wantToBuy");
        assert_eq!(value["token"], "tok");
        assert_eq!(value["payload"]["itemCode"], "01");
        assert_eq!(value["payload"]["exactPrice"], true);
    }
}
