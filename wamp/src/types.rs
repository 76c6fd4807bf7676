use crate::session::{WampError, WampResult};
use serde_json::{json, Map, Value};

/// WAMP dictionary (`Details`, `Options`, `ArgumentsKw`).
pub type Dict = Map<String, Value>;

pub type Id = u64;

/// Subprotocol negotiated on the WebSocket handshake.
pub const SUBPROTOCOL: &str = "wamp.2.json";

pub mod codes {
    pub const HELLO: u64 = 1;
    pub const WELCOME: u64 = 2;
    pub const ABORT: u64 = 3;
    pub const CHALLENGE: u64 = 4;
    pub const GOODBYE: u64 = 6;
    pub const ERROR: u64 = 8;
    pub const PUBLISH: u64 = 16;
    pub const PUBLISHED: u64 = 17;
    pub const SUBSCRIBE: u64 = 32;
    pub const SUBSCRIBED: u64 = 33;
    pub const UNSUBSCRIBE: u64 = 34;
    pub const UNSUBSCRIBED: u64 = 35;
    pub const EVENT: u64 = 36;
    pub const CALL: u64 = 48;
    pub const RESULT: u64 = 50;
    pub const REGISTER: u64 = 64;
    pub const REGISTERED: u64 = 65;
    pub const UNREGISTER: u64 = 66;
    pub const UNREGISTERED: u64 = 67;
    pub const INVOCATION: u64 = 68;
    pub const YIELD: u64 = 70;
}

/// Well-known error and close reason URIs.
pub mod uris {
    pub const CLOSE_REALM: &str = "wamp.close.close_realm";
    pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
    pub const NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
    pub const NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";
    pub const INVALID_ARGUMENT: &str = "wamp.error.invalid_argument";
    pub const RUNTIME_ERROR: &str = "wamp.error.runtime_error";
    pub const CANNOT_AUTHENTICATE: &str = "wamp.error.cannot_authenticate";
}

/// Positional and keyword payload carried by PUBLISH, EVENT, CALL, RESULT,
/// INVOCATION, YIELD and ERROR.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub args: Vec<Value>,
    pub kwargs: Dict,
}

impl Payload {
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Dict::new(),
        }
    }

    pub fn with_kwargs(mut self, kwargs: Dict) -> Self {
        self.kwargs = kwargs;
        self
    }

    fn append_to(&self, frame: &mut Vec<Value>) {
        if !self.kwargs.is_empty() {
            frame.push(Value::Array(self.args.clone()));
            frame.push(Value::Object(self.kwargs.clone()));
        } else if !self.args.is_empty() {
            frame.push(Value::Array(self.args.clone()));
        }
    }

    fn read_from(frame: &[Value], offset: usize) -> WampResult<Self> {
        let args = match frame.get(offset) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => return Err(malformed(format!("expected Arguments list, got {other}"))),
        };
        let kwargs = match frame.get(offset + 1) {
            None => Dict::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(malformed(format!("expected ArgumentsKw dict, got {other}")))
            }
        };
        Ok(Self { args, kwargs })
    }
}

/// Basic-profile WAMP v2 messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello {
        realm: String,
        details: Dict,
    },
    Welcome {
        session: Id,
        details: Dict,
    },
    Abort {
        details: Dict,
        reason: String,
    },
    Challenge {
        auth_method: String,
        extra: Dict,
    },
    Goodbye {
        details: Dict,
        reason: String,
    },
    Error {
        request_type: u64,
        request: Id,
        details: Dict,
        error: String,
        payload: Payload,
    },
    Publish {
        request: Id,
        options: Dict,
        topic: String,
        payload: Payload,
    },
    Published {
        request: Id,
        publication: Id,
    },
    Subscribe {
        request: Id,
        options: Dict,
        topic: String,
    },
    Subscribed {
        request: Id,
        subscription: Id,
    },
    Unsubscribe {
        request: Id,
        subscription: Id,
    },
    Unsubscribed {
        request: Id,
    },
    Event {
        subscription: Id,
        publication: Id,
        details: Dict,
        payload: Payload,
    },
    Call {
        request: Id,
        options: Dict,
        procedure: String,
        payload: Payload,
    },
    Result {
        request: Id,
        details: Dict,
        payload: Payload,
    },
    Register {
        request: Id,
        options: Dict,
        procedure: String,
    },
    Registered {
        request: Id,
        registration: Id,
    },
    Unregister {
        request: Id,
        registration: Id,
    },
    Unregistered {
        request: Id,
    },
    Invocation {
        request: Id,
        registration: Id,
        details: Dict,
        payload: Payload,
    },
    Yield {
        request: Id,
        options: Dict,
        payload: Payload,
    },
}

impl Message {
    pub fn code(&self) -> u64 {
        match self {
            Message::Hello { .. } => codes::HELLO,
            Message::Welcome { .. } => codes::WELCOME,
            Message::Abort { .. } => codes::ABORT,
            Message::Challenge { .. } => codes::CHALLENGE,
            Message::Goodbye { .. } => codes::GOODBYE,
            Message::Error { .. } => codes::ERROR,
            Message::Publish { .. } => codes::PUBLISH,
            Message::Published { .. } => codes::PUBLISHED,
            Message::Subscribe { .. } => codes::SUBSCRIBE,
            Message::Subscribed { .. } => codes::SUBSCRIBED,
            Message::Unsubscribe { .. } => codes::UNSUBSCRIBE,
            Message::Unsubscribed { .. } => codes::UNSUBSCRIBED,
            Message::Event { .. } => codes::EVENT,
            Message::Call { .. } => codes::CALL,
            Message::Result { .. } => codes::RESULT,
            Message::Register { .. } => codes::REGISTER,
            Message::Registered { .. } => codes::REGISTERED,
            Message::Unregister { .. } => codes::UNREGISTER,
            Message::Unregistered { .. } => codes::UNREGISTERED,
            Message::Invocation { .. } => codes::INVOCATION,
            Message::Yield { .. } => codes::YIELD,
        }
    }

    /// Request id the message answers or carries, if any.
    pub fn request_id(&self) -> Option<Id> {
        match self {
            Message::Error { request, .. }
            | Message::Publish { request, .. }
            | Message::Published { request, .. }
            | Message::Subscribe { request, .. }
            | Message::Subscribed { request, .. }
            | Message::Unsubscribe { request, .. }
            | Message::Unsubscribed { request }
            | Message::Call { request, .. }
            | Message::Result { request, .. }
            | Message::Register { request, .. }
            | Message::Registered { request, .. }
            | Message::Unregister { request, .. }
            | Message::Unregistered { request }
            | Message::Invocation { request, .. }
            | Message::Yield { request, .. } => Some(*request),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut frame = vec![json!(self.code())];
        match self {
            Message::Hello { realm, details } => {
                frame.push(json!(realm));
                frame.push(Value::Object(details.clone()));
            }
            Message::Welcome { session, details } => {
                frame.push(json!(session));
                frame.push(Value::Object(details.clone()));
            }
            Message::Abort { details, reason } | Message::Goodbye { details, reason } => {
                frame.push(Value::Object(details.clone()));
                frame.push(json!(reason));
            }
            Message::Challenge { auth_method, extra } => {
                frame.push(json!(auth_method));
                frame.push(Value::Object(extra.clone()));
            }
            Message::Error {
                request_type,
                request,
                details,
                error,
                payload,
            } => {
                frame.push(json!(request_type));
                frame.push(json!(request));
                frame.push(Value::Object(details.clone()));
                frame.push(json!(error));
                payload.append_to(&mut frame);
            }
            Message::Publish {
                request,
                options,
                topic,
                payload,
            } => {
                frame.push(json!(request));
                frame.push(Value::Object(options.clone()));
                frame.push(json!(topic));
                payload.append_to(&mut frame);
            }
            Message::Published {
                request,
                publication,
            } => {
                frame.push(json!(request));
                frame.push(json!(publication));
            }
            Message::Subscribe {
                request,
                options,
                topic,
            } => {
                frame.push(json!(request));
                frame.push(Value::Object(options.clone()));
                frame.push(json!(topic));
            }
            Message::Subscribed {
                request,
                subscription,
            }
            | Message::Unsubscribe {
                request,
                subscription,
            } => {
                frame.push(json!(request));
                frame.push(json!(subscription));
            }
            Message::Unsubscribed { request } | Message::Unregistered { request } => {
                frame.push(json!(request));
            }
            Message::Event {
                subscription,
                publication,
                details,
                payload,
            } => {
                frame.push(json!(subscription));
                frame.push(json!(publication));
                frame.push(Value::Object(details.clone()));
                payload.append_to(&mut frame);
            }
            Message::Call {
                request,
                options,
                procedure,
                payload,
            } => {
                frame.push(json!(request));
                frame.push(Value::Object(options.clone()));
                frame.push(json!(procedure));
                payload.append_to(&mut frame);
            }
            Message::Result {
                request,
                details,
                payload,
            } => {
                frame.push(json!(request));
                frame.push(Value::Object(details.clone()));
                payload.append_to(&mut frame);
            }
            Message::Register {
                request,
                options,
                procedure,
            } => {
                frame.push(json!(request));
                frame.push(Value::Object(options.clone()));
                frame.push(json!(procedure));
            }
            Message::Registered {
                request,
                registration,
            }
            | Message::Unregister {
                request,
                registration,
            } => {
                frame.push(json!(request));
                frame.push(json!(registration));
            }
            Message::Invocation {
                request,
                registration,
                details,
                payload,
            } => {
                frame.push(json!(request));
                frame.push(json!(registration));
                frame.push(Value::Object(details.clone()));
                payload.append_to(&mut frame);
            }
            Message::Yield {
                request,
                options,
                payload,
            } => {
                frame.push(json!(request));
                frame.push(Value::Object(options.clone()));
                payload.append_to(&mut frame);
            }
        }
        Value::Array(frame)
    }

    pub fn from_value(value: Value) -> WampResult<Self> {
        let frame = match value {
            Value::Array(items) => items,
            other => return Err(malformed(format!("message is not a list: {other}"))),
        };
        let code = id_at(&frame, 0)?;

        let message = match code {
            codes::HELLO => Message::Hello {
                realm: str_at(&frame, 1)?,
                details: dict_at(&frame, 2)?,
            },
            codes::WELCOME => Message::Welcome {
                session: id_at(&frame, 1)?,
                details: dict_at(&frame, 2)?,
            },
            codes::ABORT => Message::Abort {
                details: dict_at(&frame, 1)?,
                reason: str_at(&frame, 2)?,
            },
            codes::CHALLENGE => Message::Challenge {
                auth_method: str_at(&frame, 1)?,
                extra: dict_at(&frame, 2)?,
            },
            codes::GOODBYE => Message::Goodbye {
                details: dict_at(&frame, 1)?,
                reason: str_at(&frame, 2)?,
            },
            codes::ERROR => Message::Error {
                request_type: id_at(&frame, 1)?,
                request: id_at(&frame, 2)?,
                details: dict_at(&frame, 3)?,
                error: str_at(&frame, 4)?,
                payload: Payload::read_from(&frame, 5)?,
            },
            codes::PUBLISH => Message::Publish {
                request: id_at(&frame, 1)?,
                options: dict_at(&frame, 2)?,
                topic: str_at(&frame, 3)?,
                payload: Payload::read_from(&frame, 4)?,
            },
            codes::PUBLISHED => Message::Published {
                request: id_at(&frame, 1)?,
                publication: id_at(&frame, 2)?,
            },
            codes::SUBSCRIBE => Message::Subscribe {
                request: id_at(&frame, 1)?,
                options: dict_at(&frame, 2)?,
                topic: str_at(&frame, 3)?,
            },
            codes::SUBSCRIBED => Message::Subscribed {
                request: id_at(&frame, 1)?,
                subscription: id_at(&frame, 2)?,
            },
            codes::UNSUBSCRIBE => Message::Unsubscribe {
                request: id_at(&frame, 1)?,
                subscription: id_at(&frame, 2)?,
            },
            codes::UNSUBSCRIBED => Message::Unsubscribed {
                request: id_at(&frame, 1)?,
            },
            codes::EVENT => Message::Event {
                subscription: id_at(&frame, 1)?,
                publication: id_at(&frame, 2)?,
                details: dict_at(&frame, 3)?,
                payload: Payload::read_from(&frame, 4)?,
            },
            codes::CALL => Message::Call {
                request: id_at(&frame, 1)?,
                options: dict_at(&frame, 2)?,
                procedure: str_at(&frame, 3)?,
                payload: Payload::read_from(&frame, 4)?,
            },
            codes::RESULT => Message::Result {
                request: id_at(&frame, 1)?,
                details: dict_at(&frame, 2)?,
                payload: Payload::read_from(&frame, 3)?,
            },
            codes::REGISTER => Message::Register {
                request: id_at(&frame, 1)?,
                options: dict_at(&frame, 2)?,
                procedure: str_at(&frame, 3)?,
            },
            codes::REGISTERED => Message::Registered {
                request: id_at(&frame, 1)?,
                registration: id_at(&frame, 2)?,
            },
            codes::UNREGISTER => Message::Unregister {
                request: id_at(&frame, 1)?,
                registration: id_at(&frame, 2)?,
            },
            codes::UNREGISTERED => Message::Unregistered {
                request: id_at(&frame, 1)?,
            },
            codes::INVOCATION => Message::Invocation {
                request: id_at(&frame, 1)?,
                registration: id_at(&frame, 2)?,
                details: dict_at(&frame, 3)?,
                payload: Payload::read_from(&frame, 4)?,
            },
            codes::YIELD => Message::Yield {
                request: id_at(&frame, 1)?,
                options: dict_at(&frame, 2)?,
                payload: Payload::read_from(&frame, 3)?,
            },
            other => return Err(malformed(format!("unknown message type {other}"))),
        };

        Ok(message)
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn decode(text: &str) -> WampResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }
}

fn malformed(message: String) -> WampError {
    WampError::Protocol { message }
}

fn id_at(frame: &[Value], index: usize) -> WampResult<Id> {
    frame
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(format!("expected integer id at position {index}")))
}

fn str_at(frame: &[Value], index: usize) -> WampResult<String> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("expected URI string at position {index}")))
}

fn dict_at(frame: &[Value], index: usize) -> WampResult<Dict> {
    match frame.get(index) {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(malformed(format!("expected dict at position {index}"))),
    }
}

/// True when `uri` is a valid strict dotted WAMP URI such as `com.example.add2`.
pub fn is_valid_uri(uri: &str) -> bool {
    !uri.is_empty()
        && uri.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_encodes_positional_payload() {
        let msg = Message::Publish {
            request: 7,
            options: Dict::new(),
            topic: "realtime.data_A".to_string(),
            payload: Payload::new(vec![json!(1500.25), json!(0.5)]),
        };

        assert_eq!(msg.encode(), r#"[16,7,{},"realtime.data_A",[1500.25,0.5]]"#);
    }

    #[test]
    fn test_empty_payload_is_omitted() {
        let msg = Message::Yield {
            request: 3,
            options: Dict::new(),
            payload: Payload::default(),
        };
        assert_eq!(msg.to_value(), json!([70, 3, {}]));
    }

    #[test]
    fn test_kwargs_only_payload_keeps_empty_args() {
        let mut kwargs = Dict::new();
        kwargs.insert("channel".to_string(), json!("A"));
        let msg = Message::Result {
            request: 9,
            details: Dict::new(),
            payload: Payload::default().with_kwargs(kwargs),
        };
        assert_eq!(msg.to_value(), json!([50, 9, {}, [], {"channel": "A"}]));
    }

    #[test]
    fn test_decode_invocation() {
        let msg = Message::decode(r#"[68, 12, 4, {}, [2, 3]]"#).unwrap();
        assert_eq!(
            msg,
            Message::Invocation {
                request: 12,
                registration: 4,
                details: Dict::new(),
                payload: Payload::new(vec![json!(2), json!(3)]),
            }
        );
        assert_eq!(msg.request_id(), Some(12));
    }

    #[test]
    fn test_decode_error_with_args() {
        let msg =
            Message::decode(r#"[8, 48, 5, {}, "wamp.error.no_such_procedure", ["gone"]]"#)
                .unwrap();
        match msg {
            Message::Error {
                request_type,
                request,
                error,
                payload,
                ..
            } => {
                assert_eq!(request_type, codes::CALL);
                assert_eq!(request, 5);
                assert_eq!(error, uris::NO_SUCH_PROCEDURE);
                assert_eq!(payload.args, vec![json!("gone")]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_decode_welcome_and_goodbye() {
        let welcome = Message::decode(r#"[2, 9129137332, {"roles": {"broker": {}}}]"#).unwrap();
        assert!(matches!(welcome, Message::Welcome { session: 9129137332, .. }));

        let goodbye = Message::decode(r#"[6, {}, "wamp.close.close_realm"]"#).unwrap();
        assert_eq!(
            goodbye,
            Message::Goodbye {
                details: Dict::new(),
                reason: uris::CLOSE_REALM.to_string(),
            }
        );
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(matches!(
            Message::decode(r#"{"not": "a list"}"#),
            Err(WampError::Protocol { .. })
        ));
        assert!(matches!(
            Message::decode(r#"[999, 1]"#),
            Err(WampError::Protocol { .. })
        ));
        assert!(matches!(
            Message::decode(r#"[33, "one", 2]"#),
            Err(WampError::Protocol { .. })
        ));
        assert!(matches!(
            Message::decode(r#"[36, 1, 2, {}, "not-a-list"]"#),
            Err(WampError::Protocol { .. })
        ));
        assert!(matches!(
            Message::decode("not json"),
            Err(WampError::Serialization(_))
        ));
    }

    #[test]
    fn test_uri_validation() {
        assert!(is_valid_uri("com.example.add2"));
        assert!(is_valid_uri("realtime.data_A"));
        assert!(is_valid_uri("realm1"));
        assert!(!is_valid_uri(""));
        assert!(!is_valid_uri("com..example"));
        assert!(!is_valid_uri("com.example "));
    }
}
