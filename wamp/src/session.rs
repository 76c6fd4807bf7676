use crate::types::{uris, Dict, Id, Payload};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a remote peer (or a local procedure) identified by a WAMP error URI.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationError {
    pub error: String,
    pub args: Vec<Value>,
    pub kwargs: Dict,
}

impl ApplicationError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            args: Vec::new(),
            kwargs: Dict::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.args.push(Value::String(message.into()));
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(uris::INVALID_ARGUMENT).with_message(message)
    }

    pub fn payload(&self) -> Payload {
        Payload::new(self.args.clone()).with_kwargs(self.kwargs.clone())
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(Value::String(message)) = self.args.first() {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApplicationError {}

#[derive(Error, Debug)]
pub enum WampError {
    #[error("WebSocket error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    #[error("Session aborted by router: {reason}")]
    Aborted { reason: String },

    #[error("Application error: {0}")]
    Application(ApplicationError),

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: String },
}

impl WampError {
    /// WAMP error URI when the failure came from the remote peer.
    pub fn error_uri(&self) -> Option<&str> {
        match self {
            WampError::Application(app) => Some(app.error.as_str()),
            _ => None,
        }
    }

    pub fn is_no_such_procedure(&self) -> bool {
        self.error_uri() == Some(uris::NO_SUCH_PROCEDURE)
    }
}

impl From<ApplicationError> for WampError {
    fn from(error: ApplicationError) -> Self {
        WampError::Application(error)
    }
}

pub type WampResult<T> = Result<T, WampError>;

/// Result of a procedure call: positional and keyword results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
    pub args: Vec<Value>,
    pub kwargs: Dict,
}

impl CallResult {
    /// A single positional result, the way plain return values are wrapped.
    pub fn value(value: Value) -> Self {
        Self {
            args: vec![value],
            kwargs: Dict::new(),
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.args.first()
    }
}

impl From<Payload> for CallResult {
    fn from(payload: Payload) -> Self {
        Self {
            args: payload.args,
            kwargs: payload.kwargs,
        }
    }
}

impl From<CallResult> for Payload {
    fn from(result: CallResult) -> Self {
        Payload::new(result.args).with_kwargs(result.kwargs)
    }
}

/// An incoming call routed to a registered procedure.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request: Id,
    pub registration: Id,
    pub details: Dict,
    pub args: Vec<Value>,
    pub kwargs: Dict,
}

impl Invocation {
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            request: 0,
            registration: 0,
            details: Dict::new(),
            args,
            kwargs: Dict::new(),
        }
    }
}

/// An event delivered to a subscription.
#[derive(Debug, Clone)]
pub struct Event {
    pub subscription: Id,
    pub publication: Id,
    pub details: Dict,
    pub args: Vec<Value>,
    pub kwargs: Dict,
}

#[async_trait]
pub trait Procedure: Send + Sync {
    async fn invoke(&self, invocation: Invocation) -> Result<CallResult, ApplicationError>;
}

pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Operations available on a joined WAMP session.
#[async_trait]
pub trait Session: Send + Sync {
    fn session_id(&self) -> Id;

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> WampResult<Id>;

    async fn unsubscribe(&self, subscription: Id) -> WampResult<()>;

    async fn register(&self, procedure: &str, handler: Arc<dyn Procedure>) -> WampResult<Id>;

    async fn unregister(&self, registration: Id) -> WampResult<()>;

    /// Returns the publication id when the publish was acknowledged.
    async fn publish(&self, topic: &str, args: Vec<Value>) -> WampResult<Option<Id>>;

    async fn call(&self, procedure: &str, args: Vec<Value>) -> WampResult<CallResult>;

    async fn leave(&self) -> WampResult<()>;
}

/// Treats a call that failed only because the callee has not registered yet
/// as "no result", re-raising every other failure.
pub fn ignore_no_such_procedure<T>(result: WampResult<T>) -> WampResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_no_such_procedure() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockSession {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Session for MockSession {
        fn session_id(&self) -> Id {
            1
        }

        async fn subscribe(&self, topic: &str, _handler: Arc<dyn EventHandler>) -> WampResult<Id> {
            self.calls.lock().unwrap().push(format!("subscribe {topic}"));
            Ok(10)
        }

        async fn unsubscribe(&self, _subscription: Id) -> WampResult<()> {
            Ok(())
        }

        async fn register(&self, procedure: &str, _handler: Arc<dyn Procedure>) -> WampResult<Id> {
            self.calls.lock().unwrap().push(format!("register {procedure}"));
            Ok(20)
        }

        async fn unregister(&self, _registration: Id) -> WampResult<()> {
            Ok(())
        }

        async fn publish(&self, topic: &str, _args: Vec<Value>) -> WampResult<Option<Id>> {
            self.calls.lock().unwrap().push(format!("publish {topic}"));
            Ok(None)
        }

        async fn call(&self, procedure: &str, _args: Vec<Value>) -> WampResult<CallResult> {
            Err(ApplicationError::new(uris::NO_SUCH_PROCEDURE)
                .with_message(procedure)
                .into())
        }

        async fn leave(&self) -> WampResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ignore_no_such_procedure_tolerates_missing_callee() {
        let session = MockSession {
            calls: Mutex::new(Vec::new()),
        };
        let result = ignore_no_such_procedure(session.call("com.example.mul2", vec![]).await);
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_ignore_no_such_procedure_reraises_other_errors() {
        let err: WampResult<CallResult> =
            Err(ApplicationError::invalid_argument("bad input").into());
        let result = ignore_no_such_procedure(err);
        match result {
            Err(e) => assert_eq!(e.error_uri(), Some(uris::INVALID_ARGUMENT)),
            Ok(_) => panic!("invalid_argument must not be swallowed"),
        }

        let closed: WampResult<CallResult> = Err(WampError::SessionClosed);
        assert!(matches!(
            ignore_no_such_procedure(closed),
            Err(WampError::SessionClosed)
        ));

        let ok: WampResult<CallResult> = Ok(CallResult::value(json!(9)));
        assert_eq!(
            ignore_no_such_procedure(ok).unwrap().unwrap().first(),
            Some(&json!(9))
        );
    }

    #[test]
    fn test_application_error_display() {
        let error = ApplicationError::invalid_argument("expected two numbers");
        assert_eq!(
            error.to_string(),
            "wamp.error.invalid_argument: expected two numbers"
        );
        assert_eq!(
            ApplicationError::new(uris::RUNTIME_ERROR).to_string(),
            "wamp.error.runtime_error"
        );
    }

    #[tokio::test]
    async fn test_mock_session_records_operations() {
        let session = MockSession {
            calls: Mutex::new(Vec::new()),
        };

        struct Noop;
        impl EventHandler for Noop {
            fn on_event(&self, _event: Event) {}
        }

        session
            .subscribe("com.example.onhello", Arc::new(Noop))
            .await
            .unwrap();
        session.publish("realtime.data_A", vec![]).await.unwrap();

        let calls = session.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "subscribe com.example.onhello".to_string(),
                "publish realtime.data_A".to_string()
            ]
        );
    }
}
