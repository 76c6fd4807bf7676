use crate::config::WampConfig;
use crate::session::{
    ApplicationError, CallResult, Event, EventHandler, Invocation, Procedure, Session, WampError,
    WampResult,
};
use crate::types::{codes, uris, Dict, Id, Message, Payload, SUBPROTOCOL};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Outgoing {
    Frame(Message),
    Close,
}

/// A request waiting for its reply, keyed by request id.
enum Pending {
    Subscribe {
        handler: Arc<dyn EventHandler>,
        reply: oneshot::Sender<WampResult<Id>>,
    },
    Unsubscribe {
        subscription: Id,
        reply: oneshot::Sender<WampResult<()>>,
    },
    Register {
        handler: Arc<dyn Procedure>,
        reply: oneshot::Sender<WampResult<Id>>,
    },
    Unregister {
        registration: Id,
        reply: oneshot::Sender<WampResult<()>>,
    },
    Publish {
        reply: oneshot::Sender<WampResult<Option<Id>>>,
    },
    Call {
        reply: oneshot::Sender<WampResult<CallResult>>,
    },
}

impl Pending {
    /// Message type an ERROR for this request must name.
    fn request_type(&self) -> u64 {
        match self {
            Pending::Subscribe { .. } => codes::SUBSCRIBE,
            Pending::Unsubscribe { .. } => codes::UNSUBSCRIBE,
            Pending::Register { .. } => codes::REGISTER,
            Pending::Unregister { .. } => codes::UNREGISTER,
            Pending::Publish { .. } => codes::PUBLISH,
            Pending::Call { .. } => codes::CALL,
        }
    }

    fn fail(self, error: WampError) {
        match self {
            Pending::Subscribe { reply, .. } | Pending::Register { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Pending::Unsubscribe { reply, .. } | Pending::Unregister { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Pending::Publish { reply } => {
                let _ = reply.send(Err(error));
            }
            Pending::Call { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }

    /// Resolves the request. Handlers are installed here, before the
    /// requester is woken, so EVENT/INVOCATION for the new id always finds them.
    fn complete(self, message: Message, state: &SessionState) {
        if let Message::Error {
            request_type,
            error,
            payload,
            ..
        } = message
        {
            let expected = self.request_type();
            if request_type != expected {
                self.fail(WampError::Protocol {
                    message: format!(
                        "ERROR for request type {} answered a request of type {}",
                        request_type, expected
                    ),
                });
                return;
            }
            self.fail(WampError::Application(ApplicationError {
                error,
                args: payload.args,
                kwargs: payload.kwargs,
            }));
            return;
        }

        match (self, message) {
            (Pending::Subscribe { handler, reply }, Message::Subscribed { subscription, .. }) => {
                lock(&state.subscriptions).insert(subscription, handler);
                let _ = reply.send(Ok(subscription));
            }
            (Pending::Unsubscribe { subscription, reply }, Message::Unsubscribed { .. }) => {
                lock(&state.subscriptions).remove(&subscription);
                let _ = reply.send(Ok(()));
            }
            (Pending::Register { handler, reply }, Message::Registered { registration, .. }) => {
                lock(&state.registrations).insert(registration, handler);
                let _ = reply.send(Ok(registration));
            }
            (Pending::Unregister { registration, reply }, Message::Unregistered { .. }) => {
                lock(&state.registrations).remove(&registration);
                let _ = reply.send(Ok(()));
            }
            (Pending::Publish { reply }, Message::Published { publication, .. }) => {
                let _ = reply.send(Ok(Some(publication)));
            }
            (Pending::Call { reply }, Message::Result { payload, .. }) => {
                let _ = reply.send(Ok(payload.into()));
            }
            (pending, other) => pending.fail(WampError::Protocol {
                message: format!("unexpected reply type {} for request", other.code()),
            }),
        }
    }
}

#[derive(Default)]
struct SessionState {
    pending: Mutex<HashMap<Id, Pending>>,
    subscriptions: Mutex<HashMap<Id, Arc<dyn EventHandler>>>,
    registrations: Mutex<HashMap<Id, Arc<dyn Procedure>>>,
    goodbye: Mutex<Option<oneshot::Sender<()>>>,
    closed: Mutex<bool>,
}

impl SessionState {
    fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    /// Inserts a pending request unless the session already closed.
    fn track(&self, request: Id, pending: Pending) -> Result<(), Pending> {
        let closed = lock(&self.closed);
        if *closed {
            return Err(pending);
        }
        lock(&self.pending).insert(request, pending);
        Ok(())
    }

    fn take(&self, request: Id) -> Option<Pending> {
        lock(&self.pending).remove(&request)
    }

    fn close(&self) {
        let mut closed = lock(&self.closed);
        *closed = true;
        let drained: Vec<Pending> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        drop(closed);
        for pending in drained {
            pending.fail(WampError::SessionClosed);
        }
        if let Some(goodbye) = lock(&self.goodbye).take() {
            let _ = goodbye.send(());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A joined WAMP session over a WebSocket connection.
pub struct WampClient {
    session_id: Id,
    realm: String,
    acknowledge_publish: bool,
    leave_timeout: std::time::Duration,
    next_request: AtomicU64,
    outbound: mpsc::UnboundedSender<Outgoing>,
    state: Arc<SessionState>,
    tasks: Vec<JoinHandle<()>>,
}

impl WampClient {
    /// Connects to the router and joins the configured realm.
    pub async fn connect(config: &WampConfig) -> WampResult<Self> {
        config
            .validate()
            .map_err(|message| WampError::InvalidConfig { message })?;

        let mut request = config.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (mut ws, _response) = timeout(config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| WampError::Timeout {
                operation: format!("connection to {}", config.url),
            })??;
        debug!("WebSocket connected to {}", config.url);

        let hello = Message::Hello {
            realm: config.realm.clone(),
            details: hello_details(&config.agent),
        };
        ws.send(WsMessage::Text(hello.encode())).await?;

        let session_id = timeout(config.connect_timeout, await_welcome(&mut ws))
            .await
            .map_err(|_| WampError::Timeout {
                operation: format!("WELCOME from realm '{}'", config.realm),
            })??;
        info!(
            "Joined realm '{}' with session id {}",
            config.realm, session_id
        );

        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(SessionState::default());

        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&state), outbound.clone()));

        Ok(Self {
            session_id,
            realm: config.realm.clone(),
            acknowledge_publish: config.acknowledge_publish,
            leave_timeout: config.connect_timeout,
            next_request: AtomicU64::new(1),
            outbound,
            state,
            tasks: vec![writer, reader],
        })
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn next_request(&self) -> Id {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, message: Message) -> WampResult<()> {
        if self.state.is_closed() {
            return Err(WampError::SessionClosed);
        }
        self.outbound
            .send(Outgoing::Frame(message))
            .map_err(|_| WampError::SessionClosed)
    }

    async fn request<T>(
        &self,
        request: Id,
        pending: Pending,
        message: Message,
        reply: oneshot::Receiver<WampResult<T>>,
    ) -> WampResult<T> {
        if self.state.track(request, pending).is_err() {
            return Err(WampError::SessionClosed);
        }
        if let Err(e) = self.send(message) {
            self.state.take(request);
            return Err(e);
        }
        reply.await.map_err(|_| WampError::SessionClosed)?
    }
}

impl Drop for WampClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl Session for WampClient {
    fn session_id(&self) -> Id {
        self.session_id
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> WampResult<Id> {
        let request = self.next_request();
        let (reply, rx) = oneshot::channel();
        let message = Message::Subscribe {
            request,
            options: Dict::new(),
            topic: topic.to_string(),
        };
        self.request(request, Pending::Subscribe { handler, reply }, message, rx)
            .await
    }

    async fn unsubscribe(&self, subscription: Id) -> WampResult<()> {
        let request = self.next_request();
        let (reply, rx) = oneshot::channel();
        let message = Message::Unsubscribe {
            request,
            subscription,
        };
        self.request(
            request,
            Pending::Unsubscribe {
                subscription,
                reply,
            },
            message,
            rx,
        )
        .await
    }

    async fn register(&self, procedure: &str, handler: Arc<dyn Procedure>) -> WampResult<Id> {
        let request = self.next_request();
        let (reply, rx) = oneshot::channel();
        let message = Message::Register {
            request,
            options: Dict::new(),
            procedure: procedure.to_string(),
        };
        self.request(request, Pending::Register { handler, reply }, message, rx)
            .await
    }

    async fn unregister(&self, registration: Id) -> WampResult<()> {
        let request = self.next_request();
        let (reply, rx) = oneshot::channel();
        let message = Message::Unregister {
            request,
            registration,
        };
        self.request(
            request,
            Pending::Unregister {
                registration,
                reply,
            },
            message,
            rx,
        )
        .await
    }

    async fn publish(&self, topic: &str, args: Vec<Value>) -> WampResult<Option<Id>> {
        let request = self.next_request();
        let mut options = Dict::new();

        if !self.acknowledge_publish {
            let message = Message::Publish {
                request,
                options,
                topic: topic.to_string(),
                payload: Payload::new(args),
            };
            self.send(message)?;
            return Ok(None);
        }

        options.insert("acknowledge".to_string(), json!(true));
        let (reply, rx) = oneshot::channel();
        let message = Message::Publish {
            request,
            options,
            topic: topic.to_string(),
            payload: Payload::new(args),
        };
        self.request(request, Pending::Publish { reply }, message, rx)
            .await
    }

    async fn call(&self, procedure: &str, args: Vec<Value>) -> WampResult<CallResult> {
        let request = self.next_request();
        let (reply, rx) = oneshot::channel();
        let message = Message::Call {
            request,
            options: Dict::new(),
            procedure: procedure.to_string(),
            payload: Payload::new(args),
        };
        self.request(request, Pending::Call { reply }, message, rx)
            .await
    }

    async fn leave(&self) -> WampResult<()> {
        if self.state.is_closed() {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        *lock(&self.state.goodbye) = Some(tx);
        self.send(Message::Goodbye {
            details: Dict::new(),
            reason: uris::CLOSE_REALM.to_string(),
        })?;

        let acknowledged = timeout(self.leave_timeout, rx).await;
        let _ = self.outbound.send(Outgoing::Close);

        match acknowledged {
            Ok(_) => {
                info!("Left realm '{}'", self.realm);
                Ok(())
            }
            Err(_) => Err(WampError::Timeout {
                operation: "GOODBYE from router".to_string(),
            }),
        }
    }
}

fn hello_details(agent: &str) -> Dict {
    let mut details = Dict::new();
    details.insert(
        "roles".to_string(),
        json!({
            "publisher": {},
            "subscriber": {},
            "caller": {},
            "callee": {}
        }),
    );
    details.insert("agent".to_string(), json!(agent));
    details
}

async fn await_welcome(ws: &mut WsStream) -> WampResult<Id> {
    while let Some(frame) = ws.next().await {
        let text = match frame? {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return Err(WampError::SessionClosed),
            _ => continue,
        };

        match Message::decode(&text)? {
            Message::Welcome { session, .. } => return Ok(session),
            Message::Abort { reason, .. } => return Err(WampError::Aborted { reason }),
            Message::Challenge { auth_method, .. } => {
                let abort = Message::Abort {
                    details: Dict::new(),
                    reason: uris::CANNOT_AUTHENTICATE.to_string(),
                };
                ws.send(WsMessage::Text(abort.encode())).await?;
                return Err(WampError::Protocol {
                    message: format!("authentication method '{}' is not supported", auth_method),
                });
            }
            other => {
                return Err(WampError::Protocol {
                    message: format!("expected WELCOME, got message type {}", other.code()),
                })
            }
        }
    }

    Err(WampError::SessionClosed)
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = outbound.recv().await {
        match outgoing {
            Outgoing::Frame(message) => {
                debug!("-> {}", message.encode());
                if let Err(e) = sink.send(WsMessage::Text(message.encode())).await {
                    warn!("Failed to send WAMP message: {}", e);
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    state: Arc<SessionState>,
    outbound: mpsc::UnboundedSender<Outgoing>,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket read failed: {}", e);
                break;
            }
        };
        debug!("<- {}", text);

        let message = match Message::decode(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed WAMP message: {}", e);
                continue;
            }
        };

        if !dispatch(message, &state, &outbound) {
            break;
        }
    }

    state.close();
}

/// Handles one inbound message. Returns false once the session is over.
fn dispatch(
    message: Message,
    state: &Arc<SessionState>,
    outbound: &mpsc::UnboundedSender<Outgoing>,
) -> bool {
    match message {
        Message::Event {
            subscription,
            publication,
            details,
            payload,
        } => {
            let handler = lock(&state.subscriptions).get(&subscription).cloned();
            match handler {
                Some(handler) => handler.on_event(Event {
                    subscription,
                    publication,
                    details,
                    args: payload.args,
                    kwargs: payload.kwargs,
                }),
                None => debug!("Event for unknown subscription {}", subscription),
            }
        }
        Message::Invocation {
            request,
            registration,
            details,
            payload,
        } => {
            let procedure = lock(&state.registrations).get(&registration).cloned();
            match procedure {
                Some(procedure) => {
                    let invocation = Invocation {
                        request,
                        registration,
                        details,
                        args: payload.args,
                        kwargs: payload.kwargs,
                    };
                    let outbound = outbound.clone();
                    tokio::spawn(async move {
                        let reply = match procedure.invoke(invocation).await {
                            Ok(result) => Message::Yield {
                                request,
                                options: Dict::new(),
                                payload: result.into(),
                            },
                            Err(e) => Message::Error {
                                request_type: codes::INVOCATION,
                                request,
                                details: Dict::new(),
                                payload: e.payload(),
                                error: e.error,
                            },
                        };
                        let _ = outbound.send(Outgoing::Frame(reply));
                    });
                }
                None => {
                    let _ = outbound.send(Outgoing::Frame(Message::Error {
                        request_type: codes::INVOCATION,
                        request,
                        details: Dict::new(),
                        error: uris::NO_SUCH_REGISTRATION.to_string(),
                        payload: Payload::default(),
                    }));
                }
            }
        }
        Message::Goodbye { reason, .. } => {
            let initiated_locally = lock(&state.goodbye).take();
            match initiated_locally {
                Some(ack) => {
                    let _ = ack.send(());
                }
                None => {
                    info!("Router closed the session: {}", reason);
                    let _ = outbound.send(Outgoing::Frame(Message::Goodbye {
                        details: Dict::new(),
                        reason: uris::GOODBYE_AND_OUT.to_string(),
                    }));
                }
            }
            let _ = outbound.send(Outgoing::Close);
            return false;
        }
        Message::Abort { reason, .. } => {
            warn!("Session aborted by router: {}", reason);
            return false;
        }
        reply => match reply.request_id() {
            Some(request) => match state.take(request) {
                Some(pending) => pending.complete(reply, state),
                None => debug!("Reply for unknown request {}", request),
            },
            None => warn!("Ignoring unexpected message type {}", reply.code()),
        },
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_reply(request_type: u64) -> Message {
        Message::Error {
            request_type,
            request: 7,
            details: Dict::new(),
            error: uris::NO_SUCH_PROCEDURE.to_string(),
            payload: Payload::default(),
        }
    }

    #[tokio::test]
    async fn test_error_for_matching_request_type_is_application_error() {
        let state = SessionState::default();
        let (reply, rx) = oneshot::channel();

        Pending::Call { reply }.complete(error_reply(codes::CALL), &state);

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_no_such_procedure());
    }

    #[tokio::test]
    async fn test_error_for_other_request_type_is_protocol_error() {
        let state = SessionState::default();
        let (reply, rx) = oneshot::channel();

        Pending::Call { reply }.complete(error_reply(codes::SUBSCRIBE), &state);

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, WampError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_mismatched_error_does_not_install_handler() {
        struct Noop;
        impl EventHandler for Noop {
            fn on_event(&self, _event: Event) {}
        }

        let state = SessionState::default();
        let (reply, rx) = oneshot::channel();

        Pending::Subscribe {
            handler: Arc::new(Noop),
            reply,
        }
        .complete(error_reply(codes::REGISTER), &state);

        assert!(matches!(
            rx.await.unwrap(),
            Err(WampError::Protocol { .. })
        ));
        assert!(lock(&state.subscriptions).is_empty());
    }
}
