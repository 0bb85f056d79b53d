//! The dispatch core (§4.G `MessageConnection`): state machine, request and
//! notification correlation, handler registries, cancellation propagation
//! and tracing.
//!
//! Shaped after [`crate::correlation`]-style managers in spirit — a
//! `DashMap` keyed by request id, an atomic id counter, `oneshot` channels
//! per pending request — but folds in the state machine and handler
//! registries a pure correlation table doesn't need to own. State mutation
//! lives behind `DashMap`/`Mutex`, not a single-task runner: §5 allows
//! either realization, and this crate's other components already lean on
//! concurrent maps, so the dispatch core matches them.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::buffer::HeaderMap;
use crate::cancellation::{CancellationSource, CancellationToken};
use crate::codec::CodecRegistry;
use crate::error::{ConnectionError, ResponseError};
use crate::message::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId};
use crate::progress::{ProgressParams, ProgressToken, PROGRESS_METHOD};
use crate::reader::{ReaderConfig, ReaderEvent, StreamReader};
use crate::trace::{
    format_summary, format_verbose, LogTraceParams, SetTraceParams, TraceLevel, Tracer,
    LOG_TRACE_METHOD, LOG_TRACE_NOTIFICATION_METHOD, SET_TRACE_METHOD, SET_TRACE_NOTIFICATION_METHOD,
};
use crate::transfer::TransferContext;
use crate::transport::DuplexBytes;
use crate::writer::{OutgoingHeaders, StreamWriter, WriterConfig};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type RequestHandlerFn =
    dyn Fn(Option<Value>, CancellationToken) -> BoxFuture<'static, Result<Value, ResponseError>> + Send + Sync;
type NotificationHandlerFn = dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync;
type ProgressHandlerFn = dyn Fn(Value) + Send + Sync;
type UnhandledNotificationFn = dyn Fn(&str, Option<Value>) + Send + Sync;
type ErrorHandlerFn = dyn Fn(&str) + Send + Sync;
type CloseHandlerFn = dyn Fn() + Send + Sync;
type DisposeHandlerFn = dyn Fn() + Send + Sync;
type PartialMessageHandlerFn = dyn Fn(u64, Duration) + Send + Sync;

const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";

/// Connection lifecycle states (§3 "Connection state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Listening,
    Closed,
    Disposed,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub reader: ReaderConfig,
    pub writer: WriterConfig,
    /// Content encodings this side can accept, advertised on outgoing
    /// requests via `Accept-Encoding` and matched against peers'
    /// configured default lists.
    pub accept_encodings: Vec<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            writer: WriterConfig::default(),
            accept_encodings: Vec::new(),
        }
    }
}

/// Shape a typed message's arguments per §4.G: `n=0` omits params, `n=1`
/// passes the lone argument (`null` if absent), `n>=2` pads/truncates to a
/// positional array of exactly `n` elements.
pub fn shape_typed_params(args: &[Value], arity: usize) -> Option<Value> {
    match arity {
        0 => None,
        1 => Some(args.first().cloned().unwrap_or(Value::Null)),
        n => {
            let mut positional = Vec::with_capacity(n);
            for i in 0..n {
                positional.push(args.get(i).cloned().unwrap_or(Value::Null));
            }
            Some(Value::Array(positional))
        }
    }
}

/// Shape an untyped message's raw arguments per §4.G: zero args omits
/// params, one arg is passed through, many become a positional array.
pub fn shape_untyped_params(args: &[Value]) -> Option<Value> {
    match args.len() {
        0 => None,
        1 => Some(args[0].clone()),
        _ => Some(Value::Array(args.to_vec())),
    }
}

struct PendingResponse {
    method: String,
    start_time: Instant,
    sender: oneshot::Sender<Result<Value, ConnectionError>>,
}

/// Monotonic request-id allocator, kept separate from [`MessageConnection`]'s
/// other state the way the teacher keeps its id generator apart from its
/// correlation table. Starts at `0`, not `1` — the spec is explicit that ids
/// begin at zero.
struct RequestIdAllocator {
    counter: AtomicI64,
}

impl RequestIdAllocator {
    fn new() -> Self {
        Self { counter: AtomicI64::new(0) }
    }

    fn next(&self) -> RequestId {
        RequestId::new_number(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn count(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

struct Shared<W> {
    writer: StreamWriter<W>,
    codecs: Arc<CodecRegistry>,
    transfer: Arc<TransferContext>,
    config: ConnectionConfig,
    state: StdMutex<ConnectionState>,
    next_id: RequestIdAllocator,
    pending: DashMap<RequestId, PendingResponse>,
    inbound_tokens: DashMap<RequestId, CancellationSource>,
    request_handlers: DashMap<String, Arc<RequestHandlerFn>>,
    notification_handlers: DashMap<String, Arc<NotificationHandlerFn>>,
    progress_handlers: DashMap<String, Arc<ProgressHandlerFn>>,
    unhandled_notification: StdMutex<Option<Arc<UnhandledNotificationFn>>>,
    on_error: StdMutex<Option<Arc<ErrorHandlerFn>>>,
    on_close: StdMutex<Option<Arc<CloseHandlerFn>>>,
    on_dispose: StdMutex<Option<Arc<DisposeHandlerFn>>>,
    on_partial_message: StdMutex<Option<Arc<PartialMessageHandlerFn>>>,
    trace_level: StdMutex<TraceLevel>,
    tracer: StdMutex<Option<Arc<dyn Tracer>>>,
}

impl<W> Shared<W> {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_listening(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Listening => Ok(()),
            ConnectionState::New => Err(ConnectionError::NotListening),
            ConnectionState::Closed => Err(ConnectionError::Closed),
            ConnectionState::Disposed => Err(ConnectionError::Disposed),
        }
    }

    fn ensure_not_terminal(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Closed => Err(ConnectionError::Closed),
            ConnectionState::Disposed => Err(ConnectionError::Disposed),
            _ => Ok(()),
        }
    }

    fn reject_all_pending(&self, err: ConnectionError) {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.sender.send(Err(err.clone()));
            }
        }
    }

    fn fire_error(&self, message: &str) {
        error!("{message}");
        if let Some(handler) = self.on_error.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            handler(message);
        }
    }

    /// Transition to `Closed` unless already terminal, rejecting pending
    /// responses and firing `onClose`. A no-op if already `Disposed` —
    /// disposal suppresses close events (§3).
    fn transition_to_closed(&self) {
        self.transition_to_closed_with(ConnectionError::Closed);
    }

    /// Same as [`Self::transition_to_closed`], but rejects pending responses
    /// with `err` instead of the generic `Closed` error — used to surface a
    /// transport read failure as `MessageReadError` on every request still
    /// awaiting a reply.
    fn transition_to_closed_with(&self, err: ConnectionError) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == ConnectionState::Disposed || *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        self.reject_all_pending(err);

        if let Some(handler) = self.on_close.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            handler();
        }
    }

    fn trace_message(&self, direction: &str, message: &Message) {
        let level = *self.trace_level.lock().unwrap_or_else(|e| e.into_inner());
        if level == TraceLevel::Off {
            return;
        }

        let (kind, method) = match message {
            Message::Request(r) => ("request", r.method.as_str()),
            Message::Notification(n) => ("notification", n.method.as_str()),
            Message::Response(_) => ("response", "<response>"),
        };
        if method == LOG_TRACE_METHOD || method == LOG_TRACE_NOTIFICATION_METHOD {
            return;
        }

        let summary = format_summary(direction, kind, method);
        debug!("{summary}");

        let verbose = if level == TraceLevel::Verbose {
            message.to_value().ok().map(|v| format_verbose(&v))
        } else {
            None
        };
        if level == TraceLevel::Verbose {
            if let Some(body) = &verbose {
                debug!("{body}");
            }
        }

        if let Some(tracer) = self.tracer.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            tracer.log(&summary, verbose.as_deref());
        }
    }
}

/// A single bidirectional JSON-RPC 2.0 connection over an abstract duplex
/// byte stream, split into independent read/write halves.
pub struct MessageConnection<R, W> {
    shared: Arc<Shared<W>>,
    reader_half: StdMutex<Option<R>>,
}

impl<R, W> MessageConnection<R, W>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(read: R, write: W, codecs: Arc<CodecRegistry>, config: ConnectionConfig) -> Arc<Self> {
        let writer = StreamWriter::new(write, codecs.clone(), config.writer.clone());
        Arc::new(Self {
            shared: Arc::new(Shared {
                writer,
                codecs,
                transfer: Arc::new(TransferContext::new()),
                config,
                state: StdMutex::new(ConnectionState::New),
                next_id: RequestIdAllocator::new(),
                pending: DashMap::new(),
                inbound_tokens: DashMap::new(),
                request_handlers: DashMap::new(),
                notification_handlers: DashMap::new(),
                progress_handlers: DashMap::new(),
                unhandled_notification: StdMutex::new(None),
                on_error: StdMutex::new(None),
                on_close: StdMutex::new(None),
                on_dispose: StdMutex::new(None),
                on_partial_message: StdMutex::new(None),
                trace_level: StdMutex::new(TraceLevel::Off),
                tracer: StdMutex::new(None),
            }),
            reader_half: StdMutex::new(Some(read)),
        })
    }

    pub fn from_duplex(
        duplex: impl DuplexBytes<Read = R, Write = W>,
        codecs: Arc<CodecRegistry>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let (read, write) = duplex.split();
        Self::new(read, write, codecs, config)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Start reading from the transport. Requires `New`; a second call
    /// returns `AlreadyListening`.
    pub fn listen(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                ConnectionState::New => *state = ConnectionState::Listening,
                ConnectionState::Listening => return Err(ConnectionError::AlreadyListening),
                ConnectionState::Closed => return Err(ConnectionError::Closed),
                ConnectionState::Disposed => return Err(ConnectionError::Disposed),
            }
        }

        let read = self
            .reader_half
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("reader half is taken exactly once, guarded by the New->Listening transition above");

        let reader = StreamReader::new(read, self.shared.codecs.clone(), self.shared.config.reader);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(reader.run(tx));

        let shared = self.shared.clone();
        tokio::spawn(async move {
            drive_events(shared, rx).await;
        });

        Ok(())
    }

    /// Reject all pending responses, drop inbound cancellation tokens
    /// without cancelling their handlers, and transition to `Disposed`.
    /// Idempotent.
    pub fn dispose(&self) {
        let already_disposed = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            let already = *state == ConnectionState::Disposed;
            *state = ConnectionState::Disposed;
            already
        };
        if already_disposed {
            return;
        }

        self.shared.reject_all_pending(ConnectionError::Disposed);
        self.shared.inbound_tokens.clear();

        if let Some(handler) = self
            .shared
            .on_dispose
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            handler();
        }
    }

    fn accept_encoding_header(&self) -> Option<String> {
        if self.shared.config.accept_encodings.is_empty() {
            None
        } else {
            let list = TransferContext::response_accept_encodings(&self.shared.config.accept_encodings);
            Some(list.join(", "))
        }
    }

    /// Send a request and await its matched response. `token`, if supplied,
    /// forwards cancellation as a `$/cancelRequest` notification (§4.G).
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        token: Option<CancellationToken>,
    ) -> Result<Value, ConnectionError> {
        let method = method.into();
        self.shared.ensure_listening()?;

        let id = self.shared.next_id.next();
        let message = Message::Request(JsonRpcRequest::new(method.clone(), params, id.clone()));
        self.shared.trace_message("-->", &message);

        let content_encoding = self
            .shared
            .transfer
            .request_content_encoding(&self.shared.config.accept_encodings);
        let headers = OutgoingHeaders {
            content_encoding,
            accept_encoding: self.accept_encoding_header(),
        };

        if let Err(e) = self.shared.writer.write(&message, headers).await {
            self.shared
                .fire_error(&format!("failed to write request '{method}': {e}"));
            return Err(ConnectionError::Response(ResponseError::message_write_error(e.to_string())));
        }

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(
            id.clone(),
            PendingResponse {
                method: method.clone(),
                start_time: Instant::now(),
                sender: tx,
            },
        );

        if let Some(token) = token {
            let shared = self.shared.clone();
            let cancel_id = id.clone();
            token.on_cancelled(move || {
                let shared = shared.clone();
                let cancel_id = cancel_id.clone();
                tokio::spawn(async move {
                    let note = Message::Notification(JsonRpcNotification::new(
                        CANCEL_REQUEST_METHOD,
                        Some(serde_json::json!({ "id": cancel_id })),
                    ));
                    let _ = shared.writer.write(&note, OutgoingHeaders::default()).await;
                });
            });
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectionError::Closed),
        }
    }

    pub async fn send_notification(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<(), ConnectionError> {
        let method = method.into();
        self.shared.ensure_not_terminal()?;

        let message = Message::Notification(JsonRpcNotification::new(method.clone(), params));
        self.shared.trace_message("-->", &message);

        let content_encoding = self
            .shared
            .transfer
            .notification_content_encoding(&self.shared.config.accept_encodings);
        let headers = OutgoingHeaders {
            content_encoding,
            accept_encoding: None,
        };

        self.shared.writer.write(&message, headers).await.map_err(|e| {
            self.shared
                .fire_error(&format!("failed to write notification '{method}': {e}"));
            ConnectionError::Response(ResponseError::message_write_error(e.to_string()))
        })
    }

    pub async fn send_progress(&self, token: ProgressToken, value: Value) -> Result<(), ConnectionError> {
        let params = serde_json::to_value(ProgressParams { token, value })
            .map_err(|e| ConnectionError::Response(ResponseError::message_write_error(e.to_string())))?;
        self.send_notification(PROGRESS_METHOD, Some(params)).await
    }

    /// Send a request built from positional arguments and a declared
    /// parameter arity, shaping them per the typed dispatch contract (§4.G)
    /// before building the request body.
    pub async fn send_typed_request(
        &self,
        method: impl Into<String>,
        args: &[Value],
        arity: usize,
        token: Option<CancellationToken>,
    ) -> Result<Value, ConnectionError> {
        self.send_request(method, shape_typed_params(args, arity), token).await
    }

    /// Send a request built from raw, untyped positional arguments, shaped
    /// by arity per the untyped dispatch contract (§4.G).
    pub async fn send_untyped_request(
        &self,
        method: impl Into<String>,
        args: &[Value],
        token: Option<CancellationToken>,
    ) -> Result<Value, ConnectionError> {
        self.send_request(method, shape_untyped_params(args), token).await
    }

    /// Send a notification built from positional arguments and a declared
    /// parameter arity, shaped the same way as [`Self::send_typed_request`].
    pub async fn send_typed_notification(
        &self,
        method: impl Into<String>,
        args: &[Value],
        arity: usize,
    ) -> Result<(), ConnectionError> {
        self.send_notification(method, shape_typed_params(args, arity)).await
    }

    /// Send a notification built from raw, untyped positional arguments.
    pub async fn send_untyped_notification(
        &self,
        method: impl Into<String>,
        args: &[Value],
    ) -> Result<(), ConnectionError> {
        self.send_notification(method, shape_untyped_params(args)).await
    }

    pub fn on_request<F, Fut>(&self, method: impl Into<String>, handler: F) -> Result<(), ConnectionError>
    where
        F: Fn(Option<Value>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ResponseError>> + Send + 'static,
    {
        self.shared.ensure_not_terminal()?;
        let wrapped: Arc<RequestHandlerFn> = Arc::new(move |params, token| Box::pin(handler(params, token)));
        self.shared.request_handlers.insert(method.into(), wrapped);
        Ok(())
    }

    pub fn on_notification<F, Fut>(&self, method: impl Into<String>, handler: F) -> Result<(), ConnectionError>
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shared.ensure_not_terminal()?;
        let wrapped: Arc<NotificationHandlerFn> = Arc::new(move |params| Box::pin(handler(params)));
        self.shared.notification_handlers.insert(method.into(), wrapped);
        Ok(())
    }

    pub fn on_progress<F>(&self, token: ProgressToken, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared.progress_handlers.insert(token.to_string(), Arc::new(handler));
    }

    pub fn on_unhandled_notification<F>(&self, handler: F)
    where
        F: Fn(&str, Option<Value>) + Send + Sync + 'static,
    {
        *self.shared.unhandled_notification.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.shared.on_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shared.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    pub fn on_dispose<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shared.on_dispose.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    pub fn on_partial_message<F>(&self, handler: F)
    where
        F: Fn(u64, Duration) + Send + Sync + 'static,
    {
        *self.shared.on_partial_message.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    /// Set the trace level and optional tracer sink. When `send_notification`
    /// is true and the connection is listening, emits `$/setTraceNotification`.
    pub fn trace(&self, level: TraceLevel, tracer: Option<Arc<dyn Tracer>>, send_notification: bool) {
        *self.shared.trace_level.lock().unwrap_or_else(|e| e.into_inner()) = level;
        *self.shared.tracer.lock().unwrap_or_else(|e| e.into_inner()) = tracer;

        if send_notification && self.shared.state() == ConnectionState::Listening {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                let params = serde_json::to_value(SetTraceParams {
                    value: level.to_wire().to_string(),
                })
                .unwrap_or(Value::Null);
                let note = Message::Notification(JsonRpcNotification::new(SET_TRACE_NOTIFICATION_METHOD, Some(params)));
                let _ = shared.writer.write(&note, OutgoingHeaders::default()).await;
            });
        }
    }
}

async fn drive_events<W>(shared: Arc<Shared<W>>, mut rx: mpsc::Receiver<ReaderEvent>)
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    while let Some(event) = rx.recv().await {
        match event {
            ReaderEvent::Message(message, headers) => {
                if shared.state() == ConnectionState::Disposed {
                    continue;
                }
                handle_inbound_message(&shared, message, headers).await;
            }
            ReaderEvent::PartialMessage { token, waiting_time } => {
                if let Some(handler) = shared
                    .on_partial_message
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                {
                    handler(token, waiting_time);
                }
            }
            ReaderEvent::Error(err) => {
                shared.fire_error(&format!("read error: {err}"));
                shared.transition_to_closed_with(ConnectionError::Response(ResponseError::message_read_error(
                    err.to_string(),
                )));
                return;
            }
            ReaderEvent::Closed => {
                shared.transition_to_closed();
                return;
            }
        }
    }
}

async fn handle_inbound_message<W>(shared: &Arc<Shared<W>>, message: Message, headers: HeaderMap)
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    shared.trace_message("<--", &message);

    match message {
        Message::Request(request) => handle_inbound_request(shared, request, headers).await,
        Message::Notification(note) => handle_inbound_notification(shared, note).await,
        Message::Response(response) => handle_inbound_response(shared, response),
    }
}

async fn handle_inbound_request<W>(shared: &Arc<Shared<W>>, request: JsonRpcRequest, headers: HeaderMap)
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let id = request.id.clone();
    if !headers.is_empty() {
        shared.transfer.capture(id.clone(), headers);
    }

    let source = CancellationSource::new();
    let token = source.token();
    shared.inbound_tokens.insert(id.clone(), source);

    let handler = shared.request_handlers.get(&request.method).map(|e| e.value().clone());

    let Some(handler) = handler else {
        shared.inbound_tokens.remove(&id);
        shared.transfer.clear(&id);
        let response = Message::Response(JsonRpcResponse::failure(
            ResponseError::method_not_found(&request.method),
            Some(id),
        ));
        shared.trace_message("-->", &response);
        let _ = shared.writer.write(&response, OutgoingHeaders::default()).await;
        return;
    };

    let shared2 = shared.clone();
    let method = request.method.clone();
    let response_id = id.clone();
    let params = request.params;

    tokio::spawn(async move {
        let outcome = AssertUnwindSafe(handler(params, token)).catch_unwind().await;

        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err),
            Err(payload) => {
                let text = panic_message(&*payload);
                Err(ResponseError::from_handler_message(&method, &text))
            }
        };

        shared2.inbound_tokens.remove(&response_id);

        if shared2.state() == ConnectionState::Disposed {
            // Disposal discards in-flight inbound handlers' responses rather
            // than cancelling them (§5): the handler ran to completion, but
            // nothing reaches the wire once disposed.
            shared2.transfer.clear(&response_id);
            return;
        }

        let response_message = match result {
            Ok(value) => JsonRpcResponse::success(value, response_id.clone()),
            Err(err) => JsonRpcResponse::failure(err, Some(response_id.clone())),
        };
        let response = Message::Response(response_message);
        shared2.trace_message("-->", &response);

        let content_encoding = shared2
            .transfer
            .response_content_encoding(&response_id, &shared2.config.accept_encodings);
        let headers = OutgoingHeaders {
            content_encoding,
            accept_encoding: None,
        };

        if let Err(e) = shared2.writer.write(&response, headers).await {
            shared2.fire_error(&format!("failed to write response for '{method}': {e}"));
        }
        shared2.transfer.clear(&response_id);
    });
}

async fn handle_inbound_notification<W>(shared: &Arc<Shared<W>>, note: JsonRpcNotification)
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    match note.method.as_str() {
        CANCEL_REQUEST_METHOD => {
            let target = note
                .params
                .as_ref()
                .and_then(|p| p.get("id"))
                .cloned()
                .and_then(|v| serde_json::from_value::<RequestId>(v).ok());
            if let Some(id) = target {
                if let Some(entry) = shared.inbound_tokens.get(&id) {
                    entry.cancel();
                }
            }
        }
        SET_TRACE_METHOD | SET_TRACE_NOTIFICATION_METHOD => {
            if let Some(parsed) = note
                .params
                .and_then(|p| serde_json::from_value::<SetTraceParams>(p).ok())
            {
                *shared.trace_level.lock().unwrap_or_else(|e| e.into_inner()) = TraceLevel::from_wire(&parsed.value);
            }
        }
        LOG_TRACE_METHOD | LOG_TRACE_NOTIFICATION_METHOD => {
            if let Some(parsed) = note
                .params
                .and_then(|p| serde_json::from_value::<LogTraceParams>(p).ok())
            {
                if let Some(tracer) = shared.tracer.lock().unwrap_or_else(|e| e.into_inner()).clone() {
                    tracer.log(&parsed.message, parsed.verbose.as_deref());
                }
            }
        }
        PROGRESS_METHOD => {
            if let Some(parsed) = note
                .params
                .and_then(|p| serde_json::from_value::<ProgressParams>(p).ok())
            {
                let handler = shared
                    .progress_handlers
                    .get(&parsed.token.to_string())
                    .map(|e| e.value().clone());
                if let Some(handler) = handler {
                    handler(parsed.value);
                }
            }
        }
        method => {
            let handler = shared.notification_handlers.get(method).map(|e| e.value().clone());
            match handler {
                Some(handler) => handler(note.params).await,
                None => {
                    let unhandled = shared
                        .unhandled_notification
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone();
                    match unhandled {
                        Some(unhandled) => unhandled(method, note.params),
                        None if method.starts_with("$/") => {
                            debug!("ignoring unrecognized reserved notification '{method}'");
                        }
                        None => warn!("no handler registered for notification '{method}'"),
                    }
                }
            }
        }
    }
}

fn handle_inbound_response<W>(shared: &Arc<Shared<W>>, response: JsonRpcResponse) {
    let Some(id) = response.id else {
        warn!("response with null id discarded");
        return;
    };

    let Some((_, pending)) = shared.pending.remove(&id) else {
        error!("response for unknown request id {id} discarded");
        return;
    };
    debug!(
        "resolved pending request '{}' (id {id}) in {:?}",
        pending.method,
        pending.start_time.elapsed()
    );

    let outcome = if let Some(err) = response.error {
        Err(ConnectionError::Response(err))
    } else if let Some(value) = response.result {
        Ok(value)
    } else {
        Err(ConnectionError::Response(ResponseError::neither_result_nor_error()))
    };

    let _ = pending.sender.send(outcome);
}
