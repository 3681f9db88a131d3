//! Bidirectional JSON-RPC connection
//!
//! One [`RpcConnection`] owns a framed transport through a background I/O
//! task. Outbound requests are correlated with their responses through a
//! pending map; inbound requests and notifications are handed to an
//! [`RpcHandler`] by [`RpcConnection::serve`]. Each inbound request gets a
//! fresh [`CancellationToken`] which the peer can flip with `$/cancelRequest`.

use crate::io::transport::Transport;
use crate::log_rpc_message;
use crate::rpc::framing::MessageFraming;
use crate::rpc::message::{
    self, ErrorCode, RequestId, Response, RpcError, RpcMessage, create_error_response,
    create_notification, create_request, create_response,
};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, trace, warn};

/// Notification used by either side to cancel an in-flight request
pub const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";

/// Params of [`CANCEL_REQUEST_METHOD`]
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct CancelParams {
    pub id: RequestId,
}

/// Receives inbound traffic from the peer
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
        token: CancellationToken,
    ) -> Result<Value, RpcError>;

    async fn handle_notification(&self, method: &str, params: Option<Value>);
}

/// Inbound message queued for [`RpcConnection::serve`]
#[derive(Debug)]
pub enum Incoming {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
        token: CancellationToken,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

pub type IncomingReceiver = mpsc::UnboundedReceiver<Incoming>;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;
type InFlightMap = Arc<Mutex<HashMap<RequestId, CancellationToken>>>;

pub struct RpcConnection {
    outbound: mpsc::UnboundedSender<String>,
    next_id: AtomicI64,
    pending: PendingMap,
    in_flight: InFlightMap,
    closed: CancellationToken,
}

impl RpcConnection {
    /// Start the I/O task over `transport`.
    ///
    /// Returns the connection and the queue of inbound requests and
    /// notifications, to be drained by [`RpcConnection::serve`].
    pub fn new<T>(transport: T) -> (Arc<Self>, IncomingReceiver)
    where
        T: Transport + 'static,
    {
        let (outbound, outbound_receiver) = mpsc::unbounded_channel::<String>();
        let (incoming_sender, incoming_receiver) = mpsc::unbounded_channel();

        let connection = Arc::new(Self {
            outbound,
            next_id: AtomicI64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            closed: CancellationToken::new(),
        });

        tokio::spawn(Self::io_task(
            MessageFraming::new(transport),
            outbound_receiver,
            incoming_sender,
            Arc::clone(&connection.pending),
            Arc::clone(&connection.in_flight),
            connection.closed.clone(),
        ));

        (connection, incoming_receiver)
    }

    async fn io_task<T: Transport>(
        mut framed: MessageFraming<T>,
        mut outbound_receiver: mpsc::UnboundedReceiver<String>,
        incoming: mpsc::UnboundedSender<Incoming>,
        pending: PendingMap,
        in_flight: InFlightMap,
        closed: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                outbound = outbound_receiver.recv() => {
                    let Some(text) = outbound else { break };
                    if let Err(e) = framed.send(&text).await {
                        error!("Failed to send message: {}", e);
                        break;
                    }
                }
                inbound = framed.receive() => {
                    match inbound {
                        Ok(text) => {
                            if let Some(reply) =
                                Self::route_inbound(&text, &incoming, &pending, &in_flight).await
                                && let Err(e) = framed.send(&reply).await
                            {
                                error!("Failed to send error response: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("Connection receive ended: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        closed.cancel();
        let _ = framed.close().await;

        // Dropping the senders fails every outstanding request with ConnectionClosed
        pending.lock().await.clear();
        for (_, token) in in_flight.lock().await.drain() {
            token.cancel();
        }
        trace!("RpcConnection: I/O task finished");
    }

    /// Route one inbound payload. Returns a serialized error response when
    /// the payload could not be accepted.
    async fn route_inbound(
        text: &str,
        incoming: &mpsc::UnboundedSender<Incoming>,
        pending: &PendingMap,
        in_flight: &InFlightMap,
    ) -> Option<String> {
        let message = match message::deserialize(text.as_bytes()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejecting inbound payload: {}", e);
                let id = message::peek_request_id(text.as_bytes());
                let code = match e {
                    RpcError::Parse(_) => ErrorCode::ParseError,
                    RpcError::InvalidParams(_) => ErrorCode::InvalidParams,
                    _ => ErrorCode::InvalidRequest,
                };
                let response = create_error_response(id, code, e.to_string(), None);
                return message::serialize_response(&response).ok();
            }
        };

        match message {
            RpcMessage::Response(response) => {
                let Some(id) = response.id.clone() else {
                    warn!("Discarding response without id: {:?}", response.payload);
                    return None;
                };
                log_rpc_message!(Level::DEBUG, "in", "response", &id);
                match pending.lock().await.remove(&id) {
                    Some(sender) => {
                        if sender.send(response).is_err() {
                            debug!("Response receiver dropped for request {}", id);
                        }
                    }
                    None => debug!("Discarding response for unknown request {}", id),
                }
                None
            }
            RpcMessage::Notification(notification) => {
                log_rpc_message!(Level::DEBUG, "in", &notification.method, &notification.params);
                if notification.method == CANCEL_REQUEST_METHOD {
                    Self::cancel_in_flight(notification.params, in_flight).await;
                    return None;
                }
                let _ = incoming.send(Incoming::Notification {
                    method: notification.method,
                    params: notification.params,
                });
                None
            }
            RpcMessage::Request(request) => {
                log_rpc_message!(Level::DEBUG, "in", &request.method, &request.id);
                let token = CancellationToken::new();
                in_flight
                    .lock()
                    .await
                    .insert(request.id.clone(), token.clone());
                let _ = incoming.send(Incoming::Request {
                    id: request.id,
                    method: request.method,
                    params: request.params,
                    token,
                });
                None
            }
        }
    }

    async fn cancel_in_flight(params: Option<Value>, in_flight: &InFlightMap) {
        let Some(params) = params else {
            warn!("{} without params", CANCEL_REQUEST_METHOD);
            return;
        };
        match serde_json::from_value::<CancelParams>(params) {
            Ok(CancelParams { id }) => match in_flight.lock().await.get(&id) {
                Some(token) => {
                    debug!("Cancelling inbound request {}", id);
                    token.cancel();
                }
                None => trace!("Cancel for request {} that is no longer in flight", id),
            },
            Err(e) => warn!("Malformed {} params: {}", CANCEL_REQUEST_METHOD, e),
        }
    }

    /// Drain inbound traffic into `handler` until the peer disconnects.
    ///
    /// Notifications are handled in arrival order on this task; each request
    /// runs on its own task so slow providers do not block the stream.
    pub async fn serve(self: &Arc<Self>, mut incoming: IncomingReceiver, handler: Arc<dyn RpcHandler>) {
        while let Some(message) = incoming.recv().await {
            match message {
                Incoming::Notification { method, params } => {
                    handler.handle_notification(&method, params).await;
                }
                Incoming::Request {
                    id,
                    method,
                    params,
                    token,
                } => {
                    let connection = Arc::clone(self);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        connection
                            .answer(id, &method, params, token, handler.as_ref())
                            .await;
                    });
                }
            }
        }
        debug!("RpcConnection: inbound stream closed");
    }

    async fn answer(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
        token: CancellationToken,
        handler: &dyn RpcHandler,
    ) {
        let result = handler.handle_request(method, params, token.clone()).await;
        self.in_flight.lock().await.remove(&id);

        let response = if token.is_cancelled() {
            create_error_response(
                Some(id.clone()),
                ErrorCode::RequestCancelled,
                "Request was cancelled",
                None,
            )
        } else {
            match result {
                Ok(value) => create_response(id.clone(), value),
                Err(e) => {
                    debug!("Request {} ({}) failed: {}", id, method, e);
                    let object = e.to_error_object();
                    create_error_response(
                        Some(id.clone()),
                        ErrorCode::from_code(object.code).unwrap_or(ErrorCode::InternalError),
                        object.message,
                        object.data,
                    )
                }
            }
        };

        log_rpc_message!(Level::DEBUG, "out", method, &id);
        match message::serialize_response(&response) {
            Ok(text) => {
                if self.outbound.send(text).is_err() {
                    debug!("Connection closed before response to {} was sent", id);
                }
            }
            Err(e) => error!("Failed to serialize response to {}: {}", id, e),
        }
    }

    /// Send a request and wait for its response, without any deadline
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let (id, receiver) = self.send_request(method, params).await?;
        match receiver.await {
            Ok(response) => response.into_result(),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::ConnectionClosed)
            }
        }
    }

    /// Send a request; on deadline the peer is told to cancel and
    /// [`RpcError::Timeout`] is returned
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let (id, receiver) = self.send_request(method, params).await?;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::ConnectionClosed)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                let _ = self.notify(CANCEL_REQUEST_METHOD, Some(serde_json::json!({ "id": id })));
                Err(RpcError::Timeout)
            }
        }
    }

    /// Typed convenience wrapper over [`RpcConnection::request`]
    pub async fn request_typed<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params =
            serde_json::to_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
        let value = self.request(method, Some(params)).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Internal(e.to_string()))
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(RequestId, oneshot::Receiver<Response>), RpcError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = create_request(id.clone(), method, params)?;
        let text = message::serialize_request(&request)?;

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), sender);

        log_rpc_message!(Level::DEBUG, "out", method, &id);
        if self.outbound.send(text).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::ConnectionClosed);
        }
        Ok((id, receiver))
    }

    /// Send a notification (fire and forget)
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let notification = create_notification(method, params)?;
        let text = message::serialize_notification(&notification)?;
        log_rpc_message!(Level::DEBUG, "out", method, &notification.params);
        self.outbound
            .send(text)
            .map_err(|_| RpcError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the I/O task has stopped
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}
