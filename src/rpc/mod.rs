//! JSON-RPC plumbing between the editor host and the extension process
//!
//! - **Message**: request/response/notification records and validation
//! - **Framing**: Content-Length delimited payloads over a raw transport
//! - **Connection**: request/response correlation, inbound dispatch and
//!   cancellation
//!
//! Nothing here interprets method names; routing belongs to [`crate::host`].

pub mod connection;
pub mod framing;
pub mod message;

pub use connection::{
    CANCEL_REQUEST_METHOD, CancelParams, Incoming, IncomingReceiver, RpcConnection, RpcHandler,
};
pub use framing::{FramingError, MessageFraming};
pub use message::{
    ErrorCode, ErrorObject, Notification, Request, RequestId, Response, ResponsePayload, RpcError,
    RpcMessage,
};
