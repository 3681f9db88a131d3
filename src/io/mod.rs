//! Host-side I/O seams
//!
//! - [`transport`]: raw text chunks over a byte stream, or scripted in tests
//! - [`process`]: spawning and stopping the language daemon
//! - [`file_system`]: reading workspace files that were never opened
//!
//! Message boundaries and JSON-RPC are handled in [`crate::rpc`].

pub mod file_system;
pub mod process;
pub mod transport;

pub use file_system::{FileSystem, RealFileSystem};
pub use process::{ChildProcessManager, ProcessError, ProcessManager, ProcessState, StopMode};
pub use transport::{MockTransport, StreamTransport, StreamTransportError, Transport};
