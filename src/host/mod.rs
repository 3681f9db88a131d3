//! Host side of the shell connection
//!
//! [`facade`] routes inbound `extensionHost.*` traffic; [`sink`] is the
//! outbound seam back to the shell's UI.

pub mod facade;
pub mod methods;
pub mod params;
pub mod sink;

pub use facade::{ExtensionHost, HostError};
pub use sink::{
    HostSink, InputBoxOptions, MessageSeverity, QuickPickItem, QuickPickOptions, RpcHostSink,
};
