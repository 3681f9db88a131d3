//! Interactive view sessions
//!
//! The shell asks for a view by id; the [`SessionManager`] resolves it once
//! through the registered provider and hands back a stable handle that all
//! later messages, visibility changes and disposal are addressed by.

pub mod session;
pub mod webview;

pub use session::{ResolveError, ResolvedView, SessionError, SessionManager, ViewEvent, WebviewViewProvider};
pub use webview::{WebviewOptions, WebviewView};
