use thiserror::Error;

use crate::constants::get_status_text;

/// Errors the dispatch pipeline can surface. Every variant maps to an
/// HTTP status via [`DispatchError::status_code`]; the core never panics
/// on a malformed request or a misconfigured handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route matches the request path")]
    RouteNotFound,

    #[error("no handler registered for this method/content-type")]
    MethodOrContentTypeMismatch,

    #[error("handler is missing a status code or otherwise misconfigured")]
    HandlerMisconfigured,

    #[error("subscription exceeded its timeout")]
    SubscriptionTimeout,

    #[error("write to the client failed: {0}")]
    WriteFailed(String),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl DispatchError {
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::RouteNotFound => 404,
            DispatchError::MethodOrContentTypeMismatch => 405,
            DispatchError::HandlerMisconfigured => 500,
            DispatchError::SubscriptionTimeout => 408,
            DispatchError::WriteFailed(_) => 500,
            DispatchError::ClientDisconnected => 500,
            DispatchError::InternalError(_) => 500,
        }
    }

    pub fn status_text(&self) -> &'static str {
        get_status_text(self.status_code())
    }
}
