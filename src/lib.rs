//! `fixd`: an embeddable HTTP server fixture for integration tests.
//!
//! Spin up a real TCP listener, script its responses (literal bodies,
//! `:param`/`[request...]`/`{session}` interpolation, or custom async
//! callbacks), delay or repeat them, wire routes together with
//! `after`/`every`/`upon` triggers, and inspect everything the fixture
//! received afterward.

pub mod async_engine;
pub mod capture;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod interpolator;
pub mod request;
pub mod response;
pub mod route;
pub mod server;
pub mod session;

pub use capture::CapturedRequest;
pub use constants::HttpMethod;
pub use error::DispatchError;
pub use handler::{Handler, HandlerBuilder, HandlerKey, HttpResponse, ResponseBody};
pub use request::Request;
pub use route::Route;
pub use server::Server;
pub use session::Session;

/// Installs a `tracing` subscriber reading `RUST_LOG` (default `info`).
/// Optional: callers embedding `fixd` in a larger test harness that
/// already has its own subscriber should skip this and let their own
/// take effect.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
