//! Interception proxy lifecycle.

mod proxy;
mod signal;

pub use proxy::CaptureProxy;
pub use signal::shutdown_signal;
