//! Chromium DevTools Protocol browser driver.
//!
//! [`ChromiumDriver`] launches (or attaches to) Chromium through
//! [`ChromiumTransport`] and implements [`agent_core::BrowserDriver`] with
//! raw CDP commands on a single page session.

pub mod chrome;
pub mod config;
pub mod driver;
pub mod error;
pub mod keys;
pub mod scripts;
pub mod transport;
mod util;

pub use chrome::detect_chrome_executable;
pub use config::CdpConfig;
pub use driver::ChromiumDriver;
pub use error::{AdapterError, AdapterErrorKind};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
