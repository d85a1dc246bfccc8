//! Email delivery providers.
//!
//! - [`SmtpMailer`] - SMTP relay via lettre (feature `smtp`)
//! - [`LocalMailer`] - in-memory capture for development and testing
//! - [`LoggerMailer`] - log-only, for staging environments

#[cfg(feature = "smtp")]
mod smtp;
#[cfg(feature = "smtp")]
pub use smtp::{SmtpBuilder, SmtpMailer, TlsMode};

pub(crate) mod local;
pub use local::{CapturedEmail, LocalMailer};

mod logger;
pub use logger::LoggerMailer;
