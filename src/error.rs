//! Error handler for activa.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing workflow errors.
///
/// Every variant is recoverable: user-facing ones re-prompt or restart the
/// session step that produced them, operator-facing ones are reported on the
/// review surface. None of them terminate the process.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad email shape, bad mobile number, wrong media kind.
    /// The session stays in its current state and re-prompts.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An activation for this `(app, mobile)` pair is already pending or
    /// approved.
    #[error("duplicate activation for {app}/{mobile}")]
    Duplicate { app: String, mobile: String },

    /// No user matches the supplied credentials.
    #[error("invalid email or password")]
    Auth,

    /// `resolve` found no activation matching `(email, app, mobile)`.
    #[error("no activation found for {email}/{app}/{mobile}")]
    NotFound {
        email: String,
        app: String,
        mobile: String,
    },

    /// `resolve` found records for the triple, but none still `pending`.
    #[error("activation already resolved to '{status}'")]
    AlreadyResolved { status: String },

    /// The notifier could not deliver an outbound message. Never blocks the
    /// data mutation that triggered the notification.
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("store I/O failed: {0}")]
    Store(#[from] std::io::Error),

    #[error("store record decoding failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error should be answered by re-prompting in place
    /// rather than moving the session.
    pub fn is_reprompt(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_reprompt() {
        assert!(Error::Validation("bad mobile".into()).is_reprompt());
        assert!(!Error::Auth.is_reprompt());
        assert!(
            !Error::Duplicate {
                app: "upstox".into(),
                mobile: "9876543210".into()
            }
            .is_reprompt()
        );
    }
}
