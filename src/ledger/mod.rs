mod service;

pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notifier::MessageRef;

/// App identifier with the conditional-approval override.
pub const ANGELONE: &str = "angelone";
/// Reason code that flips an `angelone` reject into an approval.
pub const NON_TRADE_CODE: &str = "nt";

/// Fixed reason-code catalog: short code → human-readable text.
/// Unknown codes pass through as literal text rather than failing.
const REASON_CODES: &[(&str, &str)] = &[
    (
        "77",
        "Incorrect Proof - Video/screenshot is incorrect, send correct recording showing process",
    ),
    (
        "78",
        "Improper Activation - Activation not done properly, send correct video",
    ),
    ("79", "Fraud Detected - Fraud detected, account not showing"),
    ("80", "Wrong Device - Activation not done on user's device"),
    ("81", "Late Submission - Activation completed after deadline"),
    (NON_TRADE_CODE, "Non Trade Approved"),
];

/// Short labels and codes for the operator's reject controls.
pub const REJECT_OPTIONS: &[(&str, &str)] = &[
    ("Incorrect Proof", "77"),
    ("Improper Activation", "78"),
    ("Fraud Detected", "79"),
    ("Wrong Device", "80"),
    ("Late Submission", "81"),
];

/// Resolve a reason code to its human text; unknown codes are kept as-is.
pub fn reason_text(code: &str) -> String {
    REASON_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, text)| (*text).to_owned())
        .unwrap_or_else(|| code.to_owned())
}

/// Strip whitespace out of a mobile number.
pub fn normalize_mobile(mobile: &str) -> String {
    mobile.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Lifecycle state of an [`Activation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Approved => write!(f, "approved"),
            Status::Rejected => write!(f, "rejected"),
        }
    }
}

/// Operator decision applied through [`ActivationLedger::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// A single user's claim of having completed an app-specific onboarding
/// action, pending operator verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    pub email: String,
    /// 10-digit identifier, whitespace-stripped.
    pub mobile: String,
    pub app: String,
    pub status: Status,
    /// Default `"pending"` at creation; replaced by the resolved reason
    /// text when a decision carries a reason code.
    pub reason: String,
    /// Last-modified instant.
    pub timestamp: DateTime<Utc>,
    /// Human-readable creation instant.
    pub submission_date: String,
    /// Set once the review surface is delivered; used for in-place edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_message_ref: Option<MessageRef>,
}

impl Activation {
    pub(crate) fn new(email: &str, app: &str, mobile: &str) -> Self {
        let now = Utc::now();
        Self {
            email: email.to_owned(),
            mobile: normalize_mobile(mobile),
            app: app.to_owned(),
            status: Status::Pending,
            reason: "pending".to_owned(),
            timestamp: now,
            submission_date: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            review_message_ref: None,
        }
    }

    /// Whether this record blocks a new submission for its `(app, mobile)`
    /// pair. Rejected records do not: resubmission after rejection is
    /// allowed.
    pub fn blocks_duplicates(&self) -> bool {
        matches!(self.status, Status::Pending | Status::Approved)
    }
}
