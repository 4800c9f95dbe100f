mod directory;

pub use directory::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notifier::ChannelId;

/// User as saved in the store.
///
/// The password is the shared secret as issued by the operator, stored as-is
/// for parity with the existing user files. Email is the unique key and is
/// always stored lowercase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub password: String,
    pub name: String,
    /// Bound on first successful login or registration; first binding wins.
    pub channel_id: Option<ChannelId>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new unbound [`User`].
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into().to_lowercase(),
            password: password.into(),
            name: name.into(),
            channel_id: None,
            created_at: Utc::now(),
        }
    }
}
