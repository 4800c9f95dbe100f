//! Authentication and registration over the record store.

use std::sync::{Arc, LazyLock};

use regex_lite::Regex;

use crate::error::{Error, Result};
use crate::notifier::ChannelId;
use crate::store::Store;
use crate::user::User;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email regex")
});

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    /// The email existed without a bound channel; the stored record gained
    /// one. Password and name are left untouched.
    ChannelIdUpdated,
    AlreadyExists,
}

impl RegisterOutcome {
    /// Short result line for the operator's bulk-ingest feedback.
    pub fn describe(&self) -> &'static str {
        match self {
            RegisterOutcome::Created => "User added successfully",
            RegisterOutcome::ChannelIdUpdated => "User channel id updated",
            RegisterOutcome::AlreadyExists => "User already exists",
        }
    }
}

/// Credential check and session-linking over the user collection.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<Store>,
}

impl UserDirectory {
    /// Create a new [`UserDirectory`].
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Validate the `user@domain.tld` shape before any store access,
    /// returning the normalized (trimmed, lowercased) address.
    pub fn normalize_email(email: &str) -> Result<String> {
        let email = email.trim().to_lowercase();
        if EMAIL_RE.is_match(&email) {
            Ok(email)
        } else {
            Err(Error::Validation(format!("malformed email '{email}'")))
        }
    }

    /// Check credentials: case-insensitive email, case-sensitive password.
    ///
    /// On success, binds `channel` as the user's channel id if none is set
    /// yet. Repeated logins are no-ops on the binding; the first writer
    /// wins.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        channel: ChannelId,
    ) -> Result<User> {
        let email = Self::normalize_email(email)?;

        self.store
            .users
            .mutate(|users| {
                let user = users
                    .iter_mut()
                    .find(|u| u.email == email && u.password == password)
                    .ok_or(Error::Auth)?;
                if user.channel_id.is_none() {
                    user.channel_id = Some(channel);
                    tracing::info!(%email, %channel, "channel bound to user");
                }
                Ok(user.clone())
            })
            .await?
    }

    /// Register a user, or merge a channel id into an existing unbound
    /// record.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        channel_id: Option<ChannelId>,
    ) -> Result<RegisterOutcome> {
        let email = Self::normalize_email(email)?;
        let password = password.to_owned();
        let name = name.to_owned();

        self.store
            .users
            .mutate(move |users| {
                if let Some(existing) = users.iter_mut().find(|u| u.email == email) {
                    return match (existing.channel_id, channel_id) {
                        (None, Some(channel)) => {
                            existing.channel_id = Some(channel);
                            RegisterOutcome::ChannelIdUpdated
                        },
                        _ => RegisterOutcome::AlreadyExists,
                    };
                }

                let mut user = User::new(email, password, name);
                user.channel_id = channel_id;
                users.push(user);
                RegisterOutcome::Created
            })
            .await
    }

    /// Look up a user by (already normalized) email.
    pub async fn find(&self, email: &str) -> Option<User> {
        let email = email.to_lowercase();
        self.store
            .users
            .read(|users| users.iter().find(|u| u.email == email).cloned())
            .await
    }

    /// Snapshot of every user, in registration order.
    pub async fn list(&self) -> Vec<User> {
        self.store.users.all().await
    }
}
