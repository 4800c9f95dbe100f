//! Operator review workflow.
//!
//! Surfaces each submission to the review channel with decision controls,
//! applies operator decisions through the ledger, edits the surface in
//! place once decided, and notifies the submitter of the outcome.

use std::sync::Arc;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::ledger::{
    ANGELONE, Activation, ActivationLedger, Decision, Filter, NON_TRADE_CODE, REJECT_OPTIONS,
    Status,
};
use crate::notifier::{Button, ChannelId, Controls, MediaRef, Notifier, log_delivery_error};
use crate::session::Action;
use crate::user::UserDirectory;

/// Operator-facing review protocol over the activation ledger.
pub struct ReviewProtocol<N> {
    config: Arc<Configuration>,
    ledger: ActivationLedger,
    directory: UserDirectory,
    notifier: Arc<N>,
}

// Not derived: that would require `N: Clone`, and notifiers only ever move
// around behind the `Arc`.
impl<N> Clone for ReviewProtocol<N> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            ledger: self.ledger.clone(),
            directory: self.directory.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<N: Notifier> ReviewProtocol<N> {
    /// Create a new [`ReviewProtocol`].
    pub fn new(
        config: Arc<Configuration>,
        ledger: ActivationLedger,
        directory: UserDirectory,
        notifier: Arc<N>,
    ) -> Self {
        Self {
            config,
            ledger,
            directory,
            notifier,
        }
    }

    /// Post the submission with its decision controls to the review
    /// channel and remember the message reference on the record.
    ///
    /// Delivery failure is escalated to the operator alert identity and
    /// never rolls back the already-committed submit.
    pub async fn present_for_review(&self, activation: &Activation, media: &MediaRef) {
        let Some(target) = self.config.review_target() else {
            tracing::warn!("no review channel configured, submission not surfaced");
            return;
        };

        let caption = format!(
            "📬 New Activation Request\n\n📲 App: {}\n📧 Email: {}\n📱 Mobile: {}\n\n🔄 Status: ⏳ Pending",
            activation.app.to_uppercase(),
            activation.email,
            activation.mobile,
        );

        match self
            .notifier
            .send_media(target, media, &caption, Some(self.decision_controls(activation)))
            .await
        {
            Ok(message) => {
                if let Err(err) = self
                    .ledger
                    .set_review_ref(&activation.email, &activation.app, &activation.mobile, message)
                    .await
                {
                    tracing::error!(error = %err, "review message reference not stored");
                }
            },
            Err(err) => {
                tracing::error!(error = %err, app = activation.app, "review surface not delivered");
                self.alert_operator(&format!(
                    "❌ Failed to send activation to review channel:\n\nApp: {}\nEmail: {}\nError: {err}",
                    activation.app, activation.email,
                ))
                .await;
            },
        }
    }

    /// Apply an operator decision action.
    ///
    /// `Approve` and `Reason` mutate the ledger; `Reject` only swaps the
    /// surface's controls for the reason menu. A stale click on an
    /// already-resolved record is reported to the actor without a second
    /// mutation.
    pub async fn apply_decision(&self, actor: ChannelId, action: &Action) -> Result<()> {
        match action {
            Action::Approve { email, app, mobile } => {
                self.decide(actor, email, app, mobile, Decision::Approve, None)
                    .await
            },
            Action::Reject { email, app, mobile } => {
                self.show_reason_menu(email, app, mobile).await
            },
            Action::Reason {
                code,
                email,
                app,
                mobile,
            } => {
                self.decide(actor, email, app, mobile, Decision::Reject, Some(code))
                    .await
            },
            _ => Ok(()),
        }
    }

    async fn decide(
        &self,
        actor: ChannelId,
        email: &str,
        app: &str,
        mobile: &str,
        decision: Decision,
        reason_code: Option<&str>,
    ) -> Result<()> {
        let resolved = match self
            .ledger
            .resolve(email, app, mobile, decision, reason_code)
            .await
        {
            Ok(resolved) => resolved,
            Err(err @ (Error::NotFound { .. } | Error::AlreadyResolved { .. })) => {
                // Surface the failure to the operator, nothing to notify.
                log_delivery_error(
                    self.notifier
                        .send_text(actor, &format!("⚠️ {err}"), None)
                        .await,
                    "resolve failure report",
                );
                return Ok(());
            },
            Err(err) => return Err(err),
        };

        self.finalize_surface(&resolved).await;
        self.notify_submitter(&resolved).await;
        Ok(())
    }

    /// Replace the decision controls with the per-reason-code reject menu.
    async fn show_reason_menu(&self, email: &str, app: &str, mobile: &str) -> Result<()> {
        let Some(activation) = self.find(email, app, mobile).await else {
            return Ok(());
        };
        let Some(message) = activation.review_message_ref else {
            return Ok(());
        };

        let mut rows = Vec::new();
        if app == ANGELONE {
            rows.push(vec![Button::new(
                "✅ Non Trade Approved",
                Action::Reason {
                    code: NON_TRADE_CODE.into(),
                    email: email.into(),
                    app: app.into(),
                    mobile: mobile.into(),
                }
                .encode(),
            )]);
        }
        for (label, code) in REJECT_OPTIONS {
            rows.push(vec![Button::new(
                format!("❌ {label}"),
                Action::Reason {
                    code: (*code).into(),
                    email: email.into(),
                    app: app.into(),
                    mobile: mobile.into(),
                }
                .encode(),
            )]);
        }

        let text = format!("Select rejection reason for {}:", app.to_uppercase());
        if let Err(err) = self
            .notifier
            .edit_message(message, &text, Some(Controls::new(rows)))
            .await
        {
            tracing::warn!(error = %err, "reason menu not shown");
        }
        Ok(())
    }

    /// Edit the review surface to its final state, dropping the controls.
    async fn finalize_surface(&self, resolved: &Activation) {
        let Some(message) = resolved.review_message_ref else {
            return;
        };

        let headline = match resolved.status {
            Status::Approved if resolved.reason == "pending" => "✅ Approved Activation",
            Status::Approved => "✅ Approved with Note",
            _ => "❌ Rejected Activation",
        };
        let mut text = format!(
            "{headline}\n\n📲 App: {}\n📧 Email: {}\n📱 Mobile: {}\n\n🔄 Status: {}",
            resolved.app.to_uppercase(),
            resolved.email,
            resolved.mobile,
            resolved.status,
        );
        if resolved.reason != "pending" {
            text.push_str(&format!("\n📝 Reason: {}", resolved.reason));
        }

        if let Err(err) = self.notifier.edit_message(message, &text, None).await {
            tracing::warn!(error = %err, "review surface not finalized");
        }
    }

    /// Tell the submitting identity how their activation was decided.
    async fn notify_submitter(&self, resolved: &Activation) {
        let Some(user) = self.directory.find(&resolved.email).await else {
            return;
        };
        let Some(channel) = user.channel_id else {
            tracing::debug!(email = resolved.email, "submitter has no bound channel");
            return;
        };

        let text = match resolved.status {
            Status::Approved => format!(
                "✅ Your {} activation for {} was approved!",
                resolved.app.to_uppercase(),
                resolved.mobile,
            ),
            _ => format!(
                "❌ Your {} activation for {} was rejected.\n📝 Reason: {}",
                resolved.app.to_uppercase(),
                resolved.mobile,
                resolved.reason,
            ),
        };
        log_delivery_error(
            self.notifier.send_text(channel, &text, None).await,
            "submitter outcome notification",
        );
    }

    /// Decision controls for a fresh submission.
    fn decision_controls(&self, activation: &Activation) -> Controls {
        let email = activation.email.clone();
        let app = activation.app.clone();
        let mobile = activation.mobile.clone();

        let mut rows = Vec::new();
        if app == ANGELONE {
            rows.push(vec![Button::new(
                "✅ Non Trade Approved",
                Action::Reason {
                    code: NON_TRADE_CODE.into(),
                    email: email.clone(),
                    app: app.clone(),
                    mobile: mobile.clone(),
                }
                .encode(),
            )]);
        }
        rows.push(vec![
            Button::new(
                "✅ Approve",
                Action::Approve {
                    email: email.clone(),
                    app: app.clone(),
                    mobile: mobile.clone(),
                }
                .encode(),
            ),
            Button::new(
                "❌ Reject",
                Action::Reject {
                    email: email.clone(),
                    app: app.clone(),
                    mobile: mobile.clone(),
                }
                .encode(),
            ),
        ]);
        for (label, code) in REJECT_OPTIONS {
            rows.push(vec![Button::new(
                format!("❌ {label}"),
                Action::Reason {
                    code: (*code).into(),
                    email: email.clone(),
                    app: app.clone(),
                    mobile: mobile.clone(),
                }
                .encode(),
            )]);
        }
        Controls::new(rows)
    }

    /// The record under review: the pending match when one exists, else the
    /// most recent one.
    async fn find(&self, email: &str, app: &str, mobile: &str) -> Option<Activation> {
        let filter = Filter {
            email: Some(email.to_owned()),
            app: Some(app.to_owned()),
            mobile: Some(mobile.to_owned()),
        };
        let mut records = self.ledger.list(&filter).await;
        match records.iter().position(|a| a.status == Status::Pending) {
            Some(idx) => Some(records.swap_remove(idx)),
            None => records.pop(),
        }
    }

    async fn alert_operator(&self, text: &str) {
        let Some(operator) = self.config.operator else {
            return;
        };
        log_delivery_error(
            self.notifier.send_text(operator, text, None).await,
            "operator alert",
        );
    }
}
