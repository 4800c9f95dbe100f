//! CSV report assembly and periodic delivery to the operator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::Configuration;
use crate::ledger::{Activation, ActivationLedger, Filter};
use crate::notifier::{ChannelId, Notifier, log_delivery_error};
use crate::user::{User, UserDirectory};

/// Build the user report: one row per registered user.
pub fn user_report(users: &[User]) -> String {
    let mut csv = String::from("Email,Name,Join Date,Chat ID\n");
    for user in users {
        let channel = user
            .channel_id
            .map(|c| c.to_string())
            .unwrap_or_else(|| "N/A".to_owned());
        csv.push_str(&format!(
            "{},{},{},{}\n",
            user.email,
            user.name,
            user.created_at.format("%Y-%m-%d %H:%M"),
            channel,
        ));
    }
    csv
}

/// Build the activation report: one row per ledger record, in insertion
/// order.
pub fn activation_report(activations: &[Activation]) -> String {
    let mut csv = String::from("Email,Mobile,App,Status,Reason,Submission Date\n");
    for activation in activations {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            activation.email,
            activation.mobile,
            activation.app,
            activation.status,
            activation.reason,
            activation.submission_date,
        ));
    }
    csv
}

/// Assembles reports and ships them to the operator, either on demand or
/// on the configured interval.
pub struct Reporter<N> {
    config: Arc<Configuration>,
    directory: UserDirectory,
    ledger: ActivationLedger,
    notifier: Arc<N>,
}

// Not derived: that would require `N: Clone` on top of the `Arc`.
impl<N> Clone for Reporter<N> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            directory: self.directory.clone(),
            ledger: self.ledger.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<N: Notifier> Reporter<N> {
    /// Create a new [`Reporter`].
    pub fn new(
        config: Arc<Configuration>,
        directory: UserDirectory,
        ledger: ActivationLedger,
        notifier: Arc<N>,
    ) -> Self {
        Self {
            config,
            directory,
            ledger,
            notifier,
        }
    }

    /// Send both CSV reports to the operator now. Delivery failures are
    /// logged; the reports hold only read snapshots, nothing to roll back.
    pub async fn send_reports(&self) {
        let Some(operator) = self.config.operator else {
            tracing::warn!("no operator configured, reports not sent");
            return;
        };

        let stamp = Utc::now().format("%Y%m%d_%H%M");
        let users = self.directory.list().await;
        self.send_csv(
            operator,
            &format!("users_report_{stamp}.csv"),
            user_report(&users),
            "📊 User Report",
        )
        .await;

        let activations = self.ledger.list(&Filter::default()).await;
        self.send_csv(
            operator,
            &format!("activations_report_{stamp}.csv"),
            activation_report(&activations),
            "📊 Activations Report",
        )
        .await;
    }

    async fn send_csv(&self, operator: ChannelId, filename: &str, csv: String, caption: &str) {
        log_delivery_error(
            self.notifier
                .send_document(operator, filename, csv.as_bytes(), caption)
                .await,
            "report delivery",
        );
    }

    /// Periodic delivery loop: runs until the task is dropped, reading the
    /// ledger without ever blocking interactive processing.
    pub async fn run_scheduler(self) {
        let period = Duration::from_secs(self.config.report_interval_hours * 3600);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            tracing::debug!("scheduled report run");
            self.send_reports().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::mock::{MockNotifier, Sent};
    use crate::store::Store;

    const OPERATOR: ChannelId = ChannelId(1);

    fn reporter() -> (
        tempfile::TempDir,
        Reporter<MockNotifier>,
        UserDirectory,
        ActivationLedger,
        Arc<MockNotifier>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let config = Arc::new(Configuration {
            operator: Some(OPERATOR),
            ..Default::default()
        });
        let directory = UserDirectory::new(Arc::clone(&store));
        let ledger = ActivationLedger::new(Arc::clone(&store));
        let notifier = Arc::new(MockNotifier::new());
        let reporter = Reporter::new(
            config,
            directory.clone(),
            ledger.clone(),
            Arc::clone(&notifier),
        );
        (dir, reporter, directory, ledger, notifier)
    }

    #[test]
    fn user_report_has_fixed_header_and_rows() {
        let mut user = User::new("a@b.com", "pw", "Ada");
        user.channel_id = Some(ChannelId(7));
        let csv = user_report(&[user, User::new("x@y.com", "pw", "X")]);

        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Email,Name,Join Date,Chat ID"));
        let first = lines.next().unwrap();
        assert!(first.starts_with("a@b.com,Ada,"));
        assert!(first.ends_with(",7"));
        let second = lines.next().unwrap();
        assert!(second.ends_with(",N/A"));
    }

    #[tokio::test]
    async fn activation_report_lists_ledger_rows() {
        let (_dir, _reporter, _directory, ledger, _notifier) = reporter();
        ledger
            .submit("a@b.com", "upstox", "9876543210")
            .await
            .unwrap();

        let csv = activation_report(&ledger.list(&Filter::default()).await);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Email,Mobile,App,Status,Reason,Submission Date")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("a@b.com,9876543210,upstox,pending,pending,"));
    }

    #[tokio::test]
    async fn send_reports_delivers_both_documents() {
        let (_dir, reporter, directory, ledger, notifier) = reporter();
        directory
            .register("a@b.com", "pw", "Ada", None)
            .await
            .unwrap();
        ledger
            .submit("a@b.com", "upstox", "9876543210")
            .await
            .unwrap();

        reporter.send_reports().await;

        let docs: Vec<_> = notifier
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Document {
                    identity, filename, ..
                } => Some((identity, filename)),
                _ => None,
            })
            .collect();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].1.starts_with("users_report_"));
        assert!(docs[1].1.starts_with("activations_report_"));
        assert!(docs.iter().all(|(identity, _)| *identity == OPERATOR));
    }
}
