//! Operator commands: bulk registration, stats, user listing, broadcast
//! and raw exports. Everything here is gated on the single configured
//! operator identity.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Configuration;
use crate::error::Result;
use crate::ledger::ActivationLedger;
use crate::notifier::{ChannelId, Notifier, log_delivery_error};
use crate::report::Reporter;
use crate::session::{Command, Session, SessionState};
use crate::user::UserDirectory;

const LIST_LIMIT: usize = 20;

/// Operator-facing command surface.
pub struct Admin<N> {
    config: Arc<Configuration>,
    directory: UserDirectory,
    ledger: ActivationLedger,
    reporter: Reporter<N>,
    notifier: Arc<N>,
}

// Not derived: that would require `N: Clone` on top of the `Arc`.
impl<N> Clone for Admin<N> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            directory: self.directory.clone(),
            ledger: self.ledger.clone(),
            reporter: self.reporter.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<N: Notifier> Admin<N> {
    /// Create a new [`Admin`] surface.
    pub fn new(
        config: Arc<Configuration>,
        directory: UserDirectory,
        ledger: ActivationLedger,
        reporter: Reporter<N>,
        notifier: Arc<N>,
    ) -> Self {
        Self {
            config,
            directory,
            ledger,
            reporter,
            notifier,
        }
    }

    /// Whether this command is part of the privileged set.
    pub fn is_privileged(command: &Command) -> bool {
        matches!(
            command,
            Command::AddUser
                | Command::Stats
                | Command::ListUsers
                | Command::Broadcast(_)
                | Command::SendReport
                | Command::SendJson
        )
    }

    /// Run one operator command. Non-operator identities are refused
    /// before anything else happens.
    pub async fn handle(
        &self,
        session: &mut Session,
        chat: ChannelId,
        command: &Command,
    ) -> Result<()> {
        if !self.config.is_operator(chat) {
            self.notifier
                .send_text(chat, "❌ This command is for the operator only.", None)
                .await?;
            return Ok(());
        }

        match command {
            Command::AddUser => self.enter_ingest(session, chat).await,
            Command::Stats => self.stats(chat).await,
            Command::ListUsers => self.list_users(chat).await,
            Command::Broadcast(message) => self.broadcast(chat, message).await,
            Command::SendReport => {
                self.reporter.send_reports().await;
                self.notifier
                    .send_text(chat, "📊 Reports sent!", None)
                    .await?;
                Ok(())
            },
            Command::SendJson => self.send_raw_exports(chat).await,
            _ => Ok(()),
        }
    }

    async fn enter_ingest(&self, session: &mut Session, chat: ChannelId) -> Result<()> {
        session.state = SessionState::AdminIngest;
        self.notifier
            .send_text(
                chat,
                "🛠 User Addition Mode\n\nSend user details in this format:\n\nemail@example.com\npassword123\nUser Name\n\nSeparate multiple users with blank lines. /cancel to exit.",
                None,
            )
            .await?;
        Ok(())
    }

    /// Parse a bulk-ingest message: blank-line-separated blocks of
    /// `email\npassword\nname`, one result line each.
    pub async fn ingest(&self, chat: ChannelId, text: &str) -> Result<()> {
        let mut results = Vec::new();

        for entry in text.split("\n\n").filter(|e| !e.trim().is_empty()) {
            let parts: Vec<&str> = entry
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            let [email, password, name @ ..] = parts.as_slice() else {
                results.push(format!("❌ Invalid format: {}", truncate(entry, 30)));
                continue;
            };
            if name.is_empty() {
                results.push(format!("❌ Invalid format: {}", truncate(entry, 30)));
                continue;
            }
            let name = name.join(" ");

            match self.directory.register(email, password, &name, None).await {
                Ok(outcome) => results.push(format!("✅ {}: {email}", outcome.describe())),
                Err(err) => results.push(format!("❌ {err}: {email}")),
            }
        }

        if results.is_empty() {
            results.push("Please provide valid user details".to_owned());
        }
        self.notifier
            .send_text(chat, &results.join("\n"), None)
            .await?;
        Ok(())
    }

    async fn stats(&self, chat: ChannelId) -> Result<()> {
        let users = self.directory.list().await.len();
        let stats = self.ledger.stats().await;

        let mut text = format!(
            "📊 Statistics\n\n👥 Users: {users}\n📱 Total Activations: {}\n⏳ Pending: {}\n✅ Approved: {}\n❌ Rejected: {}\n",
            stats.totals.total, stats.totals.pending, stats.totals.approved, stats.totals.rejected,
        );
        if !stats.per_app.is_empty() {
            text.push_str("\n📲 App-wise:\n");
            for (app, s) in &stats.per_app {
                text.push_str(&format!(
                    "\n{}\n  • Total: {}\n  • Approved: {}\n  • Pending: {}\n  • Rejected: {}\n",
                    app.to_uppercase(),
                    s.total,
                    s.approved,
                    s.pending,
                    s.rejected,
                ));
            }
        }

        self.notifier.send_text(chat, &text, None).await?;
        Ok(())
    }

    async fn list_users(&self, chat: ChannelId) -> Result<()> {
        let users = self.directory.list().await;
        if users.is_empty() {
            self.notifier.send_text(chat, "No users found.", None).await?;
            return Ok(());
        }

        let mut text = "👥 Registered Users\n\n".to_owned();
        for (i, user) in users.iter().take(LIST_LIMIT).enumerate() {
            text.push_str(&format!(
                "{}. {}\n   📧 {}\n   📅 {}\n\n",
                i + 1,
                user.name,
                user.email,
                format_date(user.created_at),
            ));
        }
        if users.len() > LIST_LIMIT {
            text.push_str(&format!(
                "... and {} more users.\nTotal: {} users",
                users.len() - LIST_LIMIT,
                users.len(),
            ));
        }

        self.notifier.send_text(chat, &text, None).await?;
        Ok(())
    }

    /// Deliver `message` to every user with a bound channel; report the
    /// tally back to the operator.
    async fn broadcast(&self, chat: ChannelId, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            self.notifier
                .send_text(
                    chat,
                    "Please provide a message to broadcast.\nUsage: /broadcast Your message here",
                    None,
                )
                .await?;
            return Ok(());
        }

        let users = self.directory.list().await;
        let text = format!("📢 Community Announcement\n\n{message}");
        let mut successful = 0usize;
        let mut failed = 0usize;

        for user in &users {
            let Some(channel) = user.channel_id else {
                continue;
            };
            match self.notifier.send_text(channel, &text, None).await {
                Ok(_) => successful += 1,
                Err(err) => {
                    tracing::warn!(email = user.email, error = %err, "broadcast delivery failed");
                    failed += 1;
                },
            }
        }

        self.notifier
            .send_text(
                chat,
                &format!(
                    "📢 Broadcast Results:\n\n✅ Successful: {successful}\n❌ Failed: {failed}\n\nTotal users: {}",
                    users.len(),
                ),
                None,
            )
            .await?;
        Ok(())
    }

    async fn send_raw_exports(&self, chat: ChannelId) -> Result<()> {
        let users = serde_json::to_vec_pretty(&self.directory.list().await)?;
        log_delivery_error(
            self.notifier
                .send_document(chat, "users.json", &users, "Raw users data")
                .await,
            "raw users export",
        );

        let activations = self.ledger.export().await?;
        log_delivery_error(
            self.notifier
                .send_document(chat, "activations.json", &activations, "Raw activations data")
                .await,
            "raw activations export",
        );
        Ok(())
    }

    /// Help text; the operator section is appended only for the operator.
    pub fn help_text(&self, chat: ChannelId) -> String {
        let mut text = "🤖 Activation Bot Help\n\n\
            /start - Start the bot and log in\n\
            /cancel - Cancel the current operation\n\
            /help - Show this help message\n\n\
            How to use:\n\
            1. Start with /start\n\
            2. Enter your registered email and password\n\
            3. Choose from the menu options\n\
            4. Follow the prompts to submit activation proof\n"
            .to_owned();

        if self.config.is_operator(chat) {
            text.push_str(
                "\nOperator Commands:\n\
                /adduser - Add new users\n\
                /stats - View statistics\n\
                /listusers - List registered users\n\
                /sendreport - Send activity reports\n\
                /sendjson - Send raw data files\n\
                /broadcast - Broadcast a message to users\n",
            );
        }
        text
    }
}

fn truncate(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push_str("...");
    }
    out
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::mock::{MockNotifier, Sent};
    use crate::store::Store;

    const OPERATOR: ChannelId = ChannelId(1);
    const STRANGER: ChannelId = ChannelId(99);

    struct Fixture {
        _dir: tempfile::TempDir,
        admin: Admin<MockNotifier>,
        directory: UserDirectory,
        ledger: ActivationLedger,
        notifier: Arc<MockNotifier>,
    }

    fn fixture() -> Fixture {
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
            Arc::clone(&config),
            directory.clone(),
            ledger.clone(),
            Arc::clone(&notifier),
        );
        let admin = Admin::new(
            Arc::clone(&config),
            directory.clone(),
            ledger.clone(),
            reporter,
            Arc::clone(&notifier),
        );
        Fixture {
            _dir: dir,
            admin,
            directory,
            ledger,
            notifier,
        }
    }

    #[tokio::test]
    async fn non_operator_is_refused() {
        let fixture = fixture();
        let mut session = Session::default();

        fixture
            .admin
            .handle(&mut session, STRANGER, &Command::Stats)
            .await
            .unwrap();

        let texts = fixture.notifier.texts_to(STRANGER);
        assert!(texts[0].contains("operator only"));
        assert_eq!(session.state, SessionState::UnauthenticatedEmail);
    }

    #[tokio::test]
    async fn adduser_enters_ingest_state() {
        let fixture = fixture();
        let mut session = Session::default();

        fixture
            .admin
            .handle(&mut session, OPERATOR, &Command::AddUser)
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::AdminIngest);
    }

    #[tokio::test]
    async fn ingest_parses_multiple_entries() {
        let fixture = fixture();

        fixture
            .admin
            .ingest(
                OPERATOR,
                "a@b.com\npw1\nAda Lovelace\n\nx@y.com\npw2\nXavier\n\nbroken-entry",
            )
            .await
            .unwrap();

        assert_eq!(fixture.directory.list().await.len(), 2);
        let report = fixture.notifier.texts_to(OPERATOR).pop().unwrap();
        assert!(report.contains("✅ User added successfully: a@b.com"));
        assert!(report.contains("✅ User added successfully: x@y.com"));
        assert!(report.contains("❌ Invalid format"));

        let user = fixture.directory.find("a@b.com").await.unwrap();
        assert_eq!(user.name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn ingest_reports_duplicates() {
        let fixture = fixture();
        fixture
            .directory
            .register("a@b.com", "pw", "Ada", Some(ChannelId(5)))
            .await
            .unwrap();

        fixture
            .admin
            .ingest(OPERATOR, "a@b.com\npw\nAda")
            .await
            .unwrap();
        let report = fixture.notifier.texts_to(OPERATOR).pop().unwrap();
        assert!(report.contains("User already exists"));
    }

    #[tokio::test]
    async fn broadcast_skips_unbound_users_and_tallies() {
        let fixture = fixture();
        fixture
            .directory
            .register("bound@b.com", "pw", "B", Some(ChannelId(10)))
            .await
            .unwrap();
        fixture
            .directory
            .register("loose@b.com", "pw", "L", None)
            .await
            .unwrap();

        let mut session = Session::default();
        fixture
            .admin
            .handle(&mut session, OPERATOR, &Command::Broadcast("hello".into()))
            .await
            .unwrap();

        let delivered = fixture.notifier.texts_to(ChannelId(10));
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].contains("hello"));

        let tally = fixture.notifier.texts_to(OPERATOR).pop().unwrap();
        assert!(tally.contains("Successful: 1"));
        assert!(tally.contains("Total users: 2"));
    }

    #[tokio::test]
    async fn stats_cover_users_and_apps() {
        let fixture = fixture();
        fixture
            .directory
            .register("a@b.com", "pw", "Ada", None)
            .await
            .unwrap();
        fixture
            .ledger
            .submit("a@b.com", "upstox", "9876543210")
            .await
            .unwrap();

        let mut session = Session::default();
        fixture
            .admin
            .handle(&mut session, OPERATOR, &Command::Stats)
            .await
            .unwrap();

        let text = fixture.notifier.texts_to(OPERATOR).pop().unwrap();
        assert!(text.contains("Users: 1"));
        assert!(text.contains("Total Activations: 1"));
        assert!(text.contains("UPSTOX"));
    }

    #[tokio::test]
    async fn raw_export_sends_both_collections() {
        let fixture = fixture();
        let mut session = Session::default();

        fixture
            .admin
            .handle(&mut session, OPERATOR, &Command::SendJson)
            .await
            .unwrap();

        let docs: Vec<_> = fixture
            .notifier
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Document { filename, .. } => Some(filename),
                _ => None,
            })
            .collect();
        assert_eq!(docs, vec!["users.json", "activations.json"]);
    }

    #[tokio::test]
    async fn cloned_admin_shares_directory_state() {
        let fixture = fixture();
        fixture
            .admin
            .clone()
            .ingest(OPERATOR, "a@b.com\npw\nAda")
            .await
            .unwrap();
        assert_eq!(fixture.directory.list().await.len(), 1);
    }

    #[tokio::test]
    async fn help_appends_operator_section_only_for_operator() {
        let fixture = fixture();
        assert!(fixture.admin.help_text(OPERATOR).contains("/adduser"));
        assert!(!fixture.admin.help_text(STRANGER).contains("/adduser"));
    }
}
