//! Per-state transition logic of the conversation.

use std::sync::{Arc, LazyLock};

use regex_lite::Regex;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::ledger::ActivationLedger;
use crate::ledger::Filter;
use crate::notifier::{Button, ChannelId, Controls, MediaKind, MediaRef, Notifier};
use crate::review::ReviewProtocol;
use crate::session::{Action, Incoming, Session, SessionState};
use crate::user::UserDirectory;

static MOBILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{10}$").expect("mobile regex"));

/// Drives one session through the conversation states, validating input at
/// each step and calling into the directory, the ledger and the review
/// protocol.
pub struct SessionMachine<N> {
    config: Arc<Configuration>,
    directory: UserDirectory,
    ledger: ActivationLedger,
    review: ReviewProtocol<N>,
    notifier: Arc<N>,
}

// Not derived: that would require `N: Clone` on top of the `Arc`.
impl<N> Clone for SessionMachine<N> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            directory: self.directory.clone(),
            ledger: self.ledger.clone(),
            review: self.review.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<N: Notifier> SessionMachine<N> {
    /// Create a new [`SessionMachine`].
    pub fn new(
        config: Arc<Configuration>,
        directory: UserDirectory,
        ledger: ActivationLedger,
        review: ReviewProtocol<N>,
        notifier: Arc<N>,
    ) -> Self {
        Self {
            config,
            directory,
            ledger,
            review,
            notifier,
        }
    }

    /// Handle one inbound payload for `session`. Validation failures keep
    /// the session in place and re-prompt; they are not surfaced as errors.
    pub async fn handle(
        &self,
        session: &mut Session,
        chat: ChannelId,
        payload: Incoming,
    ) -> Result<()> {
        match payload {
            Incoming::Command(_) => Ok(()), // commands are routed by the dispatcher
            Incoming::Text(text) => self.on_text(session, chat, &text).await,
            Incoming::Media { media, caption } => {
                self.on_media(session, chat, &media, caption.as_deref()).await
            },
            Incoming::Action(action) => self.on_action(session, chat, &action).await,
        }
    }

    /// Entry point: reset and ask for the email address.
    pub async fn start(&self, session: &mut Session, chat: ChannelId) -> Result<()> {
        session.reset();
        let greeting = format!(
            "🌟 Welcome to {} Activation Bot! 🌟\n\nPlease enter your registered email address:",
            self.config.name,
        );
        self.notifier.send_text(chat, &greeting, None).await?;
        Ok(())
    }

    /// Unconditional cancel: discard in-progress data, fresh session.
    pub async fn cancel(&self, session: &mut Session, chat: ChannelId) -> Result<()> {
        session.reset();
        self.notifier
            .send_text(chat, "🚫 Operation cancelled. Send /start to begin again.", None)
            .await?;
        Ok(())
    }

    async fn on_text(&self, session: &mut Session, chat: ChannelId, text: &str) -> Result<()> {
        match session.state {
            SessionState::UnauthenticatedEmail => self.email_input(session, chat, text).await,
            SessionState::UnauthenticatedPassword => {
                self.password_input(session, chat, text).await
            },
            SessionState::AwaitingProof => {
                self.notifier
                    .send_text(
                        chat,
                        "❌ Please send your proof as a media attachment with the mobile number in the caption.",
                        None,
                    )
                    .await?;
                Ok(())
            },
            // AdminIngest text is consumed by the dispatcher; free text in
            // the menu states is ignored.
            _ => Ok(()),
        }
    }

    async fn email_input(&self, session: &mut Session, chat: ChannelId, text: &str) -> Result<()> {
        match UserDirectory::normalize_email(text) {
            Ok(email) => {
                session.pending_email = Some(email);
                session.state = SessionState::UnauthenticatedPassword;
                self.notifier
                    .send_text(chat, "🔒 Please enter your password:", None)
                    .await?;
            },
            Err(_) => {
                self.notifier
                    .send_text(
                        chat,
                        "❌ Invalid email format. Please enter a valid email address:",
                        None,
                    )
                    .await?;
            },
        }
        Ok(())
    }

    async fn password_input(
        &self,
        session: &mut Session,
        chat: ChannelId,
        password: &str,
    ) -> Result<()> {
        let email = session.pending_email.clone().unwrap_or_default();

        match self.directory.authenticate(&email, password.trim(), chat).await {
            Ok(user) => {
                session.email = Some(user.email);
                session.name = Some(user.name);
                self.notifier
                    .send_text(
                        chat,
                        "✅ Login successful! 🎉\n\nYou can now access all features.",
                        None,
                    )
                    .await?;
                self.main_menu(session, chat).await
            },
            Err(Error::Auth | Error::Validation(_)) => {
                // Full restart of credential entry, not just the password.
                session.pending_email = None;
                session.state = SessionState::UnauthenticatedEmail;
                self.notifier
                    .send_text(
                        chat,
                        "❌ Invalid email or password.\n\nPlease enter your email address again:",
                        None,
                    )
                    .await?;
                Ok(())
            },
            Err(err) => Err(err),
        }
    }

    async fn on_action(
        &self,
        session: &mut Session,
        chat: ChannelId,
        action: &Action,
    ) -> Result<()> {
        // Review actions never belong to a user session.
        if action.is_review() {
            return Ok(());
        }
        // Everything below requires an authenticated session.
        if session.email.is_none() {
            return Ok(());
        }

        match (session.state, action) {
            (_, Action::Back) => self.main_menu(session, chat).await,
            (SessionState::MainMenu, Action::Status) => self.activation_status(session, chat).await,
            (SessionState::MainMenu, Action::Proof) => self.app_selection(session, chat).await,
            (SessionState::MainMenu, Action::Guide) => {
                self.show_page(chat, "📖 Guide", self.config.guide()).await
            },
            (SessionState::MainMenu, Action::Rules) => {
                self.show_page(chat, "📜 Rules", self.config.rules()).await
            },
            (SessionState::MainMenu, Action::SameApp) => {
                match session.selected_app.clone() {
                    Some(app) => self.prompt_proof(session, chat, &app).await,
                    None => self.app_selection(session, chat).await,
                }
            },
            (SessionState::AppSelection, Action::SelectApp(app)) => {
                if self.config.apps.iter().any(|a| a == app) {
                    self.prompt_proof(session, chat, &app.clone()).await
                } else {
                    tracing::debug!(app, "unknown app selected, ignoring");
                    Ok(())
                }
            },
            _ => Ok(()),
        }
    }

    /// Render the main menu and land in `MainMenu`.
    pub async fn main_menu(&self, session: &mut Session, chat: ChannelId) -> Result<()> {
        let name = session.name.as_deref().unwrap_or("User");
        let email = session.email.as_deref().unwrap_or_default();

        let controls = Controls::new(vec![
            vec![Button::new("📊 My Activation Status", Action::Status.encode())],
            vec![Button::new("📤 Send Activation Proof", Action::Proof.encode())],
            vec![Button::new("📖 How To Work Guide", Action::Guide.encode())],
            vec![Button::new("📜 Activation Rules", Action::Rules.encode())],
        ]);
        self.notifier
            .send_text(
                chat,
                &format!("👋 Hello {name}! ({email})\n\n🔹 Main Menu - Please select an option:"),
                Some(controls),
            )
            .await?;
        session.state = SessionState::MainMenu;
        Ok(())
    }

    async fn activation_status(&self, session: &mut Session, chat: ChannelId) -> Result<()> {
        let email = session.email.clone().unwrap_or_default();
        let activations = self.ledger.list(&Filter::by_email(&email)).await;

        let text = if activations.is_empty() {
            "ℹ️ No activations found. Submit your first activation proof!".to_owned()
        } else {
            let mut text = "📊 Your Activation Status:\n\n".to_owned();
            for activation in &activations {
                let emoji = match activation.status {
                    crate::ledger::Status::Approved => "✅",
                    crate::ledger::Status::Rejected => "❌",
                    crate::ledger::Status::Pending => "⏳",
                };
                let date = activation
                    .submission_date
                    .split_whitespace()
                    .next()
                    .unwrap_or_default();
                text.push_str(&format!(
                    "{emoji} {}\n📱 Mobile: {}\n🔄 Status: {}\n📝 Reason: {}\n📅 Date: {date}\n\n",
                    activation.app.to_uppercase(),
                    activation.mobile,
                    activation.status,
                    activation.reason,
                ));
            }
            text
        };

        self.notifier
            .send_text(chat, &text, Some(Controls::back()))
            .await?;
        Ok(())
    }

    async fn app_selection(&self, session: &mut Session, chat: ChannelId) -> Result<()> {
        if self.config.apps.is_empty() {
            self.notifier
                .send_text(
                    chat,
                    "⚠️ No apps available for activation.",
                    Some(Controls::back()),
                )
                .await?;
            return Ok(());
        }

        let mut rows: Vec<Vec<Button>> = self
            .config
            .apps
            .iter()
            .map(|app| {
                vec![Button::new(
                    app.to_uppercase(),
                    Action::SelectApp(app.clone()).encode(),
                )]
            })
            .collect();
        rows.push(vec![Button::new("🔙 Back", Action::Back.encode())]);

        self.notifier
            .send_text(
                chat,
                "📲 Select application for activation:",
                Some(Controls::new(rows)),
            )
            .await?;
        session.state = SessionState::AppSelection;
        Ok(())
    }

    async fn prompt_proof(&self, session: &mut Session, chat: ChannelId, app: &str) -> Result<()> {
        session.selected_app = Some(app.to_owned());
        let media_kind = if self.config.allows_screenshot(app) {
            "screenshot or video"
        } else {
            "video"
        };
        self.notifier
            .send_text(
                chat,
                &format!(
                    "📤 Send proof for {}\n\nPlease send a {media_kind} with the mobile number in the caption.\nExample: 9876543210 (10 digits only, no spaces)",
                    app.to_uppercase(),
                ),
                None,
            )
            .await?;
        session.state = SessionState::AwaitingProof;
        Ok(())
    }

    async fn on_media(
        &self,
        session: &mut Session,
        chat: ChannelId,
        media: &MediaRef,
        caption: Option<&str>,
    ) -> Result<()> {
        if session.state != SessionState::AwaitingProof {
            return Ok(());
        }
        let (Some(email), Some(app)) = (session.email.clone(), session.selected_app.clone())
        else {
            return Ok(());
        };

        // (a) media kind must match the app's requirement.
        if media.kind == MediaKind::Photo && !self.config.allows_screenshot(&app) {
            self.notifier
                .send_text(
                    chat,
                    &format!("❌ Please send a video for {}", app.to_uppercase()),
                    None,
                )
                .await?;
            return Ok(());
        }

        // (b) caption must be exactly 10 digits.
        let Some(caption) = caption.map(str::trim).filter(|c| !c.is_empty()) else {
            self.notifier
                .send_text(chat, "❌ Please include the mobile number in the caption", None)
                .await?;
            return Ok(());
        };
        if !MOBILE_RE.is_match(caption) {
            self.notifier
                .send_text(
                    chat,
                    "❌ Invalid mobile number\n\nMust be 10 digits without spaces.\nExample: 9876543210",
                    None,
                )
                .await?;
            return Ok(());
        }

        // (c) duplicate check and insert, atomically.
        match self.ledger.submit(&email, &app, caption).await {
            Ok(activation) => {
                self.review.present_for_review(&activation, media).await;

                let controls = Controls::new(vec![
                    vec![Button::new("📤 Send Another (Same App)", Action::SameApp.encode())],
                    vec![Button::new("📲 Select Another App", Action::Proof.encode())],
                    vec![Button::new("🏠 Main Menu", Action::Back.encode())],
                ]);
                self.notifier
                    .send_text(
                        chat,
                        "✅ Activation submitted successfully!\n\nYou can check your status anytime in the main menu.",
                        Some(controls),
                    )
                    .await?;
                session.state = SessionState::MainMenu;
                Ok(())
            },
            Err(Error::Duplicate { app, .. }) => {
                let controls = Controls::new(vec![
                    vec![Button::new("🔄 Try Different App", Action::Proof.encode())],
                    vec![Button::new("🏠 Main Menu", Action::Back.encode())],
                ]);
                self.notifier
                    .send_text(
                        chat,
                        &format!(
                            "❌ Duplicate Activation\n\nThis mobile number is already used for {}",
                            app.to_uppercase(),
                        ),
                        Some(controls),
                    )
                    .await?;
                session.state = SessionState::MainMenu;
                Ok(())
            },
            Err(err) => Err(err),
        }
    }

    async fn show_page(&self, chat: ChannelId, title: &str, body: &str) -> Result<()> {
        self.notifier
            .send_text(chat, &format!("{title}\n\n{body}"), Some(Controls::back()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Status;
    use crate::notifier::mock::{MockNotifier, Sent};
    use crate::store::Store;

    const OPERATOR: ChannelId = ChannelId(1);
    const CHANNEL: ChannelId = ChannelId(-100);
    const USER_CHAT: ChannelId = ChannelId(7);

    struct Fixture {
        _dir: tempfile::TempDir,
        machine: SessionMachine<MockNotifier>,
        ledger: ActivationLedger,
        notifier: Arc<MockNotifier>,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let config = Arc::new(Configuration {
            operator: Some(OPERATOR),
            review_channel: Some(CHANNEL),
            apps: vec![
                "paytmmoney".into(),
                "angelone".into(),
                "lemonn".into(),
                "mstock".into(),
                "upstox".into(),
            ],
            screenshot_apps: vec!["mstock".into(), "angelone".into()],
            ..Default::default()
        });
        let directory = UserDirectory::new(Arc::clone(&store));
        let ledger = ActivationLedger::new(Arc::clone(&store));
        let notifier = Arc::new(MockNotifier::new());
        let review = ReviewProtocol::new(
            Arc::clone(&config),
            ledger.clone(),
            directory.clone(),
            Arc::clone(&notifier),
        );
        let machine = SessionMachine::new(
            config,
            directory.clone(),
            ledger.clone(),
            review,
            Arc::clone(&notifier),
        );
        directory
            .register("a@b.com", "secret", "Ada", None)
            .await
            .unwrap();
        Fixture {
            _dir: dir,
            machine,
            ledger,
            notifier,
            session: Session::default(),
        }
    }

    async fn login(fixture: &mut Fixture) {
        let session = &mut fixture.session;
        fixture.machine.start(session, USER_CHAT).await.unwrap();
        fixture
            .machine
            .handle(session, USER_CHAT, Incoming::Text("a@b.com".into()))
            .await
            .unwrap();
        fixture
            .machine
            .handle(session, USER_CHAT, Incoming::Text("secret".into()))
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::MainMenu);
    }

    async fn select_app(fixture: &mut Fixture, app: &str) {
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Action(Action::Proof),
            )
            .await
            .unwrap();
        assert_eq!(fixture.session.state, SessionState::AppSelection);
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Action(Action::SelectApp(app.into())),
            )
            .await
            .unwrap();
        assert_eq!(fixture.session.state, SessionState::AwaitingProof);
    }

    fn media(kind: MediaKind, caption: &str) -> Incoming {
        Incoming::Media {
            media: MediaRef {
                kind,
                file_id: "file-1".into(),
            },
            caption: Some(caption.into()),
        }
    }

    #[tokio::test]
    async fn invalid_email_re_prompts_in_place() {
        let mut fixture = fixture().await;
        fixture
            .machine
            .start(&mut fixture.session, USER_CHAT)
            .await
            .unwrap();

        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Text("not-an-email".into()),
            )
            .await
            .unwrap();
        assert_eq!(fixture.session.state, SessionState::UnauthenticatedEmail);

        let texts = fixture.notifier.texts_to(USER_CHAT);
        assert!(texts.last().unwrap().contains("Invalid email format"));
    }

    #[tokio::test]
    async fn wrong_password_restarts_credential_entry() {
        let mut fixture = fixture().await;
        fixture
            .machine
            .start(&mut fixture.session, USER_CHAT)
            .await
            .unwrap();
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Text("a@b.com".into()),
            )
            .await
            .unwrap();
        assert_eq!(
            fixture.session.state,
            SessionState::UnauthenticatedPassword
        );

        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Text("wrong".into()),
            )
            .await
            .unwrap();
        // Back to the email step, not a password retry.
        assert_eq!(fixture.session.state, SessionState::UnauthenticatedEmail);
        assert!(fixture.session.pending_email.is_none());
    }

    #[tokio::test]
    async fn case_insensitive_login_reaches_main_menu() {
        let mut fixture = fixture().await;
        fixture
            .machine
            .start(&mut fixture.session, USER_CHAT)
            .await
            .unwrap();
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Text("A@B.com".into()),
            )
            .await
            .unwrap();
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Text("secret".into()),
            )
            .await
            .unwrap();

        assert_eq!(fixture.session.state, SessionState::MainMenu);
        assert_eq!(fixture.session.email.as_deref(), Some("a@b.com"));
    }

    #[tokio::test]
    async fn nine_digit_caption_rejected_without_ledger_call() {
        let mut fixture = fixture().await;
        login(&mut fixture).await;
        select_app(&mut fixture, "upstox").await;

        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                media(MediaKind::Video, "987654321"),
            )
            .await
            .unwrap();

        assert_eq!(fixture.session.state, SessionState::AwaitingProof);
        assert!(fixture.ledger.list(&Filter::default()).await.is_empty());
        let texts = fixture.notifier.texts_to(USER_CHAT);
        assert!(texts.last().unwrap().contains("Invalid mobile number"));
    }

    #[tokio::test]
    async fn photo_rejected_for_video_only_app() {
        let mut fixture = fixture().await;
        login(&mut fixture).await;
        select_app(&mut fixture, "upstox").await;

        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                media(MediaKind::Photo, "9876543210"),
            )
            .await
            .unwrap();

        assert_eq!(fixture.session.state, SessionState::AwaitingProof);
        assert!(fixture.ledger.list(&Filter::default()).await.is_empty());
        let texts = fixture.notifier.texts_to(USER_CHAT);
        assert!(texts.last().unwrap().contains("send a video"));
    }

    #[tokio::test]
    async fn photo_accepted_for_screenshot_app() {
        let mut fixture = fixture().await;
        login(&mut fixture).await;
        select_app(&mut fixture, "mstock").await;

        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                media(MediaKind::Photo, "9876543210"),
            )
            .await
            .unwrap();

        assert_eq!(fixture.session.state, SessionState::MainMenu);
        let records = fixture.ledger.list(&Filter::default()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, Status::Pending);
    }

    #[tokio::test]
    async fn successful_submission_reaches_review_channel() {
        let mut fixture = fixture().await;
        login(&mut fixture).await;
        select_app(&mut fixture, "upstox").await;

        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                media(MediaKind::Video, "9876543210"),
            )
            .await
            .unwrap();

        assert_eq!(fixture.session.state, SessionState::MainMenu);
        // Review surface delivered to the channel.
        assert!(fixture.notifier.sent().iter().any(|s| matches!(
            s,
            Sent::Media { identity, .. } if *identity == CHANNEL
        )));
        // Stored record carries the review ref.
        let records = fixture.ledger.list(&Filter::default()).await;
        assert!(records[0].review_message_ref.is_some());
        // The success message offers the same-app shortcut.
        let Some(Sent::Text { controls, .. }) = fixture
            .notifier
            .sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Text { identity, .. } if *identity == USER_CHAT))
            .next_back()
        else {
            panic!("expected a success text");
        };
        let rows = &controls.unwrap().rows;
        assert_eq!(rows[0][0].data, Action::SameApp.encode());
    }

    #[tokio::test]
    async fn duplicate_submission_offers_alternate_paths() {
        let mut fixture = fixture().await;
        login(&mut fixture).await;
        select_app(&mut fixture, "upstox").await;
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                media(MediaKind::Video, "9876543210"),
            )
            .await
            .unwrap();

        // Same pair again, via the same-app shortcut.
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Action(Action::SameApp),
            )
            .await
            .unwrap();
        assert_eq!(fixture.session.state, SessionState::AwaitingProof);
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                media(MediaKind::Video, "9876543210"),
            )
            .await
            .unwrap();

        assert_eq!(fixture.session.state, SessionState::MainMenu);
        assert_eq!(fixture.ledger.list(&Filter::default()).await.len(), 1);
        let texts = fixture.notifier.texts_to(USER_CHAT);
        assert!(texts.last().unwrap().contains("Duplicate Activation"));
    }

    #[tokio::test]
    async fn cancel_resets_from_any_state() {
        let mut fixture = fixture().await;
        login(&mut fixture).await;
        select_app(&mut fixture, "upstox").await;

        fixture
            .machine
            .cancel(&mut fixture.session, USER_CHAT)
            .await
            .unwrap();
        assert_eq!(fixture.session.state, SessionState::UnauthenticatedEmail);
        assert!(fixture.session.email.is_none());
        assert!(fixture.session.selected_app.is_none());
    }

    #[tokio::test]
    async fn unauthenticated_actions_are_ignored() {
        let mut fixture = fixture().await;
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Action(Action::Proof),
            )
            .await
            .unwrap();
        assert_eq!(fixture.session.state, SessionState::UnauthenticatedEmail);
        assert!(fixture.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn cloned_machine_shares_ledger_state() {
        let mut fixture = fixture().await;
        let clone = fixture.machine.clone();
        login(&mut fixture).await;
        select_app(&mut fixture, "upstox").await;

        clone
            .handle(
                &mut fixture.session,
                USER_CHAT,
                media(MediaKind::Video, "9876543210"),
            )
            .await
            .unwrap();
        assert_eq!(fixture.ledger.list(&Filter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn status_lists_submissions() {
        let mut fixture = fixture().await;
        login(&mut fixture).await;
        select_app(&mut fixture, "upstox").await;
        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                media(MediaKind::Video, "9876543210"),
            )
            .await
            .unwrap();

        fixture
            .machine
            .handle(
                &mut fixture.session,
                USER_CHAT,
                Incoming::Action(Action::Status),
            )
            .await
            .unwrap();
        let texts = fixture.notifier.texts_to(USER_CHAT);
        let status = texts.last().unwrap();
        assert!(status.contains("UPSTOX"));
        assert!(status.contains("9876543210"));
        assert!(status.contains("pending"));
    }
}
