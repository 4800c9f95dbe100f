mod machine;

pub use machine::*;

use crate::notifier::{ChannelId, MediaRef};

/// Conversation step a chat session is currently in.
///
/// `UnauthenticatedEmail → UnauthenticatedPassword → MainMenu →
/// {AppSelection → AwaitingProof} → MainMenu`, with `AdminIngest` reachable
/// only by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    UnauthenticatedEmail,
    UnauthenticatedPassword,
    MainMenu,
    AppSelection,
    AwaitingProof,
    AdminIngest,
}

/// Ephemeral per-chat conversation state. Never persisted; a process
/// restart logs every session out.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub state: SessionState,
    /// Email typed during credential entry, pending the password step.
    pub pending_email: Option<String>,
    /// Set once authentication succeeds.
    pub email: Option<String>,
    pub name: Option<String>,
    pub selected_app: Option<String>,
}

impl Session {
    /// Discard all in-progress data and return to fresh unauthenticated
    /// state.
    pub fn reset(&mut self) {
        *self = Session::default();
    }

    pub fn authenticated_email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

/// Slash-command set understood by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
    Help,
    /// Operator: enter bulk-registration mode.
    AddUser,
    /// Operator: aggregate counts.
    Stats,
    /// Operator: list registered users.
    ListUsers,
    /// Operator: message every user with a bound channel.
    Broadcast(String),
    /// Operator: push CSV reports now.
    SendReport,
    /// Operator: raw collection export.
    SendJson,
}

/// One inbound payload from a chat identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Command(Command),
    Text(String),
    Media {
        media: MediaRef,
        caption: Option<String>,
    },
    Action(Action),
}

/// A full inbound event as handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub from: ChannelId,
    pub payload: Incoming,
}

/// Tappable control actions, round-tripped through opaque callback strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Show the caller's activation records.
    Status,
    /// Start a submission: pick an app.
    Proof,
    Guide,
    Rules,
    Back,
    /// Shortcut: submit again for the previously selected app.
    SameApp,
    SelectApp(String),
    Approve {
        email: String,
        app: String,
        mobile: String,
    },
    /// Opens the reason menu; the ledger is only touched by `Reason`.
    Reject {
        email: String,
        app: String,
        mobile: String,
    },
    Reason {
        code: String,
        email: String,
        app: String,
        mobile: String,
    },
}

impl Action {
    /// Whether this action belongs to the operator review surface.
    pub fn is_review(&self) -> bool {
        matches!(
            self,
            Action::Approve { .. } | Action::Reject { .. } | Action::Reason { .. }
        )
    }

    /// Encode into callback data.
    pub fn encode(&self) -> String {
        match self {
            Action::Status => "status".into(),
            Action::Proof => "proof".into(),
            Action::Guide => "guide".into(),
            Action::Rules => "rules".into(),
            Action::Back => "back".into(),
            Action::SameApp => "same_app".into(),
            Action::SelectApp(app) => format!("app_{app}"),
            Action::Approve { email, app, mobile } => {
                format!("approve_{email}_{app}_{mobile}")
            },
            Action::Reject { email, app, mobile } => {
                format!("reject_{email}_{app}_{mobile}")
            },
            Action::Reason {
                code,
                email,
                app,
                mobile,
            } => format!("reason_{code}_{email}_{app}_{mobile}"),
        }
    }

    /// Decode callback data. Review payloads are split from the right since
    /// emails may themselves contain underscores; app identifiers and
    /// mobiles never do.
    pub fn decode(data: &str) -> Option<Action> {
        match data {
            "status" => return Some(Action::Status),
            "proof" => return Some(Action::Proof),
            "guide" => return Some(Action::Guide),
            "rules" => return Some(Action::Rules),
            "back" => return Some(Action::Back),
            "same_app" => return Some(Action::SameApp),
            _ => {},
        }

        if let Some(app) = data.strip_prefix("app_") {
            return Some(Action::SelectApp(app.to_owned()));
        }
        if let Some(rest) = data.strip_prefix("approve_") {
            let (email, app, mobile) = split_review_payload(rest)?;
            return Some(Action::Approve { email, app, mobile });
        }
        if let Some(rest) = data.strip_prefix("reject_") {
            let (email, app, mobile) = split_review_payload(rest)?;
            return Some(Action::Reject { email, app, mobile });
        }
        if let Some(rest) = data.strip_prefix("reason_") {
            let (code, rest) = rest.split_once('_')?;
            let (email, app, mobile) = split_review_payload(rest)?;
            return Some(Action::Reason {
                code: code.to_owned(),
                email,
                app,
                mobile,
            });
        }
        None
    }
}

fn split_review_payload(rest: &str) -> Option<(String, String, String)> {
    let (rest, mobile) = rest.rsplit_once('_')?;
    let (email, app) = rest.rsplit_once('_')?;
    if email.is_empty() || app.is_empty() || mobile.is_empty() {
        return None;
    }
    Some((email.to_owned(), app.to_owned(), mobile.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_actions_round_trip() {
        for action in [
            Action::Status,
            Action::Proof,
            Action::Guide,
            Action::Rules,
            Action::Back,
            Action::SameApp,
            Action::SelectApp("upstox".into()),
        ] {
            assert_eq!(Action::decode(&action.encode()), Some(action));
        }
    }

    #[test]
    fn review_payload_survives_underscored_email() {
        let action = Action::Reason {
            code: "77".into(),
            email: "first_last@b.com".into(),
            app: "upstox".into(),
            mobile: "9876543210".into(),
        };
        assert_eq!(Action::decode(&action.encode()), Some(action));

        let action = Action::Approve {
            email: "first_last@b.com".into(),
            app: "angelone".into(),
            mobile: "9876543210".into(),
        };
        assert_eq!(Action::decode(&action.encode()), Some(action));
    }

    #[test]
    fn garbage_does_not_decode() {
        assert_eq!(Action::decode("nonsense"), None);
        assert_eq!(Action::decode("approve_only-two_parts"), None);
        assert_eq!(Action::decode(""), None);
    }

    #[test]
    fn review_actions_are_flagged() {
        assert!(
            Action::Approve {
                email: "a@b.com".into(),
                app: "upstox".into(),
                mobile: "9876543210".into()
            }
            .is_review()
        );
        assert!(!Action::Status.is_review());
    }

    #[test]
    fn reset_discards_progress() {
        let mut session = Session {
            state: SessionState::AwaitingProof,
            pending_email: Some("a@b.com".into()),
            email: Some("a@b.com".into()),
            name: Some("Ada".into()),
            selected_app: Some("upstox".into()),
        };
        session.reset();
        assert_eq!(session.state, SessionState::UnauthenticatedEmail);
        assert!(session.email.is_none());
        assert!(session.selected_app.is_none());
    }
}
