//! Inbound event dispatch.
//!
//! One worker task per chat identity, fed by its own queue: events for a
//! given identity apply exactly once, in arrival order, while different
//! identities proceed concurrently. The worker owns the identity's
//! [`Session`]; nothing else ever touches it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::Admin;
use crate::config::Configuration;
use crate::error::Result;
use crate::notifier::{ChannelId, Notifier};
use crate::review::ReviewProtocol;
use crate::session::{Command, Incoming, InboundEvent, Session, SessionMachine, SessionState};

const WORKER_QUEUE: usize = 32;

/// Routes one inbound payload to the right component.
pub struct Router<N> {
    config: Arc<Configuration>,
    machine: SessionMachine<N>,
    review: ReviewProtocol<N>,
    admin: Admin<N>,
    notifier: Arc<N>,
}

impl<N: Notifier> Router<N> {
    /// Create a new [`Router`].
    pub fn new(
        config: Arc<Configuration>,
        machine: SessionMachine<N>,
        review: ReviewProtocol<N>,
        admin: Admin<N>,
        notifier: Arc<N>,
    ) -> Self {
        Self {
            config,
            machine,
            review,
            admin,
            notifier,
        }
    }

    /// Process one payload against `session`, converting unexpected
    /// failures into a generic apology so the session survives in its
    /// current state.
    pub async fn process(&self, session: &mut Session, from: ChannelId, payload: Incoming) {
        if let Err(err) = self.route(session, from, payload).await {
            tracing::error!(%from, error = %err, "unhandled error while processing event");
            if let Err(err) = self
                .notifier
                .send_text(from, "❌ An error occurred. Please try again.", None)
                .await
            {
                tracing::warn!(%from, error = %err, "apology not delivered");
            }
        }
    }

    async fn route(&self, session: &mut Session, from: ChannelId, payload: Incoming) -> Result<()> {
        match payload {
            Incoming::Command(Command::Start) => self.machine.start(session, from).await,
            Incoming::Command(Command::Cancel) => self.machine.cancel(session, from).await,
            Incoming::Command(Command::Help) => {
                self.notifier
                    .send_text(from, &self.admin.help_text(from), None)
                    .await?;
                Ok(())
            },
            Incoming::Command(command) if Admin::<N>::is_privileged(&command) => {
                self.admin.handle(session, from, &command).await
            },
            Incoming::Command(_) => Ok(()),
            Incoming::Text(text) if session.state == SessionState::AdminIngest => {
                // Only the operator can be in this state, but re-check: the
                // session could outlive a configuration change.
                if self.config.is_operator(from) {
                    self.admin.ingest(from, &text).await
                } else {
                    session.reset();
                    Ok(())
                }
            },
            Incoming::Action(action) if action.is_review() => {
                let authorized = self.config.is_operator(from)
                    || self.config.review_target() == Some(from);
                if authorized {
                    self.review.apply_decision(from, &action).await
                } else {
                    tracing::warn!(%from, "review action from unauthorized identity ignored");
                    Ok(())
                }
            },
            payload => self.machine.handle(session, from, payload).await,
        }
    }
}

/// Owns the per-identity workers and the inbound queue consumption.
pub struct Dispatcher<N> {
    router: Arc<Router<N>>,
}

impl<N: Notifier> Dispatcher<N> {
    /// Create a new [`Dispatcher`].
    pub fn new(router: Router<N>) -> Self {
        Self {
            router: Arc::new(router),
        }
    }

    /// Consume inbound events until the channel closes, then drain every
    /// worker.
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) {
        let mut workers: HashMap<ChannelId, mpsc::Sender<Incoming>> = HashMap::new();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        while let Some(event) = events.recv().await {
            let sender = workers.entry(event.from).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(WORKER_QUEUE);
                handles.push(tokio::spawn(Self::worker(
                    Arc::clone(&self.router),
                    event.from,
                    rx,
                )));
                tx
            });
            if sender.send(event.payload).await.is_err() {
                tracing::error!(from = %event.from, "worker queue closed, event dropped");
                workers.remove(&event.from);
            }
        }

        // Inbound channel closed: let every worker drain and finish.
        drop(workers);
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "session worker panicked");
            }
        }
        tracing::info!("dispatcher stopped");
    }

    async fn worker(router: Arc<Router<N>>, identity: ChannelId, mut rx: mpsc::Receiver<Incoming>) {
        let mut session = Session::default();
        while let Some(payload) = rx.recv().await {
            router.process(&mut session, identity, payload).await;
        }
        tracing::debug!(%identity, "session worker stopped");
    }
}
