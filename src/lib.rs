//! Activa is a lightweight activation tracker driven through a chat surface.
//!
//! Users authenticate against a pre-registered directory, pick a trading app
//! and submit proof of activation; the operator reviews each submission from
//! a dedicated channel and the verdict flows back to the submitter. The chat
//! transport itself stays outside the crate, behind [`notifier::Notifier`].

#![forbid(unsafe_code)]

pub mod admin;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod notifier;
pub mod report;
pub mod review;
pub mod session;
pub mod store;
pub mod user;

pub mod config;

use std::sync::Arc;

use admin::Admin;
use config::Configuration;
use dispatch::{Dispatcher, Router};
use ledger::ActivationLedger;
use notifier::Notifier;
use report::Reporter;
use review::ReviewProtocol;
use session::SessionMachine;
use store::Store;
use user::UserDirectory;

/// State sharing between components.
#[derive(Clone)]
pub struct AppState<N> {
    pub config: Arc<Configuration>,
    pub store: Arc<Store>,
    pub directory: UserDirectory,
    pub ledger: ActivationLedger,
    pub reporter: Reporter<N>,
    pub notifier: Arc<N>,
}

/// Wire every component to `state` and return the event dispatcher.
pub fn dispatcher<N: Notifier>(state: &AppState<N>) -> Dispatcher<N> {
    let review = ReviewProtocol::new(
        Arc::clone(&state.config),
        state.ledger.clone(),
        state.directory.clone(),
        Arc::clone(&state.notifier),
    );
    let machine = SessionMachine::new(
        Arc::clone(&state.config),
        state.directory.clone(),
        state.ledger.clone(),
        review.clone(),
        Arc::clone(&state.notifier),
    );
    let admin = Admin::new(
        Arc::clone(&state.config),
        state.directory.clone(),
        state.ledger.clone(),
        state.reporter.clone(),
        Arc::clone(&state.notifier),
    );
    Dispatcher::new(Router::new(
        Arc::clone(&state.config),
        machine,
        review,
        admin,
        Arc::clone(&state.notifier),
    ))
}

/// Initialize the application state.
pub fn initialize_state<N: Notifier>(notifier: Arc<N>) -> error::Result<AppState<N>> {
    // read configuration file. let it in memory.
    let config = Configuration::default().read();

    let store = Arc::new(Store::open(&config.data_dir)?);
    let directory = UserDirectory::new(Arc::clone(&store));
    let ledger = ActivationLedger::new(Arc::clone(&store));
    let reporter = Reporter::new(
        Arc::clone(&config),
        directory.clone(),
        ledger.clone(),
        Arc::clone(&notifier),
    );

    Ok(AppState {
        config,
        store,
        directory,
        ledger,
        reporter,
        notifier,
    })
}
