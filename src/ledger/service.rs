//! Duplicate detection, record creation and status transitions.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::ledger::{
    ANGELONE, Activation, Decision, NON_TRADE_CODE, Status, normalize_mobile, reason_text,
};
use crate::notifier::MessageRef;
use crate::store::Store;

/// Optional filters for [`ActivationLedger::list`].
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub email: Option<String>,
    pub app: Option<String>,
    pub mobile: Option<String>,
}

impl Filter {
    pub fn by_email(email: &str) -> Self {
        Self {
            email: Some(email.to_owned()),
            ..Default::default()
        }
    }

    fn matches(&self, activation: &Activation) -> bool {
        self.email.as_deref().is_none_or(|e| activation.email == e)
            && self.app.as_deref().is_none_or(|a| activation.app == a)
            && self
                .mobile
                .as_deref()
                .is_none_or(|m| activation.mobile == normalize_mobile(m))
    }
}

/// Per-app aggregation for the operator's stats view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl AppStats {
    fn record(&mut self, status: Status) {
        self.total += 1;
        match status {
            Status::Pending => self.pending += 1,
            Status::Approved => self.approved += 1,
            Status::Rejected => self.rejected += 1,
        }
    }
}

/// Ledger-wide aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub totals: AppStats,
    /// Per-app breakdown, in first-seen order.
    pub per_app: Vec<(String, AppStats)>,
}

/// The authoritative collection of [`Activation`] records and the rules
/// governing their state transitions.
#[derive(Clone)]
pub struct ActivationLedger {
    store: Arc<Store>,
}

impl ActivationLedger {
    /// Create a new [`ActivationLedger`].
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// True iff an existing activation for the normalized `(app, mobile)`
    /// pair is pending or approved.
    pub async fn is_duplicate(&self, app: &str, mobile: &str) -> bool {
        let mobile = normalize_mobile(mobile);
        self.store
            .activations
            .read(|records| {
                records
                    .iter()
                    .any(|a| a.app == app && a.mobile == mobile && a.blocks_duplicates())
            })
            .await
    }

    /// Record a new pending activation.
    ///
    /// The duplicate check and the insert run under one collection lock, so
    /// two near-simultaneous submissions for the same pair cannot both
    /// succeed. Callers validate the 10-digit shape before getting here.
    pub async fn submit(&self, email: &str, app: &str, mobile: &str) -> Result<Activation> {
        let activation = Activation::new(email, app, mobile);

        self.store
            .activations
            .mutate(|records| {
                let duplicate = records.iter().any(|a| {
                    a.app == activation.app
                        && a.mobile == activation.mobile
                        && a.blocks_duplicates()
                });
                if duplicate {
                    return Err(Error::Duplicate {
                        app: activation.app.clone(),
                        mobile: activation.mobile.clone(),
                    });
                }
                records.push(activation.clone());
                Ok(activation)
            })
            .await?
            .inspect(|a| {
                tracing::info!(email = a.email, app = a.app, mobile = a.mobile, "activation submitted");
            })
    }

    /// Apply an operator decision to the pending activation matching
    /// `(email, app, mobile)`.
    ///
    /// Rejected records stay behind after a resubmission, so the pending
    /// record is the decision target, never the first match in insertion
    /// order. A reasoned `angelone` reject with the non-trade code resolves
    /// to `approved`; every other app takes the normal reject path. When
    /// matches exist but none is pending the decision fails with
    /// [`Error::AlreadyResolved`] instead of overwriting one.
    pub async fn resolve(
        &self,
        email: &str,
        app: &str,
        mobile: &str,
        decision: Decision,
        reason_code: Option<&str>,
    ) -> Result<Activation> {
        let email = email.to_owned();
        let app = app.to_owned();
        let mobile = normalize_mobile(mobile);
        let reason_code = reason_code.map(str::to_owned);

        let resolved = self
            .store
            .activations
            .mutate(move |records| {
                let matches =
                    |a: &Activation| a.email == email && a.app == app && a.mobile == mobile;

                let Some(idx) = records
                    .iter()
                    .position(|a| matches(a) && a.status == Status::Pending)
                else {
                    return match records.iter().rev().find(|a| matches(*a)) {
                        Some(stale) => Err(Error::AlreadyResolved {
                            status: stale.status.to_string(),
                        }),
                        None => Err(Error::NotFound {
                            email: email.clone(),
                            app: app.clone(),
                            mobile: mobile.clone(),
                        }),
                    };
                };

                let activation = &mut records[idx];
                activation.status = final_status(&app, decision, reason_code.as_deref());
                if let Some(code) = reason_code.as_deref() {
                    activation.reason = reason_text(code);
                }
                activation.timestamp = Utc::now();
                Ok(activation.clone())
            })
            .await??;

        tracing::info!(
            email = resolved.email,
            app = resolved.app,
            mobile = resolved.mobile,
            status = %resolved.status,
            "activation resolved"
        );
        Ok(resolved)
    }

    /// Remember which review message carries this activation's controls.
    /// Prefers the pending record so a resubmission after rejection links
    /// its own surface, not the stale one's.
    pub async fn set_review_ref(
        &self,
        email: &str,
        app: &str,
        mobile: &str,
        message: MessageRef,
    ) -> Result<()> {
        let mobile = normalize_mobile(mobile);
        self.store
            .activations
            .mutate(|records| {
                let matches =
                    |a: &Activation| a.email == email && a.app == app && a.mobile == mobile;
                let target = records
                    .iter()
                    .position(|a| matches(a) && a.status == Status::Pending)
                    .or_else(|| records.iter().rposition(|a| matches(a)));
                if let Some(idx) = target {
                    records[idx].review_message_ref = Some(message);
                }
            })
            .await
    }

    /// Filtered snapshot, preserving insertion order.
    pub async fn list(&self, filter: &Filter) -> Vec<Activation> {
        self.store
            .activations
            .read(|records| records.iter().filter(|a| filter.matches(a)).cloned().collect())
            .await
    }

    /// Aggregate counts for the operator's stats view.
    pub async fn stats(&self) -> LedgerStats {
        self.store
            .activations
            .read(|records| {
                let mut stats = LedgerStats::default();
                for activation in records {
                    stats.totals.record(activation.status);
                    match stats
                        .per_app
                        .iter_mut()
                        .find(|(app, _)| app == &activation.app)
                    {
                        Some((_, app_stats)) => app_stats.record(activation.status),
                        None => {
                            let mut app_stats = AppStats::default();
                            app_stats.record(activation.status);
                            stats.per_app.push((activation.app.clone(), app_stats));
                        },
                    }
                }
                stats
            })
            .await
    }

    /// Raw serialized bytes of the activation collection.
    pub async fn export(&self) -> Result<Vec<u8>> {
        self.store.activations.export().await
    }
}

fn final_status(app: &str, decision: Decision, reason_code: Option<&str>) -> Status {
    match decision {
        Decision::Approve => Status::Approved,
        // App-specific override of the normal reject path.
        Decision::Reject if app == ANGELONE && reason_code == Some(NON_TRADE_CODE) => {
            Status::Approved
        },
        Decision::Reject => Status::Rejected,
    }
}
