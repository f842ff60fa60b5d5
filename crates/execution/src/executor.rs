use crate::rate_limit::RequestBudget;
use anyhow::{Context, Result};
use chrono::Utc;
use predmarket_core::{
    CancelAck, ExchangeClient, ExchangeConfig, FillEvent, OrderProposal, OrderResult,
    ProposalStatus,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Submits approved proposals to the venue with a per-call timeout,
/// bounded retries on transient failures, and at-most-once semantics per
/// proposal id: a retry after an ambiguous timeout can never double-submit.
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
    budget: RequestBudget,
    order_timeout: Duration,
    max_attempts: u32,
    /// Proposal ids already handed to the venue.
    submitted: Mutex<HashSet<Uuid>>,
}

impl OrderExecutor {
    #[must_use]
    pub fn new(client: Arc<dyn ExchangeClient>, config: &ExchangeConfig) -> Self {
        Self {
            client,
            budget: RequestBudget::new(
                config.requests_per_interval,
                Duration::from_millis(config.interval_ms),
            ),
            order_timeout: Duration::from_millis(config.order_timeout_ms),
            max_attempts: config.max_attempts.max(1),
            submitted: Mutex::new(HashSet::new()),
        }
    }

    /// Executes an approved proposal. Returns the fill when the venue
    /// fills it, `None` when the venue rejects it or the proposal was
    /// already submitted (deduplicated retry).
    ///
    /// # Errors
    /// Returns an error when transient failures exhaust the attempt
    /// budget; the proposal is terminal-stamped Rejected and the failure
    /// is surfaced as a worker-level failure.
    pub async fn execute(&self, proposal: &mut OrderProposal) -> Result<Option<FillEvent>> {
        {
            let mut submitted = self.submitted.lock().unwrap_or_else(|e| e.into_inner());
            if !submitted.insert(proposal.id) {
                tracing::warn!(
                    proposal_id = %proposal.id,
                    "duplicate submission suppressed"
                );
                return Ok(None);
            }
        }

        proposal
            .advance(ProposalStatus::Submitted)
            .context("proposal not in a submittable state")?;

        let mut backoff = Duration::from_millis(100);
        for attempt in 1..=self.max_attempts {
            self.budget.acquire().await;

            let outcome = tokio::time::timeout(
                self.order_timeout,
                self.client.submit_order(proposal),
            )
            .await;

            let err = match outcome {
                Ok(Ok(OrderResult::Filled {
                    fill_price,
                    contracts,
                })) => {
                    proposal
                        .advance(ProposalStatus::Filled)
                        .context("fill on a terminal proposal")?;
                    tracing::info!(
                        proposal_id = %proposal.id,
                        market_id = %proposal.market_id,
                        %fill_price,
                        contracts,
                        "order filled"
                    );
                    return Ok(Some(FillEvent {
                        proposal: proposal.clone(),
                        fill_price,
                        fill_qty: contracts,
                        timestamp: Utc::now(),
                    }));
                }
                Ok(Ok(OrderResult::Rejected { reason })) => {
                    // Venue said no: terminal, capital untouched, the sizer
                    // may re-propose next cycle if conditions still hold.
                    tracing::warn!(
                        proposal_id = %proposal.id,
                        market_id = %proposal.market_id,
                        reason,
                        "order rejected by venue"
                    );
                    proposal
                        .advance(ProposalStatus::Rejected)
                        .context("rejection on a terminal proposal")?;
                    return Ok(None);
                }
                Ok(Err(err)) => err,
                Err(_) => {
                    predmarket_core::ExchangeError::Timeout(self.order_timeout.as_millis() as u64)
                }
            };

            if err.is_transient() && attempt < self.max_attempts {
                tracing::warn!(
                    proposal_id = %proposal.id,
                    attempt,
                    %err,
                    "transient execution failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                continue;
            }

            proposal
                .advance(ProposalStatus::Rejected)
                .context("failure on a terminal proposal")?;
            return Err(anyhow::Error::new(err)
                .context(format!("order execution failed after {attempt} attempts")));
        }

        unreachable!("attempt loop always returns");
    }

    /// Requests cancellation of an in-flight order. Idempotent with the
    /// eventual fill: when the cancel races a fill, the fill is
    /// authoritative and the cancel downgrades to a logged no-op.
    ///
    /// # Errors
    /// Returns an error for venue failures other than the fill race.
    pub async fn cancel(&self, proposal_id: Uuid) -> Result<()> {
        match self.client.cancel_order(proposal_id).await {
            Ok(CancelAck::Cancelled) => {
                tracing::info!(%proposal_id, "order cancelled");
                Ok(())
            }
            Ok(CancelAck::AlreadyFilled) => {
                tracing::warn!(
                    %proposal_id,
                    "cancel raced a fill; fill stands, cancel is a no-op"
                );
                Ok(())
            }
            Err(err) => Err(anyhow::Error::new(err).context("cancel failed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use predmarket_core::{
        ExchangeError, MarketFilter, MarketSnapshot, Side, SizingRationale,
    };
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted venue: fails the first `fail_first` submissions with a
    /// transient error, then fills everything at the limit price.
    struct ScriptedVenue {
        submissions: AtomicU32,
        fail_first: u32,
        reject: bool,
    }

    impl ScriptedVenue {
        fn filling() -> Self {
            Self {
                submissions: AtomicU32::new(0),
                fail_first: 0,
                reject: false,
            }
        }

        fn flaky(fail_first: u32) -> Self {
            Self {
                submissions: AtomicU32::new(0),
                fail_first,
                reject: false,
            }
        }

        fn rejecting() -> Self {
            Self {
                submissions: AtomicU32::new(0),
                fail_first: 0,
                reject: true,
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for ScriptedVenue {
        async fn list_markets(
            &self,
            _filter: &MarketFilter,
        ) -> Result<Vec<MarketSnapshot>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn submit_order(
            &self,
            proposal: &OrderProposal,
        ) -> Result<OrderResult, ExchangeError> {
            let n = self.submissions.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ExchangeError::Transport("connection reset".to_string()));
            }
            if self.reject {
                return Ok(OrderResult::Rejected {
                    reason: "insufficient depth".to_string(),
                });
            }
            Ok(OrderResult::Filled {
                fill_price: proposal.limit_price,
                contracts: proposal.contracts,
            })
        }

        async fn cancel_order(&self, _id: Uuid) -> Result<CancelAck, ExchangeError> {
            Ok(CancelAck::AlreadyFilled)
        }
    }

    fn approved_proposal() -> OrderProposal {
        let mut p = OrderProposal::new(
            "M1".to_string(),
            "economics".to_string(),
            Side::Yes,
            10,
            dec!(0.40),
            dec!(4.00),
            SizingRationale {
                score: 70.0,
                confidence: 0.8,
                kelly_fraction: dec!(0.05),
            },
        );
        p.advance(ProposalStatus::Approved).unwrap();
        p
    }

    fn executor(venue: Arc<ScriptedVenue>) -> OrderExecutor {
        OrderExecutor::new(venue, &ExchangeConfig::default())
    }

    #[tokio::test]
    async fn fill_produces_event_and_terminal_status() {
        let venue = Arc::new(ScriptedVenue::filling());
        let executor = executor(venue.clone());
        let mut proposal = approved_proposal();

        let fill = executor.execute(&mut proposal).await.unwrap().unwrap();
        assert_eq!(fill.proposal.id, proposal.id);
        assert_eq!(fill.fill_qty, 10);
        assert_eq!(fill.fill_price, dec!(0.40));
        assert_eq!(fill.proposal.status, ProposalStatus::Filled);
        assert_eq!(proposal.status, ProposalStatus::Filled);
    }

    #[tokio::test]
    async fn duplicate_submission_is_suppressed() {
        let venue = Arc::new(ScriptedVenue::filling());
        let executor = executor(venue.clone());
        let mut proposal = approved_proposal();

        executor.execute(&mut proposal).await.unwrap().unwrap();

        // Simulated retry of the same proposal id after an ambiguous
        // timeout: it must not reach the venue again.
        let mut retry = approved_proposal();
        retry.id = proposal.id;
        let second = executor.execute(&mut retry).await.unwrap();
        assert!(second.is_none());
        assert_eq!(venue.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_fill() {
        let venue = Arc::new(ScriptedVenue::flaky(2));
        let executor = executor(venue.clone());
        let mut proposal = approved_proposal();

        let fill = executor.execute(&mut proposal).await.unwrap();
        assert!(fill.is_some());
        assert_eq!(venue.submissions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_error() {
        let venue = Arc::new(ScriptedVenue::flaky(10));
        let executor = executor(venue.clone());
        let mut proposal = approved_proposal();

        let err = executor.execute(&mut proposal).await.unwrap_err();
        assert!(err.to_string().contains("attempts"));
        assert_eq!(proposal.status, ProposalStatus::Rejected);
        // Default config allows 3 attempts.
        assert_eq!(venue.submissions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn venue_rejection_is_terminal_not_error() {
        let venue = Arc::new(ScriptedVenue::rejecting());
        let executor = executor(venue.clone());
        let mut proposal = approved_proposal();

        let outcome = executor.execute(&mut proposal).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(proposal.status, ProposalStatus::Rejected);
        assert_eq!(venue.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unapproved_proposal_rejected_locally() {
        let venue = Arc::new(ScriptedVenue::filling());
        let executor = executor(venue.clone());
        let mut proposal = approved_proposal();
        // Regress to a fresh proposal that skipped review.
        proposal = {
            let mut p = OrderProposal::new(
                proposal.market_id.clone(),
                proposal.category.clone(),
                proposal.side,
                proposal.contracts,
                proposal.limit_price,
                proposal.notional,
                proposal.rationale.clone(),
            );
            p.id = Uuid::new_v4();
            p
        };
        assert!(executor.execute(&mut proposal).await.is_err());
        assert_eq!(venue.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_racing_fill_is_noop() {
        let venue = Arc::new(ScriptedVenue::filling());
        let executor = executor(venue);
        assert!(executor.cancel(Uuid::new_v4()).await.is_ok());
    }
}
