//! Provider routing with failure-driven parameter adaptation
//!
//! Providers are tried in priority order. Per provider the router walks a
//! small state machine over `(deduction_bps, slippage_bps)`:
//!
//! - Liquidity: deduction grows by one step, same provider, smaller amount
//! - Slippage: slippage x1.5 up to the cap, original amount
//! - Transient: same parameters, bounded by `max_transient_retries`
//! - Fatal / Unclassified: the whole swap stops
//!
//! A provider is exhausted when the next deduction would pass the maximum,
//! slippage is already at the cap, or its transient budget is spent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::events::{log_event, LifecycleEvent};
use crate::rpc::RpcError;
use crate::swap::errors::{ErrorClass, ProviderError, ProviderResult, SwapError};
use crate::swap::traits::{ConfirmationSource, ProviderAdapter};
use crate::swap::types::{
    apply_deduction, escalate_slippage, AttemptOutcome, ChainStatus, ConfirmedSwap, Quote,
    RetryPolicy, SwapAttempt, SwapOrder, SwapReport, SwapRequest,
};

/// Parameters of the next try against one provider
#[derive(Debug, Clone, Copy)]
struct AttemptParams {
    deduction_bps: u32,
    slippage_bps: u32,
    transient_left: u32,
}

/// What the router does after a failed attempt
#[derive(Debug, PartialEq, Eq)]
enum NextStep {
    Retry,
    NextProvider,
    Abort,
}

pub struct SwapRouter {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    confirmations: Arc<dyn ConfirmationSource>,
    policy: RetryPolicy,
    confirmation_timeout: Duration,
}

impl SwapRouter {
    /// `providers` in priority order
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        confirmations: Arc<dyn ConfirmationSource>,
        policy: RetryPolicy,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            confirmations,
            policy,
            confirmation_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Ask every provider concurrently; diagnostics only
    pub async fn quote_all(
        &self,
        source: &str,
        dest: &str,
        amount: u64,
    ) -> Vec<(String, ProviderResult<Quote>)> {
        let quotes = join_all(
            self.providers
                .iter()
                .map(|p| async move { (p.name().to_string(), p.quote(source, dest, amount).await) }),
        )
        .await;

        for (provider, quote) in &quotes {
            debug!(provider = %provider, quote = ?quote, "Quote");
        }
        quotes
    }

    /// Execute `request`, returning the first on-chain confirmed swap or one
    /// aggregated error. Every attempt is in the report either way.
    pub async fn swap(&self, request: &SwapRequest, cancel: &CancellationToken) -> SwapReport {
        let swap_id = Uuid::new_v4();
        let mut attempts = Vec::new();

        if let Err(e) = request.validate() {
            return SwapReport { swap_id, outcome: Err(e), attempts };
        }
        if self.providers.is_empty() {
            return SwapReport { swap_id, outcome: Err(SwapError::NoProviders), attempts };
        }

        log_event(&LifecycleEvent::swap_started(swap_id, request.amount, self.providers.len()));

        let slippage_cap = request.max_slippage_bps.min(self.policy.max_slippage_bps);
        let mut failures = Vec::new();

        for provider in &self.providers {
            let mut params = AttemptParams {
                deduction_bps: self.policy.initial_deduction_bps,
                slippage_bps: self.policy.initial_slippage_bps.min(slippage_cap),
                transient_left: self.policy.max_transient_retries,
            };

            loop {
                if !attempts.is_empty() && !self.pause(cancel).await {
                    return self.cancelled(swap_id, attempts);
                }
                if cancel.is_cancelled() {
                    return self.cancelled(swap_id, attempts);
                }

                let attempt_no = attempts.len() as u32 + 1;
                let applied = apply_deduction(request.amount, params.deduction_bps);
                log_event(&LifecycleEvent::attempt_started(
                    swap_id,
                    provider.name(),
                    attempt_no,
                    applied,
                    params.deduction_bps,
                    params.slippage_bps,
                ));

                let result = self
                    .attempt(swap_id, attempt_no, provider.as_ref(), request, applied, params)
                    .await;

                let mut record = SwapAttempt {
                    provider: provider.name().to_string(),
                    requested_amount: request.amount,
                    applied_amount: applied,
                    deduction_bps: params.deduction_bps,
                    slippage_bps: params.slippage_bps,
                    outcome: match &result {
                        Ok(confirmed) => AttemptOutcome::Confirmed {
                            signature: confirmed.signature.clone(),
                        },
                        Err(e) => AttemptOutcome::Failed(e.clone()),
                    },
                };

                let error = match result {
                    Ok(confirmed) => {
                        // Landed on chain; reported even if cancelled meanwhile
                        log_event(&LifecycleEvent::swap_confirmed(
                            swap_id,
                            provider.name(),
                            attempt_no,
                            applied,
                            &confirmed.signature,
                        ));
                        attempts.push(record);
                        return SwapReport { swap_id, outcome: Ok(confirmed), attempts };
                    }
                    Err(e) => e,
                };

                log_event(&LifecycleEvent::attempt_failed(
                    swap_id,
                    provider.name(),
                    attempt_no,
                    error.class.as_str(),
                    &error.message,
                ));

                if cancel.is_cancelled() {
                    record.outcome = AttemptOutcome::Discarded(Box::new(record.outcome));
                    attempts.push(record);
                    return self.cancelled(swap_id, attempts);
                }
                attempts.push(record);

                match self.next_step(&error, &mut params, slippage_cap) {
                    NextStep::Retry => continue,
                    NextStep::NextProvider => {
                        info!(
                            swap_id = %swap_id,
                            provider = %provider.name(),
                            class = %error.class,
                            "Provider exhausted, falling through"
                        );
                        failures.push(error);
                        break;
                    }
                    NextStep::Abort => {
                        log_event(&LifecycleEvent::swap_aborted(swap_id, provider.name(), &error.message));
                        return SwapReport {
                            swap_id,
                            outcome: Err(SwapError::Fatal(error)),
                            attempts,
                        };
                    }
                }
            }
        }

        let error = SwapError::Exhausted { failures };
        log_event(&LifecycleEvent::swap_exhausted(swap_id, attempts.len() as u32, &error.to_string()));
        SwapReport { swap_id, outcome: Err(error), attempts }
    }

    /// Adjust `params` for the retry, or say why there is none
    fn next_step(&self, error: &ProviderError, params: &mut AttemptParams, slippage_cap: u32) -> NextStep {
        match error.class {
            ErrorClass::Fatal | ErrorClass::Unclassified => NextStep::Abort,
            ErrorClass::Liquidity => {
                let next = params.deduction_bps.saturating_add(self.policy.deduction_step_bps);
                if next > self.policy.max_deduction_bps {
                    return NextStep::NextProvider;
                }
                params.deduction_bps = next;
                NextStep::Retry
            }
            ErrorClass::Slippage => {
                if params.slippage_bps >= slippage_cap {
                    return NextStep::NextProvider;
                }
                params.slippage_bps = escalate_slippage(params.slippage_bps, slippage_cap);
                params.deduction_bps = self.policy.initial_deduction_bps;
                NextStep::Retry
            }
            ErrorClass::Transient => {
                if params.transient_left == 0 {
                    return NextStep::NextProvider;
                }
                params.transient_left -= 1;
                NextStep::Retry
            }
        }
    }

    /// Submit through `provider`, then wait for the chain
    async fn attempt(
        &self,
        swap_id: Uuid,
        attempt_no: u32,
        provider: &dyn ProviderAdapter,
        request: &SwapRequest,
        applied: u64,
        params: AttemptParams,
    ) -> ProviderResult<ConfirmedSwap> {
        let order = SwapOrder {
            source: request.source.clone(),
            dest: request.dest.clone(),
            amount: applied,
            slippage_bps: params.slippage_bps,
        };

        let signature = provider.swap(&order, request.signer.as_ref()).await?;
        log_event(&LifecycleEvent::attempt_submitted(swap_id, provider.name(), attempt_no, &signature));

        match self.confirmations.confirm(&signature, self.confirmation_timeout).await {
            Ok(ChainStatus::Confirmed { slot }) => Ok(ConfirmedSwap {
                provider: provider.name().to_string(),
                signature,
                applied_amount: applied,
                deduction_bps: params.deduction_bps,
                slippage_bps: params.slippage_bps,
                slot,
                confirmed_at: Utc::now(),
            }),
            Ok(ChainStatus::Failed { error }) => Err(provider.classify_chain_error(&error)),
            // The transaction may still land; a resubmit could execute twice
            Err(e @ RpcError::ConfirmationTimeout { .. }) => {
                Err(ProviderError::fatal(provider.name(), e.to_string()))
            }
            Err(e) => Err(ProviderError::fatal(
                provider.name(),
                format!("confirmation of {} unknown: {}", signature, e),
            )),
        }
    }

    /// Inter-attempt delay; false when cancelled meanwhile
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.policy.inter_attempt_delay()) => true,
        }
    }

    fn cancelled(&self, swap_id: Uuid, attempts: Vec<SwapAttempt>) -> SwapReport {
        warn!(swap_id = %swap_id, attempts = attempts.len(), "Swap cancelled");
        log_event(&LifecycleEvent::swap_cancelled(swap_id, attempts.len() as u32));
        SwapReport {
            swap_id,
            outcome: Err(SwapError::Cancelled),
            attempts,
        }
    }
}
