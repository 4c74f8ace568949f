//! Scripted providers, signer and confirmations for router tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::rpc::RpcResult;
use crate::swap::classify::ErrorTable;
use crate::swap::errors::{ErrorClass, ProviderError, ProviderResult, SigningError};
use crate::swap::router::SwapRouter;
use crate::swap::traits::{ConfirmationSource, ProviderAdapter, TransactionSigner};
use crate::swap::types::{ChainStatus, Quote, RetryPolicy, SwapOrder, SwapRequest};

const MOCK_TABLE: ErrorTable = ErrorTable {
    liquidity: &[],
    slippage: &[],
    fatal: &[],
    slippage_codes: &[6001],
};

pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        initial_deduction_bps: 0,
        max_deduction_bps: 500,
        deduction_step_bps: 100,
        initial_slippage_bps: 50,
        max_slippage_bps: 300,
        inter_attempt_delay_ms: 0,
        max_transient_retries: 2,
    }
}

pub fn test_request(amount: u64) -> SwapRequest {
    SwapRequest {
        source: "SOL".to_string(),
        dest: "USDC".to_string(),
        amount,
        max_slippage_bps: 300,
        signer: Arc::new(MockSigner),
    }
}

pub fn router_with(providers: Vec<Arc<MockProvider>>, confirmations: Arc<MockConfirmations>) -> SwapRouter {
    let providers = providers
        .into_iter()
        .map(|p| p as Arc<dyn ProviderAdapter>)
        .collect();
    SwapRouter::new(providers, confirmations, test_policy(), Duration::from_secs(1))
}

#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Submit successfully; the confirmation source decides the rest
    Submit,
    Fail(ErrorClass),
}

/// Script whose only step repeats forever
pub fn always(step: Step) -> Vec<Step> {
    vec![step]
}

/// Plays `steps` in order, repeating the last one
pub struct MockProvider {
    name: String,
    steps: Vec<Step>,
    calls: AtomicUsize,
    orders: Mutex<Vec<SwapOrder>>,
    quote: Mutex<Quote>,
    cancel_on_swap: Mutex<Option<CancellationToken>>,
}

impl MockProvider {
    pub fn new(name: &str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            steps,
            calls: AtomicUsize::new(0),
            orders: Mutex::new(Vec::new()),
            quote: Mutex::new(Quote::NoRoute),
            cancel_on_swap: Mutex::new(None),
        })
    }

    pub fn with_quote(self: Arc<Self>, quote: Quote) -> Arc<Self> {
        *self.quote.lock().unwrap() = quote;
        self
    }

    /// Cancel `token` from inside every swap call
    pub fn cancelling(self: Arc<Self>, token: CancellationToken) -> Arc<Self> {
        *self.cancel_on_swap.lock().unwrap() = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn orders(&self) -> Vec<SwapOrder> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, _source: &str, _dest: &str, _amount: u64) -> ProviderResult<Quote> {
        Ok(self.quote.lock().unwrap().clone())
    }

    async fn swap(&self, order: &SwapOrder, signer: &dyn TransactionSigner) -> ProviderResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().push(order.clone());
        if let Some(token) = self.cancel_on_swap.lock().unwrap().as_ref() {
            token.cancel();
        }

        let step = self
            .steps
            .get(n)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or(Step::Fail(ErrorClass::Unclassified));

        match step {
            Step::Submit => {
                signer
                    .sign(b"unsigned")
                    .await
                    .map_err(|e| ProviderError::fatal(&self.name, e.to_string()))?;
                Ok(format!("sig-{}-{}", self.name, n + 1))
            }
            Step::Fail(class) => Err(ProviderError::new(class, &self.name, format!("scripted {}", class))),
        }
    }

    fn classify_chain_error(&self, error: &Value) -> ProviderError {
        ProviderError::new(MOCK_TABLE.classify_chain_error(error), &self.name, error.to_string())
    }
}

pub struct MockSigner;

#[async_trait]
impl TransactionSigner for MockSigner {
    fn public_key(&self) -> &str {
        "MockSigner1111111111111111111111111111111111"
    }

    async fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>, SigningError> {
        let mut signed = vec![0u8; 64];
        signed.extend_from_slice(unsigned);
        Ok(signed)
    }
}

/// Answers confirmations from a script, then confirms everything
pub struct MockConfirmations {
    script: Mutex<Vec<RpcResult<ChainStatus>>>,
    seen: Mutex<Vec<String>>,
}

impl MockConfirmations {
    pub fn confirming() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(mut script: Vec<RpcResult<ChainStatus>>) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationSource for MockConfirmations {
    async fn confirm(&self, signature: &str, _timeout: Duration) -> RpcResult<ChainStatus> {
        self.seen.lock().unwrap().push(signature.to_string());
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(Ok(ChainStatus::Confirmed { slot: None }))
    }
}
