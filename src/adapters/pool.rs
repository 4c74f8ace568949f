//! Direct AMM pool provider
//!
//! The pool API needs each asset's token program alongside the usual swap
//! parameters, so both mints are resolved before every call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::adapters::shared::{parse_amount, sign_and_submit, ProviderHttp, TokenProgramResolver};
use crate::swap::classify::ErrorTable;
use crate::swap::errors::{ErrorClass, ProviderError, ProviderResult};
use crate::swap::traits::{ProviderAdapter, TransactionSigner, TransactionSubmitter};
use crate::swap::types::{Quote, SwapOrder, TokenProgramKind};

pub const POOL_ERRORS: ErrorTable = ErrorTable {
    liquidity: &["POOL_NOT_FOUND", "INSUFFICIENT_LIQUIDITY"],
    slippage: &["EXCEEDS_DESIRED_SLIPPAGE", "exceeds desired slippage limit"],
    fatal: &["INSUFFICIENT_FUNDS_FOR_FEE", "INVALID_TOKEN"],
    slippage_codes: &[],
};

pub struct PoolAdapter {
    http: ProviderHttp,
    submitter: Arc<dyn TransactionSubmitter>,
    token_programs: Arc<dyn TokenProgramResolver>,
}

impl PoolAdapter {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: Option<String>,
        submitter: Arc<dyn TransactionSubmitter>,
        token_programs: Arc<dyn TokenProgramResolver>,
    ) -> Self {
        Self {
            http: ProviderHttp::new(name, base_url, api_key, POOL_ERRORS),
            submitter,
            token_programs,
        }
    }

    async fn programs(&self, source: &str, dest: &str) -> ProviderResult<(TokenProgramKind, TokenProgramKind)> {
        let attribute = |err: ProviderError| ProviderError { provider: self.name().to_string(), ..err };
        let input = self.token_programs.resolve(source).await.map_err(attribute)?;
        let output = self.token_programs.resolve(dest).await.map_err(attribute)?;
        Ok((input, output))
    }
}

#[async_trait]
impl ProviderAdapter for PoolAdapter {
    fn name(&self) -> &str {
        self.http.provider()
    }

    async fn quote(&self, source: &str, dest: &str, amount: u64) -> ProviderResult<Quote> {
        let (input_program, output_program) = self.programs(source, dest).await?;
        let body = json!({
            "inputAsset": source,
            "outputAsset": dest,
            "amount": amount,
            "inputTokenProgram": input_program,
            "outputTokenProgram": output_program,
        });

        let value = match self.http.post_json("/pools/quote", &body).await {
            Ok(value) => value,
            Err(e) if e.class == ErrorClass::Liquidity => return Ok(Quote::NoRoute),
            Err(e) => return Err(e),
        };

        let expected_output = value
            .get("expectedOutput")
            .and_then(parse_amount)
            .ok_or_else(|| ProviderError::unclassified(self.name(), format!("quote without expectedOutput: {}", value)))?;
        if expected_output == 0 {
            return Ok(Quote::NoRoute);
        }
        let price_impact_bps = value
            .get("priceImpactBps")
            .and_then(Value::as_u64)
            .and_then(|b| u32::try_from(b).ok())
            .unwrap_or(0);

        Ok(Quote::Route {
            expected_output,
            price_impact_bps,
        })
    }

    async fn swap(&self, order: &SwapOrder, signer: &dyn TransactionSigner) -> ProviderResult<String> {
        let (input_program, output_program) = self.programs(&order.source, &order.dest).await?;
        let body = json!({
            "inputAsset": order.source,
            "outputAsset": order.dest,
            "amount": order.amount,
            "slippageBps": order.slippage_bps,
            "inputTokenProgram": input_program,
            "outputTokenProgram": output_program,
            "wallet": signer.public_key(),
        });
        let response = self.http.post_json("/pools/swap", &body).await?;

        let transaction = response
            .get("transaction")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::unclassified(self.name(), "swap response without transaction"))?;

        sign_and_submit(self.name(), self.http.table(), transaction, signer, self.submitter.as_ref()).await
    }

    fn classify_chain_error(&self, error: &Value) -> ProviderError {
        ProviderError::new(POOL_ERRORS.classify_chain_error(error), self.name(), error.to_string())
    }
}
