//! Route-aggregator provider
//!
//! `POST /quote` prices a route, `POST /swap` returns the route as an
//! unsigned base64 transaction which is signed and submitted here.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::adapters::shared::{parse_amount, sign_and_submit, ProviderHttp};
use crate::swap::classify::ErrorTable;
use crate::swap::errors::{ErrorClass, ProviderError, ProviderResult};
use crate::swap::traits::{ProviderAdapter, TransactionSigner, TransactionSubmitter};
use crate::swap::types::{Quote, SwapOrder};

pub const AGGREGATOR_ERRORS: ErrorTable = ErrorTable {
    liquidity: &["NO_ROUTES_FOUND", "COULD_NOT_FIND_ANY_ROUTE", "ROUTE_NOT_FOUND"],
    slippage: &["SLIPPAGE_TOLERANCE_EXCEEDED"],
    fatal: &["INSUFFICIENT_BALANCE", "TOKEN_NOT_TRADABLE", "INVALID_MINT"],
    slippage_codes: &[0x1771],
};

pub struct AggregatorAdapter {
    http: ProviderHttp,
    submitter: Arc<dyn TransactionSubmitter>,
}

impl AggregatorAdapter {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: Option<String>,
        submitter: Arc<dyn TransactionSubmitter>,
    ) -> Self {
        Self {
            http: ProviderHttp::new(name, base_url, api_key, AGGREGATOR_ERRORS),
            submitter,
        }
    }
}

/// "0.1234" percent -> 12 bps, rounded to nearest
fn pct_to_bps(pct: &str) -> Option<u32> {
    let pct = Decimal::from_str(pct).ok()?;
    (pct * Decimal::from(100)).round().abs().to_u32()
}

fn parse_quote(provider: &str, body: &Value) -> ProviderResult<Quote> {
    if body.get("routeFound").and_then(Value::as_bool) == Some(false) {
        return Ok(Quote::NoRoute);
    }
    let expected_output = body
        .get("expectedOutput")
        .and_then(parse_amount)
        .ok_or_else(|| ProviderError::unclassified(provider, format!("quote without expectedOutput: {}", body)))?;
    let price_impact_bps = body
        .get("priceImpactPct")
        .and_then(Value::as_str)
        .and_then(pct_to_bps)
        .unwrap_or(0);
    Ok(Quote::Route {
        expected_output,
        price_impact_bps,
    })
}

#[async_trait]
impl ProviderAdapter for AggregatorAdapter {
    fn name(&self) -> &str {
        self.http.provider()
    }

    async fn quote(&self, source: &str, dest: &str, amount: u64) -> ProviderResult<Quote> {
        let body = json!({
            "inputAsset": source,
            "outputAsset": dest,
            "amount": amount.to_string(),
        });
        match self.http.post_json("/quote", &body).await {
            Ok(value) => parse_quote(self.name(), &value),
            Err(e) if e.class == ErrorClass::Liquidity => Ok(Quote::NoRoute),
            Err(e) => Err(e),
        }
    }

    async fn swap(&self, order: &SwapOrder, signer: &dyn TransactionSigner) -> ProviderResult<String> {
        let body = json!({
            "inputAsset": order.source,
            "outputAsset": order.dest,
            "amount": order.amount.to_string(),
            "slippageBps": order.slippage_bps,
            "userPublicKey": signer.public_key(),
        });
        let response = self.http.post_json("/swap", &body).await?;

        let transaction = response
            .get("swapTransaction")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::unclassified(self.name(), "swap response without swapTransaction"))?;

        sign_and_submit(self.name(), self.http.table(), transaction, signer, self.submitter.as_ref()).await
    }

    fn classify_chain_error(&self, error: &Value) -> ProviderError {
        ProviderError::new(AGGREGATOR_ERRORS.classify_chain_error(error), self.name(), error.to_string())
    }
}
