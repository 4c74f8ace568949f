//! Unsigned transaction -> signed -> submitted, with failure classification

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::rpc::RpcError;
use crate::swap::classify::ErrorTable;
use crate::swap::errors::{ErrorClass, ProviderError, ProviderResult};
use crate::swap::traits::{TransactionSigner, TransactionSubmitter};

/// Decode the provider's base64 transaction, sign it, submit it.
/// Returns the transaction signature.
pub async fn sign_and_submit(
    provider: &str,
    table: &ErrorTable,
    unsigned_b64: &str,
    signer: &dyn TransactionSigner,
    submitter: &dyn TransactionSubmitter,
) -> ProviderResult<String> {
    let unsigned = BASE64.decode(unsigned_b64.trim()).map_err(|e| {
        ProviderError::unclassified(provider, format!("transaction is not valid base64: {}", e))
    })?;

    let signed = signer
        .sign(&unsigned)
        .await
        .map_err(|e| ProviderError::fatal(provider, e.to_string()))?;

    submitter
        .submit(&signed)
        .await
        .map_err(|e| classify_submit_error(provider, table, &e))
}

/// Node-side conditions that clear up on resubmission with a fresh transaction
const TRANSIENT_SUBMIT_ERRORS: &[&str] = &["Blockhash not found", "Node is behind"];

/// Preflight failures carry program logs; the adapter's table decides
pub fn classify_submit_error(provider: &str, table: &ErrorTable, err: &RpcError) -> ProviderError {
    match err {
        RpcError::Server { message, .. } => {
            let class = if TRANSIENT_SUBMIT_ERRORS.iter().any(|m| message.contains(m)) {
                ErrorClass::Transient
            } else {
                table.classify_text(message).unwrap_or(ErrorClass::Unclassified)
            };
            ProviderError::new(class, provider, err.to_string())
        }
        // The signed transaction may have reached the node; resubmitting a
        // fresh one could execute the swap twice
        RpcError::ConnectionLost | RpcError::RequestTimeout { .. } => ProviderError::fatal(
            provider,
            format!("submission outcome unknown: {}", err),
        ),
        other => ProviderError::from_rpc(provider, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_utils::RecordingSubmitter;
    use crate::swap::test_utils::MockSigner;

    const TABLE: ErrorTable = ErrorTable {
        liquidity: &[],
        slippage: &["SLIPPAGE_TOLERANCE_EXCEEDED"],
        fatal: &[],
        slippage_codes: &[0x1771],
    };

    #[tokio::test]
    async fn test_signs_decoded_bytes() {
        let submitter = RecordingSubmitter::ok("sig-1");
        let sig = sign_and_submit("agg", &TABLE, "AQID", &MockSigner, submitter.as_ref())
            .await
            .unwrap();

        assert_eq!(sig, "sig-1");
        let submitted = submitter.submitted();
        // MockSigner prepends a 64-byte signature
        assert_eq!(&submitted[0][64..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_bad_base64() {
        let submitter = RecordingSubmitter::ok("sig-1");
        let err = sign_and_submit("agg", &TABLE, "%%%", &MockSigner, submitter.as_ref())
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Unclassified);
        assert!(submitter.submitted().is_empty());
    }

    #[test]
    fn test_submit_error_classes() {
        let preflight = RpcError::Server {
            code: -32002,
            message: "Transaction simulation failed: custom program error: 0x1771".to_string(),
        };
        assert_eq!(classify_submit_error("agg", &TABLE, &preflight).class, ErrorClass::Slippage);

        let stale = RpcError::Server { code: -32002, message: "Blockhash not found".to_string() };
        assert_eq!(classify_submit_error("agg", &TABLE, &stale).class, ErrorClass::Transient);

        let other = RpcError::Server { code: -32003, message: "Transaction signature verification failure".to_string() };
        assert_eq!(classify_submit_error("agg", &TABLE, &other).class, ErrorClass::Unclassified);

        assert_eq!(
            classify_submit_error("agg", &TABLE, &RpcError::ConnectionLost).class,
            ErrorClass::Fatal
        );
        let timed_out = RpcError::RequestTimeout { method: "sendTransaction".to_string(), retries: 3 };
        assert_eq!(classify_submit_error("agg", &TABLE, &timed_out).class, ErrorClass::Fatal);

        // Nothing left the process
        assert_eq!(
            classify_submit_error("agg", &TABLE, &RpcError::NotConnected).class,
            ErrorClass::Transient
        );
    }
}
