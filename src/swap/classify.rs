//! Mapping provider and chain failures onto `ErrorClass`
//!
//! Each adapter owns an `ErrorTable` of its provider's codes. Matching is a
//! case-insensitive substring test so both bare codes (`NO_ROUTES_FOUND`) and
//! free-text messages ("exceeds desired slippage limit") work.

use serde_json::Value;

use crate::swap::errors::ErrorClass;

/// Provider-specific error vocabulary
#[derive(Debug, Clone, Copy)]
pub struct ErrorTable {
    pub liquidity: &'static [&'static str],
    pub slippage: &'static [&'static str],
    pub fatal: &'static [&'static str],
    /// On-chain custom program error codes that mean slippage
    pub slippage_codes: &'static [u32],
}

impl ErrorTable {
    /// Fatal wins over slippage, slippage over liquidity
    pub fn classify_text(&self, text: &str) -> Option<ErrorClass> {
        let upper = text.to_ascii_uppercase();
        let hit = |needles: &'static [&'static str]| {
            needles.iter().any(|n| upper.contains(&n.to_ascii_uppercase()))
        };

        if hit(self.fatal) {
            return Some(ErrorClass::Fatal);
        }
        if hit(self.slippage) {
            return Some(ErrorClass::Slippage);
        }
        if let Some(code) = custom_error_code_in_text(text) {
            if self.slippage_codes.contains(&code) {
                return Some(ErrorClass::Slippage);
            }
        }
        if hit(self.liquidity) {
            return Some(ErrorClass::Liquidity);
        }
        None
    }

    /// Classify a landed-but-failed transaction's error object
    pub fn classify_chain_error(&self, err: &Value) -> ErrorClass {
        if let Some(code) = custom_error_code(err) {
            if self.slippage_codes.contains(&code) {
                return ErrorClass::Slippage;
            }
        }
        self.classify_text(&err.to_string())
            .unwrap_or(ErrorClass::Unclassified)
    }
}

/// HTTP status classes shared by every provider API
pub fn classify_http_status(status: u16) -> Option<ErrorClass> {
    match status {
        401 | 403 => Some(ErrorClass::Fatal),
        408 | 429 => Some(ErrorClass::Transient),
        500..=599 => Some(ErrorClass::Transient),
        _ => None,
    }
}

/// `{"InstructionError":[idx,{"Custom":n}]}` -> `n`
pub fn custom_error_code(err: &Value) -> Option<u32> {
    let custom = err.get("InstructionError")?.get(1)?.get("Custom")?;
    custom.as_u64().and_then(|c| u32::try_from(c).ok())
}

/// "custom program error: 0x1771" -> 6001
pub fn custom_error_code_in_text(text: &str) -> Option<u32> {
    let marker = "custom program error: 0x";
    let start = text.find(marker)? + marker.len();
    let hex: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u32::from_str_radix(&hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TABLE: ErrorTable = ErrorTable {
        liquidity: &["NO_ROUTES_FOUND", "INSUFFICIENT_LIQUIDITY"],
        slippage: &["SLIPPAGE_TOLERANCE_EXCEEDED", "exceeds desired slippage limit"],
        fatal: &["INSUFFICIENT_BALANCE"],
        slippage_codes: &[0x1771],
    };

    #[test]
    fn test_classify_text() {
        assert_eq!(TABLE.classify_text("NO_ROUTES_FOUND"), Some(ErrorClass::Liquidity));
        assert_eq!(
            TABLE.classify_text("Swap failed: Exceeds desired slippage limit"),
            Some(ErrorClass::Slippage)
        );
        assert_eq!(TABLE.classify_text("insufficient_balance for swap"), Some(ErrorClass::Fatal));
        assert_eq!(TABLE.classify_text("something odd"), None);
    }

    #[test]
    fn test_custom_code_in_simulation_log() {
        let msg = "Transaction simulation failed: Error processing Instruction 3: custom program error: 0x1771";
        assert_eq!(custom_error_code_in_text(msg), Some(0x1771));
        assert_eq!(TABLE.classify_text(msg), Some(ErrorClass::Slippage));
        assert_eq!(custom_error_code_in_text("custom program error: 0x"), None);
    }

    #[test]
    fn test_classify_chain_error() {
        let slip = json!({ "InstructionError": [2, { "Custom": 6001 }] });
        assert_eq!(TABLE.classify_chain_error(&slip), ErrorClass::Slippage);

        let other = json!({ "InstructionError": [0, { "Custom": 1 }] });
        assert_eq!(TABLE.classify_chain_error(&other), ErrorClass::Unclassified);

        let text = json!("InsufficientFundsForRent");
        assert_eq!(TABLE.classify_chain_error(&text), ErrorClass::Unclassified);
    }

    #[test]
    fn test_http_status() {
        assert_eq!(classify_http_status(401), Some(ErrorClass::Fatal));
        assert_eq!(classify_http_status(429), Some(ErrorClass::Transient));
        assert_eq!(classify_http_status(503), Some(ErrorClass::Transient));
        assert_eq!(classify_http_status(400), None);
    }
}
