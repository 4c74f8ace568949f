//! Pieces every provider adapter uses

pub mod http;
pub mod token_program;
pub mod transaction;

pub use http::{error_text, parse_amount, ProviderHttp};
pub use token_program::{RpcTokenProgramResolver, TokenProgramResolver};
pub use transaction::{classify_submit_error, sign_and_submit};
