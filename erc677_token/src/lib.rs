//! An ERC-20 token ledger with the ERC-677 transfer-and-call extension and account lockups.
//!
//! Ledger state lives in HAMTs over an IPLD blockstore; time, identity and contract calls come
//! from the [`ledger_utils`] runtime the ledger is wrapped with.

pub mod token;

pub use token::config::TokenConfig;
pub use token::state::TokenState;
pub use token::types::TokenEvent;
pub use token::{ErrorKind, Token, TokenError};
