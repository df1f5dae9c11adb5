use std::fmt;

use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use ledger_utils::clock::Timestamp;
use ledger_utils::receiver::ReceiverHookError;
use thiserror::Error;

use crate::token::state::StateError as TokenStateError;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("error in underlying state {0}")]
    TokenState(#[from] TokenStateError),
    #[error("value {amount:?} for {name:?} must be non-negative")]
    InvalidNegative { name: &'static str, amount: TokenAmount },
    #[error("minting has been finished")]
    MintingClosed,
    #[error("minting {requested:?} on top of a supply of {supply:?} would exceed the cap of {cap:?}")]
    SupplyCapExceeded { supply: TokenAmount, requested: TokenAmount, cap: TokenAmount },
    #[error("{0} is not a valid transfer destination")]
    InvalidDestination(Address),
    #[error("{account} is locked until {expiry}, current time is {now}")]
    AccountLocked { account: Address, expiry: Timestamp, now: Timestamp },
    #[error("{left_name} has {left} entries but {right_name} has {right}")]
    BatchLengthMismatch {
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
    },
    #[error("receiver hook failed: {0}")]
    ReceiverHook(#[from] ReceiverHookError),
}

/// The distinguishable kind of a rejected ledger operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MintingClosed,
    SupplyCapExceeded,
    InsufficientBalance,
    InsufficientAllowance,
    InvalidDestination,
    AccountLocked,
    /// Negative amounts and mismatched batches
    InvalidArgument,
    /// A contract refused, or could not handle, an ERC-677 transfer
    ReceiverRejected,
    /// Storage or encoding failures
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl TokenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TokenError::MintingClosed => ErrorKind::MintingClosed,
            TokenError::SupplyCapExceeded { .. } => ErrorKind::SupplyCapExceeded,
            TokenError::InvalidDestination(_) => ErrorKind::InvalidDestination,
            TokenError::AccountLocked { .. } => ErrorKind::AccountLocked,
            TokenError::InvalidNegative { .. } | TokenError::BatchLengthMismatch { .. } => {
                ErrorKind::InvalidArgument
            }
            TokenError::ReceiverHook(_) => ErrorKind::ReceiverRejected,
            TokenError::TokenState(state_error) => match state_error {
                TokenStateError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
                TokenStateError::InsufficientAllowance { .. } => ErrorKind::InsufficientAllowance,
                TokenStateError::NegativeAllowance { .. } => ErrorKind::InvalidArgument,
                TokenStateError::IpldHamt(_) | TokenStateError::NegativeTotalSupply { .. } => {
                    ErrorKind::Internal
                }
            },
        }
    }
}

impl From<&TokenError> for ExitCode {
    fn from(error: &TokenError) -> Self {
        match error {
            TokenError::ReceiverHook(e) => e.into(),
            TokenError::InvalidNegative { .. }
            | TokenError::BatchLengthMismatch { .. }
            | TokenError::InvalidDestination(_) => ExitCode::USR_ILLEGAL_ARGUMENT,
            TokenError::MintingClosed | TokenError::AccountLocked { .. } => ExitCode::USR_FORBIDDEN,
            TokenError::SupplyCapExceeded { .. } => ExitCode::USR_ILLEGAL_STATE,
            TokenError::TokenState(state_error) => match state_error {
                TokenStateError::IpldHamt(_) => ExitCode::USR_SERIALIZATION,
                TokenStateError::NegativeAllowance { .. }
                | TokenStateError::NegativeTotalSupply { .. } => ExitCode::USR_ILLEGAL_STATE,
                TokenStateError::InsufficientBalance { .. }
                | TokenStateError::InsufficientAllowance { .. } => ExitCode::USR_INSUFFICIENT_FUNDS,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;
    use fvm_shared::error::ExitCode;
    use ledger_utils::receiver::ReceiverHookError;

    use super::{ErrorKind, TokenError};
    use crate::token::state::StateError;

    #[test]
    fn it_creates_exit_codes() {
        let error = TokenError::TokenState(StateError::InsufficientBalance {
            owner: Address::new_id(1),
            balance: TokenAmount::from_atto(1),
            delta: TokenAmount::from_atto(-2),
        });
        let msg = error.to_string();
        let exit_code = ExitCode::from(&error);
        // taking the exit code doesn't consume the error
        println!("{}: {:?}", msg, exit_code);
        assert_eq!(exit_code, ExitCode::USR_INSUFFICIENT_FUNDS);
        assert_eq!(error.kind(), ErrorKind::InsufficientBalance);
    }

    #[test]
    fn it_passes_through_receiver_exit_codes() {
        let error = TokenError::ReceiverHook(ReceiverHookError::Receiver {
            address: Address::new_id(9),
            exit_code: ExitCode::USR_FORBIDDEN,
        });
        assert_eq!(ExitCode::from(&error), ExitCode::USR_FORBIDDEN);
        assert_eq!(error.kind(), ErrorKind::ReceiverRejected);
    }

    #[test]
    fn it_classifies_argument_errors() {
        let negative =
            TokenError::InvalidNegative { name: "transfer", amount: TokenAmount::from_atto(-1) };
        let mismatch = TokenError::BatchLengthMismatch {
            left_name: "recipients",
            left: 2,
            right_name: "amounts",
            right: 1,
        };
        assert_eq!(negative.kind(), ErrorKind::InvalidArgument);
        assert_eq!(mismatch.kind(), ErrorKind::InvalidArgument);
        assert_eq!(mismatch.to_string(), "recipients has 2 entries but amounts has 1");
        assert_eq!(ErrorKind::AccountLocked.to_string(), "AccountLocked");
    }

    #[test]
    fn it_classifies_state_errors() {
        let negative_allowance = TokenError::TokenState(StateError::NegativeAllowance {
            amount: TokenAmount::from_atto(-1),
            owner: Address::new_id(1),
            spender: Address::new_id(2),
        });
        assert_eq!(negative_allowance.kind(), ErrorKind::InvalidArgument);
        assert_eq!(ExitCode::from(&negative_allowance), ExitCode::USR_ILLEGAL_STATE);

        let negative_supply = TokenError::TokenState(StateError::NegativeTotalSupply {
            supply: TokenAmount::from_atto(0),
            delta: TokenAmount::from_atto(-1),
        });
        assert_eq!(negative_supply.kind(), ErrorKind::Internal);
        assert_eq!(ExitCode::from(&negative_supply), ExitCode::USR_ILLEGAL_STATE);
    }
}
