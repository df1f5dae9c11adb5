use fvm_ipld_encoding::{Error as IpldError, RawBytes};
use fvm_shared::address::Address;
use fvm_shared::error::{ErrorNumber, ExitCode};
use fvm_shared::MethodNum;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MessagingError>;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("syscall error: `{0}`")]
    Syscall(#[from] ErrorNumber),
    #[error("address is not a contract: `{0}`")]
    NotAContract(Address),
    #[error("ipld serialization error: `{0}`")]
    Ipld(#[from] IpldError),
}

impl From<&MessagingError> for ExitCode {
    fn from(error: &MessagingError) -> Self {
        match error {
            MessagingError::Syscall(e) => match e {
                ErrorNumber::IllegalArgument => ExitCode::USR_ILLEGAL_ARGUMENT,
                ErrorNumber::Forbidden | ErrorNumber::IllegalOperation => ExitCode::USR_FORBIDDEN,
                ErrorNumber::AssertionFailed => ExitCode::USR_ASSERTION_FAILED,
                ErrorNumber::InsufficientFunds => ExitCode::USR_INSUFFICIENT_FUNDS,
                ErrorNumber::NotFound => ExitCode::USR_NOT_FOUND,
                ErrorNumber::Serialization | ErrorNumber::IllegalCodec => {
                    ExitCode::USR_SERIALIZATION
                }
                _ => ExitCode::USR_UNSPECIFIED,
            },
            MessagingError::NotAContract(_) => ExitCode::USR_NOT_FOUND,
            MessagingError::Ipld(_) => ExitCode::USR_SERIALIZATION,
        }
    }
}

/// Outcome of a message delivered to a contract
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub exit_code: ExitCode,
    pub return_data: RawBytes,
}

/// An abstraction used to deliver messages to contracts
pub trait Messaging {
    /// Sends a message to a contract
    fn send(&self, to: &Address, method: MethodNum, params: RawBytes) -> Result<Response>;
}

/// Selector of `onTokenTransfer(address,uint256,bytes)`, the ERC-677 receiver hook
pub const ON_TOKEN_TRANSFER_METHOD_NUM: MethodNum = 0xa4c0_ed36;
