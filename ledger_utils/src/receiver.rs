use fvm_ipld_encoding::RawBytes;
use fvm_shared::{address::Address, econ::TokenAmount, error::ExitCode};
use serde_tuple::{Deserialize_tuple, Serialize_tuple};
use thiserror::Error;

use crate::messaging::{Messaging, MessagingError, ON_TOKEN_TRANSFER_METHOD_NUM};

/// Parameters of the ERC-677 `onTokenTransfer(sender, value, data)` hook
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TokenReceivedParams {
    /// The account the tokens were sent from
    pub sender: Address,
    /// Amount of tokens transferred
    pub value: TokenAmount,
    /// Data supplied by the sender of the transfer
    pub data: RawBytes,
}

#[derive(Error, Debug)]
pub enum ReceiverHookError {
    #[error("receiver hook was already called")]
    AlreadyCalled,
    #[error("error encoding to ipld")]
    IpldEncoding(#[from] fvm_ipld_encoding::Error),
    #[error("error sending message")]
    Messaging(#[from] MessagingError),
    #[error("receiver hook error from {address:?}: exit_code={exit_code:?}")]
    Receiver { address: Address, exit_code: ExitCode },
}

impl From<&ReceiverHookError> for ExitCode {
    fn from(error: &ReceiverHookError) -> Self {
        match error {
            ReceiverHookError::AlreadyCalled => ExitCode::USR_ASSERTION_FAILED,
            ReceiverHookError::IpldEncoding(_) => ExitCode::USR_SERIALIZATION,
            ReceiverHookError::Receiver { address: _, exit_code } => *exit_code,
            ReceiverHookError::Messaging(e) => e.into(),
        }
    }
}

pub trait RecipientData {
    fn set_recipient_data(&mut self, data: RawBytes);
}

/// Implements a guarded call to a token receiver hook
///
/// A transfer-and-call returns this once balances are updated so the receiving contract can
/// already observe its new balance when the hook runs.
///
/// This also tracks whether the call has been made or not, and
/// will panic if dropped without calling the hook.
#[derive(Debug)]
pub struct ReceiverHook<T: RecipientData> {
    address: Address,
    params: TokenReceivedParams,
    called: bool,
    result_data: Option<T>,
}

impl<T: RecipientData> ReceiverHook<T> {
    /// Construct a new ReceiverHook call
    pub fn new(address: Address, params: TokenReceivedParams, result_data: T) -> Self {
        ReceiverHook { address, params, called: false, result_data: Some(result_data) }
    }

    /// Call the receiver hook and return the result
    ///
    /// Returns
    /// - an error if already called
    /// - an error if the hook call aborted
    /// - any return data provided by the hook upon success
    pub fn call(&mut self, msg: &dyn Messaging) -> std::result::Result<T, ReceiverHookError> {
        if self.called {
            return Err(ReceiverHookError::AlreadyCalled);
        }

        self.called = true;

        let params = RawBytes::serialize(&self.params)?;
        let response = msg.send(&self.address, ON_TOKEN_TRANSFER_METHOD_NUM, params)?;
        log::debug!("receiver hook on {} returned {:?}", self.address, response.exit_code);

        match response.exit_code {
            ExitCode::OK => {
                let mut result = self.result_data.take().ok_or(ReceiverHookError::AlreadyCalled)?;
                result.set_recipient_data(response.return_data);
                Ok(result)
            }
            abort_code => {
                Err(ReceiverHookError::Receiver { address: self.address, exit_code: abort_code })
            }
        }
    }
}

/// Drop implements the panic if not called behaviour
impl<T: RecipientData> std::ops::Drop for ReceiverHook<T> {
    fn drop(&mut self) {
        if !self.called {
            panic!(
                "dropped before receiver hook was called on {:?} with {:?}",
                self.address, self.params
            );
        }
    }
}
