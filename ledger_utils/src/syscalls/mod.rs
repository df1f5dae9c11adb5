use fvm_ipld_encoding::RawBytes;
use fvm_shared::{address::Address, error::ErrorNumber, MethodNum};

use crate::clock::Clock;
use crate::messaging::Response;

pub mod fake_syscalls;

pub use fake_syscalls::{ContractBehaviour, FakeSyscalls, TestMessage};

/// The Syscalls trait defines what the ledger needs from its execution environment.
///
/// Time comes from the [`Clock`] supertrait; the remaining methods identify the ledger itself
/// and let it reach contracts on the other side of a transfer.
pub trait Syscalls: Clock {
    /// Returns the address of the ledger itself
    fn receiver(&self) -> Address;

    /// Whether code is deployed at the address
    ///
    /// Contracts receive the ERC-677 hook on `transfer_and_call`; plain accounts don't.
    fn is_contract(&self, address: &Address) -> bool;

    /// Sends a message to a contract
    fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: RawBytes,
    ) -> Result<Response, ErrorNumber>;
}
