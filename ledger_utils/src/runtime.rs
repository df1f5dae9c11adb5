use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::MethodNum;

use crate::clock::{Clock, Timestamp};
use crate::messaging::{Messaging, MessagingError, Response, Result as MessagingResult};
use crate::syscalls::{FakeSyscalls, Syscalls};

/// LedgerRuntime bundles the services a ledger needs from its environment: syscalls (time,
/// identity, messaging) and a blockstore for its state tree
#[derive(Clone, Debug)]
pub struct LedgerRuntime<S: Syscalls, BS: Blockstore> {
    pub syscalls: S,
    pub blockstore: BS,
}

impl<S: Syscalls, BS: Blockstore> LedgerRuntime<S, BS> {
    pub fn new(syscalls: S, blockstore: BS) -> Self {
        Self { syscalls, blockstore }
    }

    /// Creates a runtime backed by fake syscalls and an in-memory blockstore
    pub fn new_test_runtime() -> LedgerRuntime<FakeSyscalls, MemoryBlockstore> {
        LedgerRuntime { syscalls: FakeSyscalls::default(), blockstore: MemoryBlockstore::default() }
    }

    /// Returns the address of the ledger
    pub fn token_address(&self) -> Address {
        self.syscalls.receiver()
    }

    /// Current time according to the runtime clock
    pub fn now(&self) -> Timestamp {
        self.syscalls.now()
    }

    /// Whether code is deployed at the address
    pub fn is_contract(&self, address: &Address) -> bool {
        self.syscalls.is_contract(address)
    }

    /// Sends a message to a contract
    ///
    /// Returns MessagingError::NotAContract if there is no code at the address
    pub fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: RawBytes,
    ) -> MessagingResult<Response> {
        if !self.is_contract(to) {
            return Err(MessagingError::NotAContract(*to));
        }
        Ok(self.syscalls.send(to, method, params)?)
    }

    pub fn bs(&self) -> &BS {
        &self.blockstore
    }
}

/// Convenience impl encapsulating the blockstore functionality
impl<S: Syscalls, BS: Blockstore> Blockstore for LedgerRuntime<S, BS> {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        self.blockstore.get(k)
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        self.blockstore.put_keyed(k, block)
    }
}

impl<S: Syscalls, BS: Blockstore> Messaging for LedgerRuntime<S, BS> {
    fn send(&self, to: &Address, method: MethodNum, params: RawBytes) -> MessagingResult<Response> {
        LedgerRuntime::send(self, to, method, params)
    }
}
