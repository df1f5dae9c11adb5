use std::{cell::RefCell, collections::HashMap};

use fvm_ipld_encoding::RawBytes;
use fvm_shared::{address::Address, error::ErrorNumber, error::ExitCode, MethodNum};

use super::Syscalls;
use crate::clock::{Clock, FakeClock, Timestamp};
use crate::messaging::{Response, ON_TOKEN_TRANSFER_METHOD_NUM};

/// How a fake contract reacts to an incoming message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContractBehaviour {
    /// Implements the ERC-677 hook and accepts every transfer
    Accept,
    /// Implements the ERC-677 hook but aborts
    Reject,
    /// Deployed code without an `onTokenTransfer` method
    NoHook,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestMessage {
    pub to: Address,
    pub method: MethodNum,
    pub params: RawBytes,
}

#[derive(Clone, Debug)]
pub struct FakeSyscalls {
    /// The address of the ledger
    pub token_address: Address,
    /// Time source for lock checks
    pub clock: FakeClock,

    /// Contracts deployed in this runtime
    pub contracts: RefCell<HashMap<Address, ContractBehaviour>>,

    /// Every message delivered to a contract that accepted it, oldest first
    pub delivered: RefCell<Vec<TestMessage>>,
    /// The last message sent via this runtime, whatever its outcome
    pub last_message: RefCell<Option<TestMessage>>,
    /// Flag to make the next send fail at the syscall level
    pub abort_next_send: RefCell<bool>,
}

impl Default for FakeSyscalls {
    fn default() -> Self {
        Self::new(Address::new_id(1), 0)
    }
}

impl FakeSyscalls {
    pub fn new(token_address: Address, start: Timestamp) -> Self {
        Self {
            token_address,
            clock: FakeClock::new(start),
            contracts: Default::default(),
            delivered: Default::default(),
            last_message: Default::default(),
            abort_next_send: Default::default(),
        }
    }

    /// Deploys a fake contract at the address, replacing any previous one
    pub fn deploy_contract(&self, address: Address, behaviour: ContractBehaviour) {
        self.contracts.borrow_mut().insert(address, behaviour);
    }
}

impl Clock for FakeSyscalls {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

impl Syscalls for FakeSyscalls {
    fn receiver(&self) -> Address {
        self.token_address
    }

    fn is_contract(&self, address: &Address) -> bool {
        self.contracts.borrow().contains_key(address)
    }

    fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: RawBytes,
    ) -> Result<Response, ErrorNumber> {
        if self.abort_next_send.replace(false) {
            return Err(ErrorNumber::AssertionFailed);
        }

        let message = TestMessage { to: *to, method, params: params.clone() };
        self.last_message.replace(Some(message.clone()));

        let behaviour = self.contracts.borrow().get(to).copied();
        let exit_code = match behaviour {
            // plain accounts accept any value-less message
            None => ExitCode::OK,
            Some(ContractBehaviour::Accept) if method == ON_TOKEN_TRANSFER_METHOD_NUM => {
                ExitCode::OK
            }
            Some(ContractBehaviour::Reject) if method == ON_TOKEN_TRANSFER_METHOD_NUM => {
                ExitCode::USR_FORBIDDEN
            }
            Some(_) => ExitCode::USR_UNHANDLED_MESSAGE,
        };

        if exit_code.is_success() {
            self.delivered.borrow_mut().push(message);
        }

        // echo the params back as return data
        let return_data = if exit_code.is_success() { params } else { RawBytes::default() };
        Ok(Response { exit_code, return_data })
    }
}

#[cfg(test)]
mod test {
    use fvm_ipld_encoding::RawBytes;
    use fvm_shared::{address::Address, error::ExitCode};

    use super::{ContractBehaviour, FakeSyscalls};
    use crate::messaging::ON_TOKEN_TRANSFER_METHOD_NUM;
    use crate::syscalls::Syscalls;

    const RECEIVER: Address = Address::new_id(10);

    #[test]
    fn it_routes_hooks_by_behaviour() {
        let syscalls = FakeSyscalls::default();
        assert!(!syscalls.is_contract(&RECEIVER));

        syscalls.deploy_contract(RECEIVER, ContractBehaviour::Accept);
        assert!(syscalls.is_contract(&RECEIVER));
        let params = RawBytes::new(vec![1, 2, 3]);
        let res = syscalls.send(&RECEIVER, ON_TOKEN_TRANSFER_METHOD_NUM, params.clone()).unwrap();
        assert_eq!(res.exit_code, ExitCode::OK);
        assert_eq!(res.return_data, params);
        assert_eq!(syscalls.delivered.borrow().len(), 1);

        syscalls.deploy_contract(RECEIVER, ContractBehaviour::Reject);
        let res = syscalls.send(&RECEIVER, ON_TOKEN_TRANSFER_METHOD_NUM, params.clone()).unwrap();
        assert_eq!(res.exit_code, ExitCode::USR_FORBIDDEN);

        syscalls.deploy_contract(RECEIVER, ContractBehaviour::NoHook);
        let res = syscalls.send(&RECEIVER, ON_TOKEN_TRANSFER_METHOD_NUM, params).unwrap();
        assert_eq!(res.exit_code, ExitCode::USR_UNHANDLED_MESSAGE);

        // rejected messages are recorded as sent but not as delivered
        assert_eq!(syscalls.delivered.borrow().len(), 1);
        assert!(syscalls.last_message.borrow().is_some());
    }

    #[test]
    fn it_aborts_the_next_send_once() {
        let syscalls = FakeSyscalls::default();
        syscalls.abort_next_send.replace(true);
        syscalls.send(&RECEIVER, ON_TOKEN_TRANSFER_METHOD_NUM, RawBytes::default()).unwrap_err();
        syscalls.send(&RECEIVER, ON_TOKEN_TRANSFER_METHOD_NUM, RawBytes::default()).unwrap();
    }
}
