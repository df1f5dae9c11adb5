use std::fmt;
use std::time::Duration;

use erc677_token::{ErrorKind, TokenEvent};
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use ledger_utils::clock::Timestamp;

/// A mutating ledger operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Mint { recipients: Vec<Address>, amounts: Vec<TokenAmount> },
    FinishMinting,
    Transfer { from: Address, to: Address, amount: TokenAmount },
    Approve { owner: Address, spender: Address, amount: TokenAmount },
    TransferFrom { spender: Address, owner: Address, to: Address, amount: TokenAmount },
    LockTokens { accounts: Vec<Address>, expiries: Vec<Timestamp> },
    TransferAndCall { from: Address, to: Address, amount: TokenAmount, data: RawBytes },
}

impl Operation {
    pub fn mint(recipients: &[Address], amounts: &[TokenAmount]) -> Self {
        Operation::Mint { recipients: recipients.to_vec(), amounts: amounts.to_vec() }
    }

    pub fn transfer(from: &Address, to: &Address, amount: TokenAmount) -> Self {
        Operation::Transfer { from: *from, to: *to, amount }
    }

    pub fn approve(owner: &Address, spender: &Address, amount: TokenAmount) -> Self {
        Operation::Approve { owner: *owner, spender: *spender, amount }
    }

    pub fn transfer_from(
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: TokenAmount,
    ) -> Self {
        Operation::TransferFrom { spender: *spender, owner: *owner, to: *to, amount }
    }

    pub fn lock_tokens(accounts: &[Address], expiries: &[Timestamp]) -> Self {
        Operation::LockTokens { accounts: accounts.to_vec(), expiries: expiries.to_vec() }
    }

    pub fn transfer_and_call(
        from: &Address,
        to: &Address,
        amount: TokenAmount,
        data: RawBytes,
    ) -> Self {
        Operation::TransferAndCall { from: *from, to: *to, amount, data }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Mint { recipients, amounts } => {
                write!(f, "mint [")?;
                for (i, (recipient, amount)) in recipients.iter().zip(amounts).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} to {}", amount.atto(), recipient)?;
                }
                write!(f, "]")
            }
            Operation::FinishMinting => write!(f, "finish minting"),
            Operation::Transfer { from, to, amount } => {
                write!(f, "transfer {} from {} to {}", amount.atto(), from, to)
            }
            Operation::Approve { owner, spender, amount } => {
                write!(f, "approve {} for {} by {}", amount.atto(), spender, owner)
            }
            Operation::TransferFrom { spender, owner, to, amount } => {
                write!(f, "{} transfers {} from {} to {}", spender, amount.atto(), owner, to)
            }
            Operation::LockTokens { accounts, expiries } => {
                write!(f, "lock {:?} until {:?}", accounts, expiries)
            }
            Operation::TransferAndCall { from, to, amount, data } => write!(
                f,
                "transfer and call {} from {} to {} with {} byte(s)",
                amount.atto(),
                from,
                to,
                data.bytes().len()
            ),
        }
    }
}

/// What a step expects its operation to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    Success,
    /// Rejection of the given kind, or of any kind when `None`
    Failure(Option<ErrorKind>),
}

impl Expectation {
    pub fn matches(&self, outcome: &Outcome) -> bool {
        match (self, outcome) {
            (Expectation::Success, Outcome::Success) => true,
            (Expectation::Failure(None), Outcome::Failure(_)) => true,
            (Expectation::Failure(Some(expected)), Outcome::Failure(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Success => write!(f, "success"),
            Expectation::Failure(None) => write!(f, "any failure"),
            Expectation::Failure(Some(kind)) => write!(f, "failure {kind}"),
        }
    }
}

/// What an operation actually did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure(kind) => write!(f, "failure {kind}"),
        }
    }
}

/// A check on ledger or runtime state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assertion {
    Balance { account: Address, expected: TokenAmount },
    Allowance { owner: Address, spender: Address, expected: TokenAmount },
    TotalSupply(TokenAmount),
    Locked { account: Address, expected: bool },
    MintingFinished(bool),
    /// Every state invariant holds
    Invariants,
    /// The latest hook delivered to the contract carried these parameters
    HookCalled { contract: Address, sender: Address, value: TokenAmount, data: RawBytes },
}

/// One step of a scenario
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Execute { operation: Operation, expect: Expectation },
    AdvanceTime(Duration),
    /// The events emitted by the most recently executed operation, in order
    ExpectEvents(Vec<TokenEvent>),
    Assert(Assertion),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Execute { operation, expect } => write!(f, "{operation}, expecting {expect}"),
            Step::AdvanceTime(by) => write!(f, "advance time by {by:?}"),
            Step::ExpectEvents(events) => write!(f, "expect {} event(s)", events.len()),
            Step::Assert(assertion) => write!(f, "assert {assertion:?}"),
        }
    }
}
