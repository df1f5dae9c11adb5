//! Sequential execution of ledger scenarios
//!
//! A [`Scenario`] is built once and describes the starting environment (token settings, start
//! time, deployed contracts) and an ordered list of [`Step`]s. Running it creates a fresh ledger
//! and drives every step in order, stopping at the first step whose outcome differs from its
//! expectation.
//!
//! ```rust,ignore
//! let report = Scenario::new("lockup")
//!     .expect_ok(Operation::mint(&[alice], &[TokenAmount::from_atto(100)]))
//!     .expect_ok(Operation::lock_tokens(&[alice], &[start + 1000]))
//!     .advance_time(Duration::from_secs(999))
//!     .expect_failure(Operation::transfer(&alice, &bob, amount), ErrorKind::AccountLocked)
//!     .run()?;
//! ```

use std::time::Duration;

use erc677_token::token::state::StateInvariantError;
use erc677_token::{ErrorKind, Token, TokenConfig, TokenError, TokenEvent};
use fvm_ipld_blockstore::{Blockstore, MemoryBlockstore};
use fvm_shared::address::Address;
use ledger_utils::clock::{ClockError, Timestamp};
use ledger_utils::receiver::TokenReceivedParams;
use ledger_utils::runtime::LedgerRuntime;
use ledger_utils::syscalls::fake_syscalls::{ContractBehaviour, FakeSyscalls};
use thiserror::Error;

use crate::step::{Assertion, Expectation, Operation, Outcome, Step};

/// Start time of scenarios that don't set one
pub const DEFAULT_START: Timestamp = 1_700_000_000;

/// Address the ledger runs at in every scenario
pub const LEDGER_ADDRESS: Address = Address::new_id(1);

/// Why a single step did not go as expected
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error("expected {expected}, got {actual}")]
    UnexpectedOutcome { expected: Expectation, actual: Outcome },
    #[error("expected events {expected:?}, got {actual:?}")]
    EventMismatch { expected: Vec<TokenEvent>, actual: Vec<TokenEvent> },
    #[error("{what}: expected {expected}, got {actual}")]
    Mismatch { what: &'static str, expected: String, actual: String },
    #[error("state invariants violated: {0:?}")]
    Invariants(Vec<StateInvariantError>),
    #[error("no hook was delivered to {0}")]
    HookNotCalled(Address),
    #[error("failed to decode hook parameters: {0}")]
    HookParams(#[from] fvm_ipld_encoding::Error),
    #[error("query failed: {0}")]
    Query(#[from] TokenError),
    #[error("clock error: {0}")]
    Clock(#[from] ClockError),
}

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("scenario {scenario:?} could not be set up: {source}")]
    Setup { scenario: String, source: TokenError },
    #[error("scenario {scenario:?} failed at step {index} ({step}): {failure}")]
    StepFailed {
        scenario: String,
        /// Zero-based position of the step in the scenario
        index: usize,
        step: String,
        #[source]
        failure: StepFailure,
    },
}

impl ScenarioError {
    /// The step failure, if the scenario got as far as running steps
    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            ScenarioError::Setup { .. } => None,
            ScenarioError::StepFailed { failure, .. } => Some(failure),
        }
    }
}

/// Summary of a scenario that ran to completion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioReport {
    pub scenario_name: String,
    pub steps_executed: usize,
    /// One line per step, in execution order
    pub log: Vec<String>,
}

/// An ordered list of steps run against a fresh ledger
#[derive(Clone, Debug)]
pub struct Scenario {
    name: String,
    config: TokenConfig,
    start: Timestamp,
    contracts: Vec<(Address, ContractBehaviour)>,
    steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: TokenConfig::default(),
            start: DEFAULT_START,
            contracts: vec![],
            steps: vec![],
        }
    }

    pub fn with_config(mut self, config: TokenConfig) -> Self {
        self.config = config;
        self
    }

    pub fn starting_at(mut self, start: Timestamp) -> Self {
        self.start = start;
        self
    }

    /// Deploys a fake contract before the first step runs
    pub fn with_contract(mut self, address: Address, behaviour: ContractBehaviour) -> Self {
        self.contracts.push((address, behaviour));
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn execute(self, operation: Operation, expect: Expectation) -> Self {
        self.step(Step::Execute { operation, expect })
    }

    pub fn expect_ok(self, operation: Operation) -> Self {
        self.execute(operation, Expectation::Success)
    }

    pub fn expect_failure(self, operation: Operation, kind: ErrorKind) -> Self {
        self.execute(operation, Expectation::Failure(Some(kind)))
    }

    /// Expects the operation to be rejected, whatever the reason
    pub fn expect_rejected(self, operation: Operation) -> Self {
        self.execute(operation, Expectation::Failure(None))
    }

    pub fn advance_time(self, by: Duration) -> Self {
        self.step(Step::AdvanceTime(by))
    }

    pub fn expect_events(self, events: Vec<TokenEvent>) -> Self {
        self.step(Step::ExpectEvents(events))
    }

    pub fn assert(self, assertion: Assertion) -> Self {
        self.step(Step::Assert(assertion))
    }

    /// Runs every step against a fresh in-memory ledger
    pub fn run(&self) -> Result<ScenarioReport, ScenarioError> {
        let syscalls = FakeSyscalls::new(LEDGER_ADDRESS, self.start);
        for (address, behaviour) in &self.contracts {
            syscalls.deploy_contract(*address, *behaviour);
        }
        let runtime = LedgerRuntime::new(syscalls, MemoryBlockstore::default());

        let mut state =
            Token::<FakeSyscalls, MemoryBlockstore>::create_state(runtime.bs(), &self.config)
                .map_err(|source| ScenarioError::Setup { scenario: self.name.clone(), source })?;
        let token = Token::wrap(runtime, self.config.clone(), &mut state);

        ScenarioRunner::new(&self.name, token).run(&self.steps)
    }
}

/// Drives the steps of one scenario against a wrapped ledger
pub struct ScenarioRunner<'a, 'st, BS: Blockstore> {
    name: &'a str,
    token: Token<'st, FakeSyscalls, BS>,
    /// Events of the most recent `Execute` step
    last_events: Vec<TokenEvent>,
    log: Vec<String>,
}

impl<'a, 'st, BS: Blockstore> ScenarioRunner<'a, 'st, BS> {
    pub fn new(name: &'a str, token: Token<'st, FakeSyscalls, BS>) -> Self {
        Self { name, token, last_events: vec![], log: vec![] }
    }

    pub fn run(mut self, steps: &[Step]) -> Result<ScenarioReport, ScenarioError> {
        log::info!("running scenario {:?} ({} steps)", self.name, steps.len());

        for (index, step) in steps.iter().enumerate() {
            log::debug!("{}[{index}]: {step}", self.name);
            if let Err(failure) = self.run_step(step) {
                log::info!("scenario {:?} failed at step {index}: {failure}", self.name);
                return Err(ScenarioError::StepFailed {
                    scenario: self.name.to_string(),
                    index,
                    step: step.to_string(),
                    failure,
                });
            }
            self.log.push(format!("{index}: {step}"));
        }

        log::info!("scenario {:?} passed", self.name);
        Ok(ScenarioReport {
            scenario_name: self.name.to_string(),
            steps_executed: steps.len(),
            log: self.log,
        })
    }

    fn run_step(&mut self, step: &Step) -> Result<(), StepFailure> {
        match step {
            Step::Execute { operation, expect } => {
                let actual = match self.apply(operation) {
                    Ok(()) => Outcome::Success,
                    Err(e) => {
                        log::debug!("{operation} rejected: {e}");
                        Outcome::Failure(e.kind())
                    }
                };
                self.last_events = self.token.drain_events();
                if !expect.matches(&actual) {
                    return Err(StepFailure::UnexpectedOutcome { expected: *expect, actual });
                }
                Ok(())
            }
            Step::AdvanceTime(by) => {
                let now = self.token.runtime().syscalls.clock.advance(*by)?;
                log::debug!("clock advanced to {now}");
                Ok(())
            }
            Step::ExpectEvents(expected) => {
                if *expected != self.last_events {
                    return Err(StepFailure::EventMismatch {
                        expected: expected.clone(),
                        actual: self.last_events.clone(),
                    });
                }
                Ok(())
            }
            Step::Assert(assertion) => self.check(assertion),
        }
    }

    fn apply(&mut self, operation: &Operation) -> Result<(), TokenError> {
        let token = &mut self.token;
        match operation {
            Operation::Mint { recipients, amounts } => {
                token.mint(recipients, amounts)?;
            }
            Operation::FinishMinting => token.finish_minting(),
            Operation::Transfer { from, to, amount } => {
                token.transfer(from, to, amount)?;
            }
            Operation::Approve { owner, spender, amount } => {
                token.approve(owner, spender, amount)?;
            }
            Operation::TransferFrom { spender, owner, to, amount } => {
                token.transfer_from(spender, owner, to, amount)?;
            }
            Operation::LockTokens { accounts, expiries } => {
                token.lock_tokens(accounts, expiries)?;
            }
            Operation::TransferAndCall { from, to, amount, data } => {
                token.transfer_and_call(from, to, amount, data.clone())?;
            }
        }
        Ok(())
    }

    fn check(&self, assertion: &Assertion) -> Result<(), StepFailure> {
        match assertion {
            Assertion::Balance { account, expected } => {
                let actual = self.token.balance_of(account)?;
                ensure_eq("balance", expected, &actual)
            }
            Assertion::Allowance { owner, spender, expected } => {
                let actual = self.token.allowance(owner, spender)?;
                ensure_eq("allowance", expected, &actual)
            }
            Assertion::TotalSupply(expected) => {
                ensure_eq("total supply", expected, &self.token.total_supply())
            }
            Assertion::Locked { account, expected } => {
                ensure_eq("locked", expected, &self.token.is_locked(account)?)
            }
            Assertion::MintingFinished(expected) => {
                ensure_eq("minting finished", expected, &self.token.minting_finished())
            }
            Assertion::Invariants => {
                self.token.assert_invariants().map_err(StepFailure::Invariants)?;
                Ok(())
            }
            Assertion::HookCalled { contract, sender, value, data } => {
                let syscalls = &self.token.runtime().syscalls;
                let delivered = syscalls.delivered.borrow();
                let message = delivered
                    .iter()
                    .rev()
                    .find(|m| m.to == *contract)
                    .ok_or(StepFailure::HookNotCalled(*contract))?;
                let actual: TokenReceivedParams = message.params.deserialize()?;
                let expected = TokenReceivedParams {
                    sender: *sender,
                    value: value.clone(),
                    data: data.clone(),
                };
                ensure_eq("hook parameters", &expected, &actual)
            }
        }
    }
}

fn ensure_eq<T>(what: &'static str, expected: &T, actual: &T) -> Result<(), StepFailure>
where
    T: PartialEq + std::fmt::Debug,
{
    if expected != actual {
        return Err(StepFailure::Mismatch {
            what,
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        });
    }
    Ok(())
}
