#![allow(dead_code)]

use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use ledger_scenarios::runner::LEDGER_ADDRESS;
use ledger_scenarios::step::Operation;
use ledger_scenarios::{Scenario, ScenarioError, ScenarioReport};

pub const TOKEN: Address = LEDGER_ADDRESS;

pub const ALICE: Address = Address::new_id(10);
pub const BOB: Address = Address::new_id(11);
pub const CAROL: Address = Address::new_id(12);

/// Contract implementing the ERC-677 hook
pub const RECEIVER: Address = Address::new_id(100);
/// Contract without an `onTokenTransfer` method
pub const NOT_ERC677: Address = Address::new_id(101);
/// Contract whose hook aborts
pub const REJECTING: Address = Address::new_id(102);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn atto(amount: i64) -> TokenAmount {
    TokenAmount::from_atto(amount)
}

pub fn deadbeef() -> RawBytes {
    RawBytes::new(vec![0xde, 0xad, 0xbe, 0xef])
}

/// A scenario whose ledger starts with `amount` minted to ALICE and minting closed
pub fn minted_to_alice(name: &str, amount: TokenAmount) -> Scenario {
    Scenario::new(name)
        .expect_ok(Operation::mint(&[ALICE], &[amount]))
        .expect_ok(Operation::FinishMinting)
}

/// Runs the scenario, panicking with the failing step if it doesn't pass
pub fn run(scenario: Scenario) -> ScenarioReport {
    init_logger();
    scenario.run().unwrap_or_else(|e| panic!("{e}"))
}

/// Runs a scenario that is expected to fail, returning the error
pub fn run_to_failure(scenario: Scenario) -> ScenarioError {
    init_logger();
    match scenario.run() {
        Ok(report) => panic!("scenario {:?} unexpectedly passed", report.scenario_name),
        Err(e) => e,
    }
}
