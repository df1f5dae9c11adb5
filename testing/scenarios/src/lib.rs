//! Deterministic scenarios for the token ledger: a fake environment with a controllable clock and
//! fake contracts, and a runner that executes steps in order and checks their outcomes.

pub mod runner;
pub mod step;

pub use runner::{Scenario, ScenarioError, ScenarioReport, ScenarioRunner, StepFailure};
pub use step::{Assertion, Expectation, Operation, Outcome, Step};
