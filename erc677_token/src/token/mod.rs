use std::ops::Neg;

pub use error::{ErrorKind, TokenError};
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use ledger_utils::address::{is_zero_address, ZERO_ADDRESS};
use ledger_utils::clock::Timestamp;
use ledger_utils::receiver::{ReceiverHook, TokenReceivedParams};
use ledger_utils::runtime::LedgerRuntime;
use ledger_utils::syscalls::Syscalls;
use num_traits::Zero;

use self::config::TokenConfig;
use self::state::{StateError as TokenStateError, StateInvariantError, StateSummary, TokenState};
use self::types::{
    MintReturn, TokenEvent, TransferAndCallReturn, TransferFromReturn, TransferIntermediate,
    TransferReturn,
};

pub mod config;
mod error;
pub mod state;
pub mod types;

type Result<T> = std::result::Result<T, TokenError>;

/// Library functions that implement the ERC-20 token ledger with ERC-677 and lockup extensions
///
/// Holds injectable services to access the clock, the blockstore and other contracts.
pub struct Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Runtime services to interact with the execution environment
    runtime: LedgerRuntime<S, BS>,
    /// Reference to token state that will be inspected/mutated
    state: &'st mut TokenState,
    /// Supply cap and storage settings
    config: TokenConfig,
    /// Events of committed operations, oldest first
    events: Vec<TokenEvent>,
}

impl<'st, S, BS> Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Creates a new clean token state instance
    ///
    /// This should be wrapped in a Token handle for convenience.
    pub fn create_state(bs: &BS, config: &TokenConfig) -> Result<TokenState> {
        Ok(TokenState::new_with_bit_width(bs, config.hamt_bit_width)?)
    }

    /// Wrap an existing token state
    pub fn wrap(
        runtime: LedgerRuntime<S, BS>,
        config: TokenConfig,
        state: &'st mut TokenState,
    ) -> Self {
        Self { runtime, state, config, events: vec![] }
    }

    /// Get a reference to the wrapped state tree
    pub fn state(&self) -> &TokenState {
        self.state
    }

    /// Get a reference to the underlying runtime
    pub fn runtime(&self) -> &LedgerRuntime<S, BS> {
        &self.runtime
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Events emitted by committed operations, oldest first
    pub fn events(&self) -> &[TokenEvent] {
        &self.events
    }

    /// Takes the emitted events, leaving the log empty
    pub fn drain_events(&mut self) -> Vec<TokenEvent> {
        std::mem::take(&mut self.events)
    }

    /// Opens an atomic transaction on TokenState which allows a closure to make multiple
    /// modifications to the state tree and emit events.
    ///
    /// If the closure returns an error, the transaction is dropped atomically and neither the
    /// state changes nor the events are observed.
    fn transaction<F, Res>(&mut self, operation: &'static str, f: F) -> Result<Res>
    where
        F: FnOnce(&mut TokenState, &LedgerRuntime<S, BS>, &mut Vec<TokenEvent>) -> Result<Res>,
    {
        let mut mutable_state = self.state.clone();
        let mut pending = vec![];
        match f(&mut mutable_state, &self.runtime, &mut pending) {
            Ok(res) => {
                *self.state = mutable_state;
                log::debug!("{operation} committed, {} event(s)", pending.len());
                self.events.append(&mut pending);
                Ok(res)
            }
            Err(e) => {
                log::debug!("{operation} rejected ({}): {e}", e.kind());
                Err(e)
            }
        }
    }
}

impl<'st, S, BS> Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Gets the total number of tokens in existence
    ///
    /// This equals the sum of `balance_of` called on all addresses and the sum of all successful
    /// `mint` calls.
    pub fn total_supply(&self) -> TokenAmount {
        self.state.supply.clone()
    }

    pub fn minting_finished(&self) -> bool {
        self.state.minting_finished
    }

    /// Returns the balance associated with a particular address
    ///
    /// Accounts that have never received transfers implicitly have a zero-balance
    pub fn balance_of(&self, owner: &Address) -> Result<TokenAmount> {
        Ok(self.state.get_balance(&self.runtime, owner)?)
    }

    /// Gets the allowance between owner and spender
    ///
    /// An allowance is the amount that the spender can transfer out of the owner's account via
    /// `transfer_from`.
    pub fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        Ok(self.state.get_allowance_between(&self.runtime, owner, spender)?)
    }

    /// Returns the recorded lock expiry of an account, whether or not it has passed
    pub fn lock_expiry(&self, account: &Address) -> Result<Option<Timestamp>> {
        Ok(self.state.get_lock(&self.runtime, account)?)
    }

    /// Whether transfers out of the account are currently rejected
    pub fn is_locked(&self, account: &Address) -> Result<bool> {
        let now = self.runtime.now();
        Ok(self.lock_expiry(account)?.map_or(false, |expiry| now < expiry))
    }

    /// Mints the amounts into the recipients' accounts
    ///
    /// - Minting MUST NOT have been finished
    /// - There MUST be exactly one non-negative amount per recipient
    /// - The resulting total supply MUST NOT exceed the supply cap
    ///
    /// The batch applies as a whole or not at all. Emits `Transfer(zero, recipient, amount)` per
    /// recipient, including zero amounts.
    pub fn mint(&mut self, recipients: &[Address], amounts: &[TokenAmount]) -> Result<MintReturn> {
        let cap = self.config.supply_cap.clone();
        self.transaction("mint", |state, runtime, events| {
            if state.minting_finished {
                return Err(TokenError::MintingClosed);
            }
            validate_batch("recipients", recipients.len(), "amounts", amounts.len())?;
            for amount in amounts {
                validate_amount(amount, "mint")?;
            }

            let requested =
                amounts.iter().fold(TokenAmount::zero(), |sum, amount| sum + amount.clone());
            if &state.supply + &requested > cap {
                return Err(TokenError::SupplyCapExceeded {
                    supply: state.supply.clone(),
                    requested,
                    cap,
                });
            }

            for (recipient, amount) in recipients.iter().zip(amounts) {
                state.change_balance_by(runtime, recipient, amount)?;
                events.push(TokenEvent::transfer(ZERO_ADDRESS, *recipient, amount.clone()));
            }
            let supply = state.change_supply_by(&requested)?.clone();

            Ok(MintReturn { supply })
        })
    }

    /// Closes minting for good
    ///
    /// Calling it again has no further effect.
    pub fn finish_minting(&mut self) {
        if !self.state.minting_finished {
            log::debug!("minting finished at supply {}", self.state.supply);
        }
        self.state.minting_finished = true;
    }

    /// Transfers an amount from one address to another
    ///
    /// - The requested value MUST be non-negative
    /// - The destination MUST NOT be the zero address or the ledger itself
    /// - The sender MUST NOT be locked
    /// - The requested value MUST NOT exceed the sender's balance
    ///
    /// Zero-value and self transfers are ordinary transfers and emit a `Transfer` event.
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferReturn> {
        self.transaction("transfer", |state, runtime, events| {
            let (from_balance, to_balance) = checked_transfer(state, runtime, from, to, amount)?;
            events.push(TokenEvent::transfer(*from, *to, amount.clone()));
            Ok(TransferReturn { from_balance, to_balance })
        })
    }

    /// Sets the allowance of a spender over the owner's balance, returning the old allowance
    ///
    /// The new allowance replaces the old one, it is never added to it. No balance is required.
    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        self.transaction("approve", |state, runtime, events| {
            let amount = validate_amount(amount, "approve")?;
            let old_allowance = state.set_allowance(runtime, owner, spender, amount)?;
            events.push(TokenEvent::approval(*owner, *spender, amount.clone()));
            Ok(old_allowance)
        })
    }

    /// Transfers an amount out of the owner's account on behalf of a spender
    ///
    /// - The requested value MUST be non-negative
    /// - The destination MUST NOT be the zero address or the ledger itself
    /// - The owner MUST NOT be locked
    /// - The spender MUST have an allowance not less than the requested value, even when the
    ///   spender is the owner
    /// - The requested value MUST NOT exceed the owner's balance
    ///
    /// Upon success the allowance decreases by the requested value and `Transfer(owner, to,
    /// value)` is emitted.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferFromReturn> {
        self.transaction("transfer_from", |state, runtime, events| {
            let amount = validate_amount(amount, "transfer_from")?;
            validate_destination(runtime, to)?;
            ensure_unlocked(state, runtime, owner)?;
            let allowance = state.attempt_use_allowance(runtime, spender, owner, amount)?;
            let (from_balance, to_balance) = move_balance(state, runtime, owner, to, amount)?;
            events.push(TokenEvent::transfer(*owner, *to, amount.clone()));
            Ok(TransferFromReturn { from_balance, to_balance, allowance })
        })
    }

    /// Locks each account until its paired expiry
    ///
    /// A later lock replaces an earlier one for the same account, even if it expires sooner.
    pub fn lock_tokens(&mut self, accounts: &[Address], expiries: &[Timestamp]) -> Result<()> {
        self.transaction("lock_tokens", |state, runtime, _| {
            validate_batch("accounts", accounts.len(), "expiries", expiries.len())?;
            for (account, expiry) in accounts.iter().zip(expiries) {
                state.set_lock(runtime, account, *expiry)?;
            }
            Ok(())
        })
    }

    /// Transfers tokens and notifies the recipient, as specified by ERC-677
    ///
    /// Applies the same checks as `transfer` and emits both `Transfer` and `TransferWithData`.
    /// If the recipient is a contract its `onTokenTransfer(sender, value, data)` hook is called
    /// once balances are updated. Should the hook abort, or the contract not implement it, the
    /// transfer and its events are reverted.
    pub fn transfer_and_call(
        &mut self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
        data: RawBytes,
    ) -> Result<TransferAndCallReturn> {
        let snapshot = self.state.clone();
        let committed_events = self.events.len();

        let event_data = data.clone();
        let intermediate = self.transaction("transfer_and_call", |state, runtime, events| {
            checked_transfer(state, runtime, from, to, amount)?;
            events.push(TokenEvent::transfer(*from, *to, amount.clone()));
            events.push(TokenEvent::transfer_with_data(*from, *to, amount.clone(), event_data));
            Ok(TransferIntermediate {
                from: *from,
                to: *to,
                hook_called: false,
                recipient_data: RawBytes::default(),
            })
        })?;

        if !self.runtime.is_contract(to) {
            return self.transfer_and_call_return(intermediate);
        }

        let params = TokenReceivedParams { sender: *from, value: amount.clone(), data };
        let mut hook = ReceiverHook::new(*to, params, intermediate);
        match hook.call(&self.runtime) {
            Ok(intermediate) => self.transfer_and_call_return(intermediate),
            Err(e) => {
                *self.state = snapshot;
                self.events.truncate(committed_events);
                let err = TokenError::from(e);
                log::debug!("transfer_and_call reverted ({}): {err}", err.kind());
                Err(err)
            }
        }
    }

    /// Generate TransferAndCallReturn from the intermediate data returned by a receiver hook call
    fn transfer_and_call_return(
        &self,
        intermediate: TransferIntermediate,
    ) -> Result<TransferAndCallReturn> {
        Ok(TransferAndCallReturn {
            from_balance: self.balance_of(&intermediate.from)?,
            to_balance: self.balance_of(&intermediate.to)?,
            hook_called: intermediate.hook_called,
            recipient_data: intermediate.recipient_data,
        })
    }

    /// Checks the state invariants, throwing an error if they are not met
    pub fn assert_invariants(&self) -> std::result::Result<StateSummary, Vec<StateInvariantError>> {
        let (summary, errors) = self.check_invariants();
        match errors.is_empty() {
            true => Ok(summary),
            false => Err(errors),
        }
    }

    /// Checks the state invariants, returning a state summary and list of errors
    pub fn check_invariants(&self) -> (StateSummary, Vec<StateInvariantError>) {
        self.state.check_invariants(&self.runtime, &self.config.supply_cap)
    }
}

/// Runs the checks shared by `transfer` and `transfer_and_call`, then moves the balance
fn checked_transfer<S: Syscalls, BS: Blockstore>(
    state: &mut TokenState,
    runtime: &LedgerRuntime<S, BS>,
    from: &Address,
    to: &Address,
    amount: &TokenAmount,
) -> Result<(TokenAmount, TokenAmount)> {
    let amount = validate_amount(amount, "transfer")?;
    validate_destination(runtime, to)?;
    ensure_unlocked(state, runtime, from)?;
    move_balance(state, runtime, from, to, amount)
}

/// Moves an amount between two balances, returning the new (from, to) balances
fn move_balance<BS: Blockstore>(
    state: &mut TokenState,
    bs: &BS,
    from: &Address,
    to: &Address,
    amount: &TokenAmount,
) -> Result<(TokenAmount, TokenAmount)> {
    // don't change balance if to == from, but must check that the transfer doesn't exceed balance
    if from == to {
        let balance = state.get_balance(bs, from)?;
        if balance.lt(amount) {
            return Err(TokenStateError::InsufficientBalance {
                owner: *from,
                balance,
                delta: amount.neg(),
            }
            .into());
        }
        return Ok((balance.clone(), balance));
    }

    let from_balance = state.change_balance_by(bs, from, &amount.neg())?;
    let to_balance = state.change_balance_by(bs, to, amount)?;
    Ok((from_balance, to_balance))
}

fn validate_destination<S: Syscalls, BS: Blockstore>(
    runtime: &LedgerRuntime<S, BS>,
    to: &Address,
) -> Result<()> {
    if is_zero_address(to) || *to == runtime.token_address() {
        return Err(TokenError::InvalidDestination(*to));
    }
    Ok(())
}

/// Rejects the operation if the account's lock has not yet expired at the current time
fn ensure_unlocked<S: Syscalls, BS: Blockstore>(
    state: &TokenState,
    runtime: &LedgerRuntime<S, BS>,
    account: &Address,
) -> Result<()> {
    if let Some(expiry) = state.get_lock(runtime, account)? {
        let now = runtime.now();
        if now < expiry {
            return Err(TokenError::AccountLocked { account: *account, expiry, now });
        }
    }
    Ok(())
}

fn validate_batch(
    left_name: &'static str,
    left: usize,
    right_name: &'static str,
    right: usize,
) -> Result<()> {
    if left != right {
        return Err(TokenError::BatchLengthMismatch { left_name, left, right_name, right });
    }
    Ok(())
}

/// Validates that a token amount is non-negative
///
/// Returns the argument, or an error.
pub fn validate_amount<'a>(a: &'a TokenAmount, name: &'static str) -> Result<&'a TokenAmount> {
    if a.is_negative() {
        return Err(TokenError::InvalidNegative { name, amount: a.clone() });
    }
    Ok(a)
}


#[cfg(test)]
mod property_tests {
    use fvm_ipld_blockstore::MemoryBlockstore;
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;
    use ledger_utils::runtime::LedgerRuntime;
    use ledger_utils::syscalls::FakeSyscalls;
    use proptest::prelude::*;

    use super::config::TokenConfig;
    use super::Token;

    proptest! {
        #[test]
        fn transfers_preserve_supply(
            minted in 0u64..1_000_000,
            moves in prop::collection::vec((0u64..4, 0u64..4, 0u64..2_000), 0..20),
        ) {
            let runtime = LedgerRuntime::<FakeSyscalls, MemoryBlockstore>::new_test_runtime();
            let mut state = Token::<FakeSyscalls, MemoryBlockstore>::create_state(
                runtime.bs(),
                &TokenConfig::default(),
            )
            .unwrap();
            let mut token = Token::wrap(runtime, TokenConfig::default(), &mut state);

            let accounts: Vec<Address> = (10..14).map(Address::new_id).collect();
            token.mint(&accounts[..1], &[TokenAmount::from_atto(minted)]).unwrap();

            for (from, to, amount) in moves {
                // failures are fine, they must just leave no trace
                let _ = token.transfer(
                    &accounts[from as usize],
                    &accounts[to as usize],
                    &TokenAmount::from_atto(amount),
                );
            }

            let summary = token.assert_invariants().unwrap();
            prop_assert_eq!(summary.total_supply, TokenAmount::from_atto(minted));
        }
    }
}
