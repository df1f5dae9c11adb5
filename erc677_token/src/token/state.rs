use std::collections::HashMap;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_hamt::Hamt;
use fvm_ipld_hamt::{BytesKey, Error as HamtError};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use ledger_utils::clock::Timestamp;
use num_traits::Zero;
use thiserror::Error;

/// Bit-width of the balance, allowance and lock maps unless the config overrides it
pub const DEFAULT_HAMT_BIT_WIDTH: u32 = 3;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("ipld hamt error: {0}")]
    IpldHamt(#[from] HamtError),
    #[error(
        "negative balance caused by decreasing {owner:?}'s balance of {balance:?} by {delta:?}"
    )]
    InsufficientBalance { owner: Address, balance: TokenAmount, delta: TokenAmount },
    #[error(
        "{spender:?} attempted to utilise {delta:?} of allowance {allowance:?} set by {owner:?}"
    )]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: TokenAmount,
        delta: TokenAmount,
    },
    #[error("total_supply cannot be negative, cannot apply delta of {delta:?} to {supply:?}")]
    NegativeTotalSupply { supply: TokenAmount, delta: TokenAmount },
    #[error("allowance cannot be negative, cannot set allowance between {owner:?} and {spender:?} to {amount:?}")]
    NegativeAllowance { amount: TokenAmount, owner: Address, spender: Address },
}

#[derive(Error, Debug)]
pub enum StateInvariantError {
    #[error("total supply was negative: {0}")]
    SupplyNegative(TokenAmount),
    #[error("total supply {supply:?} exceeds the cap of {cap:?}")]
    SupplyAboveCap { supply: TokenAmount, cap: TokenAmount },
    #[error("the account for {account:?} had a negative balance of {balance:?}")]
    BalanceNegative { account: Address, balance: TokenAmount },
    #[error("the total supply {supply:?} does not match the sum of all balances {balance_sum:?}")]
    BalanceSupplyMismatch { supply: TokenAmount, balance_sum: TokenAmount },
    #[error(
        "a negative allowance of {allowance:?} was specified between {owner:?} and {spender:?}"
    )]
    NegativeAllowance { owner: Address, spender: Address, allowance: TokenAmount },
    #[error("stored a zero balance which should have been removed for {0}")]
    ExplicitZeroBalance(Address),
    #[error(
        "stored a zero allowance which should have been removed between {owner:?} and {spender:?}"
    )]
    ExplicitZeroAllowance { owner: Address, spender: Address },
    #[error("stored an allowance map for {0} though they have specified no allowances")]
    ExplicitEmptyAllowance(Address),
    #[error("invalid serialized address key {0:?}")]
    InvalidKey(BytesKey),
    #[error("underlying state error {0}")]
    State(#[from] StateError),
}

type Result<T> = std::result::Result<T, StateError>;

type Map<'bs, BS, K, V> = Hamt<&'bs BS, V, K>;
type BalanceMap<'bs, BS> = Map<'bs, BS, BytesKey, TokenAmount>;
type AllowanceMap<'bs, BS> = Map<'bs, BS, BytesKey, Cid>;
type SpenderAllowanceMap<'bs, BS> = Map<'bs, BS, BytesKey, TokenAmount>;
type LockMap<'bs, BS> = Map<'bs, BS, BytesKey, Timestamp>;

/// Token ledger state tree
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct TokenState {
    /// Total supply of token
    pub supply: TokenAmount,
    /// Map<Address, TokenAmount> of balances as a Hamt
    pub balances: Cid,
    /// Map<Address, Map<Address, TokenAmount>> as a Hamt. Allowances are stored allowances[owner][spender]
    pub allowances: Cid,
    /// Map<Address, Timestamp> of lock expiries as a Hamt
    pub locks: Cid,
    /// Once set, minting is rejected forever
    pub minting_finished: bool,
    /// Bit-width to use when loading Hamts
    hamt_bit_width: u32,
}

/// An abstraction over the IPLD layer to get and modify token state without dealing with HAMTs etc.
///
/// This is a simple wrapper of state and in general does not account for token protocol level
/// checks such as ensuring destinations are valid or accounts are unlocked. This is left for the
/// caller to handle. However, some invariants such as non-negative balances, allowances and total
/// supply are enforced.
impl TokenState {
    /// Create a new token state-tree, without committing it (the root cid) to a blockstore
    pub fn new<BS: Blockstore>(store: &BS) -> Result<Self> {
        Self::new_with_bit_width(store, DEFAULT_HAMT_BIT_WIDTH)
    }

    /// Create a new token state-tree, without committing it (the root cid) to a blockstore
    ///
    /// Explicitly sets the bit width of underlying Hamt structures. Caller must ensure
    /// 1 <= hamt_bit_width <= 8.
    pub fn new_with_bit_width<BS: Blockstore>(store: &BS, hamt_bit_width: u32) -> Result<Self> {
        // Blockstore is still needed to create valid Cids for the Hamts
        let empty_balance_map = BalanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;
        let empty_allowances_map =
            AllowanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;
        let empty_lock_map = LockMap::new_with_bit_width(store, hamt_bit_width).flush()?;

        Ok(Self {
            supply: Default::default(),
            balances: empty_balance_map,
            allowances: empty_allowances_map,
            locks: empty_lock_map,
            minting_finished: false,
            hamt_bit_width,
        })
    }

    pub fn hamt_bit_width(&self) -> u32 {
        self.hamt_bit_width
    }

    /// Get the balance of an account from the currently stored state
    pub fn get_balance<BS: Blockstore>(&self, bs: &BS, owner: &Address) -> Result<TokenAmount> {
        let balances = self.get_balance_map(bs)?;

        let balance = match balances.get(&address_key(owner))? {
            Some(amount) => amount.clone(),
            None => TokenAmount::zero(),
        };

        Ok(balance)
    }

    /// Changes the balance of the specified account by the delta
    ///
    /// Caller must ensure that the sign of of the delta is consistent with token rules (i.e.
    /// negative transfers are not allowed). Returns the new balance of the account.
    pub fn change_balance_by<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        if delta.is_zero() {
            // This is a no-op as far as mutating state
            return self.get_balance(bs, owner);
        }

        let mut balance_map = self.get_balance_map(bs)?;
        let owner_key = address_key(owner);
        let balance = match balance_map.get(&owner_key)? {
            Some(amount) => amount.clone(),
            None => TokenAmount::zero(),
        };

        let new_balance = &balance + delta;

        if new_balance.is_negative() {
            return Err(StateError::InsufficientBalance {
                balance,
                delta: delta.clone(),
                owner: *owner,
            });
        }

        if new_balance.is_zero() {
            balance_map.delete(&owner_key)?;
        } else {
            balance_map.set(owner_key, new_balance.clone())?;
        }

        self.balances = balance_map.flush()?;

        Ok(new_balance)
    }

    /// Retrieve the balance map as a HAMT
    pub fn get_balance_map<'bs, BS: Blockstore>(&self, bs: &'bs BS) -> Result<BalanceMap<'bs, BS>> {
        Ok(BalanceMap::load_with_bit_width(&self.balances, bs, self.hamt_bit_width)?)
    }

    /// Retrieve the number of token holders
    ///
    /// This involves iterating through the entire HAMT
    pub fn count_balances<BS: Blockstore>(&self, bs: &BS) -> Result<usize> {
        let mut count = 0;
        self.get_balance_map(bs)?.for_each(|_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Increase/decrease the total supply by the specified value
    ///
    /// Returns the new total supply
    pub fn change_supply_by(&mut self, delta: &TokenAmount) -> Result<&TokenAmount> {
        let new_supply = &self.supply + delta;
        if new_supply.is_negative() {
            return Err(StateError::NegativeTotalSupply {
                supply: self.supply.clone(),
                delta: delta.clone(),
            });
        }

        self.supply = new_supply;
        Ok(&self.supply)
    }

    /// Get the allowance that an owner has approved for a spender
    ///
    /// If an existing allowance cannot be found, it is implicitly assumed to be zero
    pub fn get_allowance_between<BS: Blockstore>(
        &self,
        bs: &BS,
        owner: &Address,
        spender: &Address,
    ) -> Result<TokenAmount> {
        let owner_allowances = self.get_owner_allowance_map(bs, owner)?;
        match owner_allowances {
            Some(map) => match map.get(&address_key(spender))? {
                Some(allowance) => Ok(allowance.clone()),
                None => Ok(TokenAmount::zero()),
            },
            None => Ok(TokenAmount::zero()),
        }
    }

    /// Revokes an approved allowance by removing the entry from the owner-spender map
    ///
    /// If that map becomes empty, it is removed from the root map. Returns the old allowance
    pub fn revoke_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: &Address,
        spender: &Address,
    ) -> Result<TokenAmount> {
        let Some(mut map) = self.get_owner_allowance_map(bs, owner)? else {
            // no allowance map exists, there is nothing to do
            return Ok(TokenAmount::zero());
        };

        let old_allowance = match map.delete(&address_key(spender))? {
            Some((_, amount)) => amount,
            None => TokenAmount::zero(),
        };

        let owner_key = address_key(owner);
        let mut root_allowance_map = self.get_allowances_map(bs)?;
        if map.is_empty() {
            root_allowance_map.delete(&owner_key)?;
        } else {
            root_allowance_map.set(owner_key, map.flush()?)?;
        }
        self.allowances = root_allowance_map.flush()?;

        Ok(old_allowance)
    }

    /// Set the allowance between owner and spender to a specific amount, returning the old allowance
    pub fn set_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        if amount.is_negative() {
            return Err(StateError::NegativeAllowance {
                owner: *owner,
                spender: *spender,
                amount: amount.clone(),
            });
        }

        if amount.is_zero() {
            return self.revoke_allowance(bs, owner, spender);
        }

        let mut root_allowances_map = self.get_allowances_map(bs)?;

        let owner_key = address_key(owner);
        let mut allowance_map = match root_allowances_map.get(&owner_key)? {
            Some(cid) => SpenderAllowanceMap::load_with_bit_width(cid, bs, self.hamt_bit_width)?,
            None => SpenderAllowanceMap::new_with_bit_width(bs, self.hamt_bit_width),
        };

        let spender_key = address_key(spender);
        let old_allowance = match allowance_map.get(&spender_key)? {
            Some(a) => a.clone(),
            None => TokenAmount::zero(),
        };

        allowance_map.set(spender_key, amount.clone())?;
        root_allowances_map.set(owner_key, allowance_map.flush()?)?;
        self.allowances = root_allowances_map.flush()?;

        Ok(old_allowance)
    }

    /// Atomically checks if value is less than the allowance and deducts it if so
    ///
    /// Returns new allowance if successful, else returns an error and the allowance is unchanged
    pub fn attempt_use_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        spender: &Address,
        owner: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let current_allowance = self.get_allowance_between(bs, owner, spender)?;

        if current_allowance.lt(amount) {
            return Err(StateError::InsufficientAllowance {
                owner: *owner,
                spender: *spender,
                allowance: current_allowance,
                delta: amount.clone(),
            });
        }

        if amount.is_zero() {
            return Ok(current_allowance);
        }

        let new_allowance = &current_allowance - amount;
        self.set_allowance(bs, owner, spender, &new_allowance)?;
        Ok(new_allowance)
    }

    /// Get the allowances map of a specific owner, resolving the CID link to a Hamt
    ///
    /// Ok(Some) if the owner has allocated allowances to other accounts
    /// Ok(None) if the owner has no current non-zero allowances to other accounts
    /// Err if operations on the underlying Hamt failed
    pub fn get_owner_allowance_map<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
        owner: &Address,
    ) -> Result<Option<SpenderAllowanceMap<'bs, BS>>> {
        let allowances_map = self.get_allowances_map(bs)?;
        let owner_allowances = match allowances_map.get(&address_key(owner))? {
            Some(cid) => {
                Some(SpenderAllowanceMap::load_with_bit_width(cid, bs, self.hamt_bit_width)?)
            }
            None => None,
        };
        Ok(owner_allowances)
    }

    /// Get the root allowances map
    ///
    /// Gets a HAMT with CIDs linking to other HAMTs
    pub fn get_allowances_map<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
    ) -> Result<AllowanceMap<'bs, BS>> {
        Ok(AllowanceMap::load_with_bit_width(&self.allowances, bs, self.hamt_bit_width)?)
    }

    /// Returns the lock expiry recorded for an account, if any
    pub fn get_lock<BS: Blockstore>(&self, bs: &BS, account: &Address) -> Result<Option<Timestamp>> {
        let locks = self.get_lock_map(bs)?;
        Ok(locks.get(&address_key(account))?.copied())
    }

    /// Records the lock expiry of an account, returning the previous expiry
    pub fn set_lock<BS: Blockstore>(
        &mut self,
        bs: &BS,
        account: &Address,
        expiry: Timestamp,
    ) -> Result<Option<Timestamp>> {
        let mut locks = self.get_lock_map(bs)?;
        let old = locks.set(address_key(account), expiry)?;
        self.locks = locks.flush()?;
        Ok(old)
    }

    pub fn get_lock_map<'bs, BS: Blockstore>(&self, bs: &'bs BS) -> Result<LockMap<'bs, BS>> {
        Ok(LockMap::load_with_bit_width(&self.locks, bs, self.hamt_bit_width)?)
    }

    /// Checks that the current state obeys all system invariants
    ///
    /// Checks that there are no zero balances, zero allowances or empty allowance maps explicitly
    /// stored in the blockstore. Checks that balances, total supply, allowances are never negative.
    /// Checks that sum of all balances matches total_supply and that the supply is within the cap.
    ///
    /// Returns a state summary that can be used to check application specific invariants, along
    /// with every violation found.
    pub fn check_invariants<BS: Blockstore>(
        &self,
        bs: &BS,
        supply_cap: &TokenAmount,
    ) -> (StateSummary, Vec<StateInvariantError>) {
        let mut errors = vec![];

        if self.supply.is_negative() {
            errors.push(StateInvariantError::SupplyNegative(self.supply.clone()));
        }
        if self.supply.gt(supply_cap) {
            errors.push(StateInvariantError::SupplyAboveCap {
                supply: self.supply.clone(),
                cap: supply_cap.clone(),
            });
        }

        let balances = self.check_balances(bs, &mut errors);
        let allowances = self.check_allowances(bs, &mut errors);
        let locks = self.collect_locks(bs, &mut errors);

        let summary =
            StateSummary { balances, allowances, locks, total_supply: self.supply.clone() };
        (summary, errors)
    }

    fn check_balances<BS: Blockstore>(
        &self,
        bs: &BS,
        errors: &mut Vec<StateInvariantError>,
    ) -> HashMap<Address, TokenAmount> {
        let mut balances = HashMap::new();
        let balance_map = match self.get_balance_map(bs) {
            Ok(map) => map,
            Err(e) => {
                errors.push(e.into());
                return balances;
            }
        };

        let mut balance_sum = TokenAmount::zero();
        let res = balance_map.for_each(|owner_key, balance| {
            let Some(owner) = decode_address(owner_key) else {
                errors.push(StateInvariantError::InvalidKey(owner_key.clone()));
                return Ok(());
            };
            if balance.is_negative() {
                errors.push(StateInvariantError::BalanceNegative {
                    account: owner,
                    balance: balance.clone(),
                });
            }
            // zero balances should not be stored in the Hamt
            if balance.is_zero() {
                errors.push(StateInvariantError::ExplicitZeroBalance(owner));
            }
            balance_sum += balance.clone();
            balances.insert(owner, balance.clone());
            Ok(())
        });
        if let Err(e) = res {
            errors.push(StateError::from(e).into());
        }

        if balance_sum.ne(&self.supply) {
            errors.push(StateInvariantError::BalanceSupplyMismatch {
                supply: self.supply.clone(),
                balance_sum,
            });
        }

        balances
    }

    fn check_allowances<BS: Blockstore>(
        &self,
        bs: &BS,
        errors: &mut Vec<StateInvariantError>,
    ) -> HashMap<Address, HashMap<Address, TokenAmount>> {
        let mut allowances = HashMap::new();
        let root_map = match self.get_allowances_map(bs) {
            Ok(map) => map,
            Err(e) => {
                errors.push(e.into());
                return allowances;
            }
        };

        let res = root_map.for_each(|owner_key, cid| {
            let Some(owner) = decode_address(owner_key) else {
                errors.push(StateInvariantError::InvalidKey(owner_key.clone()));
                return Ok(());
            };
            let spender_map =
                SpenderAllowanceMap::load_with_bit_width(cid, bs, self.hamt_bit_width)?;
            if spender_map.is_empty() {
                errors.push(StateInvariantError::ExplicitEmptyAllowance(owner));
            }

            let owner_allowances: &mut HashMap<Address, TokenAmount> =
                allowances.entry(owner).or_default();
            spender_map.for_each(|spender_key, allowance| {
                let Some(spender) = decode_address(spender_key) else {
                    errors.push(StateInvariantError::InvalidKey(spender_key.clone()));
                    return Ok(());
                };
                if allowance.is_negative() {
                    errors.push(StateInvariantError::NegativeAllowance {
                        owner,
                        spender,
                        allowance: allowance.clone(),
                    });
                }
                if allowance.is_zero() {
                    errors.push(StateInvariantError::ExplicitZeroAllowance { owner, spender });
                }
                owner_allowances.insert(spender, allowance.clone());
                Ok(())
            })?;
            Ok(())
        });
        if let Err(e) = res {
            errors.push(StateError::from(e).into());
        }

        allowances
    }

    fn collect_locks<BS: Blockstore>(
        &self,
        bs: &BS,
        errors: &mut Vec<StateInvariantError>,
    ) -> HashMap<Address, Timestamp> {
        let mut locks = HashMap::new();
        let lock_map = match self.get_lock_map(bs) {
            Ok(map) => map,
            Err(e) => {
                errors.push(e.into());
                return locks;
            }
        };

        let res = lock_map.for_each(|key, expiry| {
            match decode_address(key) {
                Some(account) => {
                    locks.insert(account, *expiry);
                }
                None => errors.push(StateInvariantError::InvalidKey(key.clone())),
            }
            Ok(())
        });
        if let Err(e) = res {
            errors.push(StateError::from(e).into());
        }

        locks
    }
}

pub fn address_key(a: &Address) -> BytesKey {
    a.to_bytes().into()
}

pub fn decode_address(key: &BytesKey) -> Option<Address> {
    Address::from_bytes(&key.0).ok()
}

/// A summary of the current state to allow checking application specific invariants
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateSummary {
    pub balances: HashMap<Address, TokenAmount>,
    pub allowances: HashMap<Address, HashMap<Address, TokenAmount>>,
    pub locks: HashMap<Address, Timestamp>,
    pub total_supply: TokenAmount,
}

#[cfg(test)]
mod test {
    use fvm_ipld_blockstore::MemoryBlockstore;
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;
    use num_traits::Zero;

    use super::{
        address_key, SpenderAllowanceMap, StateError, StateInvariantError, TokenState,
    };

    const OWNER: &Address = &Address::new_id(1);
    const SPENDER: &Address = &Address::new_id(2);

    fn cap() -> TokenAmount {
        TokenAmount::from_whole(1_000_000_000)
    }

    #[test]
    fn it_instantiates() {
        let bs = &MemoryBlockstore::new();
        let state = TokenState::new(bs).unwrap();
        assert_eq!(state.supply, TokenAmount::zero());
        assert!(!state.minting_finished);
        assert_eq!(state.hamt_bit_width(), 3);

        let (summary, errors) = state.check_invariants(bs, &cap());
        assert!(errors.is_empty());
        assert!(summary.balances.is_empty());
    }

    #[test]
    fn it_increases_balance_from_zero() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();

        // Initially any account has an implicit balance of 0
        assert_eq!(state.get_balance(bs, OWNER).unwrap(), TokenAmount::zero());

        let amount = TokenAmount::from_atto(100);
        state.change_balance_by(bs, OWNER, &amount).unwrap();

        assert_eq!(state.get_balance(bs, OWNER).unwrap(), amount);
        assert_eq!(state.count_balances(bs).unwrap(), 1);
    }

    #[test]
    fn it_fails_to_decrease_balance_below_zero() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();

        // can't decrease from zero
        state.change_balance_by(bs, OWNER, &TokenAmount::from_atto(-1)).unwrap_err();
        let balance = state.get_balance(bs, OWNER).unwrap();
        assert_eq!(balance, TokenAmount::zero());

        // can't become negative from a positive balance
        state.change_balance_by(bs, OWNER, &TokenAmount::from_atto(50)).unwrap();
        let err = state.change_balance_by(bs, OWNER, &TokenAmount::from_atto(-100)).unwrap_err();
        if let StateError::InsufficientBalance { owner, balance, delta } = err {
            assert_eq!(owner, *OWNER);
            assert_eq!(balance, TokenAmount::from_atto(50));
            assert_eq!(delta, TokenAmount::from_atto(-100));
        } else {
            panic!("unexpected error {err:?}");
        }
    }

    #[test]
    fn it_removes_emptied_balances() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();

        state.change_balance_by(bs, OWNER, &TokenAmount::from_atto(50)).unwrap();
        state.change_balance_by(bs, OWNER, &TokenAmount::from_atto(-50)).unwrap();
        assert_eq!(state.count_balances(bs).unwrap(), 0);
        assert!(!state.get_balance_map(bs).unwrap().contains_key(&address_key(OWNER)).unwrap());
    }

    #[test]
    fn it_sets_allowances_between_accounts() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();

        let allowance = TokenAmount::from_atto(100);
        let old_allowance = state.set_allowance(bs, OWNER, SPENDER, &allowance).unwrap();
        assert_eq!(old_allowance, TokenAmount::zero());
        assert_eq!(state.get_allowance_between(bs, OWNER, SPENDER).unwrap(), allowance);

        // overwrites rather than accumulates
        let allowance = TokenAmount::from_atto(120);
        let old_allowance = state.set_allowance(bs, OWNER, SPENDER, &allowance).unwrap();
        assert_eq!(old_allowance, TokenAmount::from_atto(100));
        assert_eq!(state.get_allowance_between(bs, OWNER, SPENDER).unwrap(), allowance);

        // can set a zero-allowance
        let old_allowance = state.set_allowance(bs, OWNER, SPENDER, &TokenAmount::zero()).unwrap();
        assert_eq!(old_allowance, TokenAmount::from_atto(120));
        assert_eq!(state.get_allowance_between(bs, OWNER, SPENDER).unwrap(), TokenAmount::zero());
        let root_map = state.get_allowances_map(bs).unwrap();
        assert!(!root_map.contains_key(&address_key(OWNER)).unwrap());

        // can't set negative allowance
        let allowance = TokenAmount::from_atto(-50);
        let err = state.set_allowance(bs, OWNER, SPENDER, &allowance).unwrap_err();
        if let StateError::NegativeAllowance { amount, .. } = err {
            assert_eq!(amount, allowance);
        } else {
            panic!("unexpected error {err:?}");
        }
    }

    #[test]
    fn it_consumes_allowances_atomically() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();

        state.set_allowance(bs, OWNER, SPENDER, &TokenAmount::from_atto(100)).unwrap();

        let new_allowance =
            state.attempt_use_allowance(bs, SPENDER, OWNER, &TokenAmount::from_atto(60)).unwrap();
        assert_eq!(new_allowance, TokenAmount::from_atto(40));
        assert_eq!(
            state.get_allowance_between(bs, OWNER, SPENDER).unwrap(),
            TokenAmount::from_atto(40)
        );

        // cannot consume more allowance than approved
        state.attempt_use_allowance(bs, SPENDER, OWNER, &TokenAmount::from_atto(50)).unwrap_err();
        assert_eq!(
            state.get_allowance_between(bs, OWNER, SPENDER).unwrap(),
            TokenAmount::from_atto(40)
        );

        // using up the allowance removes the entry and the emptied owner map
        let new_allowance =
            state.attempt_use_allowance(bs, SPENDER, OWNER, &TokenAmount::from_atto(40)).unwrap();
        assert_eq!(new_allowance, TokenAmount::zero());
        assert!(!state.get_allowances_map(bs).unwrap().contains_key(&address_key(OWNER)).unwrap());
        let (_, errors) = state.check_invariants(bs, &cap());
        assert!(errors.is_empty());

        // a zero amount needs no allowance at all
        state.attempt_use_allowance(bs, OWNER, SPENDER, &TokenAmount::zero()).unwrap();
    }

    #[test]
    fn it_revokes_allowances() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();

        state.set_allowance(bs, OWNER, SPENDER, &TokenAmount::from_atto(200)).unwrap();
        assert_eq!(
            state.get_allowance_between(bs, OWNER, SPENDER).unwrap(),
            TokenAmount::from_atto(200)
        );

        let old = state.revoke_allowance(bs, OWNER, SPENDER).unwrap();
        assert_eq!(old, TokenAmount::from_atto(200));
        assert_eq!(state.get_allowance_between(bs, OWNER, SPENDER).unwrap(), TokenAmount::zero());

        // revoking again is a no-op
        assert_eq!(state.revoke_allowance(bs, OWNER, SPENDER).unwrap(), TokenAmount::zero());
    }

    #[test]
    fn it_records_locks() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();

        assert_eq!(state.get_lock(bs, OWNER).unwrap(), None);
        assert_eq!(state.set_lock(bs, OWNER, 1_000).unwrap(), None);
        assert_eq!(state.get_lock(bs, OWNER).unwrap(), Some(1_000));

        // later locks overwrite earlier ones, even when shorter
        assert_eq!(state.set_lock(bs, OWNER, 10).unwrap(), Some(1_000));
        assert_eq!(state.get_lock(bs, OWNER).unwrap(), Some(10));
        assert_eq!(state.get_lock(bs, SPENDER).unwrap(), None);
    }

    #[test]
    fn it_allows_variable_bit_width() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new_with_bit_width(bs, 8).unwrap();
        let amount = TokenAmount::from_whole(5);
        for id in 0_u64..10_u64 {
            state.change_balance_by(bs, &Address::new_id(id), &amount).unwrap();
            state.change_supply_by(&amount).unwrap();
        }

        let cloned = state.clone();
        assert_eq!(cloned.hamt_bit_width(), 8);
        for id in 0_u64..10_u64 {
            // loading the hamts with the wrong bitwidth would result in corrupted data
            assert_eq!(cloned.get_balance(bs, &Address::new_id(id)).unwrap(), amount);
        }
        let (summary, errors) = cloned.check_invariants(bs, &cap());
        assert!(errors.is_empty());
        assert_eq!(summary.balances.len(), 10);
    }

    #[test]
    fn it_reports_invariant_violations() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();

        // a balance that the supply doesn't account for
        state.change_balance_by(bs, OWNER, &TokenAmount::from_atto(10)).unwrap();
        let (_, errors) = state.check_invariants(bs, &cap());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], StateInvariantError::BalanceSupplyMismatch { .. }));

        // supply beyond a tiny cap
        state.change_supply_by(&TokenAmount::from_atto(10)).unwrap();
        let (_, errors) = state.check_invariants(bs, &TokenAmount::from_atto(5));
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], StateInvariantError::SupplyAboveCap { .. }));

        let (summary, errors) = state.check_invariants(bs, &cap());
        assert!(errors.is_empty());
        assert_eq!(summary.total_supply, TokenAmount::from_atto(10));
    }

    #[test]
    fn it_reports_explicit_zero_entries() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();
        let third = &Address::new_id(3);

        let mut balance_map = state.get_balance_map(bs).unwrap();
        balance_map.set(address_key(OWNER), TokenAmount::zero()).unwrap();
        state.balances = balance_map.flush().unwrap();

        // OWNER keeps an empty spender map, SPENDER keeps a zero entry for `third`
        let mut root_map = state.get_allowances_map(bs).unwrap();
        let empty = SpenderAllowanceMap::new_with_bit_width(bs, state.hamt_bit_width()).flush();
        root_map.set(address_key(OWNER), empty.unwrap()).unwrap();
        let mut spender_map = SpenderAllowanceMap::new_with_bit_width(bs, state.hamt_bit_width());
        spender_map.set(address_key(third), TokenAmount::zero()).unwrap();
        root_map.set(address_key(SPENDER), spender_map.flush().unwrap()).unwrap();
        state.allowances = root_map.flush().unwrap();

        let (_, errors) = state.check_invariants(bs, &cap());
        assert_eq!(errors.len(), 3);
        assert!(errors
            .iter()
            .any(|e| matches!(e, StateInvariantError::ExplicitZeroBalance(a) if a == OWNER)));
        assert!(errors
            .iter()
            .any(|e| matches!(e, StateInvariantError::ExplicitEmptyAllowance(a) if a == OWNER)));
        assert!(errors.iter().any(|e| matches!(
            e,
            StateInvariantError::ExplicitZeroAllowance { owner, spender }
                if owner == SPENDER && spender == third
        )));
    }

    #[test]
    fn it_rejects_negative_supply() {
        let bs = &MemoryBlockstore::new();
        let mut state = TokenState::new(bs).unwrap();
        state.change_supply_by(&TokenAmount::from_atto(-1)).unwrap_err();
        assert_eq!(state.supply, TokenAmount::zero());
    }
}
