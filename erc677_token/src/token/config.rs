use fvm_shared::econ::TokenAmount;

use crate::token::state::DEFAULT_HAMT_BIT_WIDTH;

/// Largest total supply the ledger will mint, in whole tokens (10^27 atto-units)
pub const SUPPLY_CAP_WHOLE: u64 = 1_000_000_000;

/// Construction-time settings of a token ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenConfig {
    /// Mints that would take the total supply above this amount are rejected
    pub supply_cap: TokenAmount,
    /// Bit-width of the state HAMTs, 1 <= bit width <= 8
    pub hamt_bit_width: u32,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            supply_cap: TokenAmount::from_whole(SUPPLY_CAP_WHOLE),
            hamt_bit_width: DEFAULT_HAMT_BIT_WIDTH,
        }
    }
}

impl TokenConfig {
    pub fn with_supply_cap(mut self, supply_cap: TokenAmount) -> Self {
        self.supply_cap = supply_cap;
        self
    }

    pub fn with_hamt_bit_width(mut self, hamt_bit_width: u32) -> Self {
        self.hamt_bit_width = hamt_bit_width;
        self
    }
}
