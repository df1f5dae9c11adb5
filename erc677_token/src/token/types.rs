use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use ledger_utils::receiver::RecipientData;

/// `Transfer(from, to, value)`, emitted by transfers and mints
///
/// Mints are reported as transfers from the zero address.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub value: TokenAmount,
}

/// `Approval(owner, spender, value)`, carrying the new absolute allowance
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct ApprovalEvent {
    pub owner: Address,
    pub spender: Address,
    pub value: TokenAmount,
}

/// The ERC-677 `Transfer(from, to, value, data)` event
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferWithDataEvent {
    pub from: Address,
    pub to: Address,
    pub value: TokenAmount,
    pub data: RawBytes,
}

/// Every event the ledger emits, in emission order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenEvent {
    Transfer(TransferEvent),
    Approval(ApprovalEvent),
    TransferWithData(TransferWithDataEvent),
}

impl TokenEvent {
    pub fn transfer(from: Address, to: Address, value: TokenAmount) -> Self {
        TokenEvent::Transfer(TransferEvent { from, to, value })
    }

    pub fn approval(owner: Address, spender: Address, value: TokenAmount) -> Self {
        TokenEvent::Approval(ApprovalEvent { owner, spender, value })
    }

    pub fn transfer_with_data(
        from: Address,
        to: Address,
        value: TokenAmount,
        data: RawBytes,
    ) -> Self {
        TokenEvent::TransferWithData(TransferWithDataEvent { from, to, value, data })
    }
}

/// Return value after a successful mint
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct MintReturn {
    /// The new total supply
    pub supply: TokenAmount,
}

#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferReturn {
    pub from_balance: TokenAmount,
    pub to_balance: TokenAmount,
}

#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferFromReturn {
    pub from_balance: TokenAmount,
    pub to_balance: TokenAmount,
    /// The spender's remaining allowance
    pub allowance: TokenAmount,
}

/// Return value after a successful transfer-and-call
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferAndCallReturn {
    pub from_balance: TokenAmount,
    pub to_balance: TokenAmount,
    /// Whether the recipient is a contract whose hook was called
    pub hook_called: bool,
    /// Data returned by the recipient's hook, empty if it wasn't called
    pub recipient_data: RawBytes,
}

/// Intermediate data used by transfer_and_call_return to construct the return data
#[derive(Clone, Debug)]
pub struct TransferIntermediate {
    pub from: Address,
    pub to: Address,
    pub hook_called: bool,
    pub recipient_data: RawBytes,
}

impl RecipientData for TransferIntermediate {
    fn set_recipient_data(&mut self, data: RawBytes) {
        self.hook_called = true;
        self.recipient_data = data;
    }
}
