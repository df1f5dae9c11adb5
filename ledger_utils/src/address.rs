use fvm_shared::address::{Address, Error as AddressError, Payload};
use fvm_shared::ActorID;

/// Namespace of Ethereum-style delegated addresses (the Ethereum address manager)
pub const EAM_NAMESPACE: ActorID = 10;

/// Length of an Ethereum account address
pub const ETH_ADDRESS_LEN: usize = 20;

/// The zero address, source of minted tokens and an invalid transfer destination
pub const ZERO_ADDRESS: Address = Address::new_id(0);

/// Builds a delegated address carrying a 20-byte Ethereum account address
pub fn eth_address(bytes: [u8; ETH_ADDRESS_LEN]) -> Result<Address, AddressError> {
    Address::new_delegated(EAM_NAMESPACE, &bytes)
}

/// Whether the address is the zero address in either of its forms
///
/// Both `f00` and the Ethereum `0x0000..0000` account are treated as zero.
pub fn is_zero_address(address: &Address) -> bool {
    match address.payload() {
        Payload::ID(id) => *id == 0,
        Payload::Delegated(delegated) => {
            delegated.namespace() == EAM_NAMESPACE
                && delegated.subaddress().len() == ETH_ADDRESS_LEN
                && delegated.subaddress().iter().all(|b| *b == 0)
        }
        _ => false,
    }
}
