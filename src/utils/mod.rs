pub mod convert;
pub mod crypto;

pub use convert::{to_alloy_address, to_alloy_u256, to_ethers_address, to_ethers_u256, u256_to_i128};
pub use crypto::{keccak256, keccak256_hex};
