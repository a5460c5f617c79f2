//! ethers 타입과 alloy 타입 사이 변환

use alloy::primitives::{Address, U256};
use ethers::types::{H160 as EthersAddress, U256 as EthersU256};

pub fn to_ethers_address(address: Address) -> EthersAddress {
    EthersAddress::from_slice(address.as_slice())
}

pub fn to_alloy_address(address: EthersAddress) -> Address {
    Address::from_slice(address.as_bytes())
}

pub fn to_ethers_u256(value: U256) -> EthersU256 {
    EthersU256::from_big_endian(&value.to_be_bytes::<32>())
}

pub fn to_alloy_u256(value: EthersU256) -> U256 {
    let mut be = [0u8; 32];
    value.to_big_endian(&mut be);
    U256::from_be_bytes(be)
}

/// i128 범위를 넘으면 i128::MAX로 포화시킨다
pub fn u256_to_i128(value: U256) -> i128 {
    u128::try_from(value)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .unwrap_or(i128::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_crosses_libraries() {
        let value = U256::from(123_456_789_000_000_000u128);
        assert_eq!(to_alloy_u256(to_ethers_u256(value)), value);
        assert_eq!(to_ethers_u256(value), EthersU256::from(123_456_789_000_000_000u128));
    }

    #[test]
    fn address_crosses_libraries() {
        let address = Address::repeat_byte(0x42);
        assert_eq!(to_alloy_address(to_ethers_address(address)), address);
    }

    #[test]
    fn i128_conversion_saturates() {
        assert_eq!(u256_to_i128(U256::from(5u64)), 5);
        assert_eq!(u256_to_i128(U256::MAX), i128::MAX);
    }
}
