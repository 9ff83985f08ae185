// SPDX-License-Identifier: MIT

use alloy::sol;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    contract Erc20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
        function decimals() external view returns (uint8);
    }

    #[derive(Debug, PartialEq, Eq)]
    contract AmmPair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
        function token0() external view returns (address);
        function token1() external view returns (address);
    }

    #[derive(Debug, PartialEq, Eq)]
    contract AmmRouter {
        function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts);
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external returns (uint256[] amounts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};
    use alloy::sol_types::SolCall;

    #[test]
    fn erc20_call_selectors() {
        let approve = Erc20::approveCall {
            spender: Address::from([1u8; 20]),
            value: U256::from(1u64),
        }
        .abi_encode();
        let balance_of = Erc20::balanceOfCall {
            owner: Address::from([2u8; 20]),
        }
        .abi_encode();

        assert_eq!(hex::encode(&approve[..4]), "095ea7b3");
        assert_eq!(hex::encode(&balance_of[..4]), "70a08231");
    }

    #[test]
    fn pair_and_router_selectors() {
        let reserves = AmmPair::getReservesCall {}.abi_encode();
        let amounts = AmmRouter::getAmountsOutCall {
            amountIn: U256::from(1u64),
            path: vec![Address::from([1u8; 20]), Address::from([2u8; 20])],
        }
        .abi_encode();
        let swap = AmmRouter::swapExactTokensForTokensCall {
            amountIn: U256::from(1u64),
            amountOutMin: U256::from(1u64),
            path: vec![Address::from([1u8; 20]), Address::from([2u8; 20])],
            to: Address::from([3u8; 20]),
            deadline: U256::from(1u64),
        }
        .abi_encode();

        assert_eq!(hex::encode(&reserves[..4]), "0902f1ac");
        assert_eq!(hex::encode(&amounts[..4]), "d06ca61f");
        assert_eq!(hex::encode(&swap[..4]), "38ed1739");
    }

    #[test]
    fn swap_call_roundtrips() {
        let call = AmmRouter::swapExactTokensForTokensCall {
            amountIn: U256::from(1_000u64),
            amountOutMin: U256::from(990u64),
            path: vec![Address::from([7u8; 20]), Address::from([8u8; 20])],
            to: Address::from([9u8; 20]),
            deadline: U256::from(1_700_000_000u64),
        };
        let encoded = call.abi_encode();
        let decoded =
            AmmRouter::swapExactTokensForTokensCall::abi_decode(&encoded).expect("decode swap");
        assert_eq!(decoded.amountIn, call.amountIn);
        assert_eq!(decoded.amountOutMin, call.amountOutMin);
        assert_eq!(decoded.path, call.path);
        assert_eq!(decoded.to, call.to);
        assert_eq!(decoded.deadline, call.deadline);
    }
}
