// SPDX-License-Identifier: MIT

pub mod abi;
