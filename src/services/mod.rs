// SPDX-License-Identifier: MIT

pub mod seller;
