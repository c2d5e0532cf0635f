pub mod buy;
pub mod indicators;
pub mod report;
pub mod sell;

#[cfg(test)]
mod buy_tests;

pub use buy::{evaluate_buy, BuyContext};
pub use sell::{evaluate_sell, SellContext};
