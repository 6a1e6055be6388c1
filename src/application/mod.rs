mod engine;
mod error;
mod service;

pub use engine::BalanceEngine;
pub use error::WalletError;
pub use service::{BalanceView, WalletService};
