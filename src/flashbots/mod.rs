pub mod bundle;
pub mod client;

pub use bundle::{FlashbotsBundleRequest, PackagedTransaction, RelayPackage, TransactionRole};
pub use client::{FlashbotsRelay, RelayClient};
