pub mod fees;
pub mod signer;

pub use fees::{FeeFeed, FeeModel, OracleFeeModel, StaticFeeModel};
pub use signer::{Signer, WalletSigner};
