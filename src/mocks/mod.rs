pub mod flashbots_mock;
pub mod mempool_mock;
pub mod provider_mock;
pub mod signer_mock;
pub mod strategy_mock;

pub use flashbots_mock::MockRelayClient;
pub use mempool_mock::synthetic_event;
pub use provider_mock::MockChainProvider;
pub use signer_mock::MockSigner;
pub use strategy_mock::MockEvaluator;

use std::env;

/// Check if mock mode is enabled
pub fn is_mock_mode() -> bool {
    env::var("API_MODE").unwrap_or_default() == "mock"
}
