pub mod filters;
pub mod provider;

pub use filters::{AdmissionFilter, SeenCache};
pub use provider::{ChainStateProvider, ProviderNotification, WsChainProvider};
