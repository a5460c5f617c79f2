use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::Eip1559TransactionRequest;
use tracing::debug;

use crate::types::{EngineError, EngineResult, FeePair, UnsignedAction};
use crate::utils::{to_alloy_address, to_ethers_address, to_ethers_u256};

/// 액션 서명기
#[async_trait]
pub trait Signer: Send + Sync {
    /// 서명 계정 주소
    fn address(&self) -> Address;

    /// 주어진 시퀀스 번호와 수수료로 서명한 raw 트랜잭션을 돌려준다
    async fn sign(&self, action: &UnsignedAction, sequence: u64, fees: &FeePair) -> EngineResult<Bytes>;
}

/// 로컬 개인키 기반 EIP-1559 서명기
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    pub fn from_private_key(private_key: &str, chain_id: u64) -> EngineResult<Self> {
        let wallet: LocalWallet = private_key
            .trim()
            .parse()
            .map_err(|e| EngineError::Config(format!("invalid private key: {}", e)))?;
        Ok(Self {
            wallet: wallet.with_chain_id(chain_id),
        })
    }
}

#[async_trait]
impl Signer for WalletSigner {
    fn address(&self) -> Address {
        to_alloy_address(self.wallet.address())
    }

    async fn sign(&self, action: &UnsignedAction, sequence: u64, fees: &FeePair) -> EngineResult<Bytes> {
        let request = Eip1559TransactionRequest::new()
            .from(self.wallet.address())
            .to(to_ethers_address(action.to))
            .data(action.data.to_vec())
            .value(to_ethers_u256(action.value))
            .gas(action.gas_limit)
            .nonce(sequence)
            .max_fee_per_gas(to_ethers_u256(fees.max_fee_per_gas))
            .max_priority_fee_per_gas(to_ethers_u256(fees.max_priority_fee_per_gas))
            .chain_id(action.chain_id);

        let tx: TypedTransaction = request.into();
        let signature = self
            .wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| EngineError::Signing(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        debug!("✍️ 서명 완료: nonce={} bytes={}", sequence, raw.len());
        Ok(Bytes::from(raw.to_vec()))
    }
}

impl std::fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSigner")
            .field("address", &self.wallet.address())
            .finish()
    }
}
