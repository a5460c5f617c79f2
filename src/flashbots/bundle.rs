use alloy::primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Event, Slot};
use crate::utils::keccak256;

/// 번들 내 트랜잭션 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionRole {
    /// 관측된 원본 트랜잭션
    Victim,
    /// 우리 액션 (원본 뒤에 실행)
    BackRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedTransaction {
    pub role: TransactionRole,
    pub raw: Bytes,
}

/// 릴레이에 제출하는 순서 있는 트랜잭션 묶음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPackage {
    pub id: String,
    pub transactions: Vec<PackagedTransaction>,
    pub target_slot: Slot,
    /// 우리 액션 트랜잭션 해시 (포함 여부 확인용)
    pub action_hash: B256,
}

/// eth_sendBundle 파라미터
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlashbotsBundleRequest {
    pub txs: Vec<String>,
    pub block_number: String,
}

impl RelayPackage {
    /// 관측 트랜잭션이 있으면 먼저, 그 뒤에 우리 액션을 싣는다
    pub fn assemble(event: &Event, action_raw: Bytes, target_slot: Slot) -> Self {
        let mut transactions = Vec::with_capacity(2);
        if let Some(raw) = &event.payload.raw {
            transactions.push(PackagedTransaction {
                role: TransactionRole::Victim,
                raw: raw.clone(),
            });
        }

        let action_hash = keccak256(&action_raw);
        transactions.push(PackagedTransaction {
            role: TransactionRole::BackRun,
            raw: action_raw,
        });

        Self {
            id: Uuid::new_v4().to_string(),
            transactions,
            target_slot,
            action_hash,
        }
    }

    pub fn to_flashbots_format(&self) -> FlashbotsBundleRequest {
        FlashbotsBundleRequest {
            txs: self
                .transactions
                .iter()
                .map(|tx| format!("0x{}", hex::encode(&tx.raw)))
                .collect(),
            block_number: format!("0x{:x}", self.target_slot),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
