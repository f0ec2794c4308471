// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Storage and preimage oracles backed by a node's debug namespace.

use std::borrow::Cow;

use alloy_primitives::{Address, Bytes, TxHash, B256, U64};
use alloy_provider::Provider;
use async_trait::async_trait;
use eyre::{OptionExt, Result};
use serde::Deserialize;
use tracing::{debug, trace};

use super::{PreimageOracle, StorageRangeOracle, StorageRangeResult};
use crate::StorageError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionPosition {
    block_hash: Option<B256>,
    transaction_index: Option<U64>,
}

/// Queries `debug_storageRangeAt` and `debug_preimage` on a JSON-RPC node.
///
/// Storage ranges are taken right before the transaction the oracle is bound to.
#[derive(Debug, Clone)]
pub struct RpcStorageOracle<P> {
    provider: P,
    block_hash: B256,
    transaction_index: u64,
}

impl<P: Provider> RpcStorageOracle<P> {
    /// Bind to the transaction at `transaction_index` of block `block_hash`.
    pub fn new(provider: P, block_hash: B256, transaction_index: u64) -> Self {
        Self { provider, block_hash, transaction_index }
    }

    /// Bind to a mined transaction, looking up its position.
    pub async fn for_transaction(provider: P, transaction: TxHash) -> Result<Self> {
        let position: Option<TransactionPosition> = provider
            .raw_request(Cow::Borrowed("eth_getTransactionByHash"), (transaction,))
            .await?;
        let position = position.ok_or_eyre("transaction not found")?;
        let block_hash = position.block_hash.ok_or_eyre("transaction is pending")?;
        let transaction_index =
            position.transaction_index.ok_or_eyre("transaction has no index")?.to::<u64>();
        debug!(%transaction, %block_hash, transaction_index, "bound storage oracle");
        Ok(Self::new(provider, block_hash, transaction_index))
    }

    /// Block the storage is read from.
    pub fn block_hash(&self) -> B256 {
        self.block_hash
    }

    /// Position of the transaction in its block.
    pub fn transaction_index(&self) -> u64 {
        self.transaction_index
    }
}

#[async_trait]
impl<P: Provider> StorageRangeOracle for RpcStorageOracle<P> {
    async fn storage_range(
        &self,
        address: Address,
        start_key: B256,
        max_entries: usize,
    ) -> Result<StorageRangeResult, StorageError> {
        trace!(%address, %start_key, max_entries, "debug_storageRangeAt");
        let result: Option<StorageRangeResult> = self
            .provider
            .raw_request(
                Cow::Borrowed("debug_storageRangeAt"),
                (self.block_hash, self.transaction_index, address, start_key, max_entries),
            )
            .await
            .map_err(|e| StorageError::RangeQuery {
                address,
                start_key,
                reason: e.to_string(),
            })?;
        result.ok_or_else(|| StorageError::Malformed("null".to_string()))
    }
}

#[async_trait]
impl<P: Provider> PreimageOracle for RpcStorageOracle<P> {
    async fn preimage(&self, hash: B256) -> Option<Bytes> {
        match self.provider.raw_request(Cow::Borrowed("debug_preimage"), (hash,)).await {
            Ok(preimage) => preimage,
            Err(err) => {
                trace!(%hash, %err, "no preimage");
                None
            }
        }
    }
}
