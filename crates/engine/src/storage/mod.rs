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

//! Historical storage access.
//!
//! The collaborators SlotLens relies on are described by three traits:
//! [`StorageRangeOracle`] pages through an account's storage as it was before the
//! transaction, [`PreimageOracle`] returns the bytes a Keccak-256 hash was computed
//! from, and [`StorageWriteSource`] reports the writes a transaction made up to a step.
//!
//! On top of them, [`StorageResolver`] caches pages per account for a whole session
//! and [`StorageViewer`] binds the cache to one execution step. Decoders only see the
//! [`StorageReader`] face of a viewer.

use std::{collections::BTreeMap, sync::Arc};

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slotlens_common::{StorageEntry, StorageMap, StorageOwner};

use crate::StorageError;

pub mod preimage;
pub mod resolver;
pub mod rpc;
pub mod viewer;

pub use preimage::*;
pub use resolver::*;
pub use rpc::*;
pub use viewer::*;

/// One page of an account's storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRangeResult {
    /// Entries keyed by hashed slot
    pub storage: StorageMap,
    /// Hashed key the next page starts at; `None` when the range is exhausted
    #[serde(default)]
    pub next_key: Option<B256>,
}

/// Pages through the storage of an account as it was before the transaction.
#[async_trait]
pub trait StorageRangeOracle: Send + Sync {
    /// Return at most `max_entries` entries whose hashed key is `>= start_key`.
    async fn storage_range(
        &self,
        address: Address,
        start_key: B256,
        max_entries: usize,
    ) -> Result<StorageRangeResult, StorageError>;
}

/// Recovers the input of a Keccak-256 hash.
#[async_trait]
pub trait PreimageOracle: Send + Sync {
    /// The bytes hashing to `hash`, if known. Lookup failures count as unknown.
    async fn preimage(&self, hash: B256) -> Option<Bytes>;
}

/// Reports the storage writes of a transaction.
#[async_trait]
pub trait StorageWriteSource: Send + Sync {
    /// Writes to `address` from the start of `transaction` through `through_step`,
    /// keyed by hashed slot, last write winning. `address` may be the placeholder of a
    /// contract under construction.
    async fn accumulated_storage_writes(
        &self,
        transaction: TxHash,
        address: StorageOwner,
        through_step: usize,
    ) -> Result<StorageMap, StorageError>;
}

#[async_trait]
impl<T: StorageRangeOracle + ?Sized> StorageRangeOracle for Arc<T> {
    async fn storage_range(
        &self,
        address: Address,
        start_key: B256,
        max_entries: usize,
    ) -> Result<StorageRangeResult, StorageError> {
        (**self).storage_range(address, start_key, max_entries).await
    }
}

#[async_trait]
impl<T: PreimageOracle + ?Sized> PreimageOracle for Arc<T> {
    async fn preimage(&self, hash: B256) -> Option<Bytes> {
        (**self).preimage(hash).await
    }
}

#[async_trait]
impl<T: StorageWriteSource + ?Sized> StorageWriteSource for Arc<T> {
    async fn accumulated_storage_writes(
        &self,
        transaction: TxHash,
        address: StorageOwner,
        through_step: usize,
    ) -> Result<StorageMap, StorageError> {
        (**self).accumulated_storage_writes(transaction, address, through_step).await
    }
}

/// A write source for callers that only want the state before the transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStorageWrites;

#[async_trait]
impl StorageWriteSource for NoStorageWrites {
    async fn accumulated_storage_writes(
        &self,
        _transaction: TxHash,
        _address: StorageOwner,
        _through_step: usize,
    ) -> Result<StorageMap, StorageError> {
        Ok(StorageMap::new())
    }
}

/// Recovered mapping keys of one account.
///
/// Maps the base slot of each mapping to the keys found for it, each key paired with
/// the full preimage (`key ‖ base slot`) it was recovered from.
pub type MappingPreimageIndex = BTreeMap<U256, BTreeMap<Bytes, Bytes>>;

/// Storage as seen from one execution step.
#[async_trait]
pub trait StorageReader: Send + Sync {
    /// The entry stored at the (unhashed) slot.
    async fn storage_slot(&self, slot: U256) -> Result<StorageEntry, StorageError>;

    /// Mapping keys recovered from the storage before the transaction.
    async fn initial_mappings_location(
        &self,
        corrections: &[U256],
    ) -> Result<Arc<MappingPreimageIndex>, StorageError>;

    /// Mapping keys recovered from the writes made so far by the transaction.
    async fn mappings_location(
        &self,
        corrections: &[U256],
    ) -> Result<Arc<MappingPreimageIndex>, StorageError>;
}
