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

//! In-memory oracles for tests.
//!
//! They keep everything in maps and count how often they are asked, so tests can
//! check caching behaviour as well as decoded values.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use alloy_primitives::{keccak256, Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use parking_lot::RwLock;
use slotlens_common::{hashed_slot_key, word_from_u256, StorageEntry, StorageMap, StorageOwner};

use crate::{
    DecoderConfig, PreimageOracle, StorageError, StorageRangeOracle, StorageRangeResult,
    StorageResolver, StorageViewer, StorageWriteSource,
};

/// Encode `bytes`/`string` content into `(slot, word)` pairs the way the compiler
/// stores it at `slot`.
pub fn encode_byte_string(slot: U256, content: &[u8]) -> Vec<(U256, B256)> {
    if content.len() < 32 {
        let mut word = [0u8; 32];
        word[..content.len()].copy_from_slice(content);
        word[31] = (content.len() * 2) as u8;
        return vec![(slot, B256::from(word))];
    }

    let mut words = vec![(slot, word_from_u256(U256::from(content.len() * 2 + 1)))];
    let base = U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0);
    for (i, chunk) in content.chunks(32).enumerate() {
        let mut word = [0u8; 32];
        word[..chunk.len()].copy_from_slice(chunk);
        words.push((base + U256::from(i), B256::from(word)));
    }
    words
}

/// Pre-transaction storage of any number of accounts.
#[derive(Debug, Default)]
pub struct InMemoryStorageOracle {
    accounts: RwLock<HashMap<Address, StorageMap>>,
    fetches: AtomicUsize,
    fail_next: AtomicBool,
}

impl InMemoryStorageOracle {
    /// Create an oracle with no storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a word.
    pub fn set_word(&self, address: Address, slot: U256, value: B256) {
        self.accounts
            .write()
            .entry(address)
            .or_default()
            .insert(hashed_slot_key(slot), StorageEntry::new(slot, value));
    }

    /// Store a number.
    pub fn set(&self, address: Address, slot: U256, value: U256) {
        self.set_word(address, slot, word_from_u256(value));
    }

    /// Store `bytes`/`string` content at `slot`.
    pub fn set_bytes(&self, address: Address, slot: U256, content: &[u8]) {
        for (slot, word) in encode_byte_string(slot, content) {
            self.set_word(address, slot, word);
        }
    }

    /// All hashed keys of an account in ascending order.
    pub fn hashed_keys(&self, address: Address) -> Vec<B256> {
        self.accounts.read().get(&address).map(|s| s.keys().copied().collect()).unwrap_or_default()
    }

    /// Number of range queries answered so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Make the next range query fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageRangeOracle for InMemoryStorageOracle {
    async fn storage_range(
        &self,
        address: Address,
        start_key: B256,
        max_entries: usize,
    ) -> Result<StorageRangeResult, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::RangeQuery {
                address,
                start_key,
                reason: "injected failure".to_string(),
            });
        }

        let accounts = self.accounts.read();
        let Some(storage) = accounts.get(&address) else {
            return Ok(StorageRangeResult::default());
        };
        let mut entries = storage.range(start_key..);
        let page: StorageMap =
            entries.by_ref().take(max_entries).map(|(key, entry)| (*key, *entry)).collect();
        let next_key = entries.next().map(|(key, _)| *key);
        Ok(StorageRangeResult { storage: page, next_key })
    }
}

/// Known Keccak-256 preimages.
#[derive(Debug, Default)]
pub struct InMemoryPreimages {
    preimages: RwLock<HashMap<B256, Bytes>>,
    lookups: AtomicUsize,
}

impl InMemoryPreimages {
    /// Create an oracle that knows nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `data` and return its hash.
    pub fn record(&self, data: &[u8]) -> B256 {
        let hash = keccak256(data);
        self.preimages.write().insert(hash, Bytes::copy_from_slice(data));
        hash
    }

    /// The slot of `key` in the mapping at `base`, with its preimage remembered.
    pub fn mapping_slot(&self, key: &[u8], base: U256) -> U256 {
        let mut data = key.to_vec();
        data.extend_from_slice(&base.to_be_bytes::<32>());
        U256::from_be_bytes(self.record(&data).0)
    }

    /// Number of lookups so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreimageOracle for InMemoryPreimages {
    async fn preimage(&self, hash: B256) -> Option<Bytes> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.preimages.read().get(&hash).cloned()
    }
}

#[derive(Debug, Clone, Copy)]
struct Write {
    transaction: TxHash,
    owner: StorageOwner,
    step: usize,
    slot: U256,
    value: B256,
}

/// Storage writes of transactions, recorded step by step.
#[derive(Debug, Default)]
pub struct InMemoryWrites {
    writes: RwLock<Vec<Write>>,
}

impl InMemoryWrites {
    /// Create a source without writes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write of `value` to `slot` at `step`.
    pub fn write(
        &self,
        transaction: TxHash,
        owner: impl Into<StorageOwner>,
        step: usize,
        slot: U256,
        value: U256,
    ) {
        self.write_word(transaction, owner, step, slot, word_from_u256(value));
    }

    /// Record a write of a raw word.
    pub fn write_word(
        &self,
        transaction: TxHash,
        owner: impl Into<StorageOwner>,
        step: usize,
        slot: U256,
        value: B256,
    ) {
        self.writes.write().push(Write { transaction, owner: owner.into(), step, slot, value });
    }
}

#[async_trait]
impl StorageWriteSource for InMemoryWrites {
    async fn accumulated_storage_writes(
        &self,
        transaction: TxHash,
        address: StorageOwner,
        through_step: usize,
    ) -> Result<StorageMap, StorageError> {
        let mut writes: Vec<Write> = self
            .writes
            .read()
            .iter()
            .filter(|w| w.transaction == transaction && w.owner == address && w.step <= through_step)
            .copied()
            .collect();
        writes.sort_by_key(|w| w.step);
        Ok(writes
            .into_iter()
            .map(|w| (hashed_slot_key(w.slot), StorageEntry::new(w.slot, w.value)))
            .collect())
    }
}

/// In-memory oracles wired into a resolver.
#[derive(Debug)]
pub struct StorageFixture {
    /// Pre-transaction storage
    pub storage: Arc<InMemoryStorageOracle>,
    /// Known preimages
    pub preimages: Arc<InMemoryPreimages>,
    /// Writes of the transaction
    pub writes: Arc<InMemoryWrites>,
    /// Session cache over `storage` and `preimages`
    pub resolver: Arc<StorageResolver>,
}

impl Default for StorageFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageFixture {
    /// Fixture with default limits.
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    /// Fixture with the given limits.
    pub fn with_config(config: DecoderConfig) -> Self {
        let storage = Arc::new(InMemoryStorageOracle::new());
        let preimages = Arc::new(InMemoryPreimages::new());
        let writes = Arc::new(InMemoryWrites::new());
        let resolver =
            Arc::new(StorageResolver::new(storage.clone(), preimages.clone(), config));
        Self { storage, preimages, writes, resolver }
    }

    /// A viewer of `owner` at `step` of the zero transaction.
    pub async fn viewer(&self, owner: impl Into<StorageOwner>, step: usize) -> StorageViewer {
        let context = slotlens_common::ExecutionStepContext::new(TxHash::ZERO, step, owner);
        StorageViewer::new(context, self.resolver.clone(), self.writes.as_ref())
            .await
            .expect("in-memory writes never fail")
    }
}
