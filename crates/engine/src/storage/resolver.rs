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

//! Session-wide cache of historical storage.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use alloy_primitives::{Address, B256, U256};
use parking_lot::{Mutex, RwLock};
use slotlens_common::{ExecutionStepContext, StorageEntry, StorageMap, StorageOwner};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use super::{
    correction_candidates, MappingPreimageIndex, MappingPreimageResolver, PreimageOracle,
    StorageRangeOracle,
};
use crate::{DecoderConfig, StorageError};

#[derive(Debug, Default)]
struct AccountStorage {
    storage: StorageMap,
    /// Start keys of pages already fetched
    fetched: HashSet<B256>,
    complete: bool,
}

type IndexCell = Arc<OnceCell<Arc<MappingPreimageIndex>>>;

/// Caches the pre-transaction storage of every account touched in a session.
///
/// Pages are fetched lazily: a lookup for a hashed key that is neither cached nor the
/// start of an already fetched page asks the oracle for one page starting there. The
/// cache only grows until [`StorageResolver::reset`].
pub struct StorageResolver {
    oracle: Arc<dyn StorageRangeOracle>,
    preimages: MappingPreimageResolver,
    config: DecoderConfig,
    accounts: RwLock<HashMap<Address, AccountStorage>>,
    initial_mappings: Mutex<HashMap<(Address, Vec<U256>), IndexCell>>,
}

impl std::fmt::Debug for StorageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageResolver")
            .field("config", &self.config)
            .field("accounts", &self.accounts.read().len())
            .finish_non_exhaustive()
    }
}

impl StorageResolver {
    /// Create a resolver over the given oracles.
    pub fn new(
        oracle: Arc<dyn StorageRangeOracle>,
        preimages: Arc<dyn PreimageOracle>,
        config: DecoderConfig,
    ) -> Self {
        Self {
            oracle,
            preimages: MappingPreimageResolver::new(preimages, config.max_mapping_depth),
            config,
            accounts: RwLock::new(HashMap::new()),
            initial_mappings: Mutex::new(HashMap::new()),
        }
    }

    /// Decoder limits of this session.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// The mapping key recovery used by this resolver.
    pub fn preimage_resolver(&self) -> &MappingPreimageResolver {
        &self.preimages
    }

    /// Drop everything cached. Call when a new trace is loaded.
    pub fn reset(&self) {
        self.accounts.write().clear();
        self.initial_mappings.lock().clear();
        debug!("storage resolver cache cleared");
    }

    /// Whether the whole storage of `address` is known.
    pub fn is_complete(&self, address: &StorageOwner) -> bool {
        address
            .address()
            .and_then(|address| self.accounts.read().get(&address).map(|acc| acc.complete))
            .unwrap_or(false)
    }

    /// Make sure the page starting at `key` has been fetched, unless `key` is cached.
    async fn ensure_cached(&self, address: Address, key: B256) -> Result<(), StorageError> {
        let cached = self.accounts.read().get(&address).is_some_and(|account| {
            account.complete || account.fetched.contains(&key) || account.storage.contains_key(&key)
        });
        if cached {
            trace!(%address, %key, "storage cache hit");
            return Ok(());
        }

        debug!(%address, %key, max = self.config.max_range_entries, "fetching storage range");
        let page = self.oracle.storage_range(address, key, self.config.max_range_entries).await?;

        let mut accounts = self.accounts.write();
        let account = accounts.entry(address).or_default();
        account.fetched.insert(key);
        // keys are sorted, so a single page from zero without continuation is everything
        if key == B256::ZERO && page.next_key.is_none() {
            account.complete = true;
        }
        account.storage.extend(page.storage);
        Ok(())
    }

    /// The cached storage of the context's account, making sure the first page is in.
    pub async fn storage_range(
        &self,
        context: &ExecutionStepContext,
    ) -> Result<StorageMap, StorageError> {
        let Some(address) = context.address.address() else {
            return Ok(StorageMap::new());
        };
        self.ensure_cached(address, B256::ZERO).await?;
        Ok(self.accounts.read().get(&address).map(|acc| acc.storage.clone()).unwrap_or_default())
    }

    /// The entry at a hashed slot key. Unknown slots read as zero; that zero is not
    /// cached.
    pub async fn storage_slot(
        &self,
        hashed: B256,
        context: &ExecutionStepContext,
    ) -> Result<StorageEntry, StorageError> {
        let Some(address) = context.address.address() else {
            return Ok(StorageEntry::zero(None));
        };
        self.ensure_cached(address, hashed).await?;
        Ok(self
            .accounts
            .read()
            .get(&address)
            .and_then(|acc| acc.storage.get(&hashed).copied())
            .unwrap_or_else(|| StorageEntry::zero(None)))
    }

    /// Mapping keys recovered from the pre-transaction storage of the context's
    /// account, cached per account and correction set.
    pub async fn initial_preimages_mappings(
        &self,
        context: &ExecutionStepContext,
        corrections: &[U256],
    ) -> Result<Arc<MappingPreimageIndex>, StorageError> {
        let Some(address) = context.address.address() else {
            return Ok(Arc::default());
        };
        let candidates = correction_candidates(corrections);
        let cell =
            self.initial_mappings.lock().entry((address, candidates.clone())).or_default().clone();

        cell.get_or_try_init(|| async {
            let storage = self.storage_range(context).await?;
            let index = self.preimages.decode_mapping_keys(&storage, &candidates).await;
            Ok::<_, StorageError>(Arc::new(index))
        })
        .await
        .cloned()
    }
}
