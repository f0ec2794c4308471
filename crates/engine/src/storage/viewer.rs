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

//! Storage as seen from one execution step.

use std::{collections::HashMap, sync::Arc};

use alloy_primitives::U256;
use async_trait::async_trait;
use parking_lot::Mutex;
use slotlens_common::{hashed_slot_key, ExecutionStepContext, StorageEntry, StorageMap};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use super::{
    correction_candidates, MappingPreimageIndex, StorageReader, StorageResolver,
    StorageWriteSource,
};
use crate::{DecoderConfig, StorageError};

type IndexCell = Arc<OnceCell<Arc<MappingPreimageIndex>>>;

/// Binds a [`StorageResolver`] to one execution step.
///
/// Reads consult the writes the transaction made up to the step first and fall back
/// to the pre-transaction storage. Mapping key resolutions are memoized per
/// correction set for the lifetime of the viewer; concurrent callers share a single
/// in-flight resolution.
pub struct StorageViewer {
    context: ExecutionStepContext,
    resolver: Arc<StorageResolver>,
    changes: StorageMap,
    initial_mappings: Mutex<HashMap<Vec<U256>, IndexCell>>,
    mappings: Mutex<HashMap<Vec<U256>, IndexCell>>,
}

impl std::fmt::Debug for StorageViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageViewer")
            .field("context", &self.context)
            .field("changes", &self.changes.len())
            .finish_non_exhaustive()
    }
}

impl StorageViewer {
    /// Create a viewer, loading the writes made through the context's step.
    pub async fn new(
        context: ExecutionStepContext,
        resolver: Arc<StorageResolver>,
        writes: &dyn StorageWriteSource,
    ) -> Result<Self, StorageError> {
        let changes = writes
            .accumulated_storage_writes(context.transaction, context.address, context.step)
            .await?;
        debug!(owner = %context.address, step = context.step, changes = changes.len(), "storage viewer ready");
        Ok(Self {
            context,
            resolver,
            changes,
            initial_mappings: Mutex::new(HashMap::new()),
            mappings: Mutex::new(HashMap::new()),
        })
    }

    /// The step this viewer is bound to.
    pub fn context(&self) -> &ExecutionStepContext {
        &self.context
    }

    /// Decoder limits of the session.
    pub fn config(&self) -> &DecoderConfig {
        self.resolver.config()
    }

    /// Writes made by the transaction through the bound step.
    pub fn storage_changes(&self) -> &StorageMap {
        &self.changes
    }

    /// Known storage: the cached pre-transaction entries overlaid with the writes.
    pub async fn storage_range(&self) -> Result<StorageMap, StorageError> {
        let mut storage = self.resolver.storage_range(&self.context).await?;
        storage.extend(self.changes.iter().map(|(key, entry)| (*key, *entry)));
        Ok(storage)
    }

    /// The entry at an unhashed slot.
    pub async fn storage_slot(&self, slot: U256) -> Result<StorageEntry, StorageError> {
        let hashed = hashed_slot_key(slot);
        if let Some(entry) = self.changes.get(&hashed) {
            trace!(%slot, "slot written in transaction");
            return Ok(*entry);
        }
        let entry = self.resolver.storage_slot(hashed, &self.context).await?;
        Ok(StorageEntry { raw_slot: entry.raw_slot.or(Some(slot)), ..entry })
    }

    /// Whether the whole pre-transaction storage of the account is known.
    pub fn is_complete(&self) -> bool {
        self.resolver.is_complete(&self.context.address)
    }

    fn cell(cells: &Mutex<HashMap<Vec<U256>, IndexCell>>, corrections: &[U256]) -> IndexCell {
        cells.lock().entry(correction_candidates(corrections)).or_default().clone()
    }

    /// Mapping keys recovered from the pre-transaction storage.
    pub async fn initial_mappings_location(
        &self,
        corrections: &[U256],
    ) -> Result<Arc<MappingPreimageIndex>, StorageError> {
        let cell = Self::cell(&self.initial_mappings, corrections);
        cell.get_or_try_init(|| self.resolver.initial_preimages_mappings(&self.context, corrections))
            .await
            .cloned()
    }

    /// Mapping keys recovered from the writes made through the bound step.
    pub async fn mappings_location(
        &self,
        corrections: &[U256],
    ) -> Result<Arc<MappingPreimageIndex>, StorageError> {
        let cell = Self::cell(&self.mappings, corrections);
        cell.get_or_try_init(|| async {
            let index = self
                .resolver
                .preimage_resolver()
                .decode_mapping_keys(&self.changes, corrections)
                .await;
            Ok::<_, StorageError>(Arc::new(index))
        })
        .await
        .cloned()
    }
}

#[async_trait]
impl StorageReader for StorageViewer {
    async fn storage_slot(&self, slot: U256) -> Result<StorageEntry, StorageError> {
        Self::storage_slot(self, slot).await
    }

    async fn initial_mappings_location(
        &self,
        corrections: &[U256],
    ) -> Result<Arc<MappingPreimageIndex>, StorageError> {
        Self::initial_mappings_location(self, corrections).await
    }

    async fn mappings_location(
        &self,
        corrections: &[U256],
    ) -> Result<Arc<MappingPreimageIndex>, StorageError> {
        Self::mappings_location(self, corrections).await
    }
}
