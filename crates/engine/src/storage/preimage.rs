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

//! Recovery of mapping keys from hashed storage slots.
//!
//! A mapping entry lives at `keccak256(key ‖ base)`. Given an observed slot, asking
//! the preimage oracle for the bytes behind it yields both the key and the base slot
//! of the mapping. Struct values put their members at `hash + member_slot`, so each
//! observed slot is also tried with those corrections subtracted.

use std::{collections::HashSet, sync::Arc};

use alloy_primitives::{Bytes, B256, U256};
use futures::future::join_all;
use slotlens_common::{StorageMap, WORD_SIZE};
use tracing::{debug, trace};

use super::{MappingPreimageIndex, PreimageOracle};

/// Normalized correction candidates: zero first, no duplicates.
pub fn correction_candidates(corrections: &[U256]) -> Vec<U256> {
    let mut candidates = vec![U256::ZERO];
    for correction in corrections {
        if !candidates.contains(correction) {
            candidates.push(*correction);
        }
    }
    candidates
}

/// Split a mapping preimage into its key and base slot. The base slot is the trailing
/// word; anything shorter than a word plus one byte of key is not a mapping preimage.
pub fn split_preimage(preimage: &[u8]) -> Option<(Bytes, U256)> {
    if preimage.len() <= WORD_SIZE {
        return None;
    }
    let (key, base) = preimage.split_at(preimage.len() - WORD_SIZE);
    Some((Bytes::copy_from_slice(key), U256::from_be_slice(base)))
}

/// Builds [`MappingPreimageIndex`]es from storage entries.
#[derive(Clone)]
pub struct MappingPreimageResolver {
    oracle: Arc<dyn PreimageOracle>,
    max_depth: usize,
}

impl std::fmt::Debug for MappingPreimageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingPreimageResolver").field("max_depth", &self.max_depth).finish()
    }
}

impl MappingPreimageResolver {
    /// `max_depth` bounds how many enclosing mappings are looked up for a recovered base.
    pub fn new(oracle: Arc<dyn PreimageOracle>, max_depth: usize) -> Self {
        Self { oracle, max_depth }
    }

    /// Find the mapping preimage of `slot`, trying each candidate in order.
    async fn lookup(&self, slot: U256, candidates: &[U256]) -> Option<(Bytes, U256, Bytes)> {
        for correction in candidates {
            let corrected = slot.wrapping_sub(*correction);
            let Some(preimage) = self.oracle.preimage(B256::from(corrected)).await else {
                continue;
            };
            if let Some((key, base)) = split_preimage(&preimage) {
                trace!(%slot, %correction, %base, "recovered mapping preimage");
                return Some((key, base, preimage));
            }
        }
        None
    }

    /// Recover the mapping keys behind every entry of `storage`.
    ///
    /// Entries without a known raw slot and slots without a preimage are skipped.
    /// A recovered base slot that is itself a mapping entry (nested mappings) is
    /// resolved again, up to the configured depth, so the enclosing mapping learns
    /// its key too.
    pub async fn decode_mapping_keys(
        &self,
        storage: &StorageMap,
        corrections: &[U256],
    ) -> MappingPreimageIndex {
        let candidates = correction_candidates(corrections);
        let slots: Vec<U256> = storage.values().filter_map(|entry| entry.raw_slot).collect();

        let found =
            join_all(slots.iter().map(|slot| self.lookup(*slot, &candidates))).await;

        let mut index = MappingPreimageIndex::new();
        let mut walked = HashSet::new();
        for (key, base, preimage) in found.into_iter().flatten() {
            index.entry(base).or_default().insert(key, preimage);

            let mut current = base;
            for _ in 0..self.max_depth {
                if !walked.insert(current) {
                    break;
                }
                let Some((key, parent, preimage)) = self.lookup(current, &candidates).await
                else {
                    break;
                };
                index.entry(parent).or_default().insert(key, preimage);
                current = parent;
            }
        }

        debug!(
            entries = storage.len(),
            mappings = index.len(),
            keys = index.values().map(|keys| keys.len()).sum::<usize>(),
            "decoded mapping keys"
        );
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InMemoryPreimages;
    use alloy_primitives::{address, keccak256};
    use slotlens_common::{hashed_slot_key, StorageEntry};

    fn storage_of(slots: &[U256]) -> StorageMap {
        slots
            .iter()
            .map(|slot| (hashed_slot_key(*slot), StorageEntry::new(*slot, B256::with_last_byte(1))))
            .collect()
    }

    #[test]
    fn test_candidates_and_split() {
        assert_eq!(correction_candidates(&[]), vec![U256::ZERO]);
        assert_eq!(
            correction_candidates(&[U256::ZERO, U256::from(2), U256::from(2), U256::from(1)]),
            vec![U256::ZERO, U256::from(2), U256::from(1)]
        );

        let mut preimage = vec![0xab; 20];
        preimage.extend_from_slice(&U256::from(3).to_be_bytes::<32>());
        let (key, base) = split_preimage(&preimage).unwrap();
        assert_eq!(key.len(), 20);
        assert_eq!(base, U256::from(3));
        assert!(split_preimage(&[0u8; 32]).is_none());
    }

    #[tokio::test]
    async fn test_groups_keys_by_base_slot() {
        let preimages = Arc::new(InMemoryPreimages::new());
        let alice = address!("00000000000000000000000000000000000000a1");
        let bob = address!("00000000000000000000000000000000000000b0");
        let a = preimages.mapping_slot(&alice.into_word().0, U256::from(2));
        let b = preimages.mapping_slot(&bob.into_word().0, U256::from(2));
        let c = preimages.mapping_slot(&U256::from(7).to_be_bytes::<32>(), U256::from(5));

        let resolver = MappingPreimageResolver::new(preimages.clone(), 4);
        let index = resolver.decode_mapping_keys(&storage_of(&[a, b, c, U256::from(1)]), &[]).await;

        assert_eq!(index.len(), 2);
        assert_eq!(index[&U256::from(2)].len(), 2);
        assert!(index[&U256::from(2)].contains_key(&Bytes::from(alice.into_word().0)));
        let (key, preimage) = index[&U256::from(5)].iter().next().unwrap();
        assert_eq!(key, &Bytes::from(U256::from(7).to_be_bytes::<32>()));
        assert_eq!(keccak256(preimage), B256::from(c));
    }

    #[tokio::test]
    async fn test_struct_member_correction() {
        let preimages = Arc::new(InMemoryPreimages::new());
        let entry = preimages.mapping_slot(&U256::from(1).to_be_bytes::<32>(), U256::from(0));
        // second member of a struct value
        let member = entry + U256::from(1);

        let resolver = MappingPreimageResolver::new(preimages.clone(), 0);
        let missed = resolver.decode_mapping_keys(&storage_of(&[member]), &[]).await;
        assert!(missed.is_empty());

        let found =
            resolver.decode_mapping_keys(&storage_of(&[member]), &[U256::ZERO, U256::from(1)]).await;
        assert_eq!(found[&U256::ZERO].len(), 1);
    }

    #[tokio::test]
    async fn test_nested_mapping_parent_discovery() {
        let preimages = Arc::new(InMemoryPreimages::new());
        let outer_key = U256::from(10).to_be_bytes::<32>();
        let inner_key = U256::from(20).to_be_bytes::<32>();
        let inner_base = preimages.mapping_slot(&outer_key, U256::from(4));
        let entry = preimages.mapping_slot(&inner_key, inner_base);

        let resolver = MappingPreimageResolver::new(preimages.clone(), 4);
        let index = resolver.decode_mapping_keys(&storage_of(&[entry]), &[]).await;
        assert!(index[&inner_base].contains_key(&Bytes::from(inner_key)));
        assert!(index[&U256::from(4)].contains_key(&Bytes::from(outer_key)));

        let shallow = MappingPreimageResolver::new(preimages, 0);
        let index = shallow.decode_mapping_keys(&storage_of(&[entry]), &[]).await;
        assert!(!index.contains_key(&U256::from(4)));
    }
}
