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

//! Mappings.
//!
//! Storage does not record which keys a mapping holds. Keys are recovered from the
//! preimages of the slots that are populated, both before the transaction and in the
//! writes it made so far, and every recovered key is read back through the viewer.

use std::collections::BTreeSet;

use alloy_primitives::{hex, keccak256, Bytes, B256, U256};
use futures::future::join_all;
use slotlens_common::{
    DecodedData, DecodedValue, MappingEntry, StorageLocation, ValueFormatter,
    ValueFormatterContext, WORD_SIZE,
};
use tracing::{debug, warn};

use super::{decode_word, StorageContext};
use crate::{DecoderConfig, MappingPreimageIndex, TypeDescriptor, TypeKind};

/// Render a raw mapping key with the key type of the mapping.
///
/// Strings show as text when they are valid UTF-8; value types use their usual
/// rendering; anything else is shown as hex.
pub fn render_mapping_key(key_ty: &TypeDescriptor, key: &[u8]) -> String {
    match key_ty.kind {
        TypeKind::String => match std::str::from_utf8(key) {
            Ok(text) => text.to_string(),
            Err(_) => format!("0x{}", hex::encode(key)),
        },
        _ if key_ty.is_value_type() && key.len() == WORD_SIZE => {
            let value = DecodedValue::new(&key_ty.type_name, decode_word(key_ty, &B256::from_slice(key)));
            value.format_value(&ValueFormatterContext::new())
        }
        _ => format!("0x{}", hex::encode(key)),
    }
}

/// Slot offsets within the innermost value of (possibly nested) mappings. An entry
/// may have only one of those slots populated, so key recovery tries each of them.
fn corrections_for(value: &TypeDescriptor, config: &DecoderConfig) -> Vec<U256> {
    let value = value.resolved();
    match &value.kind {
        TypeKind::Mapping { value, .. } => corrections_for(value, config),
        _ => {
            let slots = usize::try_from(value.storage_slots).unwrap_or(usize::MAX);
            if slots > config.max_value_slots {
                debug!(value = %value.type_name, slots, "value slots beyond the recovery limit");
            }
            (0..slots.min(config.max_value_slots)).map(U256::from).collect()
        }
    }
}

/// The slot of `key` in the mapping whose base slot is `base`.
fn entry_slot(key: &[u8], base: U256) -> U256 {
    let mut data = Vec::with_capacity(key.len() + WORD_SIZE);
    data.extend_from_slice(key);
    data.extend_from_slice(&base.to_be_bytes::<WORD_SIZE>());
    U256::from_be_bytes(keccak256(data).0)
}

fn keys_at(index: &MappingPreimageIndex, base: U256, keys: &mut BTreeSet<Bytes>) {
    if let Some(found) = index.get(&base) {
        keys.extend(found.keys().cloned());
    }
}

pub(super) async fn decode_from_storage(
    ty: &TypeDescriptor,
    key: &TypeDescriptor,
    value: &TypeDescriptor,
    location: StorageLocation,
    ctx: StorageContext<'_>,
) -> DecodedValue {
    let corrections = corrections_for(value, ctx.config);
    let (initial, current) = futures::join!(
        ctx.reader.initial_mappings_location(&corrections),
        ctx.reader.mappings_location(&corrections),
    );

    let mut keys = BTreeSet::new();
    for index in [initial, current] {
        match index {
            Ok(index) => keys_at(&index, location.slot, &mut keys),
            Err(err) => {
                warn!(slot = %location.slot, error = %err, "failed to recover mapping keys");
                return DecodedValue::error(&ty.type_name, err);
            }
        }
    }

    let values = join_all(keys.iter().map(|raw| {
        let slot = entry_slot(raw, location.slot);
        value.decode_from_storage(StorageLocation::new(slot, location.offset), ctx)
    }))
    .await;

    let entries = keys
        .into_iter()
        .zip(values)
        .map(|(raw, value)| MappingEntry {
            display_key: render_mapping_key(key, &raw),
            key: raw,
            value,
        })
        .collect();
    DecodedValue::new(&ty.type_name, DecodedData::Mapping(entries))
}
