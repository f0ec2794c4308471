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

//! Value types: integers, booleans, addresses, enums and `bytesN`.

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use slotlens_common::{DecodedData, DecodedValue, StorageLocation, WORD_SIZE};
use tracing::warn;

use super::StorageContext;
use crate::{TypeDescriptor, TypeKind};

/// Interpret the big-endian bytes a value occupies.
fn interpret(ty: &TypeDescriptor, bytes: &[u8]) -> DecodedData {
    match &ty.kind {
        TypeKind::Uint { .. } => DecodedData::Uint(U256::from_be_slice(bytes)),
        TypeKind::Int { .. } => {
            let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
            let mut word = [if negative { 0xff } else { 0 }; WORD_SIZE];
            word[WORD_SIZE - bytes.len()..].copy_from_slice(bytes);
            DecodedData::Int(I256::from_raw(U256::from_be_bytes(word)))
        }
        TypeKind::Bool => DecodedData::Bool(bytes.iter().any(|b| *b != 0)),
        TypeKind::Address => {
            let start = bytes.len().saturating_sub(20);
            let mut address = [0u8; 20];
            address[20 - (bytes.len() - start)..].copy_from_slice(&bytes[start..]);
            DecodedData::Address(Address::from(address))
        }
        TypeKind::FixedBytes(_) => DecodedData::FixedBytes(Bytes::copy_from_slice(bytes)),
        TypeKind::Enum { variants } => {
            let index = U256::from_be_slice(bytes);
            match usize::try_from(index).ok().and_then(|i| variants.get(i).map(|name| (i, name))) {
                Some((i, name)) => DecodedData::Enum { name: name.clone(), index: i as u64 },
                None => DecodedData::InvalidEnum { index },
            }
        }
        _ => DecodedData::Error(format!("<{} is not a value type>", ty.type_name)),
    }
}

/// Decode a value type from a full word as laid out in memory or on the stack:
/// `bytesN` is left-aligned, everything else right-aligned.
pub fn decode_word(ty: &TypeDescriptor, word: &B256) -> DecodedData {
    let width = ty.storage_bytes.min(WORD_SIZE);
    match ty.kind {
        TypeKind::FixedBytes(_) => interpret(ty, &word[..width]),
        _ => interpret(ty, &word[WORD_SIZE - width..]),
    }
}

/// The bytes of a packed value: `width` bytes ending `offset` bytes from the least
/// significant end of the word.
fn extract_packed(word: &B256, offset: usize, width: usize) -> Option<&[u8]> {
    let end = WORD_SIZE.checked_sub(offset)?;
    let start = end.checked_sub(width)?;
    Some(&word[start..end])
}

pub(super) async fn decode_from_storage(
    ty: &TypeDescriptor,
    location: StorageLocation,
    ctx: StorageContext<'_>,
) -> DecodedValue {
    let entry = match ctx.reader.storage_slot(location.slot).await {
        Ok(entry) => entry,
        Err(err) => {
            warn!(%location, %err, "failed to read slot");
            return DecodedValue::error(&ty.type_name, err);
        }
    };
    match extract_packed(&entry.value, location.offset, ty.storage_bytes) {
        Some(bytes) => DecodedValue::new(&ty.type_name, interpret(ty, bytes)),
        None => DecodedValue::error(
            &ty.type_name,
            format!("{} bytes do not fit at offset {}", ty.storage_bytes, location.offset),
        ),
    }
}
