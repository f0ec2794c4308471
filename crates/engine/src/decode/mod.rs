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

//! Decoding of resolved types from storage, memory and the stack.
//!
//! Decoders never fail: whatever goes wrong is reported as a
//! [`DecodedData::Error`] value in place of the part that could not be decoded, so
//! siblings of a broken member or element still come out.

use std::fmt;

use alloy_primitives::{B256, U256};
use futures::future::BoxFuture;
use slotlens_common::{DecodedData, DecodedValue, StorageLocation, WORD_SIZE};

use crate::{
    DataLocation, DecodeError, DecoderConfig, StorageReader, StructRef, TypeDescriptor, TypeKind,
    TypeResolutionError,
};

mod array;
mod bytes;
mod mapping;
mod structs;
mod value;

pub use mapping::render_mapping_key;
pub use value::decode_word;

/// Where storage reads go and which limits apply.
#[derive(Clone, Copy)]
pub struct StorageContext<'a> {
    /// Storage as seen from the step being decoded
    pub reader: &'a dyn StorageReader,
    /// Decoder limits
    pub config: &'a DecoderConfig,
}

impl fmt::Debug for StorageContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContext").field("config", self.config).finish_non_exhaustive()
    }
}

impl<'a> StorageContext<'a> {
    /// Bundle a reader with limits.
    pub fn new(reader: &'a dyn StorageReader, config: &'a DecoderConfig) -> Self {
        Self { reader, config }
    }
}

/// Read the 32-byte word at a byte offset of memory; bytes past the end read as zero.
pub fn memory_word(memory: &[u8], offset: usize) -> B256 {
    let mut word = [0u8; WORD_SIZE];
    if offset < memory.len() {
        let end = memory.len().min(offset.saturating_add(WORD_SIZE));
        word[..end - offset].copy_from_slice(&memory[offset..end]);
    }
    B256::from(word)
}

/// Read `length` bytes of memory at `offset`, zero-filled past the end.
pub fn memory_slice(memory: &[u8], offset: usize, length: usize) -> Vec<u8> {
    let mut data = vec![0u8; length];
    if offset < memory.len() {
        let end = memory.len().min(offset.saturating_add(length));
        data[..end - offset].copy_from_slice(&memory[offset..end]);
    }
    data
}

/// Interpret a word as a memory offset. Offsets that do not fit are clamped so reads
/// land past the end of memory and come back as zero.
pub(crate) fn word_to_offset(word: U256) -> usize {
    word.try_into().unwrap_or(usize::MAX)
}

impl TypeDescriptor {
    /// Decode the value stored at `location`.
    pub fn decode_from_storage<'a>(
        &'a self,
        location: StorageLocation,
        ctx: StorageContext<'a>,
    ) -> BoxFuture<'a, DecodedValue> {
        match &self.kind {
            TypeKind::DynamicBytes | TypeKind::String => {
                Box::pin(bytes::decode_from_storage(self, location, ctx))
            }
            TypeKind::Array { element, size } => {
                Box::pin(array::decode_from_storage(self, element, *size, location, ctx))
            }
            TypeKind::Struct(layout) => {
                Box::pin(structs::decode_from_storage(self, &layout.members, location, ctx))
            }
            TypeKind::StructRef(reference) => match reference.layout() {
                Some(layout) => Box::pin(async move {
                    structs::decode_from_storage(self, &layout.members, location, ctx).await
                }),
                None => Box::pin(async move { self.unexpanded(reference) }),
            },
            TypeKind::Mapping { key, value } => {
                Box::pin(mapping::decode_from_storage(self, key, value, location, ctx))
            }
            _ => Box::pin(value::decode_from_storage(self, location, ctx)),
        }
    }

    /// Decode the value whose word sits at byte `offset` of memory. For reference
    /// types that word is a pointer to the data.
    pub fn decode_from_memory(
        &self,
        offset: usize,
        memory: &[u8],
        config: &DecoderConfig,
    ) -> DecodedValue {
        if self.is_value_type() {
            return DecodedValue::new(&self.type_name, decode_word(self, &memory_word(memory, offset)));
        }
        let pointer = word_to_offset(memory_word(memory, offset).into());
        self.decode_memory_data(pointer, memory, config)
    }

    /// Decode reference type data starting at byte `offset` of memory.
    pub(crate) fn decode_memory_data(
        &self,
        offset: usize,
        memory: &[u8],
        config: &DecoderConfig,
    ) -> DecodedValue {
        match &self.kind {
            TypeKind::DynamicBytes | TypeKind::String => {
                bytes::decode_from_memory(self, offset, memory, config)
            }
            TypeKind::Array { element, size } => {
                array::decode_from_memory(self, element, *size, offset, memory, config)
            }
            TypeKind::Struct(layout) => {
                structs::decode_from_memory(self, &layout.members, offset, memory, config)
            }
            // memory pointers can form cycles, so self-references are not followed
            TypeKind::StructRef(reference) => self.unexpanded(reference),
            TypeKind::Mapping { .. } => DecodedValue::new(
                &self.type_name,
                DecodedData::Error("<mapping not available in memory>".to_string()),
            ),
            _ => DecodedValue::new(&self.type_name, decode_word(self, &memory_word(memory, offset))),
        }
    }

    fn unexpanded(&self, reference: &StructRef) -> DecodedValue {
        DecodedValue::error(
            &self.type_name,
            TypeResolutionError::RecursiveStruct(reference.name.clone()),
        )
    }

    /// Decode the value held at `depth` from the top of the stack.
    ///
    /// Value types read the word itself; a missing stack item reads as zero. Reference
    /// types treat the word as a slot or a memory offset depending on their location.
    pub fn decode_from_stack<'a>(
        &'a self,
        depth: usize,
        stack: &'a [U256],
        memory: &'a [u8],
        ctx: StorageContext<'a>,
    ) -> BoxFuture<'a, DecodedValue> {
        let item = stack
            .len()
            .checked_sub(depth)
            .and_then(|above| above.checked_sub(1))
            .map(|index| stack[index]);

        if self.is_value_type() {
            let word = B256::from(item.unwrap_or_default());
            return Box::pin(async move { DecodedValue::new(&self.type_name, decode_word(self, &word)) });
        }

        let Some(word) = item else {
            return Box::pin(async move {
                DecodedValue::error(&self.type_name, DecodeError::StackUnderflow(depth))
            });
        };
        match self.location {
            DataLocation::Storage => self.decode_from_storage(StorageLocation::from_slot(word), ctx),
            DataLocation::Memory => Box::pin(async move {
                self.decode_memory_data(word_to_offset(word), memory, ctx.config)
            }),
            location => Box::pin(async move {
                DecodedValue::error(
                    &self.type_name,
                    DecodeError::UnsupportedLocation(location.to_string()),
                )
            }),
        }
    }
}
