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

//! Fixed and dynamic arrays.

use alloy_primitives::{keccak256, U256};
use futures::future::join_all;
use slotlens_common::{DecodedData, DecodedValue, StorageLocation, WORD_SIZE};
use tracing::debug;

use super::{memory_word, StorageContext};
use crate::{DecoderConfig, TypeDescriptor};

/// Number of elements actually decoded for a declared length.
fn capped(length: U256, config: &DecoderConfig) -> usize {
    usize::try_from(length).unwrap_or(usize::MAX).min(config.max_array_elements)
}

/// Storage locations of the first `count` elements starting at `base`.
fn element_locations(element: &TypeDescriptor, base: U256, count: usize) -> Vec<StorageLocation> {
    let one = U256::from(1);
    let mut current = StorageLocation::from_slot(base);
    let mut locations = Vec::with_capacity(count);
    for _ in 0..count {
        locations.push(current);
        if element.storage_slots == one && element.storage_bytes <= WORD_SIZE {
            current.offset += element.storage_bytes;
            if current.offset + element.storage_bytes > WORD_SIZE {
                current = StorageLocation::from_slot(current.slot.wrapping_add(one));
            }
        } else {
            current = StorageLocation::from_slot(current.slot.wrapping_add(element.storage_slots));
        }
    }
    locations
}

pub(super) async fn decode_from_storage(
    ty: &TypeDescriptor,
    element: &TypeDescriptor,
    size: Option<U256>,
    location: StorageLocation,
    ctx: StorageContext<'_>,
) -> DecodedValue {
    let (length, base) = match size {
        Some(size) => (size, location.slot),
        None => match ctx.reader.storage_slot(location.slot).await {
            Ok(entry) => (
                entry.value_u256(),
                U256::from_be_bytes(keccak256(location.slot.to_be_bytes::<32>()).0),
            ),
            Err(err) => return DecodedValue::error(&ty.type_name, err),
        },
    };

    let count = capped(length, ctx.config);
    if U256::from(count) < length {
        debug!(array = %ty.type_name, %length, decoded = count, "array truncated");
    }

    let element = element.resolved();
    let element = element.as_ref();
    let elements = join_all(
        element_locations(element, base, count)
            .into_iter()
            .map(|location| element.decode_from_storage(location, ctx)),
    )
    .await;
    DecodedValue::new(&ty.type_name, DecodedData::Array { elements, length })
}

pub(super) fn decode_from_memory(
    ty: &TypeDescriptor,
    element: &TypeDescriptor,
    size: Option<U256>,
    offset: usize,
    memory: &[u8],
    config: &DecoderConfig,
) -> DecodedValue {
    let (length, start) = match size {
        Some(size) => (size, offset),
        None => (memory_word(memory, offset).into(), offset.saturating_add(WORD_SIZE)),
    };

    let elements = (0..capped(length, config))
        .map(|i| {
            let position = start.saturating_add(i.saturating_mul(WORD_SIZE));
            element.decode_from_memory(position, memory, config)
        })
        .collect();
    DecodedValue::new(&ty.type_name, DecodedData::Array { elements, length })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parse_type, test_utils::StorageFixture, ContractDefinitions, DataLocation,
        StructDefinition,
    };
    use alloy_primitives::{address, Address};

    const ACCOUNT: Address = address!("00000000000000000000000000000000000000c0");

    fn ty(type_string: &str) -> TypeDescriptor {
        let mut defs = ContractDefinitions::new();
        defs.add_struct(
            StructDefinition::new("C.Pair").with_member("a", "uint128").with_member("b", "bool"),
        );
        parse_type(type_string, &defs, "C", DataLocation::Storage).unwrap()
    }

    fn content_base(slot: u64) -> U256 {
        U256::from_be_bytes(keccak256(U256::from(slot).to_be_bytes::<32>()).0)
    }

    async fn decode(fixture: &StorageFixture, type_string: &str, config: &DecoderConfig) -> DecodedValue {
        let viewer = fixture.viewer(ACCOUNT, 0).await;
        ty(type_string)
            .decode_from_storage(StorageLocation::from_slot(U256::from(3)), StorageContext::new(&viewer, config))
            .await
    }

    fn uints(value: &DecodedValue) -> Vec<U256> {
        value
            .elements()
            .unwrap()
            .iter()
            .map(|element| match element.data {
                DecodedData::Uint(n) => n,
                ref other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_packed_element_locations() {
        let locations = element_locations(&ty("uint64"), U256::ZERO, 5);
        assert_eq!(locations[3], StorageLocation::new(U256::ZERO, 24));
        assert_eq!(locations[4], StorageLocation::new(U256::from(1), 0));

        let locations = element_locations(&ty("uint128[2]"), U256::from(10), 2);
        assert_eq!(locations[1], StorageLocation::from_slot(U256::from(11)));

        let locations = element_locations(&ty("bytes3"), U256::ZERO, 11);
        assert_eq!(locations[9], StorageLocation::new(U256::ZERO, 27));
        assert_eq!(locations[10], StorageLocation::new(U256::from(1), 0));
    }

    #[tokio::test]
    async fn test_dynamic_array_content_base() {
        let fixture = StorageFixture::new();
        fixture.storage.set(ACCOUNT, U256::from(3), U256::from(3));
        let base = content_base(3);
        for i in 0..3u64 {
            fixture.storage.set(ACCOUNT, base + U256::from(i), U256::from(10 + i));
        }

        let decoded = decode(&fixture, "uint256[]", &DecoderConfig::default()).await;
        assert_eq!(uints(&decoded), vec![U256::from(10), U256::from(11), U256::from(12)]);
        let DecodedData::Array { length, .. } = decoded.data else { panic!("not an array") };
        assert_eq!(length, U256::from(3));
    }

    #[tokio::test]
    async fn test_fixed_packed_array() {
        let fixture = StorageFixture::new();
        // uint128[3]: slot 3 holds [0] low and [1] high, slot 4 holds [2]
        fixture.storage.set(ACCOUNT, U256::from(3), (U256::from(2) << 128) | U256::from(1));
        fixture.storage.set(ACCOUNT, U256::from(4), U256::from(3));

        let decoded = decode(&fixture, "uint128[3]", &DecoderConfig::default()).await;
        assert_eq!(uints(&decoded), vec![U256::from(1), U256::from(2), U256::from(3)]);
    }

    #[tokio::test]
    async fn test_array_of_structs() {
        let fixture = StorageFixture::new();
        fixture.storage.set(ACCOUNT, U256::from(3), U256::from(2));
        let base = content_base(3);
        fixture.storage.set(ACCOUNT, base, (U256::from(1) << 128) | U256::from(5));
        fixture.storage.set(ACCOUNT, base + U256::from(1), U256::from(6));

        let decoded = decode(&fixture, "struct C.Pair[]", &DecoderConfig::default()).await;
        let elements = decoded.elements().unwrap();
        assert_eq!(elements[0].member("a").unwrap().data, DecodedData::Uint(U256::from(5)));
        assert_eq!(elements[0].member("b").unwrap().data, DecodedData::Bool(true));
        assert_eq!(elements[1].member("a").unwrap().data, DecodedData::Uint(U256::from(6)));
        assert_eq!(elements[1].member("b").unwrap().data, DecodedData::Bool(false));
    }

    #[tokio::test]
    async fn test_length_is_capped() {
        let fixture = StorageFixture::new();
        fixture.storage.set(ACCOUNT, U256::from(3), U256::MAX);

        let decoded =
            decode(&fixture, "uint256[]", &DecoderConfig::default().with_max_array_elements(4)).await;
        assert_eq!(decoded.elements().unwrap().len(), 4);
        let DecodedData::Array { length, .. } = decoded.data else { panic!("not an array") };
        assert_eq!(length, U256::MAX);

        let default_cap = decode(&fixture, "uint8[]", &DecoderConfig::default()).await;
        assert_eq!(default_cap.elements().unwrap().len(), 300);
    }

    #[test]
    fn test_memory_arrays() {
        let config = DecoderConfig::default();
        let mut memory = Vec::new();
        for word in [2u64, 7, 8] {
            memory.extend_from_slice(&U256::from(word).to_be_bytes::<32>());
        }
        let dynamic = decode_from_memory(&ty("uint256[] memory"), &ty("uint256"), None, 0, &memory, &config);
        assert_eq!(uints(&dynamic), vec![U256::from(7), U256::from(8)]);

        let fixed = ty("uint256[2] memory").decode_memory_data(32, &memory, &config);
        assert_eq!(uints(&fixed), vec![U256::from(7), U256::from(8)]);
    }
}
