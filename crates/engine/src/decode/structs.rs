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

//! Structs.

use futures::future::join_all;
use slotlens_common::{DecodedData, DecodedValue, NamedValue, StorageLocation, WORD_SIZE};

use super::StorageContext;
use crate::{DecoderConfig, MemberLayout, TypeDescriptor};

pub(super) async fn decode_from_storage(
    ty: &TypeDescriptor,
    members: &[MemberLayout],
    location: StorageLocation,
    ctx: StorageContext<'_>,
) -> DecodedValue {
    let values = join_all(
        members.iter().map(|member| member.ty.decode_from_storage(location.shifted(&member.location), ctx)),
    )
    .await;

    let members = members
        .iter()
        .zip(values)
        .map(|(member, value)| NamedValue { name: member.name.clone(), value })
        .collect();
    DecodedValue::new(&ty.type_name, DecodedData::Struct(members))
}

/// In memory every member takes one word; reference members hold a pointer.
pub(super) fn decode_from_memory(
    ty: &TypeDescriptor,
    members: &[MemberLayout],
    offset: usize,
    memory: &[u8],
    config: &DecoderConfig,
) -> DecodedValue {
    let members = members
        .iter()
        .enumerate()
        .map(|(i, member)| NamedValue {
            name: member.name.clone(),
            value: member.ty.decode_from_memory(
                offset.saturating_add(i.saturating_mul(WORD_SIZE)),
                memory,
                config,
            ),
        })
        .collect();
    DecodedValue::new(&ty.type_name, DecodedData::Struct(members))
}

#[cfg(test)]
mod tests {
    use crate::{
        decode::StorageContext, parse_type, test_utils::StorageFixture, ContractDefinitions,
        DataLocation, DecoderConfig, StructDefinition, TypeDescriptor,
    };
    use alloy_primitives::{address, keccak256, Address, U256};
    use slotlens_common::{DecodedData, StorageLocation};

    const ACCOUNT: Address = address!("00000000000000000000000000000000000000c0");

    fn ty(type_string: &str) -> TypeDescriptor {
        let mut defs = ContractDefinitions::new();
        defs.add_struct(
            StructDefinition::new("C.Halves").with_member("a", "uint128").with_member("b", "uint128"),
        )
        .add_struct(
            StructDefinition::new("C.Flag").with_member("flag", "bool").with_member("rest", "uint248"),
        )
        .add_struct(
            StructDefinition::new("C.Split").with_member("flag", "bool").with_member("word", "uint256"),
        )
        .add_struct(
            StructDefinition::new("C.Outer")
                .with_member("inner", "struct C.Halves")
                .with_member("name", "string")
                .with_member("tail", "uint8"),
        )
        .add_struct(
            StructDefinition::new("C.Node")
                .with_member("value", "uint256")
                .with_member("children", "struct C.Node[]"),
        );
        parse_type(type_string, &defs, "C", DataLocation::Storage).unwrap()
    }

    #[tokio::test]
    async fn test_packing_shapes() {
        let fixture = StorageFixture::new();
        // Halves at slot 0, Flag at slot 1, Split at slots 2..4
        fixture.storage.set(ACCOUNT, U256::ZERO, (U256::from(2) << 128) | U256::from(1));
        fixture.storage.set(ACCOUNT, U256::from(1), (U256::from(9) << 8) | U256::from(1));
        fixture.storage.set(ACCOUNT, U256::from(2), U256::from(1));
        fixture.storage.set(ACCOUNT, U256::from(3), U256::from(77));
        let viewer = fixture.viewer(ACCOUNT, 0).await;
        let config = DecoderConfig::default();
        let ctx = StorageContext::new(&viewer, &config);

        let halves = ty("struct C.Halves").decode_from_storage(StorageLocation::default(), ctx).await;
        assert_eq!(halves.member("a").unwrap().data, DecodedData::Uint(U256::from(1)));
        assert_eq!(halves.member("b").unwrap().data, DecodedData::Uint(U256::from(2)));

        let flag = ty("struct C.Flag")
            .decode_from_storage(StorageLocation::from_slot(U256::from(1)), ctx)
            .await;
        assert_eq!(flag.member("flag").unwrap().data, DecodedData::Bool(true));
        assert_eq!(flag.member("rest").unwrap().data, DecodedData::Uint(U256::from(9)));

        let split = ty("struct C.Split")
            .decode_from_storage(StorageLocation::from_slot(U256::from(2)), ctx)
            .await;
        assert_eq!(split.member("flag").unwrap().data, DecodedData::Bool(true));
        assert_eq!(split.member("word").unwrap().data, DecodedData::Uint(U256::from(77)));
    }

    #[tokio::test]
    async fn test_nested_members_and_failures() {
        let fixture = StorageFixture::new();
        fixture.storage.set(ACCOUNT, U256::from(10), U256::from(3));
        fixture.storage.set_bytes(ACCOUNT, U256::from(11), b"nested");
        fixture.storage.set(ACCOUNT, U256::from(12), U256::from(4));
        let viewer = fixture.viewer(ACCOUNT, 0).await;
        let config = DecoderConfig::default();

        let outer = ty("struct C.Outer");
        assert_eq!(outer.storage_slots, U256::from(3));
        let decoded = outer
            .decode_from_storage(
                StorageLocation::from_slot(U256::from(10)),
                StorageContext::new(&viewer, &config),
            )
            .await;
        let inner = decoded.member("inner").unwrap();
        assert_eq!(inner.member("a").unwrap().data, DecodedData::Uint(U256::from(3)));
        assert_eq!(
            decoded.member("name").unwrap().data,
            DecodedData::String { value: "nested".into(), length: U256::from(6) }
        );
        assert_eq!(decoded.member("tail").unwrap().data, DecodedData::Uint(U256::from(4)));

        // a byte cap that rejects the string only breaks that member
        let tight = DecoderConfig::default().with_max_bytes_length(0);
        fixture.storage.set_bytes(ACCOUNT, U256::from(11), &[7u8; 40]);
        fixture.resolver.reset();
        let viewer = fixture.viewer(ACCOUNT, 0).await;
        let decoded = outer
            .decode_from_storage(
                StorageLocation::from_slot(U256::from(10)),
                StorageContext::new(&viewer, &tight),
            )
            .await;
        assert!(decoded.member("name").unwrap().is_error());
        assert_eq!(decoded.member("tail").unwrap().data, DecodedData::Uint(U256::from(4)));
    }

    fn content_base(slot: U256) -> U256 {
        U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0)
    }

    #[tokio::test]
    async fn test_recursive_struct_from_storage() {
        let fixture = StorageFixture::new();
        // root at slot 0 with two children; the second child has one child itself
        let children = content_base(U256::from(1));
        let second = children + U256::from(2);
        let grandchildren = content_base(second + U256::from(1));
        fixture.storage.set(ACCOUNT, U256::ZERO, U256::from(1));
        fixture.storage.set(ACCOUNT, U256::from(1), U256::from(2));
        fixture.storage.set(ACCOUNT, children, U256::from(10));
        fixture.storage.set(ACCOUNT, second, U256::from(20));
        fixture.storage.set(ACCOUNT, second + U256::from(1), U256::from(1));
        fixture.storage.set(ACCOUNT, grandchildren, U256::from(21));
        let viewer = fixture.viewer(ACCOUNT, 0).await;
        let config = DecoderConfig::default();

        let root = ty("struct C.Node")
            .decode_from_storage(StorageLocation::default(), StorageContext::new(&viewer, &config))
            .await;
        assert_eq!(root.member("value").unwrap().data, DecodedData::Uint(U256::from(1)));
        let kids = root.member("children").unwrap().elements().unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].member("value").unwrap().data, DecodedData::Uint(U256::from(10)));
        assert!(kids[0].member("children").unwrap().elements().unwrap().is_empty());
        assert_eq!(kids[1].member("value").unwrap().data, DecodedData::Uint(U256::from(20)));
        let grandkids = kids[1].member("children").unwrap().elements().unwrap();
        assert_eq!(grandkids.len(), 1);
        assert_eq!(grandkids[0].member("value").unwrap().data, DecodedData::Uint(U256::from(21)));
    }

    #[test]
    fn test_recursive_struct_in_memory_stops_at_the_self_reference() {
        let config = DecoderConfig::default();
        // node at 0x00: [value = 7, children -> 0x40]; array at 0x40: [1, -> 0x00]
        let mut memory = Vec::new();
        memory.extend_from_slice(&U256::from(7).to_be_bytes::<32>());
        memory.extend_from_slice(&U256::from(0x40).to_be_bytes::<32>());
        memory.extend_from_slice(&U256::from(1).to_be_bytes::<32>());
        memory.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());

        let node = ty("struct C.Node memory").decode_memory_data(0, &memory, &config);
        assert_eq!(node.member("value").unwrap().data, DecodedData::Uint(U256::from(7)));
        let kids = node.member("children").unwrap().elements().unwrap();
        assert_eq!(kids.len(), 1);
        assert!(kids[0].is_error());
    }
}
