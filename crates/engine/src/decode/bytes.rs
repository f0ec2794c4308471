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

//! Dynamic `bytes` and `string`.

use alloy_primitives::{keccak256, Bytes, U256};
use futures::stream::{self, StreamExt};
use slotlens_common::{DecodedData, DecodedValue, StorageLocation, WORD_SIZE};
use tracing::warn;

use super::{memory_slice, memory_word, StorageContext};
use crate::{DecodeError, DecoderConfig, TypeDescriptor, TypeKind};

/// Content slots of a long byte string read at the same time.
const CONCURRENT_CONTENT_READS: usize = 32;

/// Wrap raw content as `bytes` or `string` data.
fn content(ty: &TypeDescriptor, raw: Vec<u8>, length: U256) -> DecodedValue {
    let data = match ty.kind {
        TypeKind::String => match String::from_utf8(raw) {
            Ok(value) => DecodedData::String { value, length },
            Err(err) => DecodedData::InvalidUtf8 { raw: Bytes::from(err.into_bytes()), length },
        },
        _ => DecodedData::Bytes { value: Bytes::from(raw), length },
    };
    DecodedValue::new(&ty.type_name, data)
}

fn check_length(length: U256, config: &DecoderConfig) -> Result<usize, DecodeError> {
    usize::try_from(length).ok().filter(|len| *len <= config.max_bytes_length).ok_or_else(|| {
        DecodeError::TooLarge {
            what: "byte length",
            value: length.to_string(),
            limit: config.max_bytes_length,
        }
    })
}

pub(super) async fn decode_from_storage(
    ty: &TypeDescriptor,
    location: StorageLocation,
    ctx: StorageContext<'_>,
) -> DecodedValue {
    let control = match ctx.reader.storage_slot(location.slot).await {
        Ok(entry) => entry.value,
        Err(err) => return DecodedValue::error(&ty.type_name, err),
    };

    if control[WORD_SIZE - 1] & 1 == 0 {
        // short form: content inline, length doubled in the lowest byte
        let length = (control[WORD_SIZE - 1] / 2) as usize;
        if length >= WORD_SIZE {
            return DecodedValue::error(&ty.type_name, format!("invalid short length {length}"));
        }
        return content(ty, control[..length].to_vec(), U256::from(length));
    }

    let length = U256::from_be_bytes(control.0) >> 1;
    let byte_length = match check_length(length, ctx.config) {
        Ok(len) => len,
        Err(err) => {
            warn!(%location, %err, "oversized byte string");
            return DecodedValue::error(&ty.type_name, err);
        }
    };

    let base = U256::from_be_bytes(keccak256(location.slot.to_be_bytes::<32>()).0);
    let slots = byte_length.div_ceil(WORD_SIZE);
    let mut words = stream::iter(0..slots)
        .map(|i| ctx.reader.storage_slot(base.wrapping_add(U256::from(i))))
        .buffered(CONCURRENT_CONTENT_READS);

    let mut raw = Vec::with_capacity(slots * WORD_SIZE);
    while let Some(word) = words.next().await {
        match word {
            Ok(entry) => raw.extend_from_slice(entry.value.as_slice()),
            Err(err) => return DecodedValue::error(&ty.type_name, err),
        }
    }
    raw.truncate(byte_length);
    content(ty, raw, length)
}

pub(super) fn decode_from_memory(
    ty: &TypeDescriptor,
    offset: usize,
    memory: &[u8],
    config: &DecoderConfig,
) -> DecodedValue {
    let length = U256::from_be_bytes(memory_word(memory, offset).0);
    match check_length(length, config) {
        Ok(len) => {
            content(ty, memory_slice(memory, offset.saturating_add(WORD_SIZE), len), length)
        }
        Err(err) => DecodedValue::error(&ty.type_name, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use crate::{
        parse_type,
        test_utils::{encode_byte_string, StorageFixture},
        ContractDefinitions, DataLocation, MappingPreimageIndex, StorageError, StorageReader,
    };
    use alloy_primitives::{address, Address, B256};
    use async_trait::async_trait;
    use slotlens_common::StorageEntry;

    const ACCOUNT: Address = address!("00000000000000000000000000000000000000c0");

    fn ty(type_string: &str) -> TypeDescriptor {
        parse_type(type_string, &ContractDefinitions::new(), "C", DataLocation::Storage).unwrap()
    }

    async fn decode(fixture: &StorageFixture, type_string: &str, config: &DecoderConfig) -> DecodedValue {
        let viewer = fixture.viewer(ACCOUNT, 0).await;
        ty(type_string)
            .decode_from_storage(StorageLocation::from_slot(U256::from(2)), StorageContext::new(&viewer, config))
            .await
    }

    #[tokio::test]
    async fn test_short_string() {
        let fixture = StorageFixture::new();
        fixture.storage.set_bytes(ACCOUNT, U256::from(2), b"hello");
        let decoded = decode(&fixture, "string", &DecoderConfig::default()).await;
        assert_eq!(decoded.data, DecodedData::String { value: "hello".into(), length: U256::from(5) });
    }

    #[tokio::test]
    async fn test_long_string_spans_slots() {
        let text = "a string that is definitely longer than thirty-one bytes, spanning three slots";
        let fixture = StorageFixture::new();
        fixture.storage.set_bytes(ACCOUNT, U256::from(2), text.as_bytes());
        let decoded = decode(&fixture, "string", &DecoderConfig::default()).await;
        assert_eq!(
            decoded.data,
            DecodedData::String { value: text.into(), length: U256::from(text.len()) }
        );
    }

    #[tokio::test]
    async fn test_string_length_boundaries() {
        for (length, slots) in [(31usize, 0usize), (32, 1), (40, 2)] {
            let text: String = ('a'..='z').cycle().take(length).collect();
            let fixture = StorageFixture::new();
            fixture.storage.set_bytes(ACCOUNT, U256::from(2), text.as_bytes());

            let words = encode_byte_string(U256::from(2), text.as_bytes());
            assert_eq!(words.len() - 1, slots, "length {length}");
            assert_eq!(words[0].1[WORD_SIZE - 1] & 1 == 1, slots > 0, "length {length}");

            let decoded = decode(&fixture, "string", &DecoderConfig::default()).await;
            assert_eq!(
                decoded.data,
                DecodedData::String { value: text.clone(), length: U256::from(length) },
                "length {length}"
            );
        }
    }

    #[tokio::test]
    async fn test_long_bytes_keep_trailing_zeros() {
        let mut payload = vec![0xab; 40];
        payload.extend_from_slice(&[0, 0]);
        let fixture = StorageFixture::new();
        fixture.storage.set_bytes(ACCOUNT, U256::from(2), &payload);
        let decoded = decode(&fixture, "bytes", &DecoderConfig::default()).await;
        assert_eq!(
            decoded.data,
            DecodedData::Bytes { value: Bytes::from(payload), length: U256::from(42) }
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_raw() {
        let fixture = StorageFixture::new();
        fixture.storage.set_bytes(ACCOUNT, U256::from(2), &[0x61, 0xff, 0xfe]);
        let decoded = decode(&fixture, "string", &DecoderConfig::default()).await;
        assert_eq!(
            decoded.data,
            DecodedData::InvalidUtf8 { raw: Bytes::from(vec![0x61, 0xff, 0xfe]), length: U256::from(3) }
        );
    }

    #[tokio::test]
    async fn test_oversized_length_is_an_error() {
        let fixture = StorageFixture::new();
        // long form claiming 2^200 bytes
        fixture.storage.set(ACCOUNT, U256::from(2), (U256::from(1) << 201) | U256::from(1));
        let decoded = decode(&fixture, "bytes", &DecoderConfig::default()).await;
        assert!(decoded.is_error());

        fixture.storage.set_bytes(ACCOUNT, U256::from(2), &[1u8; 64]);
        fixture.resolver.reset();
        let capped = decode(&fixture, "bytes", &DecoderConfig::default().with_max_bytes_length(32)).await;
        assert!(capped.is_error());
        assert_eq!(fixture.storage.fetch_count(), 2);
    }

    #[test]
    fn test_memory_bytes() {
        let mut memory = vec![0u8; 32];
        memory.extend_from_slice(&U256::from(4).to_be_bytes::<32>());
        memory.extend_from_slice(&[1, 2, 3, 4]);
        let decoded = decode_from_memory(&ty("bytes memory"), 32, &memory, &DecoderConfig::default());
        assert_eq!(
            decoded.data,
            DecodedData::Bytes { value: Bytes::from(vec![1, 2, 3, 4]), length: U256::from(4) }
        );
        assert_eq!(memory_word(&memory, 32), B256::from(U256::from(4)));
    }

    /// Serves a long `bytes` header at slot 2 and records how many content reads
    /// are in flight at once.
    #[derive(Default)]
    struct InFlightReader {
        length: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl StorageReader for InFlightReader {
        async fn storage_slot(&self, slot: U256) -> Result<StorageEntry, StorageError> {
            if slot == U256::from(2) {
                let header = U256::from(self.length * 2 + 1);
                return Ok(StorageEntry::new(slot, B256::from(header)));
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(StorageEntry::new(slot, B256::repeat_byte(0x11)))
        }

        async fn initial_mappings_location(
            &self,
            _corrections: &[U256],
        ) -> Result<Arc<MappingPreimageIndex>, StorageError> {
            Ok(Arc::default())
        }

        async fn mappings_location(
            &self,
            _corrections: &[U256],
        ) -> Result<Arc<MappingPreimageIndex>, StorageError> {
            Ok(Arc::default())
        }
    }

    #[tokio::test]
    async fn test_long_content_reads_are_bounded() {
        let reader = InFlightReader { length: 1 << 16, ..Default::default() };
        let config = DecoderConfig::default();
        let decoded = ty("bytes")
            .decode_from_storage(
                StorageLocation::from_slot(U256::from(2)),
                StorageContext::new(&reader, &config),
            )
            .await;

        let DecodedData::Bytes { value, .. } = &decoded.data else { panic!("not bytes") };
        assert_eq!(value.len(), 1 << 16);
        assert_eq!(reader.reads.load(Ordering::SeqCst), (1 << 16) / WORD_SIZE);
        let peak = reader.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= CONCURRENT_CONTENT_READS, "peak {peak}");
    }
}
