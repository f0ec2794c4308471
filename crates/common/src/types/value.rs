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

//! Decoded Solidity values.
//!
//! Every decode produces a [`DecodedValue`]: the Solidity type name plus the
//! [`DecodedData`] recovered from storage, memory or the stack. Failures are values
//! too ([`DecodedData::Error`]), so a broken field never hides its siblings.

use alloy_primitives::{hex, Address, Bytes, I256, U256};
use serde::{Deserialize, Serialize};

/// A decoded value tagged with its Solidity type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedValue {
    /// Solidity type name, e.g. `uint256`, `struct C.S`, `mapping(address => uint256)`
    #[serde(rename = "type")]
    pub type_name: String,
    /// The decoded content
    pub data: DecodedData,
}

/// The content of a decoded value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum DecodedData {
    /// Unsigned integer
    Uint(U256),
    /// Two's-complement signed integer
    Int(I256),
    /// Boolean
    Bool(bool),
    /// Account address
    Address(Address),
    /// `bytesN`, left-justified
    FixedBytes(Bytes),
    /// A declared enum variant
    Enum {
        /// Variant name
        name: String,
        /// Variant index
        index: u64,
    },
    /// An enum discriminant outside the declared variants
    InvalidEnum {
        /// The raw discriminant
        index: U256,
    },
    /// Dynamic `bytes`
    Bytes {
        /// Content
        value: Bytes,
        /// Length as recorded by the control word
        length: U256,
    },
    /// A `string` holding valid UTF-8
    String {
        /// Decoded text
        value: String,
        /// Length in bytes as recorded by the control word
        length: U256,
    },
    /// A `string` whose bytes are not valid UTF-8
    InvalidUtf8 {
        /// The raw bytes
        raw: Bytes,
        /// Length in bytes as recorded by the control word
        length: U256,
    },
    /// Fixed or dynamic array. `elements` may be shorter than `length` when the
    /// length exceeds the iteration cap.
    Array {
        /// Decoded elements in ascending index order
        elements: Vec<DecodedValue>,
        /// Declared or stored length
        length: U256,
    },
    /// Struct members in declaration order
    Struct(Vec<NamedValue>),
    /// Mapping entries whose keys could be recovered
    Mapping(Vec<MappingEntry>),
    /// A constant state variable; it has no storage
    Constant,
    /// Decoding failed; carries a description of why
    Error(String),
}

/// A struct member or a named variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    /// Member name
    pub name: String,
    /// Member value
    pub value: DecodedValue,
}

/// A mapping entry recovered from a hashed storage slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Raw key bytes as hashed by the contract
    pub key: Bytes,
    /// The key rendered with the mapping's key type
    pub display_key: String,
    /// The value stored under the key
    pub value: DecodedValue,
}

impl DecodedValue {
    /// Creates a new decoded value.
    pub fn new(type_name: impl Into<String>, data: DecodedData) -> Self {
        Self { type_name: type_name.into(), data }
    }

    /// Creates a decode failure for a value of the given type.
    pub fn error(type_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::new(type_name, DecodedData::Error(format!("<decoding failed - {reason}>")))
    }

    /// Returns true if this value (not its children) is a decode failure.
    pub fn is_error(&self) -> bool {
        matches!(self.data, DecodedData::Error(_))
    }

    /// Looks up a struct member by name.
    pub fn member(&self, name: &str) -> Option<&DecodedValue> {
        match &self.data {
            DecodedData::Struct(members) => {
                members.iter().find(|member| member.name == name).map(|member| &member.value)
            }
            _ => None,
        }
    }

    /// Returns the array elements, if this is an array.
    pub fn elements(&self) -> Option<&[DecodedValue]> {
        match &self.data {
            DecodedData::Array { elements, .. } => Some(elements),
            _ => None,
        }
    }

    /// Looks up a mapping entry by its rendered key.
    pub fn entry(&self, display_key: &str) -> Option<&DecodedValue> {
        match &self.data {
            DecodedData::Mapping(entries) => entries
                .iter()
                .find(|entry| entry.display_key == display_key)
                .map(|entry| &entry.value),
            _ => None,
        }
    }
}

/// Trait for formatting decoded values into human-readable strings.
pub trait ValueFormatter {
    /// Formats a value into a human-readable string.
    fn format_value(&self, ctx: &ValueFormatterContext) -> String {
        self.format_value_with_indent(ctx, 0)
    }

    /// Formats a value with specific indentation level.
    fn format_value_with_indent(&self, ctx: &ValueFormatterContext, indent_level: usize)
        -> String;
}

/// Configuration context for formatting decoded values
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueFormatterContext {
    /// Whether to include type information in the formatted output
    pub with_ty: bool,
    /// Whether to shorten long arrays, strings, and other large data structures
    pub shorten_long: bool,
    /// Whether to use multi-line formatting for better readability of complex structures
    pub multi_line: bool,
}

impl ValueFormatterContext {
    /// Create a new default formatter context
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure whether to include type information in formatted output
    pub fn with_ty(mut self, with_ty: bool) -> Self {
        self.with_ty = with_ty;
        self
    }

    /// Configure whether to shorten long data structures for readability
    pub fn shorten_long(mut self, shorten_long: bool) -> Self {
        self.shorten_long = shorten_long;
        self
    }

    /// Configure whether to use multi-line formatting for complex structures
    pub fn multi_line(mut self, multi_line: bool) -> Self {
        self.multi_line = multi_line;
        self
    }
}

impl ValueFormatter for DecodedValue {
    fn format_value_with_indent(
        &self,
        ctx: &ValueFormatterContext,
        indent_level: usize,
    ) -> String {
        let value_str = match &self.data {
            DecodedData::Uint(n) => n.to_string(),
            DecodedData::Int(n) => n.to_string(),
            DecodedData::Bool(b) => b.to_string(),
            DecodedData::Address(addr) => {
                let addr_str = addr.to_checksum(None);
                if ctx.shorten_long {
                    format!("{}...{}", &addr_str[..8], &addr_str[addr_str.len() - 6..])
                } else {
                    addr_str
                }
            }
            DecodedData::FixedBytes(bytes) => format!("0x{}", hex::encode(bytes)),
            DecodedData::Enum { name, .. } => name.clone(),
            DecodedData::InvalidEnum { index } => format!("INVALID_ENUM<{index}>"),
            DecodedData::Bytes { value, .. } => {
                if value.len() <= 32 || !ctx.shorten_long {
                    format!("0x{}", hex::encode(value))
                } else {
                    format!("0x{}...[{} bytes]", hex::encode(&value[..16]), value.len())
                }
            }
            DecodedData::String { value, .. } => {
                if value.chars().count() <= 64 || !ctx.shorten_long {
                    format!("\"{}\"", value.replace('\"', "\\\""))
                } else {
                    let head: String = value.chars().take(32).collect();
                    format!("\"{}...\"[{} chars]", head.replace('\"', "\\\""), value.chars().count())
                }
            }
            DecodedData::InvalidUtf8 { raw, .. } => {
                format!("<invalid UTF-8 encoding: 0x{}>", hex::encode(raw))
            }
            DecodedData::Array { elements, length } => {
                format_array(elements, *length, ctx, indent_level)
            }
            DecodedData::Struct(members) => {
                let fields: Vec<(String, &Self)> =
                    members.iter().map(|m| (m.name.clone(), &m.value)).collect();
                format_fields(&fields, "{", "}", ctx, indent_level)
            }
            DecodedData::Mapping(entries) => {
                let fields: Vec<(String, &Self)> =
                    entries.iter().map(|e| (e.display_key.clone(), &e.value)).collect();
                format_fields(&fields, "{", "}", ctx, indent_level)
            }
            DecodedData::Constant => "<constant>".to_string(),
            DecodedData::Error(reason) => reason.clone(),
        };

        if ctx.with_ty && !matches!(self.data, DecodedData::Error(_)) {
            format!("{}({})", self.type_name, value_str)
        } else {
            value_str
        }
    }
}

/// Helper function to create indentation string
fn make_indent(indent_level: usize) -> String {
    "  ".repeat(indent_level)
}

fn format_array(
    arr: &[DecodedValue],
    length: U256,
    ctx: &ValueFormatterContext,
    indent_level: usize,
) -> String {
    const MAX_DISPLAY_ITEMS: usize = 5;

    if arr.is_empty() {
        return "[]".to_string();
    }

    // the stored length may exceed what was decoded
    let truncated = U256::from(arr.len()) < length;
    let shorten = ctx.shorten_long && arr.len() > MAX_DISPLAY_ITEMS;

    let shown = if shorten { 3 } else { arr.len() };
    let mut items: Vec<String> = arr
        .iter()
        .take(shown)
        .map(|v| v.format_value_with_indent(ctx, indent_level + ctx.multi_line as usize))
        .collect();
    if shorten || truncated {
        items.push(format!("...[{length} items]"));
    }

    if ctx.multi_line && items.len() > 1 {
        let child_indent = make_indent(indent_level + 1);
        let current_indent = make_indent(indent_level);
        let items: Vec<String> = items.iter().map(|item| format!("{child_indent}{item}")).collect();
        format!("[\n{}\n{}]", items.join(",\n"), current_indent)
    } else {
        format!("[{}]", items.join(", "))
    }
}

fn format_fields(
    fields: &[(String, &DecodedValue)],
    open: &str,
    close: &str,
    ctx: &ValueFormatterContext,
    indent_level: usize,
) -> String {
    const MAX_DISPLAY_FIELDS: usize = 4;

    if fields.is_empty() {
        return format!("{open}{close}");
    }

    let shorten = ctx.shorten_long && fields.len() > MAX_DISPLAY_FIELDS;
    let shown = if shorten { 3 } else { fields.len() };
    let mut items: Vec<String> = fields
        .iter()
        .take(shown)
        .map(|(name, value)| {
            format!(
                "{}: {}",
                name,
                value.format_value_with_indent(ctx, indent_level + ctx.multi_line as usize)
            )
        })
        .collect();
    if shorten {
        items.push(format!("...[{} fields]", fields.len()));
    }

    if ctx.multi_line && items.len() > 1 {
        let child_indent = make_indent(indent_level + 1);
        let current_indent = make_indent(indent_level);
        let items: Vec<String> = items.iter().map(|item| format!("{child_indent}{item}")).collect();
        format!("{open}\n{}\n{current_indent}{close}", items.join(",\n"))
    } else {
        format!("{open} {} {close}", items.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn uint(n: u64) -> DecodedValue {
        DecodedValue::new("uint256", DecodedData::Uint(U256::from(n)))
    }

    #[test]
    fn test_serialize_deserialize_struct() {
        let value = DecodedValue::new(
            "struct C.Pair",
            DecodedData::Struct(vec![
                NamedValue { name: "a".to_string(), value: uint(1) },
                NamedValue {
                    name: "owner".to_string(),
                    value: DecodedValue::new(
                        "address",
                        DecodedData::Address(address!("0000000000000000000000000000000000000001")),
                    ),
                },
            ]),
        );
        let serialized = serde_json::to_string(&value).unwrap();
        let deserialized: DecodedValue = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, value);
        assert_eq!(deserialized.member("a"), Some(&uint(1)));
    }

    #[test]
    fn test_serialized_shape() {
        let value = DecodedValue::new("bool", DecodedData::Bool(true));
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "bool");
        assert_eq!(json["data"]["kind"], "Bool");
        assert_eq!(json["data"]["value"], true);
    }

    #[test]
    fn test_error_value() {
        let value = DecodedValue::error("uint8", "storage unavailable");
        assert!(value.is_error());
        assert_eq!(
            value.format_value(&ValueFormatterContext::new().with_ty(true)),
            "<decoding failed - storage unavailable>"
        );
    }

    #[test]
    fn test_format_with_type() {
        let ctx = ValueFormatterContext::new().with_ty(true);
        assert_eq!(uint(42).format_value(&ctx), "uint256(42)");

        let invalid = DecodedValue::new("enum", DecodedData::InvalidEnum { index: U256::from(9) });
        assert_eq!(invalid.format_value(&ValueFormatterContext::new()), "INVALID_ENUM<9>");
    }

    #[test]
    fn test_format_array_shortened() {
        let arr = DecodedValue::new(
            "uint256[]",
            DecodedData::Array {
                elements: (0..10).map(uint).collect(),
                length: U256::from(10),
            },
        );
        let ctx = ValueFormatterContext::new().shorten_long(true);
        assert_eq!(arr.format_value(&ctx), "[0, 1, 2, ...[10 items]]");
        assert_eq!(
            arr.format_value(&ValueFormatterContext::new()),
            "[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]"
        );
    }

    #[test]
    fn test_format_truncated_array() {
        let arr = DecodedValue::new(
            "uint256[]",
            DecodedData::Array { elements: vec![uint(7)], length: U256::from(1000) },
        );
        assert_eq!(arr.format_value(&ValueFormatterContext::new()), "[7, ...[1000 items]]");
    }

    #[test]
    fn test_format_mapping_multi_line() {
        let mapping = DecodedValue::new(
            "mapping(uint256 => uint256)",
            DecodedData::Mapping(vec![
                MappingEntry { key: Bytes::new(), display_key: "1".to_string(), value: uint(10) },
                MappingEntry { key: Bytes::new(), display_key: "2".to_string(), value: uint(20) },
            ]),
        );
        let ctx = ValueFormatterContext::new().multi_line(true);
        assert_eq!(mapping.format_value(&ctx), "{\n  1: 10,\n  2: 20\n}");
        assert_eq!(mapping.entry("2"), Some(&uint(20)));
    }

    #[test]
    fn test_format_invalid_utf8() {
        let value = DecodedValue::new(
            "string",
            DecodedData::InvalidUtf8 { raw: Bytes::from(vec![0xff, 0xfe]), length: U256::from(2) },
        );
        assert_eq!(
            value.format_value(&ValueFormatterContext::new()),
            "<invalid UTF-8 encoding: 0xfffe>"
        );
    }
}
