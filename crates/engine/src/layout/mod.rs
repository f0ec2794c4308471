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

//! Type layout planning.
//!
//! Turns compiler type strings into [`TypeDescriptor`]s that know how many slots and
//! bytes a value occupies, and assigns [`StorageLocation`]s to a sequence of
//! variables or struct members using Solidity's packing rules.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use alloy_primitives::U256;
use slotlens_common::{StorageLocation, WORD_SIZE};
use tracing::{debug, warn};

use crate::TypeResolutionError;

pub mod ast;
pub mod definitions;

pub use definitions::*;

/// Where a reference type's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataLocation {
    /// Contract storage
    Storage,
    /// Memory of the current call frame
    Memory,
    /// Call data of the current call frame
    Calldata,
    /// Not stated by the type string nor the caller
    #[default]
    Unspecified,
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Memory => write!(f, "memory"),
            Self::Calldata => write!(f, "calldata"),
            Self::Unspecified => write!(f, "unspecified location"),
        }
    }
}

/// Location qualifiers the compiler appends to type strings.
const LOCATION_SUFFIXES: [(&str, DataLocation); 4] = [
    (" storage ref", DataLocation::Storage),
    (" storage pointer", DataLocation::Storage),
    (" memory", DataLocation::Memory),
    (" calldata", DataLocation::Calldata),
];

/// Split a type string into its bare form and the location it states, if any.
pub fn strip_location(type_string: &str) -> (&str, Option<DataLocation>) {
    let trimmed = type_string.trim();
    for (suffix, location) in LOCATION_SUFFIXES {
        if let Some(bare) = trimmed.strip_suffix(suffix) {
            return (bare, Some(location));
        }
    }
    (trimmed, None)
}

/// The decoder family a type string belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// `uintN`
    Uint,
    /// `intN`
    Int,
    /// `bool`
    Bool,
    /// `address` and `address payable`
    Address,
    /// `contract X`, stored as an address
    Contract,
    /// `enum X`
    Enum,
    /// `string`
    String,
    /// `struct X`
    Struct,
    /// dynamic `bytes`
    Bytes,
    /// `bytesN`
    BytesX,
    /// `T[]` and `T[N]`
    Array,
    /// `mapping(K => V)`
    Mapping,
}

/// Classify a type string.
pub fn type_class(type_string: &str) -> Result<TypeClass, TypeResolutionError> {
    let (bare, _) = strip_location(type_string);
    if bare.ends_with(']') {
        return Ok(TypeClass::Array);
    }
    if bare.starts_with("mapping") {
        return Ok(TypeClass::Mapping);
    }

    let token = bare.split(' ').next().unwrap_or_default();
    // collapse digit runs so `uint256` reads `uint` and `bytes32` reads `bytesX`
    let mut normalized = String::with_capacity(token.len());
    let mut in_digits = false;
    for c in token.chars() {
        if c.is_ascii_digit() {
            if !in_digits && token.starts_with("bytes") {
                normalized.push('X');
            }
            in_digits = true;
        } else {
            in_digits = false;
            normalized.push(c);
        }
    }

    Ok(match normalized.as_str() {
        "uint" => TypeClass::Uint,
        "int" => TypeClass::Int,
        "bool" => TypeClass::Bool,
        "address" => TypeClass::Address,
        "contract" => TypeClass::Contract,
        "enum" => TypeClass::Enum,
        "string" => TypeClass::String,
        "struct" => TypeClass::Struct,
        "bytes" => TypeClass::Bytes,
        "bytesX" => TypeClass::BytesX,
        _ => return Err(TypeResolutionError::UnsupportedType(bare.to_string())),
    })
}

/// A struct member with its position relative to the struct's first slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLayout {
    /// Member name
    pub name: String,
    /// Member type
    pub ty: TypeDescriptor,
    /// Position relative to the start of the struct
    pub location: StorageLocation,
}

/// The shape of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Unsigned integer of `bytes` width
    Uint {
        /// Width in bytes
        bytes: usize,
    },
    /// Signed integer of `bytes` width
    Int {
        /// Width in bytes
        bytes: usize,
    },
    /// Boolean
    Bool,
    /// Address or contract reference
    Address,
    /// Enum with its variant names
    Enum {
        /// Variant names in declaration order
        variants: Arc<[String]>,
    },
    /// `bytesN`
    FixedBytes(usize),
    /// Dynamic `bytes`
    DynamicBytes,
    /// `string`
    String,
    /// Fixed (`size` set) or dynamic array
    Array {
        /// Element type
        element: Box<TypeDescriptor>,
        /// Declared size; `None` for dynamic arrays
        size: Option<U256>,
    },
    /// Struct with its member layout
    Struct(Arc<StructLayout>),
    /// A struct named again inside its own members, behind a dynamic array or a
    /// mapping. Expanded on use through [`TypeDescriptor::resolved`].
    StructRef(StructRef),
    /// Mapping
    Mapping {
        /// Key type
        key: Box<TypeDescriptor>,
        /// Value type
        value: Box<TypeDescriptor>,
    },
}

/// Members of a struct with their offsets relative to the struct base.
#[derive(Debug, PartialEq, Eq)]
pub struct StructLayout {
    /// Canonical struct name
    pub name: String,
    /// Members in declaration order
    pub members: Vec<MemberLayout>,
    /// Slots the struct occupies in storage
    pub storage_slots: U256,
}

/// Handle from inside a struct back to the struct being laid out.
///
/// The handle is weak so a struct never owns itself. It stays valid while the
/// descriptor that planned the struct is alive.
#[derive(Debug, Clone)]
pub struct StructRef {
    /// Canonical struct name
    pub name: String,
    layout: Weak<StructLayout>,
}

impl StructRef {
    /// The layout this handle points at, if its owner is still alive.
    pub fn layout(&self) -> Option<Arc<StructLayout>> {
        self.layout.upgrade()
    }
}

impl PartialEq for StructRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for StructRef {}

/// A fully resolved type with its storage footprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type string without location qualifiers
    pub type_name: String,
    /// Where the data of reference types lives
    pub location: DataLocation,
    /// Number of slots the type occupies in storage
    pub storage_slots: U256,
    /// Number of bytes the type occupies within a slot; 32 for reference types
    pub storage_bytes: usize,
    /// Shape of the type
    pub kind: TypeKind,
}

impl TypeDescriptor {
    fn value(type_name: &str, storage_bytes: usize, kind: TypeKind) -> Self {
        Self {
            type_name: type_name.to_string(),
            location: DataLocation::Unspecified,
            storage_slots: U256::from(1),
            storage_bytes,
            kind,
        }
    }

    fn reference(type_name: &str, location: DataLocation, storage_slots: U256, kind: TypeKind) -> Self {
        Self {
            type_name: type_name.to_string(),
            location,
            storage_slots,
            storage_bytes: WORD_SIZE,
            kind,
        }
    }

    /// Value types fit in one word and are decoded in place.
    pub fn is_value_type(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Uint { .. }
                | TypeKind::Int { .. }
                | TypeKind::Bool
                | TypeKind::Address
                | TypeKind::Enum { .. }
                | TypeKind::FixedBytes(_)
        )
    }

    /// This type with a [`TypeKind::StructRef`] expanded into the struct it names.
    /// Other types, and references whose owner is gone, come back unchanged.
    pub fn resolved(&self) -> Cow<'_, TypeDescriptor> {
        let TypeKind::StructRef(reference) = &self.kind else {
            return Cow::Borrowed(self);
        };
        match reference.layout() {
            Some(layout) => Cow::Owned(Self::reference(
                &self.type_name,
                self.location,
                layout.storage_slots,
                TypeKind::Struct(layout),
            )),
            None => Cow::Borrowed(self),
        }
    }
}

/// Structs whose members are being planned, by canonical name.
type InProgress = HashMap<String, Weak<StructLayout>>;

/// Resolve a type string against the definitions of a compilation.
///
/// A location stated by the type string wins over `location`. A struct that names
/// itself behind a dynamic array or a mapping gets a [`TypeKind::StructRef`] there;
/// embedding itself any other way is an error.
pub fn parse_type(
    type_string: &str,
    definitions: &ContractDefinitions,
    contract_name: &str,
    location: DataLocation,
) -> Result<TypeDescriptor, TypeResolutionError> {
    parse_type_in(type_string, definitions, contract_name, location, &mut InProgress::new())
}

fn parse_type_in(
    type_string: &str,
    definitions: &ContractDefinitions,
    contract_name: &str,
    location: DataLocation,
    in_progress: &mut InProgress,
) -> Result<TypeDescriptor, TypeResolutionError> {
    let (bare, stated) = strip_location(type_string);
    let location = stated.unwrap_or(location);

    match type_class(type_string)? {
        TypeClass::Uint => {
            let bytes = integer_bytes(bare, "uint")?;
            Ok(TypeDescriptor::value(bare, bytes, TypeKind::Uint { bytes }))
        }
        TypeClass::Int => {
            let bytes = integer_bytes(bare, "int")?;
            Ok(TypeDescriptor::value(bare, bytes, TypeKind::Int { bytes }))
        }
        TypeClass::Bool => Ok(TypeDescriptor::value(bare, 1, TypeKind::Bool)),
        TypeClass::Address | TypeClass::Contract => {
            Ok(TypeDescriptor::value(bare, 20, TypeKind::Address))
        }
        TypeClass::BytesX => {
            let size: usize = bare
                .strip_prefix("bytes")
                .and_then(|n| n.parse().ok())
                .filter(|n| (1..=WORD_SIZE).contains(n))
                .ok_or_else(|| TypeResolutionError::Malformed(bare.to_string()))?;
            Ok(TypeDescriptor::value(bare, size, TypeKind::FixedBytes(size)))
        }
        TypeClass::Enum => {
            let name = declared_name(bare, "enum")?;
            let definition = definitions
                .find_enum(name, contract_name)
                .ok_or_else(|| TypeResolutionError::UnknownEnum(name.to_string()))?;
            Ok(TypeDescriptor::value(
                bare,
                enum_width(definition.variants.len()),
                TypeKind::Enum { variants: definition.variants.clone().into() },
            ))
        }
        TypeClass::Bytes => Ok(TypeDescriptor::reference(
            bare,
            location,
            U256::from(1),
            TypeKind::DynamicBytes,
        )),
        TypeClass::String => {
            Ok(TypeDescriptor::reference(bare, location, U256::from(1), TypeKind::String))
        }
        TypeClass::Array => parse_array(bare, definitions, contract_name, location, in_progress),
        TypeClass::Struct => parse_struct(bare, definitions, contract_name, location, in_progress),
        TypeClass::Mapping => parse_mapping(bare, definitions, contract_name, in_progress),
    }
}

/// Width of `uintN`/`intN` in bytes; the bare keyword means 256 bits.
fn integer_bytes(bare: &str, prefix: &str) -> Result<usize, TypeResolutionError> {
    let bits = bare.strip_prefix(prefix).unwrap_or_default();
    if bits.is_empty() {
        return Ok(WORD_SIZE);
    }
    bits.parse::<usize>()
        .ok()
        .filter(|bits| *bits > 0 && *bits <= 256 && bits % 8 == 0)
        .map(|bits| bits / 8)
        .ok_or_else(|| TypeResolutionError::Malformed(bare.to_string()))
}

/// The smallest byte width able to hold every variant index, at least one.
pub fn enum_width(variant_count: usize) -> usize {
    let mut width = 1;
    let mut capacity = 256u128;
    while (variant_count as u128) > capacity {
        width += 1;
        capacity = capacity.saturating_mul(256);
    }
    width
}

/// The name after `struct `/`enum `.
fn declared_name<'a>(bare: &'a str, keyword: &str) -> Result<&'a str, TypeResolutionError> {
    bare.strip_prefix(keyword)
        .map(str::trim)
        .and_then(|rest| rest.split(' ').next())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| TypeResolutionError::Malformed(bare.to_string()))
}

fn parse_array(
    bare: &str,
    definitions: &ContractDefinitions,
    contract_name: &str,
    location: DataLocation,
    in_progress: &mut InProgress,
) -> Result<TypeDescriptor, TypeResolutionError> {
    let malformed = || TypeResolutionError::Malformed(bare.to_string());
    let open = bare.rfind('[').ok_or_else(malformed)?;
    let element_type = &bare[..open];
    let size_str = &bare[open + 1..bare.len() - 1];

    let element = parse_type_in(element_type, definitions, contract_name, location, in_progress)?;
    let size = if size_str.is_empty() {
        None
    } else {
        Some(U256::from_str_radix(size_str.trim(), 10).map_err(|_| malformed())?)
    };
    // a fixed array needs the size of a struct that is still being planned
    if let (Some(_), TypeKind::StructRef(reference)) = (size, &element.kind) {
        return Err(TypeResolutionError::RecursiveStruct(reference.name.clone()));
    }

    let storage_slots = match size {
        None => U256::from(1),
        Some(size) if element.storage_bytes >= WORD_SIZE => {
            element.storage_slots.saturating_mul(size)
        }
        Some(size) => {
            let per_slot = U256::from(WORD_SIZE / element.storage_bytes);
            let full = size / per_slot;
            if (size % per_slot).is_zero() {
                full
            } else {
                full + U256::from(1)
            }
        }
    };

    Ok(TypeDescriptor::reference(
        bare,
        location,
        storage_slots,
        TypeKind::Array { element: Box::new(element), size },
    ))
}

fn parse_struct(
    bare: &str,
    definitions: &ContractDefinitions,
    contract_name: &str,
    location: DataLocation,
    in_progress: &mut InProgress,
) -> Result<TypeDescriptor, TypeResolutionError> {
    let name = declared_name(bare, "struct")?;
    let definition = definitions
        .find_struct(name, contract_name)
        .ok_or_else(|| TypeResolutionError::UnknownStruct(name.to_string()))?;

    if let Some(layout) = in_progress.get(&definition.name) {
        let reference = StructRef { name: definition.name.clone(), layout: layout.clone() };
        return Ok(TypeDescriptor::reference(
            bare,
            location,
            U256::from(1),
            TypeKind::StructRef(reference),
        ));
    }

    let mut failure = None;
    let layout = Arc::new_cyclic(|this| {
        in_progress.insert(definition.name.clone(), this.clone());
        let planned = plan_members(definition, definitions, contract_name, location, in_progress);
        in_progress.remove(&definition.name);

        let (members, storage_slots) = planned.unwrap_or_else(|err| {
            failure = Some(err);
            (Vec::new(), U256::ZERO)
        });
        StructLayout { name: definition.name.clone(), members, storage_slots }
    });
    if let Some(err) = failure {
        return Err(err);
    }

    Ok(TypeDescriptor::reference(bare, location, layout.storage_slots, TypeKind::Struct(layout)))
}

fn plan_members(
    definition: &StructDefinition,
    definitions: &ContractDefinitions,
    contract_name: &str,
    location: DataLocation,
    in_progress: &mut InProgress,
) -> Result<(Vec<MemberLayout>, U256), TypeResolutionError> {
    let mut types = Vec::with_capacity(definition.members.len());
    for member in &definition.members {
        let ty = parse_type_in(&member.type_string, definitions, contract_name, location, in_progress)
            .and_then(|ty| {
                if let TypeKind::StructRef(reference) = &ty.kind {
                    return Err(TypeResolutionError::RecursiveStruct(reference.name.clone()));
                }
                Ok(ty)
            })
            .map_err(|source| TypeResolutionError::Member {
                name: definition.name.clone(),
                member: member.name.clone(),
                source: Box::new(source),
            })?;
        types.push(ty);
    }

    let placements: Vec<_> = types.iter().map(|ty| Placement::of(ty, false)).collect();
    let offsets = compute_offsets(&placements);
    let members = definition
        .members
        .iter()
        .zip(types)
        .zip(offsets.locations)
        .map(|((member, ty), location)| MemberLayout { name: member.name.clone(), ty, location })
        .collect();
    Ok((members, offsets.storage_slots))
}

fn parse_mapping(
    bare: &str,
    definitions: &ContractDefinitions,
    contract_name: &str,
    in_progress: &mut InProgress,
) -> Result<TypeDescriptor, TypeResolutionError> {
    let malformed = || TypeResolutionError::Malformed(bare.to_string());
    let inner = bare
        .strip_prefix("mapping(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(malformed)?;
    let (key, value) = inner.split_once(" => ").ok_or_else(malformed)?;

    let key = parse_type_in(key, definitions, contract_name, DataLocation::Memory, in_progress)?;
    let value =
        parse_type_in(value, definitions, contract_name, DataLocation::Storage, in_progress)?;

    Ok(TypeDescriptor::reference(
        bare,
        DataLocation::Storage,
        U256::from(1),
        TypeKind::Mapping { key: Box::new(key), value: Box::new(value) },
    ))
}

/// What the packing algorithm needs to know about one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Slots occupied
    pub storage_slots: U256,
    /// Bytes occupied within a slot
    pub storage_bytes: usize,
    /// Constants take no storage
    pub constant: bool,
}

impl Placement {
    /// Placement of a resolved type.
    pub fn of(ty: &TypeDescriptor, constant: bool) -> Self {
        Self { storage_slots: ty.storage_slots, storage_bytes: ty.storage_bytes, constant }
    }

    /// A full slot, assumed for variables whose type failed to resolve.
    pub fn full_slot() -> Self {
        Self { storage_slots: U256::from(1), storage_bytes: WORD_SIZE, constant: false }
    }
}

/// Result of [`compute_offsets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offsets {
    /// One location per input, in order
    pub locations: Vec<StorageLocation>,
    /// Slots used in total, counting a trailing partial slot
    pub storage_slots: U256,
}

/// Assign storage locations to a sequence of variables.
///
/// Variables are packed right to left within a slot. A variable that does not fit in
/// the remaining bytes starts a new slot, and anything wider than one slot (or a
/// reference type, which is always 32 bytes wide) leaves the cursor at the start of
/// the next free slot.
pub fn compute_offsets(placements: &[Placement]) -> Offsets {
    let mut slot = U256::ZERO;
    let mut offset = 0usize;
    let mut locations = Vec::with_capacity(placements.len());

    for placement in placements {
        if placement.constant {
            locations.push(StorageLocation::default());
            continue;
        }
        if offset + placement.storage_bytes > WORD_SIZE {
            slot += U256::from(1);
            offset = 0;
        }
        locations.push(StorageLocation::new(slot, offset));
        if placement.storage_slots == U256::from(1)
            && offset + placement.storage_bytes <= WORD_SIZE
        {
            offset += placement.storage_bytes;
        } else {
            slot = slot.saturating_add(placement.storage_slots);
            offset = 0;
        }
    }

    if offset > 0 {
        slot += U256::from(1);
    }
    Offsets { locations, storage_slots: slot }
}

/// A state variable with its resolved type and storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableLayout {
    /// Variable name
    pub name: String,
    /// Compiler type string
    pub type_string: String,
    /// Resolved type, or why it could not be resolved
    pub ty: Result<TypeDescriptor, TypeResolutionError>,
    /// Storage location; `(0, 0)` for constants
    pub location: StorageLocation,
    /// Constant and immutable variables are not in storage
    pub is_constant: bool,
}

/// Plan the storage layout of a contract, inherited variables first.
///
/// A variable whose type fails to resolve keeps its error and is assumed to occupy one
/// full slot, so the variables after it are still placed.
pub fn state_layout(
    definitions: &ContractDefinitions,
    contract_name: &str,
) -> Result<Vec<VariableLayout>, TypeResolutionError> {
    let variables = definitions
        .inherited_state_variables(contract_name)
        .ok_or_else(|| TypeResolutionError::UnknownContract(contract_name.to_string()))?;

    let resolved: Vec<_> = variables
        .iter()
        .map(|variable| {
            let ty = parse_type(
                &variable.type_string,
                definitions,
                contract_name,
                DataLocation::Storage,
            );
            if let Err(err) = &ty {
                warn!(contract = contract_name, variable = %variable.name, %err, "unable to resolve type");
            }
            ty
        })
        .collect();

    let placements: Vec<_> = variables
        .iter()
        .zip(&resolved)
        .map(|(variable, ty)| match ty {
            Ok(ty) => Placement::of(ty, variable.constant),
            Err(_) if variable.constant => Placement { constant: true, ..Placement::full_slot() },
            Err(_) => Placement::full_slot(),
        })
        .collect();
    let offsets = compute_offsets(&placements);
    debug!(contract = contract_name, slots = %offsets.storage_slots, "planned storage layout");

    Ok(variables
        .into_iter()
        .zip(resolved)
        .zip(offsets.locations)
        .map(|((variable, ty), location)| VariableLayout {
            name: variable.name.clone(),
            type_string: variable.type_string.clone(),
            ty,
            location,
            is_constant: variable.constant,
        })
        .collect())
}
