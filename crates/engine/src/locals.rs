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

//! Local variables at an execution step.

use alloy_primitives::U256;
use futures::future::join_all;
use slotlens_common::NamedValue;
use tracing::trace;

use crate::{
    decode::StorageContext, parse_type, ContractDefinitions, DataLocation, TypeDescriptor,
    TypeResolutionError,
};

/// A local variable of the function scope being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Declared name; empty for unnamed return values
    pub name: String,
    /// Resolved type
    pub ty: TypeDescriptor,
    /// Position of the variable counted from the top of the stack
    pub stack_depth: usize,
    /// Source offset of the declaration
    pub source_start: usize,
}

impl LocalVariable {
    /// Resolve a declared local. Types without a location qualifier live in memory.
    pub fn resolve(
        name: impl Into<String>,
        type_string: &str,
        definitions: &ContractDefinitions,
        contract_name: &str,
        stack_depth: usize,
        source_start: usize,
    ) -> Result<Self, TypeResolutionError> {
        let ty = parse_type(type_string, definitions, contract_name, DataLocation::Memory)?;
        Ok(Self { name: name.into(), ty, stack_depth, source_start })
    }

    /// Whether the variable exists at `source_position` with the given stack.
    pub fn is_visible(&self, stack_len: usize, source_position: usize) -> bool {
        self.stack_depth < stack_len && self.source_start <= source_position
    }
}

/// Decode the locals visible at `source_position`.
///
/// Locals that are not on the stack yet or are declared after the position are
/// skipped. Unnamed locals are called `<1>`, `<2>` and so on in declaration order.
pub async fn decode_locals(
    locals: &[LocalVariable],
    stack: &[U256],
    memory: &[u8],
    source_position: usize,
    ctx: StorageContext<'_>,
) -> Vec<NamedValue> {
    let visible: Vec<&LocalVariable> =
        locals.iter().filter(|local| local.is_visible(stack.len(), source_position)).collect();
    trace!(total = locals.len(), visible = visible.len(), source_position, "decoding locals");

    let values = join_all(
        visible.iter().map(|local| local.ty.decode_from_stack(local.stack_depth, stack, memory, ctx)),
    )
    .await;

    let mut anonymous = 0;
    visible
        .into_iter()
        .zip(values)
        .map(|(local, value)| {
            let name = if local.name.is_empty() {
                anonymous += 1;
                format!("<{anonymous}>")
            } else {
                local.name.clone()
            };
            NamedValue { name, value }
        })
        .collect()
}
