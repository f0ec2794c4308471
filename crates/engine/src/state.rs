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

//! Contract state at an execution step.
//!
//! The state of a contract is every state variable of its linearized inheritance
//! chain, decoded from storage as seen at one step of a transaction:
//!
//! 1. **Layout**: the variables are placed in storage once per contract and cached
//! 2. **View**: a [`StorageViewer`] binds the session cache to the step
//! 3. **Decode**: every variable is decoded concurrently
//!
//! Constants have no storage and are reported as such. A variable whose type cannot
//! be resolved is reported as an error value under its own name; the other variables
//! are unaffected.

use std::{collections::HashMap, fmt, sync::Arc};

use eyre::Result;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use slotlens_common::{DecodedData, DecodedValue, ExecutionStepContext, NamedValue};
use tracing::{debug, trace};

use crate::{
    decode::StorageContext, state_layout, ContractDefinitions, DecoderConfig, StorageError,
    StorageReader, StorageResolver, StorageViewer, StorageWriteSource, TypeResolutionError,
    VariableLayout,
};

/// The decoded state of a contract, tagged with the step it was decoded at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedState {
    /// Contract whose variables these are
    pub contract: String,
    /// Step the storage was viewed at
    pub context: ExecutionStepContext,
    /// Variables in storage order, inherited ones first
    pub variables: Vec<NamedValue>,
}

impl DecodedState {
    /// Look up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&DecodedValue> {
        self.variables.iter().find(|v| v.name == name).map(|v| &v.value)
    }
}

/// Decode every variable of `layout` from `reader`.
pub async fn decode_state(
    layout: &[VariableLayout],
    reader: &dyn StorageReader,
    config: &DecoderConfig,
) -> Vec<NamedValue> {
    let ctx = StorageContext::new(reader, config);
    let values = join_all(layout.iter().map(|variable| async move {
        if variable.is_constant {
            return DecodedValue::new(&variable.type_string, DecodedData::Constant);
        }
        match &variable.ty {
            Ok(ty) => ty.decode_from_storage(variable.location, ctx).await,
            Err(err) => DecodedValue::error(&variable.type_string, err),
        }
    }))
    .await;

    layout
        .iter()
        .zip(values)
        .map(|(variable, value)| NamedValue { name: variable.name.clone(), value })
        .collect()
}

/// Decodes contract state for a debugging session.
pub struct StateDecoder {
    definitions: Arc<ContractDefinitions>,
    resolver: Arc<StorageResolver>,
    writes: Arc<dyn StorageWriteSource>,
    layouts: RwLock<HashMap<String, Arc<[VariableLayout]>>>,
}

impl fmt::Debug for StateDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDecoder")
            .field("resolver", &self.resolver)
            .field("layouts", &self.layouts.read().len())
            .finish_non_exhaustive()
    }
}

impl StateDecoder {
    /// Create a decoder over the given compilation, storage cache and write source.
    pub fn new(
        definitions: Arc<ContractDefinitions>,
        resolver: Arc<StorageResolver>,
        writes: Arc<dyn StorageWriteSource>,
    ) -> Self {
        Self { definitions, resolver, writes, layouts: RwLock::new(HashMap::new()) }
    }

    /// The definitions layouts are planned from.
    pub fn definitions(&self) -> &ContractDefinitions {
        &self.definitions
    }

    /// The session storage cache.
    pub fn resolver(&self) -> &Arc<StorageResolver> {
        &self.resolver
    }

    /// The storage layout of `contract`, planned on first use.
    pub fn layout(&self, contract: &str) -> Result<Arc<[VariableLayout]>, TypeResolutionError> {
        if let Some(layout) = self.layouts.read().get(contract).cloned() {
            trace!(contract, "layout cache hit");
            return Ok(layout);
        }

        let layout: Arc<[VariableLayout]> = state_layout(&self.definitions, contract)?.into();
        Ok(self.layouts.write().entry(contract.to_string()).or_insert(layout).clone())
    }

    /// A viewer of storage at `context`.
    pub async fn viewer(&self, context: ExecutionStepContext) -> Result<StorageViewer, StorageError> {
        StorageViewer::new(context, self.resolver.clone(), self.writes.as_ref()).await
    }

    /// Decode the state of `contract` as seen at `context`.
    pub async fn decode_state(
        &self,
        contract: &str,
        context: ExecutionStepContext,
    ) -> Result<DecodedState> {
        let layout = self.layout(contract)?;
        let viewer = self.viewer(context).await?;
        debug!(contract, address = %context.address, step = context.step, variables = layout.len(), "decoding state");

        let variables = decode_state(&layout, &viewer, self.resolver.config()).await;
        Ok(DecodedState { contract: contract.to_string(), context, variables })
    }
}
