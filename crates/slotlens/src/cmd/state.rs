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

//! State command - decode a contract's storage as it was before a transaction

use std::{borrow::Cow, fs, path::Path, sync::Arc};

use alloy_primitives::{Address, TxHash};
use alloy_provider::{Provider, ProviderBuilder};
use eyre::{eyre, OptionExt, Result, WrapErr};
use foundry_compilers::artifacts::CompilerOutput;
use serde::Deserialize;
use slotlens_common::{ExecutionStepContext, ValueFormatter, ValueFormatterContext};
use slotlens_engine::{
    layout::ast::definitions_from_output, ContractDefinitions, DecodedState, DecoderConfig,
    NoStorageWrites, RpcStorageOracle, StateDecoder, StorageResolver,
};

use crate::StateArgs;

#[derive(Debug, Deserialize)]
struct TransactionRecipient {
    to: Option<Address>,
}

/// Read contract definitions from a solc standard JSON output file.
pub fn load_definitions(path: &Path) -> Result<ContractDefinitions> {
    let content = fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read solc output: {}", path.display()))?;
    let output: CompilerOutput = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse solc output: {}", path.display()))?;
    Ok(definitions_from_output(&output))
}

/// Decoder limits from `--config`, `$SLOTLENS_CONFIG` or the defaults.
fn load_config(path: Option<&Path>) -> Result<DecoderConfig> {
    match path {
        Some(path) => DecoderConfig::load(path),
        None => DecoderConfig::from_env(),
    }
}

async fn transaction_recipient<P: Provider>(provider: &P, tx: TxHash) -> Result<Address> {
    let recipient: Option<TransactionRecipient> =
        provider.raw_request(Cow::Borrowed("eth_getTransactionByHash"), (tx,)).await?;
    recipient
        .ok_or_eyre("transaction not found")?
        .to
        .ok_or_else(|| eyre!("transaction {tx} creates a contract; pass --address"))
}

/// Render a decoded state for the terminal.
pub fn render_state(state: &DecodedState, full: bool) -> String {
    let ctx = ValueFormatterContext::new().with_ty(true).multi_line(true).shorten_long(!full);
    let mut out = format!(
        "{} @ {} before {}\n",
        state.contract, state.context.address, state.context.transaction
    );
    for variable in &state.variables {
        let value = variable.value.format_value_with_indent(&ctx, 1);
        out.push_str(&format!("  {}: {value}\n", variable.name));
    }
    out
}

/// Decode and print the state of `args.contract` before `args.tx`.
pub async fn decode_state(args: &StateArgs, rpc_url: &str) -> Result<()> {
    let definitions = load_definitions(&args.solc_output)?;
    if definitions.contract(&args.contract).is_none() {
        let known: Vec<_> = definitions.contract_names().collect();
        return Err(eyre!(
            "contract {} not found in solc output (known: {})",
            args.contract,
            known.join(", ")
        ));
    }
    let config = load_config(args.config.as_deref())?;

    tracing::info!("Connecting to {}", rpc_url);
    let provider = ProviderBuilder::new().connect(rpc_url).await?;
    let address = match args.address {
        Some(address) => address,
        None => transaction_recipient(&provider, args.tx).await?,
    };

    let oracle = Arc::new(RpcStorageOracle::for_transaction(provider, args.tx).await?);
    tracing::info!(
        "Reading storage of {} at block {} index {}",
        address,
        oracle.block_hash(),
        oracle.transaction_index()
    );
    let resolver = Arc::new(StorageResolver::new(oracle.clone(), oracle, config));
    let decoder = StateDecoder::new(Arc::new(definitions), resolver, Arc::new(NoStorageWrites));

    let state = decoder
        .decode_state(&args.contract, ExecutionStepContext::new(args.tx, 0, address))
        .await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print!("{}", render_state(&state, args.full));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, U256};
    use slotlens_common::{DecodedData, DecodedValue, NamedValue};

    #[test]
    fn test_render_state() {
        let owner = address!("00000000000000000000000000000000000000a1");
        let state = DecodedState {
            contract: "Token".into(),
            context: ExecutionStepContext::new(TxHash::ZERO, 0, owner),
            variables: vec![
                NamedValue {
                    name: "total".into(),
                    value: DecodedValue::new("uint256", DecodedData::Uint(U256::from(5))),
                },
                NamedValue {
                    name: "MAX".into(),
                    value: DecodedValue::new("uint256", DecodedData::Constant),
                },
            ],
        };

        let rendered = render_state(&state, false);
        assert!(rendered.starts_with("Token @ "));
        assert!(rendered.contains("  total: uint256(5)\n"));
        assert!(rendered.contains("  MAX: uint256(<constant>)\n"));
    }

    #[test]
    fn test_load_definitions_from_solc_output() {
        let output = serde_json::json!({
            "sources": {
                "src/Counter.sol": {
                    "id": 0,
                    "ast": {
                        "absolutePath": "src/Counter.sol",
                        "id": 1,
                        "exportedSymbols": {},
                        "nodeType": "SourceUnit",
                        "src": "0:100:0",
                        "nodes": [{
                            "id": 2,
                            "nodeType": "ContractDefinition",
                            "src": "0:100:0",
                            "name": "Counter",
                            "linearizedBaseContracts": [2],
                            "nodes": [{
                                "id": 3,
                                "nodeType": "VariableDeclaration",
                                "src": "0:0:0",
                                "name": "count",
                                "stateVariable": true,
                                "constant": false,
                                "mutability": "mutable",
                                "typeDescriptions": { "typeString": "uint256" }
                            }]
                        }]
                    }
                }
            },
            "contracts": {}
        });
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), output.to_string()).unwrap();

        let definitions = load_definitions(file.path()).unwrap();
        let counter = definitions.contract("Counter").unwrap();
        assert_eq!(counter.state_variables[0].name, "count");
        assert!(load_definitions(Path::new("/nonexistent/solc.json")).is_err());
    }
}
