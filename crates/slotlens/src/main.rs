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

//! SlotLens - decode the storage of EVM contracts at any point of a transaction.

use std::path::PathBuf;

use alloy_primitives::{Address, TxHash};
use clap::{Args, Parser, Subcommand};
use eyre::Result;
use slotlens_common::env::SLOTLENS_RPC_URL;

mod cmd;

/// Command-line interface for SlotLens
#[derive(Debug, Parser)]
#[command(name = "slotlens")]
#[command(about = "SlotLens - decode Solidity contract storage from a JSON-RPC node")]
#[command(version)]
pub struct Cli {
    /// Ethereum RPC endpoint exposing the debug namespace
    #[arg(long, env = SLOTLENS_RPC_URL, default_value = "http://localhost:8545", global = true)]
    pub rpc_url: String,

    /// Also write logs to a daily rolling file
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Decode the state variables of a contract as they were before a transaction
    State(StateArgs),
}

/// Decode the state variables of a contract as they were before a transaction
#[derive(Debug, Args)]
pub struct StateArgs {
    /// Transaction whose pre-state is decoded
    #[arg(long)]
    pub tx: TxHash,

    /// Contract name, bare or qualified as `path:Name`
    #[arg(long)]
    pub contract: String,

    /// Standard JSON output of solc containing the source ASTs
    #[arg(long)]
    pub solc_output: PathBuf,

    /// Account to decode (default: the transaction's recipient)
    #[arg(long)]
    pub address: Option<Address>,

    /// TOML file with decoder limits (default: $SLOTLENS_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the decoded state as JSON
    #[arg(long)]
    pub json: bool,

    /// Print long values in full
    #[arg(long)]
    pub full: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    slotlens_common::logging::init_logging("slotlens", cli.log_file)?;

    match &cli.command {
        Commands::State(args) => {
            tracing::info!("Decoding state of {} before {}", args.contract, args.tx);
            cmd::decode_state(args, &cli.rpc_url).await
        }
    }
}
