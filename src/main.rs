// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use distlock::commands::resolve::ResolveCommand;
use distlock::commands::stock::{StockCommand, StockOptions};
use distlock::commands::sweep::SweepCommand;
use distlock::config::LockConfig;
use distlock::error::{Result, format_error_chain, get_exit_code};
use distlock::logging;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "distlock")]
#[command(author, version, about = "Distributed lock middleware demo", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to ./distlock.toml when present)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Race requesters for one product's stock under a distributed lock
    Stock {
        /// Product identifier used in the lock key
        #[arg(long, default_value = "p1")]
        product: String,

        /// Number of concurrent requesters
        #[arg(short = 'n', long, default_value_t = 2)]
        requesters: usize,

        /// Initial stock
        #[arg(long, default_value_t = 10)]
        stock: i64,

        /// Time each requester spends inside the critical section
        #[arg(long, value_name = "MS", default_value_t = 2_000)]
        hold_ms: u64,

        /// How long a requester waits for the lock
        #[arg(long, value_name = "MS", default_value_t = 10_000)]
        wait_ms: u64,

        /// Lease taken on the lock
        #[arg(long, value_name = "MS", default_value_t = 60_000)]
        lease_ms: u64,
    },

    /// Resolve a lock key template against name=value arguments
    Resolve {
        /// Template, e.g. "'order:' + #userId"
        template: String,

        /// Arguments as name=value; JSON values keep their type
        #[arg(value_name = "NAME=VALUE")]
        arguments: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove expired leases and leftovers from a file lock store
    Sweep {
        /// Lock directory (defaults to store.directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Age after which unreadable files and leftovers are removed
        #[arg(long, value_name = "SECONDS")]
        older_than: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();

    logging::setup_logger(cli.verbose);

    let config = match LockConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error_chain(&e));
            std::process::exit(get_exit_code(&e));
        }
    };

    let result: Result<()> = (|| match cli.command {
        Commands::Stock {
            product,
            requesters,
            stock,
            hold_ms,
            wait_ms,
            lease_ms,
        } => {
            let command = StockCommand::new(&config)?;
            command.execute(&StockOptions {
                product,
                requesters,
                initial_stock: stock,
                hold: Duration::from_millis(hold_ms),
                wait: Duration::from_millis(wait_ms),
                lease: Duration::from_millis(lease_ms),
            })
        }
        Commands::Resolve {
            template,
            arguments,
            json,
        } => {
            let command = ResolveCommand::new(&config)?;
            command.execute(&template, &arguments, json)
        }
        Commands::Sweep { dir, older_than } => {
            let command = SweepCommand::new(&config)?;
            command.execute(dir.as_deref(), older_than)
        }
    })();

    if let Err(e) = result {
        eprintln!("{}", format_error_chain(&e));
        std::process::exit(get_exit_code(&e));
    }
}
