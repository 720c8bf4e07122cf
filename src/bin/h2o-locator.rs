// Copyright 2023 The H2O Authors.
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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use h2o::locator::{LocatorServer, LocatorState, DEFAULT_LOCK_TIMEOUT};
use h2o::store::FileStateStore;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Port to serve locator requests.
    #[arg(long = "locator.port", default_value_t = 2181)]
    port: u16,
    /// File to persist locator state in. State is kept in memory only if absent.
    #[arg(long = "locator.state")]
    state: Option<PathBuf>,
    /// Seconds after which an uncommitted lock expires.
    #[arg(long = "locator.lock-timeout", default_value_t = DEFAULT_LOCK_TIMEOUT.as_secs())]
    lock_timeout: u64,
}

async fn open_state(args: &Args) -> Result<LocatorState> {
    let state = match &args.state {
        None => LocatorState::new(),
        Some(path) => LocatorState::open(Arc::new(FileStateStore::new(path)))
            .await
            .with_context(|| format!("fail to open locator state {}", path.display()))?,
    };
    Ok(state.with_lock_timeout(Duration::from_secs(args.lock_timeout)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_level(true).with_file(true).with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let state = Arc::new(open_state(&args).await?);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    let server = LocatorServer::start(listener, state)?;
    info!("Serving locator on {} ...", server.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Stopping locator");
    drop(server);
    Ok(())
}
