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

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

use super::protocol::{self, LocatorRequest};
use super::state::LocatorState;
use crate::utils::{self, DropOwner, DropWatcher};

/// Serves locator protocol over tcp. Each connection runs on its own task and carries one request.
///
/// Dropping the server stops accepting. In flight connections run to completion.
pub struct LocatorServer {
    address: SocketAddr,
    state: Arc<LocatorState>,
    _drop_owner: DropOwner,
}

impl LocatorServer {
    pub fn start(listener: TcpListener, state: Arc<LocatorState>) -> Result<Self> {
        let address = listener.local_addr()?;
        let (_drop_owner, drop_watcher) = utils::drop_watcher();
        tokio::spawn(serve(listener, state.clone(), drop_watcher));
        info!("locator server listening on {address}");
        Ok(Self { address, state, _drop_owner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> &Arc<LocatorState> {
        &self.state
    }
}

async fn serve(listener: TcpListener, state: Arc<LocatorState>, mut drop_watcher: DropWatcher) {
    loop {
        let (stream, addr) = tokio::select! {
            _ = drop_watcher.dropped() => {
                info!("locator server stopped");
                return;
            },
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("fail to accept locator connection: {err}");
                    continue;
                },
            },
        };
        tokio::spawn(serve_connection(state.clone(), stream, addr));
    }
}

#[instrument(skip_all, fields(addr = %addr))]
async fn serve_connection(state: Arc<LocatorState>, stream: TcpStream, addr: SocketAddr) {
    match process_connection(&state, stream).await {
        Ok(_) => debug!("connection terminated"),
        Err(err) => info!("connection terminated: {err:#}"),
    }
}

async fn process_connection(state: &LocatorState, stream: TcpStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let Some(request) = protocol::read_request(&mut reader).await? else {
        return Ok(());
    };
    debug!("serving {}", request.command());
    match request {
        LocatorRequest::Get => {
            let snapshot = state.get().await;
            protocol::write_snapshot(&mut writer, &snapshot).await?
        },
        LocatorRequest::Set(locations) => protocol::write_flag(&mut writer, state.set(locations).await).await?,
        LocatorRequest::Lock(requester) => protocol::write_count(&mut writer, state.lock(&requester).await).await?,
        LocatorRequest::Commit(requester) => protocol::write_flag(&mut writer, state.commit(&requester).await).await?,
    }
    Ok(())
}
