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

use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use super::protocol::{self, LocatorRequest};
use super::state::{LocatorSnapshot, LocatorState};
use crate::endpoint::ServerAddress;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One locator server as seen from a client. Any error counts as the server being unreachable.
#[async_trait]
pub trait LocatorPeer: Display + Send + Sync + 'static {
    async fn get(&self) -> Result<LocatorSnapshot>;

    async fn set(&self, locations: Vec<String>) -> Result<bool>;

    /// Returns update count of the server, zero if lock is refused.
    async fn lock(&self, requester: &str) -> Result<u64>;

    async fn commit(&self, requester: &str) -> Result<bool>;
}

impl Debug for dyn LocatorPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocatorPeer({self})")
    }
}

/// Locator server reached over tcp, one connection per request.
pub struct RemoteLocator {
    address: ServerAddress,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl RemoteLocator {
    pub fn new(address: ServerAddress) -> Self {
        Self { address, connect_timeout: DEFAULT_CONNECT_TIMEOUT, request_timeout: DEFAULT_REQUEST_TIMEOUT }
    }

    pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
        Self { connect_timeout, ..self }
    }

    pub fn with_request_timeout(self, request_timeout: Duration) -> Self {
        Self { request_timeout, ..self }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let address = (self.address.host(), self.address.port());
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| anyhow!("timeout connecting to locator {}", self.address))?
            .with_context(|| format!("fail to connect locator {}", self.address))?;
        Ok(stream)
    }

    /// Connects and sends request, returning the read half for the response.
    async fn send(&self, request: &LocatorRequest) -> Result<BufReader<OwnedReadHalf>> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        protocol::write_request(&mut writer, request).await?;
        Ok(BufReader::new(reader))
    }

    async fn timed<T>(&self, command: &str, exchange: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| anyhow!("timeout requesting {command} to locator {}", self.address))?
            .with_context(|| format!("fail to request {command} to locator {}", self.address))
    }
}

impl Display for RemoteLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[async_trait]
impl LocatorPeer for RemoteLocator {
    async fn get(&self) -> Result<LocatorSnapshot> {
        self.timed("GET", async {
            let mut reader = self.send(&LocatorRequest::Get).await?;
            protocol::read_snapshot(&mut reader).await
        })
        .await
    }

    async fn set(&self, locations: Vec<String>) -> Result<bool> {
        self.timed("SET", async {
            let mut reader = self.send(&LocatorRequest::Set(locations)).await?;
            protocol::read_flag(&mut reader).await
        })
        .await
    }

    async fn lock(&self, requester: &str) -> Result<u64> {
        self.timed("LOCK", async {
            let mut reader = self.send(&LocatorRequest::Lock(requester.to_string())).await?;
            protocol::read_count(&mut reader).await
        })
        .await
    }

    async fn commit(&self, requester: &str) -> Result<bool> {
        self.timed("COMMIT", async {
            let mut reader = self.send(&LocatorRequest::Commit(requester.to_string())).await?;
            protocol::read_flag(&mut reader).await
        })
        .await
    }
}

/// Locator state living in this process.
pub struct LocalLocator {
    name: String,
    state: Arc<LocatorState>,
}

impl LocalLocator {
    pub fn new(name: impl Into<String>, state: Arc<LocatorState>) -> Self {
        Self { name: name.into(), state }
    }
}

impl Display for LocalLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait]
impl LocatorPeer for LocalLocator {
    async fn get(&self) -> Result<LocatorSnapshot> {
        Ok(self.state.get().await)
    }

    async fn set(&self, locations: Vec<String>) -> Result<bool> {
        Ok(self.state.set(locations).await)
    }

    async fn lock(&self, requester: &str) -> Result<u64> {
        Ok(self.state.lock(requester).await)
    }

    async fn commit(&self, requester: &str) -> Result<bool> {
        Ok(self.state.commit(requester).await)
    }
}
