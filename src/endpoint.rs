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

//! Textual endpoint of locator servers.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, bail, Error, Result};
use compact_str::{CompactString, ToCompactString};
use uriparse::{Authority, Scheme};

pub const LOCATOR_SCHEME: &str = "locator";

/// Address of one locator server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: CompactString,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<CompactString>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Display for ServerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            bail!("empty locator server address")
        }
        let authority = Authority::try_from(s).map_err(|e| anyhow!("invalid locator server address {s}: {e}"))?;
        if authority.has_username() {
            bail!("locator server address expect no username: {s}")
        }
        let port = authority.port().ok_or_else(|| anyhow!("locator server address expect port: {s}"))?;
        Ok(Self { host: authority.host().to_compact_string(), port })
    }
}

/// Locator servers of shape `locator://host1:port1,host2:port2`.
///
/// Order is preserved, duplicates are rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocatorEndpoint {
    servers: Vec<ServerAddress>,
}

impl LocatorEndpoint {
    pub fn new(servers: Vec<ServerAddress>) -> Result<Self> {
        if servers.is_empty() {
            bail!("no locator server")
        }
        for (i, server) in servers.iter().enumerate() {
            if servers[..i].contains(server) {
                bail!("duplicated locator server {server}")
            }
        }
        Ok(Self { servers })
    }

    pub fn servers(&self) -> &[ServerAddress] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl FromStr for LocatorEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, address) = s.split_once("://").ok_or_else(|| anyhow!("locator endpoint expect scheme: {s}"))?;
        let scheme = Scheme::try_from(scheme).map_err(|e| anyhow!("invalid scheme in {s}: {e}"))?;
        if scheme.as_str() != LOCATOR_SCHEME {
            bail!("locator endpoint expect scheme {LOCATOR_SCHEME}: {s}")
        }
        if address.contains('/') {
            bail!("locator endpoint expect no path: {s}")
        }
        let servers = address.split(',').map(ServerAddress::from_str).collect::<Result<Vec<_>>>()?;
        Self::new(servers)
    }
}

impl Display for LocatorEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{LOCATOR_SCHEME}://")?;
        for (i, server) in self.servers.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "{server}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use speculoos::prelude::*;
    use speculoos::*;
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_endpoint_ok() {
        let endpoint: LocatorEndpoint = "locator://host1:9001,127.0.0.1:9002".parse().unwrap();
        assert_that!(endpoint.servers()).is_equal_to(
            [ServerAddress::new("host1", 9001), ServerAddress::new("127.0.0.1", 9002)].as_slice(),
        );
        assert_that!(endpoint.to_string().as_str()).is_equal_to("locator://host1:9001,127.0.0.1:9002");
    }

    #[test_case("host1:9001"; "no scheme")]
    #[test_case("etcd://host1:9001"; "other scheme")]
    #[test_case("locator://"; "no server")]
    #[test_case("locator://host1"; "no port")]
    #[test_case("locator://host1:9001,"; "trailing comma")]
    #[test_case("locator://host1:9001/path"; "path")]
    #[test_case("locator://user@host1:9001"; "username")]
    #[test_case("locator://host1:9001,host1:9001"; "duplicated")]
    fn test_endpoint_invalid(s: &str) {
        assert_that!(s.parse::<LocatorEndpoint>()).is_err();
    }
}
