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

//! Line oriented locator wire protocol.
//!
//! Request: a command line (`GET`, `SET`, `LOCK` or `COMMIT`). `SET` is followed by one location
//! per line, `LOCK` and `COMMIT` by the requester id, each terminated by an `END` line.
//!
//! Response: `GET` answers the update count, one location per line and `END`. `SET` and `COMMIT`
//! answer `1` or `0`. `LOCK` answers the update count, `0` meaning refused.

use anyhow::{anyhow, bail, ensure, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::state::LocatorSnapshot;

pub const END: &str = "END";

const MAX_LINE_LENGTH: usize = 4096;
const MAX_PAYLOAD_LINES: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocatorRequest {
    Get,
    Set(Vec<String>),
    Lock(String),
    Commit(String),
}

impl LocatorRequest {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set(_) => "SET",
            Self::Lock(_) => "LOCK",
            Self::Commit(_) => "COMMIT",
        }
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    ensure!(line.len() <= MAX_LINE_LENGTH, "line exceeds {MAX_LINE_LENGTH} bytes");
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

async fn expect_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    read_line(reader).await?.ok_or_else(|| anyhow!("unexpected end of stream"))
}

async fn read_payload<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        let line = expect_line(reader).await?;
        if line == END {
            return Ok(lines);
        }
        ensure!(lines.len() < MAX_PAYLOAD_LINES, "payload exceeds {MAX_PAYLOAD_LINES} lines");
        lines.push(line);
    }
}

async fn read_single_payload<R: AsyncBufRead + Unpin>(reader: &mut R, command: &str) -> Result<String> {
    let mut lines = read_payload(reader).await?;
    if lines.len() != 1 || lines[0].is_empty() {
        bail!("{command} expects exactly one requester id, got {} lines", lines.len())
    }
    Ok(lines.remove(0))
}

fn check_payload_line(line: &str) -> Result<()> {
    ensure!(!line.contains(['\r', '\n']), "payload line contains line break: {line:?}");
    ensure!(line != END, "payload line collides with {END}");
    Ok(())
}

/// Reads a request, returning `None` if peer closed before sending anything.
pub async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<LocatorRequest>> {
    let Some(command) = read_line(reader).await? else {
        return Ok(None);
    };
    let request = match command.as_str() {
        "GET" => LocatorRequest::Get,
        "SET" => LocatorRequest::Set(read_payload(reader).await?),
        "LOCK" => LocatorRequest::Lock(read_single_payload(reader, "LOCK").await?),
        "COMMIT" => LocatorRequest::Commit(read_single_payload(reader, "COMMIT").await?),
        _ => bail!("unknown locator command {command:?}"),
    };
    Ok(Some(request))
}

pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &LocatorRequest) -> Result<()> {
    let mut buf = String::new();
    buf.push_str(request.command());
    buf.push('\n');
    let payload = match request {
        LocatorRequest::Get => None,
        LocatorRequest::Set(locations) => Some(locations.as_slice()),
        LocatorRequest::Lock(requester) | LocatorRequest::Commit(requester) => Some(std::slice::from_ref(requester)),
    };
    if let Some(lines) = payload {
        for line in lines {
            check_payload_line(line)?;
            buf.push_str(line);
            buf.push('\n');
        }
        buf.push_str(END);
        buf.push('\n');
    }
    writer.write_all(buf.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_snapshot<W: AsyncWrite + Unpin>(writer: &mut W, snapshot: &LocatorSnapshot) -> Result<()> {
    let mut buf = format!("{}\n", snapshot.update_count);
    for location in snapshot.locations.iter() {
        check_payload_line(location)?;
        buf.push_str(location);
        buf.push('\n');
    }
    buf.push_str(END);
    buf.push('\n');
    writer.write_all(buf.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_snapshot<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<LocatorSnapshot> {
    let update_count = read_count(reader).await?;
    let locations = read_payload(reader).await?;
    Ok(LocatorSnapshot { update_count, locations })
}

pub async fn write_count<W: AsyncWrite + Unpin>(writer: &mut W, count: u64) -> Result<()> {
    writer.write_all(format!("{count}\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_count<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<u64> {
    let line = expect_line(reader).await?;
    line.parse::<u64>().with_context(|| format!("invalid update count {line:?}"))
}

pub async fn write_flag<W: AsyncWrite + Unpin>(writer: &mut W, flag: bool) -> Result<()> {
    write_count(writer, flag as u64).await
}

pub async fn read_flag<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<bool> {
    match expect_line(reader).await?.as_str() {
        "1" => Ok(true),
        "0" => Ok(false),
        line => bail!("invalid flag {line:?}"),
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;
    use test_case::test_case;
    use tokio::io::BufReader;

    use super::*;

    async fn encode(request: &LocatorRequest) -> Vec<u8> {
        let mut buf = Vec::new();
        write_request(&mut buf, request).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_request_encoding() {
        let set = LocatorRequest::Set(vec!["jdbc:h2:mem:one".to_string(), "jdbc:h2:mem:two".to_string()]);
        assert_that!(encode(&LocatorRequest::Get).await).is_equal_to(b"GET\n".to_vec());
        assert_that!(encode(&set).await).is_equal_to(b"SET\njdbc:h2:mem:one\njdbc:h2:mem:two\nEND\n".to_vec());
        assert_that!(encode(&LocatorRequest::Lock("db".to_string())).await).is_equal_to(b"LOCK\ndb\nEND\n".to_vec());

        let bytes = encode(&set).await;
        let mut reader = BufReader::new(bytes.as_slice());
        assert_that!(read_request(&mut reader).await.unwrap()).is_equal_to(Some(set));
        assert_that!(read_request(&mut reader).await.unwrap()).is_equal_to(None);
    }

    #[tokio::test]
    async fn test_empty_set() {
        let bytes = encode(&LocatorRequest::Set(vec![])).await;
        let mut reader = BufReader::new(bytes.as_slice());
        assert_that!(read_request(&mut reader).await.unwrap()).is_equal_to(Some(LocatorRequest::Set(vec![])));
    }

    #[tokio::test]
    async fn test_snapshot_response() {
        let snapshot = LocatorSnapshot::new(5, vec!["dbA".to_string(), "dbB".to_string()]);
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &snapshot).await.unwrap();
        assert_that!(buf.clone()).is_equal_to(b"5\ndbA\ndbB\nEND\n".to_vec());
        let mut reader = BufReader::new(buf.as_slice());
        assert_that!(read_snapshot(&mut reader).await.unwrap()).is_equal_to(snapshot);
    }

    #[tokio::test]
    async fn test_crlf_tolerated() {
        let mut reader = BufReader::new(b"COMMIT\r\ndb\r\nEND\r\n".as_slice());
        assert_that!(read_request(&mut reader).await.unwrap())
            .is_equal_to(Some(LocatorRequest::Commit("db".to_string())));
    }

    #[test_case(b"PUT\n"; "unknown command")]
    #[test_case(b"SET\ndbA\n"; "missing end")]
    #[test_case(b"LOCK\nEND\n"; "missing requester")]
    #[test_case(b"LOCK\na\nb\nEND\n"; "two requesters")]
    #[tokio::test]
    async fn test_malformed_request(bytes: &'static [u8]) {
        let mut reader = BufReader::new(bytes);
        assert_that!(read_request(&mut reader).await.is_err()).is_true();
    }

    #[tokio::test]
    async fn test_flags() {
        let mut reader = BufReader::new(b"1\n0\nx\n".as_slice());
        assert_that!(read_flag(&mut reader).await.unwrap()).is_true();
        assert_that!(read_flag(&mut reader).await.unwrap()).is_false();
        assert_that!(read_flag(&mut reader).await.is_err()).is_true();
    }

    #[tokio::test]
    async fn test_payload_line_rejected() {
        let mut buf = Vec::new();
        assert_that!(write_request(&mut buf, &LocatorRequest::Set(vec![END.to_string()])).await.is_err()).is_true();
        assert_that!(write_request(&mut buf, &LocatorRequest::Lock("a\nb".to_string())).await.is_err()).is_true();
    }
}
