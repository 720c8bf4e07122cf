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

//! Durable slots for protobuf encoded state.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use prost::Message;

/// A single durable slot holding the latest written bytes.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    async fn store(&self, bytes: Vec<u8>) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

pub async fn load_record<M: Message + Default>(store: &dyn StateStore) -> Result<Option<M>> {
    let Some(bytes) = store.load().await? else {
        return Ok(None);
    };
    let record = M::decode(bytes.as_slice()).context("corrupted state record")?;
    Ok(Some(record))
}

pub async fn store_record<M: Message>(store: &dyn StateStore, record: &M) -> Result<()> {
    store.store(record.encode_to_vec()).await
}

#[derive(Clone, Default)]
pub struct MemoryStateStore {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.slot.lock().unwrap().clone())
    }

    async fn store(&self, bytes: Vec<u8>) -> Result<()> {
        *self.slot.lock().unwrap() = Some(bytes);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.slot.lock().unwrap().take();
        Ok(())
    }
}

/// File backed slot. Writes go to a sibling temporary file which is then renamed over the target,
/// so readers observe either the old or the new content.
#[derive(Clone, Debug)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temporary_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("fail to read {}", self.path.display())),
        }
    }

    async fn store(&self, bytes: Vec<u8>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("fail to create directory {}", parent.display()))?;
        }
        let temporary = self.temporary_path();
        tokio::fs::write(&temporary, bytes).await.with_context(|| format!("fail to write {}", temporary.display()))?;
        tokio::fs::rename(&temporary, &self.path)
            .await
            .with_context(|| format!("fail to rename {} to {}", temporary.display(), self.path.display()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("fail to remove {}", self.path.display())),
        }
    }
}
