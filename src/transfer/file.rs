//! File-backed [`TransferFile`]

use crate::error::{Error, Result};
use crate::session::{RetrieveOutcome, TransferFile, TransferSession};
use crate::transfer::backpressure::{to_data_block, write_when_possible};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Default size of the blocks read from disk
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Local file streamed block by block
pub struct LocalFile {
    path: Mutex<PathBuf>,
    block_size: usize,
}

impl LocalFile {
    /// File at `path`, read in [`DEFAULT_BLOCK_SIZE`] blocks
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_block_size(path, DEFAULT_BLOCK_SIZE)
    }

    /// File at `path`, read in `block_size` blocks (at least one byte)
    pub fn with_block_size(path: impl Into<PathBuf>, block_size: usize) -> Self {
        Self {
            path: Mutex::new(path.into()),
            block_size: block_size.max(1),
        }
    }

    fn current_path(&self) -> PathBuf {
        self.path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_path(&self, path: PathBuf) {
        *self
            .path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = path;
    }
}

/// Resolve `name` against the directory of `current`
fn resolve_target(current: &Path, name: &str) -> PathBuf {
    let name = Path::new(name);
    if name.is_absolute() {
        return name.to_path_buf();
    }
    match current.parent() {
        Some(parent) => parent.join(name),
        None => name.to_path_buf(),
    }
}

/// Fill `buf` unless EOF comes first; returns the number of bytes read
async fn read_block(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[async_trait]
impl TransferFile for LocalFile {
    async fn retrieve_blocking(
        &self,
        session: &TransferSession,
        cancel: &CancellationToken,
    ) -> Result<RetrieveOutcome> {
        let path = self.current_path();
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            Error::system_io(format!("cannot open {}", path.display()), e)
        })?;

        let mut sent_blocks: u64 = 0;
        let mut buf = vec![0u8; self.block_size];
        loop {
            if cancel.is_cancelled() {
                tracing::info!(
                    path = %path.display(),
                    sent_blocks,
                    "block production stopped"
                );
                return Ok(RetrieveOutcome::Stopped);
            }

            let read = read_block(&mut file, &mut buf)
                .await
                .map_err(|e| Error::system_io(format!("cannot read {}", path.display()), e))?;
            if read == 0 {
                break;
            }
            write_when_possible(to_data_block(Some(buf[..read].to_vec())), session).await?;
            sent_blocks += 1;
        }

        let eof = write_when_possible(to_data_block(None), session).await?;
        eof.wait().await;
        if let Some(cause) = eof.cause() {
            return Err(Error::Transfer(format!("end of file block not sent: {}", cause)));
        }

        tracing::debug!(path = %path.display(), sent_blocks, "all blocks sent");
        Ok(RetrieveOutcome::Completed)
    }

    async fn replace_filename(&self, name: &str, move_allowed: bool) -> Result<()> {
        let current = self.current_path();
        let target = resolve_target(&current, name);

        if target.parent() != current.parent() {
            if !move_allowed {
                return Err(Error::system(format!(
                    "moving {} to another directory is not allowed",
                    current.display()
                )));
            }
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::system_io(format!("cannot create {}", parent.display()), e)
                })?;
            }
        }

        tokio::fs::rename(&current, &target).await.map_err(|e| {
            Error::system_io(
                format!("cannot rename {} to {}", current.display(), target.display()),
                e,
            )
        })?;

        tracing::info!(
            from = %current.display(),
            to = %target.display(),
            "file renamed"
        );
        self.set_path(target);
        Ok(())
    }

    fn true_path(&self) -> PathBuf {
        self.current_path()
    }
}
