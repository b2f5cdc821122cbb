//! Durable ordered storage for blocks.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{error, warn};
use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::models::Block;

/// An ordered, append-only block store keyed by sequential index.
///
/// `append` must refuse any block whose index is not exactly one past the
/// last stored block, so two writers can never claim the same slot.
pub trait BlockStore: Send + Sync {
    fn load(&self) -> StoreResult<Vec<Block>>;

    fn append(&self, block: &Block) -> StoreResult<()>;
}

fn check_next(last: u64, block: &Block) -> StoreResult<()> {
    if block.index != last + 1 {
        return Err(StoreError::IndexConflict {
            expected: last + 1,
            found: block.index,
        });
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryStore {
    blocks: Mutex<Vec<Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store without index checks. Used to load fixtures,
    /// including deliberately broken chains.
    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        MemoryStore {
            blocks: Mutex::new(blocks),
        }
    }
}

impl BlockStore for MemoryStore {
    fn load(&self) -> StoreResult<Vec<Block>> {
        Ok(self.blocks.lock().clone())
    }

    fn append(&self, block: &Block) -> StoreResult<()> {
        let mut blocks = self.blocks.lock();
        check_next(blocks.last().map_or(0, |b| b.index), block)?;
        blocks.push(block.clone());
        Ok(())
    }
}

/// One JSON-encoded block per line. Each append is a single write followed by
/// `sync_data`, so a record is either complete and newline-terminated or it
/// never returned success.
///
/// Every write lands at the committed length. A failed write or sync is cut
/// back to that length before the error is returned, and bytes found past it
/// on the next append are discarded, so a torn record never sits in front of
/// a later good one.
pub struct JsonLinesStore {
    path: PathBuf,
    tail: Mutex<Tail>,
}

/// Index of the last committed block and the byte length that ends it.
struct Tail {
    last_index: u64,
    len: u64,
}

impl JsonLinesStore {
    /// Opens (or creates) the store. An unterminated final line is the
    /// remainder of an interrupted append and is cut off.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            let contents = fs::read(&path)?;
            if !contents.is_empty() && contents.last() != Some(&b'\n') {
                let keep = contents
                    .iter()
                    .rposition(|b| *b == b'\n')
                    .map_or(0, |pos| pos + 1);
                warn!(
                    "Discarding {} bytes of incomplete record at end of {}",
                    contents.len() - keep,
                    path.display()
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(keep as u64)?;
                file.sync_all()?;
            }
        } else {
            File::create(&path)?;
        }

        let len = fs::metadata(&path)?.len();
        let store = JsonLinesStore {
            path,
            tail: Mutex::new(Tail { last_index: 0, len }),
        };
        let last = store.load()?.last().map_or(0, |b| b.index);
        store.tail.lock().last_index = last;
        Ok(store)
    }

    fn write_at(&self, file: &mut File, offset: u64, record: &[u8]) -> StoreResult<()> {
        let on_disk = file.metadata()?.len();
        if on_disk != offset {
            warn!(
                "Discarding {} stray bytes past the last record of {}",
                on_disk.saturating_sub(offset),
                self.path.display()
            );
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(record)?;
        file.sync_data()?;
        Ok(())
    }
}

impl BlockStore for JsonLinesStore {
    fn load(&self) -> StoreResult<Vec<Block>> {
        let contents = fs::read_to_string(&self.path)?;
        let mut blocks = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let block = serde_json::from_str::<Block>(line).map_err(|e| StoreError::Corrupt {
                line: i + 1,
                reason: e.to_string(),
            })?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn append(&self, block: &Block) -> StoreResult<()> {
        let mut tail = self.tail.lock();
        check_next(tail.last_index, block)?;

        let mut record = serde_json::to_vec(block)?;
        record.push(b'\n');

        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        if let Err(err) = self.write_at(&mut file, tail.len, &record) {
            if let Err(cut) = file.set_len(tail.len) {
                error!(
                    "Could not cut {} back to {} bytes after failed append: {}",
                    self.path.display(),
                    tail.len,
                    cut
                );
            }
            return Err(err);
        }

        tail.len += record.len() as u64;
        tail.last_index = block.index;
        Ok(())
    }
}
