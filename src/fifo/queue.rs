use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::QueueOptions;
use crate::error::QueueError;
use crate::fifo::index::{QueueIndex, INDEX_SIZE, LENGTH_SIZE, MAX_RECORD_LEN};
use crate::fifo::lock::{FileLock, LockMode};

/// Chunk size used when shifting records during compaction.
const COPY_BUF_SIZE: usize = 8192;

/// Durable FIFO of byte records shared through a single file.
///
/// Records are appended at `end` and consumed from `start`. The file is
/// truncated once fully drained and compacted when the consumed prefix grows
/// past [`QueueOptions::compact_threshold`], so it stays small as long as
/// consumers keep up with producers.
///
/// `dequeue` returning `None` is atomic; checking [`is_empty`](Self::is_empty)
/// and then dequeuing is not.
pub struct PersistentQueue {
    path: PathBuf,
    options: QueueOptions,
    file: Mutex<Option<File>>,
}

impl PersistentQueue {
    /// Open or create a queue with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        Self::open_with(path, QueueOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: QueueOptions) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| QueueError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            options,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Append a record. Returns the number of records queued afterwards.
    pub fn enqueue(&self, data: &[u8]) -> Result<u32, QueueError> {
        if data.is_empty() {
            return Err(QueueError::EmptyPayload);
        }
        if data.len() > MAX_RECORD_LEN {
            return Err(QueueError::PayloadTooLarge(data.len()));
        }

        self.locked(LockMode::Exclusive, |file| {
            let index = read_index(file)?.unwrap_or_else(QueueIndex::empty);
            let new_end = index
                .end
                .checked_add(LENGTH_SIZE + data.len() as u32)
                .ok_or(QueueError::QueueFull)?;

            let mut record = Vec::with_capacity(LENGTH_SIZE as usize + data.len());
            record.extend_from_slice(&(data.len() as u16).to_le_bytes());
            record.extend_from_slice(data);
            file.write_all_at(&record, u64::from(index.end))?;

            let count = index.count + 1;
            write_index(
                file,
                &QueueIndex {
                    start: index.start,
                    end: new_end,
                    count,
                },
            )?;
            Ok(count)
        })
    }

    /// Remove and return the oldest record, or `None` if the queue is empty.
    pub fn dequeue(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let threshold = self.options.compact_threshold;

        self.locked(LockMode::Exclusive, |file| {
            let Some(index) = read_index(file)? else {
                return Ok(None);
            };

            let (data, next) = read_record(file, index.start, index.end)?;

            if next == index.end {
                file.set_len(0)?;
            } else if next - INDEX_SIZE > threshold {
                tracing::debug!(
                    path = %self.path.display(),
                    reclaimed = next - INDEX_SIZE,
                    "Compacting queue"
                );
                compact_locked(file, next, index.end, index.count.saturating_sub(1))?;
            } else {
                write_index(
                    file,
                    &QueueIndex {
                        start: next,
                        end: index.end,
                        count: index.count.saturating_sub(1),
                    },
                )?;
            }

            Ok(Some(data))
        })
    }

    /// Poll [`dequeue`](Self::dequeue) until a record arrives or `timeout`
    /// elapses. A zero timeout waits forever.
    pub fn blocking_dequeue(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        let started = Instant::now();

        loop {
            if let Some(data) = self.dequeue()? {
                return Ok(Some(data));
            }

            thread::sleep(self.options.poll_interval);
            if !timeout.is_zero() && started.elapsed() >= timeout {
                return Ok(None);
            }
        }
    }

    /// Number of records currently queued.
    pub fn count(&self) -> Result<u32, QueueError> {
        self.locked(LockMode::Shared, |file| {
            Ok(read_index(file)?.map_or(0, |index| index.count))
        })
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        self.locked(LockMode::Shared, |file| Ok(read_index(file)?.is_none()))
    }

    /// Read up to `limit` records after skipping `offset`, without consuming
    /// anything. A `limit` of zero returns every remaining record.
    pub fn items(&self, offset: usize, limit: usize) -> Result<Vec<Vec<u8>>, QueueError> {
        self.locked(LockMode::Shared, |file| {
            let Some(index) = read_index(file)? else {
                return Ok(Vec::new());
            };

            let mut items = Vec::new();
            let mut skip = offset;
            let mut p = index.start;
            while p < index.end {
                let (data, next) = read_record(file, p, index.end)?;
                p = next;

                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                items.push(data);
                if limit > 0 && items.len() == limit {
                    break;
                }
            }
            Ok(items)
        })
    }

    /// The validated header, or `None` for an empty queue.
    pub fn index(&self) -> Result<Option<QueueIndex>, QueueError> {
        self.locked(LockMode::Shared, read_index)
    }

    /// Shift live records down to the header regardless of the threshold.
    /// Returns `false` if there was nothing to reclaim.
    pub fn compact(&self) -> Result<bool, QueueError> {
        self.locked(LockMode::Exclusive, |file| match read_index(file)? {
            Some(index) if index.start > INDEX_SIZE => {
                compact_locked(file, index.start, index.end, index.count)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    /// Drop every record.
    pub fn clear(&self) -> Result<(), QueueError> {
        self.locked(LockMode::Exclusive, |file| {
            file.set_len(0)?;
            Ok(())
        })
    }

    /// Close the handle and remove the file. Every later call on this handle
    /// fails with [`QueueError::Deleted`].
    pub fn delete(&self) -> Result<(), QueueError> {
        let mut slot = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = slot.take().ok_or(QueueError::Deleted)?;

        {
            let _lock = FileLock::acquire(&file, LockMode::Exclusive)?;
            match fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        drop(file);
        Ok(())
    }

    /// Run `op` with this handle's file locked in `mode`.
    fn locked<R>(
        &self,
        mode: LockMode,
        op: impl FnOnce(&File) -> Result<R, QueueError>,
    ) -> Result<R, QueueError> {
        let slot = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = slot.as_ref().ok_or(QueueError::Deleted)?;
        let lock = FileLock::acquire(file, mode)?;
        op(&lock)
    }
}

impl fmt::Display for PersistentQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<FIFO: {}>", self.path.display())
    }
}

impl fmt::Debug for PersistentQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentQueue")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

fn read_index(file: &File) -> Result<Option<QueueIndex>, QueueError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }

    let mut buf = [0u8; INDEX_SIZE as usize];
    let available = len.min(u64::from(INDEX_SIZE)) as usize;
    file.read_exact_at(&mut buf[..available], 0)?;
    if available < buf.len() {
        // A torn header is reported through the same path as a bad checksum.
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        return Err(QueueError::CorruptIndex {
            start: word(0),
            end: word(4),
            count: word(8),
            checksum: word(12),
        });
    }

    QueueIndex::decode(&buf).map(Some)
}

fn write_index(file: &File, index: &QueueIndex) -> Result<(), QueueError> {
    file.write_all_at(&index.encode(), 0)?;
    Ok(())
}

/// Read the record at `offset`, returning its payload and the offset of the
/// record after it.
fn read_record(file: &File, offset: u32, end: u32) -> Result<(Vec<u8>, u32), QueueError> {
    let mut len_buf = [0u8; LENGTH_SIZE as usize];
    file.read_exact_at(&mut len_buf, u64::from(offset))?;
    let len = u32::from(u16::from_le_bytes(len_buf));

    // TODO: skip forward to the next plausible record instead of failing.
    if len == 0 {
        return Err(QueueError::ZeroLengthRecord(offset));
    }

    let next = offset
        .checked_add(LENGTH_SIZE + len)
        .filter(|next| *next <= end)
        .ok_or(QueueError::CorruptRecord { offset, end })?;

    let mut data = vec![0u8; len as usize];
    file.read_exact_at(&mut data, u64::from(offset + LENGTH_SIZE))?;
    Ok((data, next))
}

/// Move `[start, end)` to sit directly after the header, publish the new
/// header, then drop the stale tail. Caller holds the exclusive lock.
fn compact_locked(file: &File, start: u32, end: u32, count: u32) -> Result<(), QueueError> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut from = u64::from(start);
    let mut to = u64::from(INDEX_SIZE);

    while from < u64::from(end) {
        let chunk = (u64::from(end) - from).min(COPY_BUF_SIZE as u64) as usize;
        file.read_exact_at(&mut buf[..chunk], from)?;
        file.write_all_at(&buf[..chunk], to)?;
        from += chunk as u64;
        to += chunk as u64;
    }

    let span = end - start;
    write_index(
        file,
        &QueueIndex {
            start: INDEX_SIZE,
            end: INDEX_SIZE + span,
            count,
        },
    )?;
    file.set_len(to)?;
    Ok(())
}
