//! Write-ahead log of graph mutations.
//!
//! Every graph change is appended here before it is applied in memory, and
//! the log is replayed on open.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame]
//! [ENTRY 2: codec frame]
//! ...
//! ```
//!
//! A frame cut short by a crash is dropped on open, but only when no valid
//! frame follows it; any other damage is a hard error. A failed append is
//! rolled back to the previous end of the file.

use std::fs::{self, File, OpenOptions};
use std::io::{
    BufReader, BufWriter, Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom,
    Write,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Entity, EntityId, Relationship, RelationshipId};

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number, starting at 1.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// Full entity record; replay inserts or replaces it.
    EntityUpsert(Entity),
    /// Single attribute overwrite made at `at`.
    PropertySet {
        entity_id: EntityId,
        key: String,
        value: String,
        at: DateTime<Utc>,
    },
    /// Full edge record, written when the edge is created.
    RelationshipUpsert(Relationship),
    /// One more image evidencing an existing edge, recorded at `at`.
    ProvenanceAdded {
        relationship_id: RelationshipId,
        image_id: i64,
        at: DateTime<Utc>,
    },
    /// Marks that the log was rewritten as a snapshot of `up_to_sequence` entries.
    Checkpoint { up_to_sequence: u64 },
}

/// What `open` found in an existing log.
#[derive(Debug, Default)]
pub struct WalRecovery {
    /// Entries to replay, in sequence order.
    pub entries: Vec<WalEntry>,
    /// Bytes of an incomplete trailing frame that were cut off.
    pub truncated_bytes: u64,
}

/// Write-ahead log. Thread-safe via internal mutexes.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    sequence: Mutex<u64>,
    sync_on_write: bool,
    /// Makes the next append fail after writing this many frame bytes.
    #[cfg(test)]
    fail_after: Mutex<Option<usize>>,
}

fn poisoned(context: &'static str) -> IoError {
    IoError::new(ErrorKind::Other, format!("poisoned lock: {context}"))
}

fn open_append(path: &Path) -> IoResult<BufWriter<File>> {
    Ok(BufWriter::new(OpenOptions::new().append(true).open(path)?))
}

impl WriteAheadLog {
    /// Open or create a log file and read back its entries.
    ///
    /// An incomplete trailing frame (crash mid-append) is truncated away and
    /// reported in [`WalRecovery::truncated_bytes`].
    ///
    /// # Errors
    /// - I/O failures
    /// - `ErrorKind::InvalidData` on checksum or header damage
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, WalRecovery)> {
        let existing_len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let recovery = if existing_len < codec::HEADER_LEN {
            let mut file = File::create(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            WalRecovery::default()
        } else {
            let (entries, valid_len) = read_entries(path)?;
            let truncated_bytes = existing_len - valid_len;
            if truncated_bytes > 0 {
                tracing::warn!(
                    path = %path.display(),
                    truncated_bytes,
                    recovered = entries.len(),
                    "dropping incomplete trailing WAL frame"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            WalRecovery {
                entries,
                truncated_bytes,
            }
        };

        let last_sequence = recovery.entries.last().map_or(0, |e| e.sequence);
        let wal = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Some(open_append(path)?)),
            sequence: Mutex::new(last_sequence),
            sync_on_write,
            #[cfg(test)]
            fail_after: Mutex::new(None),
        };
        Ok((wal, recovery))
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry. Returns the sequence number assigned to it.
    ///
    /// If the write fails, the file is cut back to where it ended before the
    /// append so later entries never land behind a partial frame. If even
    /// that fails, the log refuses all further appends.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.writer.lock().map_err(|_| poisoned("wal.writer"))?;
        let mut sequence = self.sequence.lock().map_err(|_| poisoned("wal.sequence"))?;

        let entry = WalEntry {
            sequence: *sequence + 1,
            timestamp: Utc::now(),
            kind,
        };
        let frame = codec::encode(&entry)?;

        let mut out = writer
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "WAL writer unavailable"))?;
        let end = match out.get_ref().metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                *writer = Some(out);
                return Err(e);
            }
        };

        if let Err(e) = self.write_frame(&mut out, &frame) {
            match rollback(out, end) {
                Ok(restored) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        sequence = entry.sequence,
                        error = %e,
                        "WAL append failed; rolled back partial frame"
                    );
                    *writer = Some(restored);
                }
                Err(rollback_err) => tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    rollback_error = %rollback_err,
                    "WAL append failed and could not be rolled back; log is now read-only"
                ),
            }
            return Err(e);
        }

        *writer = Some(out);
        *sequence = entry.sequence;
        Ok(entry.sequence)
    }

    fn write_frame(&self, out: &mut BufWriter<File>, frame: &[u8]) -> IoResult<()> {
        #[cfg(test)]
        {
            let fail_after = self.fail_after.lock().map_err(|_| poisoned("wal.fail_after"))?.take();
            if let Some(n) = fail_after {
                out.write_all(&frame[..n.min(frame.len())])?;
                out.flush()?;
                return Err(IoError::new(ErrorKind::Other, "No space left on device"));
            }
        }

        out.write_all(frame)?;
        out.flush()?;
        if self.sync_on_write {
            out.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Sequence number of the last appended entry (0 for an empty log).
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(*self.sequence.lock().map_err(|_| poisoned("wal.sequence"))?)
    }

    /// Size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Atomically replace the log contents with `kinds`.
    ///
    /// The new log is written to a temporary file, synced, then renamed over
    /// the old one, so a crash leaves either the old or the new log intact.
    /// Returns the sequence number of the last rewritten entry.
    pub fn rewrite(&self, kinds: Vec<WalEntryKind>) -> IoResult<u64> {
        let mut writer = self.writer.lock().map_err(|_| poisoned("wal.writer"))?;
        let mut sequence = self.sequence.lock().map_err(|_| poisoned("wal.sequence"))?;

        let temp_path = self
            .path
            .with_extension(format!("wal.tmp.{}", Uuid::new_v4().simple()));
        let written = match write_log(&temp_path, kinds) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        if let Some(mut old) = writer.take() {
            old.flush()?;
        }
        fs::rename(&temp_path, &self.path)?;
        *writer = Some(open_append(&self.path)?);
        *sequence = written;
        Ok(written)
    }
}

/// Discards unflushed bytes and cuts the file back to `len`.
fn rollback(out: BufWriter<File>, len: u64) -> IoResult<BufWriter<File>> {
    let (file, _unflushed) = out.into_parts();
    file.set_len(len)?;
    file.sync_data()?;
    Ok(BufWriter::new(file))
}

fn write_log(path: &Path, kinds: Vec<WalEntryKind>) -> IoResult<u64> {
    let mut out = BufWriter::new(File::create(path)?);
    codec::write_header(&mut out)?;
    let now = Utc::now();
    let mut sequence = 0;
    for kind in kinds {
        sequence += 1;
        out.write_all(&codec::encode(&WalEntry {
            sequence,
            timestamp: now,
            kind,
        })?)?;
    }
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(sequence)
}

/// Reads all complete entries and the byte offset where they end.
///
/// A frame running past the end of the file is a torn final append only if
/// nothing valid comes after its start. Otherwise its length field is
/// damaged, and dropping it would drop every later entry too.
fn read_entries(path: &Path) -> IoResult<(Vec<WalEntry>, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    codec::read_header(&mut reader)?;

    let mut entries = Vec::new();
    loop {
        let frame_start = reader.stream_position()?;
        match codec::decode::<WalEntry>(&mut reader) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => return Ok((entries, frame_start)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                reader.seek(SeekFrom::Start(frame_start))?;
                let mut tail = Vec::new();
                reader.read_to_end(&mut tail)?;
                if let Some(offset) = tail.get(1..).and_then(codec::find_frame) {
                    return Err(IoError::new(
                        ErrorKind::InvalidData,
                        format!(
                            "corrupted WAL entry after sequence {}: frame at byte {frame_start} \
                             runs past end of file but a valid frame starts at byte {}",
                            entries.len(),
                            frame_start + 1 + offset as u64
                        ),
                    ));
                }
                return Ok((entries, frame_start));
            }
            Err(e) => {
                return Err(IoError::new(
                    e.kind(),
                    format!("corrupted WAL entry after sequence {}: {e}", entries.len()),
                ))
            }
        }
    }
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
