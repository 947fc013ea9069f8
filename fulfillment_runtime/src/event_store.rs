//! Append-only stage event log.
//!
//! Storage format: length-prefixed protobuf frames.
//!   [4-byte LE length][ProtoStageEvent][4-byte LE length][ProtoStageEvent]...
//!
//! Rules:
//!   - Strict append only, no mutation, no deletion, no reordering
//!   - fsync after every write
//!   - Sequence strictly increasing from 1 (validated on append and on read)
//!   - Frames are 1..=16 MiB; larger records are refused before any write
//!   - A failed write is truncated away, so the log always ends on a frame

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use prost::Message;

use fulfillment_kernel::domain::StageEvent;

use crate::ledger::{Journal, JournalError};
use crate::proto_bridge::event_to_proto;
use crate::proto_types::ProtoStageEvent;

/// Largest frame written or accepted on read.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Append-only event log backed by a binary file.
#[derive(Debug)]
pub struct EventStore {
    path: PathBuf,
    last_sequence: u64,
    /// Byte length of the log up to the end of the last complete frame.
    end_offset: u64,
}

impl EventStore {
    /// Open or create a log at `path`, scanning it for the last sequence.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (last_sequence, end_offset) = if path.exists() {
            let (records, end_offset) = Self::read_all_from_file(path)?;
            (records.last().map(|r| r.sequence).unwrap_or(0), end_offset)
        } else {
            (0, 0)
        };

        Ok(Self {
            path: path.to_path_buf(),
            last_sequence,
            end_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Its sequence must be exactly `last_sequence + 1`.
    pub fn append_record(&mut self, record: &ProtoStageEvent) -> io::Result<()> {
        let expected = self.last_sequence + 1;
        if record.sequence != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "sequence violation in event log: expected {}, got {}",
                    expected, record.sequence
                ),
            ));
        }

        let buf = record.encode_to_vec();
        if buf.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "record {} encodes to {} bytes, frame limit is {}",
                    record.sequence,
                    buf.len(),
                    MAX_FRAME_LEN
                ),
            ));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let on_disk = file.metadata()?.len();
        if on_disk < self.end_offset {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "event log shrank underneath the store: {} bytes, expected {}",
                    on_disk, self.end_offset
                ),
            ));
        }
        if on_disk > self.end_offset {
            // Leftover of an earlier failed write.
            file.set_len(self.end_offset)?;
        }

        if let Err(e) = Self::write_frame(&mut file, &buf) {
            let _ = file.set_len(self.end_offset);
            return Err(e);
        }

        self.end_offset += 4 + buf.len() as u64;
        self.last_sequence = record.sequence;
        Ok(())
    }

    fn write_frame(file: &mut File, buf: &[u8]) -> io::Result<()> {
        let len = buf.len() as u32;
        {
            let mut writer = BufWriter::new(&mut *file);
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(buf)?;
            writer.flush()?;
        }
        file.sync_all()
    }

    /// Assign the next sequence to `event` and append it.
    pub fn append_event(&mut self, event: &StageEvent) -> io::Result<u64> {
        let sequence = self.last_sequence + 1;
        self.append_record(&event_to_proto(sequence, event))?;
        Ok(sequence)
    }

    /// All records in sequence order.
    pub fn load_all(&self) -> io::Result<Vec<ProtoStageEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Self::read_all_from_file(&self.path).map(|(records, _)| records)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Every record, plus the byte offset just past the last frame.
    fn read_all_from_file(path: &Path) -> io::Result<(Vec<ProtoStageEvent>, u64)> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut records: Vec<ProtoStageEvent> = Vec::new();
        let mut len_buf = [0u8; 4];
        let mut end_offset = 0u64;

        loop {
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len == 0 || len > MAX_FRAME_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid frame length: {}", len),
                ));
            }

            let mut frame = vec![0u8; len];
            reader.read_exact(&mut frame).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("truncated frame after record {}: {}", records.len(), e),
                )
            })?;

            let record = ProtoStageEvent::decode(frame.as_slice()).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("protobuf decode error: {}", e),
                )
            })?;

            let expected = records.last().map_or(1, |r| r.sequence + 1);
            if record.sequence != expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "sequence gap in event log: expected {}, found {}",
                        expected, record.sequence
                    ),
                ));
            }

            records.push(record);
            end_offset += 4 + len as u64;
        }

        Ok((records, end_offset))
    }
}

/// `Journal` over an `EventStore`, shareable between threads.
#[derive(Debug)]
pub struct FileJournal {
    store: Mutex<EventStore>,
}

impl FileJournal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(EventStore::open(path)?))
    }

    pub fn new(store: EventStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn load_all(&self) -> io::Result<Vec<ProtoStageEvent>> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .load_all()
    }
}

impl Journal for FileJournal {
    fn record(&self, event: &StageEvent) -> Result<u64, JournalError> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(store.append_event(event)?)
    }

    fn position(&self) -> u64 {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_sequence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fulfillment_kernel::events::StageEventInput;

    fn event(stage: &str, hour: u32) -> StageEvent {
        StageEventInput::new(
            "ORD-002",
            stage,
            Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
        )
        .into_event()
    }

    #[test]
    fn reopen_resumes_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");

        let mut store = EventStore::open(&path).unwrap();
        assert_eq!(store.append_event(&event("sowing", 1)).unwrap(), 1);
        assert_eq!(store.append_event(&event("growing", 2)).unwrap(), 2);

        let mut reopened = EventStore::open(&path).unwrap();
        assert_eq!(reopened.last_sequence(), 2);
        assert_eq!(reopened.append_event(&event("harvesting", 3)).unwrap(), 3);
        let stages: Vec<_> = reopened
            .load_all()
            .unwrap()
            .into_iter()
            .map(|r| r.stage_id)
            .collect();
        assert_eq!(stages, vec!["sowing", "growing", "harvesting"]);
    }

    #[test]
    fn out_of_sequence_append_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EventStore::open(&dir.path().join("events.log")).unwrap();
        let err = store
            .append_record(&event_to_proto(5, &event("sowing", 1)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(store.last_sequence(), 0);
    }

    #[test]
    fn zero_length_frame_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(&path, 0u32.to_le_bytes()).unwrap();
        let err = EventStore::open(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn journal_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::open(&dir.path().join("events.log")).unwrap();
        assert_eq!(journal.position(), 0);
        assert_eq!(journal.record(&event("sowing", 1)).unwrap(), 1);
        assert_eq!(journal.position(), 1);
        assert_eq!(journal.load_all().unwrap().len(), 1);
    }

    #[test]
    fn oversized_record_refused_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let journal = FileJournal::open(&path).unwrap();
        journal.record(&event("sowing", 1)).unwrap();
        let size_before = std::fs::metadata(&path).unwrap().len();

        let huge = StageEventInput::new(
            "ORD-002",
            "growing",
            Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap(),
        )
        .with_notes(&"x".repeat(17 * 1024 * 1024))
        .into_event();
        assert!(matches!(
            journal.record(&huge),
            Err(JournalError::Io(ref e)) if e.kind() == io::ErrorKind::InvalidInput
        ));
        assert_eq!(journal.position(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size_before);

        let reopened = EventStore::open(&path).unwrap();
        assert_eq!(reopened.last_sequence(), 1);
    }

    #[test]
    fn torn_tail_is_cut_before_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let mut store = EventStore::open(&path).unwrap();
        store.append_event(&event("sowing", 1)).unwrap();

        // A length prefix promising 64 bytes followed by only 3.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&64u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }
        assert_eq!(
            EventStore::open(&path).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );

        assert_eq!(store.append_event(&event("growing", 2)).unwrap(), 2);

        let reopened = EventStore::open(&path).unwrap();
        assert_eq!(reopened.last_sequence(), 2);
        let stages: Vec<_> = reopened
            .load_all()
            .unwrap()
            .into_iter()
            .map(|r| r.stage_id)
            .collect();
        assert_eq!(stages, vec!["sowing", "growing"]);
    }
}
