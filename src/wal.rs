use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_LEN;
use crate::model::Event;

const HEADER_LEN: u64 = 4;
const TRAILER_LEN: u64 = 4;

/// `[u32 len][bincode payload][u32 crc32]`, little endian.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one record. `Ok(None)` on a clean end of file or on a torn or
/// corrupt record, which ends the usable log.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    // A length past the cap can only be garbage.
    if len > MAX_WAL_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, HEADER_LEN + len as u64 + TRAILER_LEN))),
        Err(_) => Ok(None),
    }
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Everything recovered from a log file.
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the valid prefix. Anything after it is a torn write.
    pub valid_len: u64,
}

/// Append-only write-ahead log, one record per committed transaction.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`, cutting off any torn tail so new
    /// records are never written behind garbage.
    pub fn open(path: &Path) -> io::Result<Self> {
        let valid_len = Self::replay(path)?.valid_len;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() > valid_len {
            tracing::warn!(path = %path.display(), valid_len, "truncating torn WAL tail");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        drop(file);
        Self::open_append(path)
    }

    fn open_append(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Buffer one record. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Rewrite the log as `events` via a temp file and an atomic rename.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_record(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        self.flush_sync()?;
        fs::rename(&tmp_path, &self.path)?;
        *self = Self::open_append(&self.path)?;
        Ok(())
    }

    /// Every intact record, in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay { events: Vec::new(), valid_len: 0 });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some((event, len)) = decode_record(&mut reader)? {
            events.push(event);
            valid_len += len;
        }
        Ok(Replay { events, valid_len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Doc, DocKey, DocWrite, ScheduleConfig};
    use chrono::NaiveDate;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("salond_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn schedule_commit(seq: u64) -> Event {
        Event::Committed {
            seq,
            writes: vec![DocWrite {
                key: DocKey::Schedule,
                doc: Some(Doc::Schedule(ScheduleConfig::default())),
            }],
        }
    }

    fn day_delete(seq: u64) -> Event {
        Event::Committed {
            seq,
            writes: vec![DocWrite {
                key: DocKey::Day(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()),
                doc: None,
            }],
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![schedule_commit(1), day_delete(2)];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert_eq!(replay.valid_len, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        {
            let payload = bincode::serialize(&day_delete(1)).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().events.is_empty());
    }

    #[test]
    fn replay_stops_at_oversized_length() {
        let path = tmp_path("oversized_len.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&schedule_commit(1)).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![schedule_commit(1)]);
        assert_eq!(replay.valid_len, intact);
    }

    #[test]
    fn open_truncates_torn_tail_before_appending() {
        let path = tmp_path("torn_tail.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&schedule_commit(1)).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        {
            // Without truncation this record would sit behind the garbage
            // and never replay.
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&day_delete(2)).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![schedule_commit(1), day_delete(2)]);
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let mut wal = Wal::open(&path).unwrap();
        for seq in 0..20 {
            wal.append(&schedule_commit(seq)).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(&[schedule_commit(20)]).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        wal.append(&day_delete(21)).unwrap();
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![schedule_commit(20), day_delete(21)]);
    }
}
