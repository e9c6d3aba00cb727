use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::warn;

use galena_shared::block::BlockId;

bitflags! {
    /// Source tag recorded with every committed mutation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChangeFlags: u16 {
        /// A direct single-block edit by a player.
        const PLAYER   = 0b0000_0001;
        /// Produced by a draw operation.
        const DRAWN    = 0b0000_0010;
        /// Produced by pasting a stored clipboard volume.
        const PASTED   = 0b0000_0100;
        /// Written back by an undo or rollback replay.
        const RESTORED = 0b0000_1000;
        /// Produced by the physics scheduler.
        const PHYSICS  = 0b0001_0000;
    }
}

/// One committed mutation. Created once, never modified, appended in
/// commit order. `timestamp` is whole seconds since the level epoch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChangeEntry {
    pub index: u32,
    pub old: BlockId,
    pub new: BlockId,
    pub flags: ChangeFlags,
    pub timestamp: u32,
}

/// Fixed on-disk record size: index, old, new, flags, reserved, timestamp.
pub const RECORD_SIZE: usize = 16;

impl ChangeEntry {
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.index.to_le_bytes());
        buf[4..6].copy_from_slice(&self.old.0.to_le_bytes());
        buf[6..8].copy_from_slice(&self.new.0.to_le_bytes());
        buf[8..10].copy_from_slice(&self.flags.bits().to_le_bytes());
        // bytes 10..12 reserved
        buf[12..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Result<Self, String> {
        let flags_bits = u16::from_le_bytes([buf[8], buf[9]]);
        let flags = ChangeFlags::from_bits(flags_bits)
            .ok_or_else(|| format!("unknown change flag bits {flags_bits:#06x}"))?;
        Ok(Self {
            index: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            old: BlockId(u16::from_le_bytes([buf[4], buf[5]])),
            new: BlockId(u16::from_le_bytes([buf[6], buf[7]])),
            flags,
            timestamp: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }
}

/// Append-only record file for one level's change log.
pub struct ChangeLogFile {
    path: PathBuf,
}

impl ChangeLogFile {
    pub const MAGIC: [u8; 4] = *b"GLDB";
    const WIRE_VERSION: u8 = 1;
    const HEADER_SIZE: u64 = 5;

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if path.exists() {
            let mut header = [0u8; Self::HEADER_SIZE as usize];
            let mut file = File::open(&path)?;
            let read = read_up_to(&mut file, &mut header)?;
            if read >= 4 && header[..4] != Self::MAGIC[..] {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "invalid change log magic; expected GLDB",
                ));
            }
            if read >= 5 && header[4] != Self::WIRE_VERSION {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported change log wire version {}", header[4]),
                ));
            }
        }

        Ok(Self { path })
    }

    /// Append records in order. Creates the file (with header) on first
    /// write, so an empty log costs no disk entry.
    pub fn append(&self, entries: &[ChangeEntry]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let fresh = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if fresh {
            file.write_all(&Self::MAGIC)?;
            file.write_all(&[Self::WIRE_VERSION])?;
        }

        let mut buf = Vec::with_capacity(entries.len() * RECORD_SIZE);
        for entry in entries {
            buf.extend_from_slice(&entry.encode());
        }
        file.write_all(&buf)?;
        file.sync_data()
    }

    /// Number of whole records currently on disk.
    pub fn record_count(&self) -> io::Result<u64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let len = fs::metadata(&self.path)?.len();
        Ok(len.saturating_sub(Self::HEADER_SIZE) / RECORD_SIZE as u64)
    }

    /// Read every decodable record in commit order, starting at `skip`
    /// records. Malformed records and a truncated tail are skipped with a
    /// warning; load continues best-effort.
    pub fn read_from(&self, skip: u64) -> io::Result<Vec<ChangeEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(&self.path)?;
        if bytes.len() < Self::HEADER_SIZE as usize {
            return Ok(Vec::new());
        }

        let body = &bytes[Self::HEADER_SIZE as usize..];
        let whole = body.len() / RECORD_SIZE;
        if body.len() % RECORD_SIZE != 0 {
            warn!(
                "Change log {:?} has a truncated tail record ({} trailing bytes); skipping it",
                self.path,
                body.len() % RECORD_SIZE
            );
        }

        let mut entries = Vec::new();
        for record_index in skip..whole as u64 {
            let offset = record_index as usize * RECORD_SIZE;
            let record: &[u8; RECORD_SIZE] = body[offset..offset + RECORD_SIZE]
                .try_into()
                .expect("slice has record size");
            match ChangeEntry::decode(record) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(
                        "Skipping malformed change log record {} in {:?}: {}",
                        record_index, self.path, err
                    );
                }
            }
        }
        Ok(entries)
    }

    pub fn read_all(&self) -> io::Result<Vec<ChangeEntry>> {
        self.read_from(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
