use std::fs;
use std::io::{self, Cursor};
use std::path::Path;

use tracing::debug;

use galena_shared::grid::WorldGrid;

use crate::compression::{compress_zstd, decompress_zstd};
use crate::versioning::{
    migrate_snapshot_payload, SnapshotDisk, CURRENT_SNAPSHOT_FORMAT_VERSION,
};

pub const MAGIC: [u8; 4] = *b"GLVL";
const WIRE_VERSION_UNCOMPRESSED: u8 = 1;
const WIRE_VERSION_ZSTD: u8 = 2;
const ZSTD_LEVEL: i32 = 3;

fn decode_snapshot_disk(payload: &[u8]) -> io::Result<SnapshotDisk> {
    bincode::deserialize(payload).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to decode snapshot payload: {err}"),
        )
    })
}

fn decode_snapshot_version(payload: &[u8]) -> io::Result<u32> {
    let mut cursor = Cursor::new(payload);
    bincode::deserialize_from::<_, u32>(&mut cursor).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to decode snapshot version prefix: {err}"),
        )
    })
}

fn decode_with_migration(payload: &[u8]) -> io::Result<SnapshotDisk> {
    let source_version = decode_snapshot_version(payload)?;
    let migrated = migrate_snapshot_payload(source_version, payload.to_vec()).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to migrate snapshot payload from format v{source_version}: {err}"),
        )
    })?;
    decode_snapshot_disk(&migrated)
}

/// Write a grid snapshot plus the change-log record count it corresponds
/// to. The write goes through a sibling temp file and a rename so a crash
/// mid-save never clobbers the previous snapshot.
pub fn write_snapshot(path: &Path, grid: &WorldGrid, log_records: u64) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let disk = SnapshotDisk {
        format_version: CURRENT_SNAPSHOT_FORMAT_VERSION,
        dims: grid.dims(),
        raw: grid.raw_cells().to_vec(),
        extended: grid.extended_entries(),
        log_records,
    };

    let encoded = bincode::serialize(&disk).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to encode snapshot payload: {err}"),
        )
    })?;
    let compressed = compress_zstd(&encoded, ZSTD_LEVEL)?;

    let mut bytes = Vec::with_capacity(MAGIC.len() + 1 + compressed.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.push(WIRE_VERSION_ZSTD);
    bytes.extend_from_slice(&compressed);

    let tmp = path.with_extension("glvl.tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)
}

/// Load a snapshot. `Ok(None)` means no snapshot exists yet; decode
/// failures are errors because a present-but-unreadable snapshot should
/// stop that level from loading, not silently produce an empty grid.
pub fn read_snapshot(path: &Path) -> io::Result<Option<(WorldGrid, u64)>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    if bytes.len() < MAGIC.len() + 1 || bytes[..4] != MAGIC[..] {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid snapshot magic; expected GLVL",
        ));
    }

    let (wire_version, payload) = (&bytes[4], &bytes[5..]);
    let disk = match *wire_version {
        WIRE_VERSION_UNCOMPRESSED => decode_with_migration(payload)?,
        WIRE_VERSION_ZSTD => {
            let decompressed = decompress_zstd(payload).map_err(|err| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("failed to decompress snapshot payload: {err}"),
                )
            })?;
            decode_with_migration(&decompressed)?
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported snapshot wire format version {other}; expected 1 or 2"),
            ))
        }
    };

    debug!(
        "Loaded snapshot {:?}: {:?}, {} extended entries, {} log records (format v{})",
        path,
        disk.dims,
        disk.extended.len(),
        disk.log_records,
        disk.format_version
    );

    let grid = WorldGrid::from_parts(disk.dims, disk.raw, disk.extended)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(Some((grid, disk.log_records)))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use galena_shared::block::BlockId;
    use galena_shared::coords::Dims;
    use galena_shared::grid::WorldGrid;

    use super::{read_snapshot, write_snapshot};

    fn temp_snapshot(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "galena_snapshot_{tag}_{}_{}.glvl",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock after epoch")
                .as_nanos()
        ))
    }

    #[test]
    fn snapshot_round_trip_preserves_raw_and_extended_cells() {
        let mut grid = WorldGrid::new(Dims::new(6, 4, 6).expect("valid dims"));
        grid.set(0, BlockId::STONE);
        grid.set(17, BlockId(900));
        grid.set(100, BlockId::WATER_SOURCE);

        let path = temp_snapshot("roundtrip");
        write_snapshot(&path, &grid, 55).expect("write snapshot");
        let (loaded, log_records) = read_snapshot(&path)
            .expect("read snapshot")
            .expect("snapshot present");

        assert_eq!(log_records, 55);
        assert_eq!(loaded.dims(), grid.dims());
        assert_eq!(loaded.get(0), BlockId::STONE);
        assert_eq!(loaded.get(17), BlockId(900));
        assert_eq!(loaded.get(100), BlockId::WATER_SOURCE);
        assert_eq!(loaded.extended_len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_snapshot_reads_as_none() {
        let path = temp_snapshot("missing");
        assert!(read_snapshot(&path).expect("read").is_none());
    }

    #[test]
    fn corrupt_snapshot_is_an_error_not_a_panic() {
        let path = temp_snapshot("corrupt");
        std::fs::write(&path, b"GLVL\x02not-zstd-at-all").expect("write corrupt file");
        assert!(read_snapshot(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
