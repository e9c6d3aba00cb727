use serde::{Deserialize, Serialize};
use tracing::info;

use galena_shared::block::{encode_raw, needs_extended, BlockId};
use galena_shared::coords::Dims;

pub const CURRENT_SNAPSHOT_FORMAT_VERSION: u32 = 2;

/// Current snapshot body: raw cell bytes plus the sparse extended table,
/// exactly as the grid stores them, and the number of change-log records
/// already on disk when the snapshot was taken.
#[derive(Serialize, Deserialize)]
pub struct SnapshotDisk {
    pub format_version: u32,
    pub dims: Dims,
    pub raw: Vec<u8>,
    pub extended: Vec<(u32, u16)>,
    pub log_records: u64,
}

/// Format v1 stored every cell as a full u16 id with no side table.
#[derive(Serialize, Deserialize)]
struct SnapshotDiskV1 {
    format_version: u32,
    dims: Dims,
    cells: Vec<u16>,
    log_records: u64,
}

pub fn migrate_snapshot_payload(mut version: u32, mut payload: Vec<u8>) -> Result<Vec<u8>, String> {
    if version == CURRENT_SNAPSHOT_FORMAT_VERSION {
        return Ok(payload);
    }

    if version == 0 || version > CURRENT_SNAPSHOT_FORMAT_VERSION {
        return Err(format!(
            "unsupported snapshot format version {version}; current version is {CURRENT_SNAPSHOT_FORMAT_VERSION}"
        ));
    }

    while version < CURRENT_SNAPSHOT_FORMAT_VERSION {
        let next_version = version + 1;
        info!("Migrating snapshot payload format v{version} -> v{next_version}");
        payload = migrate_one_version(version, payload)?;
        version = next_version;
    }

    Ok(payload)
}

fn migrate_one_version(version: u32, payload: Vec<u8>) -> Result<Vec<u8>, String> {
    match version {
        1 => migrate_snapshot_v1_to_v2(payload),
        other => Err(format!(
            "missing migration path for snapshot format v{other} -> v{}",
            other + 1
        )),
    }
}

fn migrate_snapshot_v1_to_v2(payload: Vec<u8>) -> Result<Vec<u8>, String> {
    let v1: SnapshotDiskV1 = bincode::deserialize(&payload)
        .map_err(|err| format!("failed to decode v1 snapshot payload: {err}"))?;

    let expected = v1.dims.volume();
    if v1.cells.len() as u64 != expected {
        return Err(format!(
            "v1 snapshot has {} cells; dims {:?} require {expected}",
            v1.cells.len(),
            v1.dims
        ));
    }

    let mut raw = Vec::with_capacity(v1.cells.len());
    let mut extended = Vec::new();
    for (index, &id) in v1.cells.iter().enumerate() {
        let block = BlockId(id);
        raw.push(encode_raw(block));
        if needs_extended(block) {
            extended.push((index as u32, id));
        }
    }

    let v2 = SnapshotDisk {
        format_version: CURRENT_SNAPSHOT_FORMAT_VERSION,
        dims: v1.dims,
        raw,
        extended,
        log_records: v1.log_records,
    };
    bincode::serialize(&v2).map_err(|err| format!("failed to encode migrated v2 payload: {err}"))
}
