//! Payload chunking — builds a stored (no-compression) ZIP container in memory
//! and splits it into bounded-size volumes.
//!
//! Compression is deliberately disabled: payloads are typically already
//! compressed or multimedia. Volume names carry a fixed-width numeric suffix
//! so that lexicographic order equals split order; consumers zip volume order
//! against upload-result order.

use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};
use crate::types::Volume;

/// Width of the numeric volume suffix (`file.zip.0001`, `file.zip.0002`, ...)
const SUFFIX_WIDTH: usize = 4;

/// Split a payload into container volumes no larger than `volume_size` bytes.
///
/// The payload is written as a single stored entry of a ZIP container; the
/// container stream is then cut into volumes in order. Concatenating the
/// volumes in sorted-name order reproduces the container byte-for-byte.
///
/// Takes ownership of `data` and drops it as soon as the container is written;
/// the uncompressed buffer is not needed past this point.
///
/// # Errors
///
/// Returns [`Error::Config`] for a zero volume size and [`Error::Chunk`] if
/// container construction fails. Any failure here is fatal to the job.
pub fn split_volumes(filename: &str, data: Vec<u8>, volume_size: u64) -> Result<Vec<Volume>> {
    if volume_size == 0 {
        return Err(Error::Config {
            message: "volume size must be positive".to_string(),
            key: Some("transfer.volume_size".to_string()),
        });
    }

    let container_name = format!("{}.zip", filename);
    let mut container = write_container(filename, data)?;

    let bound = volume_size as usize;
    let total = container.len().div_ceil(bound);
    tracing::debug!(
        container = %container_name,
        container_size = container.len(),
        volumes = total,
        "splitting container"
    );

    let mut volumes = Vec::with_capacity(total);
    let mut index = 0;
    while !container.is_empty() {
        index += 1;
        let take = container.len().min(bound);
        let bytes: Vec<u8> = container.drain(..take).collect();
        volumes.push(Volume {
            index,
            name: format!("{}.{:0width$}", container_name, index, width = SUFFIX_WIDTH),
            bytes,
        });
    }

    Ok(volumes)
}

/// Write `data` as a single stored entry named `filename`, returning the raw
/// container bytes. The source buffer is consumed and freed here.
fn write_container(filename: &str, data: Vec<u8>) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    writer
        .start_file(filename, options)
        .map_err(|e| Error::Chunk(format!("failed to start container entry: {}", e)))?;
    writer.write_all(&data)?;
    drop(data);

    let cursor = writer
        .finish()
        .map_err(|e| Error::Chunk(format!("failed to finish container: {}", e)))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Read;

    const MIB: u64 = 1024 * 1024;

    /// Concatenate volumes in sorted-name order and read the payload back out
    /// of the reassembled container.
    fn rehydrate(mut volumes: Vec<Volume>) -> (String, Vec<u8>) {
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        let mut container = Vec::new();
        for volume in &volumes {
            container.extend_from_slice(&volume.bytes);
        }
        let mut archive = zip::ZipArchive::new(Cursor::new(container)).unwrap();
        let mut entry = archive.by_index(0).unwrap();
        let name = entry.name().to_string();
        let mut payload = Vec::new();
        entry.read_to_end(&mut payload).unwrap();
        (name, payload)
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn small_payload_yields_single_volume() {
        let volumes = split_volumes("notes.txt", patterned(100 * 1024), MIB).unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].index, 1);
        assert_eq!(volumes[0].name, "notes.txt.zip.0001");
    }

    #[test]
    fn volume_count_is_ceiling_of_container_over_bound() {
        // 2.5 MiB payload, 1 MiB bound: container is payload plus a small
        // fixed header/footer, well clear of the 3 MiB boundary.
        let payload = patterned(2 * MIB as usize + MIB as usize / 2);
        let volumes = split_volumes("video.mp4", payload, MIB).unwrap();
        assert_eq!(volumes.len(), 3);
        assert_eq!(volumes[0].bytes.len() as u64, MIB);
        assert_eq!(volumes[1].bytes.len() as u64, MIB);
        assert!((volumes[2].bytes.len() as u64) < MIB);
    }

    #[test]
    fn forty_mib_at_fifteen_mib_bound_gives_three_volumes() {
        let payload = patterned(40 * MIB as usize);
        let volumes = split_volumes("image.iso", payload, 15 * MIB).unwrap();
        assert_eq!(volumes.len(), 3);
        assert_eq!(volumes[0].bytes.len() as u64, 15 * MIB);
        assert_eq!(volumes[1].bytes.len() as u64, 15 * MIB);
        // Final volume holds the ~10 MiB remainder plus container overhead
        let last = volumes[2].bytes.len() as u64;
        assert!(last >= 10 * MIB && last < 10 * MIB + 64 * 1024, "got {}", last);
    }

    #[test]
    fn names_sort_lexicographically_into_split_order() {
        let volumes = split_volumes("a.bin", patterned(5 * MIB as usize), MIB).unwrap();
        let names: Vec<_> = volumes.iter().map(|v| v.name.clone()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        let indices: Vec<_> = volumes.iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn sorted_concatenation_rehydrates_payload_byte_for_byte() {
        let payload = patterned(3 * MIB as usize + 12345);
        let volumes = split_volumes("backup.tar", payload.clone(), MIB).unwrap();
        let (name, rehydrated) = rehydrate(volumes);
        assert_eq!(name, "backup.tar");
        assert_eq!(rehydrated, payload);
    }

    #[test]
    fn empty_payload_still_produces_a_valid_container() {
        let volumes = split_volumes("empty", Vec::new(), MIB).unwrap();
        assert_eq!(volumes.len(), 1);
        let (name, rehydrated) = rehydrate(volumes);
        assert_eq!(name, "empty");
        assert!(rehydrated.is_empty());
    }

    #[test]
    fn zero_volume_size_is_a_config_error() {
        let result = split_volumes("x", vec![1, 2, 3], 0);
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
