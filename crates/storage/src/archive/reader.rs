//! Reading closed archives and recovering unclosed ones

use super::{
    decode_footer, parse_segment_entry_name, tar_entry_size, ArchiveEntry, BLOCK_SIZE, ENTRY_SIZE,
    FOOTER_SIZE, TRAILER_SIZE,
};
use crate::segment::Segment;
use arbor_core::{Error, Result, SegmentId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Read-only view of a closed archive
pub struct ArchiveReader {
    name: String,
    path: PathBuf,
    file: Mutex<File>,
    entries: Vec<ArchiveEntry>,
    locations: FxHashMap<SegmentId, (u64, u32)>,
    size: u64,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl ArchiveReader {
    /// Open a closed archive, validating its index
    ///
    /// Returns `Ok(None)` if the archive has no index (it was never closed)
    /// and `Error::CorruptArchive` if the index does not match the file.
    pub fn open(path: &Path) -> Result<Option<Self>> {
        let name = file_name(path);
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < TRAILER_SIZE + BLOCK_SIZE + FOOTER_SIZE as u64 {
            return Ok(None);
        }

        let mut footer = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::Start(len - TRAILER_SIZE - FOOTER_SIZE as u64))?;
        file.read_exact(&mut footer)?;
        let Some(footer) = decode_footer(&footer) else {
            return Ok(None);
        };

        let body_len = footer.count as u64 * ENTRY_SIZE as u64;
        let index_size = footer.size as u64;
        if index_size % BLOCK_SIZE != 0
            || index_size < body_len + FOOTER_SIZE as u64
            || index_size + BLOCK_SIZE + TRAILER_SIZE > len
        {
            return Err(Error::corrupt_archive(
                name,
                format!("index size {} does not fit archive of {} bytes", index_size, len),
            ));
        }

        let mut body = vec![0u8; body_len as usize];
        file.seek(SeekFrom::Start(
            len - TRAILER_SIZE - FOOTER_SIZE as u64 - body_len,
        ))?;
        file.read_exact(&mut body)?;
        let crc = crc32fast::hash(&body);
        if crc != footer.crc {
            return Err(Error::corrupt_archive(
                name,
                format!("index checksum mismatch: expected {:08x}, computed {:08x}", footer.crc, crc),
            ));
        }

        let mut entries = Vec::with_capacity(footer.count as usize);
        let mut locations = FxHashMap::default();
        let mut position = 0u64;
        for chunk in body.chunks_exact(ENTRY_SIZE) {
            let bytes: &[u8; ENTRY_SIZE] = chunk
                .try_into()
                .map_err(|_| Error::corrupt_archive(name.clone(), "short index entry"))?;
            let entry = ArchiveEntry::from_bytes(bytes);
            locations.insert(entry.segment_id(), (position + BLOCK_SIZE, entry.length));
            position += tar_entry_size(entry.length as u64);
            entries.push(entry);
        }
        if position + BLOCK_SIZE + index_size + TRAILER_SIZE != len {
            return Err(Error::corrupt_archive(
                name,
                format!(
                    "index describes {} bytes of segments, archive holds {}",
                    position,
                    len - BLOCK_SIZE - index_size - TRAILER_SIZE
                ),
            ));
        }

        tracing::debug!(
            target: "arbor::archive",
            archive = %name,
            entries = entries.len(),
            "Opened archive"
        );
        Ok(Some(Self {
            name,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            entries,
            locations,
            size: len,
        }))
    }

    /// Scan an unclosed archive and return its readable prefix
    ///
    /// Scanning stops at the first entry that is truncated, fails its
    /// checksum or does not hold a valid segment.
    pub fn recover(path: &Path) -> Result<Vec<(ArchiveEntry, Vec<u8>)>> {
        let name = file_name(path);
        let mut archive = tar::Archive::new(File::open(path)?);
        let mut recovered = Vec::new();
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(target: "arbor::archive", archive = %name, error = %e, "Unreadable archive");
                return Ok(recovered);
            }
        };
        for entry in entries {
            let Ok(mut entry) = entry else { break };
            let Ok(entry_path) = entry.path() else { break };
            let entry_name = entry_path.to_string_lossy().into_owned();
            let Some((id, crc)) = parse_segment_entry_name(&entry_name) else {
                continue;
            };
            let size = entry.size();
            let mut data = Vec::with_capacity(size as usize);
            if entry.read_to_end(&mut data).is_err()
                || data.len() as u64 != size
                || crc32fast::hash(&data) != crc
            {
                tracing::warn!(target: "arbor::archive", archive = %name, segment = %id, "Truncated segment entry");
                break;
            }
            let Ok((generation, _)) = Segment::read_header(&data) else {
                break;
            };
            recovered.push((
                ArchiveEntry {
                    msb: id.msb,
                    lsb: id.lsb,
                    length: data.len() as u32,
                    generation: generation.generation,
                    full_generation: generation.full_generation,
                    compacted: generation.compacted,
                },
                data,
            ));
        }
        tracing::info!(
            target: "arbor::archive",
            archive = %name,
            segments = recovered.len(),
            "Recovered unclosed archive"
        );
        Ok(recovered)
    }

    /// Archive file name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Archive path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Index entries in archive order
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// True if the archive holds the segment
    pub fn contains(&self, id: &SegmentId) -> bool {
        self.locations.contains_key(id)
    }

    /// Read a segment's bytes
    pub fn read_segment(&self, id: &SegmentId) -> Result<Option<Vec<u8>>> {
        let Some(&(offset, length)) = self.locations.get(id) else {
            return Ok(None);
        };
        let mut data = vec![0u8; length as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data)?;
        Ok(Some(data))
    }
}
