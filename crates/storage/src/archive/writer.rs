//! Appending segments to an open archive

use super::{
    archive_name, encode_index, segment_entry_name, tar_entry_size, ArchiveEntry, BLOCK_SIZE,
};
use crate::segment::Segment;
use arbor_core::{Result, SegmentId};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tar::{Builder, Header};

/// Archive open for appending
///
/// Segments written here stay readable through the writer until it is
/// closed and reopened as an [`ArchiveReader`](super::ArchiveReader).
pub struct ArchiveWriter {
    name: String,
    path: PathBuf,
    builder: Builder<File>,
    reader: File,
    entries: Vec<ArchiveEntry>,
    locations: FxHashMap<SegmentId, (u64, u32)>,
    size: u64,
}

impl ArchiveWriter {
    /// Create archive `data{index}{letter}.tar` in `directory`
    pub fn create(directory: &Path, index: u32, letter: char) -> Result<Self> {
        let name = archive_name(index, letter);
        let path = directory.join(&name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        let reader = File::open(&path)?;
        tracing::debug!(target: "arbor::archive", archive = %name, "Created archive");
        Ok(Self {
            name,
            path,
            builder: Builder::new(file),
            reader,
            entries: Vec::new(),
            locations: FxHashMap::default(),
            size: 0,
        })
    }

    /// Archive file name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Archive path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entries written so far
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// True if nothing was written yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if the segment was written to this archive
    pub fn contains(&self, id: &SegmentId) -> bool {
        self.locations.contains_key(id)
    }

    /// Append a segment
    pub fn write_segment(&mut self, segment: &Segment) -> Result<()> {
        self.append_raw(ArchiveEntry::for_segment(segment), segment.data())
    }

    /// Append raw segment bytes described by `entry`
    pub fn append_raw(&mut self, entry: ArchiveEntry, data: &[u8]) -> Result<()> {
        let id = entry.segment_id();
        let mut header = Header::new_gnu();
        header.set_path(segment_entry_name(&id, data))?;
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        self.builder.append(&header, data)?;

        self.locations
            .insert(id, (self.size + BLOCK_SIZE, data.len() as u32));
        self.entries.push(entry);
        self.size += tar_entry_size(data.len() as u64);
        Ok(())
    }

    /// Read back a segment written to this archive
    pub fn read_segment(&mut self, id: &SegmentId) -> Result<Option<Vec<u8>>> {
        let Some(&(offset, length)) = self.locations.get(id) else {
            return Ok(None);
        };
        let mut data = vec![0u8; length as usize];
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(&mut data)?;
        Ok(Some(data))
    }

    /// Force written data to disk
    pub fn flush(&mut self) -> Result<()> {
        self.builder.get_mut().sync_data()?;
        Ok(())
    }

    /// Write the index and tar trailer, then sync
    ///
    /// Returns the archive path.
    pub fn close(mut self) -> Result<PathBuf> {
        let index = encode_index(&self.entries);
        let mut header = Header::new_gnu();
        header.set_path(format!("{}.idx", self.name))?;
        header.set_size(index.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        self.builder.append(&header, &index[..])?;

        let file = self.builder.into_inner()?;
        file.sync_all()?;
        tracing::debug!(
            target: "arbor::archive",
            archive = %self.name,
            entries = self.entries.len(),
            "Closed archive"
        );
        Ok(self.path)
    }
}
