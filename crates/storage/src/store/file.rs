//! Segment store backed by tar archives
//!
//! Layout of a store directory:
//!
//! ```text
//! data00000a.tar   closed archive
//! data00001b.tar   closed archive, rewritten once by the garbage collector
//! data00002a.tar   archive currently being appended to
//! journal.log      persisted heads
//! ```
//!
//! The number orders archives by creation; the letter is bumped every time
//! the collector rewrites an archive without its unreachable segments. An
//! archive already at letter `z` is rewritten under a fresh number instead.

use super::journal::Journal;
use super::{newer_generation, ArchiveSummary, SegmentStore, SweepInfo};
use crate::archive::{archive_name, parse_archive_name, ArchiveEntry, ArchiveReader, ArchiveWriter};
use crate::record_cache::LruMap;
use crate::segment::Segment;
use arbor_core::{Error, GcGeneration, RecordId, Result, SegmentId};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tuning knobs of a [`FileStore`]
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Size at which the open archive is closed and a new one started
    pub max_archive_size: u64,
    /// Number of parsed segments kept in memory
    pub segment_cache_size: usize,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            max_archive_size: 256 * 1024 * 1024,
            segment_cache_size: 256,
        }
    }
}

struct WriterSlot {
    current: Option<ArchiveWriter>,
    next_index: u32,
    closed: bool,
}

/// Segment store appending to tar archives in a directory
pub struct FileStore {
    directory: PathBuf,
    options: FileStoreOptions,
    /// Closed archives, oldest first
    readers: RwLock<Vec<Arc<ArchiveReader>>>,
    writer: Mutex<WriterSlot>,
    cache: Mutex<LruMap<SegmentId, Arc<Segment>>>,
    /// Archives dropped from the store whose files still exist
    retired: Mutex<Vec<Arc<ArchiveReader>>>,
    journal: Mutex<Journal>,
    generation: Mutex<GcGeneration>,
}

impl FileStore {
    /// Open the store in `directory`, creating it if needed
    ///
    /// Every closed archive must pass index validation; archives that were
    /// never closed are recovered up to their last intact segment and
    /// rewritten as closed archives.
    pub fn open(directory: impl AsRef<Path>, options: FileStoreOptions) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        // Keep only the newest letter of every archive number
        let mut archives: BTreeMap<u32, (char, PathBuf)> = BTreeMap::new();
        let mut stale = Vec::new();
        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((index, letter)) = parse_archive_name(&name) else {
                continue;
            };
            match archives.get(&index) {
                Some((existing, _)) if *existing > letter => stale.push(entry.path()),
                Some((_, existing_path)) => {
                    stale.push(existing_path.clone());
                    archives.insert(index, (letter, entry.path()));
                }
                None => {
                    archives.insert(index, (letter, entry.path()));
                }
            }
        }
        for path in stale {
            tracing::info!(target: "arbor::archive", path = %path.display(), "Removing superseded archive");
            fs::remove_file(&path)?;
        }

        let mut readers = Vec::with_capacity(archives.len());
        let mut generation = GcGeneration::INITIAL;
        let mut next_index = archives.keys().next_back().map_or(0, |index| index + 1);
        for (index, (letter, path)) in archives {
            let reader = match ArchiveReader::open(&path)? {
                Some(reader) => reader,
                None => {
                    let target = match next_letter(letter) {
                        Some(next) => (index, next),
                        None => {
                            next_index += 1;
                            (next_index - 1, 'a')
                        }
                    };
                    match Self::recover_archive(&directory, target, &path)? {
                        Some(reader) => reader,
                        None => continue,
                    }
                }
            };
            for entry in reader.entries() {
                generation = newer_generation(generation, entry.gc_generation());
            }
            readers.push(Arc::new(reader));
        }

        let journal = Journal::open(&directory)?;
        tracing::info!(
            target: "arbor::store",
            directory = %directory.display(),
            archives = readers.len(),
            generation = %generation,
            "Opened file store"
        );
        Ok(Self {
            cache: Mutex::new(LruMap::new(options.segment_cache_size)),
            directory,
            options,
            readers: RwLock::new(readers),
            writer: Mutex::new(WriterSlot {
                current: None,
                next_index,
                closed: false,
            }),
            retired: Mutex::new(Vec::new()),
            journal: Mutex::new(journal),
            generation: Mutex::new(generation),
        })
    }

    /// Rewrite the intact prefix of an unclosed archive as the closed archive
    /// `(index, letter)`
    fn recover_archive(
        directory: &Path,
        (index, letter): (u32, char),
        path: &Path,
    ) -> Result<Option<ArchiveReader>> {
        let recovered = ArchiveReader::recover(path)?;
        if recovered.is_empty() {
            fs::remove_file(path)?;
            return Ok(None);
        }
        let mut writer = ArchiveWriter::create(directory, index, letter)?;
        for (entry, data) in &recovered {
            writer.append_raw(*entry, data)?;
        }
        let new_path = writer.close()?;
        fs::remove_file(path)?;
        ArchiveReader::open(&new_path)?
            .map(Some)
            .ok_or_else(|| Error::corrupt_archive(new_path.display().to_string(), "missing index"))
    }

    /// Store directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Names of all archive files, oldest first
    pub fn archive_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .readers
            .read()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        if let Some(writer) = &self.writer.lock().current {
            names.push(writer.name().to_string());
        }
        names
    }

    /// Reserve an archive number no existing archive uses
    fn allocate_index(&self) -> u32 {
        let mut slot = self.writer.lock();
        let index = slot.next_index;
        slot.next_index += 1;
        index
    }

    /// Name of the archive replacing `reader` after a rewrite
    fn rewrite_target(&self, reader: &ArchiveReader) -> Result<(u32, char)> {
        let Some((index, letter)) = parse_archive_name(reader.name()) else {
            return Err(Error::storage(format!("unexpected archive name {}", reader.name())));
        };
        if let Some(next) = next_letter(letter) {
            return Ok((index, next));
        }
        let fresh = self.allocate_index();
        tracing::warn!(
            target: "arbor::archive",
            archive = %reader.name(),
            index = fresh,
            "Archive letters exhausted, rewriting under a new number"
        );
        Ok((fresh, 'a'))
    }

    /// Close the open archive so its segments become sweepable
    fn rotate(&self, slot: &mut WriterSlot) -> Result<()> {
        let Some(writer) = slot.current.take() else {
            return Ok(());
        };
        if writer.is_empty() {
            let path = writer.path().to_path_buf();
            drop(writer);
            fs::remove_file(path)?;
            return Ok(());
        }
        let path = writer.close()?;
        let reader = ArchiveReader::open(&path)?
            .ok_or_else(|| Error::corrupt_archive(path.display().to_string(), "missing index"))?;
        self.readers.write().push(Arc::new(reader));
        Ok(())
    }

    fn read_bytes(&self, id: &SegmentId) -> Result<Option<Vec<u8>>> {
        {
            let mut slot = self.writer.lock();
            if let Some(writer) = slot.current.as_mut() {
                if let Some(data) = writer.read_segment(id)? {
                    return Ok(Some(data));
                }
            }
        }
        let reader = self
            .readers
            .read()
            .iter()
            .rev()
            .find(|r| r.contains(id))
            .cloned();
        match reader {
            Some(reader) => reader.read_segment(id),
            None => Ok(None),
        }
    }

    fn delete_retired(&self, defer_deletion: bool) -> Result<usize> {
        let mut retired = self.retired.lock();
        let mut deferred = 0;
        let mut remaining = Vec::new();
        for reader in retired.drain(..) {
            if defer_deletion || Arc::strong_count(&reader) > 1 {
                deferred += 1;
                remaining.push(reader);
                continue;
            }
            let path = reader.path().to_path_buf();
            drop(reader);
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(target: "arbor::archive", path = %path.display(), "Deleted retired archive")
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        *retired = remaining;
        Ok(deferred)
    }
}

fn next_letter(letter: char) -> Option<char> {
    match letter {
        'a'..='y' => Some((letter as u8 + 1) as char),
        _ => None,
    }
}

impl SegmentStore for FileStore {
    fn contains_segment(&self, id: &SegmentId) -> bool {
        if self.cache.lock().peek(id).is_some() {
            return true;
        }
        if let Some(writer) = &self.writer.lock().current {
            if writer.contains(id) {
                return true;
            }
        }
        self.readers.read().iter().any(|r| r.contains(id))
    }

    fn read_segment(&self, id: &SegmentId) -> Result<Arc<Segment>> {
        if let Some(segment) = self.cache.lock().get(id) {
            return Ok(Arc::clone(segment));
        }
        let data = self.read_bytes(id)?.ok_or(Error::SegmentNotFound(*id))?;
        let segment = Arc::new(Segment::parse(*id, data)?);
        self.cache.lock().put(*id, Arc::clone(&segment));
        Ok(segment)
    }

    fn write_segment(&self, segment: Segment) -> Result<()> {
        let mut slot = self.writer.lock();
        if slot.closed {
            return Err(Error::InvalidOperation("store is closed".into()));
        }
        if slot.current.is_none() {
            let index = slot.next_index;
            slot.current = Some(ArchiveWriter::create(&self.directory, index, 'a')?);
            slot.next_index += 1;
        }
        let full = {
            let Some(writer) = slot.current.as_mut() else {
                return Err(Error::storage("no open archive"));
            };
            writer.write_segment(&segment)?;
            writer.size() >= self.options.max_archive_size
        };
        {
            let mut generation = self.generation.lock();
            *generation = newer_generation(*generation, segment.generation());
        }
        let id = segment.id();
        self.cache.lock().put(id, Arc::new(segment));
        if full {
            self.rotate(&mut slot)?;
        }
        Ok(())
    }

    fn segment_ids(&self) -> Vec<SegmentId> {
        let mut ids: Vec<SegmentId> = self
            .readers
            .read()
            .iter()
            .flat_map(|r| r.entries().iter().map(|e| e.segment_id()).collect::<Vec<_>>())
            .collect();
        if let Some(writer) = &self.writer.lock().current {
            ids.extend(writer.entries().iter().map(|e| e.segment_id()));
        }
        ids
    }

    fn archives(&self) -> Vec<ArchiveSummary> {
        let mut summaries: Vec<ArchiveSummary> = self
            .readers
            .read()
            .iter()
            .map(|r| ArchiveSummary {
                name: r.name().to_string(),
                entries: r.entries().to_vec(),
                size: r.size(),
                closed: true,
            })
            .collect();
        if let Some(writer) = &self.writer.lock().current {
            summaries.push(ArchiveSummary {
                name: writer.name().to_string(),
                entries: writer.entries().to_vec(),
                size: writer.size(),
                closed: false,
            });
        }
        summaries
    }

    fn sweep(&self, live: &FxHashSet<SegmentId>, defer_deletion: bool) -> Result<SweepInfo> {
        {
            let mut slot = self.writer.lock();
            self.rotate(&mut slot)?;
        }

        let mut info = SweepInfo::default();
        let snapshot: Vec<Arc<ArchiveReader>> = self.readers.read().clone();
        let mut removed_segments = Vec::new();

        for reader in snapshot {
            let (kept, dropped): (Vec<&ArchiveEntry>, Vec<&ArchiveEntry>) = reader
                .entries()
                .iter()
                .partition(|e| live.contains(&e.segment_id()));
            if dropped.is_empty() {
                continue;
            }
            info.segments_removed += dropped.len();
            info.reclaimed_bytes += dropped.iter().map(|e| e.length as u64).sum::<u64>();
            removed_segments.extend(dropped.iter().map(|e| e.segment_id()));

            let replacement = if kept.is_empty() {
                info.archives_removed += 1;
                None
            } else {
                let (index, letter) = self.rewrite_target(&reader)?;
                let mut writer = ArchiveWriter::create(&self.directory, index, letter)?;
                for entry in &kept {
                    let data = reader.read_segment(&entry.segment_id())?.ok_or_else(|| {
                        Error::corrupt_archive(reader.name(), "indexed segment is unreadable")
                    })?;
                    writer.append_raw(**entry, &data)?;
                }
                let path = writer.close()?;
                let rewritten = ArchiveReader::open(&path)?.ok_or_else(|| {
                    Error::corrupt_archive(path.display().to_string(), "missing index")
                })?;
                info.archives_rewritten += 1;
                Some(Arc::new(rewritten))
            };

            {
                let mut readers = self.readers.write();
                if let Some(position) = readers.iter().position(|r| Arc::ptr_eq(r, &reader)) {
                    match replacement {
                        Some(rewritten) => readers[position] = rewritten,
                        None => {
                            readers.remove(position);
                        }
                    }
                }
            }
            tracing::debug!(
                target: "arbor::archive",
                archive = %reader.name(),
                kept = kept.len(),
                dropped = dropped.len(),
                "Swept archive"
            );
            self.retired.lock().push(reader);
        }

        {
            let mut cache = self.cache.lock();
            for id in &removed_segments {
                cache.remove(id);
            }
        }
        info.deferred = self.delete_retired(defer_deletion)?;
        Ok(info)
    }

    fn journal_head(&self) -> Result<Option<RecordId>> {
        let heads = self.journal.lock().heads()?;
        for head in heads.into_iter().rev() {
            match self
                .read_segment(&head.segment)
                .and_then(|s| s.record(head.offset).map(|_| ()))
            {
                Ok(()) => return Ok(Some(head)),
                Err(e) => {
                    tracing::warn!(target: "arbor::store", head = %head, error = %e, "Skipping unreadable journal head")
                }
            }
        }
        Ok(None)
    }

    fn set_journal_head(&self, head: RecordId) -> Result<()> {
        self.journal.lock().append(head)
    }

    fn max_generation(&self) -> GcGeneration {
        *self.generation.lock()
    }

    fn flush(&self) -> Result<()> {
        {
            let mut slot = self.writer.lock();
            if let Some(writer) = slot.current.as_mut() {
                writer.flush()?;
            }
        }
        self.journal.lock().sync()
    }

    fn close(&self) -> Result<()> {
        let mut slot = self.writer.lock();
        if slot.closed {
            return Ok(());
        }
        self.rotate(&mut slot)?;
        slot.closed = true;
        drop(slot);
        self.journal.lock().sync()?;
        self.delete_retired(false)?;
        tracing::info!(target: "arbor::store", directory = %self.directory.display(), "Closed file store");
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(target: "arbor::store", error = %e, "Failed to close file store");
        }
    }
}
