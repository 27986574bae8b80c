// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::buffer::WriteBuffer;
use crate::config::Config;
use crate::file::{
    buffer_file_path, fsync_directory, is_tmp_file_name, parse_slot_file_name, slot_file_path,
    tmp_file_path,
};
use crate::kd_tree::{builder, KdTreeExt};
use crate::meta::KdTreeMeta;
use crate::point::Point;
use std::fs::OpenOptions;
use std::path::Path;

/// A BKD-tree: a forest of memory-mapped static KD-trees plus a small
/// write buffer, persisted in one directory under one file name prefix.
///
/// Inserts accumulate in the buffer; when it fills up, a cascade merge
/// bulk-builds the buffered points together with the lowest forest slots
/// into a fresh tree file, committed by an atomic rename.
///
/// A `&mut` receiver marks every mutating operation, so the single-writer /
/// multi-reader contract is enforced by the borrow checker; wrap the handle
/// in an `RwLock` to share it across threads. Dropping the handle unmaps
/// and closes every file.
pub struct BkdTree {
    config: Config,
    buffer: WriteBuffer,
    slots: Vec<Option<KdTreeExt>>,
    num_points: u64,
}

impl BkdTree {
    /// Creates a fresh index in `config.dir`, removing any stale slot and
    /// tmp files of the same prefix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the configuration fails validation.
    pub(crate) fn create_new(config: Config) -> crate::Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.dir)?;

        for entry in std::fs::read_dir(&config.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if parse_slot_file_name(&config.prefix, name).is_some()
                || is_tmp_file_name(&config.prefix, name)
            {
                log::trace!("removing stale file {:?}", entry.path());
                std::fs::remove_file(entry.path())?;
            }
        }

        let geometry = KdTreeMeta {
            leaf_cap: config.leaf_cap,
            intra_cap: config.intra_cap,
            num_dims: config.num_dims,
            bytes_per_dim: config.bytes_per_dim,

            #[expect(clippy::cast_possible_truncation, reason = "pointSize fits u8 (numDims and bytesPerDim are u8)")]
            point_size: config.point_size() as u8,

            ..KdTreeMeta::default()
        };

        let buffer = WriteBuffer::create(
            &buffer_file_path(&config.dir, &config.prefix),
            config.t0m_cap,
            geometry,
        )?;

        fsync_directory(&config.dir)?;

        log::debug!(
            "created new bkd-tree in {:?} with prefix {:?}",
            config.dir,
            config.prefix,
        );

        Ok(Self {
            config,
            buffer,
            slots: Vec::new(),
            num_points: 0,
        })
    }

    /// Opens an existing index, deriving its geometry from the buffer file
    /// trailer and mapping every `<prefix>_<k>` slot file.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, on an unknown format version, or if
    /// a trailer violates its invariants.
    pub fn open<P: AsRef<Path>>(dir: P, prefix: &str, bkd_cap: u64) -> crate::Result<Self> {
        let dir = dir.as_ref();

        let buffer = WriteBuffer::open(&buffer_file_path(dir, prefix))?;

        let config = Config {
            dir: dir.into(),
            prefix: prefix.into(),
            t0m_cap: buffer.capacity(),
            bkd_cap,
            num_dims: buffer.meta().num_dims,
            bytes_per_dim: buffer.meta().bytes_per_dim,
            leaf_cap: buffer.meta().leaf_cap,
            intra_cap: buffer.meta().intra_cap,
        };
        config.validate()?;

        let mut slot_numbers = vec![];

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();

            if let Some(number) = file_name.to_str().and_then(|name| parse_slot_file_name(prefix, name))
            {
                slot_numbers.push(number);
            }
        }
        slot_numbers.sort_unstable();

        let mut slots: Vec<Option<KdTreeExt>> = Vec::new();
        let mut num_points = buffer.len();

        for number in slot_numbers {
            let tree = KdTreeExt::open(&slot_file_path(dir, prefix, number))?;

            if tree.meta().point_size != buffer.meta().point_size
                || tree.meta().num_dims != buffer.meta().num_dims
                || tree.meta().bytes_per_dim != buffer.meta().bytes_per_dim
            {
                return Err(crate::Error::Decode(
                    crate::coding::DecodeError::InvalidTrailer(
                        "tree file geometry does not match buffer",
                    ),
                ));
            }

            num_points += tree.num_points();

            while slots.len() < number {
                slots.push(None);
            }
            slots.push(Some(tree));
        }

        log::debug!(
            "opened bkd-tree in {dir:?} with {} slots and {num_points} points",
            slots.len(),
        );

        Ok(Self {
            config,
            buffer,
            slots,
            num_points,
        })
    }

    /// Returns the hard point capacity (bkdCap).
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.config.bkd_cap
    }

    /// Returns the current number of live points.
    #[must_use]
    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    /// Returns the number of points currently buffered.
    #[must_use]
    pub fn buffer_len(&self) -> u64 {
        self.buffer.len()
    }

    /// Returns the number of forest slots, including empty ones.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of points held by the given forest slot.
    #[must_use]
    pub fn slot_num_points(&self, slot: usize) -> u64 {
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .map_or(0, KdTreeExt::num_points)
    }

    /// Returns the index configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn check_point(&self, point: &Point) -> crate::Result<()> {
        if point.num_dims() != usize::from(self.config.num_dims) {
            return Err(crate::Error::InvalidParameter(
                "point dimensionality does not match index",
            ));
        }

        if !point.fits(self.config.bytes_per_dim) {
            return Err(crate::Error::InvalidParameter(
                "point value does not fit into bytes_per_dim bytes",
            ));
        }

        Ok(())
    }

    /// Inserts a point.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CapacityExceeded`] if the index already
    /// holds `bkd_cap` points, `InvalidParameter` if the point does not
    /// match the index geometry, or an I/O error if a cascade merge fails.
    pub fn insert(&mut self, point: &Point) -> crate::Result<()> {
        self.check_point(point)?;

        if self.num_points >= self.config.bkd_cap {
            return Err(crate::Error::CapacityExceeded);
        }

        if self.buffer.is_full() {
            // a failed cascade left the buffer full; retry it before
            // taking the next point
            self.cascade()?;
        }

        self.buffer.insert(point)?;
        self.num_points += 1;

        if self.buffer.is_full() {
            self.cascade()?;
        }

        Ok(())
    }

    /// Merges the buffer and the forest slots `0..=k` into a freshly built
    /// tree at slot `k`.
    ///
    /// `k` is the smallest slot that is empty, or whose capacity
    /// `t0mCap * 2^k` still covers the merged point count (slots partially
    /// drained by erasures allow stopping early). The new file only becomes
    /// visible through the final rename, so a crash mid-build leaves the
    /// old forest intact.
    fn cascade(&mut self) -> crate::Result<()> {
        let mut sum = self.buffer.len();
        let mut slot = 0;

        loop {
            if slot == self.slots.len() {
                self.slots.push(None);
                break;
            }

            match &self.slots[slot] {
                None => break,
                Some(tree) if tree.num_points() == 0 => break,
                Some(tree) => {
                    sum += tree.num_points();

                    if sum <= self.config.t0m_cap << slot {
                        break;
                    }
                }
            }

            slot += 1;
        }

        log::debug!("cascading {sum} points into slot {slot}");

        let tmp_path = tmp_file_path(&self.config.dir, &self.config.prefix, slot);
        let dst_path = slot_file_path(&self.config.dir, &self.config.prefix, slot);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut count = self.buffer.extract_into(&mut file)?;
        for tree in self.slots[..=slot].iter().flatten() {
            count += tree.extract_into(&mut file)?;
        }
        debug_assert_eq!(sum, count);

        builder::bulk_load(&mut file, count, self.buffer.meta())?;

        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &dst_path)?;
        fsync_directory(&self.config.dir)?;

        // only now is the new tree the durable truth; release the replaced
        // mapping, unlink the drained lower slots and rewind the buffer
        let new_tree = KdTreeExt::open(&dst_path)?;
        drop(self.slots[slot].replace(new_tree));

        for drained in &mut self.slots[..slot] {
            if let Some(tree) = drained.take() {
                tree.remove()?;
            }
        }

        self.buffer.reset();

        log::debug!("cascade into slot {slot} done");

        Ok(())
    }

    /// Erases one occurrence of the point. Returns `true` if it was found.
    ///
    /// The physical record is removed in whichever region holds it (no
    /// tombstones) and the ancestor point counts are rewritten in place.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a node writeback fails.
    pub fn erase(&mut self, point: &Point) -> crate::Result<bool> {
        if self.check_point(point).is_err() {
            // such a point cannot have been inserted
            return Ok(false);
        }

        if self.buffer.erase(point) {
            self.num_points -= 1;
            return Ok(true);
        }

        for tree in self.slots.iter_mut().flatten() {
            if tree.erase(point)? {
                self.num_points -= 1;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Calls `visitor` for every live point inside the window `[low, high]`
    /// (inclusive on all dimensions).
    ///
    /// The visitor borrows the point; clone it to retain it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the window dimensionality does not
    /// match the index.
    pub fn intersect<F: FnMut(&Point)>(
        &self,
        low: &Point,
        high: &Point,
        mut visitor: F,
    ) -> crate::Result<()> {
        if low.num_dims() != usize::from(self.config.num_dims)
            || high.num_dims() != usize::from(self.config.num_dims)
        {
            return Err(crate::Error::InvalidParameter(
                "window dimensionality does not match index",
            ));
        }

        self.buffer.intersect(low, high, &mut visitor)?;

        for tree in self.slots.iter().flatten() {
            tree.intersect(low, high, &mut visitor)?;
        }

        Ok(())
    }

    /// Flushes every mapped region to disk, returning the first error but
    /// attempting all of them.
    pub fn flush(&self) -> crate::Result<()> {
        let mut first_error = None;

        if let Err(e) = self.buffer.flush() {
            first_error.get_or_insert(e);
        }

        for tree in self.slots.iter().flatten() {
            if let Err(e) = tree.flush() {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
