// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;
use crate::format_version::FormatVersion;
use crate::meta::{KdTreeMeta, TRAILER_SIZE};
use crate::point::Point;
use crate::point_array::{PointArray, PointArrayExt};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// The write buffer (T0M) absorbs fresh inserts until it fills up and
/// cascades into the forest.
///
/// It is a memory-mapped file holding a fixed-size array of encoded point
/// slots followed by the common meta trailer; only the slots below
/// `numPoints` are live. The file persists for the lifetime of the index
/// and is rewound (trailer rewritten with `numPoints = 0`) after every
/// successful cascade.
pub struct WriteBuffer {
    mmap: MmapMut,
    meta: KdTreeMeta,
}

impl WriteBuffer {
    /// Creates a fresh, zero-filled buffer file of `t0m_cap` slots,
    /// truncating any previous one.
    pub fn create(path: &Path, t0m_cap: u64, geometry: KdTreeMeta) -> crate::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let data_len = t0m_cap * u64::from(geometry.point_size);
        file.set_len(data_len + TRAILER_SIZE as u64)?;

        // Freshly created and exclusively owned, like every region of the index.
        #[expect(unsafe_code, reason = "see above")]
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let meta = KdTreeMeta {
            points_off_end: data_len,
            root_off: 0,
            num_points: 0,
            format_version: FormatVersion::V1.into(),
            ..geometry
        };
        meta.write_to_tail(&mut mmap);
        mmap.flush()?;

        log::trace!("created buffer file {path:?} with {t0m_cap} slots");

        Ok(Self { mmap, meta })
    }

    /// Opens an existing buffer file, deriving the index geometry from its
    /// trailer.
    pub fn open(path: &Path) -> crate::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        #[expect(unsafe_code, reason = "exclusively owned mapping")]
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let meta = KdTreeMeta::read_from_tail(&mmap)?;

        if FormatVersion::try_from(meta.format_version).is_err() {
            return Err(crate::Error::InvalidVersion(meta.format_version));
        }

        if meta.root_off != 0 {
            return Err(crate::Error::Decode(DecodeError::InvalidTrailer(
                "buffer trailer has a root offset",
            )));
        }

        if mmap.len() as u64 != meta.points_off_end + TRAILER_SIZE as u64 {
            return Err(crate::Error::Decode(DecodeError::InvalidTrailer(
                "buffer file length mismatch",
            )));
        }

        log::trace!(
            "opened buffer file {path:?}, {} of {} slots live",
            meta.num_points,
            meta.points_off_end / u64::from(meta.point_size),
        );

        Ok(Self { mmap, meta })
    }

    /// Returns the trailer (the geometry shared by the whole index).
    #[must_use]
    pub fn meta(&self) -> &KdTreeMeta {
        &self.meta
    }

    /// Returns the number of live points.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.meta.num_points
    }

    /// Returns the slot capacity (t0mCap).
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.meta.points_off_end / u64::from(self.meta.point_size)
    }

    /// Returns `true` if no points are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meta.num_points == 0
    }

    /// Returns `true` if every slot is live.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    fn live_range(&self) -> std::ops::Range<usize> {
        0..self.meta.num_points as usize * usize::from(self.meta.point_size)
    }

    fn write_trailer(&mut self) {
        let meta = self.meta;
        meta.write_to_tail(&mut self.mmap);
    }

    /// Appends a point into the next free slot.
    pub fn insert(&mut self, point: &Point) -> crate::Result<()> {
        debug_assert!(!self.is_full());

        let point_size = usize::from(self.meta.point_size);
        let idx = self.meta.num_points as usize;

        let mut slot = &mut self.mmap[idx * point_size..(idx + 1) * point_size];
        point.encode_into(&mut slot, self.meta.bytes_per_dim)?;

        self.meta.num_points += 1;
        self.write_trailer();

        Ok(())
    }

    /// Removes one occurrence of the point by overwriting it with the last
    /// live slot (order-destroying). Returns `true` if it was found.
    pub fn erase(&mut self, point: &Point) -> bool {
        let range = self.live_range();
        let mut array = PointArrayExt::new(
            &mut self.mmap[range],
            0,
            self.meta.num_dims,
            self.meta.bytes_per_dim,
        );

        if !array.erase(point) {
            return false;
        }

        self.meta.num_points -= 1;
        self.write_trailer();

        true
    }

    /// Calls `visitor` for every buffered point inside `[low, high]`.
    pub fn intersect<F: FnMut(&Point)>(
        &self,
        low: &Point,
        high: &Point,
        visitor: &mut F,
    ) -> crate::Result<()> {
        let live = &self.mmap[self.live_range()];

        for record in live.chunks_exact(usize::from(self.meta.point_size)) {
            let mut reader = record;
            let point = Point::decode_from(&mut reader, self.meta.num_dims, self.meta.bytes_per_dim)?;

            if point.is_inside(low, high) {
                visitor(&point);
            }
        }

        Ok(())
    }

    /// Appends the live slots to `dst` and returns how many points were written.
    pub fn extract_into(&self, dst: &mut File) -> crate::Result<u64> {
        dst.write_all(&self.mmap[self.live_range()])?;
        Ok(self.meta.num_points)
    }

    /// Rewinds the buffer to zero live points after a successful cascade.
    pub fn reset(&mut self) {
        self.meta.num_points = 0;
        self.write_trailer();
    }

    /// Flushes outstanding writes of the mapping to disk.
    pub fn flush(&self) -> crate::Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
