// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod builder;

use crate::coding::{Decode, DecodeError, Encode};
use crate::format_version::FormatVersion;
use crate::meta::{KdTreeMeta, TRAILER_SIZE};
use crate::node::KdTreeIntraNode;
use crate::point::Point;
use crate::point_array::PointArrayExt;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// An open, memory-mapped static KD-tree file.
///
/// The geometry (split values, strip counts, child offsets) is immutable
/// after build; erasures rewrite leaf records, child point counts and the
/// trailer in place. The mapping is exclusively owned; the underlying file
/// must not be touched by anyone else while the tree is open.
pub struct KdTreeExt {
    path: PathBuf,
    mmap: MmapMut,
    meta: KdTreeMeta,
}

impl KdTreeExt {
    /// Opens and maps a tree file, reading its trailer.
    pub fn open(path: &Path) -> crate::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        // Mapped writably for in-place erasure; the index owns the file
        // exclusively (see struct docs).
        #[expect(unsafe_code, reason = "see above")]
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let meta = KdTreeMeta::read_from_tail(&mmap)?;

        if FormatVersion::try_from(meta.format_version).is_err() {
            return Err(crate::Error::InvalidVersion(meta.format_version));
        }

        if meta.root_off < meta.points_off_end
            || (meta.root_off as usize) >= mmap.len().saturating_sub(TRAILER_SIZE)
        {
            return Err(crate::Error::Decode(DecodeError::InvalidTrailer(
                "root offset outside of node region",
            )));
        }

        log::trace!("opened tree file {path:?} with {} points", meta.num_points);

        Ok(Self {
            path: path.into(),
            mmap,
            meta,
        })
    }

    /// Returns the number of live points.
    #[must_use]
    pub fn num_points(&self) -> u64 {
        self.meta.num_points
    }

    /// Returns the trailer.
    #[must_use]
    pub fn meta(&self) -> &KdTreeMeta {
        &self.meta
    }

    fn read_node(&self, offset: u64) -> crate::Result<KdTreeIntraNode> {
        let Some(region) = self.mmap.get(offset as usize..) else {
            return Err(crate::Error::Decode(DecodeError::InvalidHeader(
                "node offset out of bounds",
            )));
        };

        let mut reader = region;
        Ok(KdTreeIntraNode::decode_from(&mut reader)?)
    }

    fn leaf_range(&self, offset: u64, num_points: u64) -> std::ops::Range<usize> {
        let start = offset as usize;
        let len = num_points as usize * usize::from(self.meta.point_size);
        start..start + len
    }

    /// Calls `visitor` for every point inside the window `[low, high]`.
    pub fn intersect<F: FnMut(&Point)>(
        &self,
        low: &Point,
        high: &Point,
        visitor: &mut F,
    ) -> crate::Result<()> {
        if self.meta.num_points == 0 {
            return Ok(());
        }
        self.intersect_node(self.meta.root_off, low, high, visitor)
    }

    fn intersect_node<F: FnMut(&Point)>(
        &self,
        offset: u64,
        low: &Point,
        high: &Point,
        visitor: &mut F,
    ) -> crate::Result<()> {
        let node = self.read_node(offset)?;

        let dim = node.split_dim as usize;
        let (first, last) = node.child_window(low.vals[dim], high.vals[dim]);

        for child in &node.children[first..last] {
            if child.num_points == 0 {
                continue;
            }

            if child.offset < self.meta.points_off_end {
                let leaf = &self.mmap[self.leaf_range(child.offset, child.num_points)];

                for record in leaf.chunks_exact(usize::from(self.meta.point_size)) {
                    let mut reader = record;
                    let point = Point::decode_from(
                        &mut reader,
                        self.meta.num_dims,
                        self.meta.bytes_per_dim,
                    )?;

                    if point.is_inside(low, high) {
                        visitor(&point);
                    }
                }
            } else {
                self.intersect_node(child.offset, low, high, visitor)?;
            }
        }

        Ok(())
    }

    /// Erases one occurrence of the point, rewriting ancestor point counts
    /// and the trailer in place. Returns `true` if it was found.
    pub fn erase(&mut self, point: &Point) -> crate::Result<bool> {
        if self.meta.num_points == 0 {
            return Ok(false);
        }

        let mut needle = Vec::with_capacity(usize::from(self.meta.point_size));
        point.encode_into(&mut needle, self.meta.bytes_per_dim)?;

        let found = self.erase_node(self.meta.root_off, &needle)?;

        if found {
            self.meta.num_points -= 1;
            let meta = self.meta;
            meta.write_to_tail(&mut self.mmap);

            log::trace!(
                "erased point from {:?}, {} points remain",
                self.path,
                self.meta.num_points
            );
        }

        Ok(found)
    }

    fn erase_node(&mut self, offset: u64, needle: &[u8]) -> crate::Result<bool> {
        let mut node = self.read_node(offset)?;
        let mut found = false;

        for child in &mut node.children {
            if child.num_points == 0 {
                continue;
            }

            found = if child.offset < self.meta.points_off_end {
                let range = self.leaf_range(child.offset, child.num_points);
                let mut leaf = PointArrayExt::new(
                    &mut self.mmap[range],
                    0,
                    self.meta.num_dims,
                    self.meta.bytes_per_dim,
                );
                leaf.erase_encoded(needle)
            } else {
                self.erase_node(child.offset, needle)?
            };

            if found {
                child.num_points -= 1;
                break;
            }
        }

        if found {
            // geometry is unchanged, so the node writes back at the same size
            let bytes = node.encode_into_vec();
            self.mmap[offset as usize..offset as usize + bytes.len()].copy_from_slice(&bytes);
        }

        Ok(found)
    }

    /// Appends every live point to `dst` in depth-first leaf order and
    /// returns how many were written.
    pub fn extract_into(&self, dst: &mut File) -> crate::Result<u64> {
        if self.meta.num_points == 0 {
            return Ok(0);
        }
        self.extract_node(self.meta.root_off, dst)
    }

    fn extract_node(&self, offset: u64, dst: &mut File) -> crate::Result<u64> {
        let node = self.read_node(offset)?;
        let mut count = 0;

        for child in &node.children {
            if child.num_points == 0 {
                continue;
            }

            if child.offset < self.meta.points_off_end {
                dst.write_all(&self.mmap[self.leaf_range(child.offset, child.num_points)])?;
                count += child.num_points;
            } else {
                count += self.extract_node(child.offset, dst)?;
            }
        }

        Ok(count)
    }

    /// Flushes outstanding writes of the mapping to disk.
    pub fn flush(&self) -> crate::Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Unmaps the tree and deletes its file.
    pub fn remove(self) -> crate::Result<()> {
        let path = self.path.clone();
        drop(self);

        log::trace!("removing tree file {path:?}");
        std::fs::remove_file(path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::encoded_point_size;
    use test_log::test;

    const NUM_DIMS: u8 = 3;
    const BYTES_PER_DIM: u8 = 4;
    const MAX_VAL: u64 = 1_000;

    fn rand_points(size: usize) -> Vec<Point> {
        use rand::Rng;

        let mut rng = rand::rng();

        (0..size)
            .map(|i| {
                let vals = (0..NUM_DIMS).map(|_| rng.random_range(0..MAX_VAL)).collect();
                Point::new(vals, i as u64)
            })
            .collect()
    }

    fn build_tree(path: &Path, points: &[Point]) -> crate::Result<KdTreeExt> {
        let geometry = KdTreeMeta {
            leaf_cap: 16,
            intra_cap: 4,
            num_dims: NUM_DIMS,
            bytes_per_dim: BYTES_PER_DIM,
            point_size: encoded_point_size(NUM_DIMS, BYTES_PER_DIM) as u8,
            format_version: FormatVersion::V1.into(),
            ..KdTreeMeta::default()
        };

        let mut buf = vec![];
        for point in points {
            point.encode_into(&mut buf, BYTES_PER_DIM)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&buf)?;

        builder::bulk_load(&mut file, points.len() as u64, &geometry)?;
        file.sync_all()?;
        drop(file);

        KdTreeExt::open(path)
    }

    fn collect(tree: &KdTreeExt, low: &Point, high: &Point) -> crate::Result<Vec<Point>> {
        let mut points = vec![];
        tree.intersect(low, high, &mut |point: &Point| points.push(point.clone()))?;
        Ok(points)
    }

    /// Walks every intra node, checking the structural invariants and that
    /// the child point counts add up.
    fn check_node(tree: &KdTreeExt, offset: u64) -> crate::Result<u64> {
        let node = tree.read_node(offset)?;

        assert!(!node.children.is_empty());
        assert_eq!(node.split_values.len() + 1, node.children.len());
        assert!(node.split_values.is_sorted());
        assert!(u64::from(node.split_dim) < u64::from(tree.meta.num_dims));
        assert!(
            node.children.windows(2).all(|w| w[0].offset < w[1].offset),
            "child offsets must be strictly increasing",
        );

        let mut count = 0;

        for child in &node.children {
            if child.offset < tree.meta.points_off_end {
                count += child.num_points;
            } else {
                assert!(child.offset < offset, "children are written before their parent");
                let subtree = check_node(tree, child.offset)?;
                assert_eq!(child.num_points, subtree);
                count += subtree;
            }
        }

        Ok(count)
    }

    #[test]
    fn kd_tree_structural_invariants() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let points = rand_points(1_000);

        let tree = build_tree(&dir.path().join("kd_0"), &points)?;

        assert_eq!(1_000, tree.num_points());
        assert!(tree.meta.root_off >= tree.meta.points_off_end);
        assert_eq!(1_000, check_node(&tree, tree.meta.root_off)?);

        Ok(())
    }

    #[test]
    fn kd_tree_intersect_some() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let points = rand_points(1_000);

        let tree = build_tree(&dir.path().join("kd_0"), &points)?;

        let target = &points[0];
        let found = collect(&tree, target, target)?;

        assert!(!found.is_empty());
        assert!(found.iter().any(|point| point == target));
        assert!(found.iter().all(|point| point.is_inside(target, target)));

        Ok(())
    }

    #[test]
    fn kd_tree_intersect_all() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let points = rand_points(1_000);

        let tree = build_tree(&dir.path().join("kd_0"), &points)?;

        let low = Point::new(vec![0; NUM_DIMS.into()], 0);
        let high = Point::new(vec![MAX_VAL; NUM_DIMS.into()], 0);

        assert_eq!(1_000, collect(&tree, &low, &high)?.len());

        Ok(())
    }

    #[test]
    fn kd_tree_erase() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let points = rand_points(1_000);

        let mut tree = build_tree(&dir.path().join("kd_0"), &points)?;

        let target = &points[13];
        assert!(tree.erase(target)?);
        assert_eq!(999, tree.num_points());

        assert!(!collect(&tree, target, target)?.iter().any(|p| p == target));

        // counts along the erased path were decremented
        assert_eq!(999, check_node(&tree, tree.meta.root_off)?);

        // a second erase of the same point finds nothing
        assert!(!tree.erase(target)?);
        assert_eq!(999, tree.num_points());

        Ok(())
    }

    #[test]
    fn kd_tree_erase_unknown_user_data() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let points = rand_points(100);

        let mut tree = build_tree(&dir.path().join("kd_0"), &points)?;

        let mut target = points[17].clone();
        target.user_data = 100;

        assert!(!tree.erase(&target)?);
        assert_eq!(100, tree.num_points());

        Ok(())
    }

    #[test]
    fn kd_tree_extract_preserves_points() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let points = rand_points(300);

        let tree = build_tree(&dir.path().join("kd_0"), &points)?;

        let out_path = dir.path().join("out");
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&out_path)?;

        assert_eq!(300, tree.extract_into(&mut out)?);

        let data = std::fs::read(&out_path)?;
        let mut seen = data
            .chunks_exact(usize::from(tree.meta.point_size))
            .map(|record| {
                let mut reader = record;
                Point::decode_from(&mut reader, NUM_DIMS, BYTES_PER_DIM).map(|p| p.user_data)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(crate::Error::Decode)?;
        seen.sort_unstable();

        assert_eq!((0..300).collect::<Vec<_>>(), seen);

        Ok(())
    }

    #[test]
    #[expect(clippy::unwrap_used)]
    fn kd_tree_open_rejects_unknown_version() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let points = rand_points(100);

        let path = dir.path().join("kd_0");
        build_tree(&path, &points)?;

        // corrupt the version byte at the very end of the file
        let mut data = std::fs::read(&path)?;
        *data.last_mut().unwrap() = 99;
        std::fs::write(&path, &data)?;

        assert!(matches!(
            KdTreeExt::open(&path),
            Err(crate::Error::InvalidVersion(99))
        ));

        Ok(())
    }
}
