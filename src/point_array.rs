// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::point::{encoded_point_size, Point};
use byteorder::{BigEndian, ByteOrder};

/// Random-access view over a set of points, sortable along one dimension.
///
/// This is the capability set the median splitter works against, so the
/// same machinery runs over an in-memory vector ([`PointArrayMem`]) and a
/// file-backed region ([`PointArrayExt`]). One of the two concrete
/// variants is picked at the call site; there is no boxed dispatch.
pub trait PointArray {
    /// Number of live points in the array.
    fn len(&self) -> usize;

    /// Returns `true` if the array holds no points.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swaps the points at `i` and `j`.
    fn swap(&mut self, i: usize, j: usize);

    /// Compares the points at `i` and `j` along the active dimension.
    fn less(&self, i: usize, j: usize) -> bool;

    /// Returns the value of the point at `i` on the active dimension.
    fn value_at(&self, i: usize) -> u64;

    /// Decodes the point at `i`.
    fn point_at(&self, i: usize) -> Point;

    /// Removes one occurrence of `point`, if present.
    fn erase(&mut self, point: &Point) -> bool;
}

/// In-memory point array; erasure preserves ordering.
pub struct PointArrayMem {
    points: Vec<Point>,
    by_dim: usize,
}

impl PointArrayMem {
    /// Creates a point array sorting along `by_dim`.
    #[must_use]
    pub fn new(points: Vec<Point>, by_dim: usize) -> Self {
        Self { points, by_dim }
    }
}

impl PointArray for PointArrayMem {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.points.swap(i, j);
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.points[i].vals[self.by_dim] < self.points[j].vals[self.by_dim]
    }

    fn value_at(&self, i: usize) -> u64 {
        self.points[i].vals[self.by_dim]
    }

    fn point_at(&self, i: usize) -> Point {
        self.points[i].clone()
    }

    fn erase(&mut self, point: &Point) -> bool {
        let Some(idx) = self.points.iter().position(|p| p == point) else {
            return false;
        };
        self.points.remove(idx);
        true
    }
}

/// Point array over a file-backed region of encoded points.
///
/// `less` compares the raw big-endian coordinate bytes lexicographically,
/// which matches the numeric order of the unsigned values, so sorting
/// never has to decode a point.
pub struct PointArrayExt<'a> {
    data: &'a mut [u8],
    num_points: usize,
    by_dim: usize,
    num_dims: u8,
    bytes_per_dim: u8,
    point_size: usize,
}

impl<'a> PointArrayExt<'a> {
    /// Creates a view over `data`, which must hold whole encoded points.
    #[must_use]
    pub fn new(data: &'a mut [u8], by_dim: usize, num_dims: u8, bytes_per_dim: u8) -> Self {
        let point_size = encoded_point_size(num_dims, bytes_per_dim);
        debug_assert_eq!(0, data.len() % point_size);

        let num_points = data.len() / point_size;

        Self {
            data,
            num_points,
            by_dim,
            num_dims,
            bytes_per_dim,
            point_size,
        }
    }

    fn dim_bytes(&self, i: usize) -> &[u8] {
        let start = i * self.point_size + self.by_dim * usize::from(self.bytes_per_dim);
        &self.data[start..start + usize::from(self.bytes_per_dim)]
    }

    fn record_bytes(&self, i: usize) -> &[u8] {
        let start = i * self.point_size;
        &self.data[start..start + self.point_size]
    }

    /// Removes one record equal to the encoded needle by overwriting it
    /// with the last live record (order-destroying).
    pub fn erase_encoded(&mut self, needle: &[u8]) -> bool {
        debug_assert_eq!(self.point_size, needle.len());

        let Some(idx) = (0..self.num_points).find(|&i| self.record_bytes(i) == needle) else {
            return false;
        };

        let last = self.num_points - 1;
        if idx < last {
            self.data
                .copy_within(last * self.point_size..(last + 1) * self.point_size, idx * self.point_size);
        }
        self.num_points = last;

        true
    }
}

impl PointArray for PointArrayExt<'_> {
    fn len(&self) -> usize {
        self.num_points
    }

    fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }

        let a = i * self.point_size;
        let b = j * self.point_size;

        for off in 0..self.point_size {
            self.data.swap(a + off, b + off);
        }
    }

    fn less(&self, i: usize, j: usize) -> bool {
        // big-endian unsigned values order like their bytes
        self.dim_bytes(i) < self.dim_bytes(j)
    }

    fn value_at(&self, i: usize) -> u64 {
        BigEndian::read_uint(self.dim_bytes(i), self.bytes_per_dim.into())
    }

    fn point_at(&self, i: usize) -> Point {
        let mut reader = self.record_bytes(i);

        #[expect(
            clippy::expect_used,
            reason = "the slice is exactly one encoded point"
        )]
        Point::decode_from(&mut reader, self.num_dims, self.bytes_per_dim)
            .expect("encoded point should decode")
    }

    fn erase(&mut self, point: &Point) -> bool {
        let mut needle = Vec::with_capacity(self.point_size);

        #[expect(clippy::expect_used, reason = "writing into a Vec cannot fail")]
        point
            .encode_into(&mut needle, self.bytes_per_dim)
            .expect("cannot fail");

        self.erase_encoded(&needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample_points() -> Vec<Point> {
        vec![
            Point::new(vec![5, 50], 0),
            Point::new(vec![3, 30], 1),
            Point::new(vec![9, 90], 2),
            Point::new(vec![3, 35], 3),
        ]
    }

    #[expect(clippy::unwrap_used)]
    fn encode_all(points: &[Point], bytes_per_dim: u8) -> Vec<u8> {
        let mut buf = vec![];
        for point in points {
            point.encode_into(&mut buf, bytes_per_dim).unwrap();
        }
        buf
    }

    #[test]
    fn mem_and_ext_agree() {
        let points = sample_points();
        let mut buf = encode_all(&points, 4);

        for by_dim in 0..2 {
            let mem = PointArrayMem::new(points.clone(), by_dim);
            let ext = PointArrayExt::new(&mut buf, by_dim, 2, 4);

            assert_eq!(mem.len(), ext.len());

            for i in 0..mem.len() {
                assert_eq!(mem.value_at(i), ext.value_at(i));
                assert_eq!(mem.point_at(i), ext.point_at(i));

                for j in 0..mem.len() {
                    assert_eq!(mem.less(i, j), ext.less(i, j));
                }
            }
        }
    }

    #[test]
    fn ext_swap() {
        let points = sample_points();
        let mut buf = encode_all(&points, 4);

        let mut ext = PointArrayExt::new(&mut buf, 0, 2, 4);
        ext.swap(0, 2);
        ext.swap(1, 1);

        assert_eq!(points[2], ext.point_at(0));
        assert_eq!(points[1], ext.point_at(1));
        assert_eq!(points[0], ext.point_at(2));
    }

    #[test]
    fn mem_erase_preserves_order() {
        let points = sample_points();
        let mut mem = PointArrayMem::new(points.clone(), 0);

        assert!(mem.erase(&points[1]));
        assert_eq!(3, mem.len());
        assert_eq!(points[0], mem.point_at(0));
        assert_eq!(points[2], mem.point_at(1));
        assert_eq!(points[3], mem.point_at(2));

        // user data distinguishes points with equal coordinates
        assert!(!mem.erase(&Point::new(vec![3, 35], 99)));
        assert_eq!(3, mem.len());
    }

    #[test]
    fn ext_erase_moves_last_record_into_hole() {
        let points = sample_points();
        let mut buf = encode_all(&points, 4);

        let mut ext = PointArrayExt::new(&mut buf, 0, 2, 4);

        assert!(ext.erase(&points[1]));
        assert_eq!(3, ext.len());
        assert_eq!(points[0], ext.point_at(0));
        assert_eq!(points[3], ext.point_at(1));
        assert_eq!(points[2], ext.point_at(2));

        assert!(!ext.erase(&points[1]));
        assert_eq!(3, ext.len());
    }

    #[test]
    fn ext_erase_last_record() {
        let points = sample_points();
        let mut buf = encode_all(&points, 4);

        let mut ext = PointArrayExt::new(&mut buf, 0, 2, 4);

        assert!(ext.erase(&points[3]));
        assert_eq!(3, ext.len());
        assert_eq!(points[0], ext.point_at(0));
        assert_eq!(points[1], ext.point_at(1));
        assert_eq!(points[2], ext.point_at(2));
    }
}
