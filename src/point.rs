// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Size in bytes of the opaque user data trailing every encoded point.
pub const USER_DATA_SIZE: usize = std::mem::size_of::<u64>();

/// A k-dimensional point carrying an opaque 64-bit identifier.
///
/// Each coordinate is an unsigned integer; on disk it is stored as a
/// fixed-width big-endian integer of 1, 2, 4 or 8 bytes, followed by the
/// 8-byte user data. Two points are equal iff all coordinates and the
/// user data are equal; the user data acts as the tiebreaker between
/// points sharing the same coordinates.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Point {
    /// Coordinate values, one per dimension
    pub vals: Vec<u64>,

    /// Opaque identifier (e.g. a document ID)
    pub user_data: u64,
}

impl Point {
    /// Creates a new point.
    #[must_use]
    pub fn new(vals: Vec<u64>, user_data: u64) -> Self {
        Self { vals, user_data }
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn num_dims(&self) -> usize {
        self.vals.len()
    }

    /// Returns `true` if the point lies inside the inclusive box `[low, high]`.
    ///
    /// An inverted range (some `low.vals[dim] > high.vals[dim]`) contains nothing.
    #[must_use]
    pub fn is_inside(&self, low: &Self, high: &Self) -> bool {
        debug_assert_eq!(self.vals.len(), low.vals.len());
        debug_assert_eq!(self.vals.len(), high.vals.len());

        self.vals
            .iter()
            .zip(low.vals.iter().zip(high.vals.iter()))
            .all(|(&val, (&lo, &hi))| lo <= val && val <= hi)
    }

    /// Returns `true` if every coordinate fits into `bytes_per_dim` bytes.
    #[must_use]
    pub fn fits(&self, bytes_per_dim: u8) -> bool {
        if usize::from(bytes_per_dim) == USER_DATA_SIZE {
            return true;
        }

        let max = (1u64 << (u32::from(bytes_per_dim) * 8)) - 1;
        self.vals.iter().all(|&val| val <= max)
    }

    /// Serializes the point using `bytes_per_dim` bytes per coordinate.
    pub fn encode_into<W: Write>(
        &self,
        writer: &mut W,
        bytes_per_dim: u8,
    ) -> Result<(), crate::coding::EncodeError> {
        for &val in &self.vals {
            writer.write_uint::<BigEndian>(val, bytes_per_dim.into())?;
        }
        writer.write_u64::<BigEndian>(self.user_data)?;
        Ok(())
    }

    /// Deserializes a point of `num_dims` dimensions.
    pub fn decode_from<R: Read>(
        reader: &mut R,
        num_dims: u8,
        bytes_per_dim: u8,
    ) -> Result<Self, crate::coding::DecodeError> {
        let mut vals = Vec::with_capacity(num_dims.into());

        for _ in 0..num_dims {
            vals.push(reader.read_uint::<BigEndian>(bytes_per_dim.into())?);
        }
        let user_data = reader.read_u64::<BigEndian>()?;

        Ok(Self { vals, user_data })
    }
}

/// Returns the encoded size of a point, `numDims * bytesPerDim + 8`.
#[must_use]
pub fn encoded_point_size(num_dims: u8, bytes_per_dim: u8) -> usize {
    usize::from(num_dims) * usize::from(bytes_per_dim) + USER_DATA_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn point_roundtrip() -> crate::Result<()> {
        for bytes_per_dim in [1u8, 2, 4, 8] {
            let max = if bytes_per_dim == 8 {
                u64::MAX
            } else {
                (1u64 << (u32::from(bytes_per_dim) * 8)) - 1
            };

            let before = Point::new(vec![0, 1, max / 2, max], 12_345_678);

            let mut buf = vec![];
            before.encode_into(&mut buf, bytes_per_dim)?;
            assert_eq!(encoded_point_size(4, bytes_per_dim), buf.len());

            let mut cursor = std::io::Cursor::new(buf);
            let after = Point::decode_from(&mut cursor, 4, bytes_per_dim)?;

            assert_eq!(before, after);
        }

        Ok(())
    }

    #[test]
    fn point_encoding_is_big_endian() -> crate::Result<()> {
        let point = Point::new(vec![0x0102_0304], 0x0A0B_0C0D_0E0F_1011);

        let mut buf = vec![];
        point.encode_into(&mut buf, 4)?;

        assert_eq!(
            &[
                0x01, 0x02, 0x03, 0x04, // dim 0
                0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, // user data
            ],
            &*buf,
        );

        Ok(())
    }

    #[test]
    fn point_inside() {
        let low = Point::new(vec![30, 80, 40], 0);
        let high = Point::new(vec![50, 90, 50], 0);

        assert!(Point::new(vec![30, 80, 40], 0).is_inside(&low, &high));
        assert!(Point::new(vec![50, 90, 50], 0).is_inside(&low, &high));
        assert!(Point::new(vec![40, 85, 45], 0).is_inside(&low, &high));
        assert!(!Point::new(vec![30, 79, 40], 0).is_inside(&low, &high));
        assert!(!Point::new(vec![51, 80, 40], 0).is_inside(&low, &high));
    }

    #[test]
    fn point_inside_inverted_range() {
        // [40, 39] is empty on the last dimension
        let low = Point::new(vec![30, 80, 40], 0);
        let high = Point::new(vec![50, 90, 39], 0);

        assert!(!Point::new(vec![30, 80, 40], 0).is_inside(&low, &high));
    }

    #[test]
    fn point_fits() {
        assert!(Point::new(vec![255], 0).fits(1));
        assert!(!Point::new(vec![256], 0).fits(1));
        assert!(Point::new(vec![65_535], 0).fits(2));
        assert!(!Point::new(vec![65_536], 0).fits(2));
        assert!(Point::new(vec![u64::MAX], 0).fits(8));
    }

    #[test]
    fn point_identity_uses_user_data() {
        let a = Point::new(vec![1, 2], 7);
        let b = Point::new(vec![1, 2], 8);

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
