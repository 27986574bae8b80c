// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Size in bytes of one encoded child reference.
pub const NODE_INFO_SIZE: usize = 16;

/// Reference to one child of an intra node.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KdTreeNodeInfo {
    /// Byte offset in the tree file; a leaf range if below `pointsOffEnd`,
    /// otherwise another intra node
    pub offset: u64,

    /// Number of live points of the subtree rooted at this child
    pub num_points: u64,
}

impl Encode for KdTreeNodeInfo {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.offset)?;
        writer.write_u64::<BigEndian>(self.num_points)?;
        Ok(())
    }
}

impl Decode for KdTreeNodeInfo {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let offset = reader.read_u64::<BigEndian>()?;
        let num_points = reader.read_u64::<BigEndian>()?;
        Ok(Self { offset, num_points })
    }
}

/// A persisted intra node: a split dimension, `numStrips - 1` non-decreasing
/// split values and `numStrips` child references with strictly increasing
/// offsets.
///
/// The geometry of a node never changes after build; erasures only rewrite
/// the child point counts, so nodes can be written back in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KdTreeIntraNode {
    /// Dimension the strips split on
    pub split_dim: u32,

    /// Upper bounds between adjacent strips
    pub split_values: Vec<u64>,

    /// Child references, one per strip
    pub children: Vec<KdTreeNodeInfo>,
}

impl KdTreeIntraNode {
    /// Returns the number of strips (children).
    #[must_use]
    pub fn num_strips(&self) -> usize {
        self.children.len()
    }

    /// Returns the encoded size of this node in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        2 * std::mem::size_of::<u32>()
            + self.split_values.len() * std::mem::size_of::<u64>()
            + self.children.len() * NODE_INFO_SIZE
    }

    /// Returns the `[begin, end)` child range whose strips can overlap the
    /// query window `[low, high]` on this node's split dimension.
    ///
    /// Strip `s` only holds values within `[values[s - 1], values[s]]`, so
    /// everything outside the returned range is pruned.
    #[must_use]
    pub fn child_window(&self, low: u64, high: u64) -> (usize, usize) {
        // first strip whose lower bound exceeds the window
        let last = self.split_values.partition_point(|&v| v <= high);

        // first strip whose upper bound reaches the window
        let begin = self.split_values[..last].partition_point(|&v| v < low);

        (begin, last + 1)
    }
}

impl Encode for KdTreeIntraNode {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        debug_assert_eq!(self.split_values.len() + 1, self.children.len());

        writer.write_u32::<BigEndian>(self.split_dim)?;

        #[expect(clippy::cast_possible_truncation, reason = "numStrips is bounded by intraCap (u16)")]
        writer.write_u32::<BigEndian>(self.children.len() as u32)?;

        for &value in &self.split_values {
            writer.write_u64::<BigEndian>(value)?;
        }

        for child in &self.children {
            child.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for KdTreeIntraNode {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let split_dim = reader.read_u32::<BigEndian>()?;
        let num_strips = reader.read_u32::<BigEndian>()?;

        if num_strips == 0 || num_strips > u32::from(u16::MAX) {
            return Err(DecodeError::InvalidHeader("KdTreeIntraNode"));
        }

        let num_strips = num_strips as usize;

        let mut split_values = Vec::with_capacity(num_strips - 1);
        for _ in 0..num_strips - 1 {
            split_values.push(reader.read_u64::<BigEndian>()?);
        }

        let mut children = Vec::with_capacity(num_strips);
        for _ in 0..num_strips {
            children.push(KdTreeNodeInfo::decode_from(reader)?);
        }

        Ok(Self {
            split_dim,
            split_values,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample_node() -> KdTreeIntraNode {
        KdTreeIntraNode {
            split_dim: 1,
            split_values: vec![10, 20, 30],
            children: vec![
                KdTreeNodeInfo { offset: 0, num_points: 50 },
                KdTreeNodeInfo { offset: 800, num_points: 50 },
                KdTreeNodeInfo { offset: 1_600, num_points: 50 },
                KdTreeNodeInfo { offset: 2_400, num_points: 49 },
            ],
        }
    }

    #[test]
    fn intra_node_roundtrip() -> crate::Result<()> {
        let before = sample_node();

        let buf = before.encode_into_vec();
        assert_eq!(before.encoded_size(), buf.len());

        let mut cursor = &buf[..];
        let after = KdTreeIntraNode::decode_from(&mut cursor)?;

        assert_eq!(before, after);

        Ok(())
    }

    #[test]
    #[expect(clippy::unwrap_used)]
    fn intra_node_rejects_zero_strips() {
        let mut buf = vec![];
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();

        let mut cursor = &buf[..];
        assert!(KdTreeIntraNode::decode_from(&mut cursor).is_err());
    }

    #[test]
    fn child_window_prunes_outside_strips() {
        let node = sample_node();

        // strip bounds: [min, 10], [10, 20], [20, 30], [30, max]
        assert_eq!((0, 1), node.child_window(0, 5));
        assert_eq!((3, 4), node.child_window(31, 99));
        assert_eq!((0, 4), node.child_window(0, 99));
        assert_eq!((1, 3), node.child_window(12, 25));
    }

    #[test]
    fn child_window_equal_keys_straddle() {
        let node = sample_node();

        // a query for exactly 20 must visit both adjacent strips
        assert_eq!((1, 3), node.child_window(20, 20));
        assert_eq!((0, 2), node.child_window(10, 15));
    }

    #[test]
    fn child_window_point_query() {
        let node = sample_node();

        assert_eq!((1, 2), node.child_window(15, 15));
        assert_eq!((3, 4), node.child_window(99, 99));
    }
}
