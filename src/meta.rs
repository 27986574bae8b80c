// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::point::encoded_point_size;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Size in bytes of the fixed meta trailer.
pub const TRAILER_SIZE: usize = 32;

/// The self-describing trailer stored in the last bytes of every tree file
/// and of the write buffer file.
///
/// ----------------------
/// |   encoded points   | <- implicitly start at 0
/// |--------------------|
/// |    intra nodes     | <- absent in the buffer file (rootOff = 0)
/// |--------------------|
/// |      trailer       | <- fixed size
/// |--------------------|
///
/// It carries everything needed to reopen the file without external
/// metadata. All fields are big-endian; the last byte is the format
/// version.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KdTreeMeta {
    /// End of the encoded point region; child offsets below this point at
    /// leaf ranges, offsets at or above it at intra nodes
    pub points_off_end: u64,

    /// Offset of the root intra node; 0 in the buffer file
    pub root_off: u64,

    /// Number of live points
    pub num_points: u64,

    /// Max number of points per leaf
    pub leaf_cap: u16,

    /// Max number of children per intra node
    pub intra_cap: u16,

    /// Number of dimensions
    pub num_dims: u8,

    /// Bytes per encoded coordinate (1, 2, 4 or 8)
    pub bytes_per_dim: u8,

    /// Size of one encoded point, `numDims * bytesPerDim + 8`
    pub point_size: u8,

    /// Disk format version
    pub format_version: u8,
}

impl KdTreeMeta {
    /// Reads the trailer off the end of a fully mapped file.
    pub fn read_from_tail(data: &[u8]) -> Result<Self, DecodeError> {
        let Some(tail) = data.len().checked_sub(TRAILER_SIZE) else {
            return Err(DecodeError::InvalidTrailer("file shorter than trailer"));
        };

        let mut reader = &data[tail..];
        let meta = Self::decode_from(&mut reader)?;
        meta.check()?;

        Ok(meta)
    }

    /// Writes the trailer into the last bytes of a fully mapped file.
    pub fn write_to_tail(&self, data: &mut [u8]) {
        debug_assert!(data.len() >= TRAILER_SIZE);

        let tail = data.len() - TRAILER_SIZE;
        data[tail..].copy_from_slice(&self.encode_into_vec());
    }

    /// Validates the internal consistency of the trailer fields.
    fn check(&self) -> Result<(), DecodeError> {
        if !matches!(self.bytes_per_dim, 1 | 2 | 4 | 8) {
            return Err(DecodeError::InvalidTrailer("unsupported bytes_per_dim"));
        }

        if self.num_dims == 0 {
            return Err(DecodeError::InvalidTrailer("zero dimensions"));
        }

        if usize::from(self.point_size) != encoded_point_size(self.num_dims, self.bytes_per_dim) {
            return Err(DecodeError::InvalidTrailer("point size mismatch"));
        }

        if self.leaf_cap == 0 {
            return Err(DecodeError::InvalidTrailer("zero leaf_cap"));
        }

        if self.points_off_end % u64::from(self.point_size) != 0 {
            return Err(DecodeError::InvalidTrailer("misaligned point region"));
        }

        let live_bytes = self
            .num_points
            .checked_mul(u64::from(self.point_size))
            .ok_or(DecodeError::InvalidTrailer("point count overflow"))?;

        if live_bytes > self.points_off_end {
            return Err(DecodeError::InvalidTrailer("point count exceeds point region"));
        }

        Ok(())
    }
}

impl Encode for KdTreeMeta {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.points_off_end)?;
        writer.write_u64::<BigEndian>(self.root_off)?;
        writer.write_u64::<BigEndian>(self.num_points)?;

        writer.write_u16::<BigEndian>(self.leaf_cap)?;
        writer.write_u16::<BigEndian>(self.intra_cap)?;

        writer.write_u8(self.num_dims)?;
        writer.write_u8(self.bytes_per_dim)?;
        writer.write_u8(self.point_size)?;
        writer.write_u8(self.format_version)?;

        Ok(())
    }
}

impl Decode for KdTreeMeta {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let points_off_end = reader.read_u64::<BigEndian>()?;
        let root_off = reader.read_u64::<BigEndian>()?;
        let num_points = reader.read_u64::<BigEndian>()?;

        let leaf_cap = reader.read_u16::<BigEndian>()?;
        let intra_cap = reader.read_u16::<BigEndian>()?;

        let num_dims = reader.read_u8()?;
        let bytes_per_dim = reader.read_u8()?;
        let point_size = reader.read_u8()?;
        let format_version = reader.read_u8()?;

        Ok(Self {
            points_off_end,
            root_off,
            num_points,
            leaf_cap,
            intra_cap,
            num_dims,
            bytes_per_dim,
            point_size,
            format_version,
        })
    }
}
