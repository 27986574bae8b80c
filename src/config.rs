// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::point::encoded_point_size;
use crate::BkdTree;
use std::path::{Path, PathBuf};

/// Index configuration builder.
///
/// The geometry set here is baked into the file trailers on `create()`;
/// reopening an index derives it from disk again, so the builder is only
/// needed for fresh indexes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Directory holding the buffer and slot files
    pub(crate) dir: PathBuf,

    /// File name prefix distinguishing this index inside `dir`
    pub(crate) prefix: String,

    /// Capacity of the write buffer in points (t0mCap)
    pub(crate) t0m_cap: u64,

    /// Hard point capacity of the whole index (bkdCap)
    pub(crate) bkd_cap: u64,

    /// Number of dimensions per point
    pub(crate) num_dims: u8,

    /// Bytes per encoded coordinate (1, 2, 4 or 8)
    pub(crate) bytes_per_dim: u8,

    /// Max number of points per leaf
    pub(crate) leaf_cap: u16,

    /// Max number of children per intra node
    pub(crate) intra_cap: u16,
}

impl Config {
    /// Initializes a new configuration for an index under `dir`, with file
    /// names starting with `prefix`.
    pub fn new<P: AsRef<Path>>(dir: P, prefix: &str) -> Self {
        Self {
            dir: dir.as_ref().into(),
            prefix: prefix.into(),
            t0m_cap: 1_000,
            bkd_cap: 1_000 << 10,
            num_dims: 2,
            bytes_per_dim: 8,
            leaf_cap: 128,
            intra_cap: 64,
        }
    }

    /// Sets the write buffer capacity in points (t0mCap).
    ///
    /// Slot `k` of the forest then holds `t0mCap * 2^k` points when full.
    #[must_use]
    pub fn buffer_capacity(mut self, count: u64) -> Self {
        self.t0m_cap = count;
        self
    }

    /// Sets the hard point capacity of the index (bkdCap).
    #[must_use]
    pub fn capacity(mut self, count: u64) -> Self {
        self.bkd_cap = count;
        self
    }

    /// Sets the number of dimensions per point.
    #[must_use]
    pub fn dimensions(mut self, count: u8) -> Self {
        self.num_dims = count;
        self
    }

    /// Sets how many bytes each coordinate is encoded into (1, 2, 4 or 8).
    #[must_use]
    pub fn bytes_per_dim(mut self, count: u8) -> Self {
        self.bytes_per_dim = count;
        self
    }

    /// Sets the max number of points per leaf.
    #[must_use]
    pub fn leaf_cap(mut self, count: u16) -> Self {
        self.leaf_cap = count;
        self
    }

    /// Sets the max number of children per intra node.
    #[must_use]
    pub fn intra_cap(mut self, count: u16) -> Self {
        self.intra_cap = count;
        self
    }

    /// Returns the encoded size of one point.
    #[must_use]
    pub fn point_size(&self) -> usize {
        encoded_point_size(self.num_dims, self.bytes_per_dim)
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        use crate::Error::InvalidParameter;

        if self.prefix.is_empty() {
            return Err(InvalidParameter("prefix must not be empty"));
        }

        if self.t0m_cap == 0 {
            return Err(InvalidParameter("buffer capacity must be greater than 0"));
        }

        if self.bkd_cap < self.t0m_cap {
            return Err(InvalidParameter(
                "capacity must be at least the buffer capacity",
            ));
        }

        if self.num_dims == 0 {
            return Err(InvalidParameter("dimensions must be greater than 0"));
        }

        if !matches!(self.bytes_per_dim, 1 | 2 | 4 | 8) {
            return Err(InvalidParameter("bytes_per_dim must be 1, 2, 4 or 8"));
        }

        if self.leaf_cap == 0 {
            return Err(InvalidParameter("leaf_cap must be greater than 0"));
        }

        if self.intra_cap <= 2 {
            return Err(InvalidParameter("intra_cap must be greater than 2"));
        }

        Ok(())
    }

    /// Creates a fresh index with this configuration, removing stale files
    /// of the same prefix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if validation fails, otherwise any I/O
    /// error while setting up the directory and buffer file.
    pub fn create(self) -> crate::Result<BkdTree> {
        BkdTree::create_new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn valid_config(dir: &Path) -> Config {
        Config::new(dir, "bkd")
            .buffer_capacity(100)
            .capacity(3_200)
            .dimensions(2)
            .bytes_per_dim(4)
            .leaf_cap(10)
            .intra_cap(4)
    }

    #[test]
    fn config_validate_ok() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        valid_config(dir.path()).validate()
    }

    #[test]
    fn config_validate_rejects_bad_parameters() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        for config in [
            valid_config(dir.path()).buffer_capacity(0),
            valid_config(dir.path()).capacity(99),
            valid_config(dir.path()).dimensions(0),
            valid_config(dir.path()).bytes_per_dim(3),
            valid_config(dir.path()).leaf_cap(0),
            valid_config(dir.path()).intra_cap(2),
            Config::new(dir.path(), ""),
        ] {
            assert!(matches!(
                config.validate(),
                Err(crate::Error::InvalidParameter(_))
            ));
        }

        Ok(())
    }

    #[test]
    fn config_point_size() {
        let config = Config::new("/tmp", "bkd").dimensions(3).bytes_per_dim(4);
        assert_eq!(20, config.point_size());
    }
}
