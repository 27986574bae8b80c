// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A K.I.S.S. implementation of block KD-trees (BKD-trees).
//!
//! ##### About
//!
//! This crate exports a [`BkdTree`], a write-optimized, disk-resident index
//! over k-dimensional unsigned integer points, each carrying an opaque
//! 64-bit identifier. It supports point insertion, point deletion and
//! orthogonal range ("window") search.
//!
//! The index is a forest of immutable, memory-mapped static KD-trees plus a
//! small mmapped write buffer, organized by the logarithmic method: slot `k`
//! of the forest holds `t0mCap * 2^k` points when full. Inserts go to the
//! buffer; when it fills up, the buffered points and the lowest slots are
//! bulk-loaded into a fresh tree file, committed with an atomic rename, so
//! a crash can never corrupt the forest (O(log n) amortized write cost).
//!
//! Deletes remove the physical record in place and decrement the ancestor
//! point counts. There are no tombstones; tree geometry never changes
//! after a build.
//!
//! # Example usage
//!
//! ```
//! use bkd_tree::{Config, Point};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! // One index is a (directory, prefix) pair of files
//! let mut tree = Config::new(&folder, "demo")
//!     .dimensions(2)
//!     .bytes_per_dim(4)
//!     .buffer_capacity(1_000)
//!     .capacity(32_000)
//!     .create()?;
//!
//! tree.insert(&Point::new(vec![15, 35], /* user data */ 1))?;
//! tree.insert(&Point::new(vec![20, 40], 2))?;
//! tree.insert(&Point::new(vec![90, 10], 3))?;
//!
//! // Window search over [10, 50] x [30, 50]
//! let mut hits = vec![];
//! tree.intersect(
//!     &Point::new(vec![10, 30], 0),
//!     &Point::new(vec![50, 50], 0),
//!     |point| hits.push(point.clone()),
//! )?;
//! assert_eq!(2, hits.len());
//!
//! // Deletion needs the exact point, user data included
//! assert!(tree.erase(&Point::new(vec![20, 40], 2))?);
//! assert_eq!(2, tree.num_points());
//! #
//! # Ok::<(), bkd_tree::Error>(())
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod buffer;
mod coding;
mod config;
mod error;
mod file;
mod format_version;
mod kd_tree;
mod meta;
mod node;
mod point;
mod point_array;
mod split;
mod tree;

pub use {
    coding::{DecodeError, EncodeError},
    config::Config,
    error::{Error, Result},
    format_version::FormatVersion,
    point::Point,
    tree::BkdTree,
};
