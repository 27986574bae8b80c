// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::Encode;
use crate::meta::KdTreeMeta;
use crate::node::{KdTreeIntraNode, KdTreeNodeInfo};
use crate::point_array::PointArrayExt;
use crate::split::split_points;
use memmap2::MmapOptions;
use std::fs::File;
use std::io::Write;

/// Bulk-builds a static KD-tree over a file whose first
/// `num_points * pointSize` bytes hold encoded points in arbitrary order.
///
/// The point region is sorted in place through a writable mapping; intra
/// nodes are appended after it depth-first, children before their parent,
/// the root last, followed by the meta trailer. The file cursor must sit at
/// the end of the point region. Returns the written trailer.
///
/// On error the file is left behind as-is; the caller owns cleanup (the
/// temp-file-then-rename commit makes a partial build invisible).
pub fn bulk_load(file: &mut File, num_points: u64, geometry: &KdTreeMeta) -> crate::Result<KdTreeMeta> {
    debug_assert!(num_points > 0);

    let point_size = usize::from(geometry.point_size);

    #[expect(clippy::cast_possible_truncation, reason = "the point region is mapped in full")]
    let points_off_end = num_points as usize * point_size;

    log::trace!("bulk building tree over {num_points} points");

    // The file is private to this build; nothing else maps or writes it.
    #[expect(unsafe_code, reason = "see above")]
    let mut points = unsafe { MmapOptions::new().len(points_off_end).map_mut(&*file)? };

    let mut next_off = points_off_end as u64;
    let root_off = build_node(
        &mut points,
        file,
        &mut next_off,
        0,
        num_points as usize,
        0,
        geometry,
    )?;

    points.flush()?;
    drop(points);

    let meta = KdTreeMeta {
        points_off_end: points_off_end as u64,
        root_off,
        num_points,
        ..*geometry
    };
    file.write_all(&meta.encode_into_vec())?;

    Ok(meta)
}

/// Builds the subtree over points `[begin, end)` at tree depth `depth` and
/// returns the offset of its intra node.
fn build_node(
    points: &mut [u8],
    file: &mut File,
    next_off: &mut u64,
    begin: usize,
    end: usize,
    depth: usize,
    geometry: &KdTreeMeta,
) -> crate::Result<u64> {
    debug_assert!(begin < end);

    let point_size = usize::from(geometry.point_size);
    let leaf_cap = usize::from(geometry.leaf_cap);

    let split_dim = depth % usize::from(geometry.num_dims);
    let num_strips = (end - begin)
        .div_ceil(leaf_cap)
        .min(usize::from(geometry.intra_cap));

    let (split_values, split_positions) = {
        let region = &mut points[begin * point_size..end * point_size];
        let mut view = PointArrayExt::new(
            region,
            split_dim,
            geometry.num_dims,
            geometry.bytes_per_dim,
        );

        let (values, positions) = split_points(&mut view, num_strips);
        let positions = positions.into_iter().map(|pos| pos + begin).collect::<Vec<_>>();

        (values, positions)
    };

    let mut children = Vec::with_capacity(num_strips);

    for strip in 0..num_strips {
        let pos_begin = if strip == 0 {
            begin
        } else {
            split_positions[strip - 1]
        };
        let pos_end = if strip == num_strips - 1 {
            end
        } else {
            split_positions[strip]
        };

        if pos_end - pos_begin <= leaf_cap {
            children.push(KdTreeNodeInfo {
                offset: (pos_begin * point_size) as u64,
                num_points: (pos_end - pos_begin) as u64,
            });
        } else {
            let child_off = build_node(points, file, next_off, pos_begin, pos_end, depth + 1, geometry)?;
            children.push(KdTreeNodeInfo {
                offset: child_off,
                num_points: (pos_end - pos_begin) as u64,
            });
        }
    }

    #[expect(clippy::cast_possible_truncation, reason = "split_dim < num_dims (u8)")]
    let node = KdTreeIntraNode {
        split_dim: split_dim as u32,
        split_values,
        children,
    };

    let offset = *next_off;
    file.write_all(&node.encode_into_vec())?;
    *next_off += node.encoded_size() as u64;

    Ok(offset)
}
