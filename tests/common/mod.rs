// not every test binary uses every helper
#![allow(dead_code)]

use bkd_tree::{BkdTree, Config, Point};
use std::path::Path;

pub const T0M_CAP: u64 = 1_000;
pub const TREES_CAP: u32 = 5;
pub const NUM_DIMS: u8 = 2;
pub const BYTES_PER_DIM: u8 = 4;
pub const MAX_VAL: u64 = 1_000;

/// Hard capacity of the standard test index, `t0mCap * 2^treesCap - 1`.
#[must_use]
pub fn bkd_cap() -> u64 {
    (T0M_CAP << TREES_CAP) - 1
}

#[must_use]
pub fn rand_points(size: usize) -> Vec<Point> {
    use rand::Rng;

    let mut rng = rand::rng();

    (0..size)
        .map(|i| {
            let vals = (0..NUM_DIMS)
                .map(|_| rng.random_range(0..MAX_VAL))
                .collect();
            Point::new(vals, i as u64)
        })
        .collect()
}

pub fn test_config(folder: &Path) -> Config {
    Config::new(folder, "bkd")
        .buffer_capacity(T0M_CAP)
        .capacity(bkd_cap())
        .dimensions(NUM_DIMS)
        .bytes_per_dim(BYTES_PER_DIM)
        .leaf_cap(50)
        .intra_cap(4)
}

/// Creates the standard test index and fills it to capacity.
pub fn prepare_tree(folder: &Path) -> bkd_tree::Result<(BkdTree, Vec<Point>)> {
    let mut tree = test_config(folder).create()?;

    let points = rand_points(bkd_cap() as usize);
    for point in &points {
        tree.insert(point)?;
    }

    Ok((tree, points))
}

/// Collects every point of the window `[low, high]`.
pub fn collect(tree: &BkdTree, low: &Point, high: &Point) -> bkd_tree::Result<Vec<Point>> {
    let mut points = vec![];
    tree.intersect(low, high, |point| points.push(point.clone()))?;
    Ok(points)
}
