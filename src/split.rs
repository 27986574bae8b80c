// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::point_array::PointArray;

/// Partitions `array` into `num_strips` strips along its active dimension.
///
/// Returns `num_strips - 1` non-decreasing split values and the strictly
/// increasing positions of the strip boundaries. After the call, every
/// point in strip `s` has a value within `[values[s - 1], values[s]]`
/// (extended to the domain bounds at the ends); equal keys may straddle
/// a boundary.
pub fn split_points<A: PointArray>(
    array: &mut A,
    num_strips: usize,
) -> (Vec<u64>, Vec<usize>) {
    let mut split_values = Vec::new();
    let mut split_positions = Vec::new();

    split_range(
        array,
        0,
        array.len(),
        num_strips,
        &mut split_values,
        &mut split_positions,
    );

    (split_values, split_positions)
}

fn split_range<A: PointArray>(
    array: &mut A,
    begin: usize,
    end: usize,
    num_strips: usize,
    split_values: &mut Vec<u64>,
    split_positions: &mut Vec<usize>,
) {
    if num_strips <= 1 {
        return;
    }

    let mid = begin + (end - begin) / 2;
    select_nth(array, begin, end, mid);
    let split_value = array.value_at(mid);

    let left_strips = num_strips.div_ceil(2);

    // in-order recursion keeps values sorted and positions increasing
    split_range(array, begin, mid, left_strips, split_values, split_positions);

    split_values.push(split_value);
    split_positions.push(mid);

    split_range(
        array,
        mid,
        end,
        num_strips - left_strips,
        split_values,
        split_positions,
    );
}

/// Partially sorts `[begin, end)` so the element at `nth` is the one that
/// would be there after a full sort along the active dimension.
///
/// Quickselect with a median-of-three pivot and a three-way partition, so
/// runs of equal keys collapse into a single partition step.
pub(crate) fn select_nth<A: PointArray>(
    array: &mut A,
    mut begin: usize,
    mut end: usize,
    nth: usize,
) {
    debug_assert!(begin <= nth && nth < end);

    while end - begin > 1 {
        let pivot = median_of_three(array, begin, begin + (end - begin) / 2, end - 1);
        array.swap(begin, pivot);

        // Dutch national flag around the pivot value now at `begin`:
        // [begin, lt) < pivot, [lt, i) == pivot, [gt, end) > pivot
        let mut lt = begin;
        let mut i = begin + 1;
        let mut gt = end;

        while i < gt {
            if array.less(i, lt) {
                array.swap(i, lt);
                lt += 1;
                i += 1;
            } else if array.less(lt, i) {
                gt -= 1;
                array.swap(i, gt);
            } else {
                i += 1;
            }
        }

        if nth < lt {
            end = lt;
        } else if nth >= gt {
            begin = gt;
        } else {
            // nth falls into the equal run
            return;
        }
    }
}

fn median_of_three<A: PointArray>(array: &A, a: usize, b: usize, c: usize) -> usize {
    let (lo, hi) = if array.less(a, b) { (a, b) } else { (b, a) };

    if array.less(c, lo) {
        lo
    } else if array.less(hi, c) {
        hi
    } else {
        c
    }
}
