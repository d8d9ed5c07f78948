//! Free-space tracking and placement for new file data.
//!
//! The allocator is greedy: new files are placed largest first, each into
//! the smallest free gap that still fits it, falling back to end-of-data
//! when no gap does. Tight packing is preferred over fragmentation, and the
//! image only grows when it has to. All placements are 4-byte aligned.

use super::layout::align4;

/// A free byte range between placed file data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// First free byte, 4-byte aligned.
    pub start: u64,
    /// Length in bytes.
    pub len: u64,
}

/// Computes the free gaps between `data_start` and the occupied ranges in
/// `old_files` (`(start, size)` pairs, any order). Gaps are returned in
/// ascending start order with aligned starts.
pub fn free_gaps(data_start: u64, old_files: &[(u64, u64)]) -> Vec<Gap> {
    let mut occupied: Vec<(u64, u64)> = old_files.to_vec();
    occupied.sort_by_key(|&(start, _)| start);
    let mut gaps = Vec::new();
    let mut cur = data_start;
    for &(start, size) in &occupied {
        let aligned = align4(cur);
        if start > aligned {
            gaps.push(Gap {
                start: aligned,
                len: start - aligned,
            });
        }
        cur = cur.max(start + size);
    }
    gaps
}

/// Where one new file was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Index of the file in the caller's new-file list.
    pub item: usize,
    /// Allocated start offset.
    pub start: u64,
}

/// Places new files (`(caller_index, size)` pairs) into the free space left
/// by `old_files` after `data_start`. Returns the placements and the
/// end-of-data offset after all placements.
pub fn allocate(
    data_start: u64,
    old_files: &[(u64, u64)],
    new_files: &[(usize, u64)],
) -> (Vec<Placement>, u64) {
    let mut gaps = free_gaps(data_start, old_files);
    let mut end = old_files
        .iter()
        .map(|&(start, size)| start + size)
        .max()
        .unwrap_or(0)
        .max(data_start);

    let mut order: Vec<(usize, u64)> = new_files.to_vec();
    order.sort_by(|a, b| b.1.cmp(&a.1));

    let mut placements = Vec::with_capacity(order.len());
    for (item, size) in order {
        // Smallest gap that still fits, not the largest.
        let best = gaps
            .iter()
            .enumerate()
            .filter(|(_, g)| g.len >= size)
            .min_by_key(|(_, g)| g.len)
            .map(|(i, _)| i);
        let start = match best {
            Some(i) => {
                let gap = gaps[i];
                let rest_start = align4(gap.start + size);
                let gap_end = gap.start + gap.len;
                if rest_start < gap_end {
                    gaps[i] = Gap {
                        start: rest_start,
                        len: gap_end - rest_start,
                    };
                } else {
                    gaps.remove(i);
                }
                gap.start
            }
            None => {
                let start = align4(end);
                end = start + size;
                start
            }
        };
        placements.push(Placement { item, start });
    }
    (placements, end)
}
