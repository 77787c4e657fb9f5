//! Semi-global cost propagation and per-pixel disparity selection
//!
//! Single top-to-bottom pass with five directions: left to right, right to
//! left, top to bottom, and the two downward diagonals. Only the previous
//! row of each downward path is kept, so memory stays at O(W * D).

use crate::cost::{prefilter_xsobel, BlockCost, CostInputs};
use crate::{SgbmParams, DISP_SCALE, DISP_SHIFT};
use image::GrayImage;
use rayon::prelude::*;

/// Horizontal offset of the predecessor on the previous row
const DOWNWARD_OFFSETS: [isize; 3] = [-1, 0, 1];

/// Smoothness-penalized path cost for one pixel, returning its minimum
///
/// `L(p, d) = C(p, d) + min(L(p-r, d), L(p-r, d±1) + P1, min L(p-r) + P2) - min L(p-r)`
#[inline]
pub(crate) fn propagate(
    cost: &[u32],
    prev: &[u32],
    prev_min: u32,
    p1: u32,
    p2: u32,
    out: &mut [u32],
) -> u32 {
    let nd = cost.len();
    let jump = prev_min + p2;
    let mut min = u32::MAX;
    for d in 0..nd {
        let mut best = prev[d].min(jump);
        if d > 0 {
            best = best.min(prev[d - 1] + p1);
        }
        if d + 1 < nd {
            best = best.min(prev[d + 1] + p1);
        }
        let v = cost[d] + best - prev_min;
        out[d] = v;
        min = min.min(v);
    }
    min
}

fn start_path(cost: &[u32], out: &mut [u32]) -> u32 {
    out.copy_from_slice(cost);
    cost.iter().copied().min().unwrap_or(0)
}

/// Run the matcher and return fixed-point disparities (scale 16), row-major
pub(crate) fn semi_global_match(left: &GrayImage, right: &GrayImage, params: &SgbmParams) -> Vec<i16> {
    let w = left.width() as usize;
    let h = left.height() as usize;
    let nd = params.num_disparities as usize;
    let mut disparity = vec![params.invalid_fixed(); w * h];

    // Columns whose whole search range lies inside the right image
    let min_x1 = (params.min_disparity + nd as i32).max(0) as usize;
    let max_x1 = (w as i32 + params.min_disparity.min(0)).max(0) as usize;
    if min_x1 >= max_x1 {
        return disparity;
    }

    let left_filtered = prefilter_xsobel(left, params.pre_filter_cap);
    let right_filtered = prefilter_xsobel(right, params.pre_filter_cap);
    let inputs = CostInputs {
        left_filtered: &left_filtered,
        right_filtered: &right_filtered,
        left_raw: left.as_raw(),
        right_raw: right.as_raw(),
        width: w,
        height: h,
        min_disparity: params.min_disparity,
        num_disparities: nd,
        pre_filter_cap: params.pre_filter_cap,
    };
    let mut block = BlockCost::new(inputs, params.block_size as usize);

    let (p1, p2) = (params.p1, params.p2);
    let mut costs = vec![0u32; w * nd];
    let mut total = vec![0u32; w * nd];
    let mut prev: [Vec<u32>; 3] = std::array::from_fn(|_| vec![0u32; w * nd]);
    let mut prev_min: [Vec<u32>; 3] = std::array::from_fn(|_| vec![0u32; w]);
    let mut cur = prev.clone();
    let mut cur_min = prev_min.clone();
    let mut selector = RowSelector::new(w, params);

    for y in 0..h {
        if y > 0 {
            block.advance();
        }
        block.aggregate_row(&mut costs);

        for (k, &offset) in DOWNWARD_OFFSETS.iter().enumerate() {
            let above = &prev[k];
            let above_min = &prev_min[k];
            let costs = &costs;
            cur[k]
                .par_chunks_mut(nd)
                .zip(cur_min[k].par_iter_mut())
                .enumerate()
                .for_each(|(x, (out, min))| {
                    let c = &costs[x * nd..(x + 1) * nd];
                    let px = x as isize + offset;
                    *min = if y == 0 || px < 0 || px >= w as isize {
                        start_path(c, out)
                    } else {
                        let px = px as usize;
                        propagate(c, &above[px * nd..(px + 1) * nd], above_min[px], p1, p2, out)
                    };
                });
        }

        let [a, b, c] = &cur;
        total
            .par_iter_mut()
            .zip(a.par_iter().zip(b.par_iter()).zip(c.par_iter()))
            .for_each(|(t, ((a, b), c))| *t = a + b + c);

        accumulate_horizontal(&costs, &mut total, w, nd, p1, p2, false);
        accumulate_horizontal(&costs, &mut total, w, nd, p1, p2, true);

        selector.select(&total, &mut disparity[y * w..(y + 1) * w], min_x1, max_x1);

        std::mem::swap(&mut prev, &mut cur);
        std::mem::swap(&mut prev_min, &mut cur_min);
    }

    disparity
}

/// Add one horizontal path (left to right, or right to left when `reverse`)
fn accumulate_horizontal(
    costs: &[u32],
    total: &mut [u32],
    w: usize,
    nd: usize,
    p1: u32,
    p2: u32,
    reverse: bool,
) {
    let mut last = vec![0u32; nd];
    let mut current = vec![0u32; nd];
    let mut last_min = 0u32;
    for i in 0..w {
        let x = if reverse { w - 1 - i } else { i };
        let c = &costs[x * nd..(x + 1) * nd];
        last_min = if i == 0 {
            start_path(c, &mut current)
        } else {
            propagate(c, &last, last_min, p1, p2, &mut current)
        };
        for (t, l) in total[x * nd..(x + 1) * nd].iter_mut().zip(&current) {
            *t += l;
        }
        std::mem::swap(&mut last, &mut current);
    }
}

/// Winner-take-all with uniqueness, sub-pixel refinement and left-right check
struct RowSelector {
    width: usize,
    min_disparity: i32,
    uniqueness_ratio: u64,
    disp12_max_diff: i32,
    invalid_fixed: i16,
    /// Best aggregated cost seen per right-image column
    right_cost: Vec<u32>,
    /// Integer disparity that achieved `right_cost`
    right_disparity: Vec<i32>,
}

impl RowSelector {
    fn new(width: usize, params: &SgbmParams) -> Self {
        Self {
            width,
            min_disparity: params.min_disparity,
            uniqueness_ratio: u64::from(params.uniqueness_ratio),
            disp12_max_diff: params.disp12_max_diff,
            invalid_fixed: params.invalid_fixed(),
            right_cost: vec![u32::MAX; width],
            right_disparity: vec![params.min_disparity - 1; width],
        }
    }

    fn select(&mut self, total: &[u32], row: &mut [i16], min_x1: usize, max_x1: usize) {
        let nd = total.len() / self.width;
        let min_d = self.min_disparity;
        self.right_cost.fill(u32::MAX);
        self.right_disparity.fill(min_d - 1);

        for x in min_x1..max_x1 {
            let s = &total[x * nd..(x + 1) * nd];
            let mut best = 0usize;
            for d in 1..nd {
                if s[d] < s[best] {
                    best = d;
                }
            }
            let min_s = u64::from(s[best]);

            let unique = s.iter().enumerate().all(|(d, &v)| {
                d.abs_diff(best) <= 1 || u64::from(v) * (100 - self.uniqueness_ratio) >= min_s * 100
            });
            if !unique {
                continue;
            }

            let xr = x as i32 - best as i32 - min_d;
            if (0..self.width as i32).contains(&xr) {
                let xr = xr as usize;
                if self.right_cost[xr] > s[best] {
                    self.right_cost[xr] = s[best];
                    self.right_disparity[xr] = best as i32 + min_d;
                }
            }

            let fixed = if best > 0 && best + 1 < nd {
                let (lo, mid, hi) = (
                    i64::from(s[best - 1]),
                    i64::from(s[best]),
                    i64::from(s[best + 1]),
                );
                let denom2 = (lo + hi - 2 * mid).max(1);
                let scale = i64::from(DISP_SCALE);
                best as i64 * scale + ((lo - hi) * scale + denom2) / (denom2 * 2)
            } else {
                best as i64 * i64::from(DISP_SCALE)
            };
            row[x] = (fixed + i64::from(min_d * DISP_SCALE)) as i16;
        }

        if self.disp12_max_diff >= 0 {
            self.check_left_right(row, min_x1, max_x1);
        }
    }

    fn check_left_right(&self, row: &mut [i16], min_x1: usize, max_x1: usize) {
        let min_d = self.min_disparity;
        let inconsistent = |xr: i32, d: i32| {
            (0..self.width as i32).contains(&xr) && {
                let other = self.right_disparity[xr as usize];
                other >= min_d && (other - d).abs() > self.disp12_max_diff
            }
        };
        for x in min_x1..max_x1 {
            let d1 = i32::from(row[x]);
            if row[x] == self.invalid_fixed {
                continue;
            }
            let d_floor = d1 >> DISP_SHIFT;
            let d_ceil = (d1 + DISP_SCALE - 1) >> DISP_SHIFT;
            let x = x as i32;
            if inconsistent(x - d_floor, d_floor) && inconsistent(x - d_ceil, d_ceil) {
                row[x as usize] = self.invalid_fixed;
            }
        }
    }
}
