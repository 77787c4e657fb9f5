//! Per-pixel matching cost and square-block aggregation

use image::GrayImage;
use rayon::prelude::*;
use std::collections::VecDeque;

/// Intensity term is down-weighted by this shift relative to the gradient term
const INTENSITY_SHIFT: u32 = 2;

/// Clipped horizontal Sobel response, shifted into `[0, 2 * cap]`
///
/// Rows are replicated at the top and bottom; the first and last column
/// have no horizontal neighbours and get the zero-gradient value `cap`.
pub(crate) fn prefilter_xsobel(image: &GrayImage, cap: u8) -> Vec<u8> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let src = image.as_raw();
    let cap = i32::from(cap);
    let mut out = vec![cap as u8; w * h];

    for y in 0..h {
        let above = &src[y.saturating_sub(1) * w..][..w];
        let row = &src[y * w..][..w];
        let below = &src[(y + 1).min(h - 1) * w..][..w];
        let dst = &mut out[y * w..][..w];
        for x in 1..w.saturating_sub(1) {
            let v = i32::from(above[x + 1]) - i32::from(above[x - 1])
                + 2 * (i32::from(row[x + 1]) - i32::from(row[x - 1]))
                + i32::from(below[x + 1])
                - i32::from(below[x - 1]);
            dst[x] = (v.clamp(-cap, cap) + cap) as u8;
        }
    }
    out
}

/// Pixel values of one row with their half-sample interval bounds
struct SampledRow {
    value: Vec<u8>,
    lo: Vec<u8>,
    hi: Vec<u8>,
}

impl SampledRow {
    fn new(row: &[u8]) -> Self {
        let w = row.len();
        let half = |a: u8, b: u8| ((u16::from(a) + u16::from(b)) / 2) as u8;
        let mut lo = Vec::with_capacity(w);
        let mut hi = Vec::with_capacity(w);
        for x in 0..w {
            let v = row[x];
            let l = if x > 0 { half(row[x - 1], v) } else { v };
            let r = if x + 1 < w { half(row[x + 1], v) } else { v };
            lo.push(v.min(l).min(r));
            hi.push(v.max(l).max(r));
        }
        Self {
            value: row.to_vec(),
            lo,
            hi,
        }
    }

    /// Birchfield-Tomasi dissimilarity between `self[x]` and `other[xr]`
    #[inline]
    fn bt(&self, x: usize, other: &SampledRow, xr: usize) -> u16 {
        let u = i32::from(self.value[x]);
        let v = i32::from(other.value[xr]);
        let c0 = 0.max(u - i32::from(other.hi[xr])).max(i32::from(other.lo[xr]) - u);
        let c1 = 0.max(v - i32::from(self.hi[x])).max(i32::from(self.lo[x]) - v);
        c0.min(c1) as u16
    }
}

/// Images and search range shared by every cost row
pub(crate) struct CostInputs<'a> {
    pub left_filtered: &'a [u8],
    pub right_filtered: &'a [u8],
    pub left_raw: &'a [u8],
    pub right_raw: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub min_disparity: i32,
    pub num_disparities: usize,
    pub pre_filter_cap: u8,
}

impl CostInputs<'_> {
    /// Cost charged when the candidate falls outside the right image
    fn out_of_range_cost(&self) -> u16 {
        2 * u16::from(self.pre_filter_cap) + (255 >> INTENSITY_SHIFT)
    }

    /// Per-pixel cost of row `y` for every candidate disparity, laid out `x * D + d`
    fn pixel_cost_row(&self, y: usize, out: &mut [u16]) {
        let w = self.width;
        let nd = self.num_disparities;
        let span = y * w..(y + 1) * w;
        let lf = SampledRow::new(&self.left_filtered[span.clone()]);
        let rf = SampledRow::new(&self.right_filtered[span.clone()]);
        let lr = SampledRow::new(&self.left_raw[span.clone()]);
        let rr = SampledRow::new(&self.right_raw[span]);
        let outside = self.out_of_range_cost();
        let min_d = self.min_disparity as isize;

        out.par_chunks_mut(nd).enumerate().for_each(|(x, costs)| {
            for (d, cost) in costs.iter_mut().enumerate() {
                let xr = x as isize - min_d - d as isize;
                *cost = if xr < 0 || xr >= w as isize {
                    outside
                } else {
                    let xr = xr as usize;
                    lf.bt(x, &rf, xr) + (lr.bt(x, &rr, xr) >> INTENSITY_SHIFT)
                };
            }
        });
    }
}

/// Sliding square-block sum of pixel costs, advanced one row at a time
///
/// Keeps the pixel cost rows of the current vertical window and their
/// per-column sums; rows past the image border are replicated.
pub(crate) struct BlockCost<'a> {
    inputs: CostInputs<'a>,
    radius: usize,
    window: VecDeque<Vec<u16>>,
    column_sums: Vec<u32>,
    center: usize,
}

impl<'a> BlockCost<'a> {
    pub(crate) fn new(inputs: CostInputs<'a>, block_size: usize) -> Self {
        let radius = block_size / 2;
        let len = inputs.width * inputs.num_disparities;
        let mut block = Self {
            inputs,
            radius,
            window: VecDeque::with_capacity(block_size),
            column_sums: vec![0; len],
            center: 0,
        };
        for dy in -(radius as isize)..=(radius as isize) {
            let mut row = vec![0u16; len];
            block.inputs.pixel_cost_row(block.clamp_row(dy), &mut row);
            add_row(&mut block.column_sums, &row);
            block.window.push_back(row);
        }
        block
    }

    fn clamp_row(&self, y: isize) -> usize {
        y.clamp(0, self.inputs.height as isize - 1) as usize
    }

    /// Move the window center one row down
    pub(crate) fn advance(&mut self) {
        let Some(mut row) = self.window.pop_front() else {
            return;
        };
        subtract_row(&mut self.column_sums, &row);
        let incoming = self.clamp_row((self.center + 1 + self.radius) as isize);
        self.inputs.pixel_cost_row(incoming, &mut row);
        add_row(&mut self.column_sums, &row);
        self.window.push_back(row);
        self.center += 1;
    }

    /// Block costs for the current row, laid out `x * D + d`
    pub(crate) fn aggregate_row(&self, out: &mut [u32]) {
        let w = self.inputs.width as isize;
        let nd = self.inputs.num_disparities;
        let r = self.radius as isize;
        let col = |x: isize| {
            let x = x.clamp(0, w - 1) as usize;
            &self.column_sums[x * nd..(x + 1) * nd]
        };

        let mut acc = vec![0u32; nd];
        for dx in -r..=r {
            for (a, c) in acc.iter_mut().zip(col(dx)) {
                *a += c;
            }
        }
        for x in 0..w {
            out[x as usize * nd..][..nd].copy_from_slice(&acc);
            if x + 1 < w {
                for ((a, old), new) in acc.iter_mut().zip(col(x - r)).zip(col(x + 1 + r)) {
                    *a = *a - old + new;
                }
            }
        }
    }
}

fn add_row(sums: &mut [u32], row: &[u16]) {
    for (s, &c) in sums.iter_mut().zip(row) {
        *s += u32::from(c);
    }
}

fn subtract_row(sums: &mut [u32], row: &[u16]) {
    for (s, &c) in sums.iter_mut().zip(row) {
        *s -= u32::from(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_prefilter_constant_image_is_flat() {
        let img = GrayImage::from_pixel(6, 4, Luma([200]));
        let out = prefilter_xsobel(&img, 63);
        assert!(out.iter().all(|&v| v == 63));
    }

    #[test]
    fn test_prefilter_clips_strong_edges() {
        let img = GrayImage::from_fn(6, 3, |x, _| if x < 3 { Luma([0]) } else { Luma([255]) });
        let out = prefilter_xsobel(&img, 63);
        // Rising edge saturates at 2 * cap
        assert_eq!(out[6 + 2], 126);
        assert_eq!(out[6 + 3], 126);
        assert_eq!(out[6], 63);
    }

    #[test]
    fn test_bt_is_zero_for_identical_samples() {
        let row = [10u8, 50, 90, 130];
        let a = SampledRow::new(&row);
        let b = SampledRow::new(&row);
        for x in 0..row.len() {
            assert_eq!(a.bt(x, &b, x), 0);
        }
    }

    #[test]
    fn test_bt_tolerates_half_pixel_shift() {
        // A linear ramp shifted by half a sample stays within the interpolation interval
        let a = SampledRow::new(&[0, 20, 40, 60]);
        let b = SampledRow::new(&[10, 30, 50, 70]);
        assert_eq!(a.bt(1, &b, 1), 0);
        assert!(a.bt(1, &b, 3) > 0);
    }

    #[test]
    fn test_block_cost_matches_brute_force() {
        let w = 7usize;
        let h = 5usize;
        let left: Vec<u8> = (0..w * h).map(|i| ((i * 37) % 251) as u8).collect();
        let right: Vec<u8> = (0..w * h).map(|i| ((i * 53) % 241) as u8).collect();
        let inputs = || CostInputs {
            left_filtered: &left,
            right_filtered: &right,
            left_raw: &left,
            right_raw: &right,
            width: w,
            height: h,
            min_disparity: 0,
            num_disparities: 2,
            pre_filter_cap: 63,
        };

        let reference = inputs();
        let mut pixel_rows = vec![vec![0u16; w * 2]; h];
        for (y, row) in pixel_rows.iter_mut().enumerate() {
            reference.pixel_cost_row(y, row);
        }

        let mut block = BlockCost::new(inputs(), 3);
        let mut out = vec![0u32; w * 2];
        for y in 0..h {
            if y > 0 {
                block.advance();
            }
            block.aggregate_row(&mut out);
            for x in 0..w {
                for d in 0..2 {
                    let mut expected = 0u32;
                    for dy in -1isize..=1 {
                        for dx in -1isize..=1 {
                            let yy = (y as isize + dy).clamp(0, h as isize - 1) as usize;
                            let xx = (x as isize + dx).clamp(0, w as isize - 1) as usize;
                            expected += u32::from(pixel_rows[yy][xx * 2 + d]);
                        }
                    }
                    assert_eq!(out[x * 2 + d], expected, "mismatch at x={x} y={y} d={d}");
                }
            }
        }
    }
}
