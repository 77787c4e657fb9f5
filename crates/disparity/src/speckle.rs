//! Small-blob removal on a fixed-point disparity map

use std::collections::VecDeque;

/// Invalidate 4-connected regions of at most `max_size` pixels
///
/// Neighbours join a region when neither is `invalid` and their values differ
/// by at most `max_diff`. Every pixel of a small region is set to `invalid`.
pub(crate) fn filter_speckles(
    disparity: &mut [i16],
    width: usize,
    height: usize,
    invalid: i16,
    max_size: usize,
    max_diff: i32,
) -> usize {
    if max_size == 0 || width == 0 || height == 0 {
        return 0;
    }

    const UNLABELED: u32 = 0;
    let mut labels = vec![UNLABELED; width * height];
    let mut next_label = UNLABELED;
    let mut queue = VecDeque::new();
    let mut member = Vec::new();
    let mut removed = 0;

    for start in 0..width * height {
        if disparity[start] == invalid || labels[start] != UNLABELED {
            continue;
        }

        next_label += 1;
        let label = next_label;
        labels[start] = label;
        member.clear();
        queue.push_back(start);
        while let Some(p) = queue.pop_front() {
            member.push(p);
            let value = i32::from(disparity[p]);
            let (x, y) = (p % width, p / width);
            let neighbours = [
                (x > 0).then(|| p - 1),
                (x + 1 < width).then(|| p + 1),
                (y > 0).then(|| p - width),
                (y + 1 < height).then(|| p + width),
            ];
            for q in neighbours.into_iter().flatten() {
                if labels[q] == UNLABELED
                    && disparity[q] != invalid
                    && (i32::from(disparity[q]) - value).abs() <= max_diff
                {
                    labels[q] = label;
                    queue.push_back(q);
                }
            }
        }

        if member.len() <= max_size {
            for &p in &member {
                disparity[p] = invalid;
            }
            removed += member.len();
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVALID: i16 = -16;

    #[test]
    fn test_small_island_removed() {
        // 6x4 plane at 160 with a 2-pixel island at 480
        let mut d = vec![160i16; 24];
        d[8] = 480;
        d[9] = 480;
        let removed = filter_speckles(&mut d, 6, 4, INVALID, 3, 16);
        assert_eq!(removed, 2);
        assert_eq!(d[8], INVALID);
        assert_eq!(d[9], INVALID);
        assert_eq!(d[0], 160);
    }

    #[test]
    fn test_large_region_kept() {
        let mut d = vec![160i16; 24];
        let removed = filter_speckles(&mut d, 6, 4, INVALID, 10, 16);
        assert_eq!(removed, 0);
        assert!(d.iter().all(|&v| v == 160));
    }

    #[test]
    fn test_smooth_gradient_is_one_region() {
        // Each step is within max_diff, so the whole row connects
        let mut d: Vec<i16> = (0..8).map(|i| 100 + i * 10).collect();
        let removed = filter_speckles(&mut d, 8, 1, INVALID, 5, 16);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_invalid_pixels_break_connectivity() {
        // Two 2-pixel segments separated by an invalid pixel
        let mut d = vec![160, 160, INVALID, 160, 160];
        let removed = filter_speckles(&mut d, 5, 1, INVALID, 2, 16);
        assert_eq!(removed, 4);
        assert!(d.iter().all(|&v| v == INVALID));
    }

    #[test]
    fn test_disabled_window_is_noop() {
        let mut d = vec![160i16, 900];
        assert_eq!(filter_speckles(&mut d, 2, 1, INVALID, 0, 16), 0);
        assert_eq!(d, vec![160, 900]);
    }
}
