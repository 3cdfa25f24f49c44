//! Extraction windows: overlapping or adjacent page ranges.
//!
//! With window size `W` and step `S` over `n` pages the number of windows is
//! `ceil((n − W) / S) + 1` and window `i` spans `[i·S, min(i·S + W, n))`.
//! When `n ≤ W` there is exactly one window covering every page. Trailing
//! windows that would start past the last page are never produced, so no
//! window indexes beyond `n`.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Half-open page range `[start, end)` over 0-based page positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionWindow {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl ExtractionWindow {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Number of windows for `page_count` pages.
pub fn window_count(page_count: usize, window_size: usize, step: usize) -> usize {
    if page_count == 0 {
        return 0;
    }
    let window_size = window_size.max(1);
    let step = step.max(1);
    if page_count <= window_size {
        return 1;
    }
    (page_count - window_size).div_ceil(step) + 1
}

/// Generate the windows in non-decreasing start order.
pub fn windows(page_count: usize, window_size: usize, step: usize) -> Vec<ExtractionWindow> {
    let window_size = window_size.max(1);
    let step = step.max(1);
    (0..window_count(page_count, window_size, step))
        .map(|i| i * step)
        .take_while(|&start| start < page_count)
        .enumerate()
        .map(|(index, start)| ExtractionWindow {
            index,
            start,
            end: (start + window_size).min(page_count),
        })
        .collect()
}
