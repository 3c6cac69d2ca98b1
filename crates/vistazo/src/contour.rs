//! Connected regions of a binary mask.
//!
//! Components are discovered in raster-scan order of their first pixel and
//! grown with 8-connectivity; each is reported as its bounding box.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Axis-aligned bounding box in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Bounds {
    /// Create a bounding box
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box area in pixels
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Height divided by width
    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        if self.width == 0 {
            return f64::INFINITY;
        }
        f64::from(self.height) / f64::from(self.width)
    }

    /// Whether a point lies inside the box
    #[must_use]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }

    /// Whether two boxes share at least one pixel
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// One connected component of a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Bounding box
    pub bounds: Bounds,
    /// Number of set pixels in the component
    pub pixels: u64,
}

/// Find 8-connected components of `mask` (row-major, `width * height` long)
pub(crate) fn connected_components(width: u32, height: u32, mask: &[bool]) -> Vec<Component> {
    let (w, h) = (width as usize, height as usize);
    debug_assert_eq!(mask.len(), w * h, "mask length must match dimensions");

    let mut visited = vec![false; mask.len()];
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let (mut min_x, mut min_y) = (w, h);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut pixels = 0u64;

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            pixels += 1;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        queue.push_back(n);
                    }
                }
            }
        }

        components.push(Component {
            bounds: Bounds::new(
                min_x as u32,
                min_y as u32,
                (max_x - min_x + 1) as u32,
                (max_y - min_y + 1) as u32,
            ),
            pixels,
        });
    }

    components
}
