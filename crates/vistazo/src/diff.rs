//! Diff masks and diff visualizations.
//!
//! A [`DiffMask`] marks every pixel whose per-channel absolute difference,
//! taken to luminance, exceeds a cutoff. The mask drives the red highlight
//! image and the three-panel `BASELINE | CURRENT | DIFF` composite.

use crate::contour::{connected_components, Component};
use crate::font;
use crate::raster::{luminance, RasterImage, HIGHLIGHT_RED};
use crate::result::{VistazoError, VistazoResult};

/// Default luminance cutoff separating rendering noise from real changes
pub const DEFAULT_DIFF_CUTOFF: u8 = 30;

/// Mask value for a changed pixel
pub const MASK_SET: u8 = 255;

/// Binary difference mask, one byte per pixel (0 or 255)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl DiffMask {
    /// Compute the mask between `reference` and `current`
    ///
    /// `current` is resized to `reference`'s dimensions when they differ, so
    /// the mask always has the reference's shape.
    #[must_use]
    pub fn compute(reference: &RasterImage, current: &RasterImage, cutoff: u8) -> Self {
        let current = current.aligned_to(reference);
        let data = reference
            .as_rgb()
            .pixels()
            .zip(current.as_rgb().pixels())
            .map(|(a, b)| {
                let delta = [
                    a.0[0].abs_diff(b.0[0]),
                    a.0[1].abs_diff(b.0[1]),
                    a.0[2].abs_diff(b.0[2]),
                ];
                if luminance(delta) > cutoff {
                    MASK_SET
                } else {
                    0
                }
            })
            .collect();

        Self {
            width: reference.width(),
            height: reference.height(),
            data,
        }
    }

    /// Mask width
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Mask height
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Mask value at `(x, y)`: 0 or 255
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    /// Whether the pixel at `(x, y)` changed
    #[must_use]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.get(x, y) == MASK_SET
    }

    /// Number of changed pixels
    #[must_use]
    pub fn changed_pixels(&self) -> u64 {
        self.data.iter().filter(|&&v| v == MASK_SET).count() as u64
    }

    /// Whether any pixel changed
    #[must_use]
    pub fn has_differences(&self) -> bool {
        self.data.iter().any(|&v| v == MASK_SET)
    }

    /// Fraction of pixels that changed
    #[must_use]
    pub fn changed_fraction(&self) -> f64 {
        self.changed_pixels() as f64 / self.data.len() as f64
    }

    /// Connected changed areas, in scan order, at least `min_area` pixels each
    #[must_use]
    pub fn changed_regions(&self, min_area: u32) -> Vec<Component> {
        let mask: Vec<bool> = self.data.iter().map(|&v| v == MASK_SET).collect();
        connected_components(self.width, self.height, &mask)
            .into_iter()
            .filter(|c| c.pixels >= u64::from(min_area))
            .collect()
    }
}

/// Titles drawn over the three composite panels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelLabels {
    /// Left panel
    pub reference: String,
    /// Middle panel
    pub current: String,
    /// Right panel
    pub diff: String,
}

impl Default for PanelLabels {
    fn default() -> Self {
        Self {
            reference: String::from("BASELINE"),
            current: String::from("CURRENT"),
            diff: String::from("DIFF"),
        }
    }
}

impl PanelLabels {
    /// Labels for a cross-browser pair
    #[must_use]
    pub fn for_pair(a: &str, b: &str) -> Self {
        Self {
            reference: a.to_uppercase(),
            current: b.to_uppercase(),
            diff: String::from("DIFF"),
        }
    }
}

/// Copy of `image` with every masked pixel painted pure red
///
/// `image` is resized to the mask's dimensions first when they differ.
#[must_use]
pub fn highlight_diff(image: &RasterImage, mask: &DiffMask) -> RasterImage {
    let mut out = if image.dimensions() == (mask.width(), mask.height()) {
        image.clone()
    } else {
        image.resized(mask.width(), mask.height())
    };
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if mask.is_set(x, y) {
                out.put_pixel(x, y, HIGHLIGHT_RED);
            }
        }
    }
    out
}

/// Three-panel composite: reference, current, and current with red diffs
///
/// Every panel is `reference`'s width; `current` is resized to match.
pub fn visualize(
    reference: &RasterImage,
    current: &RasterImage,
    mask: &DiffMask,
    labels: &PanelLabels,
) -> VistazoResult<RasterImage> {
    let (width, height) = reference.dimensions();
    if (mask.width(), mask.height()) != (width, height) {
        return Err(VistazoError::ImageProcessing {
            message: format!(
                "diff mask is {}x{} but reference is {width}x{height}",
                mask.width(),
                mask.height()
            ),
        });
    }

    let current = current.aligned_to(reference);
    let highlighted = highlight_diff(&current, mask);

    let mut composite = RasterImage::filled(width * 3, height, [0, 0, 0])?;
    for (panel, source) in [reference, current.as_ref(), &highlighted].into_iter().enumerate() {
        let offset = panel as u32 * width;
        for y in 0..height {
            for x in 0..width {
                composite.put_pixel(offset + x, y, source.pixel(x, y));
            }
        }
    }

    let scale = font::scale_for_width(width);
    let margin = 4 * scale;
    for (panel, label) in [&labels.reference, &labels.current, &labels.diff]
        .into_iter()
        .enumerate()
    {
        font::draw_label(&mut composite, panel as u32 * width + margin, margin, label, scale);
    }

    Ok(composite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::Bounds;

    fn page(width: u32, height: u32) -> RasterImage {
        RasterImage::from_fn(width, height, |x, y| {
            let band = ((y / 10) % 2) as u8;
            [240 - band * 40, 240, 250 - (x % 7) as u8]
        })
        .unwrap()
    }

    mod mask_tests {
        use super::*;

        #[test]
        fn test_identical_images_have_empty_mask() {
            let img = page(50, 40);
            let mask = DiffMask::compute(&img, &img, DEFAULT_DIFF_CUTOFF);
            assert!(!mask.has_differences());
            assert_eq!(mask.changed_pixels(), 0);
            assert!(mask.changed_regions(1).is_empty());
        }

        #[test]
        fn test_painted_rectangle_is_detected_and_overlapped() {
            let a = page(100, 100);
            let mut b = a.clone();
            // 12x12 = 1.44% of the image
            let rect = Bounds::new(30, 40, 12, 12);
            b.fill_rect(rect.x, rect.y, rect.width, rect.height, [0, 0, 0]);

            let mask = DiffMask::compute(&a, &b, DEFAULT_DIFF_CUTOFF);
            assert!(mask.has_differences());
            assert!(mask.is_set(36, 46));
            for y in 0..100 {
                for x in 0..100 {
                    if mask.is_set(x, y) {
                        assert!(rect.contains(x, y), "({x}, {y}) outside painted rect");
                    }
                }
            }
            let regions = mask.changed_regions(1);
            assert_eq!(regions.len(), 1);
            assert_eq!(regions[0].bounds, rect);
        }

        #[test]
        fn test_cutoff_suppresses_faint_changes() {
            let a = RasterImage::filled(20, 20, [100, 100, 100]).unwrap();
            let b = RasterImage::filled(20, 20, [110, 110, 110]).unwrap();
            assert!(!DiffMask::compute(&a, &b, 30).has_differences());
            let strict = DiffMask::compute(&a, &b, 5);
            assert_eq!(strict.changed_pixels(), 400);
            assert!((strict.changed_fraction() - 1.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_cutoff_is_exclusive() {
            let a = RasterImage::filled(4, 4, [0, 0, 0]).unwrap();
            let b = RasterImage::filled(4, 4, [30, 30, 30]).unwrap();
            assert!(!DiffMask::compute(&a, &b, 30).has_differences());
            assert!(DiffMask::compute(&a, &b, 29).has_differences());
        }

        #[test]
        fn test_mask_takes_reference_dimensions() {
            let a = page(60, 30);
            let b = page(120, 60);
            let mask = DiffMask::compute(&a, &b, DEFAULT_DIFF_CUTOFF);
            assert_eq!((mask.width(), mask.height()), (60, 30));
        }

        #[test]
        fn test_regions_filtered_by_area() {
            let a = RasterImage::filled(40, 40, [255, 255, 255]).unwrap();
            let mut b = a.clone();
            b.fill_rect(2, 2, 10, 10, [0, 0, 0]);
            b.put_pixel(30, 30, [0, 0, 0]);
            let mask = DiffMask::compute(&a, &b, DEFAULT_DIFF_CUTOFF);
            assert_eq!(mask.changed_regions(1).len(), 2);
            let big = mask.changed_regions(4);
            assert_eq!(big.len(), 1);
            assert_eq!(big[0].pixels, 100);
        }
    }

    mod visualization_tests {
        use super::*;

        #[test]
        fn test_highlight_paints_only_masked_pixels() {
            let a = RasterImage::filled(10, 10, [200, 200, 200]).unwrap();
            let mut b = a.clone();
            b.fill_rect(0, 0, 3, 3, [0, 0, 200]);
            let mask = DiffMask::compute(&a, &b, DEFAULT_DIFF_CUTOFF);
            let out = highlight_diff(&b, &mask);
            assert_eq!(out.pixel(1, 1), HIGHLIGHT_RED);
            assert_eq!(out.pixel(5, 5), [200, 200, 200]);
        }

        #[test]
        fn test_composite_layout() {
            let a = page(80, 60);
            let mut b = a.clone();
            b.fill_rect(50, 40, 10, 10, [0, 0, 0]);
            let mask = DiffMask::compute(&a, &b, DEFAULT_DIFF_CUTOFF);
            let composite = visualize(&a, &b, &mask, &PanelLabels::default()).unwrap();

            assert_eq!(composite.dimensions(), (240, 60));
            // below the label strip every panel shows its source
            assert_eq!(composite.pixel(55, 45), a.pixel(55, 45));
            assert_eq!(composite.pixel(80 + 55, 45), [0, 0, 0]);
            assert_eq!(composite.pixel(160 + 55, 45), HIGHLIGHT_RED);
            assert_eq!(composite.pixel(160 + 10, 50), b.pixel(10, 50));
            // label backing box in the top-left corner of each panel
            assert_eq!(composite.pixel(4, 4), [0, 0, 0]);
            assert_eq!(composite.pixel(80 + 4, 4), [0, 0, 0]);
        }

        #[test]
        fn test_composite_resizes_current_to_reference_width() {
            let a = page(50, 50);
            let b = page(100, 100);
            let mask = DiffMask::compute(&a, &b, DEFAULT_DIFF_CUTOFF);
            let composite = visualize(&a, &b, &mask, &PanelLabels::for_pair("chromium", "webkit"))
                .unwrap();
            assert_eq!(composite.dimensions(), (150, 50));
        }

        #[test]
        fn test_mismatched_mask_rejected() {
            let a = page(20, 20);
            let other = page(30, 30);
            let mask = DiffMask::compute(&other, &other, DEFAULT_DIFF_CUTOFF);
            assert!(visualize(&a, &a, &mask, &PanelLabels::default()).is_err());
        }

        #[test]
        fn test_pair_labels_are_upper_case() {
            let labels = PanelLabels::for_pair("firefox", "webkit");
            assert_eq!(labels.reference, "FIREFOX");
            assert_eq!(labels.current, "WEBKIT");
            assert_eq!(labels.diff, "DIFF");
        }
    }
}
