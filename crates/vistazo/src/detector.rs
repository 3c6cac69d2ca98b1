//! Heuristic UI element detection.
//!
//! Candidates come from two passes over a screenshot's luminance:
//!
//! - **Foreground pass**: pixels that stand out from the dominant background
//!   luminance are grouped into connected components; their bounding boxes
//!   are classified as buttons or images.
//! - **Edge pass**: strong luminance transitions are grouped the same way;
//!   their bounding boxes are classified as text inputs.
//! - **Text pass**: the foreground mask is dilated so neighbouring glyphs
//!   merge into words and lines; sparse, short regions are text.
//!
//! Classification is purely geometric, using the size, aspect and fill bands
//! of [`DetectorConfig`]. Detection never fails: an empty or unreadable image
//! yields no candidates.

use crate::contour::{connected_components, Bounds};
use crate::font;
use crate::raster::RasterImage;
use crate::result::{VistazoError, VistazoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Button size and aspect bands
///
/// Width and height bands are exclusive; the `height / width` aspect band is
/// inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonBands {
    /// Width must exceed this
    pub min_width: u32,
    /// Width must stay below this
    pub max_width: u32,
    /// Height must exceed this
    pub min_height: u32,
    /// Height must stay below this
    pub max_height: u32,
    /// Lowest accepted `height / width`
    pub min_aspect: f64,
    /// Highest accepted `height / width`
    pub max_aspect: f64,
    /// Confidence reported for buttons
    pub confidence: f64,
}

impl Default for ButtonBands {
    fn default() -> Self {
        Self {
            min_width: 20,
            max_width: 300,
            min_height: 20,
            max_height: 80,
            min_aspect: 0.2,
            max_aspect: 2.0,
            confidence: 0.7,
        }
    }
}

impl ButtonBands {
    fn matches(&self, b: &Bounds) -> bool {
        let aspect = b.aspect_ratio();
        b.width > self.min_width
            && b.width < self.max_width
            && b.height > self.min_height
            && b.height < self.max_height
            && aspect >= self.min_aspect
            && aspect <= self.max_aspect
    }
}

/// Text input size bands (exclusive) and minimum width-to-height ratio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputBands {
    /// Width must exceed this
    pub min_width: u32,
    /// Width must stay below this
    pub max_width: u32,
    /// Height must exceed this
    pub min_height: u32,
    /// Height must stay below this
    pub max_height: u32,
    /// Inputs must be wider than `min_elongation * height`
    pub min_elongation: f64,
    /// Confidence reported for inputs
    pub confidence: f64,
}

impl Default for InputBands {
    fn default() -> Self {
        Self {
            min_width: 50,
            max_width: 400,
            min_height: 15,
            max_height: 50,
            min_elongation: 2.0,
            confidence: 0.6,
        }
    }
}

impl InputBands {
    fn matches(&self, b: &Bounds) -> bool {
        b.width > self.min_width
            && b.width < self.max_width
            && b.height > self.min_height
            && b.height < self.max_height
            && f64::from(b.width) > self.min_elongation * f64::from(b.height)
    }
}

/// Image minimum size (exclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBands {
    /// Width must exceed this
    pub min_width: u32,
    /// Height must exceed this
    pub min_height: u32,
    /// Confidence reported for images
    pub confidence: f64,
}

impl Default for ImageBands {
    fn default() -> Self {
        Self {
            min_width: 100,
            min_height: 100,
            confidence: 0.5,
        }
    }
}

impl ImageBands {
    const fn matches(&self, b: &Bounds) -> bool {
        b.width > self.min_width && b.height > self.min_height
    }
}

/// Text region bands
///
/// A text region is a group of foreground pixels whose glyphs lie within
/// `merge_gap` pixels of each other. Its box must be wider and taller than
/// the minimums, shorter than `max_height`, and its foreground fill must lie
/// within `[min_fill, max_fill]`; solid blocks and hollow outlines fall
/// outside that range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextBands {
    /// Width must exceed this
    pub min_width: u32,
    /// Height must exceed this
    pub min_height: u32,
    /// Height must stay below this
    pub max_height: u32,
    /// Lowest accepted foreground fraction of the box
    pub min_fill: f64,
    /// Highest accepted foreground fraction of the box
    pub max_fill: f64,
    /// Glyphs closer than twice this many pixels belong to one region
    pub merge_gap: u32,
    /// Confidence reported for text
    pub confidence: f64,
}

impl Default for TextBands {
    fn default() -> Self {
        Self {
            min_width: 10,
            min_height: 10,
            max_height: 60,
            min_fill: 0.15,
            max_fill: 0.7,
            merge_gap: 3,
            confidence: 0.8,
        }
    }
}

impl TextBands {
    fn matches(&self, region: &TextRegion) -> bool {
        let b = &region.bounds;
        let fill = region.pixels as f64 / b.area().max(1) as f64;
        b.width > self.min_width
            && b.height > self.min_height
            && b.height < self.max_height
            && fill >= self.min_fill
            && fill <= self.max_fill
    }
}

/// Tight box of a merged text group and its foreground pixel count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextRegion {
    bounds: Bounds,
    pixels: u64,
}

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Button bands, applied to foreground regions
    pub button: ButtonBands,
    /// Input bands, applied to edge regions
    pub input: InputBands,
    /// Image bands, applied to foreground regions
    pub image: ImageBands,
    /// Text bands, applied to merged glyph groups
    pub text: TextBands,
    /// Luminance distance from the background that makes a pixel foreground
    pub contrast_threshold: u8,
    /// Luminance step between neighbours that counts as an edge
    pub edge_threshold: u8,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            button: ButtonBands::default(),
            input: InputBands::default(),
            image: ImageBands::default(),
            text: TextBands::default(),
            contrast_threshold: 40,
            edge_threshold: 50,
        }
    }
}

impl DetectorConfig {
    /// Check that bands are ordered and confidences lie in `[0, 1]`
    pub fn validate(&self) -> VistazoResult<()> {
        let ordered = [
            ("button width", self.button.min_width, self.button.max_width),
            ("button height", self.button.min_height, self.button.max_height),
            ("input width", self.input.min_width, self.input.max_width),
            ("input height", self.input.min_height, self.input.max_height),
            ("text height", self.text.min_height, self.text.max_height),
        ];
        for (name, min, max) in ordered {
            if min >= max {
                return Err(VistazoError::invalid_config(format!(
                    "detector {name} band is empty ({min}..{max})"
                )));
            }
        }
        if self.button.min_aspect > self.button.max_aspect {
            return Err(VistazoError::invalid_config(format!(
                "detector button aspect band is empty ({}..={})",
                self.button.min_aspect, self.button.max_aspect
            )));
        }
        if !(0.0..=1.0).contains(&self.text.min_fill)
            || !(0.0..=1.0).contains(&self.text.max_fill)
            || self.text.min_fill > self.text.max_fill
        {
            return Err(VistazoError::invalid_config(format!(
                "detector text fill band must be ordered within 0.0..=1.0, got {}..={}",
                self.text.min_fill, self.text.max_fill
            )));
        }
        for (name, confidence) in [
            ("button", self.button.confidence),
            ("input", self.input.confidence),
            ("image", self.image.confidence),
            ("text", self.text.confidence),
        ] {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(VistazoError::invalid_config(format!(
                    "detector {name} confidence must be within 0.0..=1.0, got {confidence}"
                )));
            }
        }
        Ok(())
    }
}

/// Kind of detected element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Button,
    Input,
    Image,
    Text,
}

impl ElementKind {
    /// Outline color used by [`annotate`]
    #[must_use]
    pub const fn color(self) -> [u8; 3] {
        match self {
            Self::Button => [255, 0, 0],
            Self::Input => [0, 0, 255],
            Self::Image => [0, 200, 0],
            Self::Text => [255, 165, 0],
        }
    }

    /// Lower-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Input => "input",
            Self::Image => "image",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A region that looks like a UI element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementCandidate {
    /// What the region looks like
    pub kind: ElementKind,
    /// Region in image coordinates
    pub bounds: Bounds,
    /// Fixed per-kind confidence from the bands
    pub confidence: f64,
}

/// Detection result: a finite sequence that can be iterated repeatedly
///
/// Classification happens during iteration. Buttons come first, then
/// inputs, then images, then text, each in raster-scan order.
#[derive(Debug, Clone)]
pub struct ElementCandidates {
    foreground: Vec<Bounds>,
    edges: Vec<Bounds>,
    text: Vec<TextRegion>,
    config: DetectorConfig,
}

impl ElementCandidates {
    fn empty(config: &DetectorConfig) -> Self {
        Self {
            foreground: Vec::new(),
            edges: Vec::new(),
            text: Vec::new(),
            config: config.clone(),
        }
    }

    /// Iterate candidates from the start
    pub fn iter(&self) -> impl Iterator<Item = ElementCandidate> + '_ {
        let cfg = &self.config;
        let buttons = self
            .foreground
            .iter()
            .filter(|b| cfg.button.matches(b))
            .map(|b| candidate(ElementKind::Button, *b, cfg.button.confidence));
        let inputs = self
            .edges
            .iter()
            .filter(|b| cfg.input.matches(b))
            .map(|b| candidate(ElementKind::Input, *b, cfg.input.confidence));
        let images = self
            .foreground
            .iter()
            .filter(|b| cfg.image.matches(b))
            .map(|b| candidate(ElementKind::Image, *b, cfg.image.confidence));
        let text = self
            .text
            .iter()
            .filter(|r| cfg.text.matches(r))
            .map(|r| candidate(ElementKind::Text, r.bounds, cfg.text.confidence));
        buttons.chain(inputs).chain(images).chain(text)
    }

    /// Candidates of one kind
    pub fn of_kind(&self, kind: ElementKind) -> impl Iterator<Item = ElementCandidate> + '_ {
        self.iter().filter(move |c| c.kind == kind)
    }

    /// Number of candidates
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether nothing was detected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a ElementCandidates {
    type Item = ElementCandidate;
    type IntoIter = Box<dyn Iterator<Item = ElementCandidate> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

const fn candidate(kind: ElementKind, bounds: Bounds, confidence: f64) -> ElementCandidate {
    ElementCandidate {
        kind,
        bounds,
        confidence,
    }
}

/// Geometric UI element detector
#[derive(Debug, Clone, Default)]
pub struct UiElementDetector {
    config: DetectorConfig,
}

impl UiElementDetector {
    /// Create a detector
    #[must_use]
    pub const fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Detector configuration
    #[must_use]
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect candidates in a decoded image
    #[must_use]
    pub fn detect(&self, image: &RasterImage) -> ElementCandidates {
        let (width, height) = image.dimensions();
        let luma: Vec<u8> = image.to_luma().into_raw();

        let background = modal_luminance(&luma);
        let contrast = self.config.contrast_threshold;
        let foreground_mask: Vec<bool> = luma
            .iter()
            .map(|&l| l.abs_diff(background) > contrast)
            .collect();
        let edge_mask = edge_mask(&luma, width, height, self.config.edge_threshold);

        let foreground: Vec<Bounds> = connected_components(width, height, &foreground_mask)
            .into_iter()
            .map(|c| c.bounds)
            .collect();
        let edges: Vec<Bounds> = connected_components(width, height, &edge_mask)
            .into_iter()
            .map(|c| c.bounds)
            .collect();
        let text = text_regions(&foreground_mask, width, height, self.config.text.merge_gap);

        tracing::debug!(
            background,
            foreground_regions = foreground.len(),
            edge_regions = edges.len(),
            text_regions = text.len(),
            "element detection pass complete"
        );

        ElementCandidates {
            foreground,
            edges,
            text,
            config: self.config.clone(),
        }
    }

    /// Detect candidates in an image file; unreadable files yield nothing
    #[must_use]
    pub fn detect_file(&self, path: impl AsRef<Path>) -> ElementCandidates {
        let path = path.as_ref();
        match RasterImage::open(path) {
            Ok(image) => self.detect(&image),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot detect elements in unreadable image");
                ElementCandidates::empty(&self.config)
            }
        }
    }

    /// Detect, annotate and write `<stem>_annotated.png` beside the source
    pub fn annotate_file(&self, path: impl AsRef<Path>) -> VistazoResult<PathBuf> {
        let path = path.as_ref();
        let image = RasterImage::open(path)?;
        let candidates = self.detect(&image);
        let annotated = annotate(&image, &candidates);

        let stem = path
            .file_stem()
            .map_or_else(|| "screenshot".into(), |s| s.to_string_lossy());
        let target = path.with_file_name(format!("{stem}_annotated.png"));
        annotated.save_png(&target)?;
        tracing::info!(
            source = %path.display(),
            target = %target.display(),
            candidates = candidates.len(),
            "annotated screenshot written"
        );
        Ok(target)
    }
}

/// Copy of `image` with a colored outline and kind label per candidate
#[must_use]
pub fn annotate(image: &RasterImage, candidates: &ElementCandidates) -> RasterImage {
    let mut out = image.clone();
    for c in candidates {
        let color = c.kind.color();
        draw_outline(&mut out, &c.bounds, color, 2);
        let (_, label_height) = font::text_size(c.kind.as_str(), 1);
        let label_y = c.bounds.y.saturating_sub(label_height + 2);
        font::draw_text(&mut out, c.bounds.x, label_y, c.kind.as_str(), 1, color);
    }
    out
}

fn draw_outline(img: &mut RasterImage, b: &Bounds, color: [u8; 3], thickness: u32) {
    let t = thickness.min(b.width).min(b.height);
    img.fill_rect(b.x, b.y, b.width, t, color);
    img.fill_rect(b.x, (b.y + b.height).saturating_sub(t), b.width, t, color);
    img.fill_rect(b.x, b.y, t, b.height, color);
    img.fill_rect((b.x + b.width).saturating_sub(t), b.y, t, b.height, color);
}

/// Group foreground pixels that lie within `gap` of each other
///
/// Each group is reported with the tight box and count of its own
/// foreground pixels, not the dilated extent.
fn text_regions(foreground: &[bool], width: u32, height: u32, gap: u32) -> Vec<TextRegion> {
    let merged = dilate(foreground, width as usize, height as usize, gap as usize);
    connected_components(width, height, &merged)
        .into_iter()
        .filter_map(|c| {
            let b = c.bounds;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
            let mut pixels = 0u64;
            for y in b.y..b.y + b.height {
                for x in b.x..b.x + b.width {
                    if foreground[(y * width + x) as usize] {
                        pixels += 1;
                        min_x = min_x.min(x);
                        min_y = min_y.min(y);
                        max_x = max_x.max(x);
                        max_y = max_y.max(y);
                    }
                }
            }
            (pixels > 0).then(|| TextRegion {
                bounds: Bounds::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1),
                pixels,
            })
        })
        .collect()
}

/// Square dilation by `radius`, as a horizontal then a vertical pass
fn dilate(mask: &[bool], w: usize, h: usize, radius: usize) -> Vec<bool> {
    if radius == 0 {
        return mask.to_vec();
    }
    let mut horizontal = vec![false; mask.len()];
    for y in 0..h {
        let row = &mask[y * w..(y + 1) * w];
        for x in 0..w {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(w - 1);
            horizontal[y * w + x] = row[lo..=hi].iter().any(|&p| p);
        }
    }
    let mut out = vec![false; mask.len()];
    for x in 0..w {
        for y in 0..h {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius).min(h - 1);
            out[y * w + x] = (lo..=hi).any(|yy| horizontal[yy * w + x]);
        }
    }
    out
}

fn modal_luminance(luma: &[u8]) -> u8 {
    let mut histogram = [0u64; 256];
    for &l in luma {
        histogram[l as usize] += 1;
    }
    histogram
        .iter()
        .enumerate()
        .max_by_key(|&(value, count)| (*count, std::cmp::Reverse(value)))
        .map_or(0, |(value, _)| value as u8)
}

/// Mark the pixel where a strong horizontal or vertical transition starts
fn edge_mask(luma: &[u8], width: u32, height: u32, threshold: u8) -> Vec<bool> {
    let (w, h) = (width as usize, height as usize);
    let mut mask = vec![false; luma.len()];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let right = x + 1 < w && luma[i].abs_diff(luma[i + 1]) > threshold;
            let down = y + 1 < h && luma[i].abs_diff(luma[i + w]) > threshold;
            mask[i] = right || down;
        }
    }
    mask
}
