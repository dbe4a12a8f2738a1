// Histogram rendering for reconstruction-error distributions.
// The image holds only graphics: blue bars, black axes with ticks, a dashed
// red threshold line and a small legend swatch in the top-right corner.

use std::path::Path;

use image::{Rgb, RgbImage};
use ndarray::Array1;

use crate::error::Result;

pub const BINS: usize = 50;
pub const WIDTH: u32 = 1000;
pub const HEIGHT: u32 = 600;

const MARGIN_LEFT: u32 = 70;
const MARGIN_RIGHT: u32 = 30;
const MARGIN_TOP: u32 = 40;
const MARGIN_BOTTOM: u32 = 60;
const TICKS: u32 = 5;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([0, 0, 0]);
// Pure blue at 0.7 opacity over white
const BAR: Rgb<u8> = Rgb([77, 77, 255]);
const THRESHOLD: Rgb<u8> = Rgb([220, 20, 20]);

// Equal-width bins spanning the data range.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn new(values: &Array1<f64>, bins: usize) -> Self {
        let bins = bins.max(1);
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (mut lo, mut hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if lo > hi {
            lo = 0.0;
            hi = 1.0;
        } else if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        let width = (hi - lo) / bins as f64;
        let edges = (0..=bins).map(|i| lo + width * i as f64).collect();
        let mut counts = vec![0; bins];
        for &v in values.iter().filter(|v| v.is_finite()) {
            let bin = (((v - lo) / width) as usize).min(bins - 1);
            counts[bin] += 1;
        }
        Self { edges, counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    fn range(&self) -> (f64, f64) {
        (self.edges[0], self.edges[self.edges.len() - 1])
    }
}

// Draws the histogram with a dashed vertical line at `threshold`.
pub fn render_histogram(errors: &Array1<f64>, threshold: f64) -> RgbImage {
    let histogram = Histogram::new(errors, BINS);
    log::debug!("binned {} errors into {} bins", histogram.total(), histogram.counts.len());
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);

    let (left, right) = (MARGIN_LEFT, WIDTH - MARGIN_RIGHT);
    let (top, bottom) = (MARGIN_TOP, HEIGHT - MARGIN_BOTTOM);
    let plot_w = (right - left) as f64;
    let plot_h = (bottom - top) as f64;

    // The x range always includes the threshold so the line stays visible
    let (mut x_min, mut x_max) = histogram.range();
    if threshold.is_finite() {
        x_min = x_min.min(threshold);
        x_max = x_max.max(threshold);
    }
    let to_px = |x: f64| left as f64 + (x - x_min) / (x_max - x_min) * plot_w;

    let max_count = histogram.counts.iter().copied().max().unwrap_or(0).max(1) as f64;
    for (i, &count) in histogram.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let x0 = to_px(histogram.edges[i]).round() as u32;
        let x1 = (to_px(histogram.edges[i + 1]).round() as u32).max(x0 + 1);
        let bar_h = (count as f64 / max_count * plot_h).round() as u32;
        fill_rect(&mut img, x0, bottom - bar_h, x1.saturating_sub(1).max(x0 + 1), bottom, BAR);
    }

    fill_rect(&mut img, left, top, left + 1, bottom + 1, AXIS);
    fill_rect(&mut img, left, bottom, right, bottom + 2, AXIS);
    for t in 0..=TICKS {
        let x = left + (right - left) * t / TICKS;
        fill_rect(&mut img, x, bottom, x + 1, bottom + 8, AXIS);
        let y = bottom - (bottom - top) * t / TICKS;
        fill_rect(&mut img, left - 8, y, left, y + 1, AXIS);
    }

    if threshold.is_finite() {
        let x = (to_px(threshold).round() as u32).clamp(left, right - 2);
        let mut y = top;
        while y < bottom {
            let end = (y + 10).min(bottom);
            fill_rect(&mut img, x, y, x + 2, end, THRESHOLD);
            y += 16;
        }
        // Legend swatch
        fill_rect(&mut img, right - 90, top + 10, right - 74, top + 12, THRESHOLD);
        fill_rect(&mut img, right - 66, top + 10, right - 50, top + 12, THRESHOLD);
    }
    img
}

pub fn plot_reconstruction_errors(errors: &Array1<f64>, threshold: f64, path: &Path) -> Result<()> {
    render_histogram(errors, threshold).save(path)?;
    log::info!("saved reconstruction error histogram to {}", path.display());
    Ok(())
}

// Fills `[x0, x1) x [y0, y1)`, clipped to the image.
fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(img.width());
    let y1 = y1.min(img.height());
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, color);
        }
    }
}
