//! Image cleanup before recognition.
//!
//! Grayscale, upscale of small images, percentile contrast stretch and a 3x3
//! median filter against salt-and-pepper scan noise.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOptions {
    /// Images narrower than this are upscaled to reach it.
    pub min_width: u32,
    /// Never scale by more than this factor.
    pub max_upscale: f32,
    /// Share of darkest and brightest pixels clipped by the contrast stretch.
    pub clip_fraction: f32,
    pub denoise: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            min_width: 1000,
            max_upscale: 4.0,
            clip_fraction: 0.01,
            denoise: true,
        }
    }
}

pub fn preprocess(image: &DynamicImage) -> GrayImage {
    preprocess_with_options(image, &PreprocessOptions::default())
}

pub fn preprocess_with_options(image: &DynamicImage, options: &PreprocessOptions) -> GrayImage {
    let gray = upscale_small(image.to_luma8(), options);
    let stretched = stretch_contrast(gray, options.clip_fraction);
    if options.denoise {
        median_3x3(&stretched)
    } else {
        stretched
    }
}

fn upscale_small(gray: GrayImage, options: &PreprocessOptions) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 || width >= options.min_width {
        return gray;
    }

    let scale = (options.min_width as f32 / width as f32).min(options.max_upscale);
    let new_width = ((width as f32 * scale).round() as u32).max(1);
    let new_height = ((height as f32 * scale).round() as u32).max(1);

    tracing::trace!("Upscaling {}x{} image to {}x{}", width, height, new_width, new_height);
    image::imageops::resize(&gray, new_width, new_height, FilterType::CatmullRom)
}

/// Map the `clip_fraction` and `1 - clip_fraction` percentiles onto 0 and 255.
pub fn stretch_contrast(mut gray: GrayImage, clip_fraction: f32) -> GrayImage {
    let total = gray.width() as usize * gray.height() as usize;
    if total == 0 {
        return gray;
    }

    let mut histogram = [0usize; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let clip = ((total as f32) * clip_fraction.clamp(0.0, 0.49)) as usize;
    let low = percentile_value(&histogram, clip);
    let high = percentile_value(&histogram, total.saturating_sub(clip + 1));

    if high <= low {
        return gray;
    }

    let range = (high - low) as f32;
    for pixel in gray.pixels_mut() {
        let value = pixel[0].clamp(low, high);
        pixel[0] = (((value - low) as f32 / range) * 255.0).round() as u8;
    }

    gray
}

// Smallest value whose cumulative count exceeds `rank`.
fn percentile_value(histogram: &[usize; 256], rank: usize) -> u8 {
    let mut seen = 0usize;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > rank {
            return value as u8;
        }
    }
    u8::MAX
}

pub fn median_3x3(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut output = GrayImage::new(width, height);
    let mut window = [0u8; 9];

    for y in 0..height {
        for x in 0..width {
            let mut i = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                    window[i] = gray.get_pixel(sx, sy)[0];
                    i += 1;
                }
            }
            window.sort_unstable();
            output.put_pixel(x, y, Luma([window[4]]));
        }
    }

    output
}
