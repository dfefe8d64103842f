use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::close;

pub const FOREGROUND: u8 = 255;

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Gaussian sigma for an odd kernel size, the usual `0.3 * ((k - 1) / 2 - 1) + 0.8`.
pub fn sigma_for_kernel(kernel: u32) -> f32 {
    let k = kernel.max(1) as f32;
    (0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8).max(0.1)
}

/// Apply Gaussian blur sized by kernel width
pub fn apply_blur(img: &GrayImage, kernel: u32) -> GrayImage {
    gaussian_blur_f32(img, sigma_for_kernel(kernel))
}

/// Detect edges using Canny edge detector
pub fn detect_edges(img: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    canny(img, low_threshold, high_threshold)
}

pub fn invert(img: &GrayImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| Luma([255 - img.get_pixel(x, y)[0]]))
}

/// Inverted adaptive threshold against a Gaussian-weighted local mean.
///
/// A pixel becomes foreground when it is at least `c` darker than its
/// `block_size` neighbourhood, so dark strokes survive shadows and uneven
/// lighting.
pub fn adaptive_threshold_inv(img: &GrayImage, block_size: u32, c: f32) -> GrayImage {
    let local_mean = gaussian_blur_f32(img, sigma_for_kernel(block_size));
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let value = img.get_pixel(x, y)[0] as f32;
        let mean = local_mean.get_pixel(x, y)[0] as f32;
        if value - mean > -c {
            Luma([0])
        } else {
            Luma([FOREGROUND])
        }
    })
}

/// Global Otsu binarization, dark pixels become foreground.
pub fn otsu_threshold_inv(img: &GrayImage) -> GrayImage {
    // A flat image has no ink to separate.
    let mut values = img.pixels().map(|p| p[0]);
    if let Some(first) = values.next() {
        if values.all(|v| v == first) {
            return GrayImage::new(img.width(), img.height());
        }
    }
    let level = otsu_level(img);
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if img.get_pixel(x, y)[0] > level {
            Luma([0])
        } else {
            Luma([FOREGROUND])
        }
    })
}

/// Inclusive intensity range mask.
pub fn in_range_gray(img: &GrayImage, lower: u8, upper: u8) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y)[0];
        Luma([if v >= lower && v <= upper { FOREGROUND } else { 0 }])
    })
}

/// Inclusive HSV range mask (hue on the 0..180 scale).
pub fn in_range_hsv(img: &RgbImage, lower: [u8; 3], upper: [u8; 3]) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let hsv = rgb_to_hsv(img.get_pixel(x, y).0);
        let inside = (0..3).all(|i| hsv[i] >= lower[i] && hsv[i] <= upper[i]);
        Luma([if inside { FOREGROUND } else { 0 }])
    })
}

/// 8-bit HSV with hue halved to fit 0..180.
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        (h / 2.0).round().min(179.0) as u8,
        s.round().min(255.0) as u8,
        max as u8,
    ]
}

pub fn union(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y)[0].max(b.get_pixel(x, y)[0])])
    })
}

/// Square closing repeated `iterations` times.
pub fn close_square(mask: &GrayImage, kernel: u32, iterations: u32) -> GrayImage {
    let radius = ((kernel / 2) * iterations).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return mask.clone();
    }
    close(mask, Norm::LInf, radius)
}

/// Opening with a `width x 1` structuring element, `iterations` erosions
/// followed by as many dilations. Only horizontal runs at least `width`
/// long survive.
pub fn horizontal_open(mask: &GrayImage, width: u32, iterations: u32) -> GrayImage {
    if width <= 1 {
        return mask.clone();
    }
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = horizontal_morph(&out, width, true);
    }
    for _ in 0..iterations {
        out = horizontal_morph(&out, width, false);
    }
    out
}

/// Binary 1-D erosion (`erode = true`) or dilation along rows. The window is
/// anchored at its centre; out-of-image pixels are ignored.
fn horizontal_morph(mask: &GrayImage, width: u32, erode: bool) -> GrayImage {
    let (w, h) = mask.dimensions();
    let anchor = (width / 2) as i64;
    let mut out = GrayImage::new(w, h);
    let mut prefix = vec![0u32; w as usize + 1];

    for y in 0..h {
        for x in 0..w {
            let on = (mask.get_pixel(x, y)[0] > 0) as u32;
            prefix[x as usize + 1] = prefix[x as usize] + on;
        }
        for x in 0..w {
            let start = (x as i64 - anchor).max(0) as usize;
            let end = (x as i64 - anchor + width as i64).min(w as i64) as usize;
            let on = prefix[end] - prefix[start];
            let set = if erode {
                on as usize == end - start
            } else {
                on > 0
            };
            if set {
                out.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
    }
    out
}

/// Zero every colour pixel where `mask` is set.
pub fn mask_out(img: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = img.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] > 0 {
            pixel.0 = [0, 0, 0];
        }
    }
    out
}

pub fn count_foreground(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] > 0).count()
}
