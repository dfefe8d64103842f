use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::rect::Rect;
use sheetscan::{FnRecognizer, LineRecognizer, PipelineError};
use std::sync::Arc;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
/// Light blue ruling, HSV (105, 100, 230) on the 0..180 hue scale.
pub const RULING_BLUE: Rgb<u8> = Rgb([140, 185, 230]);
pub const INK: Rgb<u8> = Rgb([30, 30, 30]);
pub const DESK: Rgb<u8> = Rgb([90, 90, 90]);

pub fn blank(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, WHITE)
}

/// Filled black rectangle on white.
pub fn rectangle_on_white(width: u32, height: u32, rect: Rect) -> DynamicImage {
    let mut img = blank(width, height);
    draw_filled_rect_mut(&mut img, rect, BLACK);
    DynamicImage::ImageRgb8(img)
}

/// Rectangle outline `thickness` pixels wide, drawn inwards from `rect`.
pub fn draw_outline(img: &mut RgbImage, rect: Rect, thickness: u32, colour: Rgb<u8>) {
    for t in 0..thickness {
        let inner = Rect::at(rect.left() + t as i32, rect.top() + t as i32)
            .of_size(rect.width() - 2 * t, rect.height() - 2 * t);
        draw_hollow_rect_mut(img, inner, colour);
    }
}

/// Horizontal band of `thickness` rows.
pub fn draw_hline(img: &mut RgbImage, x0: i32, x1: i32, y: i32, thickness: u32, colour: Rgb<u8>) {
    draw_filled_rect_mut(img, Rect::at(x0, y).of_size((x1 - x0) as u32, thickness), colour);
}

/// A word-like run of `letters` blocks, each `w x h`, with `gap` between.
pub fn draw_word(img: &mut RgbImage, x: i32, y: i32, letters: u32, w: u32, h: u32, gap: u32, colour: Rgb<u8>) {
    for i in 0..letters {
        let lx = x + (i * (w + gap)) as i32;
        draw_filled_rect_mut(img, Rect::at(lx, y).of_size(w, h), colour);
    }
}

/// Parallel 3px black lines at `angle_degrees` (positive falls to the right)
/// on white.
pub fn parallel_lines(width: u32, height: u32, angle_degrees: f32, count: u32, length: f32) -> DynamicImage {
    let mut img = blank(width, height);
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let x0 = (width as f32 - length * cos) / 2.0;
    let spacing = height as f32 / (count + 1) as f32;
    for i in 0..count {
        let y0 = spacing * (i + 1) as f32 - length * sin / 2.0;
        for t in 0..3 {
            let y = y0 + t as f32;
            draw_line_segment_mut(&mut img, (x0, y), (x0 + length * cos, y + length * sin), BLACK);
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// Binary mask (text = 255) with three word-like blobs and one stray pixel.
/// Returns the mask and the blob extents.
pub fn three_line_mask() -> (GrayImage, Vec<Rect>, (u32, u32)) {
    let mut mask = GrayImage::new(300, 200);
    let mut blobs = Vec::new();
    for top in [20, 80, 140] {
        let word = Rect::at(30, top).of_size(4 * 12 + 3 * 8, 16);
        for i in 0..4 {
            let letter = Rect::at(30 + i * 20, top).of_size(12, 16);
            draw_filled_rect_mut(&mut mask, letter, Luma([255u8]));
        }
        blobs.push(word);
    }
    let dot = (250, 185);
    mask.put_pixel(dot.0, dot.1, Luma([255u8]));
    (mask, blobs, dot)
}

/// A ruled answer box interior: blue guide lines and ink words between them.
pub fn ruled_region(width: u32, height: u32, lines: u32) -> (RgbImage, Vec<u32>) {
    let mut img = blank(width, height);
    let pitch = height / (lines + 1);
    let mut word_tops = Vec::new();
    for i in 1..=lines {
        let ruling_y = (i * pitch) as i32;
        draw_hline(&mut img, 5, width as i32 - 5, ruling_y, 2, RULING_BLUE);
        let top = ruling_y as u32 - 4 - 20;
        draw_word(&mut img, 20, top as i32, 5, 8, 20, 10, INK);
        word_tops.push(top);
    }
    (img, word_tops)
}

/// Grey desk, white page and two outlined, ruled answer boxes.
pub fn answer_sheet_photo() -> DynamicImage {
    let mut img = RgbImage::from_pixel(800, 1000, DESK);
    let page = Rect::at(100, 100).of_size(600, 800);
    draw_filled_rect_mut(&mut img, page, WHITE);

    for box_top in [200, 550] {
        let outline = Rect::at(150, box_top).of_size(500, 200);
        draw_outline(&mut img, outline, 3, BLACK);
        for ruling in [box_top + 100, box_top + 140] {
            draw_hline(&mut img, 210, 590, ruling, 2, RULING_BLUE);
            draw_word(&mut img, 230, ruling - 26, 5, 8, 20, 10, INK);
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// The same sheet photographed crooked: box contents written 2 degrees off
/// the box edges, and the whole page turned 8 degrees on the desk. Header
/// rules keep the page-level vote on the box edges.
pub fn rotated_answer_sheet_photo() -> DynamicImage {
    let mut img = RgbImage::from_pixel(800, 1000, DESK);
    draw_filled_rect_mut(&mut img, Rect::at(100, 100).of_size(600, 800), WHITE);
    for header in [130, 160] {
        draw_hline(&mut img, 150, 650, header, 2, BLACK);
    }

    for box_top in [200, 550] {
        let outline = Rect::at(150, box_top).of_size(500, 200);
        draw_outline(&mut img, outline, 3, BLACK);

        // Interior drawn upright, then tilted and pasted inside the outline.
        let (ix, iy) = (153u32, box_top as u32 + 3);
        let mut interior = blank(494, 194);
        for ruling in [97, 137] {
            draw_hline(&mut interior, 57, 437, ruling, 2, RULING_BLUE);
            draw_word(&mut interior, 77, ruling - 26, 5, 8, 20, 10, INK);
        }
        let tilted = rotate_about_center(&interior, 2f32.to_radians(), Interpolation::Bilinear, WHITE);
        for (x, y, pixel) in tilted.enumerate_pixels() {
            img.put_pixel(ix + x, iy + y, *pixel);
        }
    }

    let turned = rotate_about_center(&img, 8f32.to_radians(), Interpolation::Bilinear, DESK);
    DynamicImage::ImageRgb8(turned)
}

/// Longest horizontal foreground run in a binary mask.
pub fn longest_row_run(mask: &GrayImage) -> u32 {
    let mut longest = 0;
    for y in 0..mask.height() {
        let mut run = 0;
        for x in 0..mask.width() {
            if mask.get_pixel(x, y)[0] > 0 {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
    }
    longest
}

/// Recognizer that reports the crop size, so tests can see it was called.
pub fn sizing_recognizer() -> Arc<dyn LineRecognizer> {
    Arc::new(FnRecognizer(|img: &DynamicImage| Ok(format!("line {}x{}", img.width(), img.height()))))
}

pub fn failing_recognizer() -> Arc<dyn LineRecognizer> {
    Arc::new(FnRecognizer(|_: &DynamicImage| Err(PipelineError::recognizer("model crashed"))))
}
