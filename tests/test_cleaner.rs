mod common;
use common::*;

use image::DynamicImage;
use sheetscan::detection::line_cleaner::LineCleaner;

fn foreground_in_rows(mask: &image::GrayImage, rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> usize {
    rows.flat_map(|y| cols.clone().map(move |x| (x, y)))
        .filter(|&(x, y)| mask.get_pixel(x, y)[0] > 0)
        .count()
}

#[test]
fn blue_ruling_is_removed_and_ink_kept() {
    let (img, word_tops) = ruled_region(400, 120, 2);
    let cleaned = LineCleaner::default().clean(&DynamicImage::ImageRgb8(img));

    // Rulings sit at rows 40 and 80, two pixels thick.
    for ruling in [40, 80] {
        assert_eq!(foreground_in_rows(&cleaned.ruling, ruling..ruling + 2, 5..395), 390);
        assert_eq!(foreground_in_rows(&cleaned.binary, ruling..ruling + 2, 0..400), 0);
    }
    for top in word_tops {
        // Middle of the first letter.
        assert_eq!(cleaned.binary.get_pixel(24, top + 10)[0], 255);
        assert_eq!(foreground_in_rows(&cleaned.ruling, top..top + 20, 20..110), 0);
    }
}

#[test]
fn dark_printed_rules_are_removed_too() {
    let mut img = blank(300, 80);
    draw_hline(&mut img, 0, 300, 50, 2, BLACK);
    draw_word(&mut img, 40, 20, 3, 8, 20, 10, INK);
    let cleaned = LineCleaner::default().clean(&DynamicImage::ImageRgb8(img));

    assert_eq!(foreground_in_rows(&cleaned.binary, 50..52, 0..300), 0);
    assert!(foreground_in_rows(&cleaned.binary, 20..40, 40..90) > 0);
}

#[test]
fn blank_region_cleans_to_empty_mask() {
    let cleaned = LineCleaner::default().clean(&DynamicImage::ImageRgb8(blank(200, 60)));
    assert_eq!(foreground_in_rows(&cleaned.binary, 0..60, 0..200), 0);
    assert_eq!(foreground_in_rows(&cleaned.ruling, 0..60, 0..200), 0);
}
