mod common;
use common::*;

use image::DynamicImage;
use imageproc::drawing::draw_filled_circle_mut;
use sheetscan::detection::skew::SkewCorrector;

#[test]
fn image_without_lines_is_returned_unchanged() {
    let mut img = blank(240, 160);
    for (x, y) in [(40, 40), (120, 90), (200, 50)] {
        draw_filled_circle_mut(&mut img, (x, y), 6, BLACK);
    }
    let img = DynamicImage::ImageRgb8(img);

    let corrector = SkewCorrector::page();
    assert!(corrector.estimate(&img).is_none());
    assert_eq!(corrector.correct(&img).to_rgb8(), img.to_rgb8());
}

#[test]
fn recovers_known_page_angle() {
    let theta = 6.0;
    let img = parallel_lines(600, 400, theta, 4, 400.0);
    let corrector = SkewCorrector::page();

    let estimate = corrector.estimate(&img).expect("lines should be detected");
    assert!((estimate.angle - theta as f64).abs() <= 1.0, "estimated {}", estimate.angle);

    let corrected = corrector.correct(&img);
    assert_eq!(corrected.width(), 600);
    let residual = corrector.estimate(&corrected).expect("lines survive rotation");
    assert!(residual.angle.abs() <= 1.0, "residual {}", residual.angle);
}

#[test]
fn region_preset_ignores_steep_lines() {
    // 30 degrees is outside the +/-15 degree region window.
    let img = parallel_lines(500, 400, 30.0, 3, 200.0);
    assert!(SkewCorrector::region().estimate(&img).is_none());
}

#[test]
fn negative_angles_are_recovered() {
    let img = parallel_lines(600, 400, -4.0, 4, 400.0);
    let estimate = SkewCorrector::region().estimate(&img).expect("lines should be detected");
    assert!((estimate.angle + 4.0).abs() <= 1.0, "estimated {}", estimate.angle);
}
