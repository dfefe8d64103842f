mod common;
use common::*;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn reader(recognizer: Option<Arc<dyn LineRecognizer>>) -> anyhow::Result<AnswerSheetReader> {
    Ok(AnswerSheetReader::new(&PipelineConfig::default(), recognizer)?)
}

#[test]
fn photographed_sheet_yields_two_regions_in_order() -> anyhow::Result<()> {
    let page = reader(Some(sizing_recognizer()))?.read_page(answer_sheet_photo())?;

    assert_eq!(page.regions.len(), 2);
    assert!(page.regions[0].bbox.y < page.regions[1].bbox.y);
    for region in &page.regions {
        assert_eq!(region.lines.len(), 2, "{region:?}");
        assert!(region.lines[0].bbox.y < region.lines[1].bbox.y);
        for line in &region.lines {
            assert!(line.text.starts_with("line "), "{line:?}");
        }
    }
    assert_eq!(page.text().matches("line ").count(), 4);
    Ok(())
}

#[test]
fn crooked_photo_is_straightened_and_read() -> anyhow::Result<()> {
    let page = reader(Some(sizing_recognizer()))?.read_page(rotated_answer_sheet_photo())?;

    assert_eq!(page.regions.len(), 2, "{page:?}");
    assert!(page.regions[0].bbox.y < page.regions[1].bbox.y);
    for region in &page.regions {
        // Each box keeps most of its 500px width after inward padding.
        assert!(region.bbox.width > 300, "{region:?}");
        assert!(!region.lines.is_empty(), "{region:?}");
        assert!(region.lines.iter().all(|l| l.text.starts_with("line ")));
    }
    Ok(())
}

#[test]
fn crooked_photo_box_contents_are_deskewed_and_unruled() -> anyhow::Result<()> {
    let pipeline = sheetscan::build_answer_sheet_pipeline(&PipelineConfig::default(), None)?;

    let deskewed = pipeline.run_partial(rotated_answer_sheet_photo(), 4)?;
    assert_eq!(deskewed.len(), 2);
    for region in &deskewed {
        let angle = region.get_float("skew_angle").unwrap_or(f32::NAN);
        assert!((1.0..=3.0).contains(&angle.abs()), "region angle {angle}");
    }

    let cleaned = pipeline.run_partial(rotated_answer_sheet_photo(), 5)?;
    assert_eq!(cleaned.len(), 2);
    for region in &cleaned {
        let mask = region.image.to_luma8();
        let ink = mask.pixels().filter(|p| p[0] > 0).count();
        assert!(ink > 0);
        let run = longest_row_run(&mask);
        assert!(run < mask.width() / 4, "ruling left in mask: run of {run}");
    }
    Ok(())
}

#[test]
fn recognizer_concurrency_holds_when_calls_time_out() -> anyhow::Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
    let slow: Arc<dyn LineRecognizer> = Arc::new(FnRecognizer(move |_: &image::DynamicImage| {
        let now = a.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        a.fetch_sub(1, Ordering::SeqCst);
        Ok("late".to_string())
    }));

    let mut config = PipelineConfig::default();
    config.recognition.max_concurrency = 1;
    config.recognition.timeout_ms = 50;
    let page = AnswerSheetReader::new(&config, Some(slow))?.read_page(answer_sheet_photo())?;
    assert_eq!(page.line_count(), 4);
    assert!(page.regions.iter().flat_map(|r| &r.lines).all(|l| l.text.is_empty()));

    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(active.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn both_strategies_find_the_written_lines() -> anyhow::Result<()> {
    let mut config = PipelineConfig::default();
    config.segmentation.strategy = SegmentationStrategy::ProjectionProfile;
    let page = AnswerSheetReader::new(&config, None)?.read_page(answer_sheet_photo())?;

    assert_eq!(page.regions.len(), 2);
    for region in &page.regions {
        assert_eq!(region.lines.len(), 2, "{region:?}");
        assert!(region.lines.iter().all(|l| l.text.is_empty()));
    }
    Ok(())
}

#[test]
fn failing_recognizer_does_not_abort_the_page() -> anyhow::Result<()> {
    let page = reader(Some(failing_recognizer()))?.read_page(answer_sheet_photo())?;
    assert_eq!(page.regions.len(), 2);
    assert_eq!(page.line_count(), 4);
    assert_eq!(page.text(), "\n\n\n");
    Ok(())
}

#[test]
fn blank_page_reads_as_empty() -> anyhow::Result<()> {
    let page = reader(Some(sizing_recognizer()))?.read_page(image::DynamicImage::ImageRgb8(blank(400, 500)))?;
    assert!(page.regions.is_empty());
    assert_eq!(page.text(), "");
    Ok(())
}

#[test]
fn undecodable_input_is_fatal() -> anyhow::Result<()> {
    let reader = reader(None)?;

    let err = reader.read_page(ImageInput::Bytes(b"definitely not a png".to_vec())).unwrap_err();
    assert!(matches!(err, PipelineError::ImageDecode(_)));
    assert!(err.is_fatal_input());

    let err = reader
        .read_page(PathBuf::from("/nonexistent/sheet.png"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::ImageLoad { .. }));
    Ok(())
}

#[test]
fn pages_keep_argument_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sheet = dir.path().join("sheet.png");
    answer_sheet_photo().save(&sheet)?;

    let pages = reader(Some(sizing_recognizer()))?.read_document(vec![
        ImageInput::Image(image::DynamicImage::ImageRgb8(blank(300, 300))),
        ImageInput::Path(sheet),
    ])?;
    assert_eq!(pages.len(), 2);
    assert!(pages[0].regions.is_empty());
    assert_eq!(pages[1].regions.len(), 2);
    Ok(())
}

#[test]
fn debug_output_does_not_change_results() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("debug");

    let plain = reader(Some(sizing_recognizer()))?.read_document(vec![answer_sheet_photo().into()])?;
    let debugged = reader(Some(sizing_recognizer()))?
        .with_debug(&out)?
        .read_document(vec![answer_sheet_photo().into()])?;
    assert_eq!(plain, debugged);

    let page_dir = out.join("page_01");
    assert!(page_dir.join("00_input/01.png").exists());
    assert!(page_dir.join("01_perspective/01.png").exists());
    assert!(page_dir.join("03_regions/01-01-01_boxes.png").exists());
    assert!(page_dir.join("05_clean_lines/01-01-02-01-01_ruling.png").exists());
    assert!(page_dir.join("06_segment_lines/01-01-01-01-01-01_lines.png").exists());
    assert!(page_dir.join("06_segment_lines/01-01-01-01-01-01_profile.png").exists());
    assert!(page_dir.join("07_recognize").is_dir());
    Ok(())
}

#[test]
fn debug_directory_must_start_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("leftover.png"), b"x")?;
    let err = reader(None)?.with_debug(dir.path()).err();
    assert!(matches!(err, Some(PipelineError::DebugOutput(_))));
    Ok(())
}

#[test]
fn standard_pipeline_steps_and_partial_run() -> anyhow::Result<()> {
    let pipeline = sheetscan::build_answer_sheet_pipeline(&PipelineConfig::default(), Some(sizing_recognizer()))?;
    assert_eq!(
        pipeline.step_names(),
        [
            "Perspective",
            "Page Deskew",
            "Regions",
            "Region Deskew",
            "Clean Lines",
            "Segment Lines",
            "Recognize"
        ]
    );

    let deskewed = pipeline.run_partial(answer_sheet_photo(), 2)?;
    assert_eq!(deskewed.len(), 1);
    let angle = deskewed[0].get_float("skew_angle").unwrap_or(f32::NAN);
    assert!(angle.abs() <= 1.0, "page angle {angle}");
    Ok(())
}
