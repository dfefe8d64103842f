#![allow(dead_code)]
#![allow(unused_imports)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from sheetscan for tests
pub use sheetscan::{
    AnswerSheetReader, BoundingBox, FnRecognizer, ImageInput, LineRecognizer, PageResult, PipelineConfig,
    PipelineError, Point2D, SegmentationStrategy,
};
