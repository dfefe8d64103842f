pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod models;
pub mod pipeline;
pub mod recognition;

pub use config::{PipelineConfig, SegmentationStrategy};
pub use detection::{
    build_answer_sheet_pipeline, document_text, AnswerSheetReader, LineResult, PageResult, RegionResult,
};
pub use error::{PipelineError, Result};
pub use models::{BoundingBox, ImageInput, LineRegion, Point2D, Quadrilateral};
pub use pipeline::{
    DebugConfig, MetadataValue, Pipeline, PipelineContext, PipelineData, PipelineExecutor, PipelineStep, WorkItem,
};
pub use recognition::{BoundedRecognizer, FnRecognizer, LineRecognizer, OcrsRecognizer};
