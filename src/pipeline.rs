use image::DynamicImage;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::models::BoundingBox;

/// Metadata keys shared by the answer-sheet steps.
pub mod keys {
    pub const REGION_INDEX: &str = "region_index";
    /// Padded answer box in the deskewed page.
    pub const REGION_BOX: &str = "region_box";
    pub const LINE_INDEX: &str = "line_index";
    /// Set on the placeholder a region emits when it has no lines.
    pub const NO_TEXT: &str = "no_text";
    pub const TEXT: &str = "text";
    pub const SKEW_ANGLE: &str = "skew_angle";
}

/// A unit of work flowing through the pipeline: one image (page, region or
/// line crop) plus what earlier steps learned about it.
#[derive(Clone)]
pub struct PipelineData {
    pub image: DynamicImage,

    /// The page this item was derived from.
    pub original: Arc<DynamicImage>,

    /// Position in the parent image; `None` for a full page.
    pub bbox: Option<BoundingBox>,

    pub metadata: HashMap<String, MetadataValue>,

    /// Extra images written next to `image` by the debug sink only.
    pub artifacts: Vec<(String, DynamicImage)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    Float(f32),
    String(String),
    Int(i32),
    Box(BoundingBox),
}

impl PipelineData {
    pub fn from_image(image: DynamicImage) -> Self {
        let original = Arc::new(image.clone());
        Self {
            image,
            original,
            bbox: None,
            metadata: HashMap::new(),
            artifacts: Vec::new(),
        }
    }

    /// A derived item that inherits the parent's page and metadata.
    pub fn derive(&self, image: DynamicImage, bbox: Option<BoundingBox>) -> Self {
        Self {
            image,
            original: self.original.clone(),
            bbox,
            metadata: self.metadata.clone(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, image: DynamicImage) -> Self {
        self.artifacts.push((name.into(), image));
        self
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.metadata.get(key) {
            Some(MetadataValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f32> {
        match self.metadata.get(key) {
            Some(MetadataValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key) {
            Some(MetadataValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.metadata.get(key) {
            Some(MetadataValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_box(&self, key: &str) -> Option<BoundingBox> {
        match self.metadata.get(key) {
            Some(MetadataValue::Box(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Where intermediate images go.
#[derive(Clone, Debug)]
pub struct DebugConfig {
    pub output_dir: PathBuf,
}

impl DebugConfig {
    /// Accepts a missing or empty directory and creates it.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        if output_dir.exists() {
            if std::fs::read_dir(&output_dir)?.next().is_some() {
                return Err(PipelineError::debug_output(format!(
                    "debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }
        Ok(Self { output_dir })
    }

    /// Same sink rooted at a subdirectory, used per page of a document.
    pub fn scoped(&self, name: &str) -> Self {
        Self {
            output_dir: self.output_dir.join(name),
        }
    }
}

#[derive(Clone, Default)]
pub struct PipelineContext {
    pub debug: Option<DebugConfig>,
}

impl PipelineContext {
    /// Steps only render artifacts when someone will look at them.
    pub fn debug_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

/// One stage of a pipeline. A step may split one item into many, drop it,
/// or transform it in place.
pub trait PipelineStep: Send + Sync {
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>>;

    /// Human-readable name, also used for debug directory names.
    fn name(&self) -> &str;
}

#[derive(Clone)]
pub struct WorkItem {
    pub data: PipelineData,

    /// Steps not yet executed.
    pub remaining_steps: Vec<Arc<dyn PipelineStep>>,

    pub current_step_index: usize,

    /// 1-based output positions at every step so far, e.g. `[1, 3, 2]` is the
    /// second line of the third region of the page.
    pub lineage: Vec<usize>,
}

impl WorkItem {
    pub fn new(data: PipelineData, steps: Vec<Arc<dyn PipelineStep>>) -> Self {
        Self {
            data,
            remaining_steps: steps,
            current_step_index: 0,
            lineage: vec![],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_steps.is_empty()
    }

    /// Filename stem from lineage, e.g. `01-03-02`.
    pub fn lineage_stem(&self) -> String {
        if self.lineage.is_empty() {
            "01".to_string()
        } else {
            let ids: Vec<String> = self.lineage.iter().map(|id| format!("{:02}", id)).collect();
            ids.join("-")
        }
    }

    /// Debug output is a side channel, so failures here are logged and
    /// swallowed.
    fn save_debug_output(&self, context: &PipelineContext, step_name: &str) {
        let Some(debug_config) = &context.debug else {
            return;
        };
        let step_dir = debug_config
            .output_dir
            .join(step_dir_name(self.current_step_index, step_name));
        let stem = self.lineage_stem();

        let mut images = vec![(step_dir.join(format!("{stem}.png")), &self.data.image)];
        for (name, artifact) in &self.data.artifacts {
            images.push((step_dir.join(format!("{stem}_{name}.png")), artifact));
        }
        for (path, image) in images {
            if let Err(e) = save_image(&path, image) {
                warn!(path = %path.display(), error = %e, "Failed to write debug image");
            }
        }
    }

    /// Run the next step and wrap each output in a new work item.
    pub fn process_next_step(mut self, context: &PipelineContext) -> Result<Vec<WorkItem>> {
        if self.remaining_steps.is_empty() {
            return Ok(vec![self]);
        }

        let step = self.remaining_steps.remove(0);
        let step_name = step.name().to_string();
        let results = step.process(vec![self.data], context)?;

        let new_items: Vec<WorkItem> = results
            .into_iter()
            .enumerate()
            .map(|(idx, result_data)| {
                let mut lineage = self.lineage.clone();
                lineage.push(idx + 1);
                WorkItem {
                    data: result_data,
                    remaining_steps: self.remaining_steps.clone(),
                    current_step_index: self.current_step_index + 1,
                    lineage,
                }
            })
            .collect();

        for item in &new_items {
            item.save_debug_output(context, &step_name);
        }
        Ok(new_items
            .into_iter()
            .map(|mut item| {
                item.data.artifacts.clear();
                item
            })
            .collect())
    }
}

fn step_dir_name(step_index: usize, step_name: &str) -> String {
    format!("{:02}_{}", step_index, step_name.to_lowercase().replace(' ', "_"))
}

fn save_image(path: &Path, image: &DynamicImage) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save(path)
        .map_err(|e| PipelineError::debug_output(format!("{}: {}", path.display(), e)))
}

/// Runs work items wave by wave. Items in a wave are independent, so each
/// wave is processed in parallel; completed items are returned in lineage
/// order regardless of scheduling.
pub struct PipelineExecutor {
    context: PipelineContext,
}

impl PipelineExecutor {
    pub fn new(context: PipelineContext) -> Self {
        Self { context }
    }

    pub fn execute(&self, initial_items: Vec<WorkItem>) -> Result<Vec<WorkItem>> {
        let mut completed = Vec::new();
        let mut wave = initial_items;

        while !wave.is_empty() {
            let (done, pending): (Vec<WorkItem>, Vec<WorkItem>) =
                wave.into_iter().partition(WorkItem::is_complete);
            completed.extend(done);

            let next: Vec<Vec<WorkItem>> = pending
                .into_par_iter()
                .map(|item| item.process_next_step(&self.context))
                .collect::<Result<_>>()?;
            wave = next.into_iter().flatten().collect();
        }

        completed.sort_by(|a, b| a.lineage.cmp(&b.lineage));
        Ok(completed)
    }
}

/// Composable pipeline builder.
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    context: PipelineContext,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write intermediate images under `output_dir`, which must be empty or
    /// absent.
    pub fn with_debug(mut self, output_dir: impl Into<PathBuf>) -> Result<Self> {
        self.context.debug = Some(DebugConfig::new(output_dir)?);
        Ok(self)
    }

    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, input: DynamicImage) -> Result<Vec<WorkItem>> {
        self.run_with_context(input, &self.context)
    }

    /// Run with debug output redirected to a named subdirectory.
    pub fn run_scoped(&self, input: DynamicImage, scope: &str) -> Result<Vec<WorkItem>> {
        let context = PipelineContext {
            debug: self.context.debug.as_ref().map(|d| d.scoped(scope)),
        };
        self.run_with_context(input, &context)
    }

    fn run_with_context(&self, input: DynamicImage, context: &PipelineContext) -> Result<Vec<WorkItem>> {
        if let Some(debug_config) = &context.debug {
            let path = debug_config.output_dir.join("00_input").join("01.png");
            if let Err(e) = save_image(&path, &input) {
                warn!(error = %e, "Failed to write debug input");
            }
        }

        info!(
            width = input.width(),
            height = input.height(),
            steps = self.steps.len(),
            "Running pipeline"
        );
        let initial_item = WorkItem::new(PipelineData::from_image(input), self.steps.clone());
        let results = PipelineExecutor::new(context.clone()).execute(vec![initial_item])?;
        debug!(outputs = results.len(), "Pipeline finished");
        Ok(results)
    }

    /// Run only the first `num_steps` steps, sequentially.
    pub fn run_partial(&self, input: DynamicImage, num_steps: usize) -> Result<Vec<PipelineData>> {
        let mut data = vec![PipelineData::from_image(input)];
        for step in self.steps.iter().take(num_steps) {
            debug!(step = step.name(), items = data.len(), "Running step");
            data = step.process(data, &self.context)?;
        }
        Ok(data)
    }
}
