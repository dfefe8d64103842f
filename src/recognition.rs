//! Line recognition collaborator.
//!
//! The pipeline hands each line crop (dark text on white) to a
//! [`LineRecognizer`]. Recognizers are constructed explicitly by the caller
//! and shared behind an `Arc`, so tests can substitute a fake.

use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RecognitionConfig;
use crate::error::{PipelineError, Result};

pub trait LineRecognizer: Send + Sync {
    /// Prime caches so the first real call is not unusually slow.
    fn warmup(&self) -> Result<()> {
        Ok(())
    }

    fn recognize_line(&self, image: &DynamicImage) -> Result<String>;
}

pub const DETECTION_MODEL: &str = "text-detection.rten";
pub const RECOGNITION_MODEL: &str = "text-recognition.rten";

/// Default model location, `~/.cache/ocrs`.
pub fn default_model_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| PipelineError::recognizer("cannot locate home directory for OCR models"))?;
    Ok(Path::new(&home).join(".cache/ocrs"))
}

/// Recognizer backed by the `ocrs` engine. Construction loads both models
/// from disk, which takes a noticeable fraction of a second.
pub struct OcrsRecognizer {
    engine: OcrEngine,
}

impl OcrsRecognizer {
    pub fn from_default_location() -> Result<Self> {
        Self::from_dir(default_model_dir()?)
    }

    pub fn from_dir(model_dir: impl AsRef<Path>) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        let detection_path = model_dir.join(DETECTION_MODEL);
        let recognition_path = model_dir.join(RECOGNITION_MODEL);

        if !detection_path.exists() || !recognition_path.exists() {
            return Err(PipelineError::recognizer(format!(
                "OCR models not found; expected {} and {}",
                detection_path.display(),
                recognition_path.display()
            )));
        }

        let load = |path: &Path| {
            Model::load_file(path)
                .map_err(|e| PipelineError::recognizer(format!("{}: {}", path.display(), e)))
        };
        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(load(&detection_path)?),
            recognition_model: Some(load(&recognition_path)?),
            ..Default::default()
        })
        .map_err(|e| PipelineError::recognizer(e.to_string()))?;

        info!(dir = %model_dir.display(), "OCR models loaded");
        Ok(Self { engine })
    }
}

impl LineRecognizer for OcrsRecognizer {
    fn warmup(&self) -> Result<()> {
        let blank = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(64, 32, image::Rgb([255, 255, 255])));
        self.recognize_line(&blank).map(|_| ())
    }

    fn recognize_line(&self, image: &DynamicImage) -> Result<String> {
        let rgb = image.to_rgb8();
        let source = ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions())
            .map_err(|e| PipelineError::recognizer(e.to_string()))?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|e| PipelineError::recognizer(e.to_string()))?;
        let text = self
            .engine
            .get_text(&input)
            .map_err(|e| PipelineError::recognizer(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

/// Wraps a closure, mostly for tests and quick experiments.
pub struct FnRecognizer<F>(pub F);

impl<F> LineRecognizer for FnRecognizer<F>
where
    F: Fn(&DynamicImage) -> Result<String> + Send + Sync,
{
    fn recognize_line(&self, image: &DynamicImage) -> Result<String> {
        (self.0)(image)
    }
}

/// Counting gate that caps in-flight recognizer calls. The permit travels
/// with whichever thread runs the call, so a call abandoned after a timeout
/// keeps its slot until it actually returns.
pub struct CallGate {
    available: Mutex<usize>,
    released: Condvar,
}

impl CallGate {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            available: Mutex::new(limit.max(1)),
            released: Condvar::new(),
        })
    }

    /// Wait for a free slot, at most `timeout` when given.
    pub fn acquire(self: &Arc<Self>, timeout: Option<Duration>) -> Option<CallPermit> {
        let available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        let mut available = match timeout {
            Some(timeout) => {
                self.released
                    .wait_timeout_while(available, timeout, |n| *n == 0)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .released
                .wait_while(available, |n| *n == 0)
                .unwrap_or_else(PoisonError::into_inner),
        };
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(CallPermit { gate: Arc::clone(self) })
    }
}

/// One slot of a [`CallGate`], returned on drop.
pub struct CallPermit {
    gate: Arc<CallGate>,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        let mut available = self.gate.available.lock().unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        self.gate.released.notify_one();
    }
}

/// A recognizer behind a concurrency cap and an optional per-call deadline.
///
/// Waiting for a slot and the call itself each get the full timeout, so a
/// recognizer that hangs for good stalls a line for at most twice the
/// deadline instead of the whole page.
pub struct BoundedRecognizer {
    recognizer: Arc<dyn LineRecognizer>,
    gate: Arc<CallGate>,
    timeout: Option<Duration>,
}

impl BoundedRecognizer {
    pub fn new(recognizer: Arc<dyn LineRecognizer>, max_concurrency: usize, timeout: Option<Duration>) -> Self {
        Self {
            recognizer,
            gate: CallGate::new(max_concurrency),
            timeout,
        }
    }

    /// `timeout_ms == 0` disables the deadline.
    pub fn from_config(recognizer: Arc<dyn LineRecognizer>, config: &RecognitionConfig) -> Self {
        let timeout = (config.timeout_ms > 0).then(|| Duration::from_millis(config.timeout_ms));
        Self::new(recognizer, config.max_concurrency, timeout)
    }

    pub fn recognize(&self, image: &DynamicImage) -> Result<String> {
        let permit = self.gate.acquire(self.timeout).ok_or_else(|| {
            PipelineError::recognizer(format!(
                "no recognizer slot free within {} ms",
                self.timeout.map_or(0, |t| t.as_millis())
            ))
        })?;

        let Some(timeout) = self.timeout else {
            let result = self.recognizer.recognize_line(image);
            drop(permit);
            return result;
        };

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&self.recognizer);
        let image = image.clone();
        std::thread::spawn(move || {
            let result = worker.recognize_line(&image);
            drop(permit);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(PipelineError::recognizer(format!(
                "recognition timed out after {} ms",
                timeout.as_millis()
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(PipelineError::recognizer("recognizer thread panicked"))
            }
        }
    }

    /// Text for one line, or the empty string when recognition fails.
    pub fn recognize_or_empty(&self, image: &DynamicImage) -> String {
        match self.recognize(image) {
            Ok(text) => {
                debug!(chars = text.len(), "Line recognized");
                text
            }
            Err(e) => {
                warn!(error = %e, "Line recognition failed; using empty text");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn line() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 4, Luma([255])))
    }

    fn bounded<F>(f: F, max_concurrency: usize, timeout: Option<Duration>) -> BoundedRecognizer
    where
        F: Fn(&DynamicImage) -> Result<String> + Send + Sync + 'static,
    {
        BoundedRecognizer::new(Arc::new(FnRecognizer(f)), max_concurrency, timeout)
    }

    #[test]
    fn slow_recognizer_times_out_to_empty_text() {
        let slow = bounded(
            |_: &DynamicImage| {
                std::thread::sleep(Duration::from_millis(500));
                Ok("late".to_string())
            },
            1,
            Some(Duration::from_millis(20)),
        );
        assert_eq!(slow.recognize_or_empty(&line()), "");
    }

    #[test]
    fn errors_become_empty_text() {
        let failing = bounded(|_: &DynamicImage| Err(PipelineError::recognizer("boom")), 1, None);
        assert_eq!(failing.recognize_or_empty(&line()), "");
    }

    #[test]
    fn fast_recognizer_beats_the_deadline() {
        let fast = bounded(
            |img: &DynamicImage| Ok(format!("{}x{}", img.width(), img.height())),
            1,
            Some(Duration::from_secs(5)),
        );
        assert_eq!(fast.recognize_or_empty(&line()), "10x4");
    }

    #[test]
    fn timed_out_calls_keep_their_slot() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let slow = Arc::new(bounded(
            move |_: &DynamicImage| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(150));
                a.fetch_sub(1, Ordering::SeqCst);
                Ok("late".to_string())
            },
            1,
            Some(Duration::from_millis(20)),
        ));

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let slow = Arc::clone(&slow);
                std::thread::spawn(move || slow.recognize_or_empty(&line()))
            })
            .collect();
        for caller in callers {
            assert_eq!(caller.join().unwrap(), "");
        }
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn gate_hands_back_permits() {
        let gate = CallGate::new(2);
        let first = gate.acquire(Some(Duration::from_millis(10)));
        let second = gate.acquire(Some(Duration::from_millis(10)));
        assert!(first.is_some() && second.is_some());
        assert!(gate.acquire(Some(Duration::from_millis(10))).is_none());
        drop(first);
        assert!(gate.acquire(Some(Duration::from_millis(10))).is_some());
    }

    #[test]
    fn missing_models_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = OcrsRecognizer::from_dir(dir.path()).err().unwrap();
        assert!(matches!(err, PipelineError::Recognizer(_)));
    }
}
