//! Recorded annotation sessions and their replay through the engine.
//!
//! A session file captures what a host UI saw for one image: the rendered
//! layout, the tag palette, the model's detections, and the ordered input the
//! operator produced. Replaying it drives [`EngineCore`] exactly as the host
//! would and reports the resulting per-image state.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::collections::BTreeMap;

use annotator::config::EngineConfig;
use annotator::engine::{EngineCore, Scene};
use annotator::input::{Action, Button, Key, PointerEvent, PointerSource};
use annotator::mapper::ImageLayout;
use annotator::model::{AnnotationId, Detection, DetectionActionState, ManualAnnotation, TagPalette};
use annotator::review;
use annotator::store::{AnnotationBook, AnnotationStore, ImageAnnotations, ImageKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("step {step}: no detection with index {index}")]
    UnknownDetection { step: usize, index: usize },
    #[error("step {step}: no annotation with index {index}")]
    UnknownAnnotation { step: usize, index: usize },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub image: ImageKey,
    #[serde(default)]
    pub layout: ImageLayout,
    #[serde(default)]
    pub tags: TagPalette,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Device-space pointer position. `touches` marks a touch event; otherwise
/// `button` (default `primary`) names the mouse button.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PointerAt {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub touches: Option<usize>,
    #[serde(default)]
    pub button: Button,
}

impl PointerAt {
    fn event(self) -> PointerEvent {
        match self.touches {
            Some(n) => PointerEvent::touch(self.x, self.y, n),
            None => PointerEvent { source: PointerSource::Mouse(self.button), ..PointerEvent::mouse(self.x, self.y) },
        }
    }
}

/// One recorded input. Detections and annotations are referenced by index.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    PointerDown(PointerAt),
    PointerMove(PointerAt),
    PointerUp(PointerAt),
    Key { key: Key },
    SelectTag { tag: Option<String> },
    Accept { detection: usize },
    Reject { detection: usize },
    Reclassify { detection: usize, tag: String },
    Convert { detection: usize },
    UndoConversion { detection: usize },
    Select { annotation: Option<usize> },
}

/// Final state of the replayed image.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub image: String,
    pub annotations: Vec<ManualAnnotation>,
    pub selected: Option<AnnotationId>,
    pub detection_actions: BTreeMap<usize, DetectionActionState>,
    pub visible_detections: Vec<usize>,
    /// Steps the engine refused (review of a converted detection, repeat conversion, ...).
    pub refused_steps: Vec<usize>,
    /// Steps where a draw was attempted with no tag selected.
    pub no_tag_steps: Vec<usize>,
}

/// Replay `session` on a fresh engine and store.
///
/// # Errors
///
/// Returns an error if an event references a detection or annotation index
/// that does not exist at that point in the session.
pub fn replay(session: &Session, config: EngineConfig) -> Result<Report, ReplayError> {
    let mut book = AnnotationBook::new();
    let mut engine = EngineCore::new(config);
    let mut tags = session.tags.clone();
    let mut refused_steps = Vec::new();
    let mut no_tag_steps = Vec::new();
    let store = book.image_mut(&session.image);

    for (step, event) in session.events.iter().enumerate() {
        debug!(step, ?event, "replay");
        let applied = match event {
            Event::PointerDown(at) => {
                let scene = Scene::new(&session.layout, &tags);
                let actions = engine.on_pointer_down(&scene, store, at.event());
                if actions.contains(&Action::NoTagSelected) {
                    no_tag_steps.push(step);
                }
                true
            }
            Event::PointerMove(at) => {
                let scene = Scene::new(&session.layout, &tags);
                engine.on_pointer_move(&scene, store, at.event());
                true
            }
            Event::PointerUp(at) => {
                let scene = Scene::new(&session.layout, &tags);
                engine.on_pointer_up(&scene, store, at.event());
                true
            }
            Event::Key { key } => {
                engine.on_key_down(store, key);
                true
            }
            Event::SelectTag { tag } => {
                tags.drawing_tag.clone_from(tag);
                true
            }
            Event::Accept { detection } => review::accept(store, find_detection(session, step, *detection)?.index),
            Event::Reject { detection } => {
                review::reject_false_positive(store, find_detection(session, step, *detection)?.index)
            }
            Event::Reclassify { detection, tag } => {
                review::reclassify(store, find_detection(session, step, *detection)?, tag)
            }
            Event::Convert { detection } => {
                let detection = find_detection(session, step, *detection)?;
                let scene = Scene::new(&session.layout, &tags);
                engine.convert_detection(&scene, store, detection).is_some()
            }
            Event::UndoConversion { detection } => match store.conversion_of(*detection).map(|a| a.id) {
                Some(id) => engine.undo_conversion(store, id),
                None => false,
            },
            Event::Select { annotation } => {
                let id = match annotation {
                    Some(index) => Some(find_annotation(store, step, *index)?),
                    None => None,
                };
                store.select_annotation(id);
                true
            }
        };
        if !applied {
            warn!(step, ?event, "event refused");
            refused_steps.push(step);
        }
    }

    if let Some(kind) = engine.gesture() {
        warn!(gesture = ?kind, "session ended mid-gesture");
        engine.teardown();
    }

    let visible_detections =
        review::visible_detections(&session.detections, store.annotations()).iter().map(|d| d.index).collect();
    info!(image = %session.image, annotations = store.len(), "replay finished");
    Ok(Report {
        image: session.image.to_string(),
        annotations: store.annotations().to_vec(),
        selected: store.selected_annotation_id(),
        detection_actions: store.detection_actions().clone(),
        visible_detections,
        refused_steps,
        no_tag_steps,
    })
}

fn find_detection(session: &Session, step: usize, index: usize) -> Result<&Detection, ReplayError> {
    session
        .detections
        .iter()
        .find(|d| d.index == index)
        .ok_or(ReplayError::UnknownDetection { step, index })
}

fn find_annotation(store: &ImageAnnotations, step: usize, index: usize) -> Result<AnnotationId, ReplayError> {
    store
        .annotations()
        .iter()
        .find(|a| a.index == index)
        .map(|a| a.id)
        .ok_or(ReplayError::UnknownAnnotation { step, index })
}
