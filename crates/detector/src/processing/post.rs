use crate::backend::ModelOutputs;
use crate::detection::Detection;
use crate::geometry::Rect;
use crate::labels::LabelTable;
use crate::processing::nms::suppress;
use ndarray::{ArrayView2, ArrayView3, ArrayViewD, Axis, Ix2, Ix3};
use thiserror::Error;

/// Box encoding shared by both layouts: `(y_min, x_min, y_max, x_max)`.
const BOX_COORDS: usize = 4;

/// Model output does not match the layout the decoder was configured for.
///
/// Distinct from a legitimate empty result: a well-formed tensor with no
/// confident anchors decodes to `Ok(vec![])`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing model output: expected one of {aliases:?}")]
    MissingOutput { aliases: Vec<String> },

    #[error("{tensor} tensor has rank {actual}, expected {expected}")]
    Rank {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{tensor} tensor has shape {actual:?}, expected {expected}")]
    Shape {
        tensor: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("scores cover {scores} entries but boxes cover {boxes}")]
    CountMismatch { scores: usize, boxes: usize },

    #[error("score tensor has no foreground classes ({classes} total)")]
    NoForegroundClasses { classes: usize },
}

/// Output layout of a detection model, with the parameters its decoder needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// Dense SSD-style output: scores `[1, anchors, classes]` with class 0 as
    /// background, boxes `[1, anchors, 4]`.
    AnchorGrid,
    /// Model-filtered list: scores `[detections, classes]` without a
    /// background class, boxes `[detections, 4]`. `label_offset` maps model
    /// class indices into a label table that reserves leading entries.
    PrefilteredList { label_offset: usize },
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::AnchorGrid => "anchor-grid",
            Architecture::PrefilteredList { .. } => "prefiltered-list",
        }
    }

    /// Conventional square input side for this layout.
    pub fn default_input_size(&self) -> u32 {
        match self {
            Architecture::AnchorGrid => 300,
            Architecture::PrefilteredList { .. } => 416,
        }
    }
}

/// Names a score or box tensor may be published under, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    pub scores: Vec<String>,
    pub boxes: Vec<String>,
}

impl OutputNames {
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.scores.iter().chain(self.boxes.iter()).map(String::as_str)
    }
}

impl Default for OutputNames {
    fn default() -> Self {
        Self {
            scores: vec!["confidence".to_string(), "scores".to_string()],
            boxes: vec!["coordinates".to_string(), "boxes".to_string()],
        }
    }
}

pub struct PostProcessor {
    pub architecture: Architecture,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl PostProcessor {
    pub fn new(architecture: Architecture, confidence_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            architecture,
            confidence_threshold,
            iou_threshold,
        }
    }

    /// Resolve the named tensors and decode them with the configured layout.
    #[tracing::instrument(skip_all, fields(architecture = self.architecture.as_str()))]
    pub fn process(
        &self,
        outputs: &ModelOutputs,
        names: &OutputNames,
        labels: &LabelTable,
    ) -> Result<Vec<Detection>, DecodeError> {
        let scores = lookup(outputs, &names.scores)?;
        let boxes = lookup(outputs, &names.boxes)?;
        self.decode(&scores, &boxes, labels)
    }

    pub fn decode(
        &self,
        scores: &ArrayViewD<f32>,
        boxes: &ArrayViewD<f32>,
        labels: &LabelTable,
    ) -> Result<Vec<Detection>, DecodeError> {
        let candidates = match self.architecture {
            Architecture::AnchorGrid => {
                decode_anchor_grid(scores, boxes, labels, self.confidence_threshold)?
            }
            Architecture::PrefilteredList { label_offset } => decode_prefiltered_list(
                scores,
                boxes,
                labels,
                self.confidence_threshold,
                label_offset,
            )?,
        };

        let candidate_count = candidates.len();
        let kept = suppress(candidates, self.iou_threshold);

        tracing::trace!(candidate_count, kept = kept.len(), "Decoded detections");
        Ok(kept)
    }
}

fn lookup<'a>(
    outputs: &'a ModelOutputs,
    aliases: &[String],
) -> Result<ArrayViewD<'a, f32>, DecodeError> {
    outputs
        .find_any(aliases)
        .map(|(_, view)| view)
        .ok_or_else(|| DecodeError::MissingOutput {
            aliases: aliases.to_vec(),
        })
}

/// Per-anchor candidates from a dense `[1, anchors, classes]` score grid.
///
/// Class 0 is background and never selected. Anchors whose best foreground
/// score is below `threshold` contribute nothing. No suppression is applied.
pub fn decode_anchor_grid(
    scores: &ArrayViewD<f32>,
    boxes: &ArrayViewD<f32>,
    labels: &LabelTable,
    threshold: f32,
) -> Result<Vec<Detection>, DecodeError> {
    let scores = batched_view("scores", scores)?;
    let boxes = batched_view("boxes", boxes)?;

    let num_classes = scores.len_of(Axis(1));
    if num_classes < 2 {
        return Err(DecodeError::NoForegroundClasses {
            classes: num_classes,
        });
    }

    decode_rows(scores, boxes, 1, 0, labels, threshold)
}

/// Per-detection candidates from a `[detections, classes]` score list.
///
/// Every class index is eligible; the label is looked up at
/// `class + label_offset`. A leading batch axis of 1 is accepted and dropped.
pub fn decode_prefiltered_list(
    scores: &ArrayViewD<f32>,
    boxes: &ArrayViewD<f32>,
    labels: &LabelTable,
    threshold: f32,
    label_offset: usize,
) -> Result<Vec<Detection>, DecodeError> {
    let scores = list_view("scores", scores)?;
    let boxes = list_view("boxes", boxes)?;

    let num_classes = scores.len_of(Axis(1));
    if num_classes == 0 {
        return Err(DecodeError::NoForegroundClasses { classes: 0 });
    }

    decode_rows(scores, boxes, 0, label_offset, labels, threshold)
}

/// Validate a `[1, n, k]` tensor and drop its batch axis.
fn batched_view<'a>(
    tensor: &'static str,
    view: &ArrayViewD<'a, f32>,
) -> Result<ArrayView2<'a, f32>, DecodeError> {
    let view3: ArrayView3<f32> =
        view.clone()
            .into_dimensionality::<Ix3>()
            .map_err(|_| DecodeError::Rank {
                tensor,
                expected: 3,
                actual: view.ndim(),
            })?;

    if view3.len_of(Axis(0)) != 1 {
        return Err(DecodeError::Shape {
            tensor,
            expected: "batch size 1".to_string(),
            actual: view.shape().to_vec(),
        });
    }

    Ok(view3.index_axis_move(Axis(0), 0))
}

/// Validate a `[n, k]` tensor, tolerating a `[1, n, k]` batch wrapper.
fn list_view<'a>(
    tensor: &'static str,
    view: &ArrayViewD<'a, f32>,
) -> Result<ArrayView2<'a, f32>, DecodeError> {
    match view.ndim() {
        2 => view
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|_| DecodeError::Rank {
                tensor,
                expected: 2,
                actual: view.ndim(),
            }),
        3 if view.len_of(Axis(0)) == 1 => batched_view(tensor, view),
        actual => Err(DecodeError::Rank {
            tensor,
            expected: 2,
            actual,
        }),
    }
}

/// Shared arg-max / threshold / box-conversion loop over validated 2-D views.
///
/// `first_class` skips leading score columns (background); `label_offset` is
/// added to the winning column before the label lookup.
fn decode_rows(
    scores: ArrayView2<f32>,
    boxes: ArrayView2<f32>,
    first_class: usize,
    label_offset: usize,
    labels: &LabelTable,
    threshold: f32,
) -> Result<Vec<Detection>, DecodeError> {
    let rows = scores.len_of(Axis(0));
    if boxes.len_of(Axis(0)) != rows {
        return Err(DecodeError::CountMismatch {
            scores: rows,
            boxes: boxes.len_of(Axis(0)),
        });
    }
    if boxes.len_of(Axis(1)) != BOX_COORDS {
        return Err(DecodeError::Shape {
            tensor: "boxes",
            expected: format!("{} coordinates per box", BOX_COORDS),
            actual: boxes.shape().to_vec(),
        });
    }

    let mut candidates = Vec::new();

    for (row, (class_scores, coords)) in scores.outer_iter().zip(boxes.outer_iter()).enumerate() {
        let Some((class, confidence)) = arg_max(class_scores.iter().copied(), first_class) else {
            continue;
        };

        if confidence < threshold {
            continue;
        }

        // (y_min, x_min, y_max, x_max)
        let bounding_box = Rect::from_corners(coords[1], coords[0], coords[3], coords[2]);
        let (class_index, label) = labels.get_clamped(class.saturating_add(label_offset));

        tracing::trace!(row, class, confidence, "Candidate above threshold");

        candidates.push(Detection::new(
            bounding_box,
            label.clone(),
            class_index,
            confidence,
        ));
    }

    Ok(candidates)
}

/// Highest finite score at or after `first_class`; the first index wins ties.
fn arg_max(scores: impl Iterator<Item = f32>, first_class: usize) -> Option<(usize, f32)> {
    scores
        .enumerate()
        .skip(first_class)
        .filter(|(_, s)| s.is_finite())
        .fold(None, |best, (class, score)| match best {
            Some((_, best_score)) if score <= best_score => best,
            _ => Some((class, score)),
        })
}
