use crate::geometry::Rect;
use std::sync::Arc;

/// One labeled box surfaced to the caller.
///
/// Produced fresh for every frame and never mutated afterwards. `label` shares
/// its allocation with the backend's [`crate::LabelTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Normalized `[0, 1]` frame coordinates, origin at the top-left of the source frame
    pub bounding_box: Rect,
    pub label: Arc<str>,
    /// Index into the label table the label was taken from
    pub class_index: usize,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bounding_box: Rect, label: Arc<str>, class_index: usize, confidence: f32) -> Self {
        Self {
            bounding_box,
            label,
            class_index,
            confidence,
        }
    }

    /// Same detection with the box flipped vertically, for displays whose
    /// vertical origin is at the bottom.
    pub fn flipped_vertically(&self) -> Self {
        let b = self.bounding_box;
        Self {
            bounding_box: Rect::new(b.x, 1.0 - b.max_y(), b.width, b.height),
            ..self.clone()
        }
    }
}
