use anyhow::Context;
use std::path::Path;
use std::sync::Arc;

/// COCO class names with "background" reserved at index 0.
const COCO_LABELS: [&str; 81] = [
    "background",
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Ordered, immutable class-name table shared by every decode call of a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<Arc<str>>,
}

impl LabelTable {
    pub fn new<I, S>(labels: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let labels: Vec<Arc<str>> = labels.into_iter().map(|s| Arc::from(s.as_ref())).collect();
        if labels.is_empty() {
            anyhow::bail!("Label table must contain at least one entry");
        }
        Ok(Self { labels })
    }

    /// Built-in COCO table, background first.
    pub fn coco() -> Self {
        Self {
            labels: COCO_LABELS.iter().map(|&s| Arc::from(s)).collect(),
        }
    }

    /// One label per line; surrounding whitespace trimmed, blank lines skipped.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read labels from {}", path.display()))?;
        let table = Self::parse(&text)?;
        tracing::info!(path = %path.display(), labels = table.len(), "Label table loaded");
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<str>> {
        self.labels.get(index)
    }

    /// Label at `index`, clamped to the last entry when out of range.
    /// Returns the clamped index alongside the label.
    pub fn get_clamped(&self, index: usize) -> (usize, &Arc<str>) {
        let index = index.min(self.labels.len() - 1);
        (index, &self.labels[index])
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::coco()
    }
}
