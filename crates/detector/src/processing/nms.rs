use crate::detection::Detection;

/// Greedy class-agnostic Non-Maximum Suppression.
///
/// Candidates are visited in descending confidence (stable, so equal scores
/// keep their input order) and kept unless their IoU with an already kept
/// detection exceeds `iou_threshold`. The result stays confidence-descending.
///
/// O(n²) in the number of candidates; callers filter by confidence first.
pub fn suppress(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept
            .iter()
            .any(|k| k.bounding_box.iou(&candidate.bounding_box) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }

    kept
}
