/// Axis-aligned rectangle as origin plus extent.
///
/// Detections use normalized `[0, 1]` coordinates, but nothing here assumes a
/// particular space: both operands of [`Rect::iou`] just have to share one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self::new(x_min, y_min, x_max - x_min, y_max - y_min)
    }

    #[inline]
    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    /// Area, with inverted extents counting as empty.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Overlapping region, or `None` when the rectangles only touch or are disjoint.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x_min = self.x.max(other.x);
        let y_min = self.y.max(other.y);
        let x_max = self.max_x().min(other.max_x());
        let y_max = self.max_y().min(other.max_y());

        if x_max > x_min && y_max > y_min {
            Some(Rect::from_corners(x_min, y_min, x_max, y_max))
        } else {
            None
        }
    }

    pub fn intersection_area(&self, other: &Rect) -> f32 {
        self.intersection(other).map_or(0.0, |r| r.area())
    }

    pub fn union_area(&self, other: &Rect) -> f32 {
        self.area() + other.area() - self.intersection_area(other)
    }

    /// Intersection-over-Union in `[0, 1]`; zero for disjoint or degenerate input.
    pub fn iou(&self, other: &Rect) -> f32 {
        intersection_over_union(self, other)
    }
}

/// Intersection-over-Union of two rectangles.
///
/// Returns exactly `0.0` when the rectangles do not overlap and when the union
/// has no area (both rectangles degenerate).
pub fn intersection_over_union(a: &Rect, b: &Rect) -> f32 {
    let intersection = a.intersection_area(b);
    if intersection <= 0.0 {
        return 0.0;
    }

    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}
