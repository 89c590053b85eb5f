use imageproc::point::Point;
use num_traits::{Num, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounds in pixel units.
///
/// Edges are pixel boundaries: a single pixel at `(3, 5)` spans
/// `left = 3, right = 4, top = 5, bottom = 6`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Box of `width` x `height` pixels with its top-left corner at `(left, top)`.
    pub fn at(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self::new(left, top, left + width, top + height)
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// Closed-interval test on the x ranges; touching edges count as overlap.
    pub fn overlaps_x(&self, other: &BoundingBox) -> bool {
        !(other.right < self.left || other.left > self.right)
    }

    /// Area shared by the two boxes, `0` when disjoint.
    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        let w = self.right.min(other.right) - self.left.max(other.left);
        let h = self.bottom.min(other.bottom) - self.top.max(other.top);
        if w <= 0.0 || h <= 0.0 { 0.0 } else { w * h }
    }

    /// Half-open containment: left/top edges inside, right/bottom edges outside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Calculates the axis-aligned bounds of a set of vertices.
///
/// Generic over numeric point types that only implement `PartialOrd`, so both
/// integer contour points and floating point polygon vertices are accepted.
/// Returns `None` for an empty slice.
///
/// # Examples
///
/// ```
/// use imageproc::point::Point;
/// use cell_counter::rect::bounding_box_of;
///
/// let diamond = [
///     Point { x: 50.0, y: 10.0 },
///     Point { x: 90.0, y: 50.0 },
///     Point { x: 50.0, y: 90.0 },
///     Point { x: 10.0, y: 50.0 },
/// ];
///
/// let bounds = bounding_box_of(&diamond).unwrap();
///
/// assert_eq!(bounds.left, 10.0);
/// assert_eq!(bounds.top, 10.0);
/// assert_eq!(bounds.width(), 80.0);
/// assert_eq!(bounds.height(), 80.0);
/// ```
pub fn bounding_box_of<T>(vertices: &[Point<T>]) -> Option<BoundingBox>
where
    T: Copy + PartialOrd + Num + ToPrimitive,
{
    let (p0, rest) = vertices.split_first()?;
    let mut min_x = p0.x;
    let mut max_x = p0.x;
    let mut min_y = p0.y;
    let mut max_y = p0.y;

    // `T` is only `PartialOrd`, so no `min`/`max`.
    for p in rest {
        if p.x < min_x {
            min_x = p.x;
        }
        if p.x > max_x {
            max_x = p.x;
        }
        if p.y < min_y {
            min_y = p.y;
        }
        if p.y > max_y {
            max_y = p.y;
        }
    }

    Some(BoundingBox::new(
        min_x.to_f64().unwrap_or(0.0),
        min_y.to_f64().unwrap_or(0.0),
        max_x.to_f64().unwrap_or(0.0),
        max_y.to_f64().unwrap_or(0.0),
    ))
}
