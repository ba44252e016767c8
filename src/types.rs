use serde::{Deserialize, Serialize};

/// Number of points in a complete face mesh.
pub const MESH_POINT_COUNT: usize = 468;

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Linear blend: `weight` of `self` plus `1 - weight` of `other`.
    pub fn blend(&self, other: &Point, weight: f32) -> Point {
        Point::new(
            weight * self.x + (1.0 - weight) * other.x,
            weight * self.y + (1.0 - weight) * other.y,
        )
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::AddAssign for Point {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Mul<f32> for Point {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

/// Width and height of an image or view, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> f32 {
        self.width as f32 * self.height as f32
    }

    /// Width over height, or `None` for a degenerate size.
    pub fn aspect_ratio(&self) -> Option<f32> {
        if self.is_empty() {
            None
        } else {
            Some(self.width as f32 / self.height as f32)
        }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A bounding box defined by top-left corner, width, and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Smallest box enclosing all `points`, or `None` if there are none.
    pub fn enclosing<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in iter {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Convert a point from normalized coordinates [0,1] to image coordinates
    /// within this bounding box.
    pub fn denormalize_point(&self, p: Point) -> Point {
        Point::new(self.x + p.x * self.width, self.y + p.y * self.height)
    }
}

/// One face-mesh point. `x`/`y` are image pixels, `z` is relative depth
/// (smaller is closer to the camera), not metric depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub index: usize,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(index: usize, x: f32, y: f32, z: f32) -> Self {
        Self { index, x, y, z }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// All landmarks of one detected face in one frame, plus the box used to locate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub landmarks: Vec<Landmark>,
    pub bounding_box: BoundingBox,
}

impl LandmarkSet {
    pub fn new(landmarks: Vec<Landmark>, bounding_box: BoundingBox) -> Self {
        Self {
            landmarks,
            bounding_box,
        }
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Whether this set satisfies the full-mesh contract required for analysis.
    pub fn is_complete(&self) -> bool {
        self.landmarks.len() == MESH_POINT_COUNT
    }

    /// Look up a landmark by its mesh index.
    pub fn get(&self, index: usize) -> Option<&Landmark> {
        match self.landmarks.get(index) {
            Some(l) if l.index == index => Some(l),
            _ => self.landmarks.iter().find(|l| l.index == index),
        }
    }

    pub fn point(&self, index: usize) -> Option<Point> {
        self.get(index).map(Landmark::point)
    }

    /// Landmarks for `indices`, skipping any that are missing.
    pub fn select(&self, indices: &[usize]) -> Vec<Landmark> {
        indices.iter().filter_map(|&i| self.get(i).copied()).collect()
    }

    pub fn mean_z(&self) -> Option<f32> {
        crate::metrics::mean_z(&self.landmarks)
    }

    /// Map every landmark `(x, y, z)` through `f`. The bounding box corners are
    /// mapped too and re-enclosed, so flips and scales keep it consistent.
    pub fn map_coordinates<F>(&self, f: F) -> Self
    where
        F: Fn(f32, f32, f32) -> (f32, f32, f32),
    {
        let landmarks = self
            .landmarks
            .iter()
            .map(|l| {
                let (x, y, z) = f(l.x, l.y, l.z);
                Landmark::new(l.index, x, y, z)
            })
            .collect();
        let b = &self.bounding_box;
        let corners: Vec<Point> = [
            (b.x, b.y),
            (b.right(), b.y),
            (b.x, b.bottom()),
            (b.right(), b.bottom()),
        ]
        .iter()
        .map(|&(x, y)| {
            let (x, y, _) = f(x, y, 0.0);
            Point::new(x, y)
        })
        .collect();
        let bounding_box = BoundingBox::enclosing(&corners).unwrap_or(self.bounding_box);
        Self::new(landmarks, bounding_box)
    }
}

/// One detection pass over one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    pub timestamp_ms: u64,
    pub faces: Vec<LandmarkSet>,
    pub image_size: ImageSize,
}

impl DetectionFrame {
    pub fn new(timestamp_ms: u64, faces: Vec<LandmarkSet>, image_size: ImageSize) -> Self {
        Self {
            timestamp_ms,
            faces,
            image_size,
        }
    }

    pub fn primary_face(&self) -> Option<&LandmarkSet> {
        self.faces.first()
    }
}
