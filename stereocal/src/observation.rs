use opencv::core::{Point2f, Point3f, Vector};

/// Accepted chessboard observations. Each entry holds the corners seen by
/// each of the `N` cameras in the same frame.
pub struct ObservationSet<const N: usize> {
    observations: Vec<[Vector<Point2f>; N]>,
}

impl<const N: usize> Default for ObservationSet<N> {
    fn default() -> Self {
        Self {
            observations: Vec::new(),
        }
    }
}

impl<const N: usize> ObservationSet<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, corners: [Vector<Point2f>; N]) {
        self.observations.push(corners);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Corners of camera `index` over all observations, in capture order.
    pub fn image_points(&self, index: usize) -> Vector<Vector<Point2f>> {
        self.observations
            .iter()
            .map(|corners| corners[index].clone())
            .collect()
    }

    /// The pattern's object points, repeated once per observation.
    pub fn object_points(&self, pattern: &Vector<Point3f>) -> Vector<Vector<Point3f>> {
        self.observations.iter().map(|_| pattern.clone()).collect()
    }
}
