/// A single label detected in an image.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub description: String,
    pub score: f64,
}

impl Label {
    /// Scores outside `[0, 1]` are clamped; NaN becomes 0.
    pub fn new(description: impl Into<String>, score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            description: description.into(),
            score,
        }
    }
}

/// Labels in the order the detector ranked them. Never re-sorted locally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationResult {
    pub labels: Vec<Label>,
}

impl AnnotationResult {
    pub fn new(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

impl FromIterator<Label> for AnnotationResult {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
