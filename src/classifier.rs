use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::Embedding;

/// Name of a behavioral class, e.g. `touched`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Share of the nearest neighbours voting for each known label.
    pub confidences: BTreeMap<Label, f32>,
}

impl Prediction {
    pub fn confidence(&self) -> f32 {
        self.confidence_for(&self.label)
    }

    /// Labels the classifier has never seen score zero.
    pub fn confidence_for(&self, label: &Label) -> f32 {
        self.confidences.get(label).copied().unwrap_or(0.0)
    }
}

/// An incrementally trained classifier over embeddings.
pub trait Classifier {
    fn add_example(&mut self, embedding: Embedding, label: Label) -> Result<(), ClassifierError>;

    /// Fails with `ClassifierError::Empty` until at least one example exists.
    fn predict(&self, embedding: &Embedding) -> Result<Prediction, ClassifierError>;

    fn example_count(&self, label: &Label) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// KnnClassifier votes among the k stored examples with the highest cosine
/// similarity to the query. Examples are only ever appended.
#[derive(Clone, Debug)]
pub struct KnnClassifier {
    k: usize,
    examples: Vec<(Vec<f32>, Label)>,
    counts: BTreeMap<Label, usize>,
}

#[derive(Default)]
struct Votes {
    count: usize,
    similarity: f32,
}

impl KnnClassifier {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            examples: Vec::new(),
            counts: BTreeMap::new(),
        }
    }

    fn dimension(&self) -> Option<usize> {
        self.examples.first().map(|(values, _)| values.len())
    }

    fn check_dimension(&self, embedding: &Embedding) -> Result<(), ClassifierError> {
        match self.dimension() {
            Some(expected) if expected != embedding.len() => {
                Err(ClassifierError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Classifier for KnnClassifier {
    fn add_example(&mut self, embedding: Embedding, label: Label) -> Result<(), ClassifierError> {
        self.check_dimension(&embedding)?;
        *self.counts.entry(label.clone()).or_default() += 1;
        self.examples
            .push((normalize_l2(embedding.as_slice().to_vec()), label));
        Ok(())
    }

    fn predict(&self, embedding: &Embedding) -> Result<Prediction, ClassifierError> {
        if self.examples.is_empty() {
            return Err(ClassifierError::Empty);
        }
        self.check_dimension(embedding)?;

        let query = normalize_l2(embedding.as_slice().to_vec());
        let mut ranked: Vec<(f32, &Label)> = self
            .examples
            .iter()
            .map(|(values, label)| (cosine_similarity(&query, values), label))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let k = self.k.min(ranked.len());
        let mut votes: BTreeMap<&Label, Votes> = BTreeMap::new();
        for (similarity, label) in ranked.into_iter().take(k) {
            let entry = votes.entry(label).or_default();
            entry.count += 1;
            entry.similarity += similarity;
        }

        // Ties on vote count go to the label whose neighbours sit closer.
        let winner = votes
            .iter()
            .max_by(|a, b| {
                a.1.count
                    .cmp(&b.1.count)
                    .then(a.1.similarity.total_cmp(&b.1.similarity))
            })
            .map(|(label, _)| (*label).clone())
            .ok_or(ClassifierError::Empty)?;

        let confidences = self
            .counts
            .keys()
            .map(|label| {
                let count = votes.get(label).map(|v| v.count).unwrap_or(0);
                (label.clone(), count as f32 / k as f32)
            })
            .collect();

        Ok(Prediction {
            label: winner,
            confidences,
        })
    }

    fn example_count(&self, label: &Label) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}

fn normalize_l2(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm.is_finite() && norm > 0.0 {
        for value in &mut values {
            *value /= norm;
        }
    }
    values
}

/// Both inputs must already be unit length.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
