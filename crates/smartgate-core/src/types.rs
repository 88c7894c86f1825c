use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Face embedding vector (128-dimensional for FaceNet).
///
/// Only constructible through [`Embedding::new`], so every instance is
/// non-empty and finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, CoreError> {
        if values.is_empty() {
            return Err(CoreError::InvalidEmbedding("embedding is empty".into()));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(CoreError::InvalidEmbedding(format!(
                "component {pos} is not a finite number"
            )));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers are responsible for checking that dimensions agree; extra
    /// components on either side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Fail with [`CoreError::DimensionMismatch`] unless this embedding has `expected` components.
    pub fn ensure_dim(&self, expected: usize) -> Result<(), CoreError> {
        if self.dim() != expected {
            return Err(CoreError::DimensionMismatch {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Embedding {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            values: Vec<f32>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Embedding::new(raw.values).map_err(serde::de::Error::custom)
    }
}

/// Store-assigned identity of an enrolled face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(Uuid);

impl FaceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FaceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| CoreError::InvalidId(s.to_string()))
    }
}

/// Identity of a single attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttendanceId(Uuid);

impl AttendanceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AttendanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AttendanceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| CoreError::InvalidId(s.to_string()))
    }
}

/// An enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: FaceId,
    pub name: String,
    pub embedding: Embedding,
}

/// A sign-in event. `face_id` is a weak reference: the face may since have
/// been deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: AttendanceId,
    pub face_id: FaceId,
    pub timestamp: DateTime<Utc>,
}

/// Maximum Euclidean distance still considered the same identity.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Threshold(f32);

impl Threshold {
    pub fn new(value: f32) -> Result<Self, CoreError> {
        if !value.is_finite() || value < 0.0 {
            return Err(CoreError::InvalidThreshold(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// Inclusive: a distance exactly at the threshold is accepted.
    pub fn accepts(&self, distance: f32) -> bool {
        distance <= self.0
    }
}

/// The identity a query resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub id: FaceId,
    pub name: String,
    pub distance: f32,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Set only when the nearest record is within the threshold.
    pub face: Option<FaceMatch>,
    /// Distance to the nearest record, whether or not it verified.
    pub nearest_distance: Option<f32>,
    /// Number of gallery entries compared.
    pub candidates: usize,
}

impl MatchResult {
    pub fn verified(&self) -> bool {
        self.face.is_some()
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
///
/// The linear scan below is the baseline; an approximate index can stand in
/// as long as it honours the same tie-break and threshold rules.
pub trait Matcher: Send + Sync {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[FaceRecord],
        threshold: Threshold,
    ) -> Result<MatchResult, CoreError>;
}

/// Brute-force Euclidean nearest neighbour.
///
/// O(n·d). A record replaces the running best only when strictly closer, so
/// ties resolve to the earliest record in gallery order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[FaceRecord],
        threshold: Threshold,
    ) -> Result<MatchResult, CoreError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, record) in gallery.iter().enumerate() {
            record.embedding.ensure_dim(probe.dim())?;
            let distance = probe.euclidean_distance(&record.embedding);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((i, distance)),
            }
        }

        let face = match best {
            Some((idx, distance)) if threshold.accepts(distance) => Some(FaceMatch {
                id: gallery[idx].id,
                name: gallery[idx].name.clone(),
                distance,
            }),
            _ => None,
        };

        Ok(MatchResult {
            face,
            nearest_distance: best.map(|(_, d)| d),
            candidates: gallery.len(),
        })
    }
}
