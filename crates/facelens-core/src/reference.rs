//! Reference set loading: one labelled image per known identity.
//!
//! Runs once at startup. Any entry that cannot be decoded or does not yield
//! exactly one usable face aborts the whole load; reference assets are
//! configuration, so there is no retry.

use crate::inference::{wait_until_loaded, Capabilities, DetectorOptions, FaceInference, InferenceError};
use crate::matcher::{FaceMatcher, MatcherError};
use crate::types::{Frame, ReferenceIdentity};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Labels shipped with the default reference set.
pub const DEFAULT_LABELS: [&str; 3] = ["Connor", "Quentin-Tarantino", "Samuel-L-Jackson"];

const LOAD_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("reference image for {label} not readable at {path}: {source}")]
    Image {
        label: String,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face detected for {label}")]
    NoFace { label: String },
    #[error("reference image for {label} contains {count} faces, expected exactly one")]
    AmbiguousFaces { label: String, count: usize },
    #[error("face detected for {label} but no descriptor was returned")]
    MissingDescriptor { label: String },
    #[error("inference failed for {label}: {source}")]
    Inference {
        label: String,
        #[source]
        source: InferenceError,
    },
    #[error("inference backend not ready: {0}")]
    Backend(#[source] InferenceError),
    #[error(transparent)]
    Matcher(#[from] MatcherError),
}

/// A (label, image path) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub label: String,
    pub path: PathBuf,
}

impl ReferenceEntry {
    /// Entries for `labels`, each resolved to `<dir>/<label>.<extension>`.
    pub fn from_labels<I, S>(dir: &Path, labels: I, extension: &str) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        labels
            .into_iter()
            .map(|label| {
                let label = label.as_ref();
                Self {
                    label: label.to_string(),
                    path: dir.join(format!("{label}.{extension}")),
                }
            })
            .collect()
    }
}

/// Knobs for [`load_reference_set`].
#[derive(Debug, Clone, Copy)]
pub struct ReferenceOptions {
    pub detector: DetectorOptions,
    /// Reject reference images with more than one face instead of taking
    /// the most confident one.
    pub strict: bool,
}

impl Default for ReferenceOptions {
    fn default() -> Self {
        Self {
            detector: DetectorOptions::default(),
            strict: true,
        }
    }
}

/// Decode and describe every entry, failing on the first bad one.
pub async fn load_reference_set(
    inference: &dyn FaceInference,
    entries: &[ReferenceEntry],
    options: &ReferenceOptions,
) -> Result<Vec<ReferenceIdentity>, ReferenceError> {
    if entries.is_empty() {
        tracing::warn!("reference set is empty; every face will be reported unknown");
        return Ok(Vec::new());
    }

    wait_until_loaded(inference, LOAD_POLL)
        .await
        .map_err(ReferenceError::Backend)?;

    let mut identities = Vec::with_capacity(entries.len());
    for entry in entries {
        let image = image::open(&entry.path).map_err(|source| ReferenceError::Image {
            label: entry.label.clone(),
            path: entry.path.clone(),
            source,
        })?;
        let frame = Frame::from_image(&image, 0);
        let identity = describe(inference, &entry.label, &frame, options).await?;
        tracing::info!(
            label = %identity.label,
            dims = identity.descriptor.len(),
            "reference face loaded"
        );
        identities.push(identity);
    }

    Ok(identities)
}

/// Load the reference set and wrap it in a matcher.
pub async fn build_matcher(
    inference: &dyn FaceInference,
    entries: &[ReferenceEntry],
    options: &ReferenceOptions,
    threshold: f32,
) -> Result<FaceMatcher, ReferenceError> {
    let identities = load_reference_set(inference, entries, options).await?;
    Ok(FaceMatcher::new(identities, threshold)?)
}

/// Run detection on one decoded reference frame and extract its descriptor.
pub async fn describe(
    inference: &dyn FaceInference,
    label: &str,
    frame: &Frame,
    options: &ReferenceOptions,
) -> Result<ReferenceIdentity, ReferenceError> {
    let inference_err = |source| ReferenceError::Inference {
        label: label.to_string(),
        source,
    };

    let face = if options.strict {
        let mut faces = inference
            .detect_all(frame, &options.detector, Capabilities::REFERENCE)
            .await
            .map_err(inference_err)?;
        match faces.len() {
            0 => None,
            1 => faces.pop(),
            count => {
                return Err(ReferenceError::AmbiguousFaces {
                    label: label.to_string(),
                    count,
                })
            }
        }
    } else {
        inference
            .detect_single(frame, &options.detector, Capabilities::REFERENCE)
            .await
            .map_err(inference_err)?
    };

    let face = face.ok_or_else(|| ReferenceError::NoFace {
        label: label.to_string(),
    })?;
    let descriptor = face.descriptor.ok_or_else(|| ReferenceError::MissingDescriptor {
        label: label.to_string(),
    })?;

    Ok(ReferenceIdentity {
        label: label.to_string(),
        descriptor,
    })
}
