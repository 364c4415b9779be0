//! JSON configuration and report helpers.

use crate::{AlignError, AlignParams, Alignment};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AlignParams {
    /// Load parameters from a JSON file; missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write these parameters to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Serializable digest of one [`Alignment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSummary {
    /// Free-form tag, e.g. `"blue_to_green"`.
    pub label: String,
    /// Row-major source-to-destination homography.
    pub homography: [[f64; 3]; 3],
    pub src_size: [usize; 2],
    pub dst_size: [usize; 2],
    pub num_src_keypoints: usize,
    pub num_dst_keypoints: usize,
    pub num_matches: usize,
    pub num_inliers: usize,
    pub rms_error: f64,
    pub iterations: usize,
    /// Source corners (TL, TR, BR, BL) in destination pixels.
    pub outline: [[f32; 2]; 4],
}

impl AlignmentSummary {
    pub fn new(label: impl Into<String>, alignment: &Alignment) -> Self {
        let est = &alignment.estimate;
        Self {
            label: label.into(),
            homography: est.homography.to_array(),
            src_size: [alignment.src_size.0, alignment.src_size.1],
            dst_size: [alignment.dst_size.0, alignment.dst_size.1],
            num_src_keypoints: alignment.src_keypoints.len(),
            num_dst_keypoints: alignment.dst_keypoints.len(),
            num_matches: alignment.matches.len(),
            num_inliers: est.inlier_count,
            rms_error: est.rms_error,
            iterations: est.iterations,
            outline: alignment.object_outline().map(|p| [p.x, p.y]),
        }
    }
}

/// Report written by the command-line tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignReport {
    pub command: String,
    pub inputs: Vec<String>,
    pub params: AlignParams,
    #[serde(default)]
    pub alignments: Vec<AlignmentSummary>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AlignReport {
    pub fn new(command: impl Into<String>, inputs: Vec<String>, params: &AlignParams) -> Self {
        Self {
            command: command.into(),
            inputs,
            params: params.clone(),
            alignments: Vec::new(),
            output_path: None,
            error: None,
        }
    }

    pub fn push_alignment(&mut self, label: impl Into<String>, alignment: &Alignment) {
        self.alignments.push(AlignmentSummary::new(label, alignment));
    }

    /// Record a failed run.
    pub fn set_error(&mut self, err: &AlignError) {
        self.error = Some(err.to_string());
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.alignments.is_empty()
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
