//! The trained-predictor boundary.
//!
//! The predictor is opaque: a feature matrix goes in, one float per row comes
//! out. Training happens elsewhere; serving and training share the versioned
//! feature schema below, and a loaded artifact is checked against it so a
//! silently re-ordered or re-encoded column cannot reach the model.

use std::fs;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Ordered serving columns and their categorical subset, shared with the
/// training collaborator. Categorical columns carry their raw integer values;
/// the category universes are the values themselves, so identical inputs
/// encode identically on both sides.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSchema {
    pub version: u32,
    pub columns: &'static [&'static str],
    pub categorical: &'static [&'static str],
}

pub const SCHEMA_V1: FeatureSchema = FeatureSchema {
    version: 1,
    columns: &[
        "zone_id",
        "week_hour",
        "month",
        "day_of_year",
        "week_of_year",
        "baseline_week_hour_mean",
        "temperature",
        "wind_speed",
        "relative_humidity",
        "precipitation",
        "is_rain",
        "is_weekend",
        "is_holiday",
    ],
    categorical: &["zone_id", "week_hour", "month", "week_of_year"],
};

/// Row-major feature matrix in schema column order.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    n_cols: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn with_capacity(schema: &FeatureSchema, rows: usize) -> Self {
        Self {
            n_cols: schema.columns.len(),
            data: Vec::with_capacity(rows * schema.columns.len()),
        }
    }

    pub fn push_row(&mut self, row: &[f64]) {
        assert_eq!(row.len(), self.n_cols, "feature row width mismatch");
        self.data.extend_from_slice(row);
    }

    pub fn n_rows(&self) -> usize {
        if self.n_cols == 0 {
            0
        } else {
            self.data.len() / self.n_cols
        }
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }
}

/// Opaque trained regression artifact: features in, one value per row out.
pub trait Predictor {
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;
}

/// A linear regression artifact loadable from a JSON file.
///
/// The model is trained on a log1p-transformed target; callers inverse the
/// transform on the way out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    /// Version for backward compatibility
    pub version: u32,
    pub model_type: String,
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    /// Current artifact version number
    pub const CURRENT_VERSION: u32 = 1;

    /// Load from a file and verify it lines up with the serving schema.
    pub fn load(path: &Path, schema: &FeatureSchema) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.to_path_buf()));
        }

        let raw = fs::read_to_string(path)?;
        let model: Self =
            serde_json::from_str(&raw).map_err(|e| PipelineError::snapshot(path, e))?;

        if model.version > Self::CURRENT_VERSION {
            return Err(PipelineError::SchemaMismatch(format!(
                "unsupported model version {} (expected <= {})",
                model.version,
                Self::CURRENT_VERSION
            )));
        }
        model.check_schema(schema)?;
        Ok(model)
    }

    fn check_schema(&self, schema: &FeatureSchema) -> Result<(), PipelineError> {
        let names_match = self.feature_names.len() == schema.columns.len()
            && self
                .feature_names
                .iter()
                .zip(schema.columns)
                .all(|(a, b)| a == b);
        if !names_match {
            return Err(PipelineError::SchemaMismatch(format!(
                "model features {:?} do not match serving schema v{} {:?}",
                self.feature_names, schema.version, schema.columns
            )));
        }
        if self.coefficients.len() != self.feature_names.len() {
            return Err(PipelineError::SchemaMismatch(format!(
                "{} coefficients for {} features",
                self.coefficients.len(),
                self.feature_names.len()
            )));
        }
        Ok(())
    }

    /// Save to a file, creating parent directories if needed.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::snapshot(path, e))?;
        fs::write(path, body)?;
        Ok(())
    }
}

impl Predictor for LinearModel {
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        if features.n_cols() != self.coefficients.len() {
            bail!(
                "feature matrix has {} columns, model expects {}",
                features.n_cols(),
                self.coefficients.len()
            );
        }

        let mut predictions = Vec::with_capacity(features.n_rows());
        for i in 0..features.n_rows() {
            let dot: f64 = features
                .row(i)
                .iter()
                .zip(&self.coefficients)
                .map(|(x, w)| x * w)
                .sum();
            predictions.push(dot + self.intercept);
        }
        Ok(predictions)
    }
}
