//! Historical seasonal baseline: mean trip count per (zone, week-hour).
//!
//! Fitted only on rows strictly before the training cutoff. Keys with no
//! training observations are absent from the lookup; serving falls back to
//! the global training mean, so an attached baseline is never missing.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::TripHourlyRow;
use crate::calendar::CalendarFeatures;
use crate::error::PipelineError;

/// One persisted baseline lookup row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub zone_id: i64,
    pub week_hour: u32,
    pub baseline_mean: f64,
}

/// Serving metadata stored next to the baseline lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMeta {
    pub baseline_global_mean: f64,
    pub zone_ids: Vec<i64>,
}

/// Fitted baseline: (zone, week-hour) means, the global fallback mean, and
/// the zone universe seen in training.
#[derive(Debug, Clone)]
pub struct BaselineModel {
    lookup: BTreeMap<(i64, u32), f64>,
    pub global_mean: f64,
    pub zone_ids: Vec<i64>,
}

impl BaselineModel {
    /// Fit from hourly trip counts. The training window is every row with
    /// `hour < max(hour) - cutoff_days`; an empty window is a fatal
    /// configuration error. The result depends only on the training window
    /// contents, not on row order.
    pub fn fit(rows: &[TripHourlyRow], cutoff_days: i64) -> Result<Self, PipelineError> {
        let max_hour = rows
            .iter()
            .map(|r| r.hour)
            .max()
            .ok_or(PipelineError::EmptyTrainingWindow)?;
        let cutoff = max_hour - Duration::days(cutoff_days);

        // Canonical accumulation order, so float sums never vary with input order.
        let mut train: Vec<&TripHourlyRow> = rows.iter().filter(|r| r.hour < cutoff).collect();
        train.sort_by_key(|r| (r.zone_id, r.hour));
        if train.is_empty() {
            return Err(PipelineError::EmptyTrainingWindow);
        }

        let mut sums: BTreeMap<(i64, u32), (f64, u64)> = BTreeMap::new();
        let mut global_sum = 0.0;
        for row in &train {
            let week_hour = CalendarFeatures::for_hour(&row.hour).week_hour;
            let acc = sums.entry((row.zone_id, week_hour)).or_insert((0.0, 0));
            acc.0 += row.trip_count as f64;
            acc.1 += 1;
            global_sum += row.trip_count as f64;
        }

        let global_mean = global_sum / train.len() as f64;
        let lookup: BTreeMap<(i64, u32), f64> = sums
            .into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect();

        let mut zone_ids: Vec<i64> = train.iter().map(|r| r.zone_id).collect();
        zone_ids.sort_unstable();
        zone_ids.dedup();

        Ok(Self {
            lookup,
            global_mean,
            zone_ids,
        })
    }

    /// Exact lookup value, if this (zone, week-hour) was seen in training.
    pub fn lookup(&self, zone_id: i64, week_hour: u32) -> Option<f64> {
        self.lookup.get(&(zone_id, week_hour)).copied()
    }

    /// Baseline for serving: the exact lookup value or the global mean.
    pub fn value(&self, zone_id: i64, week_hour: u32) -> f64 {
        self.lookup(zone_id, week_hour).unwrap_or(self.global_mean)
    }

    pub fn entries(&self) -> Vec<BaselineEntry> {
        self.lookup
            .iter()
            .map(|(&(zone_id, week_hour), &baseline_mean)| BaselineEntry {
                zone_id,
                week_hour,
                baseline_mean,
            })
            .collect()
    }

    pub fn meta(&self) -> BaselineMeta {
        BaselineMeta {
            baseline_global_mean: self.global_mean,
            zone_ids: self.zone_ids.clone(),
        }
    }

    /// Write the serving artifacts: the lookup CSV and the JSON metadata.
    pub fn save(&self, baseline_path: &Path, meta_path: &Path) -> Result<(), PipelineError> {
        crate::snapshot::write_rows(baseline_path, &self.entries())?;

        if let Some(parent) = meta_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let meta = serde_json::to_string_pretty(&self.meta())
            .map_err(|e| PipelineError::snapshot(meta_path, e))?;
        fs::write(meta_path, meta)?;

        info!(
            baseline = %baseline_path.display(),
            meta = %meta_path.display(),
            zones = self.zone_ids.len(),
            "saved baseline serving artifacts"
        );
        Ok(())
    }
}
