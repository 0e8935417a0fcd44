//! Snapshot a [`ParameterModel`] into the payload the rendering service accepts.
//!
//! The live model is never touched: every function here works on a clone.

use crate::model::{ExportFormat, LegendLoc, PlotMode};
use crate::params::{align_labels, AxisLimitsInput, ModeParams, ParameterModel, SmoothingKind};
use serde::{Serialize, Serializer};
use time::OffsetDateTime;

/// Resolution forced onto every preview request.
pub const PREVIEW_DPI: u32 = 120;
/// Resolution forced onto every export request.
pub const EXPORT_DPI: u32 = 600;

/// Optional toggles the presentation layer has opted into. Toggles for
/// capabilities that are off are left out of the payload entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, Serialize)]
pub struct Capabilities {
    #[serde(default)]
    pub metrics_box: bool,
    #[serde(default)]
    pub bottom_indicator: bool,
}

/// One end of an axis limit after sanitization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Value(f64),
    Unbounded,
}

impl Serialize for Bound {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Bound::Value(v) => s.serialize_f64(*v),
            Bound::Unbounded => s.serialize_none(),
        }
    }
}

fn parse_bound(raw: Option<&str>) -> Bound {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Bound::Unbounded;
    };
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Bound::Value(v),
        _ => {
            log::warn!("axis limit {text:?} is not a number, treating it as unbounded");
            Bound::Unbounded
        }
    }
}

/// Sanitize one axis. Both ends unbounded means no constraint at all.
pub fn normalize_limits(input: &AxisLimitsInput) -> Option<[Bound; 2]> {
    let pair = [
        parse_bound(input.low.as_deref()),
        parse_bound(input.high.as_deref()),
    ];
    match pair {
        [Bound::Unbounded, Bound::Unbounded] => None,
        _ => Some(pair),
    }
}

fn positive_step(step: Option<f64>) -> Option<f64> {
    step.filter(|s| s.is_finite() && *s > 0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnFields {
    Timeseries {
        time_col: String,
        series_cols: Vec<String>,
    },
    Hysteresis {
        x_col: String,
        y_cols: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SmoothKwargs {
    Savgol { window_length: u32, polyorder: u32 },
    MovingAverage { k: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportFields {
    pub export_formats: Vec<ExportFormat>,
    pub filename_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<String>,
}

/// Wire-safe parameter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderParams {
    #[serde(flatten)]
    pub columns: ColumnFields,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xlabel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ylabel: Option<String>,
    pub legend_loc: LegendLoc,
    pub figsize_cm: [f64; 2],
    pub dpi: u32,
    pub x_major: Option<f64>,
    pub y_major: Option<f64>,
    pub show_minor_grid: bool,
    pub linewidth: f64,
    pub zero_baseline: bool,
    pub zero_axes: bool,
    pub equal_aspect: bool,
    pub annotate_peaks: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_box: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom_indicator: Option<bool>,
    pub title_pad: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xlim: Option<[Bound; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ylim: Option<[Bound; 2]>,
    pub smooth: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smooth_kwargs: Option<SmoothKwargs>,
    #[serde(flatten)]
    pub export: Option<ExportFields>,
}

/// Everything one preview or export call sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    #[serde(rename = "file_id")]
    pub session_id: String,
    pub sheet: String,
    #[serde(rename = "plot_type")]
    pub mode: PlotMode,
    pub params: RenderParams,
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn snapshot(model: &ParameterModel, caps: Capabilities, dpi: u32) -> RenderParams {
    let mut model = model.clone();
    model.commit_labels();
    let c = &model.common;

    let (columns, cols) = match model.mode_params() {
        ModeParams::Timeseries {
            time_col,
            series_cols,
            ..
        } => (
            ColumnFields::Timeseries {
                time_col: time_col.clone().unwrap_or_default(),
                series_cols: series_cols.clone(),
            },
            series_cols,
        ),
        ModeParams::Hysteresis { x_col, y_cols, .. } => (
            ColumnFields::Hysteresis {
                x_col: x_col.clone().unwrap_or_default(),
                y_cols: y_cols.clone(),
            },
            y_cols,
        ),
    };
    let labels = if cols.is_empty() {
        Vec::new()
    } else {
        align_labels(model.mode_params().labels(), cols)
    };

    let (smooth, smooth_kwargs) = match c.smoothing.kind {
        SmoothingKind::None => (None, None),
        SmoothingKind::Savgol => (
            Some("savgol"),
            Some(SmoothKwargs::Savgol {
                window_length: c.smoothing.savgol_window,
                polyorder: c.smoothing.savgol_polyorder,
            }),
        ),
        SmoothingKind::MovingAverage => (
            Some("ma"),
            Some(SmoothKwargs::MovingAverage {
                k: c.smoothing.moving_average_k,
            }),
        ),
    };

    RenderParams {
        columns,
        labels,
        title: non_empty(&c.title),
        xlabel: non_empty(&c.xlabel),
        ylabel: non_empty(&c.ylabel),
        legend_loc: c.legend_loc,
        figsize_cm: [c.figsize.width_cm, c.figsize.height_cm],
        dpi,
        x_major: positive_step(c.x_major),
        y_major: positive_step(c.y_major),
        show_minor_grid: c.show_minor_grid,
        linewidth: c.linewidth,
        zero_baseline: c.zero_baseline,
        zero_axes: c.zero_axes,
        equal_aspect: c.equal_aspect,
        annotate_peaks: c.annotate_peaks,
        metrics_box: caps.metrics_box.then_some(c.metrics_box),
        bottom_indicator: caps.bottom_indicator.then_some(c.bottom_indicator),
        title_pad: c.title_pad,
        xlim: normalize_limits(&c.xlim),
        ylim: normalize_limits(&c.ylim),
        smooth,
        smooth_kwargs,
        export: None,
    }
}

/// Low-resolution snapshot for the interactive preview.
pub fn preview_params(model: &ParameterModel, caps: Capabilities) -> RenderParams {
    snapshot(model, caps, PREVIEW_DPI)
}

/// High-resolution snapshot for export. `now` stamps a filename stem when the
/// user left it empty.
pub fn export_params(
    model: &ParameterModel,
    caps: Capabilities,
    now: OffsetDateTime,
) -> RenderParams {
    let mut params = snapshot(model, caps, EXPORT_DPI);
    let c = &model.common;
    let filename_base = non_empty(&c.filename_base)
        .unwrap_or_else(|| synthesize_stem(model.mode(), now));
    params.export = Some(ExportFields {
        export_formats: c.export_formats.iter().copied().collect(),
        filename_base,
        save_dir: non_empty(&c.save_dir),
    });
    params
}

/// `<mode>_<YYYY-MM-DDHHMMSS>`: no colons or other time separators.
pub fn synthesize_stem(mode: PlotMode, now: OffsetDateTime) -> String {
    let fmt = time::macros::format_description!("[year]-[month]-[day][hour][minute][second]");
    let stamp = now
        .format(&fmt)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("{}_{}", mode.as_str(), stamp)
}
