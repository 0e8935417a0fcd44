//! Chart parameter model.
//!
//! Mode-specific selections live in [`ModeParams`]; everything else is shared in
//! [`CommonParams`]. The auto-fill rules in [`ParameterModel::apply_metadata`]
//! only ever write into fields that are currently empty.

use crate::model::{ColumnMetadata, ExportFormat, LegendLoc, PlotMode};
use serde::Serialize;
use std::collections::BTreeSet;

const DEFAULT_FIGSIZE_CM: FigureSize = FigureSize {
    width_cm: 16.0,
    height_cm: 9.0,
};
const DEFAULT_DPI: u32 = 120;
const DEFAULT_LINEWIDTH: f64 = 2.0;
const DEFAULT_TITLE_PAD: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FigureSize {
    pub width_cm: f64,
    pub height_cm: f64,
}

/// Raw axis-limit input as typed by the user. Either end may be blank.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AxisLimitsInput {
    pub low: Option<String>,
    pub high: Option<String>,
}

impl AxisLimitsInput {
    pub fn new(low: Option<&str>, high: Option<&str>) -> Self {
        Self {
            low: low.map(str::to_string),
            high: high.map(str::to_string),
        }
    }

    pub fn from_values(low: Option<f64>, high: Option<f64>) -> Self {
        Self {
            low: low.map(|v| v.to_string()),
            high: high.map(|v| v.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmoothingKind {
    #[default]
    None,
    Savgol,
    MovingAverage,
}

/// Smoothing choice. Sub-parameters for both filters are kept so switching
/// back and forth does not lose what was typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Smoothing {
    pub kind: SmoothingKind,
    pub savgol_window: u32,
    pub savgol_polyorder: u32,
    pub moving_average_k: u32,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            kind: SmoothingKind::None,
            savgol_window: 11,
            savgol_polyorder: 3,
            moving_average_k: 5,
        }
    }
}

/// Column selections for the active chart family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ModeParams {
    Timeseries {
        time_col: Option<String>,
        series_cols: Vec<String>,
        labels: Vec<String>,
    },
    Hysteresis {
        x_col: Option<String>,
        y_cols: Vec<String>,
        labels: Vec<String>,
    },
}

impl ModeParams {
    pub fn empty(mode: PlotMode) -> Self {
        match mode {
            PlotMode::Timeseries => ModeParams::Timeseries {
                time_col: None,
                series_cols: Vec::new(),
                labels: Vec::new(),
            },
            PlotMode::Hysteresis => ModeParams::Hysteresis {
                x_col: None,
                y_cols: Vec::new(),
                labels: Vec::new(),
            },
        }
    }

    pub fn mode(&self) -> PlotMode {
        match self {
            ModeParams::Timeseries { .. } => PlotMode::Timeseries,
            ModeParams::Hysteresis { .. } => PlotMode::Hysteresis,
        }
    }

    /// The plotted columns: series columns or y columns.
    pub fn selection(&self) -> &[String] {
        match self {
            ModeParams::Timeseries { series_cols, .. } => series_cols,
            ModeParams::Hysteresis { y_cols, .. } => y_cols,
        }
    }

    /// The axis column: time column or x column.
    pub fn axis_column(&self) -> Option<&str> {
        match self {
            ModeParams::Timeseries { time_col, .. } => time_col.as_deref(),
            ModeParams::Hysteresis { x_col, .. } => x_col.as_deref(),
        }
    }

    pub fn labels(&self) -> &[String] {
        match self {
            ModeParams::Timeseries { labels, .. } | ModeParams::Hysteresis { labels, .. } => {
                labels
            }
        }
    }

    fn parts_mut(&mut self) -> (&mut Option<String>, &mut Vec<String>, &mut Vec<String>) {
        match self {
            ModeParams::Timeseries {
                time_col,
                series_cols,
                labels,
            } => (time_col, series_cols, labels),
            ModeParams::Hysteresis {
                x_col,
                y_cols,
                labels,
            } => (x_col, y_cols, labels),
        }
    }
}

/// Mode-independent fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonParams {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub legend_loc: LegendLoc,
    pub figsize: FigureSize,
    pub dpi: u32,
    /// Major tick step; `None` leaves the axis on auto.
    pub x_major: Option<f64>,
    pub y_major: Option<f64>,
    pub show_minor_grid: bool,
    pub linewidth: f64,
    pub zero_baseline: bool,
    pub zero_axes: bool,
    pub equal_aspect: bool,
    pub annotate_peaks: bool,
    pub metrics_box: bool,
    pub bottom_indicator: bool,
    pub title_pad: f64,
    pub xlim: AxisLimitsInput,
    pub ylim: AxisLimitsInput,
    pub smoothing: Smoothing,
    pub export_formats: BTreeSet<ExportFormat>,
    pub filename_base: String,
    pub save_dir: String,
}

impl Default for CommonParams {
    fn default() -> Self {
        Self {
            title: String::new(),
            xlabel: String::new(),
            ylabel: String::new(),
            legend_loc: LegendLoc::UpperRight,
            figsize: DEFAULT_FIGSIZE_CM,
            dpi: DEFAULT_DPI,
            x_major: None,
            y_major: None,
            show_minor_grid: true,
            linewidth: DEFAULT_LINEWIDTH,
            zero_baseline: true,
            zero_axes: true,
            equal_aspect: false,
            annotate_peaks: false,
            metrics_box: false,
            bottom_indicator: false,
            title_pad: DEFAULT_TITLE_PAD,
            xlim: AxisLimitsInput::default(),
            ylim: AxisLimitsInput::default(),
            smoothing: Smoothing::default(),
            export_formats: [ExportFormat::Png, ExportFormat::Pdf, ExportFormat::Svg]
                .into_iter()
                .collect(),
            filename_base: String::new(),
            save_dir: String::new(),
        }
    }
}

/// A single user edit. Column edits are validated by the workflow against the
/// cached metadata before they reach the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamEdit {
    Title(String),
    XLabel(String),
    YLabel(String),
    Legend(LegendLoc),
    FigureSize { width_cm: f64, height_cm: f64 },
    Dpi(u32),
    XMajor(Option<f64>),
    YMajor(Option<f64>),
    ShowMinorGrid(bool),
    LineWidth(f64),
    ZeroBaseline(bool),
    ZeroAxes(bool),
    EqualAspect(bool),
    AnnotatePeaks(bool),
    MetricsBox(bool),
    BottomIndicator(bool),
    TitlePad(f64),
    XLimits(AxisLimitsInput),
    YLimits(AxisLimitsInput),
    Smoothing(Smoothing),
    ExportFormats(BTreeSet<ExportFormat>),
    FilenameBase(String),
    SaveDir(String),
    TimeColumn(Option<String>),
    SeriesColumns(Vec<String>),
    XColumn(Option<String>),
    YColumns(Vec<String>),
    /// Keystroke-level label text; not split until [`ParamEdit::CommitLabels`].
    LabelsText(String),
    CommitLabels,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterModel {
    pub common: CommonParams,
    mode: ModeParams,
    labels_draft: Option<String>,
}

impl Default for ParameterModel {
    fn default() -> Self {
        Self {
            common: CommonParams::default(),
            mode: ModeParams::empty(PlotMode::Timeseries),
            labels_draft: None,
        }
    }
}

/// Split committed label text on commas, trimming each piece.
pub fn split_labels(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Make `labels` match `cols` positionally: copy when empty, otherwise
/// truncate or pad with the column names.
pub fn align_labels(labels: &[String], cols: &[String]) -> Vec<String> {
    if labels.is_empty() {
        return cols.to_vec();
    }
    cols.iter()
        .enumerate()
        .map(|(i, col)| labels.get(i).cloned().unwrap_or_else(|| col.clone()))
        .collect()
}

impl ParameterModel {
    pub fn mode(&self) -> PlotMode {
        self.mode.mode()
    }

    pub fn mode_params(&self) -> &ModeParams {
        &self.mode
    }

    /// Restore the default snapshot verbatim.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Switch chart family. Selections never carry over; returns whether the
    /// mode actually changed.
    pub fn set_mode(&mut self, mode: PlotMode) -> bool {
        if self.mode() == mode {
            return false;
        }
        self.mode = ModeParams::empty(mode);
        self.labels_draft = None;
        true
    }

    /// Drop column-derived selections, keeping the shared appearance fields.
    pub fn clear_selections(&mut self) {
        self.mode = ModeParams::empty(self.mode());
        self.labels_draft = None;
    }

    /// Label text as the presentation should display it.
    pub fn labels_text(&self) -> String {
        match &self.labels_draft {
            Some(draft) => draft.clone(),
            None => self.mode.labels().join(", "),
        }
    }

    pub fn has_pending_labels(&self) -> bool {
        self.labels_draft.is_some()
    }

    /// Apply metadata from a freshly selected sheet (or re-apply after a mode
    /// toggle): prune selections the sheet cannot satisfy, then fill whatever
    /// is empty.
    pub fn apply_metadata(&mut self, meta: &ColumnMetadata) {
        self.prune_to(meta);

        match &mut self.mode {
            ModeParams::Timeseries {
                time_col,
                series_cols,
                labels,
            } => {
                if time_col.is_none() {
                    if let Some(first) = meta.time_candidates.first() {
                        *time_col = Some(first.clone());
                    }
                }
                if series_cols.is_empty() {
                    *series_cols = meta
                        .numeric
                        .iter()
                        .filter(|c| Some(c.as_str()) != time_col.as_deref())
                        .take(2)
                        .cloned()
                        .collect();
                    *labels = series_cols.clone();
                }
            }
            ModeParams::Hysteresis { x_col, y_cols, .. } => {
                if x_col.is_none() {
                    *x_col = meta.numeric.first().cloned();
                }
                // Second and third numeric columns, never the x column itself.
                if y_cols.is_empty() {
                    *y_cols = meta
                        .numeric
                        .iter()
                        .skip(1)
                        .take(2)
                        .filter(|c| Some(c.as_str()) != x_col.as_deref())
                        .cloned()
                        .collect();
                }
            }
        }

        let (_, cols, labels) = self.mode.parts_mut();
        let aligned = if cols.is_empty() {
            Vec::new()
        } else {
            align_labels(labels, cols)
        };
        *labels = aligned;
    }

    fn prune_to(&mut self, meta: &ColumnMetadata) {
        let (axis, cols, labels) = self.mode.parts_mut();

        if let Some(name) = axis.as_deref() {
            if !meta.columns.iter().any(|c| c == name) {
                log::info!("dropping axis column {name:?}: not present on sheet {:?}", meta.sheet);
                *axis = None;
            }
        }

        let keep: Vec<bool> = cols.iter().map(|c| meta.numeric.contains(c)).collect();
        if keep.iter().all(|k| *k) {
            return;
        }
        let positional = labels.len() == cols.len();
        let mut idx = 0;
        cols.retain(|c| {
            let k = keep[idx];
            idx += 1;
            if !k {
                log::info!("dropping column {c:?}: not numeric on sheet {:?}", meta.sheet);
            }
            k
        });
        if positional {
            let mut idx = 0;
            labels.retain(|_| {
                let k = keep[idx];
                idx += 1;
                k
            });
        }
    }

    /// Replace the plotted columns. Labels that were just a copy of the old
    /// selection follow the new one; hand-typed labels are aligned.
    fn set_selection(&mut self, new_cols: Vec<String>) {
        let (_, cols, labels) = self.mode.parts_mut();
        let auto_labels = labels.is_empty() || labels == cols;
        *labels = if new_cols.is_empty() {
            Vec::new()
        } else if auto_labels {
            new_cols.clone()
        } else {
            align_labels(labels, &new_cols)
        };
        *cols = new_cols;
    }

    /// Apply an edit. Returns `false` when the edit does not fit the active
    /// mode (a time column on a hysteresis chart, for example).
    pub fn apply(&mut self, edit: ParamEdit) -> bool {
        let c = &mut self.common;
        match edit {
            ParamEdit::Title(v) => c.title = v,
            ParamEdit::XLabel(v) => c.xlabel = v,
            ParamEdit::YLabel(v) => c.ylabel = v,
            ParamEdit::Legend(v) => c.legend_loc = v,
            ParamEdit::FigureSize {
                width_cm,
                height_cm,
            } => {
                c.figsize = FigureSize {
                    width_cm,
                    height_cm,
                }
            }
            ParamEdit::Dpi(v) => c.dpi = v,
            ParamEdit::XMajor(v) => c.x_major = v,
            ParamEdit::YMajor(v) => c.y_major = v,
            ParamEdit::ShowMinorGrid(v) => c.show_minor_grid = v,
            ParamEdit::LineWidth(v) => c.linewidth = v,
            ParamEdit::ZeroBaseline(v) => c.zero_baseline = v,
            ParamEdit::ZeroAxes(v) => c.zero_axes = v,
            ParamEdit::EqualAspect(v) => c.equal_aspect = v,
            ParamEdit::AnnotatePeaks(v) => c.annotate_peaks = v,
            ParamEdit::MetricsBox(v) => c.metrics_box = v,
            ParamEdit::BottomIndicator(v) => c.bottom_indicator = v,
            ParamEdit::TitlePad(v) => c.title_pad = v,
            ParamEdit::XLimits(v) => c.xlim = v,
            ParamEdit::YLimits(v) => c.ylim = v,
            ParamEdit::Smoothing(v) => c.smoothing = v,
            ParamEdit::ExportFormats(v) => c.export_formats = v,
            ParamEdit::FilenameBase(v) => c.filename_base = v,
            ParamEdit::SaveDir(v) => c.save_dir = v,
            ParamEdit::TimeColumn(v) => match &mut self.mode {
                ModeParams::Timeseries { time_col, .. } => *time_col = v,
                ModeParams::Hysteresis { .. } => return false,
            },
            ParamEdit::XColumn(v) => match &mut self.mode {
                ModeParams::Hysteresis { x_col, .. } => *x_col = v,
                ModeParams::Timeseries { .. } => return false,
            },
            ParamEdit::SeriesColumns(v) => {
                if self.mode() != PlotMode::Timeseries {
                    return false;
                }
                self.set_selection(v);
            }
            ParamEdit::YColumns(v) => {
                if self.mode() != PlotMode::Hysteresis {
                    return false;
                }
                self.set_selection(v);
            }
            ParamEdit::LabelsText(text) => self.labels_draft = Some(text),
            ParamEdit::CommitLabels => self.commit_labels(),
        }
        true
    }

    /// Coerce pending label text into the label sequence, aligned to the
    /// current selection. Blank text clears the labels.
    pub fn commit_labels(&mut self) {
        if let Some(text) = self.labels_draft.take() {
            let (_, cols, labels) = self.mode.parts_mut();
            let split = split_labels(&text);
            *labels = if split.is_empty() {
                split
            } else {
                align_labels(&split, cols)
            };
        }
    }
}
