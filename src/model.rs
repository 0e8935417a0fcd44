use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Chart family. Each mode owns a disjoint set of column selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotMode {
    Timeseries,
    Hysteresis,
}

impl PlotMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlotMode::Timeseries => "timeseries",
            PlotMode::Hysteresis => "hysteresis",
        }
    }
}

impl fmt::Display for PlotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legend anchor, serialized with the collaborator's names ("upper right", ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LegendLoc {
    #[default]
    #[serde(rename = "upper right")]
    UpperRight,
    #[serde(rename = "upper left")]
    UpperLeft,
    #[serde(rename = "lower left")]
    LowerLeft,
    #[serde(rename = "lower right")]
    LowerRight,
    #[serde(rename = "upper center")]
    UpperCenter,
    #[serde(rename = "lower center")]
    LowerCenter,
    #[serde(rename = "center left")]
    CenterLeft,
    #[serde(rename = "center right")]
    CenterRight,
}

impl LegendLoc {
    pub const ALL: [LegendLoc; 8] = [
        LegendLoc::UpperRight,
        LegendLoc::UpperLeft,
        LegendLoc::LowerLeft,
        LegendLoc::LowerRight,
        LegendLoc::UpperCenter,
        LegendLoc::LowerCenter,
        LegendLoc::CenterLeft,
        LegendLoc::CenterRight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LegendLoc::UpperRight => "upper right",
            LegendLoc::UpperLeft => "upper left",
            LegendLoc::LowerLeft => "lower left",
            LegendLoc::LowerRight => "lower right",
            LegendLoc::UpperCenter => "upper center",
            LegendLoc::LowerCenter => "lower center",
            LegendLoc::CenterLeft => "center left",
            LegendLoc::CenterRight => "center right",
        }
    }

    /// Parse either the wire name or a dashed variant ("upper-right").
    pub fn parse(s: &str) -> Option<Self> {
        let wanted = s.trim().replace(['-', '_'], " ").to_lowercase();
        Self::ALL.into_iter().find(|loc| loc.as_str() == wanted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Pdf,
    Svg,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "pdf" => Some(ExportFormat::Pdf),
            "svg" => Some(ExportFormat::Svg),
            _ => None,
        }
    }
}

/// Per-sheet sniff the collaborator returns with an upload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SheetSniff {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub head: Vec<Vec<String>>,
}

/// Server-side handle to an uploaded workbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSession {
    pub session_id: String,
    pub sheets: Vec<String>,
    #[serde(default)]
    pub parse_hints: Option<BTreeMap<String, SheetSniff>>,
}

/// Column introspection for one (session, sheet) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub session_id: String,
    pub sheet: String,
    pub columns: Vec<String>,
    pub time_candidates: Vec<String>,
    pub numeric: Vec<String>,
}

/// Latest preview render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub image_ref: String,
}

/// Latest export: downloadable references plus an optional archive and image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExportResult {
    pub image_ref: Option<String>,
    pub file_refs: Vec<String>,
    pub archive_ref: Option<String>,
}

/// Collaborator operations sequenced by the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Upload,
    Columns,
    Preview,
    Export,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Upload,
        Operation::Columns,
        Operation::Preview,
        Operation::Export,
    ];

    /// Message shown when the collaborator rejects a call without saying why.
    pub fn default_failure(self) -> &'static str {
        match self {
            Operation::Upload => "Upload failed",
            Operation::Columns => "Failed to load columns",
            Operation::Preview => "Preview failed",
            Operation::Export => "Export failed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Upload => "upload",
            Operation::Columns => "columns",
            Operation::Preview => "preview",
            Operation::Export => "export",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// User-facing notification relayed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}
