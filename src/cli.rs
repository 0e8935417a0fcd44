use anyhow::{Context, Result};
use clap::Parser;
use sheetplot::artifacts;
use sheetplot::config::{self, ClientConfig, FileConfig};
use sheetplot::model::{ExportFormat, ExportResult, LegendLoc, PlotMode};
use sheetplot::orchestrator::{spawn_controller, Command, ControllerHandle, WorkflowEvent};
use sheetplot::params::{AxisLimitsInput, ParamEdit, Smoothing, SmoothingKind};
use sheetplot::service::{HttpRenderService, UploadFile};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

fn parse_mode(s: &str) -> Result<PlotMode, String> {
    match s.trim().to_lowercase().as_str() {
        "timeseries" => Ok(PlotMode::Timeseries),
        "hysteresis" => Ok(PlotMode::Hysteresis),
        other => Err(format!("unknown mode {other:?} (timeseries, hysteresis)")),
    }
}

fn parse_legend(s: &str) -> Result<LegendLoc, String> {
    LegendLoc::parse(s).ok_or_else(|| format!("unknown legend position {s:?}"))
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    ExportFormat::parse(s).ok_or_else(|| format!("unknown format {s:?} (png, pdf, svg)"))
}

fn parse_smoothing(s: &str) -> Result<SmoothingKind, String> {
    match s.trim().to_lowercase().as_str() {
        "none" => Ok(SmoothingKind::None),
        "savgol" => Ok(SmoothingKind::Savgol),
        "ma" | "moving-average" => Ok(SmoothingKind::MovingAverage),
        other => Err(format!("unknown smoothing {other:?} (none, savgol, ma)")),
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "sheetplot",
    version,
    about = "Upload a workbook to a plotting service and render charts from it"
)]
pub struct Cli {
    /// Workbook to upload (.xlsx or .xls)
    pub workbook: PathBuf,

    /// Config file (defaults to <config dir>/sheetplot/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the plotting service
    #[arg(long)]
    pub base_url: Option<String>,

    /// Print the workbook's sheets and exit
    #[arg(long)]
    pub list_sheets: bool,

    /// Sheet to plot (defaults to the first sheet)
    #[arg(long)]
    pub sheet: Option<String>,

    /// Chart family: timeseries or hysteresis
    #[arg(long, default_value = "timeseries", value_parser = parse_mode)]
    pub mode: PlotMode,

    /// Time column (timeseries)
    #[arg(long)]
    pub time_col: Option<String>,

    /// Series columns, comma separated (timeseries)
    #[arg(long, value_delimiter = ',')]
    pub series: Vec<String>,

    /// X column (hysteresis)
    #[arg(long)]
    pub x_col: Option<String>,

    /// Y columns, comma separated (hysteresis)
    #[arg(long, value_delimiter = ',')]
    pub y: Vec<String>,

    /// Legend labels, comma separated, one per plotted column
    #[arg(long)]
    pub labels: Option<String>,

    /// Chart title
    #[arg(long)]
    pub title: Option<String>,

    /// X axis label
    #[arg(long)]
    pub xlabel: Option<String>,

    /// Y axis label
    #[arg(long)]
    pub ylabel: Option<String>,

    /// Legend position, e.g. "upper right" or lower-left
    #[arg(long, value_parser = parse_legend)]
    pub legend: Option<LegendLoc>,

    /// Figure width in centimeters
    #[arg(long)]
    pub width_cm: Option<f64>,

    /// Figure height in centimeters
    #[arg(long)]
    pub height_cm: Option<f64>,

    /// Major tick step on the x axis (auto when unset)
    #[arg(long)]
    pub x_major: Option<f64>,

    /// Major tick step on the y axis (auto when unset)
    #[arg(long)]
    pub y_major: Option<f64>,

    /// Use --minor-grid true or --minor-grid false to override
    #[arg(long, action = clap::ArgAction::Set)]
    pub minor_grid: Option<bool>,

    /// Line width
    #[arg(long)]
    pub linewidth: Option<f64>,

    /// Use --zero-baseline true or --zero-baseline false to override
    #[arg(long, action = clap::ArgAction::Set)]
    pub zero_baseline: Option<bool>,

    /// Use --zero-axes true or --zero-axes false to override
    #[arg(long, action = clap::ArgAction::Set)]
    pub zero_axes: Option<bool>,

    /// Force equal aspect ratio
    #[arg(long)]
    pub equal_aspect: bool,

    /// Annotate peaks
    #[arg(long)]
    pub annotate_peaks: bool,

    /// Title padding in points
    #[arg(long)]
    pub title_pad: Option<f64>,

    /// Lower x limit (blank for open)
    #[arg(long, allow_hyphen_values = true)]
    pub xmin: Option<String>,

    /// Upper x limit (blank for open)
    #[arg(long, allow_hyphen_values = true)]
    pub xmax: Option<String>,

    /// Lower y limit (blank for open)
    #[arg(long, allow_hyphen_values = true)]
    pub ymin: Option<String>,

    /// Upper y limit (blank for open)
    #[arg(long, allow_hyphen_values = true)]
    pub ymax: Option<String>,

    /// Smoothing: none, savgol or ma
    #[arg(long, value_parser = parse_smoothing)]
    pub smooth: Option<SmoothingKind>,

    /// Savitzky-Golay window length
    #[arg(long)]
    pub savgol_window: Option<u32>,

    /// Savitzky-Golay polynomial order
    #[arg(long)]
    pub savgol_polyorder: Option<u32>,

    /// Moving-average window
    #[arg(long)]
    pub ma_k: Option<u32>,

    /// Show the paired-curve metrics box (requires service support)
    #[arg(long)]
    pub metrics_box: bool,

    /// Show the bottom indicator (requires service support)
    #[arg(long)]
    pub bottom_indicator: bool,

    /// Render a preview and write it to this PNG file
    #[arg(long)]
    pub preview: Option<PathBuf>,

    /// Export the chart through the service
    #[arg(long)]
    pub export: bool,

    /// Export formats, comma separated (png, pdf, svg)
    #[arg(long, value_delimiter = ',', value_parser = parse_format)]
    pub formats: Vec<ExportFormat>,

    /// Export file name stem (defaults to <mode>_<timestamp>)
    #[arg(long)]
    pub name: Option<String>,

    /// Output directory on the service side
    #[arg(long)]
    pub save_dir: Option<String>,

    /// Download exported files into this directory
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Print a JSON summary instead of text
    #[arg(long)]
    pub json: bool,
}

/// Merge the config file with command-line overrides.
pub fn build_config(args: &Cli, file: FileConfig) -> ClientConfig {
    let mut cfg = file.into_client_config();
    if let Some(url) = &args.base_url {
        cfg.base_url = url.clone();
    }
    cfg.capabilities.metrics_box |= args.metrics_box;
    cfg.capabilities.bottom_indicator |= args.bottom_indicator;
    if let Some(dir) = &args.download_dir {
        cfg.download_dir = Some(dir.clone());
    }
    cfg
}

/// Edits implied by the flags, in the order they must be applied.
/// Column edits assume the mode has already been set.
pub fn build_edits(args: &Cli) -> Vec<ParamEdit> {
    let mut edits = Vec::new();
    match args.mode {
        PlotMode::Timeseries => {
            if let Some(col) = &args.time_col {
                edits.push(ParamEdit::TimeColumn(Some(col.clone())));
            }
            if !args.series.is_empty() {
                edits.push(ParamEdit::SeriesColumns(args.series.clone()));
            }
        }
        PlotMode::Hysteresis => {
            if let Some(col) = &args.x_col {
                edits.push(ParamEdit::XColumn(Some(col.clone())));
            }
            if !args.y.is_empty() {
                edits.push(ParamEdit::YColumns(args.y.clone()));
            }
        }
    }
    if let Some(text) = &args.labels {
        edits.push(ParamEdit::LabelsText(text.clone()));
        edits.push(ParamEdit::CommitLabels);
    }

    if let Some(v) = &args.title {
        edits.push(ParamEdit::Title(v.clone()));
    }
    if let Some(v) = &args.xlabel {
        edits.push(ParamEdit::XLabel(v.clone()));
    }
    if let Some(v) = &args.ylabel {
        edits.push(ParamEdit::YLabel(v.clone()));
    }
    if let Some(loc) = args.legend {
        edits.push(ParamEdit::Legend(loc));
    }
    if args.width_cm.is_some() || args.height_cm.is_some() {
        edits.push(ParamEdit::FigureSize {
            width_cm: args.width_cm.unwrap_or(16.0),
            height_cm: args.height_cm.unwrap_or(9.0),
        });
    }
    if args.x_major.is_some() {
        edits.push(ParamEdit::XMajor(args.x_major));
    }
    if args.y_major.is_some() {
        edits.push(ParamEdit::YMajor(args.y_major));
    }
    if let Some(v) = args.minor_grid {
        edits.push(ParamEdit::ShowMinorGrid(v));
    }
    if let Some(v) = args.linewidth {
        edits.push(ParamEdit::LineWidth(v));
    }
    if let Some(v) = args.zero_baseline {
        edits.push(ParamEdit::ZeroBaseline(v));
    }
    if let Some(v) = args.zero_axes {
        edits.push(ParamEdit::ZeroAxes(v));
    }
    if args.equal_aspect {
        edits.push(ParamEdit::EqualAspect(true));
    }
    if args.annotate_peaks {
        edits.push(ParamEdit::AnnotatePeaks(true));
    }
    if args.metrics_box {
        edits.push(ParamEdit::MetricsBox(true));
    }
    if args.bottom_indicator {
        edits.push(ParamEdit::BottomIndicator(true));
    }
    if let Some(v) = args.title_pad {
        edits.push(ParamEdit::TitlePad(v));
    }
    if args.xmin.is_some() || args.xmax.is_some() {
        edits.push(ParamEdit::XLimits(AxisLimitsInput::new(
            args.xmin.as_deref(),
            args.xmax.as_deref(),
        )));
    }
    if args.ymin.is_some() || args.ymax.is_some() {
        edits.push(ParamEdit::YLimits(AxisLimitsInput::new(
            args.ymin.as_deref(),
            args.ymax.as_deref(),
        )));
    }
    if args.smooth.is_some()
        || args.savgol_window.is_some()
        || args.savgol_polyorder.is_some()
        || args.ma_k.is_some()
    {
        let defaults = Smoothing::default();
        edits.push(ParamEdit::Smoothing(Smoothing {
            kind: args.smooth.unwrap_or(defaults.kind),
            savgol_window: args.savgol_window.unwrap_or(defaults.savgol_window),
            savgol_polyorder: args.savgol_polyorder.unwrap_or(defaults.savgol_polyorder),
            moving_average_k: args.ma_k.unwrap_or(defaults.moving_average_k),
        }));
    }
    if !args.formats.is_empty() {
        let formats: BTreeSet<ExportFormat> = args.formats.iter().copied().collect();
        edits.push(ParamEdit::ExportFormats(formats));
    }
    if let Some(v) = &args.name {
        edits.push(ParamEdit::FilenameBase(v.clone()));
    }
    if let Some(v) = &args.save_dir {
        edits.push(ParamEdit::SaveDir(v.clone()));
    }
    edits
}

fn check_workbook(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("xlsx") | Some("xls") => Ok(()),
        _ => anyhow::bail!(
            "{} is not an Excel workbook (.xlsx or .xls)",
            path.display()
        ),
    }
}

/// Wait for the event `pick` accepts. Notices arriving meanwhile are fatal:
/// the CLI has no way to correct an input mid-run.
async fn wait_for<T>(
    ctl: &mut ControllerHandle,
    mut pick: impl FnMut(WorkflowEvent) -> Option<T>,
) -> Result<T> {
    loop {
        let ev = ctl
            .events
            .recv()
            .await
            .context("workflow controller stopped")?;
        if let WorkflowEvent::Notice(notice) = &ev {
            anyhow::bail!("{}", notice.message);
        }
        if let Some(v) = pick(ev) {
            return Ok(v);
        }
    }
}

/// Fail on any warning already queued, once the controller has caught up.
async fn drain_notices(ctl: &mut ControllerHandle) -> Result<()> {
    ctl.inspect().await.context("workflow controller stopped")?;
    while let Ok(ev) = ctl.events.try_recv() {
        if let WorkflowEvent::Notice(notice) = ev {
            anyhow::bail!("{}", notice.message);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct RunSummary {
    session_id: String,
    sheets: Vec<String>,
    sheet: Option<String>,
    params: sheetplot::params::ParameterModel,
    preview_file: Option<PathBuf>,
    export: Option<ExportResult>,
    downloaded: Vec<PathBuf>,
}

pub async fn run(args: Cli) -> Result<()> {
    check_workbook(&args.workbook)?;
    let config_path = args.config.clone().or_else(config::default_config_path);
    let file_cfg = match config_path.as_deref() {
        Some(p) => config::load_file_config(p)?,
        None => FileConfig::default(),
    };
    let cfg = build_config(&args, file_cfg);

    let bytes = tokio::fs::read(&args.workbook)
        .await
        .with_context(|| format!("read {}", args.workbook.display()))?;
    let file_name = args
        .workbook
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workbook.xlsx")
        .to_string();

    let service = Arc::new(HttpRenderService::new(&cfg)?);
    let mut ctl = spawn_controller(service.clone(), cfg.capabilities);
    let (out_tx, out_handle) = spawn_output_writer();

    let file = UploadFile::new(file_name, bytes);
    let result = drive(&args, &cfg, &service, &mut ctl, &out_tx, file).await;

    ctl.shutdown().await;
    drop(out_tx);
    let _ = out_handle.await;
    result
}

async fn drive(
    args: &Cli,
    cfg: &ClientConfig,
    service: &HttpRenderService,
    ctl: &mut ControllerHandle,
    out: &mpsc::UnboundedSender<OutputLine>,
    file: UploadFile,
) -> Result<()> {
    ctl.send(Command::Upload(file));
    let session = wait_for(ctl, |ev| match ev {
        WorkflowEvent::Uploaded(s) => Some(s),
        _ => None,
    })
    .await?;

    if args.list_sheets {
        if args.json {
            let _ = out.send(OutputLine::Stdout(serde_json::to_string_pretty(&session.sheets)?));
        } else {
            for sheet in &session.sheets {
                let _ = out.send(OutputLine::Stdout(sheet.clone()));
            }
        }
        return Ok(());
    }

    let sheet = match &args.sheet {
        Some(s) if session.sheets.contains(s) => s.clone(),
        Some(s) => anyhow::bail!(
            "sheet {s:?} not in workbook (available: {})",
            session.sheets.join(", ")
        ),
        None => session
            .sheets
            .first()
            .cloned()
            .context("workbook has no sheets")?,
    };
    ctl.send(Command::SelectSheet(sheet.clone()));
    let meta = wait_for(ctl, |ev| match ev {
        WorkflowEvent::ColumnsLoaded(m) => Some(m),
        _ => None,
    })
    .await?;
    let _ = out.send(OutputLine::Stderr(format!(
        "Sheet {sheet}: {} columns, numeric: {}",
        meta.columns.len(),
        meta.numeric.join(", ")
    )));

    ctl.send(Command::SetMode(args.mode));
    for edit in build_edits(args) {
        ctl.send(Command::Edit(edit));
    }
    drain_notices(ctl).await?;

    let mut preview_file = None;
    if let Some(path) = &args.preview {
        ctl.send(Command::Preview);
        let preview = wait_for(ctl, |ev| match ev {
            WorkflowEvent::PreviewReady(p) => Some(p),
            _ => None,
        })
        .await?;
        artifacts::save_preview(&preview.image_ref, path)?;
        let _ = out.send(OutputLine::Stderr(format!("Preview: {}", path.display())));
        preview_file = Some(path.clone());
    }

    let mut export = None;
    let mut downloaded = Vec::new();
    if args.export {
        ctl.send(Command::Export);
        let result = wait_for(ctl, |ev| match ev {
            WorkflowEvent::Exported(r) => Some(r),
            _ => None,
        })
        .await?;
        match &cfg.download_dir {
            Some(dir) => {
                downloaded = artifacts::download_all(service, &result, dir).await?;
                for p in &downloaded {
                    let _ = out.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
                }
            }
            None if !args.json => {
                for r in result.file_refs.iter().chain(result.archive_ref.as_ref()) {
                    let _ = out.send(OutputLine::Stdout(r.clone()));
                }
            }
            None => {}
        }
        export = Some(result);
    }

    if args.json {
        let snapshot = ctl.inspect().await.context("workflow controller stopped")?;
        let summary = RunSummary {
            session_id: session.session_id,
            sheets: session.sheets,
            sheet: snapshot.sheet,
            params: snapshot.params,
            preview_file,
            export,
            downloaded,
        };
        let _ = out.send(OutputLine::Stdout(serde_json::to_string_pretty(&summary)?));
    }
    Ok(())
}
