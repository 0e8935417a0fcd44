use sheetplot::error::ServiceError;
use sheetplot::model::{
    ColumnMetadata, ExportResult, FileSession, NoticeLevel, Operation, PlotMode, PreviewResult,
};
use sheetplot::normalize::{Capabilities, RenderRequest};
use sheetplot::orchestrator::{
    spawn_controller, Command, ControllerHandle, Stage, WorkflowEvent, WorkflowSnapshot,
};
use sheetplot::params::{ModeParams, ParamEdit, ParameterModel};
use sheetplot::service::{RenderService, UploadFile};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// In-memory rendering service. Calls can be held back per key
/// (`upload:<file>`, `columns:<sheet>`, `preview`, `export`) until released.
#[derive(Default)]
struct FakeService {
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<RenderRequest>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    reject_preview: AtomicBool,
}

impl FakeService {
    fn hold(&self, key: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), gate.clone());
        gate
    }

    async fn enter(&self, key: String) {
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn sheet_meta(session_id: &str, sheet: &str) -> ColumnMetadata {
    let (columns, time, numeric): (&[&str], &[&str], &[&str]) = match sheet {
        "S1" => (&["t1", "c1", "c2", "c3"], &["t1"], &["c1", "c2", "c3"]),
        "S2" => (&["x", "y1", "y2"], &[], &["x", "y1", "y2"]),
        _ => (&["time", "v"], &["time"], &["v"]),
    };
    let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    ColumnMetadata {
        session_id: session_id.to_string(),
        sheet: sheet.to_string(),
        columns: owned(columns),
        time_candidates: owned(time),
        numeric: owned(numeric),
    }
}

impl RenderService for FakeService {
    async fn upload(&self, file: &UploadFile) -> Result<FileSession, ServiceError> {
        self.enter(format!("upload:{}", file.file_name)).await;
        match file.file_name.as_str() {
            "a.xlsx" => Ok(FileSession {
                session_id: "A".into(),
                sheets: vec!["S1".into(), "S2".into()],
                parse_hints: None,
            }),
            "b.xlsx" => Ok(FileSession {
                session_id: "B".into(),
                sheets: vec!["Data".into()],
                parse_hints: None,
            }),
            "bad.xlsx" => Err(ServiceError::rejected(Some("Unsupported file type".into()))),
            _ => Err(ServiceError::Transport(anyhow::anyhow!("connection refused"))),
        }
    }

    async fn columns(&self, session_id: &str, sheet: &str) -> Result<ColumnMetadata, ServiceError> {
        self.enter(format!("columns:{sheet}")).await;
        Ok(sheet_meta(session_id, sheet))
    }

    async fn preview(&self, request: &RenderRequest) -> Result<PreviewResult, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.enter("preview".into()).await;
        if self.reject_preview.load(Ordering::SeqCst) {
            return Err(ServiceError::rejected(None));
        }
        Ok(PreviewResult {
            image_ref: "data:image/png;base64,cHJldmlldw==".into(),
        })
    }

    async fn export(&self, request: &RenderRequest) -> Result<ExportResult, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.enter("export".into()).await;
        let stem = request
            .params
            .export
            .as_ref()
            .map(|e| e.filename_base.clone())
            .unwrap_or_default();
        Ok(ExportResult {
            image_ref: Some("data:image/png;base64,ZXhwb3J0".into()),
            file_refs: vec![format!("/download?path=/out/{stem}.png")],
            archive_ref: Some(format!("/download?path=/out/{stem}.zip")),
        })
    }
}

fn start(caps: Capabilities) -> (Arc<FakeService>, ControllerHandle) {
    let service = Arc::new(FakeService::default());
    let ctl = spawn_controller(service.clone(), caps);
    (service, ctl)
}

async fn next_event(
    ctl: &mut ControllerHandle,
    mut pick: impl FnMut(&WorkflowEvent) -> bool,
) -> WorkflowEvent {
    let wait = async {
        loop {
            let ev = ctl.events.recv().await.expect("controller stopped");
            if pick(&ev) {
                return ev;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for event")
}

async fn snapshot(ctl: &ControllerHandle) -> WorkflowSnapshot {
    ctl.inspect().await.expect("controller stopped")
}

/// Events already emitted once the controller has caught up.
async fn drain(ctl: &mut ControllerHandle) -> Vec<WorkflowEvent> {
    snapshot(ctl).await;
    let mut out = Vec::new();
    while let Ok(ev) = ctl.events.try_recv() {
        out.push(ev);
    }
    out
}

async fn upload(ctl: &mut ControllerHandle, name: &str) {
    ctl.send(Command::Upload(UploadFile::new(name, &b"PK\x03\x04"[..])));
    next_event(ctl, |ev| matches!(ev, WorkflowEvent::Uploaded(_))).await;
}

async fn load_sheet(ctl: &mut ControllerHandle, sheet: &str) {
    ctl.send(Command::SelectSheet(sheet.into()));
    next_event(ctl, |ev| matches!(ev, WorkflowEvent::ColumnsLoaded(_))).await;
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn sheet_columns_fill_timeseries_defaults() {
    let (_svc, mut ctl) = start(Capabilities::default());
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;

    let snap = snapshot(&ctl).await;
    assert_eq!(snap.stage, Stage::Configured);
    assert_eq!(snap.sheet.as_deref(), Some("S1"));
    assert_eq!(
        snap.params.mode_params(),
        &ModeParams::Timeseries {
            time_col: Some("t1".into()),
            series_cols: strings(&["c1", "c2"]),
            labels: strings(&["c1", "c2"]),
        }
    );
    ctl.shutdown().await;
}

#[tokio::test]
async fn second_upload_discards_derived_state() {
    let (_svc, mut ctl) = start(Capabilities::default());
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;
    ctl.send(Command::Edit(ParamEdit::Title("Run 7".into())));

    upload(&mut ctl, "b.xlsx").await;
    let snap = snapshot(&ctl).await;
    assert_eq!(snap.stage, Stage::Uploaded);
    assert_eq!(snap.session.map(|s| s.sheets), Some(strings(&["Data"])));
    assert!(snap.sheet.is_none());
    assert!(snap.metadata.is_none());
    assert!(snap.params.mode_params().selection().is_empty());
    assert!(snap.params.mode_params().labels().is_empty());
    assert_eq!(snap.params.common.title, "Run 7");
    ctl.shutdown().await;
}

#[tokio::test]
async fn upload_invalidates_outstanding_preview() {
    let (svc, mut ctl) = start(Capabilities::default());
    let gate = svc.hold("preview");
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;

    ctl.send(Command::Preview);
    next_event(&mut ctl, |ev| {
        matches!(ev, WorkflowEvent::Busy { op: Operation::Preview, busy: true })
    })
    .await;
    upload(&mut ctl, "b.xlsx").await;
    gate.add_permits(1);

    let events = drain(&mut ctl).await;
    assert!(!events
        .iter()
        .any(|ev| matches!(ev, WorkflowEvent::PreviewReady(_))));
    let snap = snapshot(&ctl).await;
    assert!(snap.preview.is_none());
    assert!(snap.busy.is_empty());
    assert_eq!(snap.stage, Stage::Uploaded);
    ctl.shutdown().await;
}

#[tokio::test]
async fn latest_sheet_selection_wins() {
    let (svc, mut ctl) = start(Capabilities::default());
    let gate = svc.hold("columns:S1");
    upload(&mut ctl, "a.xlsx").await;

    ctl.send(Command::SelectSheet("S1".into()));
    ctl.send(Command::SelectSheet("S2".into()));
    let loaded = next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::ColumnsLoaded(_))).await;
    match loaded {
        WorkflowEvent::ColumnsLoaded(meta) => assert_eq!(meta.sheet, "S2"),
        other => panic!("unexpected event {other:?}"),
    }
    gate.add_permits(1);

    let snap = snapshot(&ctl).await;
    assert_eq!(snap.metadata.map(|m| m.sheet), Some("S2".to_string()));
    assert_eq!(
        snap.params.mode_params(),
        &ModeParams::Timeseries {
            time_col: None,
            series_cols: strings(&["x", "y1"]),
            labels: strings(&["x", "y1"]),
        }
    );
    ctl.shutdown().await;
}

#[tokio::test]
async fn rejected_upload_leaves_session_untouched() {
    let (_svc, mut ctl) = start(Capabilities::default());
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;
    let before = snapshot(&ctl).await;

    ctl.send(Command::Upload(UploadFile::new("bad.xlsx", &b"oops"[..])));
    let ev = next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::Notice(_))).await;
    match ev {
        WorkflowEvent::Notice(n) => {
            assert_eq!(n.level, NoticeLevel::Error);
            assert_eq!(n.message, "Unsupported file type");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let after = snapshot(&ctl).await;
    assert_eq!(after.session, before.session);
    assert_eq!(after.sheet, before.sheet);
    assert_eq!(after.params, before.params);
    assert_eq!(after.stage, Stage::Configured);
    ctl.shutdown().await;
}

#[tokio::test]
async fn transport_failure_is_reported_per_operation() {
    let (_svc, mut ctl) = start(Capabilities::default());
    ctl.send(Command::Upload(UploadFile::new("offline.xlsx", &b""[..])));
    let ev = next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::Notice(_))).await;
    match ev {
        WorkflowEvent::Notice(n) => {
            assert_eq!(n.level, NoticeLevel::Error);
            assert_eq!(n.message, "upload failed: connection refused");
        }
        other => panic!("unexpected event {other:?}"),
    }
    let snap = snapshot(&ctl).await;
    assert_eq!(snap.stage, Stage::Empty);
    assert!(snap.session.is_none());
    ctl.shutdown().await;
}

#[tokio::test]
async fn rejected_preview_falls_back_to_default_message() {
    let (svc, mut ctl) = start(Capabilities::default());
    svc.reject_preview.store(true, Ordering::SeqCst);
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;

    ctl.send(Command::Preview);
    let ev = next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::Notice(_))).await;
    match ev {
        WorkflowEvent::Notice(n) => assert_eq!(n.message, "Preview failed"),
        other => panic!("unexpected event {other:?}"),
    }
    let snap = snapshot(&ctl).await;
    assert!(snap.preview.is_none());
    assert_eq!(snap.stage, Stage::Configured);
    ctl.shutdown().await;
}

#[tokio::test]
async fn preview_without_upload_warns_and_sends_nothing() {
    let (svc, mut ctl) = start(Capabilities::default());
    ctl.send(Command::Preview);
    let ev = next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::Notice(_))).await;
    match ev {
        WorkflowEvent::Notice(n) => {
            assert_eq!(n.level, NoticeLevel::Warning);
            assert_eq!(n.message, "Upload a workbook first");
        }
        other => panic!("unexpected event {other:?}"),
    }

    upload(&mut ctl, "a.xlsx").await;
    ctl.send(Command::Export);
    let ev = next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::Notice(_))).await;
    match ev {
        WorkflowEvent::Notice(n) => assert_eq!(n.message, "Select a sheet first"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(svc.calls(), vec!["upload:a.xlsx".to_string()]);
    ctl.shutdown().await;
}

#[tokio::test]
async fn render_calls_force_resolution_and_export_replaces_preview() {
    let (svc, mut ctl) = start(Capabilities::default());
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;
    ctl.send(Command::Edit(ParamEdit::Dpi(300)));

    ctl.send(Command::Preview);
    next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::PreviewReady(_))).await;
    ctl.send(Command::Export);
    next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::Exported(_))).await;

    let requests = svc.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].params.dpi, 120);
    assert!(requests[0].params.export.is_none());
    assert_eq!(requests[1].params.dpi, 600);
    let stem = &requests[1].params.export.as_ref().unwrap().filename_base;
    assert!(stem.starts_with("timeseries_"));
    assert!(!stem.contains(':'));

    let snap = snapshot(&ctl).await;
    assert_eq!(snap.stage, Stage::Exported);
    assert_eq!(snap.params.common.dpi, 300);
    assert_eq!(
        snap.preview.map(|p| p.image_ref).as_deref(),
        Some("data:image/png;base64,ZXhwb3J0")
    );
    let export = snap.export.unwrap();
    assert_eq!(export.file_refs, vec![format!("/download?path=/out/{stem}.png")]);
    ctl.shutdown().await;
}

#[tokio::test]
async fn repeated_trigger_while_busy_is_suppressed() {
    let (svc, mut ctl) = start(Capabilities::default());
    let gate = svc.hold("preview");
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;

    ctl.send(Command::Preview);
    ctl.send(Command::Preview);
    let events = drain(&mut ctl).await;
    assert!(!events
        .iter()
        .any(|ev| matches!(ev, WorkflowEvent::Notice(_))));
    assert_eq!(snapshot(&ctl).await.busy, vec![Operation::Preview]);

    gate.add_permits(1);
    next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::PreviewReady(_))).await;
    let previews = svc.calls().iter().filter(|c| *c == "preview").count();
    assert_eq!(previews, 1);
    ctl.shutdown().await;
}

#[tokio::test]
async fn mode_toggle_refills_from_cached_columns() {
    let (_svc, mut ctl) = start(Capabilities::default());
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;

    ctl.send(Command::SetMode(PlotMode::Hysteresis));
    let snap = snapshot(&ctl).await;
    assert_eq!(
        snap.params.mode_params(),
        &ModeParams::Hysteresis {
            x_col: Some("c1".into()),
            y_cols: strings(&["c2", "c3"]),
            labels: strings(&["c2", "c3"]),
        }
    );

    ctl.send(Command::SetMode(PlotMode::Timeseries));
    let snap = snapshot(&ctl).await;
    assert_eq!(snap.params.mode(), PlotMode::Timeseries);
    assert_eq!(snap.params.mode_params().selection(), strings(&["c1", "c2"]));
    ctl.shutdown().await;
}

#[tokio::test]
async fn reset_restores_defaults_and_bad_columns_warn() {
    let (_svc, mut ctl) = start(Capabilities::default());
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;

    ctl.send(Command::Edit(ParamEdit::SeriesColumns(strings(&["t1"]))));
    let ev = next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::Notice(_))).await;
    assert!(matches!(ev, WorkflowEvent::Notice(n) if n.level == NoticeLevel::Warning));
    assert_eq!(
        snapshot(&ctl).await.params.mode_params().selection(),
        strings(&["c1", "c2"])
    );

    ctl.send(Command::Edit(ParamEdit::Title("x".into())));
    ctl.send(Command::ResetParams);
    let snap = snapshot(&ctl).await;
    assert_eq!(snap.params, ParameterModel::default());
    assert_eq!(snap.stage, Stage::Configured);
    ctl.shutdown().await;
}

#[tokio::test]
async fn capability_flags_gate_optional_toggles() {
    let caps = Capabilities {
        metrics_box: true,
        bottom_indicator: false,
    };
    let (svc, mut ctl) = start(caps);
    upload(&mut ctl, "a.xlsx").await;
    load_sheet(&mut ctl, "S1").await;
    ctl.send(Command::Edit(ParamEdit::MetricsBox(true)));
    ctl.send(Command::Edit(ParamEdit::BottomIndicator(true)));
    ctl.send(Command::Preview);
    next_event(&mut ctl, |ev| matches!(ev, WorkflowEvent::PreviewReady(_))).await;

    let req = &svc.requests()[0];
    assert_eq!(req.params.metrics_box, Some(true));
    assert_eq!(req.params.bottom_indicator, None);
    ctl.shutdown().await;
}
