//! Workflow controller task.
//!
//! Owns one [`Workflow`], turns presentation commands into collaborator calls
//! and emits events back. Calls run as spawned tasks; superseded or
//! invalidated tasks are aborted and their replies dropped.

use super::state::{Completion, Stage, Ticket, Workflow};
use crate::error::{ServiceError, WorkflowError};
use crate::model::{
    ColumnMetadata, ExportResult, FileSession, Notice, Operation, PlotMode, PreviewResult,
};
use crate::normalize::Capabilities;
use crate::params::{ParamEdit, ParameterModel};
use crate::service::{RenderService, UploadFile};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Commands emitted by presentation layers.
#[derive(Debug)]
pub enum Command {
    Upload(UploadFile),
    SelectSheet(String),
    SetMode(PlotMode),
    Edit(ParamEdit),
    ResetParams,
    Preview,
    Export,
    /// Reply with the current state once every earlier command is handled.
    Inspect(oneshot::Sender<WorkflowSnapshot>),
    Quit,
}

/// Events relayed to presentation layers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StageChanged(Stage),
    Uploaded(FileSession),
    ColumnsLoaded(ColumnMetadata),
    ParamsChanged(Box<ParameterModel>),
    PreviewReady(PreviewResult),
    Exported(ExportResult),
    Busy { op: Operation, busy: bool },
    Notice(Notice),
}

/// Point-in-time copy of everything a presentation may display.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub stage: Stage,
    pub session: Option<FileSession>,
    pub sheet: Option<String>,
    pub metadata: Option<ColumnMetadata>,
    pub params: ParameterModel,
    pub preview: Option<PreviewResult>,
    pub export: Option<ExportResult>,
    pub busy: Vec<Operation>,
}

impl WorkflowSnapshot {
    pub fn of(wf: &Workflow) -> Self {
        Self {
            stage: wf.stage(),
            session: wf.session().cloned(),
            sheet: wf.cache().sheet().map(str::to_string),
            metadata: wf.cache().metadata().cloned(),
            params: wf.params().clone(),
            preview: wf.preview().cloned(),
            export: wf.export().cloned(),
            busy: Operation::ALL
                .into_iter()
                .filter(|op| wf.is_busy(*op))
                .collect(),
        }
    }
}

/// Reply from a spawned collaborator call.
enum Done {
    Upload(Ticket, Result<FileSession, ServiceError>),
    Columns(Ticket, Result<ColumnMetadata, ServiceError>),
    Preview(Ticket, Result<PreviewResult, ServiceError>),
    Export(Ticket, Result<ExportResult, ServiceError>),
}

struct Controller<S> {
    wf: Workflow,
    service: Arc<S>,
    event_tx: UnboundedSender<WorkflowEvent>,
    done_tx: UnboundedSender<Done>,
    tasks: HashMap<Operation, JoinHandle<()>>,
    // last published values, for change events
    stage: Stage,
    params: ParameterModel,
    busy: HashMap<Operation, bool>,
}

fn export_timestamp() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

impl<S: RenderService> Controller<S> {
    fn emit(&self, ev: WorkflowEvent) {
        let _ = self.event_tx.send(ev);
    }

    fn report(&self, err: WorkflowError) {
        match err.to_notice() {
            Some(notice) => {
                log::debug!("{err:#}");
                self.emit(WorkflowEvent::Notice(notice));
            }
            None => log::debug!("suppressed: {err}"),
        }
    }

    /// Run `call` as a task for `op`, aborting whatever was running for it.
    fn spawn<F>(&mut self, op: Operation, call: F)
    where
        F: Future<Output = Done> + Send + 'static,
    {
        let done_tx = self.done_tx.clone();
        let handle = tokio::spawn(async move {
            let _ = done_tx.send(call.await);
        });
        if let Some(prev) = self.tasks.insert(op, handle) {
            prev.abort();
        }
    }

    fn abort(&mut self, op: Operation) {
        if let Some(handle) = self.tasks.remove(&op) {
            handle.abort();
        }
    }

    /// Emit change events for stage, parameters and busy flags.
    fn publish(&mut self) {
        if self.wf.stage() != self.stage {
            self.stage = self.wf.stage();
            self.emit(WorkflowEvent::StageChanged(self.stage));
        }
        if self.wf.params() != &self.params {
            self.params = self.wf.params().clone();
            self.emit(WorkflowEvent::ParamsChanged(Box::new(self.params.clone())));
        }
        for op in Operation::ALL {
            let busy = self.wf.is_busy(op);
            if self.busy.insert(op, busy) != Some(busy) {
                self.emit(WorkflowEvent::Busy { op, busy });
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Upload(file) => match self.wf.begin_upload() {
                Ok(ticket) => {
                    let svc = self.service.clone();
                    self.spawn(Operation::Upload, async move {
                        Done::Upload(ticket, svc.upload(&file).await)
                    });
                }
                Err(e) => self.report(e),
            },
            Command::SelectSheet(sheet) => match self.wf.select_sheet(&sheet) {
                Ok(Some(call)) => {
                    let svc = self.service.clone();
                    self.spawn(Operation::Columns, async move {
                        let res = svc.columns(&call.session_id, &call.sheet).await;
                        Done::Columns(call.ticket, res)
                    });
                }
                Ok(None) => {}
                Err(e) => self.report(e),
            },
            Command::SetMode(mode) => self.wf.set_mode(mode),
            Command::Edit(edit) => {
                if let Err(e) = self.wf.edit(edit) {
                    self.report(e);
                }
            }
            Command::ResetParams => self.wf.reset_params(),
            Command::Preview => match self.wf.begin_preview() {
                Ok(call) => {
                    let svc = self.service.clone();
                    self.spawn(Operation::Preview, async move {
                        let res = svc.preview(&call.request).await;
                        Done::Preview(call.ticket, res)
                    });
                }
                Err(e) => self.report(e),
            },
            Command::Export => match self.wf.begin_export(export_timestamp()) {
                Ok(call) => {
                    let svc = self.service.clone();
                    self.spawn(Operation::Export, async move {
                        let res = svc.export(&call.request).await;
                        Done::Export(call.ticket, res)
                    });
                }
                Err(e) => self.report(e),
            },
            Command::Inspect(reply) => {
                let _ = reply.send(WorkflowSnapshot::of(&self.wf));
            }
            Command::Quit => {}
        }
    }

    fn handle_done(&mut self, done: Done) {
        let op = match &done {
            Done::Upload(t, _) | Done::Columns(t, _) | Done::Preview(t, _) | Done::Export(t, _) => {
                t.op
            }
        };
        let res = match done {
            Done::Upload(ticket, res) => self.wf.finish_upload(ticket, res),
            Done::Columns(ticket, res) => self.wf.finish_columns(ticket, res),
            Done::Preview(ticket, res) => self.wf.finish_preview(ticket, res),
            Done::Export(ticket, res) => self.wf.finish_export(ticket, res),
        };
        match res {
            Ok(Completion::Applied) => {
                self.tasks.remove(&op);
                self.announce(op);
            }
            Ok(Completion::Stale) => {}
            Err(e) => {
                self.tasks.remove(&op);
                self.report(e);
            }
        }
    }

    fn announce(&mut self, op: Operation) {
        match op {
            Operation::Upload => {
                for dependent in [Operation::Columns, Operation::Preview, Operation::Export] {
                    self.abort(dependent);
                }
                if let Some(session) = self.wf.session() {
                    self.emit(WorkflowEvent::Uploaded(session.clone()));
                }
            }
            Operation::Columns => {
                if let Some(meta) = self.wf.cache().metadata() {
                    self.emit(WorkflowEvent::ColumnsLoaded(meta.clone()));
                }
            }
            Operation::Preview => {
                if let Some(preview) = self.wf.preview() {
                    self.emit(WorkflowEvent::PreviewReady(preview.clone()));
                }
            }
            Operation::Export => {
                if let Some(export) = self.wf.export() {
                    self.emit(WorkflowEvent::Exported(export.clone()));
                }
            }
        }
    }
}

/// Drive a workflow from presentation commands until `Quit` or until every
/// command sender is dropped.
pub async fn run_controller<S: RenderService>(
    service: Arc<S>,
    capabilities: Capabilities,
    event_tx: UnboundedSender<WorkflowEvent>,
    mut cmd_rx: UnboundedReceiver<Command>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Done>();
    let wf = Workflow::new(capabilities);
    let mut ctl = Controller {
        stage: wf.stage(),
        params: wf.params().clone(),
        busy: HashMap::new(),
        wf,
        service,
        event_tx,
        done_tx,
        tasks: HashMap::new(),
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Quit) | None => break,
                    Some(cmd) => ctl.handle_command(cmd),
                }
            }
            // The controller holds a sender, so this channel never closes.
            Some(done) = done_rx.recv() => ctl.handle_done(done),
        }
        ctl.publish();
    }

    for (_, handle) in ctl.tasks.drain() {
        handle.abort();
    }
}

/// Channels and task handle for a spawned controller.
pub struct ControllerHandle {
    pub commands: UnboundedSender<Command>,
    pub events: UnboundedReceiver<WorkflowEvent>,
    pub task: JoinHandle<()>,
}

impl ControllerHandle {
    pub fn send(&self, cmd: Command) {
        let _ = self.commands.send(cmd);
    }

    /// Current state, after every command sent so far has been handled.
    pub async fn inspect(&self) -> Option<WorkflowSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Inspect(tx)).ok()?;
        rx.await.ok()
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Quit);
        let _ = self.task.await;
    }
}

pub fn spawn_controller<S: RenderService>(
    service: Arc<S>,
    capabilities: Capabilities,
) -> ControllerHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let task = tokio::spawn(run_controller(service, capabilities, event_tx, cmd_rx));
    ControllerHandle {
        commands: cmd_tx,
        events: event_rx,
        task,
    }
}
