//! Workflow state machine.
//!
//! Pure and synchronous: every collaborator round trip is split into a
//! `begin_*` call that checks preconditions and hands out a [`Ticket`], and a
//! `finish_*` call that applies the reply only if the ticket is still current.

use crate::columns::ColumnCache;
use crate::error::{ServiceError, WorkflowError};
use crate::model::{
    ColumnMetadata, ExportResult, FileSession, Operation, PlotMode, PreviewResult,
};
use crate::normalize::{self, Capabilities, RenderRequest};
use crate::params::{ParamEdit, ParameterModel};
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Empty,
    Uploaded,
    SheetSelected,
    Configured,
    Previewed,
    Exported,
}

/// Identifies one issued request. Generations come from a single counter
/// that only grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub op: Operation,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// Superseded or invalidated; the reply was dropped.
    Stale,
}

/// A column fetch to issue.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnsCall {
    pub ticket: Ticket,
    pub session_id: String,
    pub sheet: String,
}

/// A preview or export to issue.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCall {
    pub ticket: Ticket,
    pub request: RenderRequest,
}

#[derive(Debug, Default, Clone)]
struct InFlight {
    upload: Option<u64>,
    columns: Option<u64>,
    preview: Option<u64>,
    export: Option<u64>,
}

impl InFlight {
    fn slot(&mut self, op: Operation) -> &mut Option<u64> {
        match op {
            Operation::Upload => &mut self.upload,
            Operation::Columns => &mut self.columns,
            Operation::Preview => &mut self.preview,
            Operation::Export => &mut self.export,
        }
    }

    fn get(&self, op: Operation) -> Option<u64> {
        match op {
            Operation::Upload => self.upload,
            Operation::Columns => self.columns,
            Operation::Preview => self.preview,
            Operation::Export => self.export,
        }
    }
}

/// One user's workflow session.
#[derive(Debug, Clone)]
pub struct Workflow {
    stage: Stage,
    cache: ColumnCache,
    params: ParameterModel,
    capabilities: Capabilities,
    preview: Option<PreviewResult>,
    export: Option<ExportResult>,
    generation: u64,
    in_flight: InFlight,
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new(Capabilities::default())
    }
}

impl Workflow {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            stage: Stage::Empty,
            cache: ColumnCache::default(),
            params: ParameterModel::default(),
            capabilities,
            preview: None,
            export: None,
            generation: 0,
            in_flight: InFlight::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn cache(&self) -> &ColumnCache {
        &self.cache
    }

    pub fn session(&self) -> Option<&FileSession> {
        self.cache.session()
    }

    pub fn params(&self) -> &ParameterModel {
        &self.params
    }

    pub fn preview(&self) -> Option<&PreviewResult> {
        self.preview.as_ref()
    }

    pub fn export(&self) -> Option<&ExportResult> {
        self.export.as_ref()
    }

    pub fn is_busy(&self, op: Operation) -> bool {
        self.in_flight.get(op).is_some()
    }

    fn issue(&mut self, op: Operation) -> Ticket {
        self.generation += 1;
        *self.in_flight.slot(op) = Some(self.generation);
        Ticket {
            op,
            generation: self.generation,
        }
    }

    fn issue_exclusive(&mut self, op: Operation) -> Result<Ticket, WorkflowError> {
        if self.is_busy(op) {
            return Err(WorkflowError::Busy(op));
        }
        Ok(self.issue(op))
    }

    /// Clear the in-flight marker if `ticket` is the one we are waiting for.
    fn settle(&mut self, ticket: Ticket) -> bool {
        let slot = self.in_flight.slot(ticket.op);
        if *slot == Some(ticket.generation) {
            *slot = None;
            true
        } else {
            log::debug!(
                "dropping stale {} reply (generation {}, current {:?})",
                ticket.op,
                ticket.generation,
                slot
            );
            false
        }
    }

    /// Anything at or past sheet selection becomes `configured` on edit.
    fn touch(&mut self) {
        if matches!(
            self.stage,
            Stage::SheetSelected | Stage::Configured | Stage::Previewed | Stage::Exported
        ) {
            self.stage = Stage::Configured;
        }
    }

    fn require_target(&self) -> Result<(String, String), WorkflowError> {
        let session_id = self
            .cache
            .session_id()
            .ok_or_else(|| WorkflowError::precondition("Upload a workbook first"))?;
        let sheet = self
            .cache
            .sheet()
            .ok_or_else(|| WorkflowError::precondition("Select a sheet first"))?;
        Ok((session_id.to_string(), sheet.to_string()))
    }

    pub fn begin_upload(&mut self) -> Result<Ticket, WorkflowError> {
        self.issue_exclusive(Operation::Upload)
    }

    /// Apply an upload reply. Success replaces the session wholesale and
    /// drops every value derived from the previous file.
    pub fn finish_upload(
        &mut self,
        ticket: Ticket,
        outcome: Result<FileSession, ServiceError>,
    ) -> Result<Completion, WorkflowError> {
        if !self.settle(ticket) {
            return Ok(Completion::Stale);
        }
        let session = outcome.map_err(|e| WorkflowError::from_service(Operation::Upload, e))?;

        for op in [Operation::Columns, Operation::Preview, Operation::Export] {
            *self.in_flight.slot(op) = None;
        }
        log::info!(
            "session {} uploaded with {} sheet(s)",
            session.session_id,
            session.sheets.len()
        );
        self.cache.replace_session(session);
        self.params.clear_selections();
        self.preview = None;
        self.export = None;
        self.stage = Stage::Uploaded;
        Ok(Completion::Applied)
    }

    /// Select a sheet and return the column fetch to issue. An outstanding
    /// fetch for the previous sheet is superseded.
    pub fn select_sheet(&mut self, sheet: &str) -> Result<Option<ColumnsCall>, WorkflowError> {
        self.cache.select_sheet(sheet)?;
        self.stage = Stage::SheetSelected;
        Ok(self.begin_columns())
    }

    /// Column fetch for the current key; `None` without session and sheet.
    pub fn begin_columns(&mut self) -> Option<ColumnsCall> {
        let (session_id, sheet) = self.cache.columns_key()?;
        Some(ColumnsCall {
            ticket: self.issue(Operation::Columns),
            session_id,
            sheet,
        })
    }

    pub fn finish_columns(
        &mut self,
        ticket: Ticket,
        outcome: Result<ColumnMetadata, ServiceError>,
    ) -> Result<Completion, WorkflowError> {
        if !self.settle(ticket) {
            return Ok(Completion::Stale);
        }
        let meta = outcome.map_err(|e| WorkflowError::from_service(Operation::Columns, e))?;
        let meta = self.cache.store(meta)?.clone();
        self.params.apply_metadata(&meta);
        self.stage = Stage::Configured;
        Ok(Completion::Applied)
    }

    /// Apply one user edit. Column choices are checked against the cached
    /// metadata first.
    pub fn edit(&mut self, edit: ParamEdit) -> Result<(), WorkflowError> {
        let (field, owner) = match &edit {
            ParamEdit::TimeColumn(_) => ("Time column", Some(PlotMode::Timeseries)),
            ParamEdit::SeriesColumns(_) => ("Series columns", Some(PlotMode::Timeseries)),
            ParamEdit::XColumn(_) => ("X column", Some(PlotMode::Hysteresis)),
            ParamEdit::YColumns(_) => ("Y columns", Some(PlotMode::Hysteresis)),
            _ => ("", None),
        };
        if let Some(owner) = owner.filter(|m| *m != self.params.mode()) {
            return Err(WorkflowError::precondition(format!(
                "{field} only applies to {owner} charts"
            )));
        }
        match &edit {
            ParamEdit::TimeColumn(col) | ParamEdit::XColumn(col) => {
                self.cache.check_column(col.as_deref())?
            }
            ParamEdit::SeriesColumns(cols) | ParamEdit::YColumns(cols) => {
                self.cache.check_numeric(cols)?
            }
            _ => {}
        }
        self.params.apply(edit);
        self.touch();
        Ok(())
    }

    /// Toggle chart family and re-run auto-fill against cached metadata.
    pub fn set_mode(&mut self, mode: PlotMode) {
        if !self.params.set_mode(mode) {
            return;
        }
        if let Some(meta) = self.cache.metadata().cloned() {
            self.params.apply_metadata(&meta);
        }
        self.touch();
    }

    /// Restore the default parameter snapshot. Auto-fill runs again on the
    /// next sheet change or mode toggle.
    pub fn reset_params(&mut self) {
        self.params.reset();
        self.touch();
    }

    pub fn begin_preview(&mut self) -> Result<RenderCall, WorkflowError> {
        let (session_id, sheet) = self.require_target()?;
        let ticket = self.issue_exclusive(Operation::Preview)?;
        Ok(RenderCall {
            ticket,
            request: RenderRequest {
                session_id,
                sheet,
                mode: self.params.mode(),
                params: normalize::preview_params(&self.params, self.capabilities),
            },
        })
    }

    pub fn finish_preview(
        &mut self,
        ticket: Ticket,
        outcome: Result<PreviewResult, ServiceError>,
    ) -> Result<Completion, WorkflowError> {
        if !self.settle(ticket) {
            return Ok(Completion::Stale);
        }
        let preview = outcome.map_err(|e| WorkflowError::from_service(Operation::Preview, e))?;
        self.preview = Some(preview);
        self.stage = Stage::Previewed;
        Ok(Completion::Applied)
    }

    pub fn begin_export(&mut self, now: OffsetDateTime) -> Result<RenderCall, WorkflowError> {
        let (session_id, sheet) = self.require_target()?;
        let ticket = self.issue_exclusive(Operation::Export)?;
        Ok(RenderCall {
            ticket,
            request: RenderRequest {
                session_id,
                sheet,
                mode: self.params.mode(),
                params: normalize::export_params(&self.params, self.capabilities, now),
            },
        })
    }

    pub fn finish_export(
        &mut self,
        ticket: Ticket,
        outcome: Result<ExportResult, ServiceError>,
    ) -> Result<Completion, WorkflowError> {
        if !self.settle(ticket) {
            return Ok(Completion::Stale);
        }
        let export = outcome.map_err(|e| WorkflowError::from_service(Operation::Export, e))?;
        if let Some(image_ref) = export.image_ref.clone() {
            self.preview = Some(PreviewResult { image_ref });
        }
        self.export = Some(export);
        self.stage = Stage::Exported;
        Ok(Completion::Applied)
    }
}
