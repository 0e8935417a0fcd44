//! Session and column introspection cache.
//!
//! Holds the active [`FileSession`], the selected sheet and the metadata for
//! exactly that (session, sheet) pair. Replacing the session or the sheet
//! drops the metadata so it can never be paired with the wrong sheet.

use crate::error::WorkflowError;
use crate::model::{ColumnMetadata, FileSession};

#[derive(Debug, Clone, Default)]
pub struct ColumnCache {
    session: Option<FileSession>,
    sheet: Option<String>,
    metadata: Option<ColumnMetadata>,
}

impl ColumnCache {
    pub fn session(&self) -> Option<&FileSession> {
        self.session.as_ref()
    }

    /// Non-empty session id, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.session_id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn sheets(&self) -> &[String] {
        self.session.as_ref().map(|s| s.sheets.as_slice()).unwrap_or(&[])
    }

    /// Non-empty selected sheet, if any.
    pub fn sheet(&self) -> Option<&str> {
        self.sheet.as_deref().filter(|s| !s.is_empty())
    }

    pub fn metadata(&self) -> Option<&ColumnMetadata> {
        self.metadata.as_ref()
    }

    /// Install a new session, discarding everything derived from the old one.
    pub fn replace_session(&mut self, session: FileSession) {
        self.session = Some(session);
        self.sheet = None;
        self.metadata = None;
    }

    /// Select a sheet of the current session. Clears cached metadata.
    pub fn select_sheet(&mut self, sheet: &str) -> Result<(), WorkflowError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| WorkflowError::precondition("Upload a workbook first"))?;
        if !session.sheets.iter().any(|s| s == sheet) {
            return Err(WorkflowError::precondition(format!(
                "Sheet {sheet:?} is not in the uploaded workbook"
            )));
        }
        self.sheet = Some(sheet.to_string());
        self.metadata = None;
        Ok(())
    }

    /// The (session, sheet) key a column fetch should use, if both are set.
    pub fn columns_key(&self) -> Option<(String, String)> {
        Some((self.session_id()?.to_string(), self.sheet()?.to_string()))
    }

    /// Store metadata for the current key. Names the collaborator flagged
    /// but did not list are dropped.
    pub fn store(&mut self, mut meta: ColumnMetadata) -> Result<&ColumnMetadata, WorkflowError> {
        let current = self.columns_key();
        if current.as_ref().map(|(id, sh)| (id.as_str(), sh.as_str()))
            != Some((meta.session_id.as_str(), meta.sheet.as_str()))
        {
            return Err(WorkflowError::precondition(format!(
                "Column metadata for sheet {:?} does not match the current selection",
                meta.sheet
            )));
        }

        let columns = meta.columns.clone();
        let known = |c: &String| {
            let ok = columns.contains(c);
            if !ok {
                log::warn!("ignoring unknown column {c:?} reported for sheet {:?}", meta.sheet);
            }
            ok
        };
        meta.numeric.retain(known);
        meta.time_candidates.retain(known);

        Ok(self.metadata.insert(meta))
    }

    pub fn columns(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map(|m| m.columns.as_slice())
            .unwrap_or(&[])
    }

    pub fn numeric_columns(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map(|m| m.numeric.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_numeric(&self, column: &str) -> bool {
        self.numeric_columns().iter().any(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().iter().any(|c| c == column)
    }

    /// Check a plotted-column selection against the numeric subset.
    pub fn check_numeric(&self, selection: &[String]) -> Result<(), WorkflowError> {
        if self.metadata.is_none() {
            return Err(WorkflowError::precondition(
                "Select a sheet before choosing columns",
            ));
        }
        match selection.iter().find(|c| !self.is_numeric(c)) {
            Some(bad) => Err(WorkflowError::precondition(format!(
                "Column {bad:?} is not numeric"
            ))),
            None => Ok(()),
        }
    }

    /// Check an axis column (time or x) against the sheet's columns.
    pub fn check_column(&self, column: Option<&str>) -> Result<(), WorkflowError> {
        let Some(column) = column else {
            return Ok(());
        };
        if self.metadata.is_none() {
            return Err(WorkflowError::precondition(
                "Select a sheet before choosing columns",
            ));
        }
        if self.has_column(column) {
            Ok(())
        } else {
            Err(WorkflowError::precondition(format!(
                "Column {column:?} is not in the selected sheet"
            )))
        }
    }
}
