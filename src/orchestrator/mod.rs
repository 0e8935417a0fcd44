//! Workflow orchestration.
//!
//! [`state::Workflow`] is the synchronous stage machine: preconditions,
//! generation tracking and invalidation. [`controller`] wraps it in a tokio
//! task that performs collaborator calls and relays events. Presentation
//! layers talk to the controller only.

mod controller;
mod state;

pub use controller::{
    run_controller, spawn_controller, Command, ControllerHandle, WorkflowEvent, WorkflowSnapshot,
};
pub use state::{ColumnsCall, Completion, RenderCall, Stage, Ticket, Workflow};
