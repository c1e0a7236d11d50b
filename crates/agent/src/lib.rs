//! The TripMate exchange runtime.
//!
//! One chat request flows through three stages:
//!
//! 1. **Guardrail**: off-topic requests get a redirect reply and stop here
//! 2. **Orchestrator**: runs up to `max_steps` model steps, executing any
//!    requested tools in between, and emits [`StepEvent`]s
//! 3. **Assembler**: orders the events into [`UiStreamPart`]s for the client
//!    and commits the finished turn to history exactly once

pub mod assembler;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod stream_event;
#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;
pub mod ui_stream;

pub use assembler::{PartSequencer, ResponseAssembler};
pub use orchestrator::StepOrchestrator;
pub use pipeline::{ChatPipeline, ChatStream};
pub use policy::{StepPolicy, StepSettings};
pub use stream_event::StepEvent;
pub use ui_stream::{DONE_FRAME, UI_STREAM_HEADER, UI_STREAM_VERSION, UiStreamPart, ui_finish_reason};
