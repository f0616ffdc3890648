//! Research engine: the phase sequence and the machinery behind it.
//!
//! - [`session`]: Clarify -> Brief -> Research -> Report state machine
//! - [`tool_loop`]: bounded model-turn / tool-dispatch loop
//! - [`summarizer`]: worker pool condensing search results
//! - [`state`]: brief, compressed notes and the search counter

pub mod session;
pub mod state;
pub mod summarizer;
pub mod tool_loop;

pub use session::{
    Capabilities, ClarifyOutcome, NoOpCallback, RecordingCallback, ResearchSession,
    ScriptedInput, SessionCallback, SessionOutcome, SessionPhase, SessionSettings, UserInput,
};
pub use state::{CompressedNotes, ResearchState};
pub use summarizer::ResearchSummarizer;
pub use tool_loop::{Continuation, StopReason, ToolCallLoop};
