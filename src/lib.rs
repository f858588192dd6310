//! Autonomous content-editing pipeline for rich-text documents.
//!
//! The crate turns natural-language instructions and background insights into
//! reviewable (or risk-gated, auto-applied) HTML edits. The embedding
//! application owns storage, rendering and the LLM provider; it hands the
//! pipeline a [`generate::Generator`], a [`document::SnapshotStore`] and a
//! [`status::StatusSink`], and drives [`pipeline::EditPipeline`].
//!
//! Core pieces:
//! - [`html`] segments sanitized HTML into block spans and anchors text
//!   lookups against them.
//! - [`patch`] applies paragraph-level patch batches by anchor match.
//! - [`preview`] queues speculative candidates with partial-consumption
//!   support.
//! - [`apply`] commits a candidate to the live document, snapshot first.
//! - [`plan`] normalizes, renders and merges the structured goal plan block.
//! - [`risk`] and [`automation`] decide when unattended execution is safe.
//! - [`router`] picks applicable skills for a chat request.

pub mod apply;
pub mod automation;
pub mod config;
pub mod document;
pub mod generate;
pub mod html;
pub mod patch;
pub mod pipeline;
pub mod plan;
pub mod preview;
pub mod risk;
pub mod router;
pub mod scheduler;
pub mod status;

pub use apply::{ApplyMode, ApplyOutcome};
pub use automation::{AutomationController, AutomationStrategy};
pub use config::PipelineConfig;
pub use document::{Document, EditTarget, EditTrigger, SnapshotStore};
pub use generate::{CancelToken, GenerateError, Generator};
pub use patch::ParagraphPatch;
pub use pipeline::EditPipeline;
pub use plan::GoalPlan;
pub use preview::{PreviewItem, PreviewQueue};
pub use router::Skill;
pub use status::{OpStatus, StatusEvent, StatusSink};
