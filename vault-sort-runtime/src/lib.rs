//! vault-sort runtime core
//!
//! Oracle client, action validation, the step loop and the run state machine
//! that sort an inbox into a personal file vault.

pub mod agent_loop;
pub mod cleanup;
pub mod cohesion;
pub mod interfaces;
pub mod intake;
pub mod json_coerce;
pub mod llm_client;
pub mod memory;
pub mod metrics;
pub mod oracle;
pub mod prompt;
pub mod run_config;
pub mod runtime_controller;
pub mod scripted;
pub mod types;
pub mod validator;

pub use agent_loop::{AgentLoop, LoopExit, LoopSettings, StepCounters};
pub use cleanup::{remove_empty_dirs, Flattened, Flattener};
pub use cohesion::{CohesionTracker, Vote};
pub use interfaces::{CompletionRequest, LlmBackend, RuntimeError};
pub use intake::{stage_intake_roots, IntakeReport};
pub use json_coerce::coerce_action;
pub use llm_client::LLMClient;
pub use memory::{MemoryEntry, MemoryWindow};
pub use oracle::{ActionOracle, OracleSettings};
pub use prompt::{PromptBuilder, PromptContext};
pub use run_config::{CohesionConfig, DestinationPolicy, PeopleTable, RunConfig, Taxonomy};
pub use runtime_controller::{RunPhase, RunSummary, RuntimeController, StopReason};
pub use scripted::ScriptedBackend;
pub use types::{Action, AttemptOutcome, Decision};
pub use validator::{ActionValidator, MovePlan, ValidatedAction, ValidationError};
