//! Ticket triage agent: a reasoning engine proposes tool calls against a
//! closed tool surface until one task is created or updated.

pub mod agent;
pub mod parse;
pub mod prompt;
pub mod tools;

#[cfg(test)]
mod testing;

pub use agent::{Agent, LoopState, RunOutcome};
pub use parse::{ProposedAction, parse_action, strip_code_fences};
pub use prompt::{STOP_SEQUENCE, render, system_prompt};
pub use tools::{TOOLSET_VERSION, ToolCall, ToolOutput, ToolSchema, ToolSurface, tool_schemas};
