//! The agent loop — the heart of PowerNode.
//!
//! One chat turn follows this cycle:
//!
//! 1. **Discover** the tool catalog (built-ins + every configured server)
//! 2. **Send** the conversation to the LLM with the tool definitions
//! 3. **If tool calls**: execute them in order, append the results, go to 2
//! 4. **If text**: return the reply with the step log, usage and cost
//!
//! The loop stops when the model answers in text or the iteration ceiling
//! is reached. Tool failures feed back into the loop as error results;
//! only provider failures abort the turn.

pub mod loop_runner;

pub use loop_runner::{AgentService, FileContext, TurnOutcome};
