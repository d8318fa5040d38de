//! The agent loop implementation.

use std::sync::Arc;

use powernode_config::{LimitsConfig, ProviderConfig};
use powernode_core::catalog::ToolCall;
use powernode_core::message::{Conversation, Message};
use powernode_core::provider::{Provider, ProviderRequest, ProviderResponse, StopReason};
use powernode_telemetry::{PricingTable, StepLog, UsageTotals};
use powernode_tools::ToolEngine;
use tracing::{debug, info};

/// Request context passed alongside a chat message: an optional file
/// attachment plus the wippli (work item) the conversation belongs to.
///
/// The fields are rendered into the system context so the model knows the
/// file exists and which tool arguments reach it.
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub file_id: Option<String>,
    pub drive_id: Option<String>,
    pub storage_provider: Option<String>,
    pub wippli_id: Option<String>,
}

impl FileContext {
    pub fn is_empty(&self) -> bool {
        !self.has_file() && self.wippli_id.is_none()
    }

    fn has_file(&self) -> bool {
        self.file_name.is_some()
            || self.file_url.is_some()
            || self.file_id.is_some()
            || self.drive_id.is_some()
            || self.storage_provider.is_some()
    }

    /// Render the attachment into a system context block.
    fn render(&self) -> Option<String> {
        let mut sections: Vec<String> = Vec::new();

        if self.has_file() {
            let mut lines = vec!["The user has attached a file to this conversation:".to_string()];
            if let Some(name) = &self.file_name {
                lines.push(format!("- name: {name}"));
            }
            if let Some(id) = &self.file_id {
                lines.push(format!("- file id: {id} (usable with the file reading tools)"));
            }
            if let Some(drive) = &self.drive_id {
                lines.push(format!("- drive id: {drive}"));
            }
            if let Some(provider) = &self.storage_provider {
                lines.push(format!("- storage provider: {provider}"));
            }
            if let Some(url) = &self.file_url {
                lines.push(format!("- url: {url}"));
            }
            lines.push("Use the available tools to read it when the question needs its content.".into());
            sections.push(lines.join("\n"));
        }

        if let Some(wippli) = &self.wippli_id {
            sections.push(format!("This conversation belongs to wippli {wippli}."));
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}

/// What one chat turn produced, for the API response and persistence.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Final assistant text.
    pub reply: String,

    /// Token totals across every provider call in the turn.
    pub usage: UsageTotals,

    /// Estimated cost in USD for the turn.
    pub cost: f64,

    /// Model that produced the reply.
    pub model: String,

    /// Number of tool calls executed.
    pub tools_executed: u32,

    /// Number of tools the model could have called.
    pub tools_available: usize,

    /// Tool round trips taken (0 for a plain reply).
    pub iterations: u32,
}

/// Orchestrates provider calls and tool execution for one chat turn.
///
/// All collaborators are injected; nothing here reads global state.
pub struct AgentService {
    provider: Arc<dyn Provider>,
    engine: Arc<ToolEngine>,
    pricing: Arc<PricingTable>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    max_iterations: u32,
}

impl AgentService {
    pub fn new(
        provider: Arc<dyn Provider>,
        engine: Arc<ToolEngine>,
        pricing: Arc<PricingTable>,
        provider_config: &ProviderConfig,
        limits: &LimitsConfig,
    ) -> Self {
        Self {
            provider,
            engine,
            pricing,
            model: provider_config.model.clone(),
            temperature: provider_config.temperature,
            max_tokens: Some(provider_config.max_tokens),
            system_prompt: provider_config.system_prompt.clone(),
            max_iterations: limits.max_tool_iterations,
        }
    }

    /// Override the model for this service.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the tool round trip ceiling.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Run one chat turn over the conversation.
    ///
    /// The conversation must already end with the user's new message. The
    /// loop calls the provider, executes any requested tools in order, feeds
    /// the results back, and repeats until the model answers in text or the
    /// iteration ceiling stops it. Provider failures abort the turn; tool
    /// failures never do. `steps` is caller-owned so the log survives an
    /// aborted turn and can be returned in the error payload.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        file: Option<&FileContext>,
        steps: &mut StepLog,
    ) -> Result<TurnOutcome, powernode_core::Error> {
        let mut usage = UsageTotals::default();
        let mut tools_executed: u32 = 0;

        info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            model = %self.model,
            "Starting chat turn"
        );

        let catalog = self.engine.discover(steps).await;
        let definitions = catalog.definitions();
        let tools_available = catalog.len();
        steps.info(format!("Tool catalog ready: {tools_available} tools available"));

        let system = self.compose_system(file);

        steps.info(format!(
            "Sending request to {} ({tools_available} tools attached)",
            self.model
        ));
        let mut response = self.complete(conversation, &definitions, system.clone()).await?;
        self.record_usage(&response, &mut usage, steps);

        let mut iterations: u32 = 0;
        while Self::requests_tools(&response) && iterations < self.max_iterations {
            iterations += 1;
            let calls: Vec<ToolCall> = response
                .message
                .tool_calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                })
                .collect();

            steps.info(format!(
                "Model requested {} tool call(s) (round {iterations})",
                calls.len()
            ));
            conversation.push(response.message);

            let results = self.engine.execute_calls(&catalog, &calls, steps).await;
            tools_executed += results.len() as u32;
            for result in results {
                conversation.push(Message::tool_result(&result.call_id, &result.content, result.is_error));
            }

            steps.info(format!("Sending tool results to {} (round {iterations})", self.model));
            response = self.complete(conversation, &definitions, system.clone()).await?;
            self.record_usage(&response, &mut usage, steps);
        }

        let model = if response.model.is_empty() {
            self.model.clone()
        } else {
            response.model.clone()
        };

        // Whatever text the final response carries is the reply, even when
        // the ceiling cut the turn off and that text is empty.
        let reply = response.message.content.clone();
        if Self::requests_tools(&response) {
            steps.warn(format!(
                "Tool iteration limit ({}) reached; replying with the latest response",
                self.max_iterations
            ));
        }
        if response.message.tool_calls.is_empty() {
            conversation.push(response.message);
        } else {
            // Unexecuted tool calls stay out of the stored history; a resumed
            // turn would otherwise start on a dangling tool_use.
            conversation.push(Message::assistant(&reply));
        }

        let cost = self.pricing.compute_cost(&model, usage.input_tokens, usage.output_tokens);
        steps.success(format!(
            "Chat turn complete: {iterations} tool round(s), {} tokens, ${cost:.6}",
            usage.total()
        ));

        Ok(TurnOutcome {
            reply,
            usage,
            cost,
            model,
            tools_executed,
            tools_available,
            iterations,
        })
    }

    /// Whether the response asks for another tool round: the model stopped
    /// for tool use and actually attached calls to execute.
    fn requests_tools(response: &ProviderResponse) -> bool {
        response.stop_reason.is_some_and(StopReason::wants_tools)
            && !response.message.tool_calls.is_empty()
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        definitions: &[powernode_core::provider::ToolDefinition],
        system: Option<String>,
    ) -> Result<ProviderResponse, powernode_core::Error> {
        let request = ProviderRequest {
            model: self.model.clone(),
            system,
            messages: conversation.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: definitions.to_vec(),
        };

        debug!(model = %self.model, messages = request.messages.len(), "Provider request");
        Ok(self.provider.complete(request).await?)
    }

    fn record_usage(&self, response: &ProviderResponse, usage: &mut UsageTotals, steps: &mut StepLog) {
        if let Some(u) = &response.usage {
            usage.add(u.input_tokens as u64, u.output_tokens as u64);
            steps.success(format!(
                "Model responded ({} input / {} output tokens)",
                u.input_tokens, u.output_tokens
            ));
        } else {
            steps.success("Model responded (no usage reported)");
        }
    }

    fn compose_system(&self, file: Option<&FileContext>) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            parts.push(prompt.clone());
        }
        if let Some(rendered) = file.and_then(FileContext::render) {
            parts.push(rendered);
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use powernode_config::OneDriveConfig;
    use powernode_core::catalog::BuiltinTool;
    use powernode_core::error::{ProviderError, ToolError};
    use powernode_core::message::{MessageToolCall, Role};
    use powernode_core::provider::{StopReason, Usage};
    use powernode_telemetry::StepLevel;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Provider that replays a fixed script and records every request.
    struct ScriptedProvider {
        script: Mutex<VecDeque<ProviderResponse>>,
        calls: AtomicU32,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<ProviderResponse>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn request(&self, index: usize) -> ProviderRequest {
            self.requests.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 500,
                    message: "script exhausted: unexpected extra call".into(),
                })
        }
    }

    fn text_response(text: &str) -> ProviderResponse {
        ProviderResponse {
            message: Message::assistant(text),
            stop_reason: Some(StopReason::EndTurn),
            usage: Some(Usage {
                input_tokens: 100,
                output_tokens: 50,
            }),
            model: "claude-sonnet-4-20250514".into(),
        }
    }

    fn tool_response(calls: Vec<(&str, &str, serde_json::Value)>) -> ProviderResponse {
        let tool_calls = calls
            .into_iter()
            .map(|(id, name, arguments)| MessageToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            })
            .collect();
        ProviderResponse {
            message: Message::assistant_with_tools("", tool_calls),
            stop_reason: Some(StopReason::ToolUse),
            usage: Some(Usage {
                input_tokens: 100,
                output_tokens: 50,
            }),
            model: "claude-sonnet-4-20250514".into(),
        }
    }

    struct EchoTool;

    #[async_trait]
    impl BuiltinTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(format!("echo: {}", arguments["text"].as_str().unwrap_or("")))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl BuiltinTool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "broken".into(),
                reason: "upstream returned HTTP 500".into(),
            })
        }
    }

    fn service(provider: Arc<ScriptedProvider>) -> AgentService {
        let engine = ToolEngine::new(
            reqwest::Client::new(),
            &[],
            &OneDriveConfig::default(),
            LimitsConfig::default(),
        )
        .with_builtin("test", Arc::new(EchoTool))
        .with_builtin("test", Arc::new(BrokenTool));

        AgentService::new(
            provider,
            Arc::new(engine),
            Arc::new(PricingTable::with_defaults()),
            &ProviderConfig::default(),
            &LimitsConfig::default(),
        )
    }

    fn conversation(text: &str) -> Conversation {
        let mut conv = Conversation::new();
        conv.push(Message::user(text));
        conv
    }

    #[tokio::test]
    async fn plain_reply_makes_exactly_one_call() {
        let provider = ScriptedProvider::new(vec![text_response("2+2 is 4.")]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("What is 2+2?");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.reply, "2+2 is 4.");
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.tools_executed, 0);
        assert_eq!(outcome.usage.total(), 150);
        // user + assistant
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_round_trip_feeds_results_back() {
        let provider = ScriptedProvider::new(vec![
            tool_response(vec![("toolu_1", "test__echo", serde_json::json!({"text": "hi"}))]),
            text_response("The tool said: echo: hi"),
        ]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("Run echo");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();

        assert_eq!(provider.calls(), 2);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.tools_executed, 1);
        assert_eq!(outcome.reply, "The tool said: echo: hi");

        // Second request carries the tool result message
        let second = provider.request(1);
        let tool_msg = second
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool result in follow-up request");
        assert_eq!(tool_msg.content, "echo: hi");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("toolu_1"));
    }

    #[tokio::test]
    async fn multiple_calls_execute_in_order() {
        let provider = ScriptedProvider::new(vec![
            tool_response(vec![
                ("toolu_a", "test__echo", serde_json::json!({"text": "first"})),
                ("toolu_b", "test__echo", serde_json::json!({"text": "second"})),
            ]),
            text_response("done"),
        ]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("Run both");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();
        assert_eq!(outcome.tools_executed, 2);

        let second = provider.request(1);
        let tool_ids: Vec<&str> = second
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["toolu_a", "toolu_b"]);
    }

    #[tokio::test]
    async fn ceiling_stops_further_round_trips() {
        // Five tool rounds are allowed; the sixth response still asks for
        // tools, so the loop must stop without another provider call.
        let script: Vec<ProviderResponse> = (0..6)
            .map(|i| {
                tool_response(vec![(
                    format!("toolu_{i}").as_str(),
                    "test__echo",
                    serde_json::json!({"text": "again"}),
                )])
            })
            .collect();
        let provider = ScriptedProvider::new(script);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("Loop forever");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();

        assert_eq!(provider.calls(), 6); // 1 initial + 5 follow-ups
        assert_eq!(outcome.iterations, 5);
        assert_eq!(outcome.tools_executed, 5);
        // The last response carried no text, so the reply is empty as-is
        assert_eq!(outcome.reply, "");
        assert!(steps
            .entries()
            .iter()
            .any(|e| e.level == StepLevel::Warn && e.message.contains("iteration limit")));

        // The stored history must not end on unexecuted tool calls
        let last = conv.messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn tool_calls_without_tool_use_stop_are_not_executed() {
        // A response that carries tool calls but stopped for another reason
        // (here end_turn) ends the turn; the calls are dropped from history.
        let mut response = tool_response(vec![(
            "toolu_1",
            "test__echo",
            serde_json::json!({"text": "stray"}),
        )]);
        response.stop_reason = Some(StopReason::EndTurn);
        let provider = ScriptedProvider::new(vec![response]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("hello");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.tools_executed, 0);

        let last = conv.messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn failing_tool_continues_the_loop() {
        let provider = ScriptedProvider::new(vec![
            tool_response(vec![("toolu_1", "test__broken", serde_json::json!({}))]),
            text_response("The tool failed, but here is what I know."),
        ]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("Try the broken tool");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();

        assert_eq!(provider.calls(), 2);
        assert_eq!(outcome.reply, "The tool failed, but here is what I know.");

        let second = provider.request(1);
        let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.is_error);
        assert!(tool_msg.content.contains("HTTP 500"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result() {
        let provider = ScriptedProvider::new(vec![
            tool_response(vec![("toolu_1", "ghost__vanish", serde_json::json!({}))]),
            text_response("That tool does not exist."),
        ]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("Use a ghost tool");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();
        assert_eq!(outcome.reply, "That tool does not exist.");

        let second = provider.request(1);
        let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.is_error);
        assert!(tool_msg.content.contains("Tool not found"));
    }

    #[tokio::test]
    async fn usage_accumulates_and_cost_is_computed() {
        let provider = ScriptedProvider::new(vec![
            tool_response(vec![("toolu_1", "test__echo", serde_json::json!({"text": "x"}))]),
            text_response("done"),
        ]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("go");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();

        assert_eq!(outcome.usage.input_tokens, 200);
        assert_eq!(outcome.usage.output_tokens, 100);
        // claude-sonnet-4: $3/M input, $15/M output
        let expected = (200.0 * 3.0 + 100.0 * 15.0) / 1_000_000.0;
        assert!((outcome.cost - expected).abs() < 1e-12);
        assert_eq!(outcome.model, "claude-sonnet-4-20250514");
    }

    #[tokio::test]
    async fn file_context_lands_in_system() {
        let provider = ScriptedProvider::new(vec![text_response("I see the file.")]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("What's in the attached report?");

        let file = FileContext {
            file_name: Some("q3-report.xlsx".into()),
            file_id: Some("ITEM42".into()),
            storage_provider: Some("onedrive".into()),
            ..FileContext::default()
        };
        let mut steps = StepLog::new();
        agent.run(&mut conv, Some(&file), &mut steps).await.unwrap();

        let first = provider.request(0);
        let system = first.system.expect("system context present");
        assert!(system.contains("q3-report.xlsx"));
        assert!(system.contains("ITEM42"));
    }

    #[tokio::test]
    async fn tools_available_reported_from_catalog() {
        let provider = ScriptedProvider::new(vec![text_response("hi")]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("hi");
        let mut steps = StepLog::new();

        let outcome = agent.run(&mut conv, None, &mut steps).await.unwrap();
        assert_eq!(outcome.tools_available, 2); // echo + broken

        let first = provider.request(0);
        let names: Vec<&str> = first.tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"test__echo"));
        assert!(names.contains(&"test__broken"));
    }

    #[tokio::test]
    async fn provider_failure_aborts_the_turn() {
        let provider = ScriptedProvider::new(vec![]);
        let agent = service(Arc::clone(&provider));
        let mut conv = conversation("hello");
        let mut steps = StepLog::new();

        let err = agent.run(&mut conv, None, &mut steps).await.unwrap_err();
        assert!(err.to_string().contains("script exhausted"));
        // The log written before the failure is still in the caller's hands
        assert!(!steps.is_empty());
    }

    #[test]
    fn empty_file_context_renders_nothing() {
        assert!(FileContext::default().render().is_none());

        let file = FileContext {
            file_url: Some("https://example.com/f.csv".into()),
            ..FileContext::default()
        };
        let rendered = file.render().unwrap();
        assert!(rendered.contains("https://example.com/f.csv"));
    }

    #[test]
    fn wippli_only_context_skips_the_file_block() {
        let context = FileContext {
            wippli_id: Some("5831".into()),
            ..FileContext::default()
        };
        let rendered = context.render().unwrap();
        assert!(rendered.contains("wippli 5831"));
        assert!(!rendered.contains("attached a file"));
    }
}
