//! The generation pipeline: chart, manifest, and project synthesis stages.
//!
//! Every operation takes the project identity explicitly and runs
//! read-state, compose-prompt, invoke, extract, write-state in that order.
//! Raw model responses are persisted even when extraction fails, so a retry
//! always has the previous attempt to start from.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::extract::{extract_code_block, extract_json};
use crate::gateway::{
    ChatGateway, ChatModel, ChatRequest, Message, ProviderError, RetryConfig, RetryingGateway,
};
use crate::manifest::{FileManifest, FunctionCallChart};
use crate::prompts;
use crate::store::{
    FileRef, FileStore, ProjectKey, ProjectState, ProjectStore, StoreError, CHART_FILE,
    MANIFEST_FILE,
};

// =============================================================================
// Errors and outputs
// =============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Empty description or flowchart, rejected before any model call.
    #[error("{message}")]
    Validation { field: &'static str, message: String },

    /// No state stored under the given (account, project) key.
    #[error("project not found")]
    ProjectNotFound,

    /// A stage that needs the function-call chart ran before one was
    /// generated.
    #[error("function-call chart has not been generated for this project")]
    ChartMissing,

    /// A file selected for modification is not in the file store.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The composed prompt exceeds the configured input budget.
    #[error("prompt too large: {chars} chars (max {max})")]
    PromptTooLarge { chars: usize, max: usize },

    #[error(transparent)]
    Gateway(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a chart generation or modification stage. `chart` is `None` when
/// the reply did not contain parseable JSON; the raw response is persisted
/// either way.
#[derive(Debug)]
pub struct ChartOutput {
    pub raw_response: String,
    pub chart: Option<FunctionCallChart>,
    pub rendered: Option<String>,
}

/// Result of the file-manifest stage. `manifest` is `None` on extraction
/// failure.
#[derive(Debug)]
pub struct ManifestOutput {
    pub raw_response: String,
    pub manifest: Option<FileManifest>,
}

/// Per-file outcome of a bulk generation stage: content on success, a reason
/// on failure. One file's failure never aborts the batch.
pub type FileOutcome = Result<String, String>;

/// Outcome map of a synthesis run, keyed by `path/fname` identity.
#[derive(Debug, Default)]
pub struct SynthesisReport {
    pub outcomes: BTreeMap<String, FileOutcome>,
}

impl SynthesisReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Result of the incremental-modification stage. `updates` is `None` when the
/// reply did not contain parseable JSON.
#[derive(Debug)]
pub struct FeatureChangeOutput {
    pub raw_response: String,
    pub updates: Option<BTreeMap<String, FileOutcome>>,
}

/// Everything a caller needs to resume work on a stored project.
#[derive(Debug)]
pub struct ProjectSnapshot {
    pub state: ProjectState,
    pub chart_text: Option<String>,
    pub files: Vec<FileRef>,
}

// =============================================================================
// Validation
// =============================================================================

/// Reject empty inputs before any model call is made. The message names the
/// offending field.
pub fn validate_request(description: &str, flowchart: &str) -> Result<(), PipelineError> {
    if description.trim().is_empty() {
        return Err(PipelineError::Validation {
            field: "description",
            message: "Project description cannot be empty.".to_string(),
        });
    }
    if flowchart.trim().is_empty() {
        return Err(PipelineError::Validation {
            field: "flowchart",
            message: "Flowchart cannot be empty.".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model every stage is sent to.
    pub model: ChatModel,
    /// Rate-limit retry budget per gateway call.
    pub retry: RetryConfig,
    /// Input budget for the incremental-modification prompt, which resends
    /// whole file contents.
    pub max_prompt_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ChatModel::openai("gpt-4o"),
            retry: RetryConfig::default(),
            max_prompt_chars: 500_000,
        }
    }
}

/// The generation pipeline over a gateway and the two stores.
pub struct Pipeline {
    gateway: Arc<dyn ChatGateway>,
    projects: Arc<dyn ProjectStore>,
    files: Arc<dyn FileStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        projects: Arc<dyn ProjectStore>,
        files: Arc<dyn FileStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            projects,
            files,
            config,
        }
    }

    /// Fresh retrying invoker over the shared gateway. Each call (and each
    /// concurrent synthesis task) gets independent retry state.
    fn invoker(&self) -> RetryingGateway<Arc<dyn ChatGateway>> {
        RetryingGateway::with_config(self.gateway.clone(), self.config.retry.clone())
    }

    async fn invoke(&self, prompt: String) -> Result<String, PipelineError> {
        let req = ChatRequest::new(self.config.model.clone(), vec![Message::user(prompt)]);
        let resp = self.invoker().chat(req).await?;
        Ok(resp.content)
    }

    /// Generate the function-call chart from a description and flowchart.
    ///
    /// The description is resent only when the model has not seen it before
    /// (new project, first request, or changed description). Validation
    /// failures mutate nothing; the raw response is persisted even when it
    /// fails to parse.
    pub async fn generate_function_call_chart(
        &self,
        key: &ProjectKey,
        description: &str,
        flowchart: &str,
    ) -> Result<ChartOutput, PipelineError> {
        validate_request(description, flowchart)?;

        let existing = self.projects.get(key).await?;
        let resend_description = match &existing {
            None => true,
            Some(state) => state.description != description || !state.has_prior_request(),
        };

        let prompt = prompts::chart_generation(description, flowchart, resend_description);
        let raw = self.invoke(prompt).await?;

        let chart = extract_json(&raw).and_then(FunctionCallChart::from_object);
        if chart.is_none() {
            warn!(account = %key.account, project = %key.project, "chart extraction failed");
        }

        let state = ProjectState {
            description: description.to_string(),
            flowchart: flowchart.to_string(),
            last_model_response: Some(raw.clone()),
            function_call_chart: chart.clone(),
            file_manifest: existing.and_then(|s| s.file_manifest),
        };
        self.projects.put(key, &state).await?;

        let rendered = match &chart {
            Some(chart) => {
                let text = chart.render();
                self.files.write(key, "", CHART_FILE, &text).await?;
                Some(text)
            }
            None => None,
        };

        Ok(ChartOutput {
            raw_response: raw,
            chart,
            rendered,
        })
    }

    /// Apply a modification instruction to the existing chart.
    pub async fn modify_function_call_chart(
        &self,
        key: &ProjectKey,
        instruction: &str,
    ) -> Result<ChartOutput, PipelineError> {
        let mut state = self
            .projects
            .get(key)
            .await?
            .ok_or(PipelineError::ProjectNotFound)?;

        let existing_chart = state
            .last_model_response
            .clone()
            .ok_or(PipelineError::ChartMissing)?;

        let prompt = prompts::chart_modification(&existing_chart, instruction);
        let raw = self.invoke(prompt).await?;

        let chart = extract_json(&raw).and_then(FunctionCallChart::from_object);
        if chart.is_none() {
            warn!(account = %key.account, project = %key.project, "chart extraction failed");
        }

        // The stored chart must always be what the extractor yields from
        // `last_model_response`, even when that is nothing.
        state.last_model_response = Some(raw.clone());
        state.function_call_chart = chart.clone();
        self.projects.put(key, &state).await?;

        let rendered = match &chart {
            Some(chart) => {
                let text = chart.render();
                self.files.write(key, "", CHART_FILE, &text).await?;
                Some(text)
            }
            None => None,
        };

        Ok(ChartOutput {
            raw_response: raw,
            chart,
            rendered,
        })
    }

    /// Derive the file manifest for the project from its accumulated context.
    pub async fn generate_file_manifest(
        &self,
        key: &ProjectKey,
    ) -> Result<ManifestOutput, PipelineError> {
        let mut state = self
            .projects
            .get(key)
            .await?
            .ok_or(PipelineError::ProjectNotFound)?;

        let chart_text = state
            .last_model_response
            .clone()
            .ok_or(PipelineError::ChartMissing)?;

        let prompt = prompts::file_manifest(&state.description, &state.flowchart, &chart_text);
        let raw = self.invoke(prompt).await?;

        let manifest = extract_json(&raw).and_then(FileManifest::from_object);
        if manifest.is_none() {
            warn!(account = %key.account, project = %key.project, "manifest extraction failed");
        }

        if let Some(manifest) = &manifest {
            let json = serde_json::to_string(manifest).map_err(StoreError::from)?;
            self.files.write(key, "", MANIFEST_FILE, &json).await?;
            state.file_manifest = Some(manifest.clone());
            self.projects.put(key, &state).await?;
        }

        Ok(ManifestOutput {
            raw_response: raw,
            manifest,
        })
    }

    /// Synthesize content for every manifest entry, one concurrent task per
    /// file, and join them all before returning.
    ///
    /// Tasks share only the finalized manifest and write disjoint file-store
    /// keys. A failing (or panicking) task is reported in the outcome map
    /// under its file identity and never aborts the rest of the batch.
    pub async fn synthesize_project(
        &self,
        key: &ProjectKey,
        manifest: &FileManifest,
    ) -> Result<SynthesisReport, PipelineError> {
        let mut report = SynthesisReport::default();
        if manifest.files.is_empty() {
            return Ok(report);
        }

        let manifest = Arc::new(manifest.clone());
        let mut handles = Vec::with_capacity(manifest.files.len());

        for entry in &manifest.files {
            let entry = entry.clone();
            let file_id = entry.file_id();
            let manifest = manifest.clone();
            let key = key.clone();
            let files = self.files.clone();
            let model = self.config.model.clone();
            let invoker =
                RetryingGateway::with_config(self.gateway.clone(), self.config.retry.clone());

            let handle = tokio::spawn(async move {
                let prompt = prompts::file_implementation(&manifest, &entry);
                let req = ChatRequest::new(model, vec![Message::user(prompt)]);

                let resp = invoker.chat(req).await?;
                let content = extract_code_block(&resp.content);
                files
                    .write(&key, &entry.path, &entry.fname, &content)
                    .await?;
                Ok::<String, PipelineError>(content)
            });
            handles.push((file_id, handle));
        }

        for (file_id, handle) in handles {
            match handle.await {
                Ok(Ok(content)) => {
                    info!(file = %file_id, bytes = content.len(), "file synthesized");
                    report.outcomes.insert(file_id, Ok(content));
                }
                Ok(Err(e)) => {
                    warn!(file = %file_id, error = %e, "file synthesis failed");
                    report.outcomes.insert(file_id, Err(e.to_string()));
                }
                Err(join_err) => {
                    warn!(file = %file_id, error = %join_err, "synthesis task panicked");
                    report.outcomes.insert(file_id, Err(join_err.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Apply a feature-change instruction across the selected files.
    ///
    /// The prompt resends the full content of every selected file; if that
    /// exceeds the configured budget the operation fails up front rather than
    /// silently truncating the model's view of the project.
    pub async fn apply_feature_change(
        &self,
        key: &ProjectKey,
        instruction: &str,
        selected: &[FileRef],
    ) -> Result<FeatureChangeOutput, PipelineError> {
        let state = self
            .projects
            .get(key)
            .await?
            .ok_or(PipelineError::ProjectNotFound)?;

        let chart_text = state.last_model_response.clone().unwrap_or_default();

        let mut contents = Vec::with_capacity(selected.len());
        for file in selected {
            let content = self
                .files
                .read(key, &file.path, &file.fname)
                .await?
                .ok_or_else(|| PipelineError::FileNotFound(file.fname.clone()))?;
            contents.push((file.clone(), content));
        }

        let prompt = prompts::feature_change(
            &state.description,
            &state.flowchart,
            &chart_text,
            instruction,
            &contents,
        );
        let chars = prompt.chars().count();
        if chars > self.config.max_prompt_chars {
            return Err(PipelineError::PromptTooLarge {
                chars,
                max: self.config.max_prompt_chars,
            });
        }

        let raw = self.invoke(prompt).await?;

        let Some(reply) = extract_json(&raw) else {
            warn!(account = %key.account, project = %key.project, "feature change extraction failed");
            return Ok(FeatureChangeOutput {
                raw_response: raw,
                updates: None,
            });
        };

        let mut updates = BTreeMap::new();
        for (fname, value) in reply {
            let content = match &value {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            };

            let Some(content) = content else {
                updates.insert(fname, Err("unsupported value shape in reply".to_string()));
                continue;
            };

            // The reply is keyed by file name; the selection supplies paths.
            let Some(target) = contents
                .iter()
                .map(|(f, _)| f)
                .find(|f| f.fname == fname || f.file_id() == fname)
            else {
                updates.insert(fname, Err("file not in the selected set".to_string()));
                continue;
            };

            match self
                .files
                .write(key, &target.path, &target.fname, &content)
                .await
            {
                Ok(()) => {
                    updates.insert(fname, Ok(content));
                }
                Err(e) => {
                    updates.insert(fname, Err(e.to_string()));
                }
            }
        }

        Ok(FeatureChangeOutput {
            raw_response: raw,
            updates: Some(updates),
        })
    }

    /// Load everything stored for a project, or `None` if it does not exist.
    pub async fn load_project(
        &self,
        key: &ProjectKey,
    ) -> Result<Option<ProjectSnapshot>, PipelineError> {
        let Some(state) = self.projects.get(key).await? else {
            return Ok(None);
        };
        let chart_text = self.files.read(key, "", CHART_FILE).await?;
        let files = self.files.list(key).await?;
        Ok(Some(ProjectSnapshot {
            state,
            chart_text,
            files,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, FinishReason};
    use crate::store::MemoryStore;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Gateway stub that replays canned responses and records every prompt.
    struct ReplayGateway {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ReplayGateway {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ChatGateway for ReplayGateway {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.prompts
                .lock()
                .unwrap()
                .push(req.messages[0].content.clone());
            let content = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| "{}".to_string());
            Ok(ChatResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
                latency: Duration::from_millis(0),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    const CHART_JSON: &str = r#"{"1": {"title": "Game", "functions": [
        {"name": "game.play", "description": "play", "parameters": [
            {"name": "userChoice", "type": "string"}]}]}}"#;

    fn chart_reply() -> String {
        CHART_JSON.to_string()
    }

    fn pipeline_with(gateway: Arc<ReplayGateway>) -> (Pipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(
            gateway,
            store.clone(),
            store.clone(),
            PipelineConfig::default(),
        );
        (pipeline, store)
    }

    fn key() -> ProjectKey {
        ProjectKey::new("acct", "proj")
    }

    #[tokio::test]
    async fn validation_rejects_empty_fields_without_mutation() {
        let gateway = Arc::new(ReplayGateway::new(vec![]));
        let (pipeline, store) = pipeline_with(gateway.clone());

        let err = pipeline
            .generate_function_call_chart(&key(), "  ", "flow")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation { field: "description", .. }));
        assert_eq!(err.to_string(), "Project description cannot be empty.");

        let err = pipeline
            .generate_function_call_chart(&key(), "desc", "\n\t")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation { field: "flowchart", .. }));
        assert_eq!(err.to_string(), "Flowchart cannot be empty.");

        assert!(gateway.prompts().is_empty());
        assert!(store.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_chart_request_sends_description_later_ones_do_not() {
        let gateway = Arc::new(ReplayGateway::new(vec![]));
        let (pipeline, _) = pipeline_with(gateway.clone());

        // New project: description included.
        pipeline
            .generate_function_call_chart(&key(), "a game", "1. pick")
            .await
            .unwrap();
        // The stub replied "{}" which parses as an empty chart, so a prior
        // request is now recorded.
        pipeline
            .generate_function_call_chart(&key(), "a game", "2. show")
            .await
            .unwrap();
        // Changed description: resent again.
        pipeline
            .generate_function_call_chart(&key(), "a bigger game", "2. show")
            .await
            .unwrap();

        let prompts = gateway.prompts();
        assert!(prompts[0].contains("a game"));
        assert!(!prompts[1].contains("a game"));
        assert!(prompts[2].contains("a bigger game"));
    }

    #[tokio::test]
    async fn chart_is_parsed_rendered_and_persisted() {
        let reply = format!("```json\n{}\n```", chart_reply());
        let gateway = Arc::new(ReplayGateway::new(vec![reply.as_str()]));
        let (pipeline, store) = pipeline_with(gateway);

        let out = pipeline
            .generate_function_call_chart(&key(), "a game", "1. pick")
            .await
            .unwrap();

        let chart = out.chart.unwrap();
        assert_eq!(chart.sections["1"].title, "Game");
        assert!(out.rendered.unwrap().contains("game.play(userChoice: string)"));

        let state = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(state.last_model_response.as_deref(), Some(reply.as_str()));
        assert!(state.function_call_chart.is_some());

        let stored_chart = store.read(&key(), "", CHART_FILE).await.unwrap().unwrap();
        assert!(stored_chart.contains("1. Game"));
    }

    #[tokio::test]
    async fn unparseable_chart_still_persists_raw_response() {
        let gateway = Arc::new(ReplayGateway::new(vec!["no json here"]));
        let (pipeline, store) = pipeline_with(gateway);

        let out = pipeline
            .generate_function_call_chart(&key(), "a game", "1. pick")
            .await
            .unwrap();
        assert!(out.chart.is_none());
        assert!(out.rendered.is_none());

        let state = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(state.last_model_response.as_deref(), Some("no json here"));
        assert!(state.function_call_chart.is_none());
        assert!(store.read(&key(), "", CHART_FILE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn modification_requires_an_existing_project() {
        let gateway = Arc::new(ReplayGateway::new(vec![]));
        let (pipeline, _) = pipeline_with(gateway);

        let err = pipeline
            .modify_function_call_chart(&key(), "rename")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ProjectNotFound));
    }

    #[tokio::test]
    async fn modification_feeds_prior_chart_back_to_the_model() {
        let first = chart_reply();
        let gateway = Arc::new(ReplayGateway::new(vec![first.as_str(), first.as_str()]));
        let (pipeline, _) = pipeline_with(gateway.clone());

        pipeline
            .generate_function_call_chart(&key(), "a game", "1. pick")
            .await
            .unwrap();
        pipeline
            .modify_function_call_chart(&key(), "add a score section")
            .await
            .unwrap();

        let prompts = gateway.prompts();
        assert!(prompts[1].contains(&first));
        assert!(prompts[1].contains("add a score section"));
    }

    #[tokio::test]
    async fn failed_modification_parse_clears_the_stored_chart() {
        let first = chart_reply();
        let gateway = Arc::new(ReplayGateway::new(vec![first.as_str(), "no json here"]));
        let (pipeline, store) = pipeline_with(gateway);

        pipeline
            .generate_function_call_chart(&key(), "a game", "1. pick")
            .await
            .unwrap();
        let out = pipeline
            .modify_function_call_chart(&key(), "add a score section")
            .await
            .unwrap();
        assert!(out.chart.is_none());

        // The stored chart must match what re-extracting the stored raw
        // response yields.
        let state = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(state.last_model_response.as_deref(), Some("no json here"));
        let reproduced = crate::extract::extract_json(state.last_model_response.as_deref().unwrap())
            .and_then(FunctionCallChart::from_object);
        assert_eq!(state.function_call_chart, reproduced);
        assert!(state.function_call_chart.is_none());
    }

    #[tokio::test]
    async fn manifest_stage_requires_a_chart() {
        let gateway = Arc::new(ReplayGateway::new(vec![]));
        let (pipeline, store) = pipeline_with(gateway);

        store
            .put(&key(), &ProjectState::new("d", "f"))
            .await
            .unwrap();
        let err = pipeline.generate_file_manifest(&key()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ChartMissing));
    }

    #[tokio::test]
    async fn manifest_is_parsed_and_persisted() {
        let manifest_reply = r#"```json
{"plan": "one file", "Files": [
    {"path": "", "fname": "game.py", "objectName": "NoneObject",
     "functionList": ["play(userChoice)"]}
]}
```"#;
        let chart = chart_reply();
        let gateway = Arc::new(ReplayGateway::new(vec![chart.as_str(), manifest_reply]));
        let (pipeline, store) = pipeline_with(gateway);

        pipeline
            .generate_function_call_chart(&key(), "a game", "1. pick")
            .await
            .unwrap();
        let out = pipeline.generate_file_manifest(&key()).await.unwrap();

        let manifest = out.manifest.unwrap();
        assert_eq!(manifest.plan, "one file");
        assert_eq!(manifest.files[0].fname, "game.py");

        let state = store.get(&key()).await.unwrap().unwrap();
        assert!(state.file_manifest.is_some());
        assert!(store
            .read(&key(), "", MANIFEST_FILE)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn empty_manifest_synthesizes_nothing() {
        let gateway = Arc::new(ReplayGateway::new(vec![]));
        let (pipeline, store) = pipeline_with(gateway.clone());

        let manifest = FileManifest {
            plan: String::new(),
            files: Vec::new(),
        };
        let report = pipeline.synthesize_project(&key(), &manifest).await.unwrap();
        assert!(report.outcomes.is_empty());
        assert!(gateway.prompts().is_empty());
        assert!(store.list(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn feature_change_enforces_the_prompt_budget() {
        let gateway = Arc::new(ReplayGateway::new(vec![]));
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig {
            max_prompt_chars: 200,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(gateway.clone(), store.clone(), store.clone(), config);

        let mut state = ProjectState::new("d", "f");
        state.last_model_response = Some("chart".into());
        store.put(&key(), &state).await.unwrap();
        store
            .write(&key(), "", "big.py", &"x".repeat(500))
            .await
            .unwrap();

        let selection = [FileRef {
            path: String::new(),
            fname: "big.py".into(),
        }];
        let err = pipeline
            .apply_feature_change(&key(), "change it", &selection)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PromptTooLarge { .. }));
        assert!(gateway.prompts().is_empty());
    }

    #[tokio::test]
    async fn feature_change_accepts_both_reply_shapes() {
        let reply = r#"{"a.py": "new a", "b.py": {"content": "new b"}, "c.py": 42}"#;
        let gateway = Arc::new(ReplayGateway::new(vec![reply]));
        let (pipeline, store) = pipeline_with(gateway);

        let mut state = ProjectState::new("d", "f");
        state.last_model_response = Some("chart".into());
        store.put(&key(), &state).await.unwrap();
        for fname in ["a.py", "b.py", "c.py"] {
            store.write(&key(), "", fname, "old").await.unwrap();
        }

        let selection: Vec<FileRef> = ["a.py", "b.py", "c.py"]
            .iter()
            .map(|f| FileRef {
                path: String::new(),
                fname: (*f).to_string(),
            })
            .collect();

        let out = pipeline
            .apply_feature_change(&key(), "rewrite", &selection)
            .await
            .unwrap();
        let updates = out.updates.unwrap();
        assert_eq!(updates["a.py"], Ok("new a".to_string()));
        assert_eq!(updates["b.py"], Ok("new b".to_string()));
        assert!(updates["c.py"].is_err());

        assert_eq!(
            store.read(&key(), "", "a.py").await.unwrap().as_deref(),
            Some("new a")
        );
        assert_eq!(
            store.read(&key(), "", "c.py").await.unwrap().as_deref(),
            Some("old")
        );
    }

    #[tokio::test]
    async fn feature_change_matches_path_keyed_replies_with_slashed_selections() {
        let reply = r#"{"lib/util.py": "new util"}"#;
        let gateway = Arc::new(ReplayGateway::new(vec![reply]));
        let (pipeline, store) = pipeline_with(gateway);

        let mut state = ProjectState::new("d", "f");
        state.last_model_response = Some("chart".into());
        store.put(&key(), &state).await.unwrap();
        store.write(&key(), "lib/", "util.py", "old").await.unwrap();

        // Trailing slash on the selection path must not defeat the match.
        let selection = [FileRef {
            path: "lib/".into(),
            fname: "util.py".into(),
        }];
        let out = pipeline
            .apply_feature_change(&key(), "rewrite", &selection)
            .await
            .unwrap();
        let updates = out.updates.unwrap();
        assert_eq!(updates["lib/util.py"], Ok("new util".to_string()));
        assert_eq!(
            store.read(&key(), "lib", "util.py").await.unwrap().as_deref(),
            Some("new util")
        );
    }

    #[tokio::test]
    async fn load_project_round_trip() {
        let chart = chart_reply();
        let gateway = Arc::new(ReplayGateway::new(vec![chart.as_str()]));
        let (pipeline, store) = pipeline_with(gateway);

        assert!(pipeline.load_project(&key()).await.unwrap().is_none());

        pipeline
            .generate_function_call_chart(&key(), "a game", "1. pick")
            .await
            .unwrap();
        store.write(&key(), "", "game.py", "code").await.unwrap();

        let snapshot = pipeline.load_project(&key()).await.unwrap().unwrap();
        assert_eq!(snapshot.state.description, "a game");
        assert!(snapshot.chart_text.unwrap().contains("1. Game"));
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.files[0].fname, "game.py");
    }
}
