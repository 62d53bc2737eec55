//! Evaluation pipeline.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fb_case::{CaseConfig, CaseTemplate, ParameterVector};
use fb_core::{ErrorKind, EvalId};
use fb_deploy::{ConfigParamDef, ConfigValue, Deployment, InputDef, ModelDef};
use fb_results::{EvalOutcome, EvalRecord, EvalStore, EvalTimings, compute_eval_key, should_extract};
use fb_runner::RunLimits;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::checks::check_deployment;
use crate::error::{ServiceError, ServiceResult};
use crate::progress::{EvalProgressEvent, EvalStage};
use crate::workspace::{Workspace, WorkspaceManager};

/// Per-request options.
///
/// Every key other than `timeout_s` names one of the model's declared config
/// parameters; unknown names are rejected when the request is bound.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Shortens the model's solver timeout; never extends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
    #[serde(flatten)]
    pub params: BTreeMap<String, ConfigValue>,
}

impl EvalConfig {
    /// Parse the optional `config` object of a request.
    pub fn from_value(value: Option<serde_json::Value>) -> ServiceResult<Self> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(v) => serde_json::from_value(v)
                .map_err(|e| ServiceError::InvalidRequest(format!("config: {e}"))),
        }
    }

    pub fn with_timeout(timeout_s: Option<f64>) -> Self {
        Self {
            timeout_s,
            params: BTreeMap::new(),
        }
    }

    pub fn set(mut self, name: impl Into<String>, value: ConfigValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// The request as the solver sees it: every declared option resolved,
    /// defaults included. Requests that only differ in spelling out a
    /// default resolve identically.
    fn effective(&self, case: &CaseConfig) -> Self {
        Self {
            timeout_s: self.timeout_s,
            params: case.values().clone(),
        }
    }

    fn requested_timeout(&self) -> ServiceResult<Option<Duration>> {
        match self.timeout_s {
            None => Ok(None),
            Some(t) if t.is_finite() && t > 0.0 => {
                Ok(Some(Duration::try_from_secs_f64(t).unwrap_or(Duration::MAX)))
            }
            Some(t) => Err(ServiceError::InvalidRequest(format!(
                "config.timeout_s must be a positive number, got {t}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvalRequest {
    pub model: String,
    pub inputs: Vec<f64>,
    pub config: EvalConfig,
}

impl EvalRequest {
    pub fn new(model: impl Into<String>, inputs: Vec<f64>) -> Self {
        Self {
            model: model.into(),
            inputs,
            config: EvalConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvalResponse {
    pub eval_id: EvalId,
    pub model: String,
    pub outputs: Vec<f64>,
    /// Extracted from a run that exited nonzero.
    pub partial: bool,
    /// Served from the journal without running the solver.
    pub reused: bool,
    pub timing: EvalTimings,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputDescription {
    pub name: String,
    pub size: usize,
}

/// What a client needs to know to call a model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescription {
    pub name: String,
    pub input_size: usize,
    pub output_size: usize,
    pub inputs: Vec<InputDef>,
    pub outputs: Vec<OutputDescription>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigParamDef>,
}

struct LoadedModel {
    def: ModelDef,
    template: CaseTemplate,
}

/// Serves evaluations for every model of one deployment.
pub struct ModelServer {
    deployment: Deployment,
    models: BTreeMap<String, Arc<LoadedModel>>,
    workspaces: WorkspaceManager,
    journal: Option<EvalStore>,
    reuse_results: bool,
    shutdown: CancellationToken,
}

impl ModelServer {
    /// Load a deployment file and prepare it for serving.
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let deployment = fb_deploy::load(path)?;
        Self::from_deployment(deployment)
    }

    /// Run the startup checks, prepare the workspace root (removing stale
    /// workspaces) and open the journal.
    pub fn from_deployment(deployment: Deployment) -> ServiceResult<Self> {
        let templates = check_deployment(&deployment)?;

        let workspaces =
            WorkspaceManager::new(&deployment.workspace).map_err(|e| ServiceError::DeploymentCheck {
                subject: "workspace root".to_string(),
                reason: e.to_string(),
            })?;
        workspaces.remove_stale()?;

        let journal = match &deployment.journal {
            Some(def) => Some(EvalStore::new(def.dir.clone()).map_err(|e| {
                ServiceError::DeploymentCheck {
                    subject: "journal".to_string(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        let reuse_results = deployment.journal.as_ref().is_some_and(|j| j.reuse_results);

        let models = deployment
            .models
            .iter()
            .cloned()
            .zip(templates)
            .map(|(def, template)| (def.name.clone(), Arc::new(LoadedModel { def, template })))
            .collect();

        tracing::info!(
            models = ?deployment.model_names(),
            max_concurrent = workspaces.capacity(),
            journal = journal.is_some(),
            "model server ready"
        );

        Ok(Self {
            deployment,
            models,
            workspaces,
            journal,
            reuse_results,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn model(&self, name: &str) -> ServiceResult<&ModelDef> {
        self.loaded(name).map(|m| &m.def)
    }

    pub fn describe(&self, name: &str) -> ServiceResult<ModelDescription> {
        let def = self.model(name)?;
        Ok(ModelDescription {
            name: def.name.clone(),
            input_size: def.input_arity(),
            output_size: def.output_arity(),
            inputs: def.inputs.clone(),
            outputs: def
                .outputs
                .iter()
                .map(|o| OutputDescription {
                    name: o.name.clone(),
                    size: o.size(),
                })
                .collect(),
            config: def.config.clone(),
        })
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn journal(&self) -> Option<&EvalStore> {
        self.journal.as_ref()
    }

    /// Token cancelled on shutdown; every in-flight run observes it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every in-flight and queued evaluation.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn loaded(&self, name: &str) -> ServiceResult<&Arc<LoadedModel>> {
        self.models
            .get(name)
            .ok_or_else(|| ServiceError::UnknownModel(name.to_string()))
    }

    /// Evaluate one parameter vector.
    pub async fn evaluate(&self, request: EvalRequest) -> ServiceResult<EvalResponse> {
        self.evaluate_with_progress(request, None).await
    }

    /// Evaluate one parameter vector and report stage transitions.
    pub async fn evaluate_with_progress(
        &self,
        request: EvalRequest,
        progress: Option<&mut (dyn FnMut(EvalProgressEvent) + Send)>,
    ) -> ServiceResult<EvalResponse> {
        let mut tracker = Tracker {
            progress,
            eval_id: EvalId::new(),
            model: request.model.clone(),
            started: Instant::now(),
        };
        let span = tracing::info_span!("evaluate", eval_id = %tracker.eval_id, model = %request.model);

        async move {
            tracker.emit(EvalStage::Received, None);
            tracing::info!(inputs = request.inputs.len(), "evaluation received");

            let mut attempt = Attempt::default();
            let mut result = self.pipeline(&request, &mut tracker, &mut attempt).await;

            match &result {
                Ok(response) => tracker.emit(
                    EvalStage::Succeeded,
                    Some(format!("{} outputs", response.outputs.len())),
                ),
                Err(e) => {
                    tracing::warn!(kind = %e.kind(), error = %e, "evaluation failed");
                    tracker.emit(EvalStage::Failed, Some(e.to_string()));
                }
            }

            if let Some(workspace) = attempt.workspace.take() {
                workspace.release().await;
            }
            attempt.timings.total_s = tracker.elapsed_s();
            if let Ok(response) = &mut result {
                response.timing = attempt.timings;
            }

            if let Some(key) = attempt.key.take()
                && !attempt.reused
            {
                let config = attempt.config.take().unwrap_or_else(|| request.config.clone());
                self.record(&request, &config, tracker.eval_id, key, &attempt.timings, &result)
                    .await;
            }

            tracker.emit(EvalStage::Released, None);
            tracing::info!(elapsed_s = attempt.timings.total_s, ok = result.is_ok(), "evaluation released");
            result
        }
        .instrument(span)
        .await
    }

    async fn pipeline(
        &self,
        request: &EvalRequest,
        tracker: &mut Tracker<'_>,
        attempt: &mut Attempt,
    ) -> ServiceResult<EvalResponse> {
        // Validation touches no files.
        let model = Arc::clone(self.loaded(&request.model)?);
        let params = ParameterVector::bind(&model.def.inputs, &request.inputs)?;
        let case_config = CaseConfig::resolve(&model.def.config, &request.config.params)?;
        let requested_timeout = request.config.requested_timeout()?;
        let config = request.config.effective(&case_config);
        let key = compute_eval_key(&model.def, &request.inputs, &config);
        attempt.key = Some(key.clone());
        attempt.config = Some(config);

        if let Some(outputs) = self.reusable(&model.def.name, &key).await {
            tracing::info!(key = %key, "reusing journaled result");
            attempt.reused = true;
            tracker.emit(EvalStage::Reused, Some(format!("journal key {key}")));
            return Ok(EvalResponse {
                eval_id: tracker.eval_id,
                model: model.def.name.clone(),
                outputs,
                partial: false,
                reused: true,
                timing: EvalTimings::default(),
            });
        }

        let cancel = self.shutdown.child_token();
        let queued = Instant::now();
        let workspace = tokio::select! {
            workspace = self.workspaces.acquire(tracker.eval_id) => workspace?,
            _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
        };
        attempt.timings.queue_s = queued.elapsed().as_secs_f64();

        // The copy cannot be interrupted, so the workspace travels with it:
        // if this request is dropped mid-copy, the directory and permit are
        // released only once the blocking task has stopped writing.
        let stage = Instant::now();
        let loaded = Arc::clone(&model);
        let (workspace, instance) = tokio::task::spawn_blocking(move || {
            let instance =
                fb_case::instantiate(&loaded.template, &params, &case_config, workspace.dir());
            (workspace, instance)
        })
        .await?;
        attempt.workspace = Some(workspace);
        let instance = instance?;
        attempt.timings.instantiate_s = stage.elapsed().as_secs_f64();
        tracker.emit(
            EvalStage::Instantiated,
            Some(format!("{} substitutions applied", instance.applied().len())),
        );

        let limits = RunLimits::from_solver(&model.def.solver).clamped(requested_timeout);
        tracker.emit(EvalStage::Executing, None);
        let stage = Instant::now();
        let run = fb_runner::run(instance.root(), &model.def.solver, limits, &cancel).await;
        attempt.timings.solve_s = stage.elapsed().as_secs_f64();
        tracing::debug!(
            status = ?run.status,
            process_groups = ?run.process_groups().collect::<Vec<_>>(),
            elapsed_s = run.elapsed.as_secs_f64(),
            "solver finished"
        );

        if !should_extract(&run, model.def.accept_partial_results) {
            run.check()?;
        }

        let stage = Instant::now();
        let case_dir = instance.root().to_path_buf();
        let loaded = Arc::clone(&model);
        let qoi = tokio::task::spawn_blocking(move || {
            fb_results::extract(&case_dir, &loaded.def.outputs, &run, loaded.def.accept_partial_results)
        })
        .await??;
        attempt.timings.extract_s = stage.elapsed().as_secs_f64();

        Ok(EvalResponse {
            eval_id: tracker.eval_id,
            model: model.def.name.clone(),
            outputs: qoi.values,
            partial: qoi.partial,
            reused: false,
            timing: EvalTimings::default(),
        })
    }

    async fn reusable(&self, model: &str, key: &str) -> Option<Vec<f64>> {
        if !self.reuse_results {
            return None;
        }
        let store = self.journal.clone()?;
        let (model, key) = (model.to_string(), key.to_string());
        let record = tokio::task::spawn_blocking(move || store.find_reusable(&model, &key))
            .await
            .ok()??;
        record.outputs().map(<[f64]>::to_vec)
    }

    async fn record(
        &self,
        request: &EvalRequest,
        config: &EvalConfig,
        eval_id: EvalId,
        key: String,
        timings: &EvalTimings,
        result: &ServiceResult<EvalResponse>,
    ) {
        let Some(store) = self.journal.clone() else {
            return;
        };
        let outcome = match result {
            Ok(response) => EvalOutcome::Succeeded {
                outputs: response.outputs.clone(),
                partial: response.partial,
            },
            // Capacity and shutdown say nothing about the inputs.
            Err(e) if matches!(e.kind(), ErrorKind::Overloaded | ErrorKind::Cancelled) => return,
            Err(e) => EvalOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        };
        let record = EvalRecord {
            key,
            model: request.model.clone(),
            eval_id: eval_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            inputs: request.inputs.clone(),
            config: serde_json::to_value(config).unwrap_or_default(),
            outcome,
            timings: *timings,
        };

        match tokio::task::spawn_blocking(move || store.save(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to write journal record"),
            Err(e) => tracing::warn!(error = %e, "journal task failed"),
        }
    }
}

/// State gathered while a request moves through the pipeline.
#[derive(Default)]
struct Attempt {
    workspace: Option<Workspace>,
    key: Option<String>,
    config: Option<EvalConfig>,
    reused: bool,
    timings: EvalTimings,
}

struct Tracker<'a> {
    progress: Option<&'a mut (dyn FnMut(EvalProgressEvent) + Send)>,
    eval_id: EvalId,
    model: String,
    started: Instant,
}

impl Tracker<'_> {
    fn elapsed_s(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn emit(&mut self, stage: EvalStage, message: Option<String>) {
        tracing::debug!(?stage, "evaluation stage");
        let event = EvalProgressEvent {
            eval_id: self.eval_id,
            model: self.model.clone(),
            stage,
            elapsed_wall_s: self.elapsed_s(),
            message,
        };
        if let Some(cb) = self.progress.as_deref_mut() {
            cb(event);
        }
    }
}
