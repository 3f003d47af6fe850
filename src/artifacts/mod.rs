//! Artifact pipeline: per-run directory layout, screenshot persistence and
//! the end-of-run trace/thought/report emission.

pub mod recorder;
pub mod replay;
pub mod report;
pub mod trace;

pub use recorder::RunRecorder;
pub use replay::{run_script, CdpReplayDriver, ReplayDriver, ReplayOp, ReplayScript};
pub use trace::{TraceFile, TraceKind, TraceStep, TraceStepDraft};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::AgentError;

/// Run metadata stamped into every artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub run_id: String,
    pub persona_name: String,
    pub objective: String,
    pub model_name: String,
    pub start_url: String,
    pub final_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Which artifact families to emit.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactToggles {
    pub save_trace: bool,
    pub save_thoughts: bool,
}

/// Emitted file paths paired with their download URLs.
#[derive(Debug, Default, Clone)]
pub struct FinalizeOutcome {
    pub trace: Option<(PathBuf, String)>,
    pub report_paths: Vec<PathBuf>,
    pub report_urls: Vec<String>,
}

/// Owns `artifacts/<runId>/` for one run.
pub struct ArtifactPipeline {
    run_dir: PathBuf,
    run_id: String,
}

impl ArtifactPipeline {
    pub fn new(artifacts_root: &Path, run_id: &str) -> Result<Self, AgentError> {
        let run_dir = artifacts_root.join(run_id);
        for sub in ["trace", "thoughts", "screenshots", "report"] {
            std::fs::create_dir_all(run_dir.join(sub))
                .map_err(|err| AgentError::artifact(err.to_string()))?;
        }
        Ok(Self {
            run_dir,
            run_id: run_id.to_string(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Relative path for a per-step screenshot, e.g. `screenshots/step-0001.png`.
    pub fn screenshot_rel_path(step: u64) -> String {
        format!("screenshots/step-{:04}.png", step)
    }

    pub fn save_screenshot(&self, step: u64, png: &[u8]) -> Result<String, AgentError> {
        let rel = Self::screenshot_rel_path(step);
        std::fs::write(self.run_dir.join(&rel), png)
            .map_err(|err| AgentError::artifact(err.to_string()))?;
        Ok(rel)
    }

    /// URL under the `/downloads` namespace for a path relative to the run dir.
    pub fn download_url(&self, relative: &str) -> String {
        format!("/downloads/{}/{}", self.run_id, relative)
    }

    fn write_json<T: Serialize>(&self, relative: &str, value: &T) -> Result<PathBuf, AgentError> {
        let path = self.run_dir.join(relative);
        let body = serde_json::to_string_pretty(value)
            .map_err(|err| AgentError::artifact(err.to_string()))?;
        std::fs::write(&path, body).map_err(|err| AgentError::artifact(err.to_string()))?;
        Ok(path)
    }

    /// Emit all end-of-run artifacts in spec order. `pdf_html_renderer` turns
    /// report HTML into PDF bytes while the browser is still alive; when it
    /// fails the HTML itself is kept instead.
    pub async fn finalize<F, Fut>(
        &self,
        meta: &RunMeta,
        recorder: &RunRecorder,
        toggles: ArtifactToggles,
        pdf_html_renderer: F,
    ) -> FinalizeOutcome
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>, AgentError>>,
    {
        let mut outcome = FinalizeOutcome::default();

        if toggles.save_trace {
            match self.emit_trace(meta, recorder) {
                Ok(path_url) => outcome.trace = Some(path_url),
                Err(err) => warn!(error = %err, "trace emission failed"),
            }
        }

        if toggles.save_thoughts {
            if let Err(err) = self.emit_thoughts(recorder) {
                warn!(error = %err, "thought emission failed");
            }
        }

        if recorder.step_count() > 0 {
            match self.emit_report(meta, recorder, pdf_html_renderer).await {
                Ok((paths, urls)) => {
                    outcome.report_paths = paths;
                    outcome.report_urls = urls;
                }
                Err(err) => warn!(error = %err, "report emission failed"),
            }
        }

        outcome
    }

    fn emit_trace(
        &self,
        meta: &RunMeta,
        recorder: &RunRecorder,
    ) -> Result<(PathBuf, String), AgentError> {
        let trace_file = TraceFile {
            version: trace::TRACE_VERSION,
            created_at: meta.finished_at,
            run_id: meta.run_id.clone(),
            start_url: meta.start_url.clone(),
            final_url: meta.final_url.clone(),
            objective: meta.objective.clone(),
            persona: meta.persona_name.clone(),
            model_name: meta.model_name.clone(),
            steps: recorder.trace_steps(),
        };
        let rel = format!("trace/trace-{}.json", self.run_id);
        let path = self.write_json(&rel, &trace_file)?;

        let script = ReplayScript::from_trace(&trace_file);
        let script_rel = format!("trace/trace-{}.replay.json", self.run_id);
        self.write_json(&script_rel, &script)?;

        info!(steps = trace_file.steps.len(), path = %path.display(), "trace saved");
        Ok((path, self.download_url(&rel)))
    }

    fn emit_thoughts(&self, recorder: &RunRecorder) -> Result<(), AgentError> {
        let thoughts = recorder.thoughts();
        self.write_json("thoughts/thoughts.json", &thoughts)?;

        let mut text = String::new();
        for thought in &thoughts {
            text.push_str(&format!(
                "[{}] {}\n",
                thought.timestamp.to_rfc3339(),
                thought.message
            ));
        }
        std::fs::write(self.run_dir.join("thoughts/thoughts.txt"), text)
            .map_err(|err| AgentError::artifact(err.to_string()))?;
        Ok(())
    }

    async fn emit_report<F, Fut>(
        &self,
        meta: &RunMeta,
        recorder: &RunRecorder,
        pdf_html_renderer: F,
    ) -> Result<(Vec<PathBuf>, Vec<String>), AgentError>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>, AgentError>>,
    {
        let thoughts = recorder.thoughts();
        let steps = recorder.steps();
        let errors = recorder.errors();
        let screenshots = recorder.screenshots();

        let mut paths = Vec::new();
        let mut urls = Vec::new();

        let report = report::build_report_json(meta, &thoughts, &steps, &errors, &screenshots);
        paths.push(self.write_json("report/report.json", &report)?);
        urls.push(self.download_url("report/report.json"));

        let csv_path = self.run_dir.join("report/steps.csv");
        report::write_steps_csv(&csv_path, &steps)?;
        paths.push(csv_path);
        urls.push(self.download_url("report/steps.csv"));

        let html = report::build_report_html(
            meta,
            &thoughts,
            &steps,
            &errors,
            &screenshots,
            &self.run_dir,
        );
        match pdf_html_renderer(html.clone()).await {
            Ok(pdf) => {
                let pdf_path = self.run_dir.join("report/report.pdf");
                std::fs::write(&pdf_path, pdf)
                    .map_err(|err| AgentError::artifact(err.to_string()))?;
                paths.push(pdf_path);
                urls.push(self.download_url("report/report.pdf"));
            }
            Err(err) => {
                warn!(error = %err, "PDF rendering unavailable, keeping HTML report");
                let html_path = self.run_dir.join("report/report.html");
                std::fs::write(&html_path, html)
                    .map_err(|err| AgentError::artifact(err.to_string()))?;
                paths.push(html_path);
                urls.push(self.download_url("report/report.html"));
            }
        }

        Ok((paths, urls))
    }
}
