//! The run controller and its think-aloud control loop.
//!
//! One active run per process. The loop is cooperative: every external call
//! sits behind its own ceiling, exceptions are reified into thought/error
//! events, and `stop` takes effect at the next suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::{
    ArtifactPipeline, ArtifactToggles, RunMeta, RunRecorder, TraceKind, TraceStepDraft,
};
use crate::browser::{ActionExecutor, BrowserSession, CursorDriver, PageHealth, SessionConfig};
use crate::config::{AppConfig, RunOptions};
use crate::cookies::{self, CookieOutcome};
use crate::decision::provider::{DecisionProvider, GeminiProvider, MockDecisionProvider};
use crate::decision::{self, prompt, AgentAction, Decision, DecisionEngine};
use crate::errors::AgentError;
use crate::events::{AgentEvent, EventBus, RunState};
use crate::perception;
use crate::persona::{self, Persona};
use crate::run::history::{FailedTargetLedger, HistoryLog, StagnationDetector};
use crate::speech::{watchdog_for, SpeechGate, TtsClient};

/// Post-navigation hydration wait.
const HYDRATION_WAIT: Duration = Duration::from_secs(2);
/// Settle wait at the end of each turn.
const SETTLE_WAIT: Duration = Duration::from_secs(1);
/// Back-off after a failed turn.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Resolved run configuration echoed to the control surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub url: String,
    pub persona: String,
    pub objective: String,
    pub model_name: String,
    pub tts_enabled: bool,
    pub headless_mode: bool,
    pub debug_mode: bool,
    pub monkey_mode: bool,
    pub bare_mode: bool,
}

pub struct RunController {
    config: AppConfig,
    events: EventBus,
    speech: Arc<SpeechGate>,
    voice_enabled: AtomicBool,
    running: AtomicBool,
    stop_requested: AtomicBool,
    current_run: Mutex<Option<String>>,
}

impl RunController {
    pub fn new(config: AppConfig, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            config,
            events,
            speech: Arc::new(SpeechGate::new()),
            voice_enabled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            current_run: Mutex::new(None),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin a run. Rejects with [`AgentError::RunActive`] when one exists.
    pub fn begin(self: &Arc<Self>, options: RunOptions) -> Result<RunSummary, AgentError> {
        options.validate()?;
        if !options.monkey_mode && self.config.api_key.is_none() {
            return Err(AgentError::invalid_request(format!(
                "{} is not set; only monkey mode works without it",
                crate::config::API_KEY_ENV
            )));
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgentError::RunActive);
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.voice_enabled
            .store(options.tts_enabled, Ordering::SeqCst);

        let persona = persona::resolve(&options.persona_name);
        let run_id = format!(
            "{}-{}",
            Utc::now().format("%Y-%m-%dT%H-%M-%S-%3f"),
            persona.slug()
        );
        *self.current_run.lock() = Some(run_id.clone());

        let summary = RunSummary {
            run_id: run_id.clone(),
            url: options.url.clone(),
            persona: persona.name.clone(),
            objective: options.objective.clone(),
            model_name: options.model_name.clone(),
            tts_enabled: options.tts_enabled,
            headless_mode: options.headless_mode,
            debug_mode: options.debug_mode,
            monkey_mode: options.monkey_mode,
            bare_mode: options.bare_mode,
        };

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.execute(options, persona, run_id).await;
            controller.running.store(false, Ordering::SeqCst);
            controller.current_run.lock().take();
            controller.publish_status(RunState::Idle);
        });

        Ok(summary)
    }

    /// Request the current run to stop at its next suspension point.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.speech.cancel();
    }

    /// Operator acknowledged playback of a speech request.
    pub fn speech_ack(&self, id: &str) {
        self.speech.ack(id);
    }

    /// Runtime voice toggle. Turning voice off releases any pending gate.
    pub fn set_voice(&self, enabled: bool) {
        self.voice_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.speech.cancel();
        }
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn publish_status(&self, state: RunState) {
        self.events.publish(AgentEvent::Status { state });
    }

    fn publish_thought(&self, recorder: &RunRecorder, url: &str, message: impl Into<String>) {
        let message = message.into();
        recorder.record_thought(&message, url);
        self.events.publish(AgentEvent::Thought {
            message,
            timestamp: Utc::now(),
        });
    }

    fn build_provider(&self) -> Arc<dyn DecisionProvider> {
        match &self.config.api_key {
            Some(key) => match GeminiProvider::new(key.clone(), self.config.api_base.clone()) {
                Ok(provider) => Arc::new(provider),
                Err(err) => {
                    warn!(error = %err, "falling back to mock provider");
                    Arc::new(MockDecisionProvider::new(Vec::new()))
                }
            },
            // Only reachable in monkey mode, which never calls the provider.
            None => Arc::new(MockDecisionProvider::new(Vec::new())),
        }
    }

    async fn execute(self: &Arc<Self>, options: RunOptions, persona: Persona, run_id: String) {
        self.publish_status(RunState::Starting);
        let started_at = Utc::now();

        let pipeline = match ArtifactPipeline::new(&self.config.artifacts_dir, &run_id) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                error!(error = %err, "could not create artifact directory");
                self.events.publish(AgentEvent::Error {
                    message: err.to_string(),
                });
                self.publish_status(RunState::Stopped);
                return;
            }
        };
        let recorder = RunRecorder::new();

        let mut session = match BrowserSession::launch(SessionConfig {
            headless: options.headless_mode,
            context: persona.context.clone(),
        })
        .await
        {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "browser launch failed");
                self.events.publish(AgentEvent::Error {
                    message: err.to_string(),
                });
                self.publish_status(RunState::Stopped);
                return;
            }
        };

        let cursor = Arc::new(CursorDriver::new(self.events.clone(), session.viewport()));
        let executor = ActionExecutor::new(Arc::clone(&cursor));
        let engine = DecisionEngine::new(self.build_provider(), &options.model_name);
        let tts = self.config.api_key.as_ref().and_then(|key| {
            TtsClient::new(key.clone(), self.config.api_base.clone()).ok()
        });

        info!(run_id = %run_id, url = %options.url, persona = %persona.name, "run starting");

        if let Err(err) = session.navigate(&options.url).await {
            warn!(error = %err, "initial navigation failed, continuing anyway");
            self.publish_thought(
                &recorder,
                &options.url,
                format!("The page didn't finish loading ({err}), I'll work with what I have."),
            );
        }
        recorder.record_trace(TraceKind::Goto, TraceStepDraft::at(options.url.clone()));
        sleep(HYDRATION_WAIT).await;
        if let Err(err) = cursor.init(session.active()).await {
            warn!(error = %err, "cursor bootstrap failed");
        }

        self.run_loop(
            &options, &persona, &recorder, &pipeline, &mut session, &cursor, &executor, &engine,
            tts.as_ref(),
        )
        .await;

        // Teardown: artifacts first (the browser must still be up for PDF
        // printing), then the browser itself.
        let final_url = session.url().await;
        let meta = RunMeta {
            run_id: run_id.clone(),
            persona_name: persona.name.clone(),
            objective: options.objective.clone(),
            model_name: options.model_name.clone(),
            start_url: crate::redact::url(&options.url),
            final_url,
            started_at,
            finished_at: Utc::now(),
        };
        let toggles = ArtifactToggles {
            save_trace: options.save_trace,
            save_thoughts: options.save_thoughts,
        };
        let session_ref = &session;
        let outcome = pipeline
            .finalize(&meta, &recorder, toggles, |html| async move {
                session_ref.render_pdf(&html).await
            })
            .await;

        if let Some((path, url)) = outcome.trace {
            self.events.publish(AgentEvent::TraceSaved {
                path: path.display().to_string(),
                url,
            });
        }
        if !outcome.report_paths.is_empty() {
            self.events.publish(AgentEvent::ReportReady {
                paths: outcome
                    .report_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
                urls: outcome.report_urls,
            });
        }

        session.close().await;
        self.speech.cancel();
        self.publish_status(RunState::Stopped);
        info!(run_id = %run_id, "run stopped");
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        self: &Arc<Self>,
        options: &RunOptions,
        persona: &Persona,
        recorder: &RunRecorder,
        pipeline: &ArtifactPipeline,
        session: &mut BrowserSession,
        cursor: &Arc<CursorDriver>,
        executor: &ActionExecutor,
        engine: &DecisionEngine,
        tts: Option<&TtsClient>,
    ) {
        let mut history = HistoryLog::default();
        let mut ledger = FailedTargetLedger::default();
        let mut stagnation = StagnationDetector::default();

        while !self.stopping() {
            match session.check_active().await {
                Ok(PageHealth::Alive) => {}
                Ok(PageHealth::SwitchedTo(url)) => {
                    recorder.record_trace(TraceKind::TabSwitch, TraceStepDraft::at(url.clone()));
                    let _ = cursor.init(session.active()).await;
                    self.publish_thought(
                        recorder,
                        &url,
                        "My tab disappeared, switching to the one that's left.",
                    );
                }
                Err(_) => {
                    self.publish_thought(
                        recorder,
                        "about:blank",
                        "Every page is gone, nothing left to drive. Stopping here.",
                    );
                    break;
                }
            }

            let turn = self
                .run_turn(
                    options, persona, recorder, pipeline, session, cursor, executor, engine, tts,
                    &mut history, &mut ledger, &mut stagnation,
                )
                .await;

            match turn {
                Ok(TurnOutcome::Continue) => {
                    sleep(SETTLE_WAIT).await;
                }
                Ok(TurnOutcome::Finished) => break,
                Err(err) => {
                    let url = session.url().await;
                    if let Some(mark) = err.mark_id() {
                        ledger.charge(mark);
                    }
                    recorder.record_error(err.to_string(), &url);
                    self.publish_thought(
                        recorder,
                        &url,
                        format!("That didn't work ({err}). Let me take a breath and look again."),
                    );
                    self.events.publish(AgentEvent::Error {
                        message: err.to_string(),
                    });
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        self: &Arc<Self>,
        options: &RunOptions,
        persona: &Persona,
        recorder: &RunRecorder,
        pipeline: &ArtifactPipeline,
        session: &mut BrowserSession,
        cursor: &Arc<CursorDriver>,
        executor: &ActionExecutor,
        engine: &DecisionEngine,
        tts: Option<&TtsClient>,
        history: &mut HistoryLog,
        ledger: &mut FailedTargetLedger,
        stagnation: &mut StagnationDetector,
    ) -> Result<TurnOutcome, AgentError> {
        let url = session.url().await;

        // 1. Cookie pass.
        match cookies::dismiss_pass(session.active(), cursor).await {
            CookieOutcome::Dismissed {
                layer,
                label,
                coords,
            } => {
                let mut draft =
                    TraceStepDraft::at(url.clone()).note(format!("{} ({label})", layer.label()));
                if let Some((x, y)) = coords {
                    draft = draft.coords(x, y);
                }
                recorder.record_trace(TraceKind::Click, draft);
                self.publish_thought(
                    recorder,
                    &url,
                    format!("A cookie banner was in the way, I accepted it (\"{label}\")."),
                );
            }
            CookieOutcome::Untouched => {}
        }
        if self.stopping() {
            return Ok(TurnOutcome::Finished);
        }

        // 2. Perception.
        self.publish_status(RunState::Scanning);
        let som = perception::observe(session.active()).await;
        if som.is_none() {
            self.publish_thought(
                recorder,
                &url,
                "I couldn't map the page elements this time, going by the screenshot alone.",
            );
        }

        // 3. Capture. The marked shot always goes to the model; operators get
        // a clean one unless debug marks are on.
        let marked_png = session.screenshot_png().await?;
        let stream_png = if options.debug_mode {
            marked_png.clone()
        } else {
            let _ = perception::set_overlay_visible(session.active(), false).await;
            let clean = session.screenshot_png().await.unwrap_or_else(|_| marked_png.clone());
            let _ = perception::set_overlay_visible(session.active(), true).await;
            clean
        };
        self.events.publish(AgentEvent::Screenshot {
            data_url: format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(&stream_png)
            ),
        });
        if options.save_screenshots {
            let step_no = history.len() as u64 + 1;
            match pipeline.save_screenshot(step_no, &stream_png) {
                Ok(rel) => recorder.record_screenshot(rel, &url),
                Err(err) => warn!(error = %err, "screenshot persistence failed"),
            }
        }

        // 4. Decision.
        self.publish_status(RunState::Thinking);
        let decision = if options.monkey_mode {
            let mut rng = rand::thread_rng();
            decision::monkey_decision(som.as_ref(), &mut rng)
        } else {
            let title = session.title().await;
            let context = prompt::PromptContext {
                persona,
                mission: &options.objective,
                url: &url,
                title: &title,
                som: som.as_ref(),
                failed_targets: ledger.snapshot(),
                loop_guard_hint: history.loop_guard_hint(),
                history: history.entries(),
                bare_mode: options.bare_mode,
            };
            let prompt_text = prompt::build_prompt(&context);
            engine.decide(&prompt_text, Some(&marked_png)).await
        };

        // 5. History & stagnation.
        history.push(decision.clone());
        if stagnation.observe(history) {
            self.publish_thought(
                recorder,
                &url,
                "I'm going in circles, repeating the same moves without progress. Stopping here.",
            );
            return Ok(TurnOutcome::Finished);
        }

        // 6. Thought, optional blocking speech, step.
        self.publish_thought(recorder, &url, decision.thought.clone());
        if self.voice_enabled.load(Ordering::SeqCst) {
            self.speak(recorder, tts, persona, &decision.thought, &url).await;
        }
        if self.stopping() {
            return Ok(TurnOutcome::Finished);
        }
        let step_id = recorder.record_step(
            decision.action.label(),
            decision.target_id.clone(),
            decision.value.clone(),
            &decision.thought,
            &url,
        );
        self.events.publish(AgentEvent::Step {
            id: step_id,
            action: decision.action.label().to_string(),
            target_id: decision.target_id.clone(),
            value: decision.value.clone(),
            thought: decision.thought.clone(),
        });

        // 7. Termination check.
        if decision.action == AgentAction::Done {
            return Ok(TurnOutcome::Finished);
        }

        // 8. Execution.
        self.publish_status(RunState::Acting);
        self.execute_decision(recorder, session, executor, &decision, &url)
            .await?;
        ledger.decay();

        // Tab following happens between suspension points, never mid-action.
        if let Some(new_url) = session.follow_new_page().await? {
            recorder.record_trace(TraceKind::TabSwitch, TraceStepDraft::at(new_url.clone()));
            let _ = cursor.init(session.active()).await;
            self.publish_thought(
                recorder,
                &new_url,
                "That opened a new tab, I'm following it.",
            );
        }

        Ok(TurnOutcome::Continue)
    }

    async fn execute_decision(
        &self,
        recorder: &RunRecorder,
        session: &BrowserSession,
        executor: &ActionExecutor,
        decision: &Decision,
        url: &str,
    ) -> Result<(), AgentError> {
        match decision.action {
            AgentAction::Click => {
                let mark = decision
                    .target_id
                    .as_deref()
                    .ok_or_else(|| AgentError::action("?", "click without a target mark"))?;
                let outcome = executor.click_mark(session.active(), mark).await?;
                recorder.record_trace(
                    TraceKind::Click,
                    TraceStepDraft::at(url)
                        .selector(outcome.selector)
                        .coords(outcome.x, outcome.y),
                );
            }
            AgentAction::Type => {
                let mark = decision
                    .target_id
                    .as_deref()
                    .ok_or_else(|| AgentError::action("?", "type without a target mark"))?;
                let value = decision.value.clone().unwrap_or_default();
                let outcome = executor
                    .type_into_mark(session.active(), mark, &value)
                    .await?;
                if outcome.fallback_used {
                    self.publish_thought(
                        recorder,
                        url,
                        format!(
                            "Mark #{mark} wasn't a text field, I used the nearest input instead."
                        ),
                    );
                }
                recorder.record_trace(
                    TraceKind::Type,
                    TraceStepDraft::at(url)
                        .selector(outcome.selector)
                        .coords(outcome.x, outcome.y)
                        .value(value),
                );
            }
            AgentAction::Scroll => {
                let delta = executor.scroll(session.active()).await?;
                recorder.record_trace(TraceKind::Scroll, TraceStepDraft::at(url).delta_y(delta));
            }
            AgentAction::Wait => {
                executor.wait().await;
                recorder.record_trace(TraceKind::Wait, TraceStepDraft::at(url).wait_ms(2_000));
            }
            AgentAction::Done => {}
        }
        Ok(())
    }

    /// Synthesise the thought and block until the operator acknowledges
    /// playback, the watchdog fires, or the run stops.
    async fn speak(
        &self,
        recorder: &RunRecorder,
        tts: Option<&TtsClient>,
        persona: &Persona,
        thought: &str,
        url: &str,
    ) {
        let Some(tts) = tts else {
            return;
        };
        let Some(voice) = &persona.voice else {
            return;
        };

        let audio = match tts.synthesize(thought, voice).await {
            Ok(audio) => audio,
            Err(err) => {
                warn!(error = %err, "speech synthesis failed");
                self.publish_thought(
                    recorder,
                    url,
                    "My voice is failing me right now, carrying on silently.",
                );
                return;
            }
        };

        let request_id = Uuid::new_v4().to_string();
        let rx = self.speech.begin(request_id.as_str());
        self.events.publish(AgentEvent::Tts {
            id: request_id.clone(),
            text: thought.to_string(),
            mime: audio.mime,
            audio_base64: audio.audio_base64,
        });

        let deadline = watchdog_for(thought.chars().count());
        tokio::select! {
            _ = rx => {}
            _ = sleep(deadline) => {
                self.speech.cancel();
                self.publish_thought(
                    recorder,
                    url,
                    "Nobody confirmed my narration finished playing, moving on anyway.",
                );
            }
        }
    }
}

/// How one loop turn ended.
enum TurnOutcome {
    Continue,
    Finished,
}
