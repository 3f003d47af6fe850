//! Applying an emitted replay script against a deterministic driver double
//! must reproduce the recorded operations, in order, with the same targets.

use async_trait::async_trait;
use chrono::Utc;

use wayfarer::artifacts::{
    run_script, ReplayDriver, ReplayOp, ReplayScript, TraceFile, TraceKind, TraceStep,
};
use wayfarer::errors::AgentError;

#[derive(Default)]
struct RecordingDriver {
    calls: Vec<String>,
}

#[async_trait]
impl ReplayDriver for RecordingDriver {
    async fn goto(&mut self, url: &str) -> Result<(), AgentError> {
        self.calls.push(format!("goto {url}"));
        Ok(())
    }

    async fn click_selector(&mut self, selector: &str) -> Result<(), AgentError> {
        self.calls.push(format!("click {selector}"));
        Ok(())
    }

    async fn click_at(&mut self, x: f64, y: f64) -> Result<(), AgentError> {
        self.calls.push(format!("click-at {x},{y}"));
        Ok(())
    }

    async fn fill_selector(&mut self, selector: &str, value: &str) -> Result<(), AgentError> {
        self.calls.push(format!("fill {selector} = {value}"));
        Ok(())
    }

    async fn fill_at(&mut self, x: f64, y: f64, value: &str) -> Result<(), AgentError> {
        self.calls.push(format!("fill-at {x},{y} = {value}"));
        Ok(())
    }

    async fn scroll(&mut self, delta_y: f64) -> Result<(), AgentError> {
        self.calls.push(format!("scroll {delta_y}"));
        Ok(())
    }

    async fn wait(&mut self, ms: u64) -> Result<(), AgentError> {
        self.calls.push(format!("wait {ms}"));
        Ok(())
    }

    async fn tab_switch(&mut self) -> Result<(), AgentError> {
        self.calls.push("tab-switch".to_string());
        Ok(())
    }
}

fn step(id: u64, kind: TraceKind) -> TraceStep {
    TraceStep {
        id,
        timestamp: Utc::now(),
        url: "https://example.com".to_string(),
        kind,
        selector: None,
        x: None,
        y: None,
        value: None,
        wait_ms: None,
        delta_y: None,
        note: None,
    }
}

fn sample_trace() -> TraceFile {
    let mut click = step(1, TraceKind::Click);
    click.selector = Some("a[href=\"/shop\"]".to_string());
    click.x = Some(104.0);
    click.y = Some(33.0);

    let mut cookie_click = step(2, TraceKind::Click);
    cookie_click.x = Some(640.0);
    cookie_click.y = Some(612.0);
    cookie_click.note = Some("cookie banner vision fallback (Alle akzeptieren)".to_string());

    let mut type_step = step(3, TraceKind::Type);
    type_step.selector = Some("input[name=\"q\"]".to_string());
    type_step.value = Some("bmw, \"the\" car".to_string());

    let mut scroll = step(4, TraceKind::Scroll);
    scroll.delta_y = Some(457.0);

    let mut wait = step(5, TraceKind::Wait);
    wait.wait_ms = Some(2_000);

    TraceFile {
        version: 2,
        created_at: Utc::now(),
        run_id: "2026-02-03T09-15-00-120-casual-shopper".to_string(),
        start_url: "https://example.com".to_string(),
        final_url: "https://example.com/shop".to_string(),
        objective: "find a car".to_string(),
        persona: "Casual Shopper".to_string(),
        model_name: "gemini-2.0-flash".to_string(),
        steps: vec![
            step(0, TraceKind::Goto),
            click,
            cookie_click,
            type_step,
            scroll,
            wait,
            step(6, TraceKind::TabSwitch),
        ],
    }
}

#[tokio::test]
async fn replay_reproduces_the_recorded_sequence() {
    let trace = sample_trace();
    let script = ReplayScript::from_trace(&trace);
    let mut driver = RecordingDriver::default();

    let applied = run_script(&script, &mut driver).await.unwrap();
    assert_eq!(applied, 7);
    assert_eq!(
        driver.calls,
        vec![
            "goto https://example.com",
            "click a[href=\"/shop\"]",
            "click-at 640,612",
            "fill input[name=\"q\"] = bmw, \"the\" car",
            "scroll 457",
            "wait 2000",
            "tab-switch",
        ]
    );
}

#[tokio::test]
async fn script_survives_serialisation() {
    let trace = sample_trace();
    let script = ReplayScript::from_trace(&trace);

    let json = serde_json::to_string_pretty(&script).unwrap();
    let reloaded: ReplayScript = serde_json::from_str(&json).unwrap();
    assert_eq!(script.ops, reloaded.ops);

    let mut first = RecordingDriver::default();
    let mut second = RecordingDriver::default();
    run_script(&script, &mut first).await.unwrap();
    run_script(&reloaded, &mut second).await.unwrap();
    assert_eq!(first.calls, second.calls);
}

#[tokio::test]
async fn driver_error_stops_the_replay() {
    struct FailingDriver {
        calls: usize,
    }

    #[async_trait]
    impl ReplayDriver for FailingDriver {
        async fn goto(&mut self, _url: &str) -> Result<(), AgentError> {
            self.calls += 1;
            Ok(())
        }
        async fn click_selector(&mut self, selector: &str) -> Result<(), AgentError> {
            self.calls += 1;
            Err(AgentError::action(selector, "element never appeared"))
        }
        async fn click_at(&mut self, _x: f64, _y: f64) -> Result<(), AgentError> {
            self.calls += 1;
            Ok(())
        }
        async fn fill_selector(&mut self, _s: &str, _v: &str) -> Result<(), AgentError> {
            self.calls += 1;
            Ok(())
        }
        async fn fill_at(&mut self, _x: f64, _y: f64, _v: &str) -> Result<(), AgentError> {
            self.calls += 1;
            Ok(())
        }
        async fn scroll(&mut self, _d: f64) -> Result<(), AgentError> {
            self.calls += 1;
            Ok(())
        }
        async fn wait(&mut self, _ms: u64) -> Result<(), AgentError> {
            self.calls += 1;
            Ok(())
        }
        async fn tab_switch(&mut self) -> Result<(), AgentError> {
            self.calls += 1;
            Ok(())
        }
    }

    let trace = sample_trace();
    let script = ReplayScript::from_trace(&trace);
    let mut driver = FailingDriver { calls: 0 };
    let result = run_script(&script, &mut driver).await;
    assert!(result.is_err());
    assert_eq!(driver.calls, 2);
}

#[test]
fn selector_beats_coordinates_when_both_present() {
    let trace = sample_trace();
    let script = ReplayScript::from_trace(&trace);
    assert!(matches!(
        &script.ops[1],
        ReplayOp::ClickSelector { selector } if selector == "a[href=\"/shop\"]"
    ));
    assert!(matches!(
        &script.ops[2],
        ReplayOp::ClickAt { x, y } if *x == 640.0 && *y == 612.0
    ));
}
