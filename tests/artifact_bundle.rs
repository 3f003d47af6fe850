//! Artifact completeness: with all save-toggles on, everything recorded
//! during a run appears exactly once in the emitted files.

use chrono::Utc;

use wayfarer::artifacts::{
    ArtifactPipeline, ArtifactToggles, RunMeta, RunRecorder, TraceKind, TraceStepDraft,
};
use wayfarer::errors::AgentError;

fn meta(run_id: &str) -> RunMeta {
    RunMeta {
        run_id: run_id.to_string(),
        persona_name: "Casual Shopper".to_string(),
        objective: "find sneakers, cheap ones".to_string(),
        model_name: "gemini-2.0-flash".to_string(),
        start_url: "https://shop.example".to_string(),
        final_url: "https://shop.example/sneakers".to_string(),
        started_at: Utc::now(),
        finished_at: Utc::now(),
    }
}

fn populated_recorder() -> RunRecorder {
    let recorder = RunRecorder::new();
    recorder.record_thought("I see a shop landing page.", "https://shop.example");
    recorder.record_thought("Heading for the \"Sneakers\" tab, obviously.", "https://shop.example");
    recorder.record_thought("A thought with, commas\nand a newline.", "https://shop.example");

    recorder.record_step(
        "click",
        Some("0".to_string()),
        None,
        "Heading for the \"Sneakers\" tab, obviously.",
        "https://shop.example",
    );
    recorder.record_step(
        "type",
        Some("4".to_string()),
        Some("air max".to_string()),
        "A thought with, commas\nand a newline.",
        "https://shop.example/sneakers",
    );

    recorder.record_error(
        "action on mark #9 failed: missing element",
        "https://shop.example/login?session=s3cr3t-token#access_token=leaky",
    );

    recorder.record_trace(TraceKind::Goto, TraceStepDraft::at("https://shop.example"));
    recorder.record_trace(
        TraceKind::Click,
        TraceStepDraft::at("https://shop.example")
            .selector("a[href=\"/sneakers\"]")
            .coords(88.0, 41.0),
    );
    recorder.record_trace(
        TraceKind::Type,
        TraceStepDraft::at("https://shop.example/sneakers?session=s3cr3t-token")
            .selector("input[name=\"q\"]")
            .coords(300.0, 80.0)
            .value("air max"),
    );
    recorder
}

#[tokio::test]
async fn every_record_appears_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let run_id = "2026-02-03T09-15-00-120-casual-shopper";
    let pipeline = ArtifactPipeline::new(dir.path(), run_id).unwrap();
    let recorder = populated_recorder();

    pipeline
        .finalize(
            &meta(run_id),
            &recorder,
            ArtifactToggles {
                save_trace: true,
                save_thoughts: true,
            },
            |_html| async { Err(AgentError::artifact("no browser under test")) },
        )
        .await;

    let run_dir = dir.path().join(run_id);

    // Trace: all three steps, ids dense from 0.
    let trace: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(run_dir.join(format!("trace/trace-{run_id}.json"))).unwrap(),
    )
    .unwrap();
    let steps = trace["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 3);
    for (idx, step) in steps.iter().enumerate() {
        assert_eq!(step["id"].as_u64().unwrap() as usize, idx);
    }
    assert_eq!(trace["objective"], "find sneakers, cheap ones");

    // Thoughts: three entries in json, three lines in txt.
    let thoughts: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(run_dir.join("thoughts/thoughts.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(thoughts.as_array().unwrap().len(), 3);
    let txt = std::fs::read_to_string(run_dir.join("thoughts/thoughts.txt")).unwrap();
    assert_eq!(txt.matches("[20").count(), 3);
    assert!(txt.contains("I see a shop landing page."));

    // Report json carries every log family.
    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(run_dir.join("report/report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["metrics"]["steps"], 2);
    assert_eq!(report["metrics"]["thoughts"], 3);
    assert_eq!(report["metrics"]["errors"], 1);
    assert_eq!(report["actionBreakdown"]["click"], 1);
    assert_eq!(report["actionBreakdown"]["type"], 1);

    // CSV round-trips the awkward thought text.
    let mut reader = csv::Reader::from_path(run_dir.join("report/steps.csv")).unwrap();
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[1][5], "A thought with, commas\nand a newline.");
    assert_eq!(&records[1][4], "air max");

    // URL query strings and fragments never reach the persisted files.
    for relative in [
        format!("trace/trace-{run_id}.json"),
        format!("trace/trace-{run_id}.replay.json"),
        "thoughts/thoughts.json".to_string(),
        "thoughts/thoughts.txt".to_string(),
        "report/report.json".to_string(),
        "report/steps.csv".to_string(),
    ] {
        let body = std::fs::read_to_string(run_dir.join(&relative)).unwrap();
        assert!(!body.contains("s3cr3t"), "{relative} leaked a query secret");
        assert!(!body.contains("leaky"), "{relative} leaked a fragment secret");
    }
    let trace_url = steps[2]["url"].as_str().unwrap();
    assert_eq!(trace_url, "https://shop.example/sneakers");
}

#[tokio::test]
async fn toggles_suppress_their_families() {
    let dir = tempfile::tempdir().unwrap();
    let run_id = "run-toggles";
    let pipeline = ArtifactPipeline::new(dir.path(), run_id).unwrap();
    let recorder = populated_recorder();

    let outcome = pipeline
        .finalize(
            &meta(run_id),
            &recorder,
            ArtifactToggles {
                save_trace: false,
                save_thoughts: false,
            },
            |_html| async { Err(AgentError::artifact("no browser under test")) },
        )
        .await;

    let run_dir = dir.path().join(run_id);
    assert!(outcome.trace.is_none());
    assert!(!run_dir.join(format!("trace/trace-{run_id}.json")).exists());
    assert!(!run_dir.join("thoughts/thoughts.json").exists());
    // The report is not gated by a toggle once steps exist.
    assert!(run_dir.join("report/report.json").exists());
}
