#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn ooda(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ooda").unwrap();
    cmd.current_dir(dir.path()).env("OODA_ROOT", dir.path());
    cmd
}

fn init_project(dir: &TempDir) {
    ooda(dir).arg("init").assert().success();
}

/// Run with `--json` and parse stdout.
fn json(dir: &TempDir, args: &[&str]) -> Value {
    let output = ooda(dir).arg("--json").args(args).output().unwrap();
    assert!(
        output.status.success(),
        "ooda {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

const DRAFTS: &str = r#"[
  {"action_type": "optimize_content", "priority": "high",
   "title": "Refresh pricing page", "subject": {"keyword": "crm pricing"}},
  {"action_type": "fix_technical", "priority": "critical",
   "title": "Fix broken canonical", "subject": {"target_page": "/pricing"}}
]"#;

/// Start a cycle and drive it to `acting`. Returns the cycle id.
fn cycle_in_acting(dir: &TempDir, agent: &str) -> String {
    let cycle = json(dir, &["cycle", "start", agent]);
    let id = cycle["id"].as_str().unwrap().to_string();
    json(dir, &["cycle", "observe", &id, "--data", r#"{"gsc": {"clicks": 120}}"#]);
    json(dir, &["cycle", "orient", &id, "--data", r#"{"insights_count": 2}"#]);
    json(dir, &["cycle", "decide", &id, "--actions", DRAFTS]);
    id
}

// ---------------------------------------------------------------------------
// ooda init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_store() {
    let dir = TempDir::new().unwrap();
    ooda(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .ooda/config.yaml"));

    assert!(dir.path().join(".ooda").is_dir());
    assert!(dir.path().join(".ooda/config.yaml").exists());
    assert!(dir.path().join(".ooda/ooda.redb").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    ooda(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:"));
}

#[test]
fn commands_fail_before_init() {
    let dir = TempDir::new().unwrap();
    ooda(&dir)
        .args(["cycle", "start", "seo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// ooda cycle
// ---------------------------------------------------------------------------

#[test]
fn cycle_numbers_increase_per_agent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ooda(&dir)
        .args(["cycle", "start", "seo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("started: seo #1 (observing)"));
    ooda(&dir)
        .args(["cycle", "start", "seo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("seo #2"));
    ooda(&dir)
        .args(["cycle", "start", "ads"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ads #1"));
}

#[test]
fn cycle_start_rejects_bad_agent_name() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    ooda(&dir)
        .args(["cycle", "start", "Bad Agent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid agent name"));
}

#[test]
fn full_cycle_through_the_cli() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let id = cycle_in_acting(&dir, "seo");

    let pending = json(&dir, &["action", "pending", "--agent", "seo"]);
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 2);
    // critical sorts ahead of high
    assert_eq!(pending[0]["title"], "Fix broken canonical");
    let action_id = pending[0]["id"].as_str().unwrap().to_string();
    assert!(action_id.starts_with("seo:fix_technical:"));

    ooda(&dir)
        .args(["cycle", "record-action", &id, &action_id, "--result", r#"{"ok": true}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("recorded {action_id}")));

    let cycle = json(&dir, &["cycle", "complete-act", &id]);
    assert_eq!(cycle["status"], "reflecting");

    let learnings = r#"[{"type": "pattern", "context": {"page": "/pricing"}, "confidence": 0.8}]"#;
    let cycle = json(
        &dir,
        &["cycle", "reflect", &id, "--reflection", r#"{"summary": "ok"}"#, "--learnings", learnings],
    );
    assert_eq!(cycle["status"], "completed");
    assert!(cycle["completed_at"].is_string());

    let stats = json(&dir, &["cycle", "stats", "seo"]);
    assert_eq!(stats["completed_cycles"], 1);
    assert_eq!(stats["total_learnings"], 1);
    assert_eq!(stats["learning_breakdown"]["pattern"], 1);

    ooda(&dir)
        .args(["cycle", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("[x] seo:fix_technical:"))
        .stdout(predicate::str::contains("[ ] seo:optimize_content:"));
}

#[test]
fn phases_cannot_be_skipped() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let cycle = json(&dir, &["cycle", "start", "seo"]);
    let id = cycle["id"].as_str().unwrap();

    ooda(&dir)
        .args(["cycle", "complete-act", id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid transition"));
}

#[test]
fn rejected_decide_saves_no_actions() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let cycle = json(&dir, &["cycle", "start", "seo"]);
    let id = cycle["id"].as_str().unwrap();

    ooda(&dir)
        .args(["cycle", "decide", id, "--actions", DRAFTS])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid transition"));

    let all = json(&dir, &["action", "list"]);
    assert!(all.as_array().unwrap().is_empty());
    let current = json(&dir, &["cycle", "show", id]);
    assert_eq!(current["status"], "observing");
}

#[test]
fn failed_cycle_is_terminal() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let cycle = json(&dir, &["cycle", "start", "seo"]);
    let id = cycle["id"].as_str().unwrap();

    ooda(&dir)
        .args(["cycle", "fail", id, "search console unreachable"])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed: seo #1 (failed)"));
    ooda(&dir)
        .args(["cycle", "fail", id, "again"])
        .assert()
        .failure();

    let current = json(&dir, &["cycle", "current", "seo"]);
    assert!(current.is_null());
}

#[test]
fn cycle_show_unknown_id_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    ooda(&dir)
        .args(["cycle", "show", "00000000-0000-0000-0000-000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle not found"));
    ooda(&dir)
        .args(["cycle", "show", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid id"));
}

// ---------------------------------------------------------------------------
// ooda action
// ---------------------------------------------------------------------------

#[test]
fn rerunning_decide_does_not_duplicate_actions() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cycle_in_acting(&dir, "seo");
    cycle_in_acting(&dir, "seo");

    let all = json(&dir, &["action", "list", "--agent", "seo"]);
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[test]
fn action_update_walks_the_lifecycle() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cycle_in_acting(&dir, "seo");
    let pending = json(&dir, &["action", "pending"]);
    let id = pending[0]["id"].as_str().unwrap().to_string();

    // pending cannot jump straight to completed
    ooda(&dir)
        .args(["action", "update", &id, "--status", "completed"])
        .assert()
        .failure();

    ooda(&dir)
        .args(["action", "update", &id, "--status", "executing"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is now executing"));

    let action = json(
        &dir,
        &["action", "update", &id, "--status", "completed", "--result", r#"{"published": true}"#],
    );
    assert_eq!(action["status"], "completed");
    assert_eq!(action["execution_result"]["published"], true);

    let done = json(&dir, &["action", "list", "--status", "completed"]);
    assert_eq!(done.as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// ooda alert
// ---------------------------------------------------------------------------

#[test]
fn approval_is_resolved_once() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let alert = json(
        &dir,
        &[
            "alert", "send", "--type", "approval_needed", "--severity", "warning",
            "--title", "Raise budget", "--message", "Spend +40%", "--agent", "ads",
            "--requires-approval",
        ],
    );
    assert_eq!(alert["status"], "pending");
    let id = alert["id"].as_str().unwrap().to_string();

    let pending = json(&dir, &["alert", "pending"]);
    assert_eq!(pending.as_array().unwrap().len(), 1);

    ooda(&dir)
        .args(["alert", "approve", &id, "--by", "jordan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("approved"));
    ooda(&dir)
        .args(["alert", "reject", &id, "--by", "sam"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("only pending alerts"));

    let shown = json(&dir, &["alert", "show", &id]);
    assert_eq!(shown["status"], "approved");
    assert_eq!(shown["approved_by"], "jordan");
    assert!(json(&dir, &["alert", "pending"]).as_array().unwrap().is_empty());
}

#[test]
fn informational_alert_is_sent_immediately() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    ooda(&dir)
        .args([
            "alert", "send", "--type", "task_failed", "--title", "Crawl failed",
            "--message", "timeout", "--agent", "seo",
        ])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("sent "));
}

#[test]
fn alert_send_rejects_unknown_type() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    ooda(&dir)
        .args([
            "alert", "send", "--type", "bogus", "--title", "t", "--message", "m",
            "--agent", "seo",
        ])
        .assert()
        .failure();
}

#[test]
fn budget_policy_only_fires_above_threshold() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ooda(&dir)
        .args([
            "alert", "check", "budget-change", "--agent", "ads", "--campaign", "Brand",
            "--old", "100", "--new", "110",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("no alert"));

    let alert = json(
        &dir,
        &[
            "alert", "check", "budget-change", "--agent", "ads", "--campaign", "Brand",
            "--old", "100", "--new", "150",
        ],
    );
    assert_eq!(alert["type"], "budget_change");
    assert_eq!(alert["status"], "pending");
}

// ---------------------------------------------------------------------------
// ooda anomaly
// ---------------------------------------------------------------------------

#[test]
fn anomaly_detect_reports_drop() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    ooda(&dir)
        .args([
            "anomaly", "detect", "--metric", "sessions",
            "--history", "100,100,100,100,100,100,100", "--current", "40",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("critical anomaly (percentage): sessions decrease by 60.0%"));
}

#[test]
fn anomaly_detect_needs_enough_history() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let out = json(
        &dir,
        &["anomaly", "detect", "--metric", "sessions", "--history", "100,100", "--current", "10"],
    );
    assert!(out["anomaly"].is_null());
}

#[test]
fn anomaly_detect_can_raise_an_alert() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let out = json(
        &dir,
        &[
            "anomaly", "detect", "--metric", "conversion_rate",
            "--history", "2,2,2,2,2,2,2", "--current", "1", "--alert-agent", "analytics",
        ],
    );
    assert_eq!(out["alert"]["type"], "performance_drop");
    assert_eq!(out["alert"]["title"], "Anomaly Detected: Conversion Rate");

    let alerts = json(&dir, &["alert", "list"]);
    assert_eq!(alerts.as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// ooda strategy / config
// ---------------------------------------------------------------------------

#[test]
fn strategy_show_without_history() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    ooda(&dir)
        .args(["strategy", "show", "seo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no strategy for seo"));
    ooda(&dir)
        .args(["strategy", "tasks", "seo"])
        .assert()
        .failure();

    let check = json(&dir, &["strategy", "check", "seo", "--inputs", r#"{"a": 1}"#]);
    assert_eq!(check["fresh"], false);
    assert_eq!(check["fingerprint"].as_str().unwrap().len(), 64);
}

#[test]
fn config_validate_default_is_clean() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    ooda(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_fails_on_zero_timeout() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    std::fs::write(
        dir.path().join(".ooda/config.yaml"),
        "engine:\n  orient_timeout_secs: 0\n",
    )
    .unwrap();

    ooda(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] engine.orient_timeout_secs"));
}
