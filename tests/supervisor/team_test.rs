//! Team discovery and inbox relay through a full run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use claude_runner::config::{RunnerConfig, TeamConfig};
use claude_runner::supervisor::{RunCallbacks, RunMode, RunRequest, RunStatus, StreamingRunner};

use crate::support::FakeClaude;

fn config(root: &std::path::Path) -> RunnerConfig {
    RunnerConfig {
        team: TeamConfig {
            root: Some(root.to_path_buf()),
            discovery_timeout_ms: 2_000,
            discovery_interval_ms: 20,
            inbox_poll_ms: 20,
            ..TeamConfig::default()
        },
        ..RunnerConfig::default()
    }
}

/// A lead agent that creates team `alpha`, which the CLI files as `alpha-7`,
/// then waits until the worker's message is relayed back to it.
fn lead_script(root: &std::path::Path) -> FakeClaude {
    let root = root.display();
    FakeClaude::new(&format!(
        r#"read -r _task
mkdir -p "{root}/alpha-7/inboxes"
printf '%s\n' '[{{"from":"worker-1","text":"research finished"}}]' > "{root}/alpha-7/inboxes/team-lead.json"
echo '{{"type":"assistant","message":{{"content":[{{"type":"tool_use","id":"t1","name":"TeamCreate","input":{{"team_name":"alpha"}}}}]}}}}'
while read -r line; do
  case "$line" in
    *"[Message from worker-1]: research finished"*) break ;;
  esac
done
echo '{{"type":"result","subtype":"success","result":"team done","session_id":"sess-team"}}'
exit 0"#
    ))
}

#[tokio::test]
async fn relays_inbox_messages_to_the_lead() {
    let teams = tempfile::tempdir().unwrap();
    let fake = lead_script(teams.path());
    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&progress);

    let request = RunRequest::new("coordinate the team")
        .mode(RunMode::Team)
        .callbacks(
            RunCallbacks::new().on_progress(move |p| seen.lock().unwrap().push(p.to_string())),
        );
    let runner = StreamingRunner::new(&config(teams.path())).with_binary(fake.path());
    let outcome = tokio::time::timeout(Duration::from_secs(10), runner.run(request))
        .await
        .expect("lead never saw the relayed message")
        .unwrap();

    assert_eq!(outcome.team_id.as_deref(), Some("alpha-7"));
    assert_eq!(outcome.session_id.as_deref(), Some("sess-team"));
    assert_eq!(
        outcome.status,
        RunStatus::Completed {
            result: "team done".to_string(),
            files: Vec::new(),
        }
    );

    let progress = progress.lock().unwrap();
    assert!(progress.contains(&"TeamCreate".to_string()), "{progress:?}");
    assert!(
        progress.contains(&"worker-1: research finished".to_string()),
        "{progress:?}"
    );
}

#[tokio::test]
async fn single_mode_discovers_team_without_relaying() {
    let teams = tempfile::tempdir().unwrap();
    let root = teams.path().display();
    let fake = FakeClaude::new(&format!(
        r#"read -r _task
mkdir -p "{root}/beta"
echo '{{"type":"tool_use","id":"t1","name":"TeamCreate","input":{{"name":"beta"}}}}'
sleep 0.2
echo '{{"type":"result","subtype":"success","result":"done"}}'"#
    ));

    let runner = StreamingRunner::new(&config(teams.path())).with_binary(fake.path());
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        runner.run(RunRequest::new("x")),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome.team_id.as_deref(), Some("beta"));
    assert!(outcome.is_completed());
}
