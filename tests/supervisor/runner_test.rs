//! End-to-end tests for the streaming runner against fake CLI scripts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use claude_runner::supervisor::{
    KillSwitch, RunCallbacks, RunMode, RunRequest, RunStatus, StreamingRunner,
};

use crate::support::{assistant, result, FakeClaude, INIT};

/// Everything the callbacks saw, in order.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn callbacks(self: &Arc<Self>) -> RunCallbacks {
        let (a, b, c, d, e, f, g) = (
            Arc::clone(self),
            Arc::clone(self),
            Arc::clone(self),
            Arc::clone(self),
            Arc::clone(self),
            Arc::clone(self),
            Arc::clone(self),
        );
        RunCallbacks::new()
            .on_start(move |pid, _bridge| a.push(format!("start:{}", pid > 0)))
            .on_session_id(move |id| b.push(format!("session:{id}")))
            .on_progress(move |p| c.push(format!("progress:{p}")))
            .on_question(move |q| d.push(format!("question:{}", q.questions.join("|"))))
            .on_plan_approval(move |r| g.push(format!("plan:{}:{}", r.request_id, r.plan)))
            .on_complete(move |r, files| e.push(format!("complete:{r}:{}", files.join(","))))
            .on_error(move |err| f.push(format!("error:{err}")))
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn terminal(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with("complete:") || e.starts_with("error:"))
            .collect()
    }
}

fn script(lines: &[&str], code: i32) -> FakeClaude {
    let mut body = String::from("read -r _task\ncat <<'EOF'\n");
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    body.push_str(&format!("EOF\nexit {code}"));
    FakeClaude::new(&body)
}

async fn run(fake: &FakeClaude, request: RunRequest) -> claude_runner::supervisor::RunOutcome {
    let runner = StreamingRunner::default().with_binary(fake.path());
    tokio::time::timeout(Duration::from_secs(10), runner.run(request))
        .await
        .expect("run did not finish")
        .unwrap()
}

#[tokio::test]
async fn init_and_result_complete_the_run() {
    let fake = script(
        &[
            INIT,
            &assistant("Working on it"),
            r#"{"type":"tool_use","id":"t1","name":"Write","input":{"file_path":"src/main.rs"}}"#,
            r#"{"type":"tool_use","id":"t2","name":"Bash","input":{"command":"cargo fmt"}}"#,
            &result("Final answer"),
        ],
        0,
    );
    let recorder = Arc::new(Recorder::default());
    let outcome = run(
        &fake,
        RunRequest::new("write main").callbacks(recorder.callbacks()),
    )
    .await;

    assert_eq!(outcome.session_id.as_deref(), Some("sess-abc"));
    assert_eq!(
        outcome.status,
        RunStatus::Completed {
            result: "Final answer".to_string(),
            files: vec!["src/main.rs".to_string()],
        }
    );
    assert_eq!(
        recorder.events(),
        vec![
            "start:true",
            "session:sess-abc",
            "progress:Working on it",
            "progress:Write: src/main.rs",
            "progress:bash: cargo fmt",
            "complete:Final answer:src/main.rs",
        ]
    );
}

#[tokio::test]
async fn task_is_sent_as_first_user_message() {
    let fake = FakeClaude::new("read -r task\nprintf '%s\\n' \"$task\" > \"$(dirname \"$0\")/task.json\"");
    let outcome = run(&fake, RunRequest::new("do the thing")).await;
    assert!(outcome.is_completed());

    let sent = std::fs::read_to_string(fake.dir().join("task.json")).unwrap();
    let message: serde_json::Value = serde_json::from_str(sent.trim()).unwrap();
    assert_eq!(message["type"], "user");
    assert_eq!(message["message"]["role"], "user");
    assert_eq!(message["message"]["content"], "do the thing");
}

#[tokio::test]
async fn clean_exit_without_result_uses_assistant_text() {
    let fake = script(&[INIT, &assistant("Only assistant text here")], 0);
    let recorder = Arc::new(Recorder::default());
    let outcome = run(&fake, RunRequest::new("x").callbacks(recorder.callbacks())).await;

    assert_eq!(
        outcome.status,
        RunStatus::Completed {
            result: "Only assistant text here".to_string(),
            files: Vec::new(),
        }
    );
    assert_eq!(recorder.terminal(), vec!["complete:Only assistant text here:"]);
}

#[tokio::test]
async fn error_result_is_reported_once() {
    let fake = script(
        &[
            INIT,
            r#"{"type":"result","subtype":"error_max_turns","error":"Reached max turns"}"#,
        ],
        1,
    );
    let recorder = Arc::new(Recorder::default());
    let outcome = run(&fake, RunRequest::new("x").callbacks(recorder.callbacks())).await;

    assert_eq!(
        outcome.status,
        RunStatus::Failed {
            error: "Reached max turns".to_string()
        }
    );
    assert_eq!(recorder.terminal(), vec!["error:Reached max turns"]);
}

#[tokio::test]
async fn nonzero_exit_without_result_names_the_code() {
    let fake = FakeClaude::new("read -r _task\necho 'disk full' >&2\nexit 3");
    let outcome = run(&fake, RunRequest::new("x")).await;
    assert_eq!(
        outcome.status,
        RunStatus::Failed {
            error: "exit 3 — disk full".to_string()
        }
    );
}

#[tokio::test]
async fn graceful_exit_completes_single_mode_with_partial_text() {
    let fake = script(&[INIT, &assistant("got halfway")], 143);
    let outcome = run(&fake, RunRequest::new("x")).await;
    assert_eq!(
        outcome.status,
        RunStatus::Completed {
            result: "got halfway".to_string(),
            files: Vec::new(),
        }
    );
}

#[tokio::test]
async fn question_tool_raises_callback() {
    let fake = script(
        &[
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"q1","name":"AskUserQuestion","input":{"questions":[{"question":"Which branch?"}]}}]}}"#,
            &result("ok"),
        ],
        0,
    );
    let recorder = Arc::new(Recorder::default());
    run(&fake, RunRequest::new("x").callbacks(recorder.callbacks())).await;
    assert!(recorder
        .events()
        .contains(&"question:Which branch?".to_string()));
}

#[tokio::test]
async fn kill_reports_killed_by_user() {
    let fake = FakeClaude::new(&format!("read -r _task\ncat <<'EOF'\n{INIT}\nEOF\nexec sleep 30"));
    let kill = KillSwitch::new();
    let recorder = Arc::new(Recorder::default());
    let on_session = kill.clone();
    let callbacks = recorder.callbacks().on_session_id(move |_| {
        on_session.kill();
        on_session.kill();
    });

    let outcome = run(
        &fake,
        RunRequest::new("x")
            .mode(RunMode::Team)
            .callbacks(callbacks)
            .kill_switch(kill.clone()),
    )
    .await;

    assert!(kill.is_killed());
    assert_eq!(
        outcome.status,
        RunStatus::Failed {
            error: "killed by user".to_string()
        }
    );
    assert_eq!(recorder.terminal(), vec!["error:killed by user"]);
}

#[tokio::test]
async fn team_mode_completes_at_exit_with_latest_result() {
    let fake = script(&[INIT, &result("first turn"), &result("second turn")], 0);
    let recorder = Arc::new(Recorder::default());
    let outcome = run(
        &fake,
        RunRequest::new("x")
            .mode(RunMode::Team)
            .callbacks(recorder.callbacks()),
    )
    .await;

    assert_eq!(
        outcome.status,
        RunStatus::Completed {
            result: "second turn".to_string(),
            files: Vec::new(),
        }
    );
    assert_eq!(recorder.terminal(), vec!["complete:second turn:"]);
}

#[tokio::test]
async fn plan_approval_is_dispatched_in_line_order() {
    let fake = script(
        &[
            INIT,
            &assistant("Drafted a plan"),
            r#"{"type":"plan_approval_request","request_id":"plan-7","plan":"1. add tests\n2. ship"}"#,
            &result("approved and done"),
        ],
        0,
    );
    let recorder = Arc::new(Recorder::default());
    run(&fake, RunRequest::new("x").callbacks(recorder.callbacks())).await;

    assert_eq!(
        recorder.events(),
        vec![
            "start:true",
            "session:sess-abc",
            "progress:Drafted a plan",
            "plan:plan-7:1. add tests\n2. ship",
            "complete:approved and done:",
        ]
    );
}

async fn env_seen_by(mode: RunMode) -> String {
    let fake = FakeClaude::new(
        r#"read -r _task
printf 'cc=[%s] sub=[%s] team=[%s]' "$CLAUDECODE" "$CLAUDE_RUNNER_SUBPROCESS" "$CLAUDE_CODE_EXPERIMENTAL_AGENT_TEAMS" > "$(dirname "$0")/env.txt"
echo '{"type":"result","subtype":"success","result":"ok"}'"#,
    );
    let outcome = run(&fake, RunRequest::new("x").mode(mode)).await;
    assert!(outcome.is_completed());
    std::fs::read_to_string(fake.dir().join("env.txt")).unwrap()
}

#[tokio::test]
async fn child_env_marks_subprocess_and_team_mode() {
    assert_eq!(env_seen_by(RunMode::Single).await, "cc=[] sub=[1] team=[]");
    assert_eq!(env_seen_by(RunMode::Team).await, "cc=[] sub=[1] team=[1]");
}
