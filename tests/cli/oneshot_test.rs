//! End-to-end tests for one-shot calls against fake CLI scripts.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use claude_runner::cli::{ClaudeCli, InvokeError, InvokeOptions, StreamHooks};

use crate::support::{assistant, result, FakeClaude, INIT};

fn options(fake: &FakeClaude) -> InvokeOptions {
    InvokeOptions::new().binary(fake.path())
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    let err = ClaudeCli::new()
        .invoke("hello", &InvokeOptions::new().binary("/nonexistent/claude"))
        .await
        .unwrap_err();

    assert!(err.is_spawn());
    let msg = err.to_string();
    assert!(msg.contains("failed to spawn"), "{msg}");
    assert!(msg.contains("/nonexistent/claude"), "{msg}");
    assert!(msg.contains("ENOENT"), "{msg}");
    assert!(msg.contains("CLAUDE_CLI_PATH"), "{msg}");
}

#[tokio::test]
async fn stdout_is_trimmed() {
    let fake = FakeClaude::new("printf '  \\n  hello world  \\n\\n'");
    let reply = ClaudeCli::new().invoke("hi", &options(&fake)).await.unwrap();
    assert_eq!(reply, "hello world");
}

#[tokio::test]
async fn passes_model_and_marks_subprocess() {
    let fake = FakeClaude::new(r#"echo "$CLAUDE_RUNNER_SUBPROCESS $*""#);
    let reply = ClaudeCli::new()
        .invoke("the prompt", &options(&fake).model("sonnet").resume("s-9"))
        .await
        .unwrap();

    assert!(reply.starts_with("1 -p the prompt"), "{reply}");
    assert!(reply.contains("--output-format text"), "{reply}");
    assert!(reply.contains("--model sonnet"), "{reply}");
    assert!(reply.contains("--resume s-9"), "{reply}");
}

#[tokio::test]
async fn empty_output_is_an_error() {
    let fake = FakeClaude::new("printf '   \\n'");
    let err = ClaudeCli::new().invoke("hi", &options(&fake)).await.unwrap_err();
    assert!(matches!(err, InvokeError::EmptyResponse));
}

#[tokio::test]
async fn nonzero_exit_embeds_bounded_stderr() {
    let fake = FakeClaude::new("head -c 20000 /dev/zero | tr '\\0' 'e' >&2\nexit 1");
    let err = ClaudeCli::new().invoke("hi", &options(&fake)).await.unwrap_err();

    let msg = err.to_string();
    assert!(msg.starts_with("exit 1 — eeee"), "{}", &msg[..40.min(msg.len())]);
    assert!(msg.len() < 9000, "message was {} bytes", msg.len());
    assert!(msg.contains("bytes truncated"));
}

#[tokio::test]
async fn wall_clock_timeout_kills_the_process() {
    let fake = FakeClaude::new("exec sleep 5");
    let started = Instant::now();
    let err = ClaudeCli::new()
        .invoke("hi", &options(&fake).timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(err.to_string().contains("200ms"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn idle_timeout_resets_on_output() {
    let fake = FakeClaude::new("for i in 1 2 3 4 5; do echo \"line $i\"; sleep 0.1; done");
    let reply = ClaudeCli::new()
        .invoke("hi", &options(&fake).idle_timeout(Duration::from_millis(400)))
        .await
        .unwrap();
    assert!(reply.ends_with("line 5"), "{reply}");
}

#[tokio::test]
async fn concurrent_calls_fail_independently() {
    let fake = FakeClaude::new("sleep 0.1\necho ok");
    let cli = ClaudeCli::new();
    let good = options(&fake);
    let bad = InvokeOptions::new().binary("/nonexistent/claude");

    let calls = (0..5).map(|i| {
        let opts = if i == 2 { bad.clone() } else { good.clone() };
        let cli = cli.clone();
        async move { cli.invoke("hi", &opts).await }
    });
    let results = futures_util::future::join_all(calls).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 4);
    assert!(results[2].as_ref().is_err_and(InvokeError::is_spawn));
}

#[tokio::test]
async fn streaming_prefers_result_and_reports_session_once() {
    let fake = FakeClaude::printing(
        &[
            INIT,
            INIT,
            &assistant("Thinking it over"),
            "not json at all",
            &result("Final answer"),
        ],
        0,
    );
    let sessions = Arc::new(Mutex::new(Vec::new()));
    let texts = Arc::new(Mutex::new(Vec::new()));
    let (s, t) = (Arc::clone(&sessions), Arc::clone(&texts));
    let hooks = StreamHooks::new()
        .on_session_id(move |id| s.lock().unwrap().push(id.to_string()))
        .on_text(move |text| t.lock().unwrap().push(text.to_string()));

    let reply = ClaudeCli::new()
        .invoke_streaming("hi", &options(&fake), &hooks)
        .await
        .unwrap();

    assert_eq!(reply.text, "Final answer");
    assert_eq!(reply.session_id.as_deref(), Some("sess-abc"));
    assert!(!reply.cancelled);
    assert_eq!(*sessions.lock().unwrap(), vec!["sess-abc"]);
    assert_eq!(*texts.lock().unwrap(), vec!["Thinking it over"]);
}

#[tokio::test]
async fn streaming_falls_back_to_assistant_text() {
    let fake = FakeClaude::printing(&[INIT, &assistant("Only assistant text here")], 0);
    let reply = ClaudeCli::new()
        .invoke_streaming("hi", &options(&fake), &StreamHooks::new())
        .await
        .unwrap();
    assert_eq!(reply.text, "Only assistant text here");
}

#[tokio::test]
async fn streaming_graceful_exit_codes_return_partial_text() {
    for code in [130, 143] {
        let fake = FakeClaude::printing(&[INIT, &assistant("half way")], code);
        let reply = ClaudeCli::new()
            .invoke_streaming("hi", &options(&fake), &StreamHooks::new())
            .await
            .unwrap_or_else(|e| panic!("exit {code} should resolve, got {e}"));
        assert!(reply.cancelled);
        assert_eq!(reply.text, "half way");
    }

    let fake = FakeClaude::printing(&[], 143);
    let reply = ClaudeCli::new()
        .invoke_streaming("hi", &options(&fake), &StreamHooks::new())
        .await
        .unwrap();
    assert!(reply.text.is_empty());
}

#[tokio::test]
async fn streaming_other_exit_codes_fail_with_code() {
    for code in [1, 137] {
        let fake = FakeClaude::printing(&[INIT, &assistant("half way")], code);
        let err = ClaudeCli::new()
            .invoke_streaming("hi", &options(&fake), &StreamHooks::new())
            .await
            .unwrap_err();
        assert!(
            err.to_string().starts_with(&format!("exit {code}")),
            "{err}"
        );
    }
}
