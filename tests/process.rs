//! Subprocess tests using a shell script in place of the Claude CLI.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use claude_query::{ClaudeClient, Error, Prompt, Query, QueryConfig};
use futures::StreamExt;

/// Answers `--version`, then the handshake, then runs `body`.
fn fake_cli(dir: &Path, body: &str) -> PathBuf {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let script = format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "2.1.0 (Claude Code)"
  exit 0
fi
read -r line
id=$(printf '%s' "$line" | sed 's/.*"request_id":"\([^"]*\)".*/\1/')
printf '{{"type":"control_response","response":{{"subtype":"success","request_id":"%s","response":{{}}}}}}\n' "$id"
{body}
"#
    );
    let path = dir.join("claude");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn subprocess_session_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        dir.path(),
        r#"read -r prompt
echo '{"type":"system","subtype":"init","session_id":"proc-1"}'
echo '{"type":"assistant","session_id":"proc-1","message":{"id":"m1","role":"assistant","content":[{"type":"text","text":"pong"}]}}'
echo '{"type":"result","subtype":"success","result":"pong","session_id":"proc-1","total_cost_usd":0.01}'
cat > /dev/null
exit 0"#,
    );

    let client = ClaudeClient::builder().cli_path(&cli).build().unwrap();
    let response = client.collect("ping").await.unwrap();
    assert!(response.is_success());
    assert_eq!(response.text, "pong");
    assert_eq!(response.session_id.unwrap().as_str(), "proc-1");
    assert_eq!(response.cost_usd, Some(0.01));
}

#[tokio::test]
async fn abnormal_exit_is_reported_with_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        dir.path(),
        r#"read -r prompt
echo "fatal: model overloaded" >&2
exit 3"#,
    );

    let lines = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&lines);
    let config = QueryConfig::builder()
        .cli_path(&cli)
        .on_stderr(move |line| seen.lock().unwrap().push(line.to_string()))
        .build()
        .unwrap();

    let mut query = Query::spawn(&config, Prompt::from("hi")).await.unwrap();
    assert!(query.pid().is_some());

    let err = query.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::PeerExited { code: Some(3), .. }), "{err:?}");
    assert!(query.next().await.is_none());

    let saw_stderr = || {
        lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains("model overloaded"))
    };
    for _ in 0..50 {
        if saw_stderr() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(saw_stderr());
    query.close().await;
}

#[tokio::test]
async fn close_terminates_a_lingering_peer() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        dir.path(),
        r#"trap '' TERM
while true; do sleep 1; done"#,
    );
    let config = QueryConfig::builder().cli_path(&cli).build().unwrap();

    let mut query = Query::spawn(&config, Prompt::Streaming).await.unwrap();
    // SIGTERM is ignored, so close escalates after its grace period.
    tokio::time::timeout(std::time::Duration::from_secs(15), query.close())
        .await
        .unwrap();
    assert!(query.is_closed());
}
