#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use sandbox_builder_claude_agent::{
    collect_generation, AgentError, AgentOptions, ClaudeQuery,
};
use serde_json::json;
use serial_test::serial;
use tempfile::TempDir;

// Scripts are written then exec'd; serializing the tests avoids ETXTBSY when
// another test forks while a script is still open for writing.
fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("claude");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake cli");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

fn query_for(program: PathBuf) -> ClaudeQuery {
    ClaudeQuery::new(
        AgentOptions {
            program,
            ..AgentOptions::default()
        },
        "sk-test-key",
    )
}

#[tokio::test]
#[serial]
async fn messages_pass_through_verbatim() {
    let dir = TempDir::new().expect("tempdir");
    let program = write_script(
        dir.path(),
        r#"
echo '{"type":"system","subtype":"init","session_id":"s1"}'
echo 'not json, ignored'
echo ''
echo "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"key=$ANTHROPIC_API_KEY turns=$7\"}]}}"
echo '{"type":"result","subtype":"success","is_error":false}'
"#,
    );

    let stream = query_for(program).start("build it").expect("start");
    let items: Vec<_> = stream.collect().await;

    let values: Vec<_> = items
        .into_iter()
        .map(|item| item.expect("successful message"))
        .collect();
    assert_eq!(
        values,
        vec![
            json!({"type": "system", "subtype": "init", "session_id": "s1"}),
            json!({"type": "assistant", "message": {"content": [{"type": "text", "text": "key=sk-test-key turns=10"}]}}),
            json!({"type": "result", "subtype": "success", "is_error": false}),
        ]
    );
}

#[tokio::test]
#[serial]
async fn failed_run_ends_with_error_and_stderr_tail() {
    let dir = TempDir::new().expect("tempdir");
    let program = write_script(
        dir.path(),
        r#"
echo '{"type":"system","subtype":"init"}'
echo 'Invalid API key' >&2
exit 2
"#,
    );

    let items: Vec<_> = query_for(program).start("p").expect("start").collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    match &items[1] {
        Err(AgentError::ProcessExited { code, stderr }) => {
            assert_eq!(*code, Some(2));
            assert!(stderr.contains("Invalid API key"));
        }
        other => panic!("unexpected item: {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn abort_stops_a_running_query() {
    let dir = TempDir::new().expect("tempdir");
    let program = write_script(
        dir.path(),
        r#"
echo '{"type":"system","subtype":"init"}'
sleep 30
echo '{"type":"result","subtype":"success"}'
"#,
    );

    let mut stream = query_for(program).start("p").expect("start");
    let first = stream.next().await.expect("first item").expect("ok");
    assert_eq!(first["type"], "system");

    let handle = stream.abort_handle();
    handle.abort();
    assert!(handle.is_aborted());

    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("abort should end the stream promptly");
    assert!(matches!(next, Some(Err(AgentError::Aborted))));
}

#[tokio::test]
#[serial]
async fn missing_binary_is_a_spawn_error() {
    let query = query_for(PathBuf::from("/nonexistent/claude"));
    assert!(matches!(query.start("p"), Err(AgentError::Spawn { .. })));

    let result = collect_generation(&query, "p").await;
    assert!(!result.success);
    assert!(result.messages.is_empty());
    assert!(result.error.expect("error").starts_with("failed to spawn agent"));
}
