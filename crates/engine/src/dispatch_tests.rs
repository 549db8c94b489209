// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sloth_adapters::{CommandInterpreter, FakeInterpreter};
use sloth_core::{TaskId, TaskScript, WorkflowId};
use tokio::net::TcpListener;

fn envelope(script: TaskScript) -> TaskEnvelope {
    TaskEnvelope {
        task_id: TaskId::generate(),
        workflow_id: WorkflowId::new("wf-1"),
        task_name: "t".into(),
        script,
        params: OutputTable::new(),
        deps: BTreeMap::new(),
        env: BTreeMap::new(),
        workdir: None,
        timeout_ms: 30_000,
        artifacts: vec![],
        inputs: BTreeMap::new(),
        user: None,
    }
}

// ── local ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn local_success_captures_outputs() {
    let tmp = tempfile::tempdir().unwrap();
    let interpreter = FakeInterpreter::new();
    let mut outputs = OutputTable::new();
    outputs.insert("host".into(), serde_json::json!("here"));
    interpreter.succeed_with("work", outputs.clone());

    let dispatcher = LocalDispatcher::new(interpreter, tmp.path());
    let outcome = dispatcher
        .execute(
            &Endpoint::Local,
            envelope(TaskScript::Source("work".into())),
            CancellationToken::new(),
        )
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.outputs, outputs);
}

#[tokio::test]
async fn local_shell_task_collects_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = LocalDispatcher::new(CommandInterpreter::new(), tmp.path());

    let mut env = envelope(TaskScript::Command(
        "mkdir -p out && printf data > out/result.bin".into(),
    ));
    env.artifacts = vec!["out/*.bin".into()];

    let outcome = dispatcher
        .execute(&Endpoint::Local, env, CancellationToken::new())
        .await;

    assert!(outcome.is_success(), "error: {:?}", outcome.error);
    assert_eq!(outcome.artifacts.len(), 1);
    assert_eq!(outcome.artifacts[0].0, "out/result.bin");
    assert_eq!(outcome.artifacts[0].1, b"data");
}

#[tokio::test]
async fn local_missing_artifact_fails_the_attempt() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = LocalDispatcher::new(CommandInterpreter::new(), tmp.path());

    let mut env = envelope(TaskScript::Command("true".into()));
    env.artifacts = vec!["never/*.txt".into()];

    let outcome = dispatcher
        .execute(&Endpoint::Local, env, CancellationToken::new())
        .await;

    assert_eq!(
        outcome.error.as_ref().map(|e| e.kind),
        Some(TaskErrorKind::ArtifactMissing)
    );
}

#[tokio::test]
async fn local_inputs_are_materialized_in_the_workdir() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = LocalDispatcher::new(CommandInterpreter::new(), tmp.path());

    let mut env = envelope(TaskScript::Command("cat incoming/model.bin".into()));
    env.inputs
        .insert("incoming/model.bin".into(), b"weights".to_vec());

    let outcome = dispatcher
        .execute(&Endpoint::Local, env, CancellationToken::new())
        .await;

    assert!(outcome.is_success(), "error: {:?}", outcome.error);
    assert_eq!(outcome.stdout, b"weights");
}

#[tokio::test]
async fn local_nonzero_exit_maps_to_non_zero_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = LocalDispatcher::new(CommandInterpreter::new(), tmp.path());

    let outcome = dispatcher
        .execute(
            &Endpoint::Local,
            envelope(TaskScript::Command("exit 7".into())),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.exit_code, 7);
    assert_eq!(
        outcome.error.map(|e| e.kind),
        Some(TaskErrorKind::NonZeroExit)
    );
}

// ── remote ───────────────────────────────────────────────────────────────

const TEST_TOKEN: &str = "shared-secret";

/// Minimal in-test agent: handshake, then one scripted reply per
/// connection.
async fn scripted_agent(replies: Vec<Vec<Frame>>, busy: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let expected = auth_digest(TEST_TOKEN);

    tokio::spawn(async move {
        let mut replies = replies.into_iter();
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let hello: Hello = read_msg(&mut socket, DEFAULT_IO_TIMEOUT).await.unwrap();
            if !sloth_proto::digest_matches(&expected, &hello.auth_digest) {
                write_msg(
                    &mut socket,
                    &HelloReply::Denied {
                        reason: "bad token".into(),
                    },
                    DEFAULT_IO_TIMEOUT,
                )
                .await
                .unwrap();
                continue;
            }
            write_msg(
                &mut socket,
                &HelloReply::Ok {
                    version: PROTOCOL_VERSION,
                },
                DEFAULT_IO_TIMEOUT,
            )
            .await
            .unwrap();

            let request: MasterToAgent =
                read_msg(&mut socket, DEFAULT_IO_TIMEOUT).await.unwrap();
            match request {
                MasterToAgent::Execute { .. } => {
                    if busy {
                        write_msg(&mut socket, &AgentReply::Busy, DEFAULT_IO_TIMEOUT)
                            .await
                            .unwrap();
                        continue;
                    }
                    write_msg(&mut socket, &AgentReply::Accepted, DEFAULT_IO_TIMEOUT)
                        .await
                        .unwrap();
                    for frame in replies.next().unwrap_or_default() {
                        write_msg(&mut socket, &frame, DEFAULT_IO_TIMEOUT)
                            .await
                            .unwrap();
                    }
                }
                MasterToAgent::Cancel { .. } => {
                    write_msg(&mut socket, &AgentReply::CancelOk, DEFAULT_IO_TIMEOUT)
                        .await
                        .unwrap();
                }
            }
        }
    });
    address
}

#[tokio::test]
async fn remote_round_trip_reassembles_the_stream() {
    let mut outputs = OutputTable::new();
    outputs.insert("answer".into(), serde_json::json!(42));
    let frames = vec![
        Frame::Stdout {
            data: b"hello ".to_vec(),
        },
        Frame::Stdout {
            data: b"world".to_vec(),
        },
        Frame::ArtifactChunk {
            name: "out.bin".into(),
            offset: 0,
            data: b"ab".to_vec(),
        },
        Frame::ArtifactChunk {
            name: "out.bin".into(),
            offset: 2,
            data: b"cd".to_vec(),
        },
        Frame::Final {
            exit_code: 0,
            duration_ms: 12,
            outputs: outputs.clone(),
            error: None,
        },
    ];
    let address = scripted_agent(vec![frames], false).await;

    let dispatcher = RemoteDispatcher::new(TEST_TOKEN);
    let outcome = dispatcher
        .execute(
            &Endpoint::Remote {
                address,
                token: None,
            },
            envelope(TaskScript::Command("hostname".into())),
            CancellationToken::new(),
        )
        .await;

    assert!(outcome.is_success(), "error: {:?}", outcome.error);
    assert_eq!(outcome.stdout, b"hello world");
    assert_eq!(outcome.outputs, outputs);
    assert_eq!(outcome.duration_ms, 12);
    assert_eq!(outcome.artifacts, vec![("out.bin".into(), b"abcd".to_vec())]);
}

#[tokio::test]
async fn remote_busy_is_transient() {
    let address = scripted_agent(vec![], true).await;

    let dispatcher = RemoteDispatcher::new(TEST_TOKEN);
    let outcome = dispatcher
        .execute(
            &Endpoint::Remote {
                address,
                token: None,
            },
            envelope(TaskScript::Command("true".into())),
            CancellationToken::new(),
        )
        .await;

    let error = outcome.error.unwrap();
    assert_eq!(error.kind, TaskErrorKind::AgentBusy);
    assert!(error.kind.is_transient());
}

#[tokio::test]
async fn remote_bad_token_is_credential_rejected() {
    let address = scripted_agent(vec![], false).await;

    let dispatcher = RemoteDispatcher::new("wrong-token");
    let outcome = dispatcher
        .execute(
            &Endpoint::Remote {
                address,
                token: None,
            },
            envelope(TaskScript::Command("true".into())),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(
        outcome.error.map(|e| e.kind),
        Some(TaskErrorKind::CredentialRejected)
    );
}

#[tokio::test]
async fn remote_stream_without_final_is_transport_loss() {
    // Stream ends (connection loop re-accepts) after a lone stdout frame.
    let frames = vec![vec![Frame::Stdout {
        data: b"partial".to_vec(),
    }]];
    let address = scripted_agent(frames, false).await;

    let dispatcher = RemoteDispatcher::new(TEST_TOKEN);
    let mut env = envelope(TaskScript::Command("true".into()));
    env.timeout_ms = 500; // keep the frame deadline short
    let outcome = dispatcher
        .execute(
            &Endpoint::Remote {
                address,
                token: None,
            },
            env,
            CancellationToken::new(),
        )
        .await;

    assert_eq!(
        outcome.error.map(|e| e.kind),
        Some(TaskErrorKind::ConnectionLost)
    );
}

#[tokio::test]
async fn remote_unreachable_agent_is_connection_lost() {
    let dispatcher = RemoteDispatcher::new(TEST_TOKEN);
    let outcome = dispatcher
        .execute(
            &Endpoint::Remote {
                // Reserved TEST-NET address; nothing listens there.
                address: "192.0.2.1:1".into(),
                token: None,
            },
            envelope(TaskScript::Command("true".into())),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(
        outcome.error.map(|e| e.kind),
        Some(TaskErrorKind::ConnectionLost)
    );
}
