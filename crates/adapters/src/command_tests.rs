// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tokio::sync::mpsc;

fn sinks() -> (IoSinks, mpsc::Receiver<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
    let (stdout_tx, stdout_rx) = mpsc::channel(64);
    let (stderr_tx, stderr_rx) = mpsc::channel(64);
    (
        IoSinks {
            stdout: stdout_tx,
            stderr: stderr_tx,
        },
        stdout_rx,
        stderr_rx,
    )
}

async fn drain(mut rx: mpsc::Receiver<Vec<u8>>) -> Vec<u8> {
    let mut all = Vec::new();
    while let Some(chunk) = rx.recv().await {
        all.extend(chunk);
    }
    all
}

#[tokio::test]
async fn echo_succeeds_and_streams_stdout() {
    let interp = CommandInterpreter::new();
    let (sinks, stdout_rx, _stderr_rx) = sinks();

    let outcome = interp
        .evaluate_script(
            &TaskScript::Command("echo hi".into()),
            Bindings::default(),
            sinks,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.exit_code, 0);
    let stdout = drain(stdout_rx).await;
    assert_eq!(String::from_utf8_lossy(&stdout), "hi\n");
}

#[tokio::test]
async fn nonzero_exit_is_reported_not_raised() {
    let interp = CommandInterpreter::new();
    let (sinks, _stdout_rx, _stderr_rx) = sinks();

    let outcome = interp
        .evaluate_script(
            &TaskScript::Command("exit 3".into()),
            Bindings::default(),
            sinks,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, 3);
    assert_eq!(outcome.message, "exit code 3");
}

#[tokio::test]
async fn stderr_goes_to_its_own_sink() {
    let interp = CommandInterpreter::new();
    let (sinks, stdout_rx, stderr_rx) = sinks();

    interp
        .evaluate_script(
            &TaskScript::Command("echo oops >&2".into()),
            Bindings::default(),
            sinks,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(drain(stdout_rx).await.is_empty());
    assert_eq!(String::from_utf8_lossy(&drain(stderr_rx).await), "oops\n");
}

#[tokio::test]
async fn env_bindings_reach_the_command() {
    let interp = CommandInterpreter::new();
    let (sinks, stdout_rx, _stderr_rx) = sinks();

    let mut bindings = Bindings::default();
    bindings.env.insert("GREETING".into(), "hello".into());

    interp
        .evaluate_script(
            &TaskScript::Command("echo $GREETING".into()),
            bindings,
            sinks,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(String::from_utf8_lossy(&drain(stdout_rx).await), "hello\n");
}

#[tokio::test]
async fn workdir_binding_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let interp = CommandInterpreter::new();
    let (sinks, stdout_rx, _stderr_rx) = sinks();

    let bindings = Bindings {
        workdir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };

    interp
        .evaluate_script(
            &TaskScript::Command("pwd".into()),
            bindings,
            sinks,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let printed = String::from_utf8_lossy(&drain(stdout_rx).await).trim().to_string();
    // Compare canonicalized paths (macOS tempdirs live behind /private).
    assert_eq!(
        std::fs::canonicalize(&printed).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
}

#[tokio::test]
async fn cancellation_terminates_the_process_group() {
    let interp = CommandInterpreter::with_cancel_grace(std::time::Duration::from_secs(2));
    let (sinks, _stdout_rx, _stderr_rx) = sinks();
    let cancel = CancellationToken::new();

    let eval = {
        let cancel = cancel.clone();
        let interp = interp.clone();
        tokio::spawn(async move {
            interp
                .evaluate_script(
                    &TaskScript::Command("sleep 60".into()),
                    Bindings::default(),
                    sinks,
                    cancel,
                )
                .await
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let started = std::time::Instant::now();
    cancel.cancel();

    let result = eval.await.unwrap();
    assert!(matches!(result, Err(InterpreterError::Cancelled)));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn script_source_is_refused() {
    let interp = CommandInterpreter::new();
    let (sinks, _stdout_rx, _stderr_rx) = sinks();

    let err = interp
        .evaluate_script(
            &TaskScript::Source("return {}".into()),
            Bindings::default(),
            sinks,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::Unsupported(_)));
}

#[tokio::test]
async fn guard_truth_follows_exit_code() {
    let interp = CommandInterpreter::new();
    let bindings = Bindings::default();

    assert!(interp
        .evaluate_guard(&TaskScript::Command("true".into()), &bindings)
        .await
        .unwrap());
    assert!(!interp
        .evaluate_guard(&TaskScript::Command("false".into()), &bindings)
        .await
        .unwrap());
}
