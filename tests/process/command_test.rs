//! Ad hoc shell commands.

use std::time::Duration;

use bot_launcher::process::{CommandEvent, CommandRunner, LaunchSpec, ProcessError};

#[tokio::test]
async fn output_is_merged_and_exit_code_reported() {
    let output = CommandRunner::new()
        .run("echo one; echo two >&2; exit 3")
        .unwrap()
        .collect()
        .await;

    assert_eq!(output.exit_code, Some(3));
    assert!(!output.success());
    assert_eq!(output.lines.len(), 2);
    assert!(output.lines.contains(&"one".to_string()));
    assert!(output.lines.contains(&"two".to_string()));
}

#[tokio::test]
async fn merged_output_keeps_write_order() {
    let output = CommandRunner::new()
        .run("for i in 1 2 3 4 5 6 7 8 9 10; do echo o$i; echo e$i >&2; done")
        .unwrap()
        .collect()
        .await;

    let expected: Vec<String> = (1..=10)
        .flat_map(|i| [format!("o{i}"), format!("e{i}")])
        .collect();
    assert_eq!(output.lines, expected);
    assert!(output.success());
}

#[tokio::test]
async fn background_child_does_not_delay_completion() {
    let started = std::time::Instant::now();
    let output = tokio::time::timeout(
        Duration::from_secs(8),
        CommandRunner::new().run("sleep 6 & echo done").unwrap().collect(),
    )
    .await
    .expect("completion should not wait for the background child");

    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.lines, ["done"]);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn finished_is_the_last_event() {
    let mut run = CommandRunner::new().run("echo a; echo b").unwrap();
    assert!(run.pid().is_some());

    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(10), run.next_event())
        .await
        .unwrap()
    {
        events.push(event);
    }

    assert_eq!(
        events,
        [
            CommandEvent::Output("a".to_string()),
            CommandEvent::Output("b".to_string()),
            CommandEvent::Finished { exit_code: Some(0) },
        ]
    );
}

#[tokio::test]
async fn overlapping_runs_are_independent() {
    let runner = CommandRunner::new();
    let slow = runner.run("sleep 0.3; echo slow").unwrap();
    let fast = runner.run("echo fast").unwrap();

    let (slow, fast) = tokio::join!(slow.collect(), fast.collect());

    assert_eq!(fast.lines, ["fast"]);
    assert!(fast.success());
    assert_eq!(slow.lines, ["slow"]);
    assert!(slow.success());
}

#[tokio::test]
async fn missing_program_fails_to_start() {
    let err = CommandRunner::new()
        .run_spec(&LaunchSpec::new("/definitely/not/a/real/program"))
        .unwrap_err();

    match err {
        ProcessError::StartFailed { reason, .. } => assert_eq!(reason, "program not found"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn install_runs_pip_against_requirements() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("requirements.txt"), "").unwrap();

    // `echo` stands in for the interpreter and prints what it was asked to do.
    let python = std::path::PathBuf::from("/bin/echo");

    let config = bot_launcher::config::BotConfig {
        python: Some(python),
        ..Default::default()
    };
    let output = CommandRunner::new()
        .install_requirements(dir.path(), &config)
        .unwrap()
        .collect()
        .await;

    assert!(output.success());
    let expected = format!(
        "-m pip install -r {}",
        dir.path().join("requirements.txt").display()
    );
    assert_eq!(output.lines, [expected]);
}
