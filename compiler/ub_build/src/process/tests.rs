use super::*;

#[test]
fn test_command_line_quoting() {
    let line = command_line(
        Path::new("/usr/bin/clang"),
        &["-o".to_string(), "out dir/a.o".to_string(), String::new()],
    );
    assert_eq!(line, "/usr/bin/clang -o \"out dir/a.o\" \"\"");
}

#[test]
fn test_missing_program() {
    let err = run(
        Path::new("/definitely/not/a/real/tool"),
        &[],
        Duration::from_secs(5),
    )
    .unwrap_err();
    assert!(matches!(err, ProcessError::NotFound { .. }));
    assert_eq!(err.to_diagnostic().code, ErrorCode::E5311);
}

#[cfg(unix)]
#[test]
fn test_captures_both_streams() {
    let out = run(
        Path::new("/bin/sh"),
        &[
            "-c".to_string(),
            "echo to-stdout; echo to-stderr 1>&2; exit 3".to_string(),
        ],
        Duration::from_secs(10),
    )
    .unwrap();
    assert_eq!(out.status, Some(3));
    assert!(!out.success());
    assert!(out.output.contains("to-stdout\n"));
    assert!(out.output.contains("to-stderr\n"));
}

#[cfg(unix)]
#[test]
fn test_large_output_on_both_streams_does_not_deadlock() {
    let script = "i=0; while [ $i -lt 2000 ]; do echo out$i; echo err$i 1>&2; i=$((i+1)); done";
    let out = run(
        Path::new("/bin/sh"),
        &["-c".to_string(), script.to_string()],
        Duration::from_secs(30),
    )
    .unwrap();
    assert!(out.success());
    assert_eq!(out.output.lines().count(), 4000);
}

#[cfg(unix)]
#[test]
fn test_timeout_kills_the_tool() {
    let started = Instant::now();
    let err = run(
        Path::new("/bin/sh"),
        &["-c".to_string(), "echo started; exec sleep 30".to_string()],
        Duration::from_millis(300),
    )
    .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    match &err {
        ProcessError::Timeout { output, .. } => assert!(output.contains("started")),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(err.to_diagnostic().code, ErrorCode::E5310);
}

#[cfg(unix)]
#[test]
fn test_terminate_reaps_a_running_child() {
    let mut child = Command::new("/bin/sh")
        .args(["-c", "exec sleep 30"])
        .stdin(Stdio::null())
        .spawn()
        .unwrap();
    assert!(child.try_wait().unwrap().is_none());

    let started = Instant::now();
    terminate(&mut child);

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(child.try_wait().unwrap().is_some());
}
