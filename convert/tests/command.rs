//! `CommandConverter` against real child processes.
#![cfg(unix)]

use std::time::{Duration, Instant};

use docfetch_convert::{CommandConverter, ConvertError, Converter};

const BUDGET: Duration = Duration::from_secs(10);

fn document(contents: &str) -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    std::fs::write(file.path(), contents).unwrap();
    file
}

#[tokio::test]
async fn stdout_is_the_markdown() {
    let file = document("# Title\n\nbody\n");
    let markdown = CommandConverter::new("cat")
        .convert(file.path(), BUDGET)
        .await
        .unwrap();
    assert_eq!(markdown, "# Title\n\nbody\n");
}

#[tokio::test]
async fn path_is_appended_after_configured_args() {
    let file = document("ignored");
    let markdown = CommandConverter::new("sh")
        .args(["-c", "printf '%s' \"$(basename \"$1\")\"", "sh"])
        .convert(file.path(), BUDGET)
        .await
        .unwrap();
    assert_eq!(
        markdown,
        file.path().file_name().unwrap().to_string_lossy()
    );
}

#[tokio::test]
async fn non_zero_exit_reports_stderr() {
    let file = document("x");
    let err = CommandConverter::new("sh")
        .args(["-c", "echo 'unsupported format' >&2; exit 3", "sh"])
        .convert(file.path(), BUDGET)
        .await
        .unwrap_err();
    let ConvertError::Failed { status, stderr } = err else {
        panic!("expected exit failure");
    };
    assert_eq!(status.code(), Some(3));
    assert_eq!(stderr, "unsupported format");
}

#[tokio::test]
async fn budget_elapsing_is_a_timeout() {
    let file = document("x");
    let started = Instant::now();
    let err = CommandConverter::new("sh")
        .args(["-c", "sleep 30", "sh"])
        .convert(file.path(), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert!(err.to_string().starts_with("conversion timed out"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let file = document("x");
    let err = CommandConverter::new("/nonexistent/docfetch-converter")
        .convert(file.path(), BUDGET)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::Spawn { .. }), "{err}");
}

#[tokio::test]
async fn oversized_output_is_cut_off() {
    let file = document("x");
    let started = Instant::now();
    let err = CommandConverter::new("sh")
        .args(["-c", "head -c 4096 /dev/zero; sleep 30", "sh"])
        .max_output_bytes(1024)
        .convert(file.path(), BUDGET)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::OutputTooLarge { limit: 1024 }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn noisy_stderr_does_not_stall_the_converter() {
    let file = document("# ok\n");
    let markdown = CommandConverter::new("sh")
        .args(["-c", "head -c 1000000 /dev/zero >&2; cat \"$1\"", "sh"])
        .convert(file.path(), BUDGET)
        .await
        .unwrap();
    assert_eq!(markdown, "# ok\n");
}
