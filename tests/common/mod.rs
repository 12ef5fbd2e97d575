use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_file(dir: &Path, filename: &str, content: &str) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, content).expect("Failed to write file");
    path
}

pub fn write_settings(dir: &Path, content: &str) -> PathBuf {
    write_file(dir, "results.yaml", content)
}

/// gtest report: three cases, one crashing with a segfault
pub fn segfault_report() -> String {
    r#"
{
  "tests": 3,
  "failures": 1,
  "disabled": 0,
  "errors": 0,
  "time": "0.125s",
  "name": "AllTests",
  "testsuites": [
    {
      "name": "Storage",
      "tests": 3,
      "testsuite": [
        { "name": "Read", "status": "RUN", "time": "0.010s" },
        {
          "name": "Write",
          "status": "RUN",
          "time": "0.090s",
          "failures": [
            { "failure": "Received signal 11\nSegmentation fault (core dumped)", "type": "" }
          ]
        },
        { "name": "Disabled", "status": "NOTRUN", "time": "0s" }
      ]
    }
  ]
}
"#
    .to_string()
}

/// gtest report where every case passes
pub fn passing_report(cases: &[&str]) -> String {
    let cases = cases
        .iter()
        .map(|c| format!(r#"{{ "name": "{}", "status": "RUN", "time": "0.001s" }}"#, c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{{ "tests": {}, "failures": 0, "errors": 0, "time": "0.010s", "name": "AllTests",
            "testsuites": [ {{ "name": "Suite", "testsuite": [ {} ] }} ] }}"#,
        cases.matches("\"RUN\"").count(),
        cases
    )
}
