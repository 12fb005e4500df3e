//! CLI test cases.
//!
//! OCR tests use the `fixture` engine, which replays saved Vision API
//! responses from `tests/fixtures/vision/`. Tests against the real API need
//! credentials and are ignored by default.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

/// A saved response containing "Gravity pulls objects objects down."
static GRAVITY_RESPONSE: &str = "tests/fixtures/vision/gravity_response.json";

/// A test image matching [`GRAVITY_RESPONSE`].
static GRAVITY_IMAGE: &str = "tests/fixtures/images/gravity.png";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("vision-text-cleaner").unwrap()
}

/// Parse JSONL output.
fn parse_jsonl(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_clean_text_file() {
    cmd()
        .arg("clean")
        .arg("tests/fixtures/texts/worksheet.txt")
        .arg("--no-spell-check")
        .assert()
        .success()
        .stdout(
            "What do you mean by free fall? When gravity pulls objects down. \
             • no air • only gravity\n",
        );
}

#[test]
fn test_clean_keep_line_breaks() {
    cmd()
        .arg("clean")
        .arg("tests/fixtures/texts/worksheet.txt")
        .arg("--no-spell-check")
        .arg("--keep-line-breaks")
        .assert()
        .success()
        .stdout(
            "What do you mean by free fall?\nWhen gravity pulls objects down.\n\
             • no air\n• only gravity\n",
        );
}

#[test]
fn test_clean_stdin() {
    cmd()
        .arg("clean")
        .arg("--no-spell-check")
        .write_stdin("the the moon")
        .assert()
        .success()
        .stdout("the moon\n");
}

#[test]
fn test_clean_jsonl_records() {
    let output = cmd()
        .arg("clean")
        .arg("tests/fixtures/texts/records.jsonl")
        .arg("--jsonl")
        .output()
        .unwrap();
    assert!(output.status.success());
    let records = parse_jsonl(&output.stdout);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["id"], 1);
    assert_eq!(records[0]["cleaned_text"], "Gravity pulls objects down.");
    assert_eq!(records[1]["cleaned_text"], "the moon");
}

#[test]
fn test_ocr_fixture_engine() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("out.jsonl");
    let output_dir = dir.path().join("annotated");
    cmd()
        .arg("ocr")
        .arg(GRAVITY_IMAGE)
        .arg("--engine")
        .arg("fixture")
        .arg("--fixture-response")
        .arg(GRAVITY_RESPONSE)
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("--out")
        .arg(&output_path)
        .assert()
        .success();

    let records = parse_jsonl(&fs::read(&output_path).unwrap());
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["id"], GRAVITY_IMAGE);
    assert!(
        record["raw_text"]
            .as_str()
            .unwrap()
            .starts_with("Gravity pulls objects objects down.")
    );
    assert!(
        record["cleaned_text"]
            .as_str()
            .unwrap()
            .starts_with("Gravity pulls objects down.")
    );
    assert_eq!(record["confidence_source"], "proxy");
    assert!(record.get("errors").is_none());
    assert!(output_dir.join("gravity_annotated.png").exists());
}

#[test]
fn test_ocr_input_list_csv() {
    let output = cmd()
        .arg("ocr")
        .arg("--input-list")
        .arg("tests/fixtures/images/list.csv")
        .arg("--engine")
        .arg("fixture")
        .arg("--fixture-response")
        .arg(GRAVITY_RESPONSE)
        .output()
        .unwrap();
    assert!(output.status.success());
    let records = parse_jsonl(&output.stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], "gravity");
}

#[test]
fn test_ocr_no_text() {
    let output = cmd()
        .arg("ocr")
        .arg(GRAVITY_IMAGE)
        .arg("--engine")
        .arg("fixture")
        .arg("--fixture-response")
        .arg("tests/fixtures/vision/empty_response.json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let records = parse_jsonl(&output.stdout);
    assert_eq!(records[0]["raw_text"], "");
    assert_eq!(records[0]["cleaned_text"], "");
    assert_eq!(records[0]["confidence"], 0.0);
    assert_eq!(records[0]["confidence_source"], "none");
}

#[test]
fn test_ocr_service_error() {
    let output = cmd()
        .arg("ocr")
        .arg(GRAVITY_IMAGE)
        .arg("--engine")
        .arg("fixture")
        .arg("--fixture-response")
        .arg("tests/fixtures/vision/error_response.json")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let records = parse_jsonl(&output.stdout);
    assert_eq!(records.len(), 1);
    let errors = records[0]["errors"].as_array().unwrap();
    assert!(
        errors[0]
            .as_str()
            .unwrap()
            .contains("Google Vision API Error: Bad image data.")
    );
}

#[test]
fn test_ocr_allowed_failure_rate() {
    cmd()
        .arg("ocr")
        .arg(GRAVITY_IMAGE)
        .arg("--engine")
        .arg("fixture")
        .arg("--fixture-response")
        .arg("tests/fixtures/vision/error_response.json")
        .arg("--allowed-failure-rate")
        .arg("1.0")
        .assert()
        .success();
}

#[test]
fn test_ocr_rejects_non_images() {
    cmd()
        .arg("ocr")
        .arg("tests/fixtures/texts/worksheet.txt")
        .arg("--engine")
        .arg("fixture")
        .arg("--fixture-response")
        .arg(GRAVITY_RESPONSE)
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown file type"));
}

#[test]
fn test_ocr_fixture_requires_response() {
    cmd()
        .arg("ocr")
        .arg(GRAVITY_IMAGE)
        .arg("--engine")
        .arg("fixture")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--fixture-response"));
}

#[test]
fn test_ocr_no_spell_check_scores_garbage_low() {
    let output = cmd()
        .arg("ocr")
        .arg(GRAVITY_IMAGE)
        .arg("--engine")
        .arg("fixture")
        .arg("--fixture-response")
        .arg("tests/fixtures/vision/garbage_response.json")
        .arg("--no-spell-check")
        .output()
        .unwrap();
    assert!(output.status.success());
    let records = parse_jsonl(&output.stdout);
    assert_eq!(records[0]["cleaned_text"], "zzqx qwrtp blorf");
    assert_eq!(records[0]["confidence_source"], "proxy");
    assert_eq!(records[0]["confidence"], 0.0);
}

#[test]
fn test_ocr_with_config_file() {
    let output = cmd()
        .arg("ocr")
        .arg(GRAVITY_IMAGE)
        .arg("--engine")
        .arg("fixture")
        .arg("--fixture-response")
        .arg(GRAVITY_RESPONSE)
        .arg("--config")
        .arg("tests/fixtures/cleaner.toml")
        .output()
        .unwrap();
    assert!(output.status.success());
    let records = parse_jsonl(&output.stdout);
    assert_eq!(
        records[0]["cleaned_text"],
        "Gravity pulls objects down.\nGravity pulls objects down."
    );
}

#[test]
fn test_schema() {
    for schema_type in ["OcrInput", "OcrOutput", "CleanerConfig"] {
        cmd()
            .arg("schema")
            .arg(schema_type)
            .assert()
            .success()
            .stdout(predicate::str::contains(schema_type));
    }
}

#[test]
#[ignore = "Needs GOOGLE_VISION_API_KEY or GOOGLE_OAUTH_ACCESS_TOKEN"]
fn test_ocr_google() {
    cmd()
        .arg("ocr")
        .arg(GRAVITY_IMAGE)
        .assert()
        .success();
}
