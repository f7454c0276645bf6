#![allow(deprecated)]
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const TRACE: &str = "httprr trace v1\n";

fn rrtool() -> Command {
    Command::cargo_bin("rrtool").unwrap()
}

fn set_mtime(path: &Path, at: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(at)
        .unwrap();
}

fn age(path: &Path, secs: u64) {
    set_mtime(path, SystemTime::now() - Duration::from_secs(secs));
}

#[test]
fn pack_then_unpack_restores_traces() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("TestA.httprr"), TRACE).unwrap();
    fs::write(dir.path().join("nested/TestB.httprr"), TRACE).unwrap();
    fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

    rrtool()
        .args(["pack", "-r", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("compressed 2 of 2"));

    assert!(!dir.path().join("TestA.httprr").exists());
    assert!(dir.path().join("TestA.httprr.gz").exists());
    assert!(dir.path().join("nested/TestB.httprr.gz").exists());
    assert!(dir.path().join("notes.txt").exists());

    rrtool()
        .args(["unpack", "-r", "--dir"])
        .arg(dir.path())
        .assert()
        .success();

    assert_eq!(fs::read_to_string(dir.path().join("TestA.httprr")).unwrap(), TRACE);
    assert_eq!(
        fs::read_to_string(dir.path().join("nested/TestB.httprr")).unwrap(),
        TRACE
    );
    assert!(!dir.path().join("TestA.httprr.gz").exists());
}

#[test]
fn pack_without_recursion_stays_at_top_level() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested/TestB.httprr"), TRACE).unwrap();

    rrtool().args(["pack", "--dir"]).arg(dir.path()).assert().success();
    assert!(dir.path().join("nested/TestB.httprr").exists());
}

#[test]
fn unpack_reports_bad_gzip_and_continues() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("Bad.httprr.gz"), "not gzip").unwrap();
    fs::write(dir.path().join("Good.httprr"), TRACE).unwrap();
    rrtool().args(["pack", "--dir"]).arg(dir.path()).assert().success();

    rrtool()
        .args(["unpack", "--dir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("corrupt httprr trace"));

    assert!(dir.path().join("Good.httprr").exists());
    assert!(dir.path().join("Bad.httprr.gz").exists());
    assert!(!dir.path().join("Bad.httprr").exists());
}

#[test]
fn check_lists_uncompressed_traces() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("TestPlain.httprr"), TRACE).unwrap();

    rrtool()
        .args(["check", "--dir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("TestPlain.httprr"));

    rrtool().args(["pack", "--dir"]).arg(dir.path()).assert().success();
    rrtool()
        .args(["check", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("check: OK"));
}

#[test]
fn check_walks_nested_testdata() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("llms/openai/testdata");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("TestChat.httprr"), TRACE).unwrap();

    rrtool()
        .args(["check", "--dir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("TestChat.httprr"));
}

#[test]
fn clean_walks_nested_dirs_and_keeps_plain_on_tie() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("embeddings/testdata");
    fs::create_dir_all(&nested).unwrap();
    let plain = nested.join("TestTie.httprr");
    let packed = nested.join("TestTie.httprr.gz");
    fs::write(&plain, TRACE).unwrap();
    fs::write(&packed, "").unwrap();
    let at = SystemTime::now() - Duration::from_secs(60);
    set_mtime(&plain, at);
    set_mtime(&packed, at);

    rrtool().args(["clean", "--dir"]).arg(dir.path()).assert().success();
    assert!(plain.exists());
    assert!(!packed.exists());
}

#[test]
fn clean_removes_the_older_copy() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("TestBoth.httprr");
    let packed = dir.path().join("TestBoth.httprr.gz");
    fs::write(&plain, TRACE).unwrap();
    fs::write(&packed, "").unwrap();
    age(&plain, 3600);

    rrtool()
        .args(["clean", "--dry-run", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("would remove").and(predicate::str::contains("TestBoth.httprr\n")));
    assert!(plain.exists());

    rrtool().args(["clean", "--dir"]).arg(dir.path()).assert().success();
    assert!(!plain.exists());
    assert!(packed.exists());
}

fn one_record(req: &str, resp: &str) -> String {
    format!("{TRACE}{} {}\n{req}{resp}", req.len(), resp.len())
}

#[test]
fn normalize_masks_versions_in_nested_traces() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("llms/googleai/testdata");
    fs::create_dir_all(&nested).unwrap();
    let file = nested.join("TestEmbed.httprr");
    let req = "POST https://h/v1 HTTP/1.1\r\nHost: h\r\nX-Goog-Api-Client: gl-go/1.21.0\r\n\r\n";
    let resp = "HTTP/1.1 204 No Content\r\n\r\n";
    let original = one_record(req, resp);
    fs::write(&file, &original).unwrap();
    fs::write(nested.join("Broken.httprr"), "not a trace\n").unwrap();

    rrtool()
        .args(["normalize", "--dry-run", "--dir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("would update"));
    assert_eq!(fs::read_to_string(&file).unwrap(), original);

    fs::remove_file(nested.join("Broken.httprr")).unwrap();
    rrtool()
        .args(["normalize", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("updated"));
    let want = one_record(&req.replace("gl-go/1.21.0", "gl-go/X.XX.X"), resp);
    assert_eq!(fs::read_to_string(&file).unwrap(), want);

    rrtool()
        .args(["normalize", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("updated 0 file(s)"));
}

#[test]
fn missing_directory_is_fatal() {
    let dir = tempdir().unwrap();
    rrtool()
        .args(["pack", "--dir"])
        .arg(dir.path().join("absent"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("fatal"));
}
