#![allow(missing_docs)]
#![cfg(unix)]

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;
use verso::access::{Database, NodeRead};
use verso::admin::verify;
use verso::storage::BEACON_LEN;

fn setup_db(name: &str, extra: &[&str]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("db");
    cargo_bin_cmd!("verso")
        .arg("create")
        .arg(&db_path)
        .assert()
        .success();
    cargo_bin_cmd!("verso")
        .arg("create-resource")
        .arg(&db_path)
        .arg(name)
        .args(extra)
        .assert()
        .success();
    (dir, db_path)
}

fn seed(db_path: &Path, resource: &str) -> verso::Result<()> {
    let db = Database::open(db_path)?;
    let session = db.open_session(resource)?;
    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("catalog")?;
    wtx.insert_attribute("lang", "en")?;
    wtx.move_to_parent()?;
    wtx.insert_element_as_first_child("book")?;
    wtx.insert_text_as_first_child("Dune")?;
    wtx.commit()?;
    wtx.move_to_parent()?;
    wtx.insert_element_as_right_sibling("book")?;
    wtx.commit()?;
    wtx.close()
}

fn json_of(args: &[&str], db_path: &Path, resource: &str) -> Value {
    let output = cargo_bin_cmd!("verso")
        .args(["--format", "json"])
        .args(args)
        .arg(db_path)
        .arg(resource)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn create_refuses_a_non_empty_directory() {
    let (_dir, db_path) = setup_db("doc", &[]);
    cargo_bin_cmd!("verso")
        .arg("create")
        .arg(&db_path)
        .assert()
        .failure()
        .code(1);
    cargo_bin_cmd!("verso")
        .arg("create-resource")
        .arg(&db_path)
        .arg("doc")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn stats_emits_json() {
    let (_dir, db_path) = setup_db("doc", &["--storage", "kv", "--window", "3"]);
    seed(&db_path, "doc").expect("seed");
    let json = json_of(&["stats"], &db_path, "doc");
    assert_eq!(json["resource"], "doc");
    assert_eq!(json["storage"]["kind"], "kv");
    assert_eq!(json["storage"]["window"], 3);
    assert_eq!(json["storage"]["encrypted"], false);
    assert_eq!(json["revisions"]["count"], 3);
    assert_eq!(json["revisions"]["most_recent"], 2);
    assert_eq!(json["revisions"]["max_node_key"], 5);
    assert_eq!(json["names"]["elements"], 2);
    assert_eq!(json["names"]["attributes"], 1);
    assert!(json["storage"]["size_bytes"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn revisions_lists_every_commit() {
    let (_dir, db_path) = setup_db("doc", &["--versioning", "full"]);
    seed(&db_path, "doc").expect("seed");
    let json = json_of(&["revisions"], &db_path, "doc");
    let revisions = json.as_array().expect("array");
    let numbers: Vec<u64> = revisions
        .iter()
        .map(|r| r["revision"].as_u64().unwrap_or(u64::MAX))
        .collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert_eq!(revisions[0]["max_node_key"], 0);
    assert_eq!(revisions[2]["max_node_key"], 5);

    let text = cargo_bin_cmd!("verso")
        .arg("revisions")
        .arg(&db_path)
        .arg("doc")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(text).expect("utf8");
    assert_eq!(text.lines().count(), 3);
    assert!(text.starts_with("revision 0 "));
}

#[test]
fn verify_succeeds_on_a_healthy_resource() {
    let (_dir, db_path) = setup_db("doc", &["--encrypt"]);
    seed(&db_path, "doc").expect("seed");
    let json = json_of(&["verify"], &db_path, "doc");
    assert_eq!(json["success"], true);
    assert_eq!(json["counts"]["revisions"], 3);
    assert_eq!(json["counts"]["live_nodes"], 6);
    assert!(json["findings"].as_array().is_some_and(Vec::is_empty));

    let db = Database::open(&db_path).expect("reopen");
    let mut rtx = db
        .open_session("doc")
        .and_then(|s| s.begin_read_trx(None))
        .expect("read trx");
    assert!(rtx.move_to_first_child().expect("move"));
    assert_eq!(rtx.name().as_deref(), Some("catalog"));
}

#[test]
fn verify_reports_a_damaged_record() {
    let (_dir, db_path) = setup_db("doc", &["--no-compression"]);
    let data = db_path.join("resources/doc/data/resource.data");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&data)
        .expect("open data file");
    let mut byte = [0u8; 1];
    file.read_exact_at(&mut byte, BEACON_LEN + 5).expect("read");
    byte[0] ^= 0xff;
    file.write_all_at(&byte, BEACON_LEN + 5).expect("write");
    drop(file);

    let output = cargo_bin_cmd!("verso")
        .args(["--format", "json", "verify"])
        .arg(&db_path)
        .arg("doc")
        .assert()
        .failure()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["success"], false);
    assert_eq!(json["findings"][0]["severity"], "error");
}

#[test]
fn verify_walks_pages_shared_by_revisions_once() {
    let (_dir, db_path) = setup_db("doc", &["--no-compression"]);
    seed(&db_path, "doc").expect("seed");
    let shared = {
        let db = Database::open(&db_path).expect("open");
        let session = db.open_session("doc").expect("session");
        let mut wtx = session.begin_write_trx().expect("write trx");
        assert!(wtx.move_to_first_child().expect("catalog"));
        assert!(wtx.move_to_first_child().expect("book"));
        assert!(wtx.move_to_first_child().expect("text"));
        wtx.set_value("Dune Messiah").expect("set value");
        assert_eq!(wtx.commit().expect("commit"), 3);
        wtx.close().expect("close");

        let paths_of = |revision| {
            session
                .begin_page_read_trx(Some(revision))
                .expect("read trx")
                .path_summary_page()
                .indirect()
                .key()
                .expect("persisted path tree")
        };
        assert_eq!(paths_of(2), paths_of(3));
        paths_of(3)
    };

    let data = db_path.join("resources/doc/data/resource.data");
    let file = OpenOptions::new()
        .write(true)
        .open(&data)
        .expect("open data file");
    file.write_all_at(&[0xff; 4], shared).expect("write");
    drop(file);

    let report = verify(&db_path, "doc").expect("verify");
    assert!(!report.success);
    assert_eq!(report.counts.revisions, 4);
    let needle = format!("indirect page {shared}:");
    let hits = report
        .findings
        .iter()
        .filter(|finding| finding.message.contains(&needle))
        .count();
    assert_eq!(hits, 1, "findings: {:?}", report.findings);
}

#[test]
fn commands_fail_while_another_process_holds_the_database() {
    let (_dir, db_path) = setup_db("doc", &[]);
    let held = Database::open(&db_path).expect("open");
    let output = cargo_bin_cmd!("verso")
        .arg("stats")
        .arg(&db_path)
        .arg("doc")
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("locked"), "stderr: {stderr}");
    drop(held);
    cargo_bin_cmd!("verso")
        .arg("stats")
        .arg(&db_path)
        .arg("doc")
        .assert()
        .success();
}

#[test]
fn missing_database_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("verso")
        .arg("stats")
        .arg(dir.path().join("nowhere"))
        .arg("doc")
        .assert()
        .failure()
        .code(1);
}
