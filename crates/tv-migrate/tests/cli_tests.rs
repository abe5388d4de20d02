use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn tv_migrate() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("tv-migrate").unwrap()
}

fn write_pg_cfg(path: &Path, aes_key: &str) {
    fs::write(
        path,
        serde_json::json!({
            "host": "localhost",
            "port": "5432",
            "user": "traffic_vault",
            "password": "twelve",
            "sslmode": "disable",
            "database": "traffic_vault",
            "aesKey": aes_key,
        })
        .to_string(),
    )
    .unwrap();
}

#[test]
fn help_lists_flags() {
    tv_migrate()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--fromType"))
        .stdout(predicate::str::contains("--dumpDir"))
        .stdout(predicate::str::contains("--requireValid"));
}

#[test]
fn unknown_from_type_fails() {
    tv_migrate()
        .args(["-t", "Vault", "-d"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown fromType Vault"))
        .stderr(predicate::str::contains("Riak|PG"));
}

#[test]
fn unknown_log_level_fails() {
    tv_migrate()
        .args(["-e", "verbose", "-d"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown logLevel verbose"));
}

#[test]
fn missing_source_config_fails() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("riak.json");
    tv_migrate()
        .arg("-f")
        .arg(&missing)
        .arg("-d")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unable to read fromSrv cfg"));
}

#[test]
fn short_aes_key_fails_before_connecting() {
    let dir = tempdir().unwrap();
    let dump = dir.path().join("dump");
    fs::create_dir_all(&dump).unwrap();
    let pg_cfg = dir.path().join("pg.json");
    write_pg_cfg(&pg_cfg, "c2hvcnQ=");
    tv_migrate()
        .arg("-i")
        .arg(&dump)
        .arg("-g")
        .arg(&pg_cfg)
        .arg("-m")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unable to validate PG AESKey"));
}

#[test]
fn dump_and_fill_conflict() {
    let dir = tempdir().unwrap();
    tv_migrate()
        .arg("-d")
        .arg("-i")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn log_cfg_and_log_level_conflict() {
    tv_migrate()
        .args(["-l", "log.json", "-e", "info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn missing_log_cfg_fails() {
    let dir = tempdir().unwrap();
    tv_migrate()
        .arg("-l")
        .arg(dir.path().join("log.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unable to read config file"));
}
