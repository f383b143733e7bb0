#![allow(missing_docs)]

mod fixture;

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use fixture::Fixture;
use serde_json::Value;
use sombra_ask::query::{Comparator, DataItem, Description, PropertyRef};

fn write_query(fx: &Fixture, description: &Description) -> PathBuf {
    let path = fx.dir.path().join("query.json");
    fs::write(&path, serde_json::to_string(description).expect("serialize")).expect("write query");
    path
}

fn large_cities() -> Description {
    Description::some_property(
        PropertyRef::new("Population"),
        Description::value(DataItem::Number(2_000_000.0), Comparator::Geq),
    )
}

#[test]
fn query_emits_json_results() {
    let fx = Fixture::new();
    let query = write_query(&fx, &large_cities());

    let output = cargo_bin_cmd!("sombra-ask")
        .args(["--format", "json", "query"])
        .arg(&fx.path)
        .arg(&query)
        .args(["--property", "Population=_num", "--sort", ":asc"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["outcome"]["mode"], "instances");
    let rows = json["outcome"]["result"]["rows"].as_array().expect("rows");
    let titles: Vec<&str> = rows
        .iter()
        .filter_map(|row| row["entity"]["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Berlin", "Paris"]);
    assert_eq!(json["issues"].as_array().map(Vec::len), Some(0));
}

#[test]
fn profile_counters_are_reported_when_enabled() {
    let fx = Fixture::new();
    let query = write_query(&fx, &large_cities());
    let run = |profile: bool| {
        let mut cmd = cargo_bin_cmd!("sombra-ask");
        if profile {
            cmd.env("SOMBRA_ASK_PROFILE", "1");
        } else {
            cmd.env_remove("SOMBRA_ASK_PROFILE");
        }
        let output = cmd
            .args(["--format", "json", "query"])
            .arg(&fx.path)
            .arg(&query)
            .args(["--property", "Population=_num"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice::<Value>(&output).expect("valid json")
    };

    let profiled = run(true);
    assert_eq!(profiled["profile"]["compile_count"], 1);
    assert_eq!(profiled["profile"]["select_count"], 1);
    assert!(run(false).get("profile").is_none());
}

#[test]
fn count_mode_prints_number() {
    let fx = Fixture::new();
    let query = write_query(&fx, &large_cities());

    let output = cargo_bin_cmd!("sombra-ask")
        .arg("query")
        .arg(&fx.path)
        .arg(&query)
        .args(["--property", "Population=_num", "--mode", "count"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(String::from_utf8_lossy(&output).trim(), "2");
}

#[test]
fn debug_mode_prints_statement() {
    let fx = Fixture::new();
    let query = write_query(&fx, &large_cities());

    let output = cargo_bin_cmd!("sombra-ask")
        .arg("query")
        .arg(&fx.path)
        .arg(&query)
        .args(["--property", "Population=_num", "--mode", "debug"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("Condition: [[Population::≥2000000]]"), "{text}");
    assert!(text.contains("SQL: SELECT DISTINCT"), "{text}");
}

#[test]
fn config_file_limits_results() {
    let fx = Fixture::new();
    let query = write_query(&fx, &large_cities());
    let config = fx.dir.path().join("ask.toml");
    fs::write(&config, "max_limit = 1\n").expect("write config");

    let output = cargo_bin_cmd!("sombra-ask")
        .args(["--format", "json", "query"])
        .arg(&fx.path)
        .arg(&query)
        .arg("--config")
        .arg(&config)
        .args(["--property", "Population=_num"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let result = &json["outcome"]["result"];
    assert_eq!(result["rows"].as_array().map(Vec::len), Some(1));
    assert_eq!(result["has_further_results"], true);
}

#[test]
fn describe_reports_cost() {
    let fx = Fixture::new();
    let query = write_query(&fx, &large_cities());

    let output = cargo_bin_cmd!("sombra-ask")
        .args(["--format", "json", "describe"])
        .arg(&query)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["size"], 2);
    assert_eq!(json["depth"], 1);
    assert_eq!(json["features"], serde_json::json!(["property"]));
    assert_eq!(json["allowed"], true);
}

#[test]
fn missing_database_fails() {
    let fx = Fixture::new();
    let query = write_query(&fx, &large_cities());

    cargo_bin_cmd!("sombra-ask")
        .arg("query")
        .arg(fx.dir.path().join("absent.db"))
        .arg(&query)
        .assert()
        .failure();
}

#[test]
fn malformed_property_declaration_fails() {
    let fx = Fixture::new();
    let query = write_query(&fx, &large_cities());

    cargo_bin_cmd!("sombra-ask")
        .arg("query")
        .arg(&fx.path)
        .arg(&query)
        .args(["--property", "Population"])
        .assert()
        .failure();
}
