use assert_cmd::Command;
use predicates::prelude::*;

fn task_manager() -> Command {
    Command::cargo_bin("task-manager").unwrap()
}

#[test]
fn inspect_prints_the_component_listing() {
    task_manager()
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains("task-manager: Task Management API"))
        .stdout(predicate::str::contains("api: HTTP API Server"))
        .stdout(predicate::str::contains("api-host = localhost"))
        .stdout(predicate::str::contains("provider new_task_manager"))
        .stdout(predicate::str::contains("[start] database: simulated connection"))
        .stdout(predicate::str::contains("[stop]  api: http listener"));
}

#[test]
fn flags_after_the_subcommand_are_applied() {
    task_manager()
        .args(["inspect", "--api-port", "9090"])
        .assert()
        .success()
        .stdout(predicate::str::contains("api-port = 9090"));
}

#[test]
fn dot_graph_prints_a_digraph() {
    task_manager()
        .arg("dot-graph")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph"))
        .stdout(predicate::str::contains("label = \"storage\""));
}

#[test]
fn bad_flag_values_exit_with_2() {
    task_manager()
        .args(["--api-port", "eighty", "inspect"])
        .assert()
        .code(2);
    task_manager()
        .args(["--stop-timeout", "0", "inspect"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("stop-timeout"));
}

#[test]
fn unknown_subcommands_exit_with_2() {
    task_manager().arg("explode").assert().code(2);
}
