// Copyright 2025 Cornell University
// released under MIT License

use std::io::Write;
use std::process::{Command, Output};

fn acm_synth(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_acm-synth"))
        .args(args)
        .args(["--color", "never"])
        .output()
        .expect("failed to run acm-synth")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn rrbb_prints_state_graph() {
    let out = acm_synth(&["--rrbb", "2"]);
    assert!(out.status.success());
    let text = stdout(&out);
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("# Generated by acm-synth"));
    assert!(lines[1].ends_with("--rrbb 2 --color never"));
    assert_eq!(lines[2], "# 12 states -- 20 arcs");
    assert_eq!(lines[3], ".model ACM");
    assert!(lines.contains(&"s0 writer.wrCH_1 s1"));
    assert_eq!(lines.last(), Some(&".end # end state graph"));
}

#[test]
fn policy_flags_are_exclusive() {
    let out = acm_synth(&["--rrbb", "2", "--owbb", "2"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(out.stdout.is_empty());
}

#[test]
fn one_cell_is_a_usage_error() {
    for flag in ["--rrbb", "--owbb", "--owrrbb"] {
        let out = acm_synth(&[flag, "1"]);
        assert_eq!(out.status.code(), Some(2), "{flag}");
        assert!(out.stdout.is_empty());
    }
}

#[test]
fn model_is_required() {
    let out = acm_synth(&[]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn policy_by_code() {
    let out = acm_synth(&["--policy", "100", "--cells", "2"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("# 192 states -- 360 arcs"));
}

#[test]
fn unknown_policy_code_exits_with_30() {
    let out = acm_synth(&["--policy", "103", "--cells", "2"]);
    assert_eq!(out.status.code(), Some(30));
    assert!(out.stdout.is_empty());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("unknown channel policy code 103"));
}

#[test]
fn unknown_policy_in_system_file_exits_with_30() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "channel CH : mailbox(2);\n\
         process w {{ states s; s -> s : write(CH); }}\n\
         process r {{ states s; s -> s : read(CH); }}"
    )
    .unwrap();
    let path = file.path().to_str().unwrap();
    let out = acm_synth(&["--system", path]);
    assert_eq!(out.status.code(), Some(30));
    assert!(out.stdout.is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown channel policy `mailbox`"));
}

#[test]
fn syntax_error_in_system_file_exits_with_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "channel CH signal(2);").unwrap();
    let out = acm_synth(&["--system", file.path().to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
}

#[test]
fn missing_system_file_exits_with_1() {
    let out = acm_synth(&["--system", "tests/systems/does_not_exist.acm"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn system_file_with_channel_selection() {
    let out = acm_synth(&[
        "--system",
        "tests/systems/pipeline.acm",
        "--channel",
        "CH",
    ]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("# 30 states -- 54 arcs"));

    let out = acm_synth(&["--system", "tests/systems/pipeline.acm", "--channel", "DATA"]);
    assert_eq!(out.status.code(), Some(30));
}

#[test]
fn simulation_prints_a_reproducible_trace() {
    let args = ["--system", "tests/systems/pipeline.acm", "--sim", "25", "--seed", "4"];
    let first = acm_synth(&args);
    let second = acm_synth(&args);
    assert!(first.status.success());
    let trace = stdout(&first);
    assert_eq!(trace.lines().count(), 25);
    assert!(trace
        .lines()
        .all(|l| l.starts_with("producer.") || l.starts_with("consumer.")));
    assert_eq!(trace, stdout(&second));
}
