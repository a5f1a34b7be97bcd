use std::{fs, path::Path, process::Command};

const REQUIRED: &[&str] = &[
    "imageUri=registry.example/app:1.0",
    "appSecretId=app/nextauth-secret",
    "apiKeySecretId=app/openai-key",
    "databaseUrlSecretId=app/database-url",
];

/// The binary with every `CAIRN_CONTEXT_*` variable of the test process
/// removed, so only the inputs a test passes explicitly apply. Diagnostics are
/// rendered as unwrapped plain text.
fn cairn() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cairn"));
    for (var, _) in std::env::vars() {
        if var.starts_with("CAIRN_CONTEXT_") {
            cmd.env_remove(var);
        }
    }
    cmd.env_remove("RUST_LOG").env("NO_GRAPHICS", "1");
    cmd
}

fn with_required(cmd: &mut Command, skip: &str) {
    for pair in REQUIRED.iter().filter(|pair| !pair.starts_with(skip)) {
        cmd.arg("-c").arg(pair);
    }
}

fn run(cmd: &mut Command) -> (String, String) {
    let output = cmd
        .output()
        .unwrap_or_else(|err| panic!("failed to run cairn: {err}"));
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        panic!(
            "cairn failed\nstatus: {}\nstdout:\n{stdout}\nstderr:\n{stderr}",
            output.status
        );
    }
    (stdout, stderr)
}

fn synth_to(path: &Path) {
    let mut cmd = cairn();
    cmd.arg("synth").arg("--out").arg(path);
    with_required(&mut cmd, "-");
    run(&mut cmd);
}

#[test]
fn synth_prints_the_graph_ir() {
    let mut cmd = cairn();
    cmd.arg("synth");
    with_required(&mut cmd, "-");
    let (stdout, _) = run(&mut cmd);

    let ir: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert_eq!(ir["schema"], "cairn.stack.ir");
    assert_eq!(ir["version"], 1);
    let outputs = ir["outputs"].as_object().expect("outputs object");
    let mut keys: Vec<_> = outputs.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        ["clusterId", "databaseEndpoint", "publicEndpoint", "serviceId"]
    );
    assert!(!ir["resources"].as_array().expect("resources").is_empty());
}

#[test]
fn synth_writes_dot_to_a_file() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let out = dir.path().join("stack.dot");

    let mut cmd = cairn();
    cmd.args(["synth", "--emit", "dot", "--out"]).arg(&out);
    with_required(&mut cmd, "-");
    let (stdout, _) = run(&mut cmd);

    assert!(stdout.is_empty(), "dot went to stdout: {stdout}");
    let dot = fs::read_to_string(&out).expect("failed to read dot output");
    assert!(dot.starts_with("digraph stack {"));
    assert!(dot.contains("subgraph cluster_network"));
}

#[test]
fn check_rejects_a_missing_image() {
    let mut cmd = cairn();
    cmd.arg("check");
    with_required(&mut cmd, "imageUri");
    let output = cmd.output().expect("failed to run cairn");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("imageUri"), "stderr:\n{stderr}");
}

#[test]
fn check_reports_inverted_scaling_bounds() {
    let mut cmd = cairn();
    cmd.args(["check", "-c", "minReplicas=4", "-c", "maxReplicas=2"]);
    with_required(&mut cmd, "-");
    let output = cmd.output().expect("failed to run cairn");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("compose::config::scaling_bounds"), "stderr:\n{stderr}");
}

#[test]
fn inputs_file_is_overridden_by_env_and_flags() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let inputs = dir.path().join("inputs.json");
    fs::write(
        &inputs,
        r#"{
            "image": "registry.example/app:0.9",
            "secrets": {
                "appSecret": "app/nextauth-secret",
                "apiKey": "app/openai-key",
                "databaseUrl": "app/database-url"
            },
            "network": { "zones": 1, "natGateways": 1 }
        }"#,
    )
    .expect("failed to write inputs file");
    let out = dir.path().join("stack.json");

    let mut cmd = cairn();
    cmd.env("CAIRN_CONTEXT_ZONES", "3")
        .arg("synth")
        .arg("--inputs")
        .arg(&inputs)
        .arg("--out")
        .arg(&out)
        .args(["-c", "imageUri=registry.example/app:1.0"]);
    run(&mut cmd);

    let ir: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).expect("failed to read IR"))
            .expect("IR should be JSON");
    let resources = ir["resources"].as_array().expect("resources");
    let private_subnets = resources
        .iter()
        .filter(|r| r["attributes"]["tier"]["value"] == "private")
        .count();
    assert_eq!(private_subnets, 3);
    let service = resources
        .iter()
        .find(|r| r["id"] == "service")
        .expect("service resource");
    assert_eq!(
        service["attributes"]["image"]["value"],
        "registry.example/app:1.0"
    );
}

#[test]
fn diff_against_a_prior_synth() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let prior = dir.path().join("prior.json");
    synth_to(&prior);

    let mut unchanged = cairn();
    unchanged.arg("diff").arg("--against").arg(&prior);
    with_required(&mut unchanged, "-");
    let (stdout, _) = run(&mut unchanged);
    assert_eq!(stdout, "no changes\n");

    let mut rescaled = cairn();
    rescaled
        .arg("diff")
        .arg("--against")
        .arg(&prior)
        .args(["-c", "maxReplicas=8"]);
    with_required(&mut rescaled, "-");
    let (stdout, _) = run(&mut rescaled);
    assert_eq!(stdout, "~ scaling-policy (maxCapacity)\n");
}

#[test]
fn diff_rejects_a_tampered_prior() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let prior = dir.path().join("prior.json");
    synth_to(&prior);

    let mut ir: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&prior).expect("failed to read IR"))
            .expect("IR should be JSON");
    ir["schema"] = "something.else".into();
    fs::write(&prior, ir.to_string()).expect("failed to rewrite IR");

    let mut cmd = cairn();
    cmd.arg("diff").arg("--against").arg(&prior);
    with_required(&mut cmd, "-");
    let output = cmd.output().expect("failed to run cairn");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not describe a valid graph"), "stderr:\n{stderr}");
}
