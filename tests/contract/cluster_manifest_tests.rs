//! Shape of the Kubernetes Job objects the cluster spawner submits.

use std::collections::BTreeMap;
use std::path::PathBuf;

use agent_relay::config::GlobalConfig;
use agent_relay::models::job::JobConfig;
use agent_relay::models::work_item::WorkItem;
use agent_relay::orchestrator::cluster::{
    build_job_manifest, job_name, parse_job_status, JobStatus, CONTAINER_STATE_DIR,
    CONTAINER_WORKSPACE,
};
use agent_relay::AppError;
use serde_json::{json, Value};

fn manifest(config: &GlobalConfig) -> Value {
    let mut item = WorkItem::new("PROJ-7", "Fix login").with_repo("https://example.com/acme/web");
    item.env.insert("JIRA_TICKET".into(), "PROJ-7".into());
    let job = JobConfig::resolve(&item, config, PathBuf::from(CONTAINER_WORKSPACE));
    build_job_manifest("relay-agent-proj-7", &job, config).expect("manifest")
}

fn env_map(manifest: &Value) -> BTreeMap<String, String> {
    manifest["spec"]["template"]["spec"]["containers"][0]["env"]
        .as_array()
        .expect("env")
        .iter()
        .map(|e| {
            (
                e["name"].as_str().expect("name").to_owned(),
                e["value"].as_str().expect("value").to_owned(),
            )
        })
        .collect()
}

#[test]
fn job_is_a_single_attempt_batch_job() {
    let config = GlobalConfig::with_state_dir(PathBuf::from("/tmp/relay"));
    let m = manifest(&config);

    assert_eq!(m["apiVersion"], "batch/v1");
    assert_eq!(m["kind"], "Job");
    assert_eq!(m["metadata"]["name"], "relay-agent-proj-7");
    assert_eq!(m["metadata"]["namespace"], "default");
    let label = m["metadata"]["labels"]["work-item"].as_str().expect("label");
    assert!(label.starts_with("proj-7-") && label.len() == "proj-7-".len() + 8, "{label}");
    assert_eq!(m["spec"]["backoffLimit"], 0);
    assert_eq!(m["spec"]["ttlSecondsAfterFinished"], 3600);
    assert_eq!(m["spec"]["template"]["spec"]["restartPolicy"], "Never");

    let container = &m["spec"]["template"]["spec"]["containers"][0];
    assert_eq!(container["name"], "agent");
    assert_eq!(container["image"], config.agent.image.as_str());
    assert_eq!(container["imagePullPolicy"], "Always");
    assert_eq!(container["args"], json!(["run"]));
    assert!(container.get("envFrom").is_none());
}

#[test]
fn container_env_carries_job_identity_and_item_env() {
    let config = GlobalConfig::with_state_dir(PathBuf::from("/tmp/relay"));
    let env = env_map(&manifest(&config));

    let job = JobConfig::from_json(&env["RELAY_JOB"]).expect("inline job");
    assert_eq!(job.work_item.id, "PROJ-7");
    assert_eq!(job.workspace, PathBuf::from(CONTAINER_WORKSPACE));

    assert_eq!(env["RELAY_STATE_DIR"], CONTAINER_STATE_DIR);
    assert_eq!(env["GIT_AUTHOR_NAME"], config.git.user_name);
    assert_eq!(env["GIT_COMMITTER_EMAIL"], config.git.user_email);
    assert_eq!(env["GIT_TERMINAL_PROMPT"], "0");
    assert_eq!(env["JIRA_TICKET"], "PROJ-7");
}

#[test]
fn secret_is_exposed_through_env_from() {
    let mut config = GlobalConfig::with_state_dir(PathBuf::from("/tmp/relay"));
    config.cluster.secret_name = Some("relay-credentials".into());
    config.cluster.namespace = "agents".into();

    let m = manifest(&config);

    assert_eq!(m["metadata"]["namespace"], "agents");
    assert_eq!(
        m["spec"]["template"]["spec"]["containers"][0]["envFrom"],
        json!([{ "secretRef": { "name": "relay-credentials" } }])
    );
}

#[test]
fn job_names_are_dns_labels() {
    assert_eq!(
        job_name(&WorkItem::new("proj-7", "x")).expect("name"),
        "relay-agent-proj-7"
    );
    let upper = job_name(&WorkItem::new("PROJ-7", "x")).expect("name");
    assert!(upper.starts_with("relay-agent-proj-7-"), "{upper}");
    assert_ne!(upper, "relay-agent-proj-7");

    let long_id = format!("{}-{}", "a".repeat(50), "b".repeat(20));
    let name = job_name(&WorkItem::new(long_id, "x")).expect("name");
    assert!(name.len() <= 63, "{name}");
    assert!(!name.ends_with('-'));
    assert!(name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));

    let tail = job_name(&WorkItem::new(format!("{}-tail", "a".repeat(50)), "x")).expect("name");
    let tale = job_name(&WorkItem::new(format!("{}-tale", "a".repeat(50)), "x")).expect("name");
    assert!(tail.len() <= 63, "{tail}");
    assert!(tail.starts_with(&format!("relay-agent-{}-", "a".repeat(42))), "{tail}");
    assert_ne!(tail, tale, "ids sharing a long prefix keep distinct names");

    assert!(matches!(
        job_name(&WorkItem::new("%%%", "x")),
        Err(AppError::Spawn(_))
    ));
}

#[test]
fn job_status_follows_the_status_counters() {
    assert_eq!(parse_job_status(&json!({})), JobStatus::Active);
    assert_eq!(
        parse_job_status(&json!({ "status": { "active": 1 } })),
        JobStatus::Active
    );
    assert_eq!(
        parse_job_status(&json!({ "status": { "succeeded": 1 } })),
        JobStatus::Succeeded
    );
    assert_eq!(
        parse_job_status(&json!({ "status": { "failed": 1, "succeeded": 0 } })),
        JobStatus::Failed
    );
}
