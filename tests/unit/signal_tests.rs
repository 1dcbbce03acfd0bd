use std::sync::Arc;

use agent_relay::models::signal::{value_is_set, Producer, SignalName};
use agent_relay::persistence::db;
use agent_relay::session::SignalStore;
use agent_relay::AppError;

async fn store(project: &str) -> SignalStore {
    let db = db::connect_memory().await.expect("db");
    SignalStore::new(Arc::new(db), project)
}

#[test]
fn privilege_table() {
    use Producer::{External, Manager, Operator, Qa, Worker};

    let cases = [
        (SignalName::Completed, [true, true, true, true, true]),
        (SignalName::QaPassed, [false, true, true, true, true]),
        (SignalName::ProjectSignedOff, [false, false, true, true, false]),
        (SignalName::TriggerQa, [true, true, true, true, false]),
        (SignalName::TriggerManager, [true, true, true, true, false]),
        (SignalName::Blocker, [true, true, true, true, true]),
    ];
    for (name, expected) in cases {
        for (producer, allowed) in [Worker, Qa, Manager, Operator, External]
            .into_iter()
            .zip(expected)
        {
            assert_eq!(
                producer.may_write(name.as_str()),
                allowed,
                "{producer:?} writing {name}"
            );
        }
    }
}

#[test]
fn free_form_names_are_writable_by_anyone() {
    for producer in [Producer::Worker, Producer::External] {
        assert!(producer.may_write("DEPLOY_WINDOW"));
    }
}

#[test]
fn names_round_trip_through_their_stored_form() {
    for name in SignalName::ALL {
        assert_eq!(name.as_str().parse::<SignalName>().expect("known"), name);
    }
    assert!(matches!(
        "SHIP_IT".parse::<SignalName>(),
        Err(AppError::NotFound(_))
    ));
    assert_eq!("operator".parse::<Producer>().expect("known"), Producer::Operator);
}

#[test]
fn truthiness_of_values() {
    for set in ["true", "1", "yes", " done "] {
        assert!(value_is_set(set), "{set:?}");
    }
    for unset in ["", "  ", "false", "FALSE", "0"] {
        assert!(!value_is_set(unset), "{unset:?}");
    }
}

#[tokio::test]
async fn set_get_and_clear() {
    let signals = store("proj-1").await;

    signals
        .set("DEPLOY_WINDOW", "friday", Producer::External)
        .await
        .expect("set");
    assert_eq!(
        signals.get("DEPLOY_WINDOW").await.expect("get").as_deref(),
        Some("friday")
    );

    assert!(signals.clear("DEPLOY_WINDOW", Producer::External).await.expect("clear"));
    assert!(!signals.clear("DEPLOY_WINDOW", Producer::External).await.expect("clear"));
    assert!(signals.get("DEPLOY_WINDOW").await.expect("get").is_none());
}

#[tokio::test]
async fn false_value_is_not_raised() {
    let signals = store("proj-1").await;

    signals
        .set(SignalName::Completed.as_str(), "false", Producer::Worker)
        .await
        .expect("set");
    assert!(!signals.is_set(SignalName::Completed).await.expect("read"));

    signals
        .raise(SignalName::Completed, Producer::Worker)
        .await
        .expect("raise");
    assert!(signals.is_set(SignalName::Completed).await.expect("read"));
}

#[tokio::test]
async fn rejected_write_leaves_no_trace() {
    let signals = store("proj-1").await;

    let err = signals
        .raise(SignalName::ProjectSignedOff, Producer::External)
        .await
        .expect_err("external sign-off");
    assert!(matches!(err, AppError::Protocol(_)));
    assert!(signals.list().await.expect("list").is_empty());

    signals
        .raise(SignalName::ProjectSignedOff, Producer::Operator)
        .await
        .expect("operator sign-off");
    let err = signals
        .clear(SignalName::ProjectSignedOff.as_str(), Producer::Worker)
        .await
        .expect_err("worker clear");
    assert!(matches!(err, AppError::Protocol(_)));
    assert!(signals.is_set(SignalName::ProjectSignedOff).await.expect("read"));
}

#[tokio::test]
async fn blank_names_are_rejected() {
    let signals = store("proj-1").await;
    let err = signals.set("  ", "true", Producer::Operator).await.expect_err("blank");
    assert!(matches!(err, AppError::Protocol(_)));
}

#[tokio::test]
async fn projects_are_isolated() {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let alpha = SignalStore::new(Arc::clone(&db), "alpha");
    let beta = SignalStore::new(db, "beta");

    alpha
        .raise(SignalName::Completed, Producer::Worker)
        .await
        .expect("raise");

    assert!(alpha.is_set(SignalName::Completed).await.expect("read"));
    assert!(!beta.is_set(SignalName::Completed).await.expect("read"));
    assert_eq!(beta.project_id(), "beta");
}

#[tokio::test]
async fn import_replaces_everything_and_needs_an_operator() {
    let signals = store("proj-1").await;
    signals
        .raise(SignalName::Completed, Producer::Worker)
        .await
        .expect("raise");
    let saved = signals.list().await.expect("list");

    signals
        .raise(SignalName::QaPassed, Producer::Qa)
        .await
        .expect("raise");

    let err = signals
        .import(&saved, Producer::Manager)
        .await
        .expect_err("manager import");
    assert!(matches!(err, AppError::Protocol(_)));
    assert_eq!(signals.list().await.expect("list").len(), 2);

    signals.import(&saved, Producer::Operator).await.expect("import");
    let names: Vec<String> = signals
        .list()
        .await
        .expect("list")
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["COMPLETED".to_owned()]);
}
