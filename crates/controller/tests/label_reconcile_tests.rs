//! End-to-end reconciliation scenarios against in-memory stores.

mod common;

use common::{labels, Harness, PolicyState};
use controller::retry::RetryConfig;
use controller::tasks::label::events::reasons;
use controller::tasks::label::status::condition_types;
use controller::tasks::label::ProtectedSet;
use controller::{Error, ReconcileOutcome, RequestKey};

fn protected() -> ProtectedSet {
    labels(&[("protected-key", "v")])
}

/// ns1 after R1 `{a: 1, protected-key: x}` and R2 `{a: 2, b: 3}`
async fn two_requests_on_ns1(h: &Harness) -> (RequestKey, RequestKey) {
    h.targets.add("ns1", labels(&[]));
    let r1 = h
        .requests
        .create("ns1", "r1", labels(&[("a", "1"), ("protected-key", "x")]));
    h.engine.reconcile(&r1).await.unwrap();

    let r2 = h.requests.create("ns1", "r2", labels(&[("a", "2"), ("b", "3")]));
    h.engine.reconcile(&r2).await.unwrap();
    (r1, r2)
}

#[tokio::test]
async fn protected_label_is_skipped_and_reported() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h
        .requests
        .create("ns1", "r1", labels(&[("a", "1"), ("protected-key", "x")]));

    let outcome = h.engine.reconcile(&r1).await.unwrap();

    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1")]));
    let status = h.requests.status(&r1).unwrap();
    assert_eq!(status.applied_labels, labels(&[("a", "1")]));
    assert_eq!(status.skipped_labels, labels(&[("protected-key", "x")]));

    let skipped = h.events.with_reason(reasons::PROTECTED_LABEL_SKIPPED);
    assert_eq!(skipped.len(), 1);
    assert!(skipped[0].note.contains("protected-key=x"));
    assert_eq!(h.events.with_reason(reasons::LABELS_APPLIED).len(), 1);

    assert!(h.requests.has_finalizer(&r1));
    assert!(matches!(outcome, ReconcileOutcome::Reconciled { .. }));
}

#[tokio::test]
async fn second_request_does_not_overwrite_existing_key() {
    let h = Harness::new(protected());
    let (_, r2) = two_requests_on_ns1(&h).await;

    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1"), ("b", "3")]));
    let status = h.requests.status(&r2).unwrap();
    assert_eq!(status.applied_labels, labels(&[("b", "3")]));
    assert_eq!(status.skipped_labels, labels(&[("a", "2")]));

    let duplicate = status
        .conditions
        .iter()
        .find(|c| c.condition_type == condition_types::DUPLICATE_LABELS)
        .unwrap();
    assert_eq!(duplicate.status, "True");

    let events = h.events.with_reason(reasons::DUPLICATE_LABEL_SKIPPED);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].object, "r2");
    assert!(events[0].note.contains("a=2"));
}

#[tokio::test]
async fn deleting_request_removes_only_its_own_labels() {
    let h = Harness::new(protected());
    let (r1, r2) = two_requests_on_ns1(&h).await;

    h.requests.delete(&r1);
    let outcome = h.engine.reconcile(&r1).await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Released {
            removed: labels(&[("a", "1")])
        }
    );
    assert_eq!(h.targets.labels("ns1"), labels(&[("b", "3")]));
    assert!(h.requests.fetch(&r1).is_none());
    assert!(h.requests.fetch(&r2).is_some());
    assert_eq!(h.engine.reconcile(&r1).await.unwrap(), ReconcileOutcome::Gone);
}

#[tokio::test]
async fn reconciling_twice_changes_nothing() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[("existing", "x")]));
    let r1 = h.requests.create(
        "ns1",
        "r1",
        labels(&[("a", "1"), ("existing", "y"), ("protected-key", "z")]),
    );

    h.engine.reconcile(&r1).await.unwrap();
    let first = h.requests.status(&r1).unwrap();
    let persists = h.targets.persist_count();
    let target = h.targets.labels("ns1");

    h.engine.reconcile(&r1).await.unwrap();
    let second = h.requests.status(&r1).unwrap();

    assert_eq!(h.targets.persist_count(), persists);
    assert_eq!(h.targets.labels("ns1"), target);
    assert_eq!(first.applied_labels, second.applied_labels);
    assert_eq!(first.skipped_labels, second.skipped_labels);
    assert_eq!(first.conditions.len(), second.conditions.len());
}

#[tokio::test]
async fn concurrent_disjoint_requests_both_land() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    let r2 = h.requests.create("ns1", "r2", labels(&[("b", "2")]));

    let (first, second) = tokio::join!(h.engine.reconcile(&r1), h.engine.reconcile(&r2));
    first.unwrap();
    second.unwrap();

    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1"), ("b", "2")]));
    assert_eq!(h.requests.status(&r1).unwrap().applied_labels, labels(&[("a", "1")]));
    assert_eq!(h.requests.status(&r2).unwrap().applied_labels, labels(&[("b", "2")]));
}

#[tokio::test]
async fn concurrent_claims_of_same_key_have_one_winner() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    let r2 = h.requests.create("ns1", "r2", labels(&[("a", "2")]));

    let (first, second) = tokio::join!(h.engine.reconcile(&r1), h.engine.reconcile(&r2));
    first.unwrap();
    second.unwrap();

    let live = h.targets.labels("ns1");
    let (winner, loser) = if live.get("a").map(String::as_str) == Some("1") {
        (r1, r2)
    } else {
        (r2, r1)
    };
    let winner_status = h.requests.status(&winner).unwrap();
    let loser_status = h.requests.status(&loser).unwrap();

    assert_eq!(winner_status.applied_labels, live);
    assert!(loser_status.applied_labels.is_empty());
    assert!(loser_status.skipped_labels.contains_key("a"));
}

#[tokio::test]
async fn injected_conflicts_are_retried() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    h.targets.inject_conflicts(3);
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));

    h.engine.reconcile(&r1).await.unwrap();
    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1")]));
}

#[tokio::test]
async fn exhausted_conflict_retries_surface_persist_failed() {
    let h = Harness::with_retry(protected(), RetryConfig::with_max_attempts(3).immediate());
    h.targets.add("ns1", labels(&[]));
    h.targets.inject_conflicts(100);
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));

    let err = h.engine.reconcile(&r1).await.unwrap_err();
    assert!(matches!(err, Error::PersistFailed { attempts: 3, .. }));
    assert!(h.targets.labels("ns1").is_empty());

    let status = h.requests.status(&r1).unwrap();
    assert!(status.applied_labels.is_empty());
    assert_eq!(status.pending_labels, labels(&[("a", "1")]));
}

#[tokio::test]
async fn missing_namespace_is_an_error_without_status() {
    let h = Harness::new(protected());
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));

    let err = h.engine.reconcile(&r1).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(h.requests.status(&r1).is_none());
    assert!(h.requests.has_finalizer(&r1));
}

#[tokio::test]
async fn unavailable_policy_applies_nothing() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));

    h.policy.set(PolicyState::Missing);
    assert!(matches!(
        h.engine.reconcile(&r1).await,
        Err(Error::ConfigMissing(_))
    ));

    h.policy.set(PolicyState::Malformed);
    assert!(matches!(
        h.engine.reconcile(&r1).await,
        Err(Error::ConfigMalformed(_))
    ));

    assert!(h.targets.labels("ns1").is_empty());
    assert_eq!(h.requests.status_writes(), 0);
}

#[tokio::test]
async fn deleting_with_namespace_gone_releases_finalizer() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    h.engine.reconcile(&r1).await.unwrap();

    h.targets.remove("ns1");
    h.requests.delete(&r1);

    let outcome = h.engine.reconcile(&r1).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Released {
            removed: labels(&[])
        }
    );
    assert!(h.requests.fetch(&r1).is_none());
}

#[tokio::test]
async fn failed_cleanup_keeps_finalizer_until_retry_succeeds() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    h.engine.reconcile(&r1).await.unwrap();

    h.requests.delete(&r1);
    h.targets.inject_failures(1);
    assert!(h.engine.reconcile(&r1).await.is_err());
    assert!(h.requests.has_finalizer(&r1));
    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1")]));

    h.engine.reconcile(&r1).await.unwrap();
    assert!(h.requests.fetch(&r1).is_none());
    assert!(h.targets.labels("ns1").is_empty());
}

#[tokio::test]
async fn cleanup_fails_closed_without_policy() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    h.engine.reconcile(&r1).await.unwrap();

    h.requests.delete(&r1);
    h.policy.set(PolicyState::Missing);
    assert!(h.engine.reconcile(&r1).await.is_err());
    assert!(h.requests.has_finalizer(&r1));
}

#[tokio::test]
async fn dropped_key_is_released_from_namespace() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1"), ("b", "2")]));
    h.engine.reconcile(&r1).await.unwrap();

    h.requests.update_spec(&r1, labels(&[("a", "1")]));
    let outcome = h.engine.reconcile(&r1).await.unwrap();

    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1")]));
    assert_eq!(h.requests.status(&r1).unwrap().applied_labels, labels(&[("a", "1")]));
    match outcome {
        ReconcileOutcome::Reconciled { released, .. } => {
            assert_eq!(released, labels(&[("b", "2")]));
        }
        other => panic!("expected Reconciled, got {other:?}"),
    }
}

#[tokio::test]
async fn owner_can_change_its_value() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    h.engine.reconcile(&r1).await.unwrap();

    h.requests.update_spec(&r1, labels(&[("a", "2")]));
    h.engine.reconcile(&r1).await.unwrap();

    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "2")]));
    assert_eq!(h.requests.status(&r1).unwrap().applied_labels, labels(&[("a", "2")]));
}

#[tokio::test]
async fn out_of_band_overwrite_is_left_alone() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    h.engine.reconcile(&r1).await.unwrap();

    h.targets.set_label("ns1", "a", "manual");
    h.engine.reconcile(&r1).await.unwrap();

    let status = h.requests.status(&r1).unwrap();
    assert!(status.applied_labels.is_empty());
    assert_eq!(status.skipped_labels, labels(&[("a", "1")]));

    h.requests.delete(&r1);
    h.engine.reconcile(&r1).await.unwrap();
    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "manual")]));
}

#[tokio::test]
async fn protected_label_already_on_namespace_survives_cleanup() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[("protected-key", "x")]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("protected-key", "x")]));
    h.engine.reconcile(&r1).await.unwrap();

    h.requests.delete(&r1);
    h.engine.reconcile(&r1).await.unwrap();

    assert_eq!(h.targets.labels("ns1"), labels(&[("protected-key", "x")]));
}

#[tokio::test]
async fn deleting_without_finalizer_is_nothing_to_release() {
    let h = Harness::new(protected());
    let mut obj = controller::NamespaceLabel::new(
        "r1",
        controller::NamespaceLabelSpec {
            labels: labels(&[("a", "1")]),
        },
    );
    obj.metadata.namespace = Some("ns1".to_string());
    obj.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
        chrono::Utc::now(),
    ));
    let key = h.requests.insert(obj);

    assert_eq!(
        h.engine.reconcile(&key).await.unwrap(),
        ReconcileOutcome::NothingToRelease
    );
}

#[tokio::test]
async fn namespace_event_lists_requests_targeting_it() {
    let h = Harness::new(protected());
    let r1 = h.requests.create("ns1", "r1", labels(&[]));
    let r2 = h.requests.create("ns1", "r2", labels(&[]));
    h.requests.create("ns2", "other", labels(&[]));

    let mut affected = h.engine.on_target_event("ns1").await.unwrap();
    affected.sort();
    assert_eq!(affected, vec![r1, r2]);
    assert!(h.engine.on_target_event("ns3").await.unwrap().is_empty());
}

#[tokio::test]
async fn replay_after_lost_status_write_keeps_ownership() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));

    // The pending-labels write lands, the final report does not
    h.requests.lose_status_write(2);
    assert!(h.engine.reconcile(&r1).await.is_err());
    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1")]));
    assert!(h.requests.status(&r1).unwrap().applied_labels.is_empty());

    let outcome = h.engine.reconcile(&r1).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Reconciled {
            applied: labels(&[("a", "1")]),
            skipped_protected: labels(&[]),
            skipped_duplicate: labels(&[]),
            released: labels(&[]),
        }
    );
    let status = h.requests.status(&r1).unwrap();
    assert_eq!(status.applied_labels, labels(&[("a", "1")]));
    assert!(status.skipped_labels.is_empty());
    assert!(status.pending_labels.is_empty());
    assert!(h.events.with_reason(reasons::DUPLICATE_LABEL_SKIPPED).is_empty());

    h.requests.delete(&r1);
    h.engine.reconcile(&r1).await.unwrap();
    assert!(h.targets.labels("ns1").is_empty());
    assert!(h.requests.fetch(&r1).is_none());
}

#[tokio::test]
async fn deleting_after_lost_status_write_removes_written_labels() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));

    h.requests.lose_status_write(2);
    assert!(h.engine.reconcile(&r1).await.is_err());

    h.requests.delete(&r1);
    let outcome = h.engine.reconcile(&r1).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Released {
            removed: labels(&[("a", "1")])
        }
    );
    assert!(h.targets.labels("ns1").is_empty());
}

#[tokio::test]
async fn deleting_request_that_never_applied_keeps_other_owners_label() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    h.engine.reconcile(&r1).await.unwrap();

    // r2 registers its finalizer, then fails before writing anything
    let r2 = h.requests.create("ns1", "r2", labels(&[("a", "1")]));
    h.policy.set(PolicyState::Missing);
    assert!(h.engine.reconcile(&r2).await.is_err());
    assert!(h.requests.has_finalizer(&r2));
    assert!(h.requests.status(&r2).is_none());

    h.policy.set(PolicyState::Loaded(protected()));
    h.requests.delete(&r2);
    let outcome = h.engine.reconcile(&r2).await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Released {
            removed: labels(&[])
        }
    );
    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1")]));
    assert_eq!(
        h.requests.status(&r1).unwrap().applied_labels,
        labels(&[("a", "1")])
    );
}

#[tokio::test]
async fn unreported_write_yields_to_recorded_owner() {
    let h = Harness::new(protected());
    h.targets.add("ns1", labels(&[]));
    let r1 = h.requests.create("ns1", "r1", labels(&[("a", "1")]));
    h.engine.reconcile(&r1).await.unwrap();

    // r2 announced the same label and stopped before reporting
    let r2 = h.requests.create("ns1", "r2", labels(&[("a", "1")]));
    h.engine.reconcile(&r2).await.unwrap();
    let mut status = h.requests.status(&r2).unwrap();
    status.pending_labels = labels(&[("a", "1")]);
    h.requests.set_status(&r2, status);

    let outcome = h.engine.reconcile(&r2).await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Reconciled { ref applied, ref skipped_duplicate, .. }
            if applied.is_empty() && skipped_duplicate == &labels(&[("a", "1")])
    ));

    let mut status = h.requests.status(&r2).unwrap();
    status.pending_labels = labels(&[("a", "1")]);
    h.requests.set_status(&r2, status);

    h.requests.delete(&r2);
    assert_eq!(
        h.engine.reconcile(&r2).await.unwrap(),
        ReconcileOutcome::Released {
            removed: labels(&[])
        }
    );
    assert_eq!(h.targets.labels("ns1"), labels(&[("a", "1")]));
}
