//! Tests for change-set commitment against a scripted fake policy service.

use crate::api::{
    ApiCertificate, CertificateUpdate, Computer, FileInstance, FileInstanceUpdate, FileRule,
    PolicyApi, STATE_APPROVED, STATE_BANNED, STATE_UNAPPROVED,
};
use crate::change_set::{ChangeSetCommitter, CommitChangesHandler};
use async_trait::async_trait;
use chrono::Utc;
use quorum_api::store::{fetch_typed, store_typed, EntityStore};
use quorum_store::MemoryStore;
use quorum_test_utils::fixtures;
use quorum_test_utils::RecordingQueue;
use quorum_types::config::HostHealthConfig;
use quorum_types::error::{ApiError, CommitError};
use quorum_types::keys;
use quorum_types::model::{Blockable, Rule, RuleChangeSet, RuleKind, RulePolicy};
use quorum_types::queues::COMMIT_CHANGES_QUEUE;
use quorum_types::time::now_micros;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    FindInstances { computer_id: i64, file_catalog_id: i64 },
    SetInstanceState(FileInstanceUpdate),
    GetComputer(i64),
    CreateFileRule(FileRule),
    FindCertificate(String),
    SetCertificateState(CertificateUpdate),
}

#[derive(Default)]
struct FakeState {
    instances: HashMap<(i64, i64), Vec<FileInstance>>,
    computers: HashMap<i64, Computer>,
    certificates: HashMap<String, ApiCertificate>,
    calls: Vec<Call>,
}

/// A scripted stand-in for the external policy service, recording every call.
#[derive(Default)]
struct FakePolicyApi {
    state: Mutex<FakeState>,
}

impl FakePolicyApi {
    fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn add_instance(&self, instance: FileInstance) {
        self.state
            .lock()
            .unwrap()
            .instances
            .entry((instance.computer_id, instance.file_catalog_id))
            .or_default()
            .push(instance);
    }

    fn add_computer(&self, computer: Computer) {
        self.state.lock().unwrap().computers.insert(computer.id, computer);
    }

    fn add_certificate(&self, cert: ApiCertificate) {
        self.state
            .lock()
            .unwrap()
            .certificates
            .insert(cert.thumbprint.clone(), cert);
    }
}

#[async_trait]
impl PolicyApi for FakePolicyApi {
    async fn find_file_instances(
        &self,
        computer_id: i64,
        file_catalog_id: i64,
    ) -> Result<Vec<FileInstance>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::FindInstances {
            computer_id,
            file_catalog_id,
        });
        Ok(state
            .instances
            .get(&(computer_id, file_catalog_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_file_instance_state(
        &self,
        update: FileInstanceUpdate,
    ) -> Result<FileInstance, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SetInstanceState(update.clone()));
        Ok(FileInstance {
            id: update.id,
            file_catalog_id: update.file_catalog_id,
            computer_id: update.computer_id,
            local_state: update.local_state,
        })
    }

    async fn get_computer(&self, computer_id: i64) -> Result<Option<Computer>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetComputer(computer_id));
        Ok(state.computers.get(&computer_id).cloned())
    }

    async fn create_file_rule(&self, rule: FileRule) -> Result<FileRule, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CreateFileRule(rule.clone()));
        Ok(rule)
    }

    async fn find_certificate(
        &self,
        thumbprint: &str,
    ) -> Result<Option<ApiCertificate>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::FindCertificate(thumbprint.to_string()));
        Ok(state.certificates.get(thumbprint).cloned())
    }

    async fn set_certificate_state(
        &self,
        update: CertificateUpdate,
    ) -> Result<ApiCertificate, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SetCertificateState(update.clone()));
        Ok(ApiCertificate {
            id: update.id,
            thumbprint: update.thumbprint.clone(),
            certificate_state: update.certificate_state,
        })
    }
}

struct Setup {
    store: Arc<MemoryStore>,
    tasks: Arc<RecordingQueue>,
    api: Arc<FakePolicyApi>,
    committer: ChangeSetCommitter,
}

fn setup() -> Setup {
    let store = Arc::new(fixtures::store());
    let tasks = Arc::new(RecordingQueue::new());
    let api = Arc::new(FakePolicyApi::default());
    let committer = ChangeSetCommitter::new(
        store.clone(),
        tasks.clone(),
        api.clone(),
        HostHealthConfig::default(),
    );
    Setup {
        store,
        tasks,
        api,
        committer,
    }
}

const BINARY: &str = "aabbccdd00112233aabbccdd00112233aabbccdd00112233aabbccdd00112233";
const CERT: &str = "1a2b3c4d5e6f";

fn seed_binary(store: &MemoryStore) -> Blockable {
    let binary = fixtures::windows_binary(BINARY, "1234");
    fixtures::seed_blockable(store, &binary);
    binary
}

fn seed_rule(store: &dyn EntityStore, blockable_id: &str, id: &str, host_id: &str) -> Rule {
    let now = now_micros();
    let rule = Rule {
        id: id.to_string(),
        kind: RuleKind::Binary,
        policy: RulePolicy::Allow,
        in_effect: true,
        host_id: host_id.to_string(),
        user_id: None,
        is_committed: false,
        is_fulfilled: None,
        created_at: now,
        updated_at: now,
    };
    store_typed(store, &keys::rule_key(blockable_id, id), &rule).unwrap();
    rule
}

fn seed_change(
    store: &dyn EntityStore,
    blockable_id: &str,
    id: &str,
    rule_ids: &[&str],
    change_type: RulePolicy,
) -> RuleChangeSet {
    let change = RuleChangeSet {
        id: id.to_string(),
        rule_ids: rule_ids.iter().map(|r| r.to_string()).collect(),
        change_type,
        created_at: now_micros(),
    };
    store_typed(store, &keys::change_set_key(blockable_id, id), &change).unwrap();
    change
}

fn get_rule(store: &dyn EntityStore, blockable_id: &str, id: &str) -> Rule {
    fetch_typed(store, &keys::rule_key(blockable_id, id))
        .unwrap()
        .unwrap()
}

fn change_exists(store: &dyn EntityStore, blockable_id: &str, id: &str) -> bool {
    fetch_typed::<RuleChangeSet>(store, &keys::change_set_key(blockable_id, id))
        .unwrap()
        .is_some()
}

fn healthy_computer(id: i64) -> Computer {
    Computer {
        id,
        last_poll_date: Some(Utc::now()),
        sync_percent: Some(100.0),
    }
}

#[tokio::test]
async fn local_allow_with_present_instance_is_fulfilled() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-local", "5678");
    seed_change(s.store.as_ref(), BINARY, "c1", &["r-local"], RulePolicy::Allow);
    s.api.add_instance(FileInstance {
        id: 9012,
        file_catalog_id: 1234,
        computer_id: 5678,
        local_state: STATE_UNAPPROVED,
    });

    s.committer.commit_blockable_changes(BINARY).await.unwrap();

    assert_eq!(
        s.api.calls(),
        vec![
            Call::FindInstances {
                computer_id: 5678,
                file_catalog_id: 1234
            },
            Call::SetInstanceState(FileInstanceUpdate {
                id: 9012,
                local_state: STATE_APPROVED,
                file_catalog_id: 1234,
                computer_id: 5678
            }),
        ]
    );
    let rule = get_rule(s.store.as_ref(), BINARY, "r-local");
    assert_eq!(rule.is_fulfilled, Some(true));
    assert!(rule.is_committed);
    assert!(!change_exists(s.store.as_ref(), BINARY, "c1"));
}

#[tokio::test]
async fn local_allow_absent_on_healthy_endpoint_commits_unfulfilled() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-local", "5678");
    seed_change(s.store.as_ref(), BINARY, "c1", &["r-local"], RulePolicy::Allow);
    s.api.add_computer(healthy_computer(5678));

    s.committer.commit_blockable_changes(BINARY).await.unwrap();

    let rule = get_rule(s.store.as_ref(), BINARY, "r-local");
    assert_eq!(rule.is_fulfilled, Some(false));
    assert!(rule.is_committed);
    assert!(!change_exists(s.store.as_ref(), BINARY, "c1"));
}

#[tokio::test]
async fn local_allow_absent_on_unhealthy_endpoint_is_retried() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-local", "5678");
    seed_change(s.store.as_ref(), BINARY, "c1", &["r-local"], RulePolicy::Allow);
    s.api.add_computer(Computer {
        id: 5678,
        last_poll_date: Some(Utc::now() - chrono::Duration::days(3)),
        sync_percent: Some(20.0),
    });

    let err = s.committer.commit_blockable_changes(BINARY).await;
    assert!(matches!(
        err,
        Err(CommitError::Api(ApiError::Transient { .. }))
    ));

    // Unclaimed: nothing marked committed, the change set survives.
    let rule = get_rule(s.store.as_ref(), BINARY, "r-local");
    assert!(!rule.is_committed);
    assert_eq!(rule.is_fulfilled, None);
    assert!(change_exists(s.store.as_ref(), BINARY, "c1"));
}

#[tokio::test]
async fn local_certificate_rule_commits_without_api_calls() {
    let s = setup();
    let cert = fixtures::certificate(CERT, quorum_types::model::Platform::Windows);
    fixtures::seed_blockable(&s.store, &cert);
    seed_rule(s.store.as_ref(), CERT, "r-local", "5678");
    seed_change(s.store.as_ref(), CERT, "c1", &["r-local"], RulePolicy::Allow);

    s.committer.commit_blockable_changes(CERT).await.unwrap();

    assert!(s.api.calls().is_empty());
    let rule = get_rule(s.store.as_ref(), CERT, "r-local");
    assert_eq!(rule.is_fulfilled, Some(false));
    assert!(rule.is_committed);
    assert!(!change_exists(s.store.as_ref(), CERT, "c1"));
}

#[tokio::test]
async fn global_allow_posts_a_file_rule() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-global", "");
    seed_change(s.store.as_ref(), BINARY, "c1", &["r-global"], RulePolicy::Allow);

    s.committer.commit_blockable_changes(BINARY).await.unwrap();

    assert_eq!(
        s.api.calls(),
        vec![Call::CreateFileRule(FileRule {
            file_catalog_id: 1234,
            file_state: Some(STATE_APPROVED),
            force_installer: None,
            force_not_installer: None,
        })]
    );
    assert!(get_rule(s.store.as_ref(), BINARY, "r-global").is_committed);
    assert!(!change_exists(s.store.as_ref(), BINARY, "c1"));
}

#[tokio::test]
async fn global_certificate_resolves_thumbprint_first() {
    let s = setup();
    let cert = fixtures::certificate(CERT, quorum_types::model::Platform::Windows);
    fixtures::seed_blockable(&s.store, &cert);
    seed_rule(s.store.as_ref(), CERT, "r-global", "");
    seed_change(s.store.as_ref(), CERT, "c1", &["r-global"], RulePolicy::Allow);
    s.api.add_certificate(ApiCertificate {
        id: 9012,
        thumbprint: CERT.to_string(),
        certificate_state: STATE_UNAPPROVED,
    });

    s.committer.commit_blockable_changes(CERT).await.unwrap();

    assert_eq!(
        s.api.calls(),
        vec![
            Call::FindCertificate(CERT.to_string()),
            Call::SetCertificateState(CertificateUpdate {
                id: 9012,
                thumbprint: CERT.to_string(),
                certificate_state: STATE_APPROVED,
            }),
        ]
    );
    assert!(get_rule(s.store.as_ref(), CERT, "r-global").is_committed);
}

#[tokio::test]
async fn mixed_allow_commits_locals_before_globals() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-a", "5678");
    seed_rule(s.store.as_ref(), BINARY, "r-b", "9012");
    seed_rule(s.store.as_ref(), BINARY, "r-g", "");
    seed_change(
        s.store.as_ref(),
        BINARY,
        "c1",
        &["r-a", "r-b", "r-g"],
        RulePolicy::Allow,
    );
    s.api.add_instance(FileInstance {
        id: 1,
        file_catalog_id: 1234,
        computer_id: 5678,
        local_state: STATE_UNAPPROVED,
    });
    s.api.add_instance(FileInstance {
        id: 2,
        file_catalog_id: 1234,
        computer_id: 9012,
        local_state: STATE_UNAPPROVED,
    });

    s.committer.commit_blockable_changes(BINARY).await.unwrap();

    let calls = s.api.calls();
    let global_pos = calls
        .iter()
        .position(|c| matches!(c, Call::CreateFileRule(_)))
        .unwrap();
    assert_eq!(global_pos, calls.len() - 1, "global must commit last");
    assert!(get_rule(s.store.as_ref(), BINARY, "r-a").is_committed);
    assert!(get_rule(s.store.as_ref(), BINARY, "r-b").is_committed);
    assert!(get_rule(s.store.as_ref(), BINARY, "r-g").is_committed);
    assert!(!change_exists(s.store.as_ref(), BINARY, "c1"));
}

#[tokio::test]
async fn deny_with_single_global_rule_bans() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-g", "");
    seed_change(s.store.as_ref(), BINARY, "c1", &["r-g"], RulePolicy::Deny);

    s.committer.commit_blockable_changes(BINARY).await.unwrap();

    assert_eq!(
        s.api.calls(),
        vec![Call::CreateFileRule(FileRule {
            file_catalog_id: 1234,
            file_state: Some(STATE_BANNED),
            force_installer: None,
            force_not_installer: None,
        })]
    );
}

#[tokio::test]
async fn deny_with_multiple_rules_is_a_permanent_failure() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-1", "");
    seed_rule(s.store.as_ref(), BINARY, "r-2", "");
    seed_change(
        s.store.as_ref(),
        BINARY,
        "c1",
        &["r-1", "r-2"],
        RulePolicy::Deny,
    );

    let err = s.committer.commit_blockable_changes(BINARY).await;
    assert!(matches!(err, Err(CommitError::Malformed(_))));
    assert!(s.api.calls().is_empty());
}

#[tokio::test]
async fn deny_with_a_local_rule_is_a_permanent_failure() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-local", "5678");
    seed_rule(s.store.as_ref(), BINARY, "r-g", "");
    seed_change(
        s.store.as_ref(),
        BINARY,
        "c1",
        &["r-local", "r-g"],
        RulePolicy::Deny,
    );

    let err = s.committer.commit_blockable_changes(BINARY).await;
    assert!(matches!(err, Err(CommitError::Malformed(_))));
}

#[tokio::test]
async fn remove_posts_unapproved_states() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-local", "5678");
    seed_rule(s.store.as_ref(), BINARY, "r-g", "");
    seed_change(
        s.store.as_ref(),
        BINARY,
        "c1",
        &["r-local", "r-g"],
        RulePolicy::Remove,
    );
    s.api.add_instance(FileInstance {
        id: 1,
        file_catalog_id: 1234,
        computer_id: 5678,
        local_state: STATE_APPROVED,
    });

    s.committer.commit_blockable_changes(BINARY).await.unwrap();

    assert_eq!(
        s.api.calls(),
        vec![
            Call::FindInstances {
                computer_id: 5678,
                file_catalog_id: 1234
            },
            Call::SetInstanceState(FileInstanceUpdate {
                id: 1,
                local_state: STATE_UNAPPROVED,
                file_catalog_id: 1234,
                computer_id: 5678
            }),
            Call::CreateFileRule(FileRule {
                file_catalog_id: 1234,
                file_state: Some(STATE_UNAPPROVED),
                force_installer: None,
                force_not_installer: None,
            }),
        ]
    );
}

#[tokio::test]
async fn one_change_per_run_with_tail_defer() {
    let s = setup();
    seed_binary(&s.store);
    seed_rule(s.store.as_ref(), BINARY, "r-local", "5678");
    seed_rule(s.store.as_ref(), BINARY, "r-g", "");
    seed_change(s.store.as_ref(), BINARY, "c1", &["r-local"], RulePolicy::Allow);
    // Force a later created_at so ordering is deterministic.
    let mut second = seed_change(s.store.as_ref(), BINARY, "c2", &["r-g"], RulePolicy::Allow);
    second.created_at += 10;
    store_typed(
        s.store.as_ref(),
        &keys::change_set_key(BINARY, "c2"),
        &second,
    )
    .unwrap();
    s.api.add_instance(FileInstance {
        id: 1,
        file_catalog_id: 1234,
        computer_id: 5678,
        local_state: STATE_UNAPPROVED,
    });

    s.committer.commit_blockable_changes(BINARY).await.unwrap();

    // Only the older change committed; a tail-defer was queued.
    assert!(get_rule(s.store.as_ref(), BINARY, "r-local").is_committed);
    assert!(!get_rule(s.store.as_ref(), BINARY, "r-g").is_committed);
    assert!(!change_exists(s.store.as_ref(), BINARY, "c1"));
    assert!(change_exists(s.store.as_ref(), BINARY, "c2"));
    assert_eq!(s.tasks.count(COMMIT_CHANGES_QUEUE), 1);

    // Draining the queue commits the rest and stops tail-deferring.
    let committer = Arc::new(ChangeSetCommitter::new(
        s.store.clone(),
        s.tasks.clone(),
        s.api.clone(),
        HostHealthConfig::default(),
    ));
    let handler = CommitChangesHandler::new(committer);
    s.tasks.drain(COMMIT_CHANGES_QUEUE, &handler).await.unwrap();

    assert!(get_rule(s.store.as_ref(), BINARY, "r-g").is_committed);
    assert!(!change_exists(s.store.as_ref(), BINARY, "c2"));
    assert_eq!(s.tasks.count(COMMIT_CHANGES_QUEUE), 0);
}

#[tokio::test]
async fn redelivery_of_a_committed_rule_is_a_no_op() {
    let s = setup();
    seed_binary(&s.store);
    let mut rule = seed_rule(s.store.as_ref(), BINARY, "r-g", "");
    rule.is_committed = true;
    store_typed(s.store.as_ref(), &keys::rule_key(BINARY, "r-g"), &rule).unwrap();
    seed_change(s.store.as_ref(), BINARY, "c1", &["r-g"], RulePolicy::Allow);

    s.committer.commit_blockable_changes(BINARY).await.unwrap();

    // The external policy was not touched again; the change is cleaned up.
    assert!(s.api.calls().is_empty());
    assert!(!change_exists(s.store.as_ref(), BINARY, "c1"));
}

#[tokio::test]
async fn no_pending_changes_is_a_no_op() {
    let s = setup();
    seed_binary(&s.store);
    s.committer.commit_blockable_changes(BINARY).await.unwrap();
    assert!(s.api.calls().is_empty());
}
