//! End-to-end scenarios for the ballot box, run against the in-memory store.

use crate::platform::PlatformFlavor;
use crate::voting::{score, VotingEngine};
use quorum_api::store::fetch_scan_typed;
use quorum_store::MemoryStore;
use quorum_telemetry::analytics::{AnalyticsRow, AnalyticsTable, BlockAction, MemoryAnalytics};
use quorum_test_utils::fixtures;
use quorum_test_utils::RecordingQueue;
use quorum_types::config::EngineConfig;
use quorum_types::error::{ProhibitedReason, VoteError};
use quorum_types::keys;
use quorum_types::model::{
    Blockable, BlockableState, Platform, Rule, RuleChangeSet, RulePolicy, Vote,
};
use quorum_types::queues::COMMIT_CHANGES_QUEUE;
use std::sync::Arc;

struct Env {
    store: Arc<MemoryStore>,
    tasks: Arc<RecordingQueue>,
    analytics: Arc<MemoryAnalytics>,
    engine: VotingEngine,
}

fn env() -> Env {
    env_with_flavors(PlatformFlavor::standard())
}

fn env_with_flavors(flavors: Vec<PlatformFlavor>) -> Env {
    let store = Arc::new(fixtures::store());
    let tasks = Arc::new(RecordingQueue::new());
    let analytics = Arc::new(MemoryAnalytics::new());
    let engine = VotingEngine::with_flavors(
        store.clone(),
        tasks.clone(),
        analytics.clone(),
        EngineConfig::default(),
        flavors,
    );
    Env {
        store,
        tasks,
        analytics,
        engine,
    }
}

fn blockable(env: &Env, id: &str) -> Blockable {
    quorum_api::store::fetch_typed(env.store.as_ref(), &keys::blockable_key(id))
        .unwrap()
        .unwrap()
}

fn all_votes(env: &Env, id: &str) -> Vec<(Vec<u8>, Vote)> {
    fetch_scan_typed(env.store.as_ref(), &keys::vote_prefix(id)).unwrap()
}

fn in_effect_votes(env: &Env, id: &str) -> Vec<Vote> {
    all_votes(env, id)
        .into_iter()
        .filter(|(key, _)| keys::is_in_effect_vote_key(key))
        .map(|(_, vote)| vote)
        .collect()
}

fn archived_votes(env: &Env, id: &str) -> Vec<Vote> {
    all_votes(env, id)
        .into_iter()
        .filter(|(key, _)| !keys::is_in_effect_vote_key(key))
        .map(|(_, vote)| vote)
        .collect()
}

fn in_effect_rules(env: &Env, id: &str) -> Vec<Rule> {
    fetch_scan_typed::<Rule>(env.store.as_ref(), &keys::rule_prefix(id))
        .unwrap()
        .into_iter()
        .map(|(_, rule)| rule)
        .filter(|rule| rule.in_effect)
        .collect()
}

fn change_sets(env: &Env, id: &str) -> Vec<RuleChangeSet> {
    fetch_scan_typed::<RuleChangeSet>(env.store.as_ref(), &keys::change_set_prefix(id))
        .unwrap()
        .into_iter()
        .map(|(_, change)| change)
        .collect()
}

/// Invariants that must hold after any sequence of engine operations.
fn assert_invariants(env: &Env, id: &str) {
    let blockable = blockable(env, id);
    let votes = in_effect_votes(env, id);

    // Score consistency.
    assert_eq!(
        blockable.score,
        score::tally(votes.iter()),
        "stored score must equal the tally of in-effect votes"
    );

    // Single in-effect vote per voter.
    let mut voters: Vec<&str> = votes.iter().map(|v| v.user_id.as_str()).collect();
    voters.sort_unstable();
    voters.dedup();
    assert_eq!(voters.len(), votes.len(), "one in-effect vote per voter");

    // State-rule coherence.
    let rules = in_effect_rules(env, id);
    let voting_rules: Vec<&Rule> = rules
        .iter()
        .filter(|r| !r.policy.is_installer_policy())
        .collect();
    if blockable.state == BlockableState::GloballyAllowed {
        let globals: Vec<_> = voting_rules
            .iter()
            .filter(|r| r.policy == RulePolicy::Allow && !r.is_local())
            .collect();
        assert_eq!(globals.len(), 1, "exactly one global allow when allowed");
        assert!(
            !voting_rules.iter().any(|r| r.policy == RulePolicy::Deny),
            "no deny rule while globally allowed"
        );
    }
    if blockable.state.is_banned() {
        assert!(
            !voting_rules.iter().any(|r| r.policy == RulePolicy::Allow),
            "no in-effect allow while banned"
        );
    }
}

// --- S1: local allow, first crossing ---

#[tokio::test]
async fn local_allow_first_crossing_creates_rules_for_prior_upvoters() {
    let e = env();
    let binary = fixtures::macos_binary("bin-s1");
    fixtures::seed_blockable(&e.store, &binary);

    // Fifteen voters; the first fourteen each own one host.
    for i in 1..=15 {
        let user = fixtures::user(&format!("user{i:02}@example.com", i = i), 1);
        fixtures::seed_user(&e.store, &user);
        if i <= 14 {
            fixtures::seed_macos_host(&e.store, &format!("HOST{i:02}"), user.short_name());
        }
    }

    for i in 1..=15 {
        e.engine
            .vote(&format!("user{i:02}@example.com"), "bin-s1", true, Some(1))
            .await
            .unwrap();
    }

    let b = blockable(&e, "bin-s1");
    assert_eq!(b.score, 15);
    assert_eq!(b.state, BlockableState::ApprovedForLocalAllow);

    let rules = in_effect_rules(&e, "bin-s1");
    assert_eq!(rules.len(), 14);
    let mut hosts: Vec<&str> = rules.iter().map(|r| r.host_id.as_str()).collect();
    hosts.sort_unstable();
    let expected: Vec<String> = (1..=14).map(|i| format!("HOST{i:02}")).collect();
    assert_eq!(hosts, expected.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(rules.iter().all(|r| r.policy == RulePolicy::Allow && r.user_id.is_some()));

    assert_eq!(e.analytics.rows_for(AnalyticsTable::Vote).len(), 15);
    assert_eq!(e.analytics.rows_for(AnalyticsTable::Binary).len(), 16);
    assert_eq!(e.analytics.rows_for(AnalyticsTable::Rule).len(), 14);

    // macOS path never touches the commit queue.
    assert_eq!(e.tasks.count(COMMIT_CHANGES_QUEUE), 0);
    assert!(change_sets(&e, "bin-s1").is_empty());
    assert_invariants(&e, "bin-s1");
}

// --- S2: change of heart ---

#[tokio::test]
async fn opposite_vote_archives_the_old_one_and_flags() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-s2"));
    fixtures::seed_user(&e.store, &fixtures::user("u@example.com", 1));

    e.engine.vote("u@example.com", "bin-s2", true, Some(1)).await.unwrap();
    e.engine.vote("u@example.com", "bin-s2", false, Some(1)).await.unwrap();

    let b = blockable(&e, "bin-s2");
    assert_eq!(b.score, -1);
    assert!(b.flagged);

    let current = in_effect_votes(&e, "bin-s2");
    assert_eq!(current.len(), 1);
    assert!(!current[0].was_yes);
    let archived = archived_votes(&e, "bin-s2");
    assert_eq!(archived.len(), 1);
    assert!(archived[0].was_yes);

    assert_eq!(e.analytics.rows_for(AnalyticsTable::Vote).len(), 2);
    let score_changes: Vec<AnalyticsRow> = e
        .analytics
        .rows_for(AnalyticsTable::Binary)
        .into_iter()
        .filter(|row| {
            matches!(row, AnalyticsRow::Blockable(r) if r.action == BlockAction::ScoreChange)
        })
        .collect();
    assert_eq!(score_changes.len(), 2);
    assert_invariants(&e, "bin-s2");
}

// --- S3: two-admin global allow ---

#[tokio::test]
async fn two_admin_upvotes_reach_global_allow() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-s3"));
    fixtures::seed_user(&e.store, &fixtures::admin("admin1@example.com"));
    fixtures::seed_user(&e.store, &fixtures::admin("admin2@example.com"));

    e.engine.vote("admin1@example.com", "bin-s3", true, None).await.unwrap();
    e.engine.vote("admin2@example.com", "bin-s3", true, None).await.unwrap();

    let b = blockable(&e, "bin-s3");
    assert_eq!(b.score, 50);
    assert_eq!(b.state, BlockableState::GloballyAllowed);

    let rules = in_effect_rules(&e, "bin-s3");
    let globals: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.policy == RulePolicy::Allow && !r.is_local())
        .collect();
    assert_eq!(globals.len(), 1);
    assert!(!rules.iter().any(|r| r.policy == RulePolicy::Deny));
    assert_invariants(&e, "bin-s3");
}

// --- S4: duplicate vote ---

#[tokio::test]
async fn same_polarity_revote_is_rejected_and_changes_nothing() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-s4"));
    fixtures::seed_user(&e.store, &fixtures::user("u@example.com", 1));

    e.engine.vote("u@example.com", "bin-s4", true, Some(1)).await.unwrap();
    let before_votes = all_votes(&e, "bin-s4");
    let before = blockable(&e, "bin-s4");

    let err = e.engine.vote("u@example.com", "bin-s4", true, Some(1)).await;
    assert!(matches!(err, Err(VoteError::DuplicateVote { .. })));

    assert_eq!(all_votes(&e, "bin-s4"), before_votes);
    assert_eq!(blockable(&e, "bin-s4"), before);
    assert_invariants(&e, "bin-s4");
}

// --- S5: reset ---

#[tokio::test]
async fn reset_archives_votes_disables_rules_and_returns_to_untrusted() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-s5"));
    for i in 1..=10 {
        let user = fixtures::user(&format!("u{i}@example.com"), 1);
        fixtures::seed_user(&e.store, &user);
        e.engine
            .vote(&user.id, "bin-s5", true, Some(1))
            .await
            .unwrap();
    }
    // An authoritative downvote marks the binary SUSPECT.
    fixtures::seed_user(&e.store, &fixtures::admin("responder@example.com"));
    e.engine
        .vote("responder@example.com", "bin-s5", false, None)
        .await
        .unwrap();
    assert_eq!(blockable(&e, "bin-s5").state, BlockableState::Suspect);
    assert_eq!(in_effect_votes(&e, "bin-s5").len(), 11);

    // One in-effect rule left over from an earlier local-allow phase.
    let stray = Rule {
        id: "stray-local".to_string(),
        kind: quorum_types::model::RuleKind::Binary,
        policy: RulePolicy::Allow,
        in_effect: true,
        host_id: "HOST99".to_string(),
        user_id: Some("u1@example.com".to_string()),
        is_committed: false,
        is_fulfilled: None,
        created_at: 0,
        updated_at: 0,
    };
    quorum_api::store::store_typed(
        e.store.as_ref(),
        &keys::rule_key("bin-s5", &stray.id),
        &stray,
    )
    .unwrap();

    e.engine.reset("bin-s5").await.unwrap();

    let b = blockable(&e, "bin-s5");
    assert_eq!(b.state, BlockableState::Untrusted);
    assert!(!b.flagged);
    assert_eq!(b.score, 0);
    assert!(in_effect_votes(&e, "bin-s5").is_empty());
    assert_eq!(archived_votes(&e, "bin-s5").len(), 11);
    let rules = in_effect_rules(&e, "bin-s5");
    assert!(!rules.is_empty());
    assert!(rules.iter().all(|r| r.policy == RulePolicy::Remove));
    assert_invariants(&e, "bin-s5");
}

#[tokio::test]
async fn reset_is_not_allowed_for_packages() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::package("pkg-1", &[]));
    let err = e.engine.reset("pkg-1").await;
    assert!(matches!(
        err,
        Err(VoteError::NotAllowed(ProhibitedReason::ResetUnsupported))
    ));
}

// --- S6: Windows deferred commit (engine half) ---

#[tokio::test]
async fn windows_local_allow_queues_a_change_set_and_commit_task() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::windows_binary("bin-s6", "1234"));
    let user = fixtures::user("wuser@example.com", 1);
    fixtures::seed_user(&e.store, &user);
    fixtures::seed_windows_host(&e.store, "5678", &[user.short_name()]);

    let local_threshold = e
        .engine
        .config()
        .voting
        .thresholds
        .locally_allowed
        .unwrap();
    e.engine
        .vote("wuser@example.com", "bin-s6", true, Some(local_threshold))
        .await
        .unwrap();

    let b = blockable(&e, "bin-s6");
    assert_eq!(b.state, BlockableState::ApprovedForLocalAllow);

    let rules = in_effect_rules(&e, "bin-s6");
    assert_eq!(rules.len(), 1);
    let rule = &rules[0];
    assert_eq!(rule.host_id, "5678");
    assert!(!rule.is_committed);
    assert_eq!(rule.is_fulfilled, None);

    let changes = change_sets(&e, "bin-s6");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, RulePolicy::Allow);
    assert_eq!(changes[0].rule_ids, vec![rule.id.clone()]);

    let pending = e.tasks.pending(COMMIT_CHANGES_QUEUE);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, "bin-s6");
    assert_invariants(&e, "bin-s6");
}

#[tokio::test]
async fn windows_global_transitions_queue_change_sets_inside_the_vote() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::windows_binary("bin-wg", "42"));
    fixtures::seed_user(&e.store, &fixtures::admin("a1@example.com"));
    fixtures::seed_user(&e.store, &fixtures::admin("a2@example.com"));

    e.engine.vote("a1@example.com", "bin-wg", true, None).await.unwrap();
    e.engine.vote("a2@example.com", "bin-wg", true, None).await.unwrap();

    assert_eq!(blockable(&e, "bin-wg").state, BlockableState::GloballyAllowed);
    let changes = change_sets(&e, "bin-wg");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, RulePolicy::Allow);
    assert!(e.tasks.count(COMMIT_CHANGES_QUEUE) >= 1);
    assert_invariants(&e, "bin-wg");
}

// --- Bans, suspects, flags ---

#[tokio::test]
async fn authoritative_downvotes_ban_and_deny() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-ban"));
    fixtures::seed_user(&e.store, &fixtures::admin("a1@example.com"));
    fixtures::seed_user(&e.store, &fixtures::admin("a2@example.com"));

    e.engine.vote("a1@example.com", "bin-ban", false, None).await.unwrap();
    let after_first = blockable(&e, "bin-ban");
    assert_eq!(after_first.state, BlockableState::Suspect);
    assert!(after_first.flagged);

    e.engine.vote("a2@example.com", "bin-ban", false, None).await.unwrap();
    let b = blockable(&e, "bin-ban");
    assert_eq!(b.score, -50);
    assert_eq!(b.state, BlockableState::Banned);

    let rules = in_effect_rules(&e, "bin-ban");
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].policy, RulePolicy::Deny);
    assert!(!rules[0].is_local());
    assert_invariants(&e, "bin-ban");
}

#[tokio::test]
async fn suspect_gates_state_changes_to_authorized_users() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-sus"));
    fixtures::seed_user(&e.store, &fixtures::admin("responder@example.com"));
    fixtures::seed_user(&e.store, &fixtures::user("bystander@example.com", 1));

    e.engine
        .vote("responder@example.com", "bin-sus", false, Some(1))
        .await
        .unwrap();
    assert_eq!(blockable(&e, "bin-sus").state, BlockableState::Suspect);

    // A regular user cannot vote a SUSPECT blockable at all.
    let err = e
        .engine
        .vote("bystander@example.com", "bin-sus", true, Some(1))
        .await;
    assert!(matches!(
        err,
        Err(VoteError::NotAllowed(ProhibitedReason::AdminOnly))
    ));

    // An authoritative change of heart re-evaluates from the thresholds.
    e.engine
        .vote("responder@example.com", "bin-sus", true, Some(1))
        .await
        .unwrap();
    let b = blockable(&e, "bin-sus");
    assert_eq!(b.state, BlockableState::Untrusted);
    assert_eq!(b.score, 1);
    assert_invariants(&e, "bin-sus");
}

#[tokio::test]
async fn flag_clears_only_for_unflag_capable_upvoters() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-flag"));
    fixtures::seed_user(&e.store, &fixtures::user("downer@example.com", 1));
    fixtures::seed_user(&e.store, &fixtures::user("upper@example.com", 1));
    fixtures::seed_user(&e.store, &fixtures::admin("cleaner@example.com"));

    e.engine.vote("downer@example.com", "bin-flag", false, Some(1)).await.unwrap();
    assert!(blockable(&e, "bin-flag").flagged);

    // An ordinary upvote leaves the flag standing.
    e.engine.vote("upper@example.com", "bin-flag", true, Some(1)).await.unwrap();
    assert!(blockable(&e, "bin-flag").flagged);

    // An UNFLAG-capable upvote clears it.
    e.engine.vote("cleaner@example.com", "bin-flag", true, Some(1)).await.unwrap();
    assert!(!blockable(&e, "bin-flag").flagged);
    assert_invariants(&e, "bin-flag");
}

// --- Entry-point validation ---

#[tokio::test]
async fn unknown_blockable_and_user_are_distinct_errors() {
    let e = env();
    fixtures::seed_user(&e.store, &fixtures::user("u@example.com", 1));
    let err = e.engine.vote("u@example.com", "nope", true, Some(1)).await;
    assert!(matches!(err, Err(VoteError::BlockableNotFound(_))));

    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-x"));
    let err = e.engine.vote("ghost@example.com", "bin-x", true, Some(1)).await;
    assert!(matches!(err, Err(VoteError::UserNotFound(_))));

    let err = e.engine.recount("nope").await;
    assert!(matches!(err, Err(VoteError::BlockableNotFound(_))));
}

#[tokio::test]
async fn negative_weight_is_invalid() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-w"));
    fixtures::seed_user(&e.store, &fixtures::user("u@example.com", 1));
    let err = e.engine.vote("u@example.com", "bin-w", true, Some(-1)).await;
    assert!(matches!(err, Err(VoteError::InvalidWeight(-1))));
}

#[tokio::test]
async fn unmanaged_platform_is_unsupported() {
    let e = env_with_flavors(vec![PlatformFlavor::macos()]);
    fixtures::seed_blockable(&e.store, &fixtures::windows_binary("bin-win", "7"));
    fixtures::seed_user(&e.store, &fixtures::user("u@example.com", 1));
    let err = e.engine.vote("u@example.com", "bin-win", true, Some(1)).await;
    assert!(matches!(err, Err(VoteError::UnsupportedPlatform(_))));
}

#[tokio::test]
async fn prohibited_states_reject_everyone() {
    let e = env();
    let mut binary = fixtures::macos_binary("bin-allowed");
    binary.state = BlockableState::GloballyAllowed;
    fixtures::seed_blockable(&e.store, &binary);
    fixtures::seed_user(&e.store, &fixtures::admin("a@example.com"));

    let err = e.engine.vote("a@example.com", "bin-allowed", true, None).await;
    assert!(matches!(
        err,
        Err(VoteError::NotAllowed(ProhibitedReason::ProhibitedState(
            BlockableState::GloballyAllowed
        )))
    ));
}

#[tokio::test]
async fn certificates_are_admin_only() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::certificate("cert-1", Platform::MacOs));
    fixtures::seed_user(&e.store, &fixtures::user("u@example.com", 1));
    fixtures::seed_user(&e.store, &fixtures::admin("a@example.com"));

    let err = e.engine.vote("u@example.com", "cert-1", true, Some(1)).await;
    assert!(matches!(
        err,
        Err(VoteError::NotAllowed(ProhibitedReason::AdminOnly))
    ));
    e.engine.vote("a@example.com", "cert-1", true, None).await.unwrap();
}

#[tokio::test]
async fn packages_cannot_be_downvoted() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::package("pkg-dv", &[]));
    fixtures::seed_user(&e.store, &fixtures::user("u@example.com", 1));
    let err = e.engine.vote("u@example.com", "pkg-dv", false, Some(1)).await;
    assert!(matches!(
        err,
        Err(VoteError::NotAllowed(ProhibitedReason::DownvoteUnsupported))
    ));
}

#[tokio::test]
async fn packages_with_flagged_members_reject_votes() {
    let e = env();
    let mut member = fixtures::macos_binary("member-1");
    member.flagged = true;
    fixtures::seed_blockable(&e.store, &member);
    fixtures::seed_blockable(&e.store, &fixtures::package("pkg-fm", &["member-1"]));
    fixtures::seed_user(&e.store, &fixtures::user("u@example.com", 1));

    let err = e.engine.vote("u@example.com", "pkg-fm", true, Some(1)).await;
    assert!(matches!(
        err,
        Err(VoteError::NotAllowed(ProhibitedReason::FlaggedMember(_)))
    ));
}

// --- Recount ---

#[tokio::test]
async fn recount_repairs_drift_and_is_idempotent() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-rc"));
    for i in 1..=3 {
        let user = fixtures::user(&format!("u{i}@example.com"), 1);
        fixtures::seed_user(&e.store, &user);
        e.engine.vote(&user.id, "bin-rc", true, Some(1)).await.unwrap();
    }

    // Sabotage the stored score and flag.
    let mut b = blockable(&e, "bin-rc");
    b.score = 99;
    b.flagged = true;
    fixtures::seed_blockable(&e.store, &b);

    assert!(e.engine.recount("bin-rc").await.unwrap());
    let repaired = blockable(&e, "bin-rc");
    assert_eq!(repaired.score, 3);
    assert!(!repaired.flagged);

    // A second recount finds nothing to fix.
    assert!(!e.engine.recount("bin-rc").await.unwrap());
    assert_eq!(blockable(&e, "bin-rc"), repaired);
    assert_invariants(&e, "bin-rc");
}

#[tokio::test]
async fn recount_recreates_a_missing_global_allow() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-rr"));
    fixtures::seed_user(&e.store, &fixtures::admin("a1@example.com"));
    fixtures::seed_user(&e.store, &fixtures::admin("a2@example.com"));
    e.engine.vote("a1@example.com", "bin-rr", true, None).await.unwrap();
    e.engine.vote("a2@example.com", "bin-rr", true, None).await.unwrap();

    // Sabotage: disable the global allow behind the engine's back.
    let rules: Vec<(Vec<u8>, Rule)> =
        fetch_scan_typed(e.store.as_ref(), &keys::rule_prefix("bin-rr")).unwrap();
    for (key, mut rule) in rules {
        if rule.in_effect {
            rule.in_effect = false;
            quorum_api::store::store_typed(e.store.as_ref(), &key, &rule).unwrap();
        }
    }

    e.engine.recount("bin-rr").await.unwrap();
    let globals: Vec<Rule> = in_effect_rules(&e, "bin-rr")
        .into_iter()
        .filter(|r| r.policy == RulePolicy::Allow && !r.is_local())
        .collect();
    assert_eq!(globals.len(), 1);
    assert_invariants(&e, "bin-rr");
}

#[tokio::test]
async fn recount_keeps_a_valid_suspect() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-vs"));
    fixtures::seed_user(&e.store, &fixtures::admin("responder@example.com"));
    e.engine
        .vote("responder@example.com", "bin-vs", false, Some(1))
        .await
        .unwrap();
    assert_eq!(blockable(&e, "bin-vs").state, BlockableState::Suspect);

    assert!(!e.engine.recount("bin-vs").await.unwrap());
    assert_eq!(blockable(&e, "bin-vs").state, BlockableState::Suspect);
}

// --- Local-rule idempotence ---

#[tokio::test]
async fn repeated_upvotes_do_not_duplicate_local_rules() {
    let e = env();
    fixtures::seed_blockable(&e.store, &fixtures::macos_binary("bin-idem"));
    // Enough weight to cross the local threshold alone.
    let heavy = fixtures::user("heavy@example.com", 20);
    fixtures::seed_user(&e.store, &heavy);
    fixtures::seed_macos_host(&e.store, "HOST-H", heavy.short_name());
    let late = fixtures::user("late@example.com", 1);
    fixtures::seed_user(&e.store, &late);
    fixtures::seed_macos_host(&e.store, "HOST-L", late.short_name());

    e.engine.vote("heavy@example.com", "bin-idem", true, None).await.unwrap();
    assert_eq!(in_effect_rules(&e, "bin-idem").len(), 1);

    // A later upvote while already in the state adds only the new voter's host.
    e.engine.vote("late@example.com", "bin-idem", true, None).await.unwrap();
    let rules = in_effect_rules(&e, "bin-idem");
    assert_eq!(rules.len(), 2);

    // Re-deriving the full set creates nothing new.
    let created = e.engine.create_local_rules("bin-idem", None).await.unwrap();
    assert!(created.is_empty());
    assert_invariants(&e, "bin-idem");
}
