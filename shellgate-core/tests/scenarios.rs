//! Cross-module scenarios from the end-to-end test matrix: a submitted
//! line travels from the parser through the policy evaluator the same way
//! the Terminal I/O Pump drives it, and the session registry enforces
//! per-user caps and transport-loss semantics the way the gateway relies
//! on.

use std::time::Duration;

use shellgate_core::policy::{self, Decision, PolicyRuleSet};
use shellgate_core::session::{AuthMethod, ConnectionTarget, NullPumpHandle, SessionRegistry, SessionState};

fn target() -> ConnectionTarget {
    ConnectionTarget {
        hostname: "h1".into(),
        port: 22,
        username: "root".into(),
        auth: AuthMethod::Password("x".into()),
    }
}

/// S1: an unrestricted submission is allowed verbatim.
#[test]
fn scenario_allowed_command_passes_through() {
    let decision = policy::evaluate("whoami", None);
    assert_eq!(decision, Decision::Allowed);
}

/// S2: a denylisted command is blocked with the documented reason and
/// never reaches the channel (the pump only forwards on `Decision::Allowed`).
#[test]
fn scenario_denylisted_command_is_blocked_with_exact_reason() {
    let rules = PolicyRuleSet::denylist(vec!["rm*".into()]);
    let decision = policy::evaluate("rm -rf /tmp", Some(&rules));
    assert_eq!(
        decision,
        Decision::Blocked {
            reason: "command 'rm' matched deny rule 'rm*'".into()
        }
    );
}

/// S3: an allowlisted pipeline blocks on the first command that fails to
/// match, citing that command and not the ones that did match.
#[test]
fn scenario_allowlist_pipeline_blocks_on_first_failing_segment() {
    let rules = PolicyRuleSet::allowlist(vec!["ls".into(), "cat".into()]);
    let decision = policy::evaluate("ls | grep foo", Some(&rules));
    assert_eq!(
        decision,
        Decision::Blocked {
            reason: "command 'grep' not in allowlist".into()
        }
    );
}

/// S4: the sixth session for a user is rejected until one of the existing
/// five is terminated, at which point creation succeeds again.
#[tokio::test]
async fn scenario_per_user_cap_of_five_with_recovery() {
    let registry = SessionRegistry::new(5, 100, Duration::from_secs(1800));
    let mut ids = Vec::new();
    for _ in 0..5 {
        let session = registry
            .create("alice".into(), "t1".into(), "h1".into(), target(), None)
            .await
            .expect("within cap");
        ids.push(session.lock().await.id);
    }

    let sixth = registry
        .create("alice".into(), "t1".into(), "h1".into(), target(), None)
        .await;
    assert!(sixth.is_err());

    registry.terminate_session(ids[0], "make room").await;

    registry
        .create("alice".into(), "t1".into(), "h1".into(), target(), None)
        .await
        .expect("slot freed by terminate");
}

/// S5 (reconnect half): after a transport disconnect the session survives
/// in `Inactive`, and a rebind followed by a second disconnect still lands
/// on `Inactive`, never `Terminated`.
#[tokio::test]
async fn scenario_disconnect_then_rebind_then_disconnect_stays_inactive() {
    let registry = SessionRegistry::new(5, 100, Duration::from_secs(1800));
    let session = registry
        .create(
            "bob".into(),
            "t1".into(),
            "h1".into(),
            target(),
            Some("ws-a".into()),
        )
        .await
        .expect("session");
    let id = session.lock().await.id;
    registry
        .attach_pump(id, std::sync::Arc::new(NullPumpHandle))
        .await
        .unwrap();

    registry.on_transport_gone("ws-a").await;
    assert_eq!(
        registry.lookup(id).await.unwrap().lock().await.state,
        SessionState::Inactive
    );

    registry.rebind(id, "ws-b".into()).await.unwrap();
    assert_eq!(
        registry.lookup(id).await.unwrap().lock().await.state,
        SessionState::Active
    );

    registry.on_transport_gone("ws-b").await;
    assert_eq!(
        registry.lookup(id).await.unwrap().lock().await.state,
        SessionState::Inactive
    );
}

/// S5 (reaper half): a session idle past the timeout is reaped and
/// subsequently unreachable by lookup.
#[tokio::test(start_paused = true)]
async fn scenario_idle_session_is_reaped() {
    let registry = SessionRegistry::new(5, 100, Duration::from_millis(50));
    let session = registry
        .create("carol".into(), "t1".into(), "h1".into(), target(), None)
        .await
        .expect("session");
    let id = session.lock().await.id;
    registry
        .attach_pump(id, std::sync::Arc::new(NullPumpHandle))
        .await
        .unwrap();

    let registry_for_reaper = registry.clone();
    tokio::spawn(registry_for_reaper.run_reaper(Duration::from_millis(10)));

    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;

    assert!(registry.lookup(id).await.is_none());
}
