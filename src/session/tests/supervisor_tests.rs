//! Supervisor loop tests with a scripted worker on the other end of the
//! session channel.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoordinatorConfig;
use crate::session::registry::{run_ping_supervisor, AdmitRequest, SessionRegistry};
use crate::session::status::{SessionRole, SessionStatus};
use crate::session::test_support::MockControl;
use crate::transport::{FrameKind, SessionChannel};

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        ping_interval_secs: 1,
        ping_timeout_secs: 1,
        terminate_grace_secs: 1,
        ..CoordinatorConfig::default()
    }
}

fn request(client: &str) -> AdmitRequest {
    AdmitRequest {
        client: client.to_string(),
        alias: String::new(),
        tag: None,
        role: SessionRole::Master,
        group: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_responsive_session_stays_valid() {
    let config = fast_config();
    let registry = Arc::new(SessionRegistry::new(&config));
    let control = Arc::new(MockControl::new());

    let proxy = registry.admit(request("alice"), None);
    let (channel, mut rx) = SessionChannel::new();
    proxy.set_channel(channel);
    proxy.set_pid(4242);
    proxy.set_valid(true);
    proxy.set_status(SessionStatus::Valid);

    // Scripted worker: answer every ping promptly.
    let replier = proxy.clone();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if frame.kind == FrameKind::Ping {
                replier.ping_reply();
            }
        }
    });

    let supervisor = tokio::spawn(run_ping_supervisor(
        registry.clone(),
        control.clone(),
        config,
    ));

    tokio::time::sleep(Duration::from_secs(5)).await;
    supervisor.abort();

    assert!(proxy.is_valid());
    assert_eq!(proxy.status(), SessionStatus::Valid);
    assert!(control.calls().is_empty(), "no control action for a healthy worker");
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_session_is_terminated() {
    let config = fast_config();
    let registry = Arc::new(SessionRegistry::new(&config));
    let control = Arc::new(MockControl::new());

    let proxy = registry.admit(request("alice"), None);
    // Channel exists but nobody ever answers pings.
    let (channel, _rx) = SessionChannel::new();
    proxy.set_channel(channel);
    proxy.set_pid(4242);
    proxy.set_valid(true);
    proxy.set_status(SessionStatus::Valid);

    let supervisor = tokio::spawn(run_ping_supervisor(
        registry.clone(),
        control.clone(),
        config,
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    supervisor.abort();

    assert!(!proxy.is_valid());
    assert_eq!(proxy.status(), SessionStatus::Terminated);
    assert!(control
        .calls()
        .iter()
        .any(|c| c == "send_signal(4242, terminate)"));
    assert!(!control.alive());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_requested_sessions_are_skipped() {
    let config = fast_config();
    let registry = Arc::new(SessionRegistry::new(&config));
    let control = Arc::new(MockControl::new());

    let proxy = registry.admit(request("alice"), None);
    let (channel, _rx) = SessionChannel::new();
    proxy.set_channel(channel);
    proxy.set_pid(4242);
    proxy.set_valid(true);
    proxy.set_status(SessionStatus::ShutdownRequested);
    proxy
        .set_shutdown_timer(
            control.clone(),
            crate::session::status::ShutdownMode::Message,
            Duration::from_secs(3600),
            true,
        )
        .unwrap();

    let supervisor = tokio::spawn(run_ping_supervisor(
        registry.clone(),
        control.clone(),
        config,
    ));

    tokio::time::sleep(Duration::from_secs(5)).await;
    supervisor.abort();

    // Excluded from probing: no termination attempt was made.
    assert!(control.calls().is_empty());
    assert!(proxy.is_valid());
}
