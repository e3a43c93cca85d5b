//! Health monitor against live mock backends.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use service_balancer::config::HealthCheckConfig;
use service_balancer::health::{HealthMonitor, HealthState};
use service_balancer::load_balancer::endpoint::Endpoint;
use service_balancer::lifecycle::Shutdown;
use service_balancer::{BalanceOutcome, BalanceRequest, EndpointSpec};

mod common;

fn health_config(unhealthy_threshold: u32) -> HealthCheckConfig {
    HealthCheckConfig {
        tick_millis: 50,
        timeout_secs: 1,
        unhealthy_threshold,
        ..HealthCheckConfig::default()
    }
}

#[tokio::test]
async fn test_failed_probe_removes_endpoint_from_rotation() {
    let healthy = common::start_programmable_backend(|| async { (200, "ok".into()) }).await;
    let failing = common::start_programmable_backend(|| async { (500, "boom".into()) }).await;

    let balancer = common::balancer("round_robin");
    balancer
        .register_service(
            EndpointSpec::new("checkout", "127.0.0.1", u32::from(healthy.port())).with_id("good"),
        )
        .unwrap();
    balancer
        .register_service(
            EndpointSpec::new("checkout", "127.0.0.1", u32::from(failing.port())).with_id("bad"),
        )
        .unwrap();

    let monitor = HealthMonitor::new(balancer.registry().clone(), health_config(1)).unwrap();
    let reports = monitor.check_all().await;
    assert_eq!(reports.len(), 2);

    let bad = reports.iter().find(|r| r.endpoint_id == "bad").unwrap();
    assert!(!bad.is_healthy);
    assert_eq!(bad.status_code, Some(500));

    let request = BalanceRequest::new("checkout");
    for _ in 0..4 {
        let response = balancer.balance_load(&request).unwrap().routed().unwrap();
        assert_eq!(response.endpoint_id, "good");
    }

    let statuses = balancer.endpoint_statuses(Some("checkout"));
    let bad_status = statuses.iter().find(|s| s.id == "bad").unwrap();
    assert_eq!(bad_status.health, HealthState::Unhealthy);
}

#[tokio::test]
async fn test_all_unhealthy_means_no_available_endpoints() {
    let port = common::closed_port().await;
    let balancer = common::balancer("round_robin");
    let id = balancer
        .register_service(EndpointSpec::new("checkout", "127.0.0.1", u32::from(port)))
        .unwrap();

    let monitor = HealthMonitor::new(balancer.registry().clone(), health_config(1)).unwrap();
    let report = monitor.check_endpoint(&id).await.unwrap();
    assert!(!report.is_healthy);
    assert!(report.error_message.is_some());

    let outcome = balancer.balance_load(&BalanceRequest::new("checkout")).unwrap();
    assert!(matches!(outcome, BalanceOutcome::NoAvailableEndpoints));
}

#[tokio::test]
async fn test_threshold_delays_unhealthy_transition() {
    let addr = common::start_programmable_backend(|| async { (503, String::new()) }).await;
    let balancer = common::balancer("round_robin");
    let id = balancer
        .register_service(EndpointSpec::new("checkout", "127.0.0.1", u32::from(addr.port())))
        .unwrap();
    let endpoint = balancer.registry().get_endpoint(&id).unwrap();

    let monitor = HealthMonitor::new(balancer.registry().clone(), health_config(3)).unwrap();
    for _ in 0..2 {
        let report = monitor.check_endpoint(&id).await.unwrap();
        assert!(!report.probe_succeeded());
        assert!(report.is_healthy);
    }
    assert_eq!(endpoint.health_state(), HealthState::Unknown);

    monitor.check_endpoint(&id).await.unwrap();
    assert_eq!(endpoint.health_state(), HealthState::Unhealthy);
    assert!(endpoint.last_error().is_some());
}

#[tokio::test]
async fn test_monitor_loop_recovers_endpoint_and_stops_on_shutdown() {
    let up = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicU32::new(0));
    let (up_flag, call_count) = (up.clone(), calls.clone());
    let addr = common::start_programmable_backend(move || {
        let up = up_flag.load(Ordering::SeqCst);
        call_count.fetch_add(1, Ordering::SeqCst);
        async move {
            if up {
                (200, "ok".into())
            } else {
                (503, "starting".into())
            }
        }
    })
    .await;

    let balancer = common::balancer("round_robin");
    let id = balancer
        .register_service(
            EndpointSpec::new("checkout", "127.0.0.1", u32::from(addr.port()))
                .with_health_check("/health", 1),
        )
        .unwrap();
    let endpoint = balancer.registry().get_endpoint(&id).unwrap();

    let shutdown = Shutdown::new();
    let monitor = Arc::new(
        HealthMonitor::new(balancer.registry().clone(), health_config(1)).unwrap(),
    );
    let handle = tokio::spawn(monitor.run(shutdown.subscribe()));

    wait_for_state(&endpoint, HealthState::Unhealthy).await;
    up.store(true, Ordering::SeqCst);
    wait_for_state(&endpoint, HealthState::Healthy).await;
    assert!(balancer
        .balance_load(&BalanceRequest::new("checkout"))
        .unwrap()
        .is_routed());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("monitor did not stop")
        .unwrap();

    let before = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), before, "probes continued after shutdown");
}

#[tokio::test]
async fn test_hanging_endpoint_does_not_delay_others() {
    let fast_calls = Arc::new(AtomicU32::new(0));
    let counter = fast_calls.clone();
    let fast = common::start_programmable_backend(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { (200, "ok".into()) }
    })
    .await;
    let (hanging, accepted) = common::start_blackhole_backend().await;

    let balancer = common::balancer("round_robin");
    balancer
        .register_service(
            EndpointSpec::new("checkout", "127.0.0.1", u32::from(fast.port()))
                .with_id("fast")
                .with_health_check("/health", 1),
        )
        .unwrap();
    balancer
        .register_service(
            EndpointSpec::new("checkout", "127.0.0.1", u32::from(hanging.port()))
                .with_id("hanging")
                .with_health_check("/health", 1),
        )
        .unwrap();

    let config = HealthCheckConfig {
        tick_millis: 100,
        timeout_secs: 3,
        ..HealthCheckConfig::default()
    };
    let shutdown = Shutdown::new();
    let monitor = Arc::new(HealthMonitor::new(balancer.registry().clone(), config).unwrap());
    let handle = tokio::spawn(monitor.run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(5000)).await;
    shutdown.trigger();
    handle.await.unwrap();

    // Checked about once a second; a shared sweep would stall behind the 3s timeout.
    let fast_checks = fast_calls.load(Ordering::SeqCst);
    assert!(fast_checks >= 4, "fast endpoint checked only {fast_checks} times");

    // The hanging endpoint is never checked twice at once.
    let hanging_checks = accepted.load(Ordering::SeqCst);
    assert!(hanging_checks <= 2, "hanging endpoint checked {hanging_checks} times");
    assert_eq!(
        balancer.registry().get_endpoint("hanging").unwrap().health_state(),
        HealthState::Unhealthy
    );
}

async fn wait_for_state(endpoint: &Endpoint, state: HealthState) {
    for _ in 0..100 {
        if endpoint.health_state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("endpoint never reached {state:?}");
}
