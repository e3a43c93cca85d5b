//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered endpoint on its own interval
//! - Update endpoint health state and observed latency from the results
//! - Serve one-off probes for the health API
//!
//! Every due endpoint is probed in its own task under its own timeout, so an
//! unreachable endpoint never delays the others. An endpoint whose probe is
//! still running is not probed again until it finishes. Failures only flip
//! state; nothing is propagated to balancing callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashSet;
use futures_util::future::join_all;
use reqwest::header::USER_AGENT;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::state::{HealthReport, HealthState};
use crate::load_balancer::endpoint::{Endpoint, Protocol};
use crate::load_balancer::registry::Registry;
use crate::observability::metrics;

/// What a single probe observed, before it is applied to the endpoint.
struct ProbeResult {
    elapsed: Duration,
    status_code: Option<u16>,
    error: Option<String>,
}

/// Clears an endpoint's in-flight marker when its probe ends, however it ends.
struct InFlight<'a> {
    probing: &'a DashSet<String>,
    endpoint_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.probing.remove(&self.endpoint_id);
    }
}

pub struct HealthMonitor {
    registry: Arc<Registry>,
    config: ArcSwap<HealthCheckConfig>,
    client: reqwest::Client,
    /// Ids of endpoints with a probe currently running.
    probing: DashSet<String>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<Registry>, config: HealthCheckConfig) -> Result<Self, reqwest::Error> {
        // Probes go straight to the endpoint, never through an environment proxy.
        let client = reqwest::Client::builder().no_proxy().build()?;

        Ok(Self {
            registry,
            config: ArcSwap::from_pointee(config),
            client,
            probing: DashSet::new(),
        })
    }

    /// Swap in new settings; picked up on the next tick.
    pub fn update_config(&self, config: HealthCheckConfig) {
        tracing::info!(
            enabled = config.enabled,
            tick_millis = config.tick_millis,
            timeout_secs = config.timeout_secs,
            "Health check settings updated"
        );
        self.config.store(Arc::new(config));
    }

    pub fn config(&self) -> Arc<HealthCheckConfig> {
        self.config.load_full()
    }

    /// Probe loop. Runs until a shutdown signal arrives.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick_millis = self.config.load().tick_millis.max(1);
        tracing::info!(
            tick_millis,
            enabled = self.config.load().enabled,
            "Health monitor starting"
        );

        let mut ticker = Self::ticker(tick_millis);
        let mut probes = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let config = self.config.load_full();
                    if config.tick_millis.max(1) != tick_millis {
                        tick_millis = config.tick_millis.max(1);
                        ticker = Self::ticker(tick_millis);
                    }
                    if config.enabled {
                        self.spawn_due(&mut probes, &config);
                    }
                }
                Some(joined) = probes.join_next(), if !probes.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Health probe task failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!(in_flight = probes.len(), "Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        probes.abort_all();
    }

    /// Start one task per due endpoint that is not already being probed.
    fn spawn_due(self: &Arc<Self>, probes: &mut JoinSet<()>, config: &Arc<HealthCheckConfig>) {
        for endpoint in self.due_endpoints() {
            if !self.probing.insert(endpoint.id.clone()) {
                continue;
            }
            let monitor = self.clone();
            let config = config.clone();
            probes.spawn(async move {
                let _in_flight = InFlight {
                    probing: &monitor.probing,
                    endpoint_id: endpoint.id.clone(),
                };
                monitor.check(&endpoint, &config).await;
            });
        }
    }

    fn ticker(tick_millis: u64) -> time::Interval {
        let mut ticker = time::interval(Duration::from_millis(tick_millis));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Active endpoints whose interval elapsed and that have no probe running.
    fn due_endpoints(&self) -> Vec<Arc<Endpoint>> {
        let now = Utc::now();
        self.registry
            .all_endpoints()
            .into_iter()
            .filter(|e| e.is_active() && e.probe_due(now) && !self.probing.contains(&e.id))
            .collect()
    }

    /// Probe due endpoints once and wait for all of them.
    pub async fn check_due(&self) -> Vec<HealthReport> {
        let config = self.config.load_full();
        let due: Vec<Arc<Endpoint>> = self
            .due_endpoints()
            .into_iter()
            .filter(|e| self.probing.insert(e.id.clone()))
            .collect();

        let config = &config;
        join_all(due.iter().map(|e| async move {
            let _in_flight = InFlight {
                probing: &self.probing,
                endpoint_id: e.id.clone(),
            };
            self.check(e, config).await
        }))
        .await
    }

    /// Probe every active endpoint regardless of interval.
    pub async fn check_all(&self) -> Vec<HealthReport> {
        let active: Vec<Arc<Endpoint>> = self
            .registry
            .all_endpoints()
            .into_iter()
            .filter(|e| e.is_active())
            .collect();
        self.check_many(active).await
    }

    /// Probe one endpoint now. `None` if it is not registered.
    pub async fn check_endpoint(&self, endpoint_id: &str) -> Option<HealthReport> {
        let endpoint = self.registry.get_endpoint(endpoint_id)?;
        let config = self.config.load_full();
        Some(self.check(&endpoint, &config).await)
    }

    async fn check_many(&self, endpoints: Vec<Arc<Endpoint>>) -> Vec<HealthReport> {
        if endpoints.is_empty() {
            return Vec::new();
        }
        let config = self.config.load_full();
        join_all(endpoints.iter().map(|e| self.check(e, &config))).await
    }

    async fn check(&self, endpoint: &Endpoint, config: &HealthCheckConfig) -> HealthReport {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let result = match endpoint.protocol {
            Protocol::Http | Protocol::Https => {
                self.probe_http(endpoint, &config.user_agent, timeout).await
            }
            Protocol::Tcp => probe_tcp(endpoint, timeout).await,
        };
        self.apply(endpoint, config, result)
    }

    async fn probe_http(&self, endpoint: &Endpoint, user_agent: &str, timeout: Duration) -> ProbeResult {
        let start = Instant::now();
        let Some(url) = endpoint.health_check_url() else {
            return ProbeResult {
                elapsed: Duration::ZERO,
                status_code: None,
                error: Some(format!("invalid health check url for {}", endpoint.address())),
            };
        };

        let request = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send();

        match time::timeout(timeout, request).await {
            Ok(Ok(response)) => {
                let status = response.status();
                ProbeResult {
                    elapsed: start.elapsed(),
                    status_code: Some(status.as_u16()),
                    error: (!status.is_success()).then(|| format!("non-success status {}", status)),
                }
            }
            Ok(Err(e)) => ProbeResult {
                elapsed: start.elapsed(),
                status_code: None,
                error: Some(format!("connection error: {}", e)),
            },
            Err(_) => ProbeResult {
                elapsed: start.elapsed(),
                status_code: None,
                error: Some(format!("timeout after {}s", timeout.as_secs())),
            },
        }
    }

    fn apply(&self, endpoint: &Endpoint, config: &HealthCheckConfig, result: ProbeResult) -> HealthReport {
        let transition = match &result.error {
            None => endpoint.mark_success(config.healthy_threshold as usize, result.elapsed),
            Some(error) => {
                tracing::warn!(
                    service = %endpoint.service_name,
                    endpoint = %endpoint.id,
                    address = %endpoint.address(),
                    error = %error,
                    "Health check failed"
                );
                endpoint.mark_failure(config.unhealthy_threshold as usize, error.clone())
            }
        };

        match transition {
            Some(HealthState::Healthy) => tracing::info!(
                service = %endpoint.service_name,
                endpoint = %endpoint.id,
                response_time_ms = result.elapsed.as_millis() as u64,
                "Endpoint became healthy"
            ),
            Some(state) => tracing::warn!(
                service = %endpoint.service_name,
                endpoint = %endpoint.id,
                state = ?state,
                "Endpoint became unhealthy"
            ),
            None => {}
        }

        metrics::record_endpoint_health(&endpoint.id, endpoint.is_healthy());

        HealthReport {
            endpoint_id: endpoint.id.clone(),
            is_healthy: endpoint.is_healthy(),
            response_time_ms: result.elapsed.as_millis() as u64,
            status_code: result.status_code,
            error_message: result.error,
            timestamp: Utc::now(),
        }
    }
}

/// A TCP endpoint is healthy when a connection can be opened.
async fn probe_tcp(endpoint: &Endpoint, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    let connect = TcpStream::connect((endpoint.url.as_str(), endpoint.port));
    let error = match time::timeout(timeout, connect).await {
        Ok(Ok(_stream)) => None,
        Ok(Err(e)) => Some(format!("connection error: {}", e)),
        Err(_) => Some(format!("timeout after {}s", timeout.as_secs())),
    };
    ProbeResult {
        elapsed: start.elapsed(),
        status_code: None,
        error,
    }
}
