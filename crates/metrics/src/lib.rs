//! Read-side exposition of the current snapshot: Prometheus text on
//! `/metrics` and the pre-rendered snapshot on `/json`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Result;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, IntCounterVec, Opts, Registry, TextEncoder};
use state::{Snapshot, SnapshotStore};
use tracing::{info, warn};

const JSON_CONTENT_TYPE: &str = "application/json";
const NOT_READY_BODY: &str = r#"{"error":"snapshot not ready"}"#;

struct GaugeSpec {
    name: &'static str,
    help: &'static str,
    read: fn(&Snapshot) -> f64,
}

const GAUGES: &[GaugeSpec] = &[
    GaugeSpec {
        name: "total_raw_byte_power",
        help: "Total raw byte power of network",
        read: |s| s.total_raw_byte_power,
    },
    GaugeSpec {
        name: "total_quality_power",
        help: "Total quality power of network",
        read: |s| s.total_quality_power,
    },
    GaugeSpec {
        name: "miner_raw_byte_power",
        help: "Raw byte power of miner",
        read: |s| s.miner_raw_byte_power,
    },
    GaugeSpec {
        name: "miner_quality_power",
        help: "Quality power of miner",
        read: |s| s.miner_quality_power,
    },
    GaugeSpec {
        name: "expect_win_per_day",
        help: "Expectation of winning blocks per day",
        read: |s| s.win_per_day,
    },
    GaugeSpec {
        name: "sectors_committed",
        help: "The number of committed sectors",
        read: |s| s.sectors_committed,
    },
    GaugeSpec {
        name: "sectors_active",
        help: "The number of active sectors",
        read: |s| s.sectors_active,
    },
    GaugeSpec {
        name: "sectors_faulty",
        help: "The number of faulty sectors",
        read: |s| s.sectors_faulty,
    },
    GaugeSpec {
        name: "sector_size_bytes",
        help: "Declared sector size of miner",
        read: |s| s.sector_size as f64,
    },
    GaugeSpec {
        name: "worker_balance",
        help: "Balance of worker address",
        read: |s| s.worker_balance,
    },
    GaugeSpec {
        name: "miner_balance",
        help: "Balance of miner address",
        read: |s| s.miner_balance,
    },
    GaugeSpec {
        name: "control_balance",
        help: "Sum of balances of control addresses",
        read: |s| s.control_balance,
    },
    GaugeSpec {
        name: "available_balance",
        help: "Balance available",
        read: |s| s.available_balance,
    },
    GaugeSpec {
        name: "pledged_balance",
        help: "Balance of initial pledge",
        read: |s| s.pledged_balance,
    },
    GaugeSpec {
        name: "precommit_balance",
        help: "Balance of precommit deposits",
        read: |s| s.pre_commit_balance,
    },
    GaugeSpec {
        name: "vesting_balance",
        help: "Balance vesting",
        read: |s| s.vesting_balance,
    },
    GaugeSpec {
        name: "last_refresh_timestamp_seconds",
        help: "Unix time the current snapshot was captured",
        read: |s| s.captured_at_ms as f64 / 1000.0,
    },
];

/// Emits one gauge per snapshot field at scrape time, or nothing while the
/// store is empty.
pub struct SnapshotCollector {
    store: SnapshotStore,
    miner: String,
    descs: Vec<Desc>,
}

impl SnapshotCollector {
    pub fn new(store: SnapshotStore, miner: impl Into<String>) -> prometheus::Result<Self> {
        let miner = miner.into();
        let const_labels = HashMap::from([("miner".to_string(), miner.clone())]);
        let descs = GAUGES
            .iter()
            .map(|spec| {
                Desc::new(
                    spec.name.to_string(),
                    spec.help.to_string(),
                    Vec::new(),
                    const_labels.clone(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self {
            store,
            miner,
            descs,
        })
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let Ok(current) = self.store.current() else {
            return Vec::new();
        };
        let snapshot = current.snapshot();
        GAUGES
            .iter()
            .filter_map(|spec| {
                let opts = Opts::new(spec.name, spec.help).const_label("miner", self.miner.as_str());
                let gauge = Gauge::with_opts(opts).ok()?;
                gauge.set((spec.read)(snapshot));
                gauge.collect().pop()
            })
            .collect()
    }
}

/// Outcome counters for refresh cycles.
#[derive(Clone)]
pub struct RefreshMetrics {
    cycles: IntCounterVec,
}

impl RefreshMetrics {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let cycles = IntCounterVec::new(
            Opts::new("refresh_cycles_total", "Refresh cycles by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles.clone()))?;
        // expose both series from the first scrape
        cycles.with_label_values(&["success"]);
        cycles.with_label_values(&["failure"]);
        Ok(Self { cycles })
    }

    pub fn record_success(&self) {
        self.cycles.with_label_values(&["success"]).inc();
    }

    pub fn record_failure(&self) {
        self.cycles.with_label_values(&["failure"]).inc();
    }

    pub fn count(&self, outcome: &str) -> u64 {
        self.cycles.with_label_values(&[outcome]).get()
    }
}

#[derive(Clone)]
pub struct MetricsHandle {
    registry: Registry,
    store: SnapshotStore,
    refresh: RefreshMetrics,
}

impl MetricsHandle {
    pub fn new(store: SnapshotStore, miner: &str) -> Result<Self> {
        let registry = Registry::new();
        registry.register(Box::new(SnapshotCollector::new(store.clone(), miner)?))?;
        let refresh = RefreshMetrics::register(&registry)?;
        Ok(Self {
            registry,
            store,
            refresh,
        })
    }

    pub fn refresh_metrics(&self) -> RefreshMetrics {
        self.refresh.clone()
    }

    pub fn render_metrics(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    /// Routes one request. Never fails at the HTTP level for a missing
    /// snapshot: `/json` answers 503 and `/metrics` omits the gauges.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        match (req.method(), req.uri().path()) {
            (&Method::GET | &Method::HEAD, "/metrics") => match self.render_metrics() {
                Ok(buffer) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, buffer),
                Err(err) => {
                    warn!(error = ?err, "failed to encode metrics");
                    respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        "metrics encoding failed",
                    )
                }
            },
            (&Method::GET | &Method::HEAD, "/json") => match self.store.current() {
                Ok(current) => respond(StatusCode::OK, JSON_CONTENT_TYPE, current.json().to_owned()),
                Err(_) => respond(
                    StatusCode::SERVICE_UNAVAILABLE,
                    JSON_CONTENT_TYPE,
                    NOT_READY_BODY,
                ),
            },
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        }
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let make_svc = make_service_fn(move |_| {
            let handle = self.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let handle = handle.clone();
                    async move { Ok::<_, Infallible>(handle.handle(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)?.serve(make_svc);
        info!(%addr, "exporter listening");
        server.await?;
        Ok(())
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut resp = Response::new(body.into());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}
