use std::{net::IpAddr, net::SocketAddr, sync::Arc, time::Duration};

use aggregator::{resolve_reference, Scheduler, SnapshotAggregator};
use anyhow::{bail, Context};
use chain::{Address, ChainEpoch, ChainQuery, LotusClient, DEFAULT_RPC_URL};
use clap::Parser;
use derivation::ProtocolParams;
use metrics::MetricsHandle;
use state::SnapshotStore;
use tokio::task;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const MAX_BLOCK_DELAY_SECS: u64 = 3_600;

#[derive(Parser, Debug)]
#[command(about = "Prometheus exporter for a Filecoin storage miner")]
struct Args {
    /// Miner actor address, e.g. f01234.
    #[arg(short = 'm', long, env = "MINER_ID")]
    miner: String,

    /// Seconds between refreshes.
    #[arg(short = 'i', long, env = "REFRESH_INTERVAL_SECS", default_value_t = 60)]
    interval_secs: u64,

    /// Chain height to pin every query to; 0 or absent follows head.
    #[arg(short = 't', long, env = "TARGET_HEIGHT", allow_negative_numbers = true)]
    height: Option<ChainEpoch>,

    #[arg(short = 'p', long, env = "PORT", default_value_t = 9002)]
    port: u16,

    #[arg(long, env = "LISTEN_HOST", default_value = "0.0.0.0")]
    listen_host: IpAddr,

    #[arg(long, env = "LOTUS_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    #[arg(long, env = "LOTUS_RPC_TOKEN", hide_env_values = true)]
    rpc_token: Option<String>,

    #[arg(long, env = "LOTUS_RPC_TIMEOUT_SECS", default_value_t = 30)]
    rpc_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    blocks_per_epoch: u64,

    #[arg(long, default_value_t = 30)]
    block_delay_secs: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Settings checked at startup; any error here is fatal.
#[derive(Debug)]
struct Settings {
    miner: Address,
    interval: Duration,
    listen_addr: SocketAddr,
    params: ProtocolParams,
}

impl Args {
    fn settings(&self) -> anyhow::Result<Settings> {
        if self.miner.trim().is_empty() {
            bail!("miner id is required");
        }
        let miner: Address = self
            .miner
            .trim()
            .parse()
            .with_context(|| format!("invalid miner address `{}`", self.miner))?;
        if self.interval_secs == 0 {
            bail!("refresh interval must be at least one second");
        }
        if let Some(height) = self.height {
            if height < 0 {
                bail!("target height must not be negative, got {height}");
            }
        }
        if self.blocks_per_epoch == 0 || self.block_delay_secs == 0 {
            bail!("blocks per epoch and block delay must be positive");
        }
        if self.block_delay_secs > MAX_BLOCK_DELAY_SECS {
            bail!(
                "block delay must be at most {MAX_BLOCK_DELAY_SECS} seconds, got {}",
                self.block_delay_secs
            );
        }

        Ok(Settings {
            miner,
            interval: Duration::from_secs(self.interval_secs),
            listen_addr: SocketAddr::new(self.listen_host, self.port),
            params: ProtocolParams {
                blocks_per_epoch: self.blocks_per_epoch,
                block_delay_secs: self.block_delay_secs,
            },
        })
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_startup(args: &Args, settings: &Settings, run_id: &str) {
    info!(miner = %settings.miner, "miner configured");
    info!(url = %args.rpc_url, authenticated = args.rpc_token.is_some(), "lotus endpoint configured");
    info!(interval_secs = settings.interval.as_secs(), "refresh interval configured");
    info!(addr = %settings.listen_addr, "exporter bind planned");
    info!(%run_id, "run initialized");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let settings = args.settings()?;
    let run_id = Uuid::new_v4().to_string();
    log_startup(&args, &settings, &run_id);

    let client: Arc<dyn ChainQuery> = Arc::new(LotusClient::new(
        args.rpc_url.clone(),
        args.rpc_token.clone(),
        Duration::from_secs(args.rpc_timeout_secs),
    )?);
    let reference = resolve_reference(client.as_ref(), args.height).await?;

    let store = SnapshotStore::new();
    let metrics = MetricsHandle::new(store.clone(), settings.miner.as_str())?;

    let aggregator =
        SnapshotAggregator::new(client, settings.miner.clone(), reference, settings.params);
    let scheduler = Scheduler::new(aggregator, store, settings.interval)
        .with_refresh_metrics(metrics.refresh_metrics());
    let scheduler_task = task::spawn(scheduler.run());
    task::spawn(async move {
        if let Err(err) = scheduler_task.await {
            tracing::error!(error = ?err, "scheduler task stopped, snapshots are no longer refreshed");
        }
    });

    info!(
        run_id = %run_id,
        miner = %settings.miner,
        addr = %settings.listen_addr,
        "ready"
    );
    metrics.serve(settings.listen_addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct VecWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for VecWriter {
        type Writer = VecWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn defaults_follow_head_every_minute_on_9002() {
        let args = Args::parse_from(["exporterd", "--miner", "f01000"]);
        let settings = args.settings().expect("defaults should validate");
        assert_eq!(settings.interval, Duration::from_secs(60));
        assert_eq!(settings.listen_addr, "0.0.0.0:9002".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.params, ProtocolParams::default());
        assert_eq!(args.height, None);
        assert_eq!(args.rpc_url, DEFAULT_RPC_URL);
    }

    #[test]
    fn short_flags_match_the_classic_exporter() {
        let args = Args::parse_from([
            "exporterd", "-m", "f01000", "-i", "30", "-t", "2000000", "-p", "9100",
        ]);
        let settings = args.settings().expect("flags should validate");
        assert_eq!(settings.miner.as_str(), "f01000");
        assert_eq!(settings.interval, Duration::from_secs(30));
        assert_eq!(args.height, Some(2_000_000));
        assert_eq!(settings.listen_addr.port(), 9100);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let err = Args::parse_from(["exporterd", "--miner", "miner-1"])
            .settings()
            .expect_err("bad address");
        assert!(err.to_string().contains("invalid miner address `miner-1`"));

        let err = Args::parse_from(["exporterd", "--miner", " "])
            .settings()
            .expect_err("blank miner");
        assert!(err.to_string().contains("miner id is required"));

        let err = Args::parse_from(["exporterd", "--miner", "f01000", "--height", "-3"])
            .settings()
            .expect_err("negative height");
        assert!(err.to_string().contains("must not be negative"));

        let err = Args::parse_from(["exporterd", "--miner", "f01000", "--interval-secs", "0"])
            .settings()
            .expect_err("zero interval");
        assert!(err.to_string().contains("at least one second"));

        let err = Args::parse_from([
            "exporterd",
            "--miner",
            "f01000",
            "--block-delay-secs",
            "100000000000000",
        ])
        .settings()
        .expect_err("oversized block delay");
        assert!(err.to_string().contains("block delay must be at most 3600 seconds"));
    }

    #[test]
    fn missing_miner_is_a_parse_error() {
        // guard against a MINER_ID leaking in from the environment
        if std::env::var_os("MINER_ID").is_some() {
            return;
        }
        assert!(Args::try_parse_from(["exporterd"]).is_err());
    }

    #[test]
    fn startup_logs_include_configuration() {
        let args = Args::parse_from([
            "exporterd",
            "--miner",
            "f01000",
            "--rpc-url",
            "http://127.0.0.1:1234/rpc/v0",
            "--port",
            "9100",
        ]);
        let settings = args.settings().expect("settings");
        let run_id = Uuid::nil().to_string();
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = VecWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_writer(writer)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            log_startup(&args, &settings, &run_id);
        });

        let output =
            String::from_utf8(buffer.lock().unwrap().clone()).expect("log output should be utf8");
        assert!(output.contains("miner configured"));
        assert!(output.contains("lotus endpoint configured"));
        assert!(output.contains("refresh interval configured"));
        assert!(output.contains("exporter bind planned"));
        assert!(output.contains("run initialized"));
        assert!(output.contains("f01000"));
        assert!(output.contains(&args.rpc_url));
        assert!(output.contains("0.0.0.0:9100"));
        assert!(output.contains(&run_id));
    }
}
