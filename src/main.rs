use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use netprobe::messages::{EndReason, SessionMessage};
use netprobe::pinger::{PING_COUNT, PingConfig};
use netprobe::tracer::{TRACEROUTE_ATTEMPTS, TRACEROUTE_MAX_TTL, TRACEROUTE_PORT};
use netprobe::{DestinationPolicy, Diagnostics, DnsResolver, TracerouteConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Prefer IPv6 when a host name resolves to both families
    #[arg(short = '6', long, global = true)]
    ipv6: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send echo requests to a host and report round-trip times
    Ping {
        /// Host name or IP address
        host: String,

        /// Number of echo requests to send
        #[arg(short, long, default_value_t = PING_COUNT)]
        count: usize,

        /// Time to wait for each reply, in milliseconds
        #[arg(short = 'W', long, default_value_t = 2000)]
        timeout_ms: u64,

        /// Pause between probes, in milliseconds
        #[arg(short, long, default_value_t = 500)]
        interval_ms: u64,

        /// Use an unprivileged datagram ICMP socket instead of a raw one
        #[arg(short, long)]
        unprivileged: bool,
    },
    /// Discover the hops between this host and a destination
    Trace {
        /// Host name or IP address
        host: String,

        /// Highest TTL to probe
        #[arg(short, long, default_value_t = TRACEROUTE_MAX_TTL)]
        max_ttl: u8,

        /// Time to wait for each reply, in milliseconds
        #[arg(short = 'w', long, default_value_t = 5000)]
        timeout_ms: u64,

        /// Probes per hop
        #[arg(short = 'q', long, default_value_t = TRACEROUTE_ATTEMPTS)]
        attempts: u8,

        /// Port reported in the banner (ICMP probes do not use it)
        #[arg(short, long, default_value_t = TRACEROUTE_PORT)]
        port: u16,

        /// Skip a hop's remaining probes once the destination has answered
        #[arg(long)]
        stop_at_first_reply: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).context("failed to install Ctrl-C handler")?;

    let (ui_callback_tx, ui_callback_rx) = mpsc::channel::<SessionMessage>();
    let mut diagnostics =
        Diagnostics::new(ui_callback_tx).with_resolver(DnsResolver { prefer_v6: args.ipv6 });

    match args.command {
        Command::Ping { host, count, timeout_ms, interval_ms, unprivileged } => {
            let config = PingConfig {
                count,
                timeout: Duration::from_millis(timeout_ms),
                interval: Duration::from_millis(interval_ms),
                ..PingConfig::default()
            };
            diagnostics = diagnostics.with_ping_config(config);
            diagnostics.start_ping(&host, !unprivileged).context("failed to start ping")?;
        }
        Command::Trace { host, max_ttl, timeout_ms, attempts, port, stop_at_first_reply } => {
            let mut config = TracerouteConfig::from_micros(max_ttl, timeout_ms.saturating_mul(1000), attempts, port);
            if stop_at_first_reply {
                config.destination_policy = DestinationPolicy::StopAtFirstReply;
            }
            println!("traceroute to {}, {} hops max", host, max_ttl);
            diagnostics.start_traceroute_with(&host, config).context("failed to start traceroute")?;
        }
    }

    let end = loop {
        if interrupted.swap(false, Ordering::SeqCst) {
            diagnostics.stop_ping();
            diagnostics.stop_traceroute();
        }
        match ui_callback_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(SessionMessage::ProbeResult(event)) => println!("{}", event),
            Ok(SessionMessage::SessionEnd(end)) => break end,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => bail!("probe thread went away"),
        }
    };
    diagnostics.wait();

    println!("--- {} ---", end);
    if let EndReason::Failed(e) = end.reason {
        return Err(e).context("run failed");
    }
    Ok(())
}
