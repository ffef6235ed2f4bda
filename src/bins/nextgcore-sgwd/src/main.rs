//! NextGCore SGW (Serving Gateway)
//!
//! EPC Serving Gateway daemon. Owns the session and bearer tables, answers
//! S11 and S5-C signaling, relays user data between S1-U and S5-U, and
//! buffers downlink data for idle UEs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;

use nextgcore_sgwd::config::{SgwConfig, DEFAULT_CONFIG_PATH};
use nextgcore_sgwd::context::{sgw_context_final, sgw_context_init, SgwContext};
use nextgcore_sgwd::event::{EventQueue, EventReceiver, EventSender, SgwEvent};
use nextgcore_sgwd::gtp_path::{self, GtpInterface};
use nextgcore_sgwd::sm::SgwFsm;

/// Longest wait on the queue before timers and sockets are polled again
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// NextGCore SGW - Serving Gateway
#[derive(Parser, Debug)]
#[command(name = "nextgcore-sgwd")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "EPC Serving Gateway")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Disable color output
    #[arg(long)]
    no_color: bool,
}

/// SGW application state
struct SgwApp {
    running: Arc<AtomicBool>,
    sgw_fsm: SgwFsm,
    ctx: Arc<Mutex<SgwContext>>,
    queue: EventSender,
    events: EventReceiver,
}

impl SgwApp {
    fn init(conf: &SgwConfig) -> Result<Self> {
        log::info!("Initializing SGW...");

        let (queue, events) = EventQueue::create(conf.queue.capacity);
        let ctx = sgw_context_init(conf, queue.clone())?;

        {
            let mut guard = ctx.lock().unwrap_or_else(|e| e.into_inner());
            gtp_path::gtp_open(&mut guard).context("Failed to open GTP path")?;
        }

        let mut sgw_fsm = SgwFsm::new();
        sgw_fsm.entry();

        log::info!("SGW initialized successfully");
        Ok(Self {
            running: Arc::new(AtomicBool::new(true)),
            sgw_fsm,
            ctx,
            queue,
            events,
        })
    }

    fn run(&mut self) {
        log::info!("SGW running...");

        while self.running.load(Ordering::SeqCst) {
            self.poll_user_plane();
            self.process_timers();

            if let Some(event) = self.events.pop_timeout(POLL_INTERVAL) {
                self.dispatch(event);
                while let Some(event) = self.events.try_pop() {
                    self.dispatch(event);
                }
            }
        }

        log::info!("SGW main loop exited");
    }

    fn dispatch(&mut self, event: SgwEvent) {
        let mut ctx = self.ctx.lock().unwrap_or_else(|e| e.into_inner());
        let outputs = self.sgw_fsm.dispatch(&mut ctx, event);
        for output in &outputs {
            if let Err(e) = gtp_path::gtp_send(&ctx, output) {
                log::error!("Send failed: {}", e);
            }
        }
    }

    /// Queue every pending G-PDU from the S1-U and S5-U sockets
    fn poll_user_plane(&self) {
        let ctx = self.ctx.lock().unwrap_or_else(|e| e.into_inner());
        self.drain_gtpu(&ctx.s1u, "S1-U", |teid, pkt| SgwEvent::UplinkData { teid, pkt });
        self.drain_gtpu(&ctx.s5u, "S5-U", |teid, pkt| SgwEvent::DownlinkData { teid, pkt });
    }

    fn drain_gtpu(
        &self,
        iface: &GtpInterface,
        name: &str,
        to_event: impl Fn(u32, Bytes) -> SgwEvent,
    ) {
        loop {
            match gtp_path::gtpu_recv(iface) {
                Ok(Some((teid, pkt))) => {
                    if self.queue.try_push(to_event(teid, pkt)).is_err() {
                        log::warn!("{} G-PDU for TEID[{:#x}] dropped", name, teid);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("{} receive failed: {}", name, e);
                    break;
                }
            }
        }
    }

    /// Turn expired timers into queue events
    fn process_timers(&self) {
        let expired = {
            let mut ctx = self.ctx.lock().unwrap_or_else(|e| e.into_inner());
            ctx.timer_mgr.check_expired(Instant::now())
        };
        for (timer_id, bearer_index) in expired {
            log::debug!("Timer expired: {} bearer {}", timer_id.name(), bearer_index);
            let event = SgwEvent::Timer {
                timer_id,
                bearer_index,
            };
            if self.queue.try_push(event).is_err() {
                log::warn!("Timer event for bearer {} deferred", bearer_index);
                let mut ctx = self.ctx.lock().unwrap_or_else(|e| e.into_inner());
                ctx.timer_mgr.refire(timer_id, bearer_index);
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        log::info!("Shutting down SGW...");

        self.sgw_fsm.exit();
        sgw_context_final()?;

        log::info!("SGW shutdown complete");
        Ok(())
    }

    fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let conf = SgwConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration {}", args.config))?;

    let level = args
        .log_level
        .as_deref()
        .or(conf.logger.level.as_deref())
        .map_or(log::LevelFilter::Info, parse_level);

    let write_style = if args.no_color {
        env_logger::WriteStyle::Never
    } else {
        env_logger::WriteStyle::Auto
    };

    env_logger::Builder::new()
        .filter_level(level)
        .write_style(write_style)
        .format_timestamp_millis()
        .init();

    log::info!("NextGCore SGW v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration: {}", args.config);

    let mut app = SgwApp::init(&conf)?;

    let running = app.running_flag();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    app.run();
    app.shutdown()?;

    log::info!("NextGCore SGW terminated");
    Ok(())
}
