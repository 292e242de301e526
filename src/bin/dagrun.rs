//! dagrun - load a pipeline config and run it until interrupted.

use std::panic;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dagrt::config::{DagConfig, RuntimeKnobs};
use dagrt::frame::Frame;
use dagrt::processor::{Op, Status};
use dagrt::streaming::{DagStreaming, OpFactory};

/// Built-in demo algorithms, registered by name. A real deployment links its own
/// `OpFactory` implementation against this crate instead of using this one.
struct DemoRegistry;

impl OpFactory for DemoRegistry {
    fn create(&self, algorithm: &str) -> Option<Box<dyn Op>> {
        match algorithm {
            "identity" => Some(Box::new(Identity)),
            "logger" => Some(Box::new(Logger)),
            _ => None,
        }
    }
}

struct Identity;
impl Op for Identity {
    fn init(&mut self, _config: Option<&str>) -> bool {
        true
    }
    fn process(&mut self, frames: &[Option<Arc<Frame>>], _latests: &[Option<Arc<Frame>>], out: &mut Option<Frame>) -> Status {
        if let Some(Some(f)) = frames.first() {
            *out = Some(f.deep_copy());
        }
        Status::Succ
    }
    fn name(&self) -> &str {
        "identity"
    }
}

struct Logger;
impl Op for Logger {
    fn init(&mut self, _config: Option<&str>) -> bool {
        true
    }
    fn process(&mut self, frames: &[Option<Arc<Frame>>], _latests: &[Option<Arc<Frame>>], out: &mut Option<Frame>) -> Status {
        if let Some(Some(f)) = frames.first() {
            log::info!("logger: utime={} sender={}", f.utime, f.sender);
            *out = Some(f.deep_copy());
        }
        Status::Succ
    }
    fn name(&self) -> &str {
        "logger"
    }
}

fn run() -> anyhow::Result<()> {
    let config_path: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: dagrun <pipeline.json>"))?;

    let text = std::fs::read_to_string(&config_path)?;
    let config: DagConfig = serde_json::from_str(&text)?;

    let streaming = DagStreaming::build(&config, RuntimeKnobs::default(), &DemoRegistry)?;
    log::info!("resolved {} operator(s) from {}", config.op.len(), config_path.display());

    streaming.schedule();
    log::info!("pipeline running; press Ctrl+C to stop");

    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let flag = running.clone();
    ctrlc_handler(move || flag.store(false, std::sync::atomic::Ordering::SeqCst));
    while running.load(std::sync::atomic::Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    streaming.shutdown();
    Ok(())
}

/// Best-effort Ctrl+C hook. A dedicated crate (e.g. `ctrlc`) is the idiomatic choice for
/// production signal handling; this demo binary has no other use for a signal-handling
/// dependency, so a thread watching for EOF on stdin stands in for it here instead.
fn ctrlc_handler(on_signal: impl FnOnce() + Send + 'static) {
    std::thread::spawn(move || {
        use std::io::Read;
        let mut buf = [0u8; 1];
        let _ = std::io::stdin().read(&mut buf);
        on_signal();
    });
}

fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("dagrun fatal error:");
        eprintln!("{panic_info}");
        if let Some(location) = panic_info.location() {
            eprintln!("location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("dagrt {} — dataflow runtime for perception pipelines", dagrt::VERSION);

    let result = run();
    if let Err(e) = &result {
        log::error!("dagrun failed: {e}");
    }
    result
}
