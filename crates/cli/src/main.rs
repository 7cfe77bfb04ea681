use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use ingest::control::{LoggingInterceptor, MetricsInterceptor, RateLimitInterceptor};
use ingest::decode::DecodeConfig;
use ingest::transport::TcpConnector;
use ingest::{
    ConnectionStatus, DecodePipeline, DecodeWorker, IngestError, InterceptorChain, MetricsCollector,
    ReconnectPolicy, Session, SessionConfig, SessionRegistry, StreamDescriptor, StreamKind,
    TokenBucket, VideoCodec,
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Requests in one connect: OPTIONS, DESCRIBE with its authenticated retry,
/// up to three SETUPs and PLAY.
const HANDSHAKE_BURST: u32 = 8;

#[derive(Parser)]
#[command(
    name = "rtsp-probe",
    about = "Connect to an RTSP camera, list its streams and count delivered frames"
)]
struct Args {
    /// Camera URL (rtsp://[user[:pass]@]host[:port]/path)
    url: String,

    #[arg(long, short)]
    username: Option<String>,

    #[arg(long, short)]
    password: Option<String>,

    /// Handshake timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// How long to play, in seconds
    #[arg(long, short, default_value_t = 10)]
    duration: u64,

    /// Skip audio streams
    #[arg(long)]
    no_audio: bool,

    /// Also set up metadata streams
    #[arg(long)]
    metadata: bool,

    /// Decode the first video stream on a worker thread
    #[arg(long)]
    decode: bool,

    /// Reconnect attempts after a failure (0 retries forever)
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Cap on sustained RTSP requests per second (a handshake may burst)
    #[arg(long)]
    max_rps: Option<u32>,
}

/// Frame and byte counts, indexed by [`StreamKind::slot`].
#[derive(Default)]
struct Counters {
    frames: [AtomicU64; 3],
    bytes: [AtomicU64; 3],
    decoded: AtomicU64,
}

impl Counters {
    fn record(&self, kind: StreamKind, len: usize) {
        self.frames[kind.slot()].fetch_add(1, Ordering::Relaxed);
        self.bytes[kind.slot()].fetch_add(len as u64, Ordering::Relaxed);
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("rtsp-probe: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the camera ever reached `Playing`.
fn run(args: &Args) -> ingest::Result<bool> {
    let collector = Arc::new(Mutex::new(MetricsCollector::new()));
    let mut chain = InterceptorChain::new()
        .with(LoggingInterceptor)
        .with(MetricsInterceptor::new(collector.clone()));
    if let Some(rps) = args.max_rps {
        chain = chain.with(RateLimitInterceptor::new(request_limiter(rps)));
    }

    let registry =
        SessionRegistry::with_connector(Arc::new(TcpConnector::with_chain(Arc::new(chain))));
    let handle = registry.create(SessionConfig {
        enable_audio: !args.no_audio,
        enable_metadata: args.metadata,
        ..SessionConfig::default()
    });
    let session = registry.session(handle)?;

    let (status_tx, status_rx) = mpsc::channel();
    session.set_status_callback(move |status, message| {
        let _ = status_tx.send((status, message.map(str::to_string)));
    });

    let counters = Arc::new(Counters::default());
    for kind in StreamKind::ALL {
        let counters = counters.clone();
        session.set_frame_callback(kind, move |frame| counters.record(frame.kind, frame.payload.len()));
    }

    let policy = ReconnectPolicy {
        max_retries: args.retries,
        ..ReconnectPolicy::default()
    };
    let mut backoff = policy.backoff();
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut worker: Option<DecodeWorker> = None;
    let mut played = false;

    while Instant::now() < deadline {
        let connected = session.connect(
            &args.url,
            args.username.as_deref(),
            args.password.as_deref(),
            Some(Duration::from_secs(args.timeout)),
        );

        match connected {
            Ok(true) => {
                backoff.reset();
                print_streams(&session.streams());

                if args.decode && worker.is_none() {
                    worker = start_decoder(&session, &counters)?;
                }
                // statuses left over from earlier attempts
                while status_rx.try_recv().is_ok() {}
                match play(&session, deadline) {
                    Ok(started) => played |= started,
                    Err(e) => tracing::warn!(error = %e, "play failed"),
                }
                if !watch(&status_rx, deadline) {
                    break;
                }
                session.disconnect();
            }
            Ok(false) => {}
            Err(e) if e.is_refusal() => tracing::warn!(error = %e, "connect held back by rate limit"),
            // bad URL or local misconfiguration: retrying cannot help
            Err(e) if !e.is_connection_error() => return Err(e),
            Err(e) => tracing::warn!(error = %e, "connect failed"),
        }

        let Some(delay) = backoff.next() else {
            tracing::warn!(attempts = backoff.attempt(), "giving up");
            break;
        };
        let delay = delay.min(deadline.saturating_duration_since(Instant::now()));
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting");
        thread::sleep(delay);
    }

    registry.destroy(handle)?;

    let dropped = worker.as_ref().map_or(0, DecodeWorker::dropped_frames);
    if let Some(worker) = worker {
        let mut pipeline = worker.stop()?;
        pipeline.release();
    }

    report(&counters, dropped, &collector.lock());
    Ok(played)
}

/// `rps` per second sustained, with room for one handshake burst.
fn request_limiter(rps: u32) -> TokenBucket {
    let rps = rps.max(1);
    TokenBucket::new(rps.max(HANDSHAKE_BURST), Duration::from_secs(1), rps)
}

/// PLAY, waiting out rate-limit refusals until the deadline.
fn play(session: &Session, deadline: Instant) -> ingest::Result<bool> {
    loop {
        match session.play() {
            Err(IngestError::RateLimited { wait }) if Instant::now() + wait < deadline => {
                tracing::debug!(wait_ms = wait.as_millis() as u64, "PLAY held back by rate limit");
                thread::sleep(wait);
            }
            result => return result,
        }
    }
}

/// Wait for an error or the deadline. Returns `true` when the session failed
/// and should be reconnected.
fn watch(status_rx: &Receiver<(ConnectionStatus, Option<String>)>, deadline: Instant) -> bool {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match status_rx.recv_timeout(remaining) {
            Ok((ConnectionStatus::Error, message)) => {
                tracing::warn!(message = message.as_deref().unwrap_or(""), "stream failed");
                return true;
            }
            Ok((status, _)) => tracing::debug!(%status, "status"),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

fn start_decoder(session: &Session, counters: &Arc<Counters>) -> ingest::Result<Option<DecodeWorker>> {
    let Some(stream) = session
        .streams()
        .into_iter()
        .find(|s| s.kind == StreamKind::Video)
    else {
        tracing::warn!("no video stream to decode");
        return Ok(None);
    };

    let codec = VideoCodec::from_label(&stream.codec);
    let config = DecodeConfig::default();
    let mut pipeline = DecodePipeline::with_config(
        codec,
        stream.width.unwrap_or(0),
        stream.height.unwrap_or(0),
        &config,
    );
    if pipeline.info().is_none() {
        tracing::warn!(%codec, "no decoder available for codec");
        return Ok(None);
    }

    let decoded = counters.clone();
    pipeline.set_callback(Some(Box::new(move |_frame| {
        decoded.decoded.fetch_add(1, Ordering::Relaxed);
    })));
    let worker = DecodeWorker::spawn(pipeline, config.queue_capacity)?;

    // video keeps its counters and also feeds the decoder
    let queue = worker.queue();
    let counters = counters.clone();
    session.set_frame_callback(StreamKind::Video, move |frame| {
        counters.record(frame.kind, frame.payload.len());
        queue.push(frame.clone());
    });
    Ok(Some(worker))
}

fn print_streams(streams: &[StreamDescriptor]) {
    println!("{} stream(s):", streams.len());
    for stream in streams {
        let mut line = format!(
            "  #{} {} {} pt={} clock={}",
            stream.index, stream.kind, stream.codec, stream.payload_type, stream.clock_rate
        );
        if let (Some(width), Some(height)) = (stream.width, stream.height) {
            line.push_str(&format!(" {width}x{height}"));
        }
        if let Some(fps) = stream.fps {
            line.push_str(&format!(" {fps}fps"));
        }
        if let Some(channels) = stream.channels {
            line.push_str(&format!(" ch={channels}"));
        }
        println!("{line}");
    }
}

fn report(counters: &Counters, dropped: u64, metrics: &MetricsCollector) {
    println!("frames:");
    for kind in StreamKind::ALL {
        println!(
            "  {:<9} {:>8} frames {:>12} bytes",
            kind.to_string(),
            counters.frames[kind.slot()].load(Ordering::Relaxed),
            counters.bytes[kind.slot()].load(Ordering::Relaxed)
        );
    }
    println!(
        "  decoded   {:>8} frames ({dropped} dropped before decode)",
        counters.decoded.load(Ordering::Relaxed)
    );

    let totals = metrics.aggregated();
    println!(
        "control: {} requests, {} ok, {} failed, avg {}ms",
        totals.total_requests,
        totals.successful_requests,
        totals.failed_requests,
        totals.average_response_time.as_millis()
    );
    for (code, count) in &totals.requests_by_status_code {
        println!("  {code}: {count}");
    }
}
