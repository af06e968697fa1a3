mod candidate_generator;
mod config;
mod db_manager;
mod http_fetcher;
mod image_pipeline;
mod match_manager;
mod match_orchestrator;
mod match_scorer;
mod media_file_discovery;
mod metadata_tags;
mod normalize;
mod protocol;
mod scrapers;
mod tagger;
mod tracklists_api;
mod web_search;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::broadcast;

use candidate_generator::CandidateGenerator;
use config::{default_config_path, load_or_create_config, Config};
use db_manager::{DbManager, TrackStore};
use http_fetcher::{PageFetcher, UreqFetcher};
use match_manager::MatchManager;
use match_orchestrator::MatchOrchestrator;
use media_file_discovery::LibraryScanner;
use metadata_tags::{LoftyTagCodec, TagCodec};
use protocol::{BatchSelection, MatchMessage, Message, TrackStatus};
use scrapers::ScraperRegistry;
use tagger::TagManager;
use tracklists_api::TracklistsClient;
use web_search::WebSearchClient;

const BUS_CAPACITY: usize = 256;
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(500);
const BUS_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Finds the tracklist behind each DJ set in a music library and tags the files.
#[derive(Parser)]
#[command(name = "djset-tagger", version, about)]
struct Cli {
    /// Config file; defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan folders (or the configured library folders) for audio files.
    Scan { folders: Vec<PathBuf> },
    /// Find tracklist candidates for one track.
    Match { track_id: i64 },
    /// Match several tracks in sequence.
    Batch {
        /// Track ids; when omitted, every track with `--status` is matched.
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
        #[arg(long, default_value = "pending")]
        status: String,
    },
    /// List stored candidates of a track.
    Candidates { track_id: i64 },
    /// Accept a stored candidate for a track.
    Select { track_id: i64, candidate_id: i64 },
    /// Show which tags would change when tagging a track.
    Preview { track_id: i64 },
    /// Write matched tags and cover art; all matched tracks when no ids are given.
    Tag { track_ids: Vec<i64> },
    /// List tracks, optionally only those with one status.
    Tracks {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show track counts per status.
    Status,
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn parse_status(value: &str) -> Result<TrackStatus, String> {
    TrackStatus::parse(value).ok_or_else(|| format!("unknown track status: {value}"))
}

/// Calls `on_stop` once a line is entered on stdin. End of input never stops.
fn spawn_stop_listener<F>(on_stop: F)
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        let mut line = String::new();
        if let Ok(read) = std::io::stdin().lock().read_line(&mut line) {
            if read > 0 {
                on_stop();
            }
        }
    });
}

struct Services {
    config: Config,
    store: Arc<DbManager>,
    fetcher: Arc<dyn PageFetcher>,
    codec: Arc<dyn TagCodec>,
}

impl Services {
    fn open(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Arc::new(DbManager::open(&config.library.database_path)?);
        let fetcher: Arc<dyn PageFetcher> = Arc::new(UreqFetcher::new(&config.http));
        Ok(Self {
            config,
            store,
            fetcher,
            codec: Arc::new(LoftyTagCodec),
        })
    }

    fn orchestrator(&self) -> Arc<MatchOrchestrator> {
        let search =
            WebSearchClient::with_default_providers(Arc::clone(&self.fetcher), &self.config.search);
        let scrapers = ScraperRegistry::new(Arc::clone(&self.fetcher));
        let generator = CandidateGenerator::new(search, scrapers, &self.config.search);
        Arc::new(MatchOrchestrator::new(
            Arc::clone(&self.store) as Arc<dyn TrackStore>,
            Arc::new(generator),
            Arc::new(TracklistsClient::new(Arc::clone(&self.fetcher))),
            self.config.matching.clone(),
            self.config.search.max_documents,
        ))
    }

    fn tag_manager(&self) -> TagManager {
        TagManager::new(
            Arc::clone(&self.store) as Arc<dyn TrackStore>,
            Arc::clone(&self.codec),
            Arc::clone(&self.fetcher),
            self.config.tagging.clone(),
        )
    }
}

struct MatchWorker {
    bus_sender: broadcast::Sender<Message>,
    observer: broadcast::Receiver<Message>,
    handle: thread::JoinHandle<()>,
}

/// Starts the match worker with a bus handle and a subscribed observer.
fn start_match_manager(orchestrator: Arc<MatchOrchestrator>) -> MatchWorker {
    let (bus_sender, _) = broadcast::channel(BUS_CAPACITY);
    let observer = bus_sender.subscribe();
    let manager_bus_receiver = bus_sender.subscribe();
    let manager_bus_sender = bus_sender.clone();
    let handle = thread::spawn(move || {
        let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut match_manager =
                MatchManager::new(manager_bus_receiver, manager_bus_sender, orchestrator);
            match_manager.run();
        }));
        if let Err(payload) = run_result {
            log::error!(
                "MatchManager thread terminated due to panic: {}",
                panic_payload_to_string(payload.as_ref())
            );
        }
    });
    MatchWorker {
        bus_sender,
        observer,
        handle,
    }
}

/// Waits until `accept` returns true for a match message. Returns false when the
/// bus closes or the worker thread has exited with nothing left to read.
fn wait_for_match_message<F>(
    observer: &mut broadcast::Receiver<Message>,
    worker: &thread::JoinHandle<()>,
    mut accept: F,
) -> bool
where
    F: FnMut(&MatchMessage) -> bool,
{
    loop {
        match observer.try_recv() {
            Ok(Message::Match(message)) => {
                if accept(&message) {
                    return true;
                }
            }
            Err(broadcast::error::TryRecvError::Empty) => {
                if worker.is_finished() {
                    warn!("MatchManager exited before replying");
                    return false;
                }
                thread::sleep(BUS_POLL_INTERVAL);
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!("Observer lagged by {} messages", skipped);
            }
            Err(broadcast::error::TryRecvError::Closed) => return false,
        }
    }
}

fn run_match(services: &Services, track_id: i64) -> Result<(), String> {
    let MatchWorker {
        bus_sender,
        mut observer,
        handle,
    } = start_match_manager(services.orchestrator());
    let _ = bus_sender.send(Message::Match(MatchMessage::RequestMatch { track_id }));
    let replied = wait_for_match_message(&mut observer, &handle, |message| match message {
        MatchMessage::MatchFinished(outcome) => {
            println!(
                "track {}: {} ({} candidates)",
                outcome.track_id,
                outcome.status.as_str(),
                outcome.candidate_count
            );
            if let Some(matched) = &outcome.matched {
                println!(
                    "  {} - {} [{:.1}] {}",
                    matched.artist, matched.title, matched.confidence, matched.tracklist_url
                );
            }
            true
        }
        MatchMessage::MatchFailed { track_id, error } => {
            println!("track {track_id}: failed: {error}");
            true
        }
        _ => false,
    });
    if replied {
        Ok(())
    } else {
        Err(format!("match worker stopped before track {track_id} finished"))
    }
}

fn run_batch(services: &Services, ids: Vec<i64>, status: &str) -> Result<(), String> {
    let selection = if ids.is_empty() {
        BatchSelection::Status(parse_status(status)?)
    } else {
        BatchSelection::Ids(ids)
    };
    let MatchWorker {
        bus_sender,
        mut observer,
        handle,
    } = start_match_manager(services.orchestrator());
    let _ = bus_sender.send(Message::Match(MatchMessage::RequestBatch(selection)));
    let stop_sender = bus_sender.clone();
    spawn_stop_listener(move || {
        let _ = stop_sender.send(Message::Match(MatchMessage::CancelBatch));
        let _ = stop_sender.send(Message::Match(MatchMessage::RequestProgress));
    });
    println!("press Enter to stop after the current track");
    let finished = wait_for_match_message(&mut observer, &handle, |message| match message {
        MatchMessage::Progress(progress) => {
            info!(
                "Batch progress: {}/{} (current track {:?})",
                progress.processed, progress.total, progress.current_track
            );
            false
        }
        MatchMessage::BatchFinished(progress) => {
            println!(
                "processed {}/{}: {} matched, {} pending, {} failed",
                progress.processed,
                progress.total,
                progress.matched,
                progress.pending,
                progress.failed
            );
            true
        }
        _ => false,
    });
    if finished {
        Ok(())
    } else {
        Err("match worker stopped before the batch finished".to_string())
    }
}

fn run_scan(services: &Services, folders: Vec<PathBuf>) -> Result<(), String> {
    let scanner = Arc::new(LibraryScanner::new(
        Arc::clone(&services.store) as Arc<dyn TrackStore>,
        Arc::clone(&services.codec),
        services.config.library.clone(),
    ));
    let stop_scanner = Arc::clone(&scanner);
    spawn_stop_listener(move || stop_scanner.stop());
    println!("press Enter to stop the scan");

    let worker_scanner = Arc::clone(&scanner);
    let worker = thread::spawn(move || worker_scanner.scan(&folders));
    while !worker.is_finished() {
        thread::sleep(PROGRESS_POLL_INTERVAL);
        let progress = scanner.status_snapshot();
        if progress.running {
            info!(
                "Scan progress: {}/{} {}",
                progress.processed,
                progress.total,
                progress.current_file.as_deref().unwrap_or_default()
            );
        }
    }
    let progress = worker
        .join()
        .map_err(|payload| panic_payload_to_string(payload.as_ref()))?;

    println!(
        "found {}, added {}, skipped {}, filtered {}, errors {}{}",
        progress.files_found,
        progress.files_added,
        progress.files_skipped,
        progress.files_filtered,
        progress.errors.len(),
        if progress.stopped { " (stopped)" } else { "" }
    );
    for error in &progress.errors {
        println!("  {error}");
    }
    Ok(())
}

fn run_tag(services: &Services, track_ids: Vec<i64>) -> Result<(), String> {
    let manager = Arc::new(services.tag_manager());
    let stop_manager = Arc::clone(&manager);
    spawn_stop_listener(move || stop_manager.cancel_batch());
    println!("press Enter to stop after the current track");

    let worker_manager = Arc::clone(&manager);
    let worker = thread::spawn(move || worker_manager.batch_tag(&track_ids));
    while !worker.is_finished() {
        thread::sleep(PROGRESS_POLL_INTERVAL);
        let progress = manager.status_snapshot();
        if progress.running {
            info!("Tag progress: {}/{}", progress.processed, progress.total);
        }
    }
    let progress = worker
        .join()
        .map_err(|payload| panic_payload_to_string(payload.as_ref()))?
        .map_err(|error| error.to_string())?;

    println!(
        "tagged {}/{} ({} failed){}",
        progress.tagged,
        progress.total,
        progress.failed,
        if progress.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_file = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = load_or_create_config(&config_file)?;
    let services = Services::open(config)?;

    match cli.command {
        Commands::Scan { folders } => run_scan(&services, folders)?,
        Commands::Match { track_id } => run_match(&services, track_id)?,
        Commands::Batch { ids, status } => run_batch(&services, ids, &status)?,
        Commands::Candidates { track_id } => {
            for candidate in services.orchestrator().candidates_for_track(track_id)? {
                println!(
                    "{:>6}  {:>5.1}  {:<24} {} - {}  {}",
                    candidate.id.unwrap_or_default(),
                    candidate.confidence,
                    candidate.match_type.as_str(),
                    candidate.dj,
                    candidate.title,
                    candidate.tracklist_url
                );
            }
        }
        Commands::Select {
            track_id,
            candidate_id,
        } => {
            let matched = services
                .orchestrator()
                .select_candidate(track_id, candidate_id)?;
            println!("track {track_id}: matched to {} - {}", matched.artist, matched.title);
        }
        Commands::Preview { track_id } => {
            let preview = services.tag_manager().preview(track_id)?;
            println!(
                "{} (currently {} - {})",
                preview.filename, preview.current.artist, preview.current.title
            );
            if preview.changes.is_empty() {
                println!("  no changes");
            }
            for change in &preview.changes {
                println!(
                    "  {}: {:?} -> {:?}",
                    change.field, change.old_value, change.new_value
                );
            }
        }
        Commands::Tag { track_ids } => run_tag(&services, track_ids)?,
        Commands::Tracks { status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            for track in services.store.list_tracks(status)? {
                let matched = track
                    .matched
                    .as_ref()
                    .map(|matched| format!("  -> {} - {}", matched.artist, matched.title))
                    .unwrap_or_default();
                let error = track
                    .error_message
                    .as_deref()
                    .map(|message| format!("  ({message})"))
                    .unwrap_or_default();
                println!(
                    "{:>6}  {:<8} {}{}{}",
                    track.id,
                    track.status.as_str(),
                    track.filename,
                    matched,
                    error
                );
            }
        }
        Commands::Status => {
            for (status, count) in services.store.status_counts()? {
                println!("{:<8} {}", status.as_str(), count);
            }
        }
    }

    info!("Exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::wait_for_match_message;
    use crate::protocol::{MatchMessage, Message};

    #[test]
    fn test_wait_returns_when_worker_exits_without_reply() {
        let (bus_sender, mut observer) = broadcast::channel::<Message>(8);
        let worker = thread::spawn(|| {});
        let replied = wait_for_match_message(&mut observer, &worker, |_| true);
        assert!(!replied);
        drop(bus_sender);
    }

    #[test]
    fn test_wait_accepts_reply_sent_by_live_worker() {
        let (bus_sender, mut observer) = broadcast::channel::<Message>(8);
        let worker_sender = bus_sender.clone();
        let worker = thread::spawn(move || {
            let _ = worker_sender.send(Message::Match(MatchMessage::RequestProgress));
            thread::sleep(Duration::from_millis(200));
        });
        let replied = wait_for_match_message(&mut observer, &worker, |message| {
            matches!(message, MatchMessage::RequestProgress)
        });
        assert!(replied);
        drop(bus_sender);
    }
}
