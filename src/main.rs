// tunelink - command line client for the streaming backend
// Search and charts, tracked downloads, and listening with autoplay

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tunelink::api::Catalog;
use tunelink::playback::{format_clock, HeadlessMedia};
use tunelink::{Config, HttpBackend, PlayerEvent, Session, Song, TrackerEvent};

#[derive(Parser)]
#[command(name = "tunelink")]
#[command(about = "Search, download and listen through the streaming backend")]
struct Args {
    /// Enable developer logging (stderr + debug output)
    #[arg(long, global = true)]
    dev: bool,

    /// Backend base url, overrides the config file
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search the catalog
    Search { query: String },

    /// Show a chart listing
    Charts {
        #[arg(default_value = "trending")]
        category: String,
    },

    /// Download a search result and follow the job until it finishes
    Download {
        query: String,
        /// Which search result to take (1-based)
        #[arg(long, default_value_t = 1)]
        pick: usize,
        /// Also copy the finished file into the output directory
        #[arg(long)]
        fetch: bool,
    },

    /// Play a search result and keep going with recommendations
    Listen {
        query: String,
        #[arg(long, default_value_t = 1)]
        pick: usize,
        /// Stop after this many tracks
        #[arg(long)]
        max_tracks: Option<usize>,
    },

    /// Manage saved songs
    #[cfg(feature = "favorites")]
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
}

#[cfg(feature = "favorites")]
#[derive(Subcommand)]
enum FavoritesAction {
    List,
    /// Save a search result
    Add {
        query: String,
        #[arg(long, default_value_t = 1)]
        pick: usize,
    },
    Remove { id: i64 },
    /// Listen starting from a saved song
    Play {
        id: i64,
        #[arg(long)]
        max_tracks: Option<usize>,
    },
}

fn init_logging(dev: bool) -> Result<WorkerGuard> {
    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tunelink.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tunelink=debug"));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);
    let stderr_layer = dev.then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(base_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.dev)?;

    let mut config = Config::load()?;
    if let Some(url) = args.api_url {
        config.api.base_url = url;
    }
    info!("tunelink starting against {}", config.api.base_url);

    let backend = Arc::new(HttpBackend::from_config(&config.api)?);

    match args.command {
        Command::Search { query } => {
            let songs = backend.search(&query).await?;
            print_songs(&songs);
        }
        Command::Charts { category } => {
            let songs = backend.charts(&category).await?;
            print_songs(&songs);
        }
        Command::Download { query, pick, fetch } => {
            let song = pick_song(&backend, &query, pick).await?;
            download(backend, &config, song, fetch).await?;
        }
        Command::Listen { query, pick, max_tracks } => {
            let song = pick_song(&backend, &query, pick).await?;
            listen(backend, &config, song, max_tracks).await?;
        }
        #[cfg(feature = "favorites")]
        Command::Favorites { action } => favorites(backend, &config, action).await?,
    }

    Ok(())
}

fn print_songs(songs: &[Song]) {
    if songs.is_empty() {
        println!("Nothing found.");
        return;
    }
    for (i, song) in songs.iter().enumerate() {
        let marker = if song.is_playable() { " " } else { "x" };
        let length = song.duration_label.as_deref().unwrap_or("");
        println!("{:>3}. [{}] {} {}", i + 1, marker, song.display_title(), length);
    }
}

async fn pick_song(backend: &HttpBackend, query: &str, pick: usize) -> Result<Song> {
    let songs = backend
        .search(query)
        .await
        .with_context(|| format!("search for '{}' failed", query))?;

    match pick.checked_sub(1).and_then(|i| songs.get(i)) {
        Some(song) => Ok(song.clone()),
        None => bail!("'{}' has {} results, can't pick #{}", query, songs.len(), pick),
    }
}

fn start_session(backend: Arc<HttpBackend>, config: &Config) -> (Session<HttpBackend>, tunelink::SessionEvents) {
    let (media, media_events) =
        HeadlessMedia::new(Duration::from_millis(250), config.playback.headless_track_secs);
    Session::start(backend, config, Box::new(media), media_events)
}

async fn download(backend: Arc<HttpBackend>, config: &Config, song: Song, fetch: bool) -> Result<()> {
    let (session, mut events) = start_session(Arc::clone(&backend), config);
    let job_id = session.downloads.submit(&song).await?;
    println!("Queued '{}' as job {}", song.display_title(), job_id);

    let finished = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopped watching job {}", job_id);
                break None;
            }
            event = events.downloads.recv() => match event {
                Some(TrackerEvent::Updated { job, .. }) => {
                    println!("  {} {:.0}%", job.status, job.progress);
                }
                Some(TrackerEvent::Finished { job, .. }) => break Some(job),
                Some(TrackerEvent::Registered(_)) => {}
                None => break None,
            },
        }
    };
    session.shutdown().await;

    let Some(job) = finished else { return Ok(()) };
    if let Some(failure) = job.failure(&job_id) {
        return Err(failure.into());
    }

    let file = job.completed_file().unwrap_or_default().to_string();
    println!("Finished: {}", file);
    if fetch && !file.is_empty() {
        let path = backend.fetch_file(&file, &config.downloads.output_dir).await?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}

async fn listen(
    backend: Arc<HttpBackend>,
    config: &Config,
    song: Song,
    max_tracks: Option<usize>,
) -> Result<()> {
    let (session, mut events) = start_session(backend, config);
    session.player.play_song(song)?;

    let mut progress = session.player.subscribe();
    let mut started = 0usize;
    let mut last_logged = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.playback.recv() => match event {
                Some(PlayerEvent::TrackStarted { song, autoplay }) => {
                    started += 1;
                    if max_tracks.is_some_and(|max| started > max) {
                        break;
                    }
                    let via = if autoplay { " (autoplay)" } else { "" };
                    println!("Now playing: {}{}", song.display_title(), via);
                }
                Some(PlayerEvent::TrackFinished(song)) => debug!("Finished '{}'", song.title),
                Some(PlayerEvent::AutoplayStopped(song)) => {
                    println!("Nothing to play after '{}'", song.title);
                    break;
                }
                None => break,
            },
            Ok(()) = progress.changed() => {
                let state = progress.borrow_and_update().clone();
                let tens = (state.played_secs / 10.0) as u64;
                if state.is_playing() && last_logged != Some(tens) {
                    last_logged = Some(tens);
                    debug!(
                        "{} / {}",
                        format_clock(state.played_secs),
                        format_clock(state.duration_secs)
                    );
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

#[cfg(feature = "favorites")]
async fn favorites(backend: Arc<HttpBackend>, config: &Config, action: FavoritesAction) -> Result<()> {
    use tunelink::favorites::{FavoritesDatabase, FavoritesStore};

    let store = FavoritesDatabase::new(&config.favorites.database_path)?;
    match action {
        FavoritesAction::List => {
            let records = store.list()?;
            if records.is_empty() {
                println!("No favorites yet.");
            }
            for record in records {
                println!(
                    "{:>4}  {} - {}  ({})",
                    record.id,
                    record.title,
                    record.artist,
                    record.created_at.format("%Y-%m-%d")
                );
            }
        }
        FavoritesAction::Add { query, pick } => {
            let song = pick_song(&backend, &query, pick).await?;
            if !song.is_playable() {
                warn!("Saving '{}' without a stream url", song.title);
            }
            let record = store.insert(&song)?;
            println!("Saved '{}' as #{}", record.title, record.id);
        }
        FavoritesAction::Remove { id } => {
            store.remove(id)?;
            println!("Removed #{}", id);
        }
        FavoritesAction::Play { id, max_tracks } => {
            let song = store.get(id)?.to_song();
            listen(backend, config, song, max_tracks).await?;
        }
    }
    Ok(())
}
