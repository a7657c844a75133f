use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use routing::{RouterConfig, RouterFactory};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use track::anchors::closest_eligible;
use track::playback::summarize;
use track::{
    Coordinates, EditingSession, EditorConfig, MemoryStore, Playback, PlaybackData, SegmentSelection,
    SegmentStatistics, TimeRange, TrackFile, Viewport,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "track-cli")]
#[command(about = "GPS track editor CLI - Headless anchor editing and playback")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON with `editor` and `router` sections)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tracks, segments and anchors of a file
    Info {
        /// Track file path
        file: PathBuf,
    },

    /// Flag anchors with zoom levels on segments that have none
    Levels {
        /// Track file path
        file: PathBuf,

        /// Output file path (defaults to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Move an anchor and re-route its neighbourhood
    Move {
        /// Track file path
        file: PathBuf,

        #[arg(long, default_value = "0")]
        track: usize,

        #[arg(long, default_value = "0")]
        segment: usize,

        /// Point index of the anchor
        #[arg(long)]
        index: usize,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Output file path (defaults to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Insert an anchor on the closest segment line, at the point nearest to a position
    Insert {
        /// Track file path
        file: PathBuf,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Restrict to one track
        #[arg(long)]
        track: Option<usize>,

        /// Restrict to one segment of the track
        #[arg(long, requires = "track")]
        segment: Option<usize>,

        /// Output file path (defaults to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete an anchor
    Delete {
        /// Track file path
        file: PathBuf,

        #[arg(long, default_value = "0")]
        track: usize,

        #[arg(long, default_value = "0")]
        segment: usize,

        /// Point index of the anchor
        #[arg(long)]
        index: usize,

        /// Output file path (defaults to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Route from the last anchor to a new position
    Append {
        /// Track file path (created when missing)
        file: PathBuf,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Output file path (defaults to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Make a loop segment start at an anchor
    LoopStart {
        /// Track file path
        file: PathBuf,

        #[arg(long, default_value = "0")]
        track: usize,

        #[arg(long, default_value = "0")]
        segment: usize,

        /// Point index of the anchor
        #[arg(long)]
        index: usize,

        /// Output file path (defaults to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sample interpolated positions as JSON lines
    Play {
        /// Track file path
        file: PathBuf,

        /// Playback speed multiplier
        #[arg(long, default_value = "60")]
        speed: f64,

        /// Frames per second of wall-clock time
        #[arg(long, default_value = "1")]
        fps: u32,

        /// Filter start (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Filter end (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },

    /// Distance, duration and speeds of the timed points
    Summary {
        /// Track file path
        file: PathBuf,

        /// Filter start (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Filter end (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct CliConfig {
    editor: EditorConfig,
    router: RouterConfig,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { file } => info_command(file, &config),
        Commands::Levels { file, output } => levels_command(file, output, config),
        Commands::Move {
            file,
            track,
            segment,
            index,
            lat,
            lon,
            output,
        } => move_command(file, track, segment, index, Coordinates::new(lat, lon), output, config).await,
        Commands::Insert {
            file,
            lat,
            lon,
            track,
            segment,
            output,
        } => insert_command(file, Coordinates::new(lat, lon), track, segment, output, config),
        Commands::Delete {
            file,
            track,
            segment,
            index,
            output,
        } => delete_command(file, track, segment, index, output, config).await,
        Commands::Append { file, lat, lon, output } => {
            append_command(file, Coordinates::new(lat, lon), output, config).await
        }
        Commands::LoopStart {
            file,
            track,
            segment,
            index,
            output,
        } => loop_start_command(file, track, segment, index, output, config),
        Commands::Play {
            file,
            speed,
            fps,
            from,
            to,
        } => play_command(file, speed, fps, from, to),
        Commands::Summary { file, from, to } => summary_command(file, time_filter(from, to)?, &config),
    }
}

fn read_file(path: &Path) -> Result<TrackFile> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

fn write_file(file: &TrackFile, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(file)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote {:?}", path);
    Ok(())
}

/// Opens a session on `path`. Segments without anchors get zoom levels
/// first, as on import.
fn open_session(path: &Path, config: &CliConfig) -> Result<EditingSession> {
    let file = read_file(path)?;
    let mut session = EditingSession::new(MemoryStore::new(file), config.editor.clone());
    session.assign_levels()?;
    Ok(session)
}

fn save_session(session: EditingSession, input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let commits = session.store().commits();
    let file = session.into_store().into_file();
    info!("{} change(s) committed", commits);
    write_file(&file, &output.unwrap_or(input))
}

fn time_filter(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<Option<TimeRange>> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => bail!("--from {} is after --to {}", from, to),
        (Some(from), Some(to)) => Ok(Some(TimeRange::new(from, to))),
        (Some(from), None) => Ok(Some(TimeRange::new(from, DateTime::<Utc>::MAX_UTC))),
        (None, Some(to)) => Ok(Some(TimeRange::new(DateTime::<Utc>::MIN_UTC, to))),
        (None, None) => Ok(None),
    }
}

fn info_command(path: PathBuf, config: &CliConfig) -> Result<()> {
    let file = read_file(&path)?;
    println!("{} ({} tracks)", file.name, file.tracks.len());

    file.for_each_segment(|segment, track, segment_index| {
        let stats = SegmentStatistics::compute(&segment.points, config.editor.min_moving_speed_kmh);
        let anchors: Vec<usize> = segment.anchor_indices().collect();
        println!(
            "  track {} segment {}: {} points, {:.2} km, {:.1} km/h moving, anchors {:?}",
            track,
            segment_index,
            segment.len(),
            stats.global.distance_total,
            stats.global.speed_moving,
            anchors
        );
    });
    Ok(())
}

fn levels_command(path: PathBuf, output: Option<PathBuf>, config: CliConfig) -> Result<()> {
    let file = read_file(&path)?;
    let mut session = EditingSession::new(MemoryStore::new(file), config.editor);
    let changed = session.assign_levels()?;
    info!("Assigned anchor levels on {} segment(s)", changed);
    save_session(session, path, output)
}

async fn move_command(
    path: PathBuf,
    track: usize,
    segment: usize,
    index: usize,
    target: Coordinates,
    output: Option<PathBuf>,
    config: CliConfig,
) -> Result<()> {
    let router = RouterFactory::create(&config.router)?;
    let mut session = open_session(&path, &config)?;

    info!("Moving anchor {} to {} via {}", index, target, router.name());
    session
        .move_anchor(track, segment, index, target, router.as_ref())
        .await?;
    save_session(session, path, output)
}

fn insert_command(
    path: PathBuf,
    position: Coordinates,
    track: Option<usize>,
    segment: Option<usize>,
    output: Option<PathBuf>,
    config: CliConfig,
) -> Result<()> {
    let selection = match (track, segment) {
        (Some(track), Some(segment)) => SegmentSelection::Segment { track, segment },
        (Some(track), None) => SegmentSelection::Track(track),
        _ => SegmentSelection::All,
    };
    let mut session = open_session(&path, &config)?.with_selection(selection.clone());

    let Some((track, segment, closest)) = closest_eligible(session.file(), &selection, position, 2) else {
        bail!("no segment line to insert into");
    };
    info!(
        "Snapping {} to track {} segment {} ({:.1} m away)",
        position, track, segment, closest.distance
    );

    // Hover the snapped point on a close-up map, then click the preview.
    let viewport = Viewport::new(closest.point, 20.0, 1024.0, 768.0);
    session.set_viewport(viewport);
    if !session.hover_segment(viewport.project(closest.point)) {
        bail!("an anchor is already at {}", closest.point);
    }
    let id = session.promote_temporary_anchor()?;
    info!("Inserted anchor {}", id);
    save_session(session, path, output)
}

async fn delete_command(
    path: PathBuf,
    track: usize,
    segment: usize,
    index: usize,
    output: Option<PathBuf>,
    config: CliConfig,
) -> Result<()> {
    let router = RouterFactory::create(&config.router)?;
    let mut session = open_session(&path, &config)?;

    session.delete_anchor(track, segment, index, router.as_ref()).await?;
    info!("Deleted anchor {}", index);
    save_session(session, path, output)
}

async fn append_command(path: PathBuf, position: Coordinates, output: Option<PathBuf>, config: CliConfig) -> Result<()> {
    let router = RouterFactory::create(&config.router)?;
    let mut session = if path.exists() {
        open_session(&path, &config)?
    } else {
        warn!("{:?} does not exist, starting a new file", path);
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("track");
        EditingSession::new(MemoryStore::new(TrackFile::new(name)), config.editor.clone())
    };

    session.append_anchor(position, router.as_ref()).await?;
    info!("Appended anchor at {}", position);
    save_session(session, path, output)
}

fn loop_start_command(
    path: PathBuf,
    track: usize,
    segment: usize,
    index: usize,
    output: Option<PathBuf>,
    config: CliConfig,
) -> Result<()> {
    let mut session = open_session(&path, &config)?;
    if !session.can_change_start(track, segment, index) {
        bail!(
            "segment {}/{} is not a loop or point {} is already its start",
            track,
            segment,
            index
        );
    }
    session.start_loop_at_anchor(track, segment, index)?;
    save_session(session, path, output)
}

fn play_command(
    path: PathBuf,
    speed: f64,
    fps: u32,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<()> {
    let data = PlaybackData::from_file(&read_file(&path)?);
    let Some(span) = data.time_range() else {
        bail!("{:?} has no timed points", path);
    };
    if !(speed.is_finite() && speed > 0.0) {
        bail!("--speed must be a positive number");
    }

    // Open filter ends stop at the recorded span.
    let filter = time_filter(from, to)?.map(|f| TimeRange::new(f.start.max(span.start), f.end.min(span.end)));
    if filter.is_some_and(|f| f.start > f.end) {
        bail!("filter does not overlap the recorded span {} - {}", span.start, span.end);
    }

    let mut playback = Playback::new(data);
    playback.set_time_filter(filter);
    playback.set_speed(speed);
    playback.play();

    let frame = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut now = Instant::now();
    playback.advance_frame(now);
    if let Some(position) = playback.position() {
        println!("{}", serde_json::to_string(&(playback.current_time(), position))?);
    }
    while playback.is_playing() {
        now += frame;
        if let Some(position) = playback.advance_frame(now) {
            println!("{}", serde_json::to_string(&(playback.current_time(), position))?);
        }
    }
    Ok(())
}

fn summary_command(path: PathBuf, filter: Option<TimeRange>, config: &CliConfig) -> Result<()> {
    let data = PlaybackData::from_file(&read_file(&path)?);
    match summarize(data.points(), filter.as_ref(), &config.editor.summary) {
        Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
        None => warn!("Fewer than two timed points in range"),
    }
    Ok(())
}
