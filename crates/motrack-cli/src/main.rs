//! motrack - command line front end for the tracking engine
//!
//! Loads a JSON tracking document and runs one engine operation on it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use motrack_tracking::plane_tracker::track_object_plane;
use motrack_tracking::stabilize::update_autoscale;
use motrack_tracking::{
    spawn_camera_solve, ChannelSort, DltHomographySolver, Dopesheet, DopesheetOptions, JobEvent,
    LinearBundleAdjuster, Stabilizer, Tracking, TrackingFile,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let io = cli.command.document();
    let mut doc = load(&io.document)?;
    info!(
        document = %io.document.display(),
        objects = doc.objects.len(),
        tracks = doc.track_count(),
        "Document loaded"
    );

    let modified = match &cli.command {
        Command::Info { sort, inverse, .. } => {
            let options = DopesheetOptions {
                sort: (*sort).into(),
                inverse: *inverse,
                ..DopesheetOptions::default()
            };
            print_info(&doc, &options);
            false
        }
        Command::Stabilize { size, frames, .. } => {
            run_stabilize(&mut doc, *size, *frames)?;
            false
        }
        Command::Solve { size, object, .. } => {
            run_solve(&mut doc, *size, *object)?;
            true
        }
        Command::Plane { frame, object, .. } => {
            run_plane(&mut doc, *frame, *object)?;
            true
        }
    };

    if let Some(output) = &io.output {
        if !modified {
            warn!("Command does not modify the document, writing it unchanged");
        }
        save(&doc, output)?;
        info!(path = %output.display(), "Document written");
    }
    Ok(())
}

// ── Arguments ───────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "motrack", version)]
#[command(about = "Feature tracking, camera solving and stabilization on tracking documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct DocumentArgs {
    /// Tracking document (JSON)
    document: PathBuf,
    /// Write the updated document to this path
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize objects, tracks and coverage
    Info {
        #[command(flatten)]
        io: DocumentArgs,
        /// Order of the track listing
        #[arg(long, value_enum, default_value_t = SortKey::Name)]
        sort: SortKey,
        /// Reverse the track listing
        #[arg(long)]
        inverse: bool,
    },
    /// Print per-frame stabilization
    Stabilize {
        #[command(flatten)]
        io: DocumentArgs,
        /// Frame size in pixels, as WxH
        #[arg(long)]
        size: FrameSize,
        /// Frame range as A:B (default: tracked range of the camera)
        #[arg(long)]
        frames: Option<FrameRange>,
    },
    /// Solve the camera or an object
    Solve {
        #[command(flatten)]
        io: DocumentArgs,
        /// Frame size in pixels, as WxH
        #[arg(long)]
        size: FrameSize,
        /// Object index (default: active object)
        #[arg(long)]
        object: Option<usize>,
    },
    /// Propagate plane tracks from a frame
    Plane {
        #[command(flatten)]
        io: DocumentArgs,
        /// Start frame
        #[arg(long)]
        frame: i32,
        /// Object index (default: active object)
        #[arg(long)]
        object: Option<usize>,
    },
}

impl Command {
    fn document(&self) -> &DocumentArgs {
        match self {
            Command::Info { io, .. }
            | Command::Stabilize { io, .. }
            | Command::Solve { io, .. }
            | Command::Plane { io, .. } => io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortKey {
    Name,
    Longest,
    Total,
    Error,
}

impl From<SortKey> for ChannelSort {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Name => ChannelSort::Name,
            SortKey::Longest => ChannelSort::Longest,
            SortKey::Total => ChannelSort::Total,
            SortKey::Error => ChannelSort::AverageError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameSize {
    width: u32,
    height: u32,
}

impl FromStr for FrameSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (width, height) = split_pair::<u32>(s, 'x')?;
        if width == 0 || height == 0 {
            return Err(format!("frame size must be non-zero, got '{}'", s));
        }
        Ok(Self { width, height })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameRange {
    start: i32,
    end: i32,
}

impl FromStr for FrameRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (start, end) = split_pair::<i32>(s, ':')?;
        if start > end {
            return Err(format!("frame range {} ends before it starts", s));
        }
        Ok(Self { start, end })
    }
}

fn split_pair<T: FromStr>(value: &str, sep: char) -> std::result::Result<(T, T), String> {
    let (a, b) = value
        .split_once(sep)
        .ok_or_else(|| format!("expected A{}B, got '{}'", sep, value))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<T>()
            .map_err(|_| format!("invalid number '{}'", s))
    };
    Ok((parse(a)?, parse(b)?))
}

fn load(path: &Path) -> Result<Tracking> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(TrackingFile::from_json(&data)?.into_tracking())
}

fn save(doc: &Tracking, path: &Path) -> Result<()> {
    let data = TrackingFile::new(doc.clone()).to_json()?;
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ── Commands ────────────────────────────────────────────────────

fn print_info(doc: &Tracking, options: &DopesheetOptions) {
    for (index, obj) in doc.objects.iter().enumerate() {
        let kind = if obj.is_camera { "camera" } else { "object" };
        println!(
            "#{} {} ({}): {} tracks, {} plane tracks, keyframes {}-{}",
            index,
            obj.name,
            kind,
            obj.tracks.len(),
            obj.plane_tracks.len(),
            obj.keyframe1,
            obj.keyframe2
        );
        if obj.reconstruction.reconstructed {
            println!(
                "   reconstructed: {} cameras, error {:.4} px",
                obj.reconstruction.cameras().len(),
                obj.reconstruction.error
            );
        }
        let dopesheet = Dopesheet::build(obj, options);
        for channel in &dopesheet.channels {
            println!(
                "   {:<24} {:>5} frames, longest {:>5}, {} segments",
                channel.label,
                channel.total_frames,
                channel.longest_segment,
                channel.segments.len()
            );
        }
        if let Some(coverage) = &dopesheet.coverage {
            for segment in coverage.segments() {
                println!("   frames {:>5}-{:<5} {:?}", segment.start, segment.end, segment.coverage);
            }
        }
    }
}

fn run_stabilize(doc: &mut Tracking, size: FrameSize, frames: Option<FrameRange>) -> Result<()> {
    let FrameSize { width, height } = size;
    if doc.stabilization.autoscale {
        let scale = update_autoscale(doc, width, height);
        info!(scale, "Autoscale updated");
    }

    let stabilizer = Stabilizer::new(doc);
    if stabilizer.track_count() == 0 {
        warn!("No tracks are marked for stabilization");
    }
    let (start, end) = match frames {
        Some(range) => (range.start, range.end),
        None => doc
            .camera_object()
            .and_then(|obj| obj.enabled_frame_range())
            .ok_or_else(|| anyhow!("no tracked frames, pass --frames A:B"))?,
    };

    println!("frame\ttx\tty\tangle\tscale");
    for frame in start..=end {
        let data = stabilizer.stabilization_data(frame, width, height);
        println!(
            "{}\t{:.3}\t{:.3}\t{:.5}\t{:.5}",
            frame, data.translation.x, data.translation.y, data.angle, data.scale
        );
    }
    Ok(())
}

fn run_solve(doc: &mut Tracking, size: FrameSize, object: Option<usize>) -> Result<()> {
    let FrameSize { width, height } = size;
    let object = object.unwrap_or(doc.active_object);
    let shared = doc.clone().into_shared();

    let job = spawn_camera_solve(
        shared.clone(),
        Arc::new(LinearBundleAdjuster),
        object,
        width,
        height,
    )?;
    for event in job.events().iter() {
        match event {
            JobEvent::Progress { fraction, message } => {
                info!(progress = fraction, "{}", message);
            }
            JobEvent::Finished => break,
            JobEvent::Frame { .. } => {}
        }
    }
    let report = job.join()?;

    println!(
        "solved {} cameras and {} bundles, error {:.4} px, keyframes {}-{}",
        report.cameras, report.bundles, report.error, report.keyframe1, report.keyframe2
    );
    if !report.missing_frames.is_empty() {
        println!("no camera for frames {:?}", report.missing_frames);
    }
    *doc = shared.read().clone();
    Ok(())
}

fn run_plane(doc: &mut Tracking, frame: i32, object: Option<usize>) -> Result<()> {
    let object = object.unwrap_or(doc.active_object);
    let obj = doc.object_mut(object)?;
    let ids: Vec<_> = obj.plane_tracks.iter().map(|p| p.id).collect();
    if ids.is_empty() {
        warn!(object = %obj.name, "Object has no plane tracks");
    }
    for id in ids {
        let written = track_object_plane(obj, id, frame, &DltHomographySolver)?;
        println!("plane {}: {} markers", id, written);
    }
    Ok(())
}
