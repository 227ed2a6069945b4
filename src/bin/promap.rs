use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "promap", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite a single frame of a project as a PNG.
    Frame(FrameArgs),
    /// Export a project to MP4 (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Print project and media diagnostics.
    Probe(ProbeArgs),
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Input project document (.bad).
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Frame index (0-based); earlier frames are composited to advance
    /// video sources.
    #[arg(long, default_value_t = 0)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Draw the mask outlines + subdivision grid overlay.
    #[arg(long)]
    grid: bool,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input project document (.bad).
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Duration in seconds; defaults to the loop-perfect suggestion
    /// (LCM of attached video durations).
    #[arg(long)]
    duration: Option<u64>,

    /// Output frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Draw the mask outlines + subdivision grid overlay.
    #[arg(long)]
    grid: bool,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Input project document (.bad).
    #[arg(long = "in")]
    in_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Frame(args) => cmd_frame(args),
        Command::Render(args) => cmd_render(args),
        Command::Probe(args) => cmd_probe(args),
    }
}

fn load(path: &Path) -> anyhow::Result<promap::Project> {
    promap::load_project(path)
        .with_context(|| format!("load project '{}'", path.display()))
}

fn make_compositor(project: &promap::Project, grid: bool) -> promap::Compositor {
    let settings = promap::RenderSettings {
        show_grid: grid,
        ..promap::RenderSettings::default()
    };
    promap::Compositor::new(project.width, project.height, settings)
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let mut project = load(&args.in_path)?;
    let mut compositor = make_compositor(&project, args.grid);

    // Each composite advances every video source by one frame.
    for _ in 0..=args.frame {
        compositor.composite(project.masks_mut());
    }

    let frame = compositor.output();
    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &frame.data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut project = load(&args.in_path)?;
    let mut compositor = make_compositor(&project, args.grid);

    let duration_secs = args.duration.unwrap_or_else(|| {
        let durations = promap::export::project_video_durations(&project);
        promap::suggested_duration_secs(&durations)
    });

    let cfg = promap::ExportConfig {
        out_path: args.out.clone(),
        fps: args.fps,
        duration_secs,
        overwrite: true,
    };
    let stats = promap::export_video(&mut project, &mut compositor, &cfg, || false)?;

    eprintln!(
        "wrote {} ({} frames @ {} fps)",
        args.out.display(),
        stats.frames_written,
        args.fps
    );
    Ok(())
}

fn cmd_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let project = load(&args.in_path)?;

    eprintln!("canvas: {}x{}", project.width, project.height);
    eprintln!("masks:  {}", project.len());
    for (i, mask) in project.masks().iter().enumerate() {
        let media = match mask.media.as_ref() {
            None => "none".to_string(),
            Some(source) => match source.video_info() {
                Some(info) => format!(
                    "video {}x{} @ {:.2} fps, {} frames",
                    info.width,
                    info.height,
                    info.source_fps(),
                    info.frame_count
                ),
                None => format!("{:?}", source.kind()),
            },
        };
        eprintln!(
            "  [{i}] {:?} vertices={} hidden={} locked={} media={media}",
            mask.shape,
            mask.vertices.len(),
            mask.hidden,
            mask.locked,
        );
    }

    let durations = promap::export::project_video_durations(&project);
    eprintln!(
        "suggested export duration: {}s (video durations: {:?})",
        promap::suggested_duration_secs(&durations),
        durations
    );
    Ok(())
}
