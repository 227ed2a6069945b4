//! End-to-end media tests against the system ffmpeg/ffprobe binaries.
//! Skipped (pass vacuously) when the tools are not installed.

use std::{path::Path, process::Command};

use kurbo::Point;
use promap::{
    Compositor, ExportConfig, FrameSource, MaskShape, MediaDescriptor, Project, RenderSettings,
    export_video,
};

fn ffmpeg_tools_available() -> bool {
    let check = |tool: &str| {
        Command::new(tool)
            .arg("-version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    };
    check("ffmpeg") && check("ffprobe")
}

fn synth_clip(path: &Path, frames: u32, fps: u32) -> anyhow::Result<()> {
    let status = Command::new("ffmpeg")
        .args([
            "-v",
            "error",
            "-y",
            "-f",
            "lavfi",
            "-i",
            &format!("testsrc=size=64x64:rate={fps}"),
            "-frames:v",
            &frames.to_string(),
            "-pix_fmt",
            "yuv420p",
            "-c:v",
            "libx264",
        ])
        .arg(path)
        .status()?;
    anyhow::ensure!(status.success(), "ffmpeg failed creating test clip");
    Ok(())
}

#[test]
fn video_source_loops_back_to_frame_zero() {
    if !ffmpeg_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("clip.mp4");
    synth_clip(&clip, 5, 5).unwrap();

    let mut source = FrameSource::open(&MediaDescriptor::from_path(&clip)).unwrap();
    let info = source.video_info().unwrap();
    assert_eq!(info.width, 64);
    assert_eq!(info.height, 64);
    let frame_count = info.frame_count;
    assert_eq!(frame_count, 5);

    let first = source.current_frame().clone();
    let mut saw_motion = false;
    for _ in 1..frame_count {
        saw_motion |= *source.current_frame() != first;
    }
    assert!(saw_motion, "test pattern should change between frames");

    // The read past the last frame wraps to frame 0.
    let wrapped = source.current_frame().clone();
    assert_eq!(wrapped, first);

    source.release();
    source.release(); // idempotent
}

#[test]
fn export_writes_a_playable_file() {
    if !ffmpeg_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.mp4");

    let mut project = Project::new(128, 96);
    let id = project.add_mask(MaskShape::Rectangle, 128.0, 96.0, Point::new(0.0, 0.0));
    project
        .mask_mut(id)
        .unwrap()
        .attach_media(FrameSource::from_frame(promap::Frame::solid(
            16,
            16,
            [255, 0, 0, 255],
        )));

    let mut compositor = Compositor::new(128, 96, RenderSettings::default());
    let cfg = ExportConfig {
        out_path: out.clone(),
        fps: 4,
        duration_secs: 1,
        overwrite: true,
    };
    let stats = export_video(&mut project, &mut compositor, &cfg, || false).unwrap();
    assert_eq!(stats.frames_written, 4);
    assert!(!stats.cancelled);
    assert!(out.metadata().unwrap().len() > 0);
}

#[test]
fn cancelled_export_discards_partial_output() {
    if !ffmpeg_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("cancelled.mp4");

    let mut project = Project::new(64, 64);
    let mut compositor = Compositor::new(64, 64, RenderSettings::default());
    let cfg = ExportConfig {
        out_path: out.clone(),
        fps: 10,
        duration_secs: 100,
        overwrite: true,
    };

    let mut polls = 0u32;
    let stats = export_video(&mut project, &mut compositor, &cfg, || {
        polls += 1;
        polls > 3
    })
    .unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.frames_written, 3);
    assert!(!out.exists(), "partial output must be removed on cancel");
}
