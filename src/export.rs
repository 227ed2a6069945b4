//! Video export: composited canvas frames are piped as rawvideo into the
//! system `ffmpeg` binary and muxed to MP4. Includes the loop-perfect
//! duration suggestion (LCM of attached video durations) and a
//! cooperative cancel check polled once per exported frame.

use std::{
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::{
    error::{PromapError, PromapResult},
    frame::Frame,
    project::Project,
    render::Compositor,
};

/// Suggested export length when no videos are attached.
pub const DEFAULT_EXPORT_DURATION_SECS: u64 = 10;

/// LCM suggestions above this are impractical; fall back to the longest
/// single clip.
pub const MAX_SUGGESTED_DURATION_SECS: u64 = 300;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 { 0 } else { a / gcd(a, b) * b }
}

/// Least common multiple of the per-video whole-second durations: every
/// clip completes an exact number of loops, so the export loops
/// seamlessly. Capped at [`MAX_SUGGESTED_DURATION_SECS`] (falling back to
/// the longest single duration).
pub fn suggested_duration_secs(durations: &[u64]) -> u64 {
    let durations: Vec<u64> = durations.iter().copied().filter(|d| *d > 0).collect();
    if durations.is_empty() {
        return DEFAULT_EXPORT_DURATION_SECS;
    }
    let combined = durations.iter().copied().fold(1, lcm);
    if combined > MAX_SUGGESTED_DURATION_SECS {
        durations.iter().copied().max().unwrap_or(DEFAULT_EXPORT_DURATION_SECS)
    } else {
        combined
    }
}

/// Whole-second durations of every video attached to the project.
pub fn project_video_durations(project: &Project) -> Vec<u64> {
    project
        .masks()
        .iter()
        .filter_map(|m| m.media.as_ref())
        .filter_map(|s| s.video_info())
        .filter_map(|info| info.duration_whole_secs())
        .collect()
}

#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub out_path: PathBuf,
    pub fps: u32,
    pub duration_secs: u64,
    pub overwrite: bool,
}

impl ExportConfig {
    pub fn validate(&self) -> PromapResult<()> {
        if self.fps == 0 {
            return Err(PromapError::validation("export fps must be non-zero"));
        }
        if self.duration_secs == 0 {
            return Err(PromapError::validation("export duration must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl EncodeConfig {
    pub fn validate(&self) -> PromapResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PromapError::validation(
                "encode width/height must be non-zero",
            ));
        }
        if self.fps == 0 {
            return Err(PromapError::validation("encode fps must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // yuv420p output needs even dimensions.
            return Err(PromapError::validation(
                "encode width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        Ok(())
    }
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn ensure_parent_dir(path: &Path) -> PromapResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Streams raw RGBA frames into a spawned `ffmpeg` process. We use the
/// system binary rather than native FFmpeg bindings to avoid dev
/// header/lib requirements.
pub struct FfmpegEncoder {
    cfg: EncodeConfig,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl FfmpegEncoder {
    pub fn new(cfg: EncodeConfig) -> PromapResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !cfg.overwrite && cfg.out_path.exists() {
            return Err(PromapError::validation(format!(
                "output file '{}' already exists",
                cfg.out_path.display()
            )));
        }
        if !is_ffmpeg_on_path() {
            return Err(PromapError::validation(
                "ffmpeg is required for MP4 export, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.arg(if cfg.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ])
        .arg(&cfg.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            PromapError::validation(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PromapError::validation("failed to open ffmpeg stdin (unexpected)"))?;

        Ok(Self {
            cfg,
            child,
            stdin: Some(stdin),
        })
    }

    pub fn encode_frame(&mut self, frame: &Frame) -> PromapResult<()> {
        if frame.width != self.cfg.width || frame.height != self.cfg.height {
            return Err(PromapError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.cfg.width, self.cfg.height
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(PromapError::validation("ffmpeg encoder is already finalized"));
        };

        use std::io::Write as _;
        stdin.write_all(&frame.data).map_err(|e| {
            PromapError::validation(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        Ok(())
    }

    /// Close the stream and wait for ffmpeg to finish the container.
    pub fn finish(mut self) -> PromapResult<()> {
        drop(self.stdin.take());
        let output = self.child.wait_with_output().map_err(|e| {
            PromapError::validation(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PromapError::validation(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Cancelled export: close the sink, wait, and discard the partial
    /// output file.
    pub fn abort(mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
        let _ = std::fs::remove_file(&self.cfg.out_path);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub frames_written: u64,
    pub cancelled: bool,
}

/// Composite `duration * fps` frames and pipe them to the encoder.
///
/// `should_cancel` is polled once per exported frame; on cancel the
/// encoder is finalized and the partial file removed.
pub fn export_video(
    project: &mut Project,
    compositor: &mut Compositor,
    cfg: &ExportConfig,
    mut should_cancel: impl FnMut() -> bool,
) -> PromapResult<ExportStats> {
    cfg.validate()?;

    let enc_cfg = EncodeConfig {
        width: compositor.width(),
        height: compositor.height(),
        fps: cfg.fps,
        out_path: cfg.out_path.clone(),
        overwrite: cfg.overwrite,
    };
    let mut encoder = FfmpegEncoder::new(enc_cfg)?;

    let total = cfg.duration_secs * u64::from(cfg.fps);
    let mut stats = ExportStats::default();
    for _ in 0..total {
        if should_cancel() {
            stats.cancelled = true;
            encoder.abort();
            return Ok(stats);
        }
        compositor.composite(project.masks_mut());
        encoder.encode_frame(compositor.output())?;
        stats.frames_written += 1;
    }

    encoder.finish()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcm_suggestion_combines_short_durations() {
        assert_eq!(suggested_duration_secs(&[4, 6]), 12);
        assert_eq!(suggested_duration_secs(&[7, 11]), 77);
        assert_eq!(suggested_duration_secs(&[7]), 7);
    }

    #[test]
    fn lcm_suggestion_falls_back_past_the_cap() {
        // lcm(101, 103) = 10403 > 300, so the longest single clip wins.
        assert_eq!(suggested_duration_secs(&[101, 103]), 103);
    }

    #[test]
    fn lcm_suggestion_defaults_without_videos() {
        assert_eq!(suggested_duration_secs(&[]), DEFAULT_EXPORT_DURATION_SECS);
        assert_eq!(suggested_duration_secs(&[0]), DEFAULT_EXPORT_DURATION_SECS);
    }

    #[test]
    fn encode_config_validation() {
        let good = EncodeConfig {
            width: 640,
            height: 480,
            fps: 30,
            out_path: PathBuf::from("out/x.mp4"),
            overwrite: true,
        };
        assert!(good.validate().is_ok());

        assert!(EncodeConfig { width: 0, ..good.clone() }.validate().is_err());
        assert!(EncodeConfig { width: 641, ..good.clone() }.validate().is_err());
        assert!(EncodeConfig { fps: 0, ..good }.validate().is_err());
    }

    #[test]
    fn export_config_validation() {
        let cfg = ExportConfig {
            out_path: PathBuf::from("x.mp4"),
            fps: 30,
            duration_secs: 10,
            overwrite: true,
        };
        assert!(cfg.validate().is_ok());
        assert!(
            ExportConfig {
                duration_secs: 0,
                ..cfg.clone()
            }
            .validate()
            .is_err()
        );
        assert!(ExportConfig { fps: 0, ..cfg }.validate().is_err());
    }
}
