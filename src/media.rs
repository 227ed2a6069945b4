//! Frame sources: still images, looping video decoders, live webcam
//! capture. One `FrameSource::current_frame` call hides the three
//! behaviors (static / loop / newest-frame); after a successful open it
//! never comes back empty — decode hiccups fall back to the last good
//! frame so the render loop stays glitch-free.

use std::{
    io::Read as _,
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
};

use tracing::warn;

use crate::{
    error::{PromapError, PromapResult},
    frame::Frame,
};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Webcam,
}

/// What to open. File paths are classified by extension, the way the
/// project document records them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaDescriptor {
    ImagePath(PathBuf),
    VideoPath(PathBuf),
    WebcamIndex(u32),
}

impl MediaDescriptor {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_video = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_video {
            Self::VideoPath(path)
        } else {
            Self::ImagePath(path)
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            Self::ImagePath(_) => MediaKind::Image,
            Self::VideoPath(_) => MediaKind::Video,
            Self::WebcamIndex(_) => MediaKind::Webcam,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::ImagePath(p) | Self::VideoPath(p) => Some(p),
            Self::WebcamIndex(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub frame_count: u64,
    pub duration_sec: f64,
}

impl VideoSourceInfo {
    pub fn source_fps(&self) -> f64 {
        if self.fps_den == 0 {
            0.0
        } else {
            f64::from(self.fps_num) / f64::from(self.fps_den)
        }
    }

    /// Whole-second duration (`frame_count / fps`, floored), used for the
    /// loop-perfect export suggestion. `None` when the clip is shorter
    /// than a second or the metadata is unusable.
    pub fn duration_whole_secs(&self) -> Option<u64> {
        let fps = self.source_fps();
        if fps <= 0.0 || self.frame_count == 0 {
            return None;
        }
        let secs = (self.frame_count as f64 / fps).floor() as u64;
        (secs > 0).then_some(secs)
    }
}

/// Probe a video file with `ffprobe` (stream geometry, frame rate, frame
/// count, container duration).
pub fn probe_video(source_path: &Path) -> PromapResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        r_frame_rate: Option<String>,
        nb_frames: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| PromapError::media_open(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(PromapError::media_open(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| PromapError::media_open(format!("ffprobe json parse failed: {e}")))?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PromapError::media_open("no video stream found"))?;
    let width = video_stream
        .width
        .ok_or_else(|| PromapError::media_open("missing video width from ffprobe"))?;
    let height = video_stream
        .height
        .ok_or_else(|| PromapError::media_open("missing video height from ffprobe"))?;

    let (fps_num, fps_den) = parse_ff_ratio(video_stream.r_frame_rate.as_deref().unwrap_or("0/1"))
        .ok_or_else(|| PromapError::media_open("invalid video r_frame_rate"))?;
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    // Not all containers carry nb_frames; fall back to duration * fps.
    let frame_count = video_stream
        .nb_frames
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or_else(|| {
            let fps = if fps_den == 0 {
                0.0
            } else {
                f64::from(fps_num) / f64::from(fps_den)
            };
            (duration_sec * fps).round().max(0.0) as u64
        });

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        fps_num,
        fps_den,
        frame_count,
        duration_sec,
    })
}

fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('/');
    let a = parts.next()?.parse::<u32>().ok()?;
    let b = parts.next()?.parse::<u32>().ok()?;
    if b == 0 {
        return None;
    }
    Some((a, b))
}

struct VideoPipe {
    child: Child,
    stdout: ChildStdout,
}

impl VideoPipe {
    /// Spawn a sequential rawvideo decode of the whole file. We use the
    /// system `ffmpeg` binary rather than native FFmpeg bindings to avoid
    /// dev header/lib requirements.
    fn spawn(path: &Path) -> PromapResult<Self> {
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                PromapError::media_open(format!("failed to spawn ffmpeg for video decode: {e}"))
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PromapError::media_open("failed to open ffmpeg stdout (unexpected)"))?;
        Ok(Self { child, stdout })
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.stdout.read_exact(buf)
    }

    fn shutdown(mut self) {
        if let Err(e) = self.child.kill() {
            warn!("failed to stop video decoder: {e}");
        }
        let _ = self.child.wait();
    }
}

pub struct VideoSource {
    info: VideoSourceInfo,
    pipe: Option<VideoPipe>,
    last_frame: Frame,
    /// Frame 0 is decoded eagerly at open; the first `current_frame`
    /// call hands it out instead of advancing, so call K always sees
    /// frame K of the clip (modulo looping).
    first_pending: bool,
}

impl VideoSource {
    fn open(path: &Path) -> PromapResult<Self> {
        let info = probe_video(path)?;
        let mut pipe = VideoPipe::spawn(path)?;
        let mut buf = vec![0u8; info.width as usize * info.height as usize * 4];
        pipe.read_frame(&mut buf).map_err(|e| {
            PromapError::media_open(format!(
                "could not decode first frame of '{}': {e}",
                path.display()
            ))
        })?;
        let last_frame = Frame::from_rgba8(info.width, info.height, buf)?;
        Ok(Self {
            info,
            pipe: Some(pipe),
            last_frame,
            first_pending: true,
        })
    }

    /// Advance one frame; on end-of-stream seek back to frame 0 (the
    /// looping read cursor), on any other failure keep the last good
    /// frame.
    fn advance(&mut self) {
        if self.first_pending {
            self.first_pending = false;
            return;
        }
        let mut buf = vec![0u8; self.info.width as usize * self.info.height as usize * 4];

        match self.pipe.as_mut() {
            Some(pipe) => match pipe.read_frame(&mut buf) {
                Ok(()) => {
                    self.last_frame.data.copy_from_slice(&buf);
                    return;
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // End of stream: seek back to frame 0 by respawning
                    // the sequential decode.
                }
                Err(e) => {
                    warn!("video decode hiccup, reusing last frame: {e}");
                    return;
                }
            },
            None => return,
        }

        if let Some(pipe) = self.pipe.take() {
            pipe.shutdown();
        }
        match VideoPipe::spawn(&self.info.source_path) {
            Ok(mut pipe) => {
                match pipe.read_frame(&mut buf) {
                    Ok(()) => self.last_frame.data.copy_from_slice(&buf),
                    Err(e) => warn!("video loop restart read failed, reusing last frame: {e}"),
                }
                self.pipe = Some(pipe);
            }
            Err(e) => warn!("video loop restart failed, reusing last frame: {e}"),
        }
    }

    fn release(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            pipe.shutdown();
        }
    }
}

pub struct WebcamSource {
    index: u32,
    cam: Option<nokhwa::Camera>,
    last_frame: Frame,
}

impl WebcamSource {
    fn open(index: u32) -> PromapResult<Self> {
        use nokhwa::{
            Camera,
            pixel_format::RgbFormat,
            utils::{
                CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
                Resolution,
            },
        };

        let fmt = CameraFormat::new(Resolution::new(1280, 720), FrameFormat::YUYV, 30);
        let req = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(fmt));
        let mut cam = Camera::new(CameraIndex::Index(index), req)
            .map_err(|e| PromapError::media_open(format!("cannot open webcam {index}: {e}")))?;
        cam.open_stream()
            .map_err(|e| PromapError::media_open(format!("cannot start webcam {index}: {e}")))?;

        let last_frame = Self::grab(&mut cam)
            .map_err(|e| PromapError::media_open(format!("webcam {index} produced no frame: {e}")))?;
        Ok(Self {
            index,
            cam: Some(cam),
            last_frame,
        })
    }

    fn grab(cam: &mut nokhwa::Camera) -> PromapResult<Frame> {
        use nokhwa::pixel_format::RgbFormat;

        let buffer = cam
            .frame()
            .map_err(|e| PromapError::frame_read(format!("webcam frame grab failed: {e}")))?;
        let rgb = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| PromapError::frame_read(format!("webcam frame decode failed: {e}")))?;

        let (w, h) = rgb.dimensions();
        let mut data = Vec::with_capacity(w as usize * h as usize * 4);
        for px in rgb.pixels() {
            data.extend_from_slice(&[px[0], px[1], px[2], 255]);
        }
        Frame::from_rgba8(w, h, data)
    }

    /// Pull the newest available frame; keep the last good one on a
    /// transient failure. No looping — a live capture has no cursor.
    fn advance(&mut self) {
        if let Some(cam) = self.cam.as_mut() {
            match Self::grab(cam) {
                Ok(frame) => self.last_frame = frame,
                Err(e) => warn!("webcam read hiccup, reusing last frame: {e}"),
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut cam) = self.cam.take()
            && let Err(e) = cam.stop_stream()
        {
            warn!("failed to stop webcam {}: {e}", self.index);
        }
    }
}

/// A closed tagged variant over the three media behaviors. The
/// branching (loop / newest / static) lives in `current_frame` so the
/// "never empty after open" contract is auditable in one place.
pub enum FrameSource {
    Image { path: PathBuf, frame: Frame },
    Video(VideoSource),
    Webcam(WebcamSource),
}

impl FrameSource {
    /// Open a media source. Fails with `MediaOpen` when the file is
    /// unreadable, the format unsupported, or the device unavailable.
    pub fn open(descriptor: &MediaDescriptor) -> PromapResult<FrameSource> {
        match descriptor {
            MediaDescriptor::ImagePath(path) => {
                let img = image::open(path)
                    .map_err(|e| {
                        PromapError::media_open(format!(
                            "cannot load image '{}': {e}",
                            path.display()
                        ))
                    })?
                    .to_rgba8();
                let (w, h) = img.dimensions();
                let frame = Frame::from_rgba8(w, h, img.into_raw())?;
                Ok(FrameSource::Image {
                    path: path.clone(),
                    frame,
                })
            }
            MediaDescriptor::VideoPath(path) => Ok(FrameSource::Video(VideoSource::open(path)?)),
            MediaDescriptor::WebcamIndex(index) => {
                Ok(FrameSource::Webcam(WebcamSource::open(*index)?))
            }
        }
    }

    /// Wrap an already-decoded buffer as a static image source (test
    /// patterns, generated content).
    pub fn from_frame(frame: Frame) -> FrameSource {
        FrameSource::Image {
            path: PathBuf::new(),
            frame,
        }
    }

    /// The current pixel buffer. Images return the same buffer every
    /// call; videos advance one frame and wrap to frame 0 at
    /// end-of-stream; webcams pull the newest frame. Never empty after a
    /// successful open.
    pub fn current_frame(&mut self) -> &Frame {
        match self {
            FrameSource::Image { frame, .. } => frame,
            FrameSource::Video(v) => {
                v.advance();
                &v.last_frame
            }
            FrameSource::Webcam(w) => {
                w.advance();
                &w.last_frame
            }
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            FrameSource::Image { .. } => MediaKind::Image,
            FrameSource::Video(_) => MediaKind::Video,
            FrameSource::Webcam(_) => MediaKind::Webcam,
        }
    }

    pub fn descriptor(&self) -> MediaDescriptor {
        match self {
            FrameSource::Image { path, .. } => MediaDescriptor::ImagePath(path.clone()),
            FrameSource::Video(v) => MediaDescriptor::VideoPath(v.info.source_path.clone()),
            FrameSource::Webcam(w) => MediaDescriptor::WebcamIndex(w.index),
        }
    }

    pub fn video_info(&self) -> Option<&VideoSourceInfo> {
        match self {
            FrameSource::Video(v) => Some(&v.info),
            _ => None,
        }
    }

    /// Close the underlying decoder/device. Idempotent; failures are
    /// logged, never propagated, so deletion and shutdown can't stall.
    pub fn release(&mut self) {
        match self {
            FrameSource::Image { .. } => {}
            FrameSource::Video(v) => v.release(),
            FrameSource::Webcam(w) => w.release(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_classifies_by_extension() {
        assert_eq!(
            MediaDescriptor::from_path("clip.MP4").kind(),
            MediaKind::Video
        );
        assert_eq!(
            MediaDescriptor::from_path("loop.webm").kind(),
            MediaKind::Video
        );
        assert_eq!(
            MediaDescriptor::from_path("photo.png").kind(),
            MediaKind::Image
        );
        assert_eq!(
            MediaDescriptor::from_path("no_extension").kind(),
            MediaKind::Image
        );
    }

    #[test]
    fn ff_ratio_parsing() {
        assert_eq!(parse_ff_ratio("30/1"), Some((30, 1)));
        assert_eq!(parse_ff_ratio("30000/1001"), Some((30000, 1001)));
        assert_eq!(parse_ff_ratio("30/0"), None);
        assert_eq!(parse_ff_ratio("garbage"), None);
    }

    #[test]
    fn duration_whole_secs_floors() {
        let mut info = VideoSourceInfo {
            source_path: PathBuf::from("a.mp4"),
            width: 64,
            height: 64,
            fps_num: 30,
            fps_den: 1,
            frame_count: 135,
            duration_sec: 4.5,
        };
        assert_eq!(info.duration_whole_secs(), Some(4));

        info.frame_count = 0;
        assert_eq!(info.duration_whole_secs(), None);

        info.frame_count = 10;
        info.fps_num = 0;
        assert_eq!(info.duration_whole_secs(), None);
    }

    #[test]
    fn image_open_failure_is_media_open() {
        let err = FrameSource::open(&MediaDescriptor::ImagePath(PathBuf::from(
            "/definitely/not/here.png",
        )));
        assert!(matches!(err, Err(PromapError::MediaOpen(_))));
    }
}
