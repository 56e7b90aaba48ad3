//! Video files and live cameras decoded by an `ffmpeg` subprocess.
//!
//! The child process writes raw `rgb24` frames to its stdout, which is
//! read one frame-sized chunk at a time. Frame dimensions are probed up
//! front with `ffprobe`. Reads happen on the caller's thread; there is no
//! background reader, so a slow consumer sees a growing delay on live
//! sources.

use std::fmt;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};

use lamina_pipeline::{Frame, RgbImage};

use crate::error::SourceError;
use crate::generator::Generator;
use crate::registry::{GeneratorFactory, SourceId};
use crate::still::has_extension;

/// File extensions accepted as video (compared lowercase).
pub const VIDEO_EXTENSIONS: [&str; 4] = [".mp4", ".avi", ".mkv", ".mov"];

/// URL schemes accepted as live streams.
pub const STREAM_SCHEMES: [&str; 3] = ["http://", "https://", "rtsp://"];

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

/// What to hand `ffmpeg`/`ffprobe` as input: demuxer options plus a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegInput {
    options: Vec<String>,
    url: String,
}

impl FfmpegInput {
    /// A media file.
    #[must_use]
    pub fn file(path: &str) -> Self {
        Self {
            options: Vec::new(),
            url: path.to_owned(),
        }
    }

    /// A V4L2 capture device, `/dev/video<index>`.
    #[must_use]
    pub fn device(index: u32) -> Self {
        Self {
            options: vec!["-f".to_owned(), "video4linux2".to_owned()],
            url: format!("/dev/video{index}"),
        }
    }

    /// A network stream. RTSP is forced onto TCP.
    #[must_use]
    pub fn stream(url: &str) -> Self {
        let options = if url.starts_with("rtsp://") {
            vec!["-rtsp_transport".to_owned(), "tcp".to_owned()]
        } else {
            Vec::new()
        };
        Self {
            options,
            url: url.to_owned(),
        }
    }

    /// The input URL or path.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn decode_command(&self) -> Command {
        let mut cmd = Command::new(FFMPEG);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        cmd.args(&self.options);
        cmd.arg("-i")
            .arg(&self.url)
            .arg("-an")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
        cmd
    }

    fn probe_command(&self) -> Command {
        let mut cmd = Command::new(FFPROBE);
        cmd.arg("-v").arg("error");
        cmd.args(&self.options);
        cmd.arg("-select_streams")
            .arg("v:0")
            .arg("-show_entries")
            .arg("stream=width,height")
            .arg("-of")
            .arg("csv=s=x:p=0")
            .arg(&self.url);
        cmd
    }
}

/// Parse `ffprobe`'s `WIDTHxHEIGHT` output (first line only).
#[must_use]
pub fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split('x');
    let width = parts.next()?.trim().parse().ok()?;
    let height = parts.next()?.trim().parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Ask `ffprobe` for the first video stream's dimensions.
///
/// # Errors
///
/// Returns [`SourceError::Spawn`] if `ffprobe` cannot be run and
/// [`SourceError::Open`] if it fails or reports no video stream.
pub fn probe_dimensions(input: &FfmpegInput) -> Result<(u32, u32), SourceError> {
    let output = input
        .probe_command()
        .stdin(Stdio::null())
        .output()
        .map_err(|source| SourceError::Spawn {
            program: FFPROBE,
            source,
        })?;

    if !output.status.success() {
        return Err(SourceError::Open {
            id: input.url.clone(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    parse_dimensions(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        SourceError::Open {
            id: input.url.clone(),
            reason: "no video stream".to_owned(),
        }
    })
}

/// A running `ffmpeg` decoder producing fixed-size RGB frames.
///
/// The child is killed when the reader is dropped.
#[derive(Debug)]
pub struct FfmpegReader {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl FfmpegReader {
    /// Start decoding `input`, expecting `width × height` frames.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Spawn`] if `ffmpeg` cannot be started.
    pub fn spawn(input: &FfmpegInput, width: u32, height: u32) -> Result<Self, SourceError> {
        let spawn_err = |source| SourceError::Spawn {
            program: FFMPEG,
            source,
        };
        let mut child = input
            .decode_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_err)?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(spawn_err(std::io::Error::other("ffmpeg stdout not captured")));
        };

        tracing::debug!(url = input.url(), width, height, "ffmpeg decoder started");
        Ok(Self {
            child,
            stdout,
            width,
            height,
        })
    }

    /// Read the next frame; `None` on end of input or a short read.
    pub fn read_frame(&mut self) -> Option<Frame> {
        let len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0_u8; len];
        if let Err(err) = self.stdout.read_exact(&mut buf) {
            tracing::debug!(%err, "ffmpeg stream ended");
            return None;
        }
        RgbImage::from_raw(self.width, self.height, buf).map(Frame::Color)
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A decoder that can be started again from the beginning of its input.
pub trait Decoder {
    /// The running decode.
    type Stream;

    /// Start decoding from the first frame.
    ///
    /// # Errors
    ///
    /// Returns the error that kept the decoder from starting.
    fn start(&self) -> Result<Self::Stream, SourceError>;

    /// Read the next frame from `stream`; `None` at end of input.
    fn next_frame(stream: &mut Self::Stream) -> Option<Frame>;

    /// The input, for logs and errors.
    fn url(&self) -> &str;
}

/// Decodes a media file with `ffmpeg` at probed dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegDecoder {
    input: FfmpegInput,
    width: u32,
    height: u32,
}

impl FfmpegDecoder {
    /// Probe `input` for its frame size.
    ///
    /// # Errors
    ///
    /// See [`probe_dimensions`].
    pub fn probe(input: FfmpegInput) -> Result<Self, SourceError> {
        let (width, height) = probe_dimensions(&input)?;
        Ok(Self {
            input,
            width,
            height,
        })
    }
}

impl Decoder for FfmpegDecoder {
    type Stream = FfmpegReader;

    fn start(&self) -> Result<FfmpegReader, SourceError> {
        FfmpegReader::spawn(&self.input, self.width, self.height)
    }

    fn next_frame(stream: &mut FfmpegReader) -> Option<Frame> {
        stream.read_frame()
    }

    fn url(&self) -> &str {
        self.input.url()
    }
}

/// Frames from a video file, optionally restarting at the end.
pub struct VideoGenerator<D: Decoder = FfmpegDecoder> {
    decoder: D,
    looping: bool,
    stream: Option<D::Stream>,
    first: Option<Frame>,
}

impl<D: Decoder> fmt::Debug for VideoGenerator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoGenerator")
            .field("url", &self.decoder.url())
            .field("looping", &self.looping)
            .field("running", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl VideoGenerator {
    /// Open a video file and read its first frame.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Open`] if the file has no video stream or the
    /// first frame cannot be read, and [`SourceError::Spawn`] if the
    /// decoder tools are missing.
    pub fn open(path: &str, looping: bool) -> Result<Self, SourceError> {
        Self::with_decoder(FfmpegDecoder::probe(FfmpegInput::file(path))?, looping)
    }
}

impl<D: Decoder> VideoGenerator<D> {
    /// Start `decoder` and read its first frame.
    ///
    /// # Errors
    ///
    /// Returns the decoder's start error, or [`SourceError::Open`] if the
    /// input has no first frame.
    pub fn with_decoder(decoder: D, looping: bool) -> Result<Self, SourceError> {
        let mut stream = decoder.start()?;
        let first = D::next_frame(&mut stream).ok_or_else(|| SourceError::Open {
            id: decoder.url().to_owned(),
            reason: "could not read the first frame".to_owned(),
        })?;
        Ok(Self {
            decoder,
            looping,
            stream: Some(stream),
            first: Some(first),
        })
    }

    fn restart(&mut self) -> Option<Frame> {
        self.stream = None;
        match self.decoder.start() {
            Ok(stream) => {
                tracing::debug!(url = self.decoder.url(), "video restarted");
                D::next_frame(self.stream.insert(stream))
            }
            Err(err) => {
                tracing::warn!(%err, "failed to restart video");
                None
            }
        }
    }
}

impl<D: Decoder> Generator for VideoGenerator<D> {
    fn read(&mut self) -> Option<Frame> {
        if let Some(frame) = self.first.take() {
            return Some(frame);
        }
        let frame = self.stream.as_mut().and_then(D::next_frame);
        match frame {
            Some(frame) => Some(frame),
            None if self.looping => self.restart(),
            None => {
                self.stream = None;
                None
            }
        }
    }
}

/// Frames from a capture device or network stream.
#[derive(Debug)]
pub struct CameraGenerator {
    reader: FfmpegReader,
}

impl CameraGenerator {
    /// Start capturing from `input`.
    ///
    /// # Errors
    ///
    /// See [`probe_dimensions`] and [`FfmpegReader::spawn`].
    pub fn open(input: &FfmpegInput) -> Result<Self, SourceError> {
        let (width, height) = probe_dimensions(input)?;
        Ok(Self {
            reader: FfmpegReader::spawn(input, width, height)?,
        })
    }
}

impl Generator for CameraGenerator {
    fn read(&mut self) -> Option<Frame> {
        self.reader.read_frame()
    }
}

/// Factory for [`VideoGenerator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoFactory;

impl GeneratorFactory for VideoFactory {
    fn kind(&self) -> &'static str {
        "video"
    }

    fn probe(&self, id: &SourceId) -> bool {
        id.as_text()
            .is_some_and(|text| has_extension(text, &VIDEO_EXTENSIONS))
    }

    fn open(&self, id: &SourceId, looping: bool) -> Result<Box<dyn Generator>, SourceError> {
        let path = id.as_text().ok_or_else(|| SourceError::Open {
            id: id.to_string(),
            reason: "not a file path".to_owned(),
        })?;
        Ok(Box::new(VideoGenerator::open(path, looping)?))
    }
}

/// Factory for [`CameraGenerator`]. Ignores the loop flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraFactory;

impl CameraFactory {
    fn input(id: &SourceId) -> Option<FfmpegInput> {
        match id {
            SourceId::Device(index) => Some(FfmpegInput::device(*index)),
            SourceId::Text(text) => {
                if let Ok(index) = text.trim().parse::<u32>() {
                    Some(FfmpegInput::device(index))
                } else if STREAM_SCHEMES.iter().any(|s| text.starts_with(s)) {
                    Some(FfmpegInput::stream(text))
                } else {
                    None
                }
            }
            SourceId::Sdk(_) => None,
        }
    }
}

impl GeneratorFactory for CameraFactory {
    fn kind(&self) -> &'static str {
        "camera"
    }

    fn probe(&self, id: &SourceId) -> bool {
        Self::input(id).is_some()
    }

    fn open(&self, id: &SourceId, _looping: bool) -> Result<Box<dyn Generator>, SourceError> {
        let input = Self::input(id).ok_or_else(|| SourceError::Open {
            id: id.to_string(),
            reason: "not a camera identifier".to_owned(),
        })?;
        Ok(Box::new(CameraGenerator::open(&input)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;

    use image::Luma;
    use lamina_pipeline::GrayImage;

    use super::*;

    /// A clip of `len` one-pixel frames numbered from zero.
    struct Clip {
        len: u8,
        starts: Cell<usize>,
        fail_restart: bool,
    }

    impl Clip {
        fn new(len: u8) -> Self {
            Self {
                len,
                starts: Cell::new(0),
                fail_restart: false,
            }
        }
    }

    impl Decoder for Clip {
        type Stream = VecDeque<Frame>;

        fn start(&self) -> Result<VecDeque<Frame>, SourceError> {
            if self.fail_restart && self.starts.get() > 0 {
                return Err(SourceError::Open {
                    id: "clip".to_owned(),
                    reason: "gone".to_owned(),
                });
            }
            self.starts.set(self.starts.get() + 1);
            Ok((0..self.len)
                .map(|v| Frame::Gray(GrayImage::from_pixel(1, 1, Luma([v]))))
                .collect())
        }

        fn next_frame(stream: &mut VecDeque<Frame>) -> Option<Frame> {
            stream.pop_front()
        }

        fn url(&self) -> &str {
            "clip"
        }
    }

    fn values<D: Decoder>(generator: &mut VideoGenerator<D>, n: usize) -> Vec<Option<u8>> {
        (0..n)
            .map(|_| generator.read().map(|f| f.to_gray().get_pixel(0, 0).0[0]))
            .collect()
    }

    #[test]
    fn looping_video_restarts_at_end() {
        let mut video = VideoGenerator::with_decoder(Clip::new(3), true).unwrap();
        assert_eq!(
            values(&mut video, 7),
            [Some(0), Some(1), Some(2), Some(0), Some(1), Some(2), Some(0)]
        );
        assert_eq!(video.decoder.starts.get(), 3);
    }

    #[test]
    fn video_without_loop_ends() {
        let mut video = VideoGenerator::with_decoder(Clip::new(2), false).unwrap();
        assert_eq!(values(&mut video, 4), [Some(0), Some(1), None, None]);
        assert_eq!(video.decoder.starts.get(), 1);
    }

    #[test]
    fn failed_restart_ends_the_video() {
        let clip = Clip {
            fail_restart: true,
            ..Clip::new(1)
        };
        let mut video = VideoGenerator::with_decoder(clip, true).unwrap();
        assert_eq!(values(&mut video, 2), [Some(0), None]);
    }

    #[test]
    fn empty_video_fails_to_open() {
        let err = VideoGenerator::with_decoder(Clip::new(0), true).unwrap_err();
        assert!(matches!(err, SourceError::Open { .. }));
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn parses_probe_output() {
        assert_eq!(parse_dimensions("640x480\n"), Some((640, 480)));
        assert_eq!(parse_dimensions("\n1920x1080\n1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("0x480"), None);
        assert_eq!(parse_dimensions("N/A"), None);
        assert_eq!(parse_dimensions(""), None);
    }

    #[test]
    fn device_input_uses_v4l2() {
        let input = FfmpegInput::device(2);
        let cmd = input.decode_command();
        assert_eq!(cmd.get_program(), FFMPEG);
        let args = args(&cmd);
        let at = args.iter().position(|a| a == "-f").unwrap_or(usize::MAX);
        assert_eq!(args.get(at + 1).map(String::as_str), Some("video4linux2"));
        assert!(args.contains(&"/dev/video2".to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert!(args.contains(&"rgb24".to_owned()));
    }

    #[test]
    fn rtsp_is_forced_onto_tcp() {
        let args = args(&FfmpegInput::stream("rtsp://cam/1").probe_command());
        assert!(args.windows(2).any(|w| w == ["-rtsp_transport", "tcp"]));
        assert_eq!(args.last().map(String::as_str), Some("rtsp://cam/1"));
        let http = args_of_stream("http://cam/video");
        assert!(!http.contains(&"-rtsp_transport".to_owned()));
    }

    fn args_of_stream(url: &str) -> Vec<String> {
        args(&FfmpegInput::stream(url).decode_command())
    }

    #[test]
    fn video_probe_matches_extensions() {
        assert!(VideoFactory.probe(&SourceId::from("clip.MP4")));
        assert!(VideoFactory.probe(&SourceId::from("clip.avi")));
        assert!(VideoFactory.probe(&SourceId::from("clip.mkv")));
        assert!(!VideoFactory.probe(&SourceId::from("still.png")));
        assert!(!VideoFactory.probe(&SourceId::Device(0)));
    }

    #[test]
    fn camera_probe_accepts_indices_and_urls() {
        assert!(CameraFactory.probe(&SourceId::Device(0)));
        assert!(CameraFactory.probe(&SourceId::from("1")));
        assert!(CameraFactory.probe(&SourceId::from("http://host/stream")));
        assert!(CameraFactory.probe(&SourceId::from("https://host/stream")));
        assert!(CameraFactory.probe(&SourceId::from("rtsp://host/stream")));
        assert!(!CameraFactory.probe(&SourceId::from("/camera/image_raw")));
        assert!(!CameraFactory.probe(&SourceId::from("clip.mp4")));
    }
}
