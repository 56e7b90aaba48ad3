//! lamina-demo: small programs exercising the lamina layers on a real input.
//!
//! Every subcommand reads frames from `--input` (an image, a video file, a
//! camera index, a stream URL, or a bus topic) and runs one layer, or a
//! chain of layers, with its debug surface enabled. There is no on-screen
//! window: the headless surface records every shown frame and, with
//! `--dump`, writes them as PNG files.
//!
//! # Usage
//!
//! ```text
//! cargo run --bin lamina-demo -- --input clip.mp4 --frames 100 --dump out/ hough
//! ```
//!
//! Set `RUST_LOG=debug` to see parameter loads, edits, and source events.

#![allow(clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lamina_io::{FrameSource, SourceError, SourceOptions};
use lamina_pipeline::{
    DebugSurface, Frame, GaussianFilter, HeadlessSurface, HoughCircleDetector, HsvFilter,
    LayerError, LayerOptions, Overrides, ParamRoot, PipelineError, RoiSelector, Sequential,
};
use tracing_subscriber::EnvFilter;

/// Run a lamina demo program.
#[derive(Parser)]
#[command(name = "lamina-demo", version)]
struct Cli {
    /// Frame source: image or video path, camera index, stream URL, or topic.
    #[arg(long)]
    input: String,

    /// Stop after this many frames (live and looping sources never end
    /// on their own without a key press).
    #[arg(long)]
    frames: Option<usize>,

    /// Write every frame shown on the debug surface to this directory.
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Directory holding parameter files (default `$HOME/.lamina/param`).
    #[arg(long)]
    param_root: Option<PathBuf>,

    /// Full frame source options as a JSON string.
    ///
    /// When provided, the demo's own source settings are ignored. The JSON
    /// must be a valid `SourceOptions` serialization; missing fields take
    /// their defaults.
    #[arg(long)]
    source_json: Option<String>,

    #[command(subcommand)]
    demo: Demo,
}

/// The demo programs.
#[derive(Subcommand, Clone, Copy)]
enum Demo {
    /// Play the input with an FPS overlay.
    Capture,
    /// Detect circles and draw them on the frame.
    Hough,
    /// Threshold each frame by an HSV range, capped at 30 FPS.
    Hsv,
    /// Warp a quadrilateral region onto a fixed-size frame.
    Roi {
        /// Output width.
        #[arg(long, default_value_t = 500)]
        width: u32,
        /// Output height.
        #[arg(long, default_value_t = 500)]
        height: u32,
    },
    /// ROI warp, then Gaussian blur, then HSV threshold.
    Sequential,
}

impl Demo {
    /// The source settings each demo runs with.
    fn source_options(self) -> SourceOptions {
        let defaults = SourceOptions::default();
        match self {
            Self::Capture | Self::Hough => SourceOptions {
                show_video: true,
                show_fps: true,
                ..defaults
            },
            Self::Hsv => SourceOptions {
                max_fps: 30.0,
                looping: true,
                ..defaults
            },
            Self::Roi { .. } | Self::Sequential => SourceOptions {
                looping: true,
                ..defaults
            },
        }
    }
}

/// Everything that can stop a demo.
#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error("error parsing --source-json: {0}")]
    SourceJson(#[from] serde_json::Error),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Resolve the frame source options.
///
/// If `--source-json` is provided it is parsed directly; otherwise the
/// demo's built-in settings are used.
fn source_options(cli: &Cli) -> Result<SourceOptions, DemoError> {
    match &cli.source_json {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(cli.demo.source_options()),
    }
}

/// Shared state for one demo run.
struct Session {
    surface: std::rc::Rc<std::cell::RefCell<HeadlessSurface>>,
    root: ParamRoot,
    limit: usize,
}

impl Session {
    fn new(cli: &Cli) -> Self {
        let surface = cli
            .dump
            .as_ref()
            .map_or_else(HeadlessSurface::new, |dir| {
                HeadlessSurface::new().with_dump_dir(dir)
            });
        Self {
            surface: surface.shared(),
            root: cli
                .param_root
                .clone()
                .map_or(ParamRoot::User, ParamRoot::Dir),
            limit: cli.frames.unwrap_or(usize::MAX),
        }
    }

    /// Layer options labelled `label`, with the debug surface attached.
    fn layer(&self, label: &str) -> LayerOptions {
        LayerOptions::new(label)
            .root(self.root.clone())
            .debug(self.surface.clone())
    }

    fn show(&self, window: &str, frame: &Frame) {
        self.surface.borrow_mut().show(window, frame, None);
    }
}

fn run(cli: &Cli) -> Result<usize, DemoError> {
    let session = Session::new(cli);
    let source = FrameSource::open(cli.input.as_str(), source_options(cli)?)?
        .with_surface(session.surface.clone());

    let mut frames = 0;
    match cli.demo {
        Demo::Capture => {
            frames = source.take(session.limit).count();
        }
        Demo::Hough => {
            let mut detector = HoughCircleDetector::new(session.layer("default"))?;
            for frame in source.take(session.limit) {
                let circles = detector.detect(&frame, &Overrides::default())?;
                let mut canvas = frame.to_rgb();
                HoughCircleDetector::render(&mut canvas, &circles, true, true);
                session.show("hough_circle", &Frame::Color(canvas));
                tracing::debug!(count = circles.len(), "circles detected");
                frames += 1;
            }
        }
        Demo::Hsv => {
            let mut filter = HsvFilter::new(session.layer("default"))?;
            for frame in source.take(session.limit) {
                let mask = filter.filter(&frame, &Overrides::default())?;
                session.show("hsv_filter_example", &Frame::Gray(mask));
                frames += 1;
            }
        }
        Demo::Roi { width, height } => {
            let mut selector = RoiSelector::new(width, height, session.layer("default"))?;
            for frame in source.take(session.limit) {
                let warped = selector.warp(&frame, &Overrides::default())?;
                session.show("wrapped", &warped);
                frames += 1;
            }
        }
        Demo::Sequential => {
            let mut chain = Sequential::new("default").with_source(source);
            chain
                .add(RoiSelector::new(500, 500, session.layer("default"))?)?
                .add(GaussianFilter::new(session.layer("default").set("ksize", 5))?)?
                .add(HsvFilter::new(session.layer("default"))?)?;
            for output in chain.outputs().take(session.limit) {
                if let Some(frame) = output?.into_frame() {
                    session.show("thresh", &frame);
                }
                frames += 1;
            }
        }
    }
    Ok(frames)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(frames) => {
            tracing::info!(frames, "demo finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn demos_pick_their_source_settings() {
        let cli = Cli::try_parse_from(["lamina-demo", "--input", "a.png", "hsv"]).unwrap();
        let options = source_options(&cli).unwrap();
        assert!(options.looping);
        assert!((options.max_fps - 30.0).abs() < f64::EPSILON);
        assert!(!options.show_video);

        let cli = Cli::try_parse_from(["lamina-demo", "--input", "0", "capture"]).unwrap();
        let options = source_options(&cli).unwrap();
        assert!(options.show_video && options.show_fps);
    }

    #[test]
    fn source_json_replaces_demo_settings() {
        let cli = Cli::try_parse_from([
            "lamina-demo",
            "--input",
            "a.png",
            "--source-json",
            r#"{"gray": true, "exit_keys": [32]}"#,
            "hsv",
        ])
        .unwrap();
        let options = source_options(&cli).unwrap();
        assert!(options.gray);
        assert!(!options.looping);
        assert_eq!(options.exit_keys, [32]);
    }

    #[test]
    fn bad_source_json_is_reported() {
        let cli = Cli::try_parse_from([
            "lamina-demo",
            "--input",
            "a.png",
            "--source-json",
            "{",
            "capture",
        ])
        .unwrap();
        assert!(matches!(
            source_options(&cli),
            Err(DemoError::SourceJson(_))
        ));
    }

    #[test]
    fn roi_size_defaults() {
        let cli = Cli::try_parse_from(["lamina-demo", "--input", "a.png", "roi"]).unwrap();
        assert!(matches!(
            cli.demo,
            Demo::Roi {
                width: 500,
                height: 500
            }
        ));
    }
}
