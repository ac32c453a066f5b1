//! Native CPU engine.
//!
//! Interprets the image subset of the ffmpeg command language with the
//! `image` crate, against the same virtual filesystem contract as the wasm
//! engines. Decoding, scaling and encoding run on the blocking pool.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, instrument};

use toolkit_media_common::MediaError;

use crate::capability::Backend;
use crate::command::{OutputFormat, quality_from_qscale};
use crate::engine::EngineBuild;
use crate::media::{ExecOutcome, MediaEngine};
use crate::store::{LogEntry, LogLevel, ProgressSink};
use crate::vfs::MemFs;

/// Default JPEG quality when no `-q:v` is given (ffmpeg's default qscale).
const DEFAULT_JPEG_QUALITY: u8 = 75;

/// One side of a `scale` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDim {
    /// Exact pixel count.
    Pixels(u32),
    /// `-1`: proportional to the other axis.
    Auto,
    /// `-2`: proportional, rounded to an even number.
    AutoEven,
    /// `0`: keep this axis' source size.
    Source,
    /// `iw`: source width.
    InputWidth,
    /// `ih`: source height.
    InputHeight,
}

impl ScaleDim {
    fn parse(token: &str) -> Result<Self, MediaError> {
        match token.trim() {
            "-1" => Ok(Self::Auto),
            "-2" => Ok(Self::AutoEven),
            "0" => Ok(Self::Source),
            "iw" | "in_w" => Ok(Self::InputWidth),
            "ih" | "in_h" => Ok(Self::InputHeight),
            other => other
                .parse::<u32>()
                .map(Self::Pixels)
                .map_err(|_| MediaError::job_failed(format!("Invalid size '{other}' for scale filter"))),
        }
    }

    fn is_auto(self) -> bool {
        matches!(self, Self::Auto | Self::AutoEven)
    }

    fn resolve(self, own: u32, src_w: u32, src_h: u32) -> Option<u32> {
        match self {
            Self::Pixels(px) => Some(px),
            Self::Source => Some(own),
            Self::InputWidth => Some(src_w),
            Self::InputHeight => Some(src_h),
            Self::Auto | Self::AutoEven => None,
        }
    }
}

/// A parsed `scale` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleSpec {
    /// Requested width.
    pub width: ScaleDim,
    /// Requested height.
    pub height: ScaleDim,
    /// `force_original_aspect_ratio=decrease`.
    pub decrease: bool,
}

impl ScaleSpec {
    /// Parse `scale=W:H[:force_original_aspect_ratio=decrease]`.
    pub fn parse(filter: &str) -> Result<Self, MediaError> {
        let Some(body) = filter.trim().strip_prefix("scale=") else {
            let name = filter.split('=').next().unwrap_or(filter);
            return Err(MediaError::job_failed(format!("No such filter: '{name}'")));
        };

        let mut positional = Vec::with_capacity(2);
        let mut decrease = false;

        for part in body.split(':') {
            match part.split_once('=') {
                Some(("w" | "width", value)) => positional.insert(0, ScaleDim::parse(value)?),
                Some(("h" | "height", value)) => positional.push(ScaleDim::parse(value)?),
                Some(("force_original_aspect_ratio", value)) => match value {
                    "decrease" => decrease = true,
                    "disable" | "0" => decrease = false,
                    other => {
                        return Err(MediaError::job_failed(format!(
                            "Unsupported force_original_aspect_ratio '{other}'"
                        )));
                    }
                },
                Some((key, _)) => {
                    return Err(MediaError::job_failed(format!(
                        "Option '{key}' not found for scale filter"
                    )));
                }
                None => positional.push(ScaleDim::parse(part)?),
            }
        }

        match positional.as_slice() {
            [width, height] => Ok(Self {
                width: *width,
                height: *height,
                decrease,
            }),
            _ => Err(MediaError::job_failed(format!(
                "Invalid scale filter '{filter}': expected width and height"
            ))),
        }
    }
}

/// Compute output dimensions for a source size and a scale spec.
///
/// Every returned dimension is at least 1.
pub fn compute_dimensions(src_w: u32, src_h: u32, spec: &ScaleSpec) -> (u32, u32) {
    let (src_w, src_h) = (src_w.max(1), src_h.max(1));
    let width = spec.width.resolve(src_w, src_w, src_h);
    let height = spec.height.resolve(src_h, src_w, src_h);

    let (w, h) = match (width, height) {
        (None, None) => (src_w, src_h),
        (Some(w), None) => {
            let h = scaled(w, src_h, src_w);
            (w, round_even_if(h, spec.height == ScaleDim::AutoEven))
        }
        (None, Some(h)) => {
            let w = scaled(h, src_w, src_h);
            (round_even_if(w, spec.width == ScaleDim::AutoEven), h)
        }
        (Some(w), Some(h)) if spec.decrease && !spec.width.is_auto() && !spec.height.is_auto() => {
            fit_inside(src_w, src_h, w, h)
        }
        (Some(w), Some(h)) => (w, h),
    };

    (w.max(1), h.max(1))
}

/// `value * num / den`, rounded to nearest.
fn scaled(value: u32, num: u32, den: u32) -> u32 {
    let result = (u64::from(value) * u64::from(num) + u64::from(den) / 2) / u64::from(den.max(1));
    u32::try_from(result).unwrap_or(u32::MAX)
}

fn round_even_if(value: u32, even: bool) -> u32 {
    if even {
        (value.saturating_add(1) / 2 * 2).max(2)
    } else {
        value
    }
}

/// Largest box with the source aspect ratio that fits inside `max_w x max_h`.
fn fit_inside(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    // Compare max_w / src_w against max_h / src_h without floats.
    if u64::from(max_w) * u64::from(src_h) <= u64::from(max_h) * u64::from(src_w) {
        (max_w, scaled(max_w, src_h, src_w).min(max_h))
    } else {
        (scaled(max_h, src_w, src_h).min(max_w), max_h)
    }
}

/// A parsed native command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCommand {
    /// Input file name.
    pub input: String,
    /// Output file name.
    pub output: String,
    /// Output format, from the output extension.
    pub format: OutputFormat,
    /// Scale filter, if any.
    pub scale: Option<ScaleSpec>,
    /// Encoder quality, 1-100.
    pub quality: Option<u8>,
}

impl NativeCommand {
    /// Parse an argument list (without program name).
    pub fn parse(args: &[String]) -> Result<Self, MediaError> {
        let mut input = None;
        let mut output = None;
        let mut scale = None;
        let mut quality = None;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |name: &str| {
                iter.next().cloned().ok_or_else(|| {
                    MediaError::job_failed(format!("Missing argument for option '{name}'"))
                })
            };

            match arg.as_str() {
                "-i" => input = Some(value("i")?),
                "-vf" | "-filter:v" => scale = Some(ScaleSpec::parse(&value("vf")?)?),
                "-q:v" | "-qscale:v" => {
                    let qscale = parse_number(&value("q:v")?, "q:v")?;
                    quality = Some(quality_from_qscale(qscale));
                }
                "-quality" => {
                    let q = parse_number(&value("quality")?, "quality")?;
                    quality = Some(q.clamp(1, 100));
                }
                "-compression_level" | "-loglevel" | "-frames:v" => {
                    value(arg.trim_start_matches('-'))?;
                }
                "-y" | "-hide_banner" | "-nostdin" => {}
                flag if flag.starts_with('-') && flag.len() > 1 => {
                    return Err(MediaError::job_failed(format!(
                        "Unrecognized option '{}'",
                        flag.trim_start_matches('-')
                    )));
                }
                positional => {
                    if output.replace(positional.to_string()).is_some() {
                        return Err(MediaError::job_failed(
                            "Only one output file is supported",
                        ));
                    }
                }
            }
        }

        let input = input.ok_or_else(|| MediaError::job_failed("No input file specified"))?;
        let output = output.ok_or_else(|| {
            MediaError::job_failed("At least one output file must be specified")
        })?;

        let format = output
            .rsplit_once('.')
            .and_then(|(_, ext)| OutputFormat::from_extension(ext))
            .ok_or_else(|| {
                MediaError::job_failed(format!(
                    "Unable to choose an output format for '{output}'"
                ))
            })?;

        Ok(Self {
            input,
            output,
            format,
            scale,
            quality,
        })
    }
}

fn parse_number(value: &str, option: &str) -> Result<u8, MediaError> {
    value
        .trim()
        .parse::<i64>()
        .map(|n| u8::try_from(n.clamp(0, 255)).unwrap_or(u8::MAX))
        .map_err(|_| MediaError::job_failed(format!("Invalid value '{value}' for option '{option}'")))
}

/// Decode, scale and encode one image.
pub fn transcode(input: &[u8], command: &NativeCommand) -> Result<Vec<u8>, MediaError> {
    let source = image::load_from_memory(input).map_err(|e| {
        MediaError::job_failed(format!(
            "{}: Invalid data found when processing input ({e})",
            command.input
        ))
    })?;

    let scaled = match &command.scale {
        Some(spec) => {
            let (w, h) = compute_dimensions(source.width(), source.height(), spec);
            if (w, h) == (source.width(), source.height()) {
                source
            } else {
                source.resize_exact(w, h, FilterType::Lanczos3)
            }
        }
        None => source,
    };

    encode(&scaled, command.format, command.quality)
}

fn encode(image: &DynamicImage, format: OutputFormat, quality: Option<u8>) -> Result<Vec<u8>, MediaError> {
    let mut buffer = Vec::new();

    let result = match format {
        OutputFormat::Png => image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png),
        OutputFormat::Jpeg => {
            let quality = quality.unwrap_or(DEFAULT_JPEG_QUALITY);
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
        }
        // The bundled WebP encoder is lossless, so quality has no effect.
        OutputFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut buffer);
            DynamicImage::ImageRgba8(image.to_rgba8()).write_with_encoder(encoder)
        }
    };

    result.map_err(|e| MediaError::job_failed(format!("Error encoding {format} output: {e}")))?;
    Ok(buffer)
}

/// In-process engine built on the `image` crate.
#[derive(Debug, Default)]
pub struct NativeMediaEngine {
    vfs: Arc<MemFs>,
    terminated: AtomicBool,
}

impl NativeMediaEngine {
    /// Create an engine with an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaEngine for NativeMediaEngine {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn build(&self) -> Option<EngineBuild> {
        None
    }

    fn vfs(&self) -> &Arc<MemFs> {
        &self.vfs
    }

    #[instrument(skip_all, fields(backend = "cpu"))]
    async fn exec(&self, args: &[String], progress: &ProgressSink) -> Result<ExecOutcome, MediaError> {
        if self.is_terminated() {
            return Err(MediaError::Terminated);
        }

        let start = Instant::now();
        let command = NativeCommand::parse(args)?;
        let input: Bytes = self.vfs.read_file(&command.input).map_err(|_| {
            MediaError::job_failed(format!("{}: No such file or directory", command.input))
        })?;
        progress.report(10);

        let job = command.clone();
        let output = tokio::task::spawn_blocking(move || transcode(&input, &job))
            .await
            .map_err(|e| MediaError::job_failed(format!("Native engine task failed: {e}")))??;
        progress.report(90);

        if self.is_terminated() {
            return Err(MediaError::Terminated);
        }

        let written = output.len();
        self.vfs.write_file(&command.output, output)?;
        progress.report(100);

        debug!(
            output = %command.output,
            bytes = written,
            duration_ms = start.elapsed().as_millis(),
            "Native engine run completed"
        );

        Ok(ExecOutcome {
            logs: vec![LogEntry {
                level: LogLevel::Info,
                message: format!("Output #0, {}, to '{}'", command.format, command.output),
                timestamp: Instant::now(),
            }],
            duration: start.elapsed(),
        })
    }

    fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.vfs.clear();
            debug!("Native engine terminated");
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}
