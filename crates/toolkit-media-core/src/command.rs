//! Command construction for image jobs.
//!
//! Jobs speak a small subset of the ffmpeg command language:
//!
//! ```text
//! -hide_banner -y -i input.<ext> [-vf scale=W:H[:force_original_aspect_ratio=decrease]] [quality] output.<ext>
//! ```
//!
//! Quality is encoded per codec: JPEG takes the inverted `-q:v` scale
//! (2 best, 31 worst), WebP takes `-quality` as given, PNG takes nothing.

use serde::{Deserialize, Serialize};

/// Virtual file name stem for job input.
pub const INPUT_STEM: &str = "input";

/// Virtual file name stem for job output.
pub const OUTPUT_STEM: &str = "output";

/// Image output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless PNG.
    Png,
    /// JPEG.
    #[serde(alias = "jpg")]
    Jpeg,
    /// WebP.
    Webp,
}

impl OutputFormat {
    /// File extension, without dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    /// MIME type.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    /// Resolve a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Quality arguments for this format.
    pub fn quality_args(self, quality: Option<u8>) -> Vec<String> {
        let Some(quality) = quality else {
            return Vec::new();
        };
        let quality = clamp_quality(quality);

        match self {
            Self::Png => Vec::new(),
            Self::Jpeg => vec!["-q:v".to_string(), jpeg_qscale(quality).to_string()],
            Self::Webp => vec!["-quality".to_string(), quality.to_string()],
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Clamp a user quality to `1..=100`.
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(1, 100)
}

/// Map a 1-100 quality onto the JPEG `-q:v` scale, 2 (best) to 31 (worst).
pub fn jpeg_qscale(quality: u8) -> u8 {
    let quality = u32::from(clamp_quality(quality));
    let scaled = 2 + ((100 - quality) * 29 + 50) / 100;
    // `scaled` is at most 2 + 29 = 31.
    u8::try_from(scaled).unwrap_or(31)
}

/// Inverse of [`jpeg_qscale`], used by the native encoder.
pub fn quality_from_qscale(qscale: u8) -> u8 {
    let qscale = u32::from(qscale.clamp(2, 31));
    let quality = 100 - ((qscale - 2) * 100 + 14) / 29;
    u8::try_from(quality.clamp(1, 100)).unwrap_or(1)
}

/// Image resize parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeParams {
    /// Target width in pixels.
    pub width: Option<u32>,
    /// Target height in pixels.
    pub height: Option<u32>,
    /// Keep the source aspect ratio.
    pub maintain_aspect_ratio: bool,
    /// Output format.
    pub format: OutputFormat,
    /// Output quality, 1-100. Ignored for PNG.
    pub quality: Option<u8>,
}

impl Default for ResizeParams {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            maintain_aspect_ratio: true,
            format: OutputFormat::Png,
            quality: None,
        }
    }
}

impl ResizeParams {
    /// The `scale` filter for these dimensions, if any dimension is set.
    pub fn scale_filter(&self) -> Option<String> {
        let filter = match (self.width, self.height, self.maintain_aspect_ratio) {
            (None, None, _) => return None,
            (Some(w), None, true) => format!("scale={w}:-1"),
            (None, Some(h), true) => format!("scale=-1:{h}"),
            (Some(w), Some(h), true) => {
                format!("scale={w}:{h}:force_original_aspect_ratio=decrease")
            }
            (Some(w), Some(h), false) => format!("scale={w}:{h}"),
            (Some(w), None, false) => format!("scale={w}:ih"),
            (None, Some(h), false) => format!("scale=iw:{h}"),
        };
        Some(filter)
    }
}

/// One engine invocation: virtual input/output names and the argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    input_name: String,
    output_name: String,
    format: OutputFormat,
    args: Vec<String>,
}

impl ProcessingJob {
    /// Resize (and possibly convert) an image.
    ///
    /// `input_ext` is the extension of the uploaded file; anything that is not
    /// a short alphanumeric string falls back to `bin`.
    pub fn resize(input_ext: &str, params: &ResizeParams) -> Self {
        let input_name = input_name(input_ext);
        let output_name = output_name(params.format);

        let mut args = base_args(&input_name);
        if let Some(filter) = params.scale_filter() {
            args.push("-vf".to_string());
            args.push(filter);
        }
        args.extend(params.format.quality_args(params.quality));
        args.push(output_name.clone());

        Self {
            input_name,
            output_name,
            format: params.format,
            args,
        }
    }

    /// Convert an image to another format without resizing.
    pub fn convert(input_ext: &str, format: OutputFormat, quality: Option<u8>) -> Self {
        Self::resize(
            input_ext,
            &ResizeParams {
                format,
                quality,
                ..Default::default()
            },
        )
    }

    /// A job with caller-supplied arguments.
    ///
    /// The arguments are passed verbatim; they should read `input_name` and
    /// write `output_name` of the returned job.
    pub fn custom(input_ext: &str, format: OutputFormat, args: Vec<String>) -> Self {
        Self {
            input_name: input_name(input_ext),
            output_name: output_name(format),
            format,
            args,
        }
    }

    /// Virtual input file name.
    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Virtual output file name.
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Output format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Engine arguments, without program name.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

fn base_args(input_name: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input_name.to_string(),
    ]
}

fn input_name(ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    let ext = if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext.to_ascii_lowercase()
    } else {
        "bin".to_string()
    };
    format!("{INPUT_STEM}.{ext}")
}

fn output_name(format: OutputFormat) -> String {
    format!("{OUTPUT_STEM}.{}", format.extension())
}
