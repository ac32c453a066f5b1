//! Tool registry.
//!
//! The toolkit's pages form a closed set; each slug resolves to one [`Tool`]
//! variant at request time without any dynamic lookup table.

use std::fmt;

use serde::Serialize;

/// A toolkit page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    /// Resize images in the browser.
    ImageResizer,
    /// Convert images between formats.
    ImageConverter,
    /// Re-encode images at a lower quality.
    ImageCompressor,
    /// Turn a video clip into an animated GIF.
    VideoToGif,
    /// Re-encode videos at a lower bitrate.
    VideoCompressor,
    /// Convert audio between formats.
    AudioConverter,
    /// Generate QR codes.
    QrCodeGenerator,
    /// Generate random passwords.
    PasswordGenerator,
    /// Count words and characters.
    WordCounter,
}

impl Tool {
    /// Every tool, in display order.
    pub const ALL: [Tool; 9] = [
        Tool::ImageResizer,
        Tool::ImageConverter,
        Tool::ImageCompressor,
        Tool::VideoToGif,
        Tool::VideoCompressor,
        Tool::AudioConverter,
        Tool::QrCodeGenerator,
        Tool::PasswordGenerator,
        Tool::WordCounter,
    ];

    /// URL slug.
    pub fn slug(self) -> &'static str {
        match self {
            Tool::ImageResizer => "image-resizer",
            Tool::ImageConverter => "image-converter",
            Tool::ImageCompressor => "image-compressor",
            Tool::VideoToGif => "video-to-gif",
            Tool::VideoCompressor => "video-compressor",
            Tool::AudioConverter => "audio-converter",
            Tool::QrCodeGenerator => "qr-code-generator",
            Tool::PasswordGenerator => "password-generator",
            Tool::WordCounter => "word-counter",
        }
    }

    /// Resolve a slug.
    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.slug() == slug)
    }

    /// Page title.
    pub fn title(self) -> &'static str {
        match self {
            Tool::ImageResizer => "Image Resizer",
            Tool::ImageConverter => "Image Converter",
            Tool::ImageCompressor => "Image Compressor",
            Tool::VideoToGif => "Video to GIF",
            Tool::VideoCompressor => "Video Compressor",
            Tool::AudioConverter => "Audio Converter",
            Tool::QrCodeGenerator => "QR Code Generator",
            Tool::PasswordGenerator => "Password Generator",
            Tool::WordCounter => "Word Counter",
        }
    }

    /// Whether the page runs the media engine.
    pub fn uses_media_engine(self) -> bool {
        matches!(
            self,
            Tool::ImageResizer
                | Tool::ImageConverter
                | Tool::ImageCompressor
                | Tool::VideoToGif
                | Tool::VideoCompressor
                | Tool::AudioConverter
        )
    }

    /// Canonical path, without locale prefix.
    pub fn path(self) -> String {
        format!("/tools/{}", self.slug())
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}
