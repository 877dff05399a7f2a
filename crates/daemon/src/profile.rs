//! Encoding profile catalog.
//!
//! Profiles are immutable named parameter sets. The catalog is built once and
//! shared by `Arc`; lookups never mutate it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for profile lookups
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Profile '{name}' not found. Available: {}", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },
}

/// Codec family a profile encodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    ProRes,
    H264,
    H265,
}

impl Codec {
    /// Container extension conventionally used for this codec.
    pub fn container_extension(&self) -> &'static str {
        match self {
            Codec::ProRes => "mov",
            Codec::H264 | Codec::H265 => "mp4",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::ProRes => write!(f, "prores"),
            Codec::H264 => write!(f, "h264"),
            Codec::H265 => write!(f, "h265"),
        }
    }
}

/// A named set of encoding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub codec: Codec,
    /// Codec-specific preset: ProRes tier (`proxy`, `lt`, `standard`, `hq`) or x264/x265 speed preset
    pub preset: String,
    /// Quality percentage, 0-100
    pub quality: u8,
    /// e.g. `20M`; `None` for unconstrained
    pub max_bitrate: Option<String>,
    /// Output frame rate; `None` keeps the source rate
    pub frame_rate: Option<f64>,
    pub pixel_format: Option<String>,
    /// `W:H` scale filter argument
    pub scale: Option<String>,
    pub audio_codec: String,
    /// `"0"` means the codec's native rate (uncompressed PCM)
    pub audio_bitrate: String,
    /// Container extension without the dot, `mov` or `mp4`
    pub output_extension: String,
    pub description: String,
}

struct ProfileSpec {
    name: &'static str,
    codec: Codec,
    preset: &'static str,
    quality: u8,
    max_bitrate: Option<&'static str>,
    frame_rate: Option<f64>,
    pixel_format: &'static str,
    scale: Option<&'static str>,
    audio_codec: &'static str,
    audio_bitrate: &'static str,
    description: &'static str,
}

const BUILTIN_PROFILES: &[ProfileSpec] = &[
    ProfileSpec {
        name: "live-qlab",
        codec: Codec::ProRes,
        preset: "hq",
        quality: 100,
        max_bitrate: None,
        frame_rate: None,
        pixel_format: "yuv422p10le",
        scale: None,
        audio_codec: "pcm_s24le",
        audio_bitrate: "0",
        description: "ProRes HQ for QLab on macOS (best quality, largest files)",
    },
    ProfileSpec {
        name: "live-prores-lt",
        codec: Codec::ProRes,
        preset: "lt",
        quality: 85,
        max_bitrate: None,
        frame_rate: None,
        pixel_format: "yuv422p10le",
        scale: None,
        audio_codec: "pcm_s24le",
        audio_bitrate: "0",
        description: "ProRes LT for live playback (reduced file size, good quality)",
    },
    ProfileSpec {
        name: "live-h264",
        codec: Codec::H264,
        preset: "slow",
        quality: 95,
        max_bitrate: Some("100M"),
        frame_rate: None,
        pixel_format: "yuv420p",
        scale: None,
        audio_codec: "aac",
        audio_bitrate: "128k",
        description: "H.264 for cross-platform live playback",
    },
    ProfileSpec {
        name: "standard-playback",
        codec: Codec::H264,
        preset: "medium",
        quality: 85,
        max_bitrate: Some("20M"),
        frame_rate: None,
        pixel_format: "yuv420p",
        scale: None,
        audio_codec: "aac",
        audio_bitrate: "128k",
        description: "H.264 for Miccia Player, VLC, general use",
    },
    ProfileSpec {
        name: "stream-hd",
        codec: Codec::H265,
        preset: "medium",
        quality: 80,
        max_bitrate: Some("8M"),
        frame_rate: Some(29.97),
        pixel_format: "yuv420p",
        scale: Some("1920:1080"),
        audio_codec: "aac",
        audio_bitrate: "128k",
        description: "H.265 for streaming (1080p, efficient)",
    },
    ProfileSpec {
        name: "stream-4k",
        codec: Codec::H265,
        preset: "medium",
        quality: 85,
        max_bitrate: Some("25M"),
        frame_rate: Some(29.97),
        pixel_format: "yuv420p",
        scale: Some("3840:2160"),
        audio_codec: "aac",
        audio_bitrate: "128k",
        description: "H.265 for 4K streaming",
    },
    ProfileSpec {
        name: "archival",
        codec: Codec::ProRes,
        preset: "hq",
        quality: 100,
        max_bitrate: None,
        frame_rate: None,
        pixel_format: "yuv422p10le",
        scale: None,
        audio_codec: "pcm_s24le",
        audio_bitrate: "0",
        description: "ProRes HQ for long-term archival storage",
    },
];

impl From<&ProfileSpec> for Profile {
    fn from(spec: &ProfileSpec) -> Self {
        Self {
            name: spec.name.to_string(),
            codec: spec.codec,
            preset: spec.preset.to_string(),
            quality: spec.quality,
            max_bitrate: spec.max_bitrate.map(str::to_string),
            frame_rate: spec.frame_rate,
            pixel_format: Some(spec.pixel_format.to_string()),
            scale: spec.scale.map(str::to_string),
            audio_codec: spec.audio_codec.to_string(),
            audio_bitrate: spec.audio_bitrate.to_string(),
            output_extension: spec.codec.container_extension().to_string(),
            description: spec.description.to_string(),
        }
    }
}

/// Immutable, ordered table of profiles.
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    profiles: Vec<Profile>,
}

impl ProfileCatalog {
    /// The seven built-in profiles, in their canonical order.
    pub fn builtin() -> Self {
        Self {
            profiles: BUILTIN_PROFILES.iter().map(Profile::from).collect(),
        }
    }

    /// Build a catalog from arbitrary profiles. Later duplicates of a name are ignored.
    pub fn from_profiles(profiles: Vec<Profile>) -> Self {
        let mut unique: Vec<Profile> = Vec::with_capacity(profiles.len());
        for profile in profiles {
            if !unique.iter().any(|p| p.name == profile.name) {
                unique.push(profile);
            }
        }
        Self { profiles: unique }
    }

    pub fn get(&self, name: &str) -> Result<&Profile, ProfileError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ProfileError::NotFound {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Owned copy of every profile in catalog order.
    pub fn list(&self) -> Vec<Profile> {
        self.profiles.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.iter().any(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
