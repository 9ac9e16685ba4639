// Core audio types shared by the directory, notifier and output stream
//
// This module contains the platform-agnostic data model: device identifiers,
// capability scopes, PCM stream formats and the low-level stream description
// derived from them. No host-specific imports belong here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque host-assigned device identifier
///
/// `DeviceId::UNKNOWN` is the host's "no device" sentinel. Identifiers are only
/// meaningful within one host session and must be re-queried after the device
/// list changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Sentinel for "no device" / "unknown" (kAudioObjectUnknown)
    pub const UNKNOWN: DeviceId = DeviceId(0);

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a device capability or of a default-device slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Input,
    Output,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Input, Scope::Output];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Input => "input",
            Scope::Output => "output",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Scope::Input => 0b01,
            Scope::Output => 0b10,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of scopes a device can serve (input, output, both or neither)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScopeSet(u8);

impl ScopeSet {
    pub const EMPTY: ScopeSet = ScopeSet(0);
    pub const BOTH: ScopeSet = ScopeSet(0b11);

    pub fn only(scope: Scope) -> Self {
        ScopeSet(scope.bit())
    }

    pub fn insert(&mut self, scope: Scope) {
        self.0 |= scope.bit();
    }

    pub fn contains(self, scope: Scope) -> bool {
        self.0 & scope.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Scope> {
        Scope::ALL.into_iter().filter(move |scope| self.contains(*scope))
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        let mut set = ScopeSet::EMPTY;
        for scope in iter {
            set.insert(scope);
        }
        set
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let scopes = Vec::<Scope>::deserialize(deserializer)?;
        Ok(scopes.into_iter().collect())
    }
}

/// Device view produced by directory queries; recomputed on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub capability: ScopeSet,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

/// Device change classes delivered by the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceChangeKind {
    DefaultInputChanged,
    DefaultOutputChanged,
    DeviceListChanged,
}

impl DeviceChangeKind {
    pub const ALL: [DeviceChangeKind; 3] = [
        DeviceChangeKind::DefaultOutputChanged,
        DeviceChangeKind::DefaultInputChanged,
        DeviceChangeKind::DeviceListChanged,
    ];
}

/// Supported PCM sample encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// PCM signed 16-bit little-endian
    S16LE,
    /// PCM signed 16-bit big-endian
    S16BE,
    /// PCM 32-bit floating-point little-endian
    F32LE,
    /// PCM 32-bit floating-point big-endian
    F32BE,
}

impl SampleEncoding {
    pub const ALL: [SampleEncoding; 4] = [
        SampleEncoding::S16LE,
        SampleEncoding::S16BE,
        SampleEncoding::F32LE,
        SampleEncoding::F32BE,
    ];

    pub fn bytes_per_sample(self) -> u32 {
        match self {
            SampleEncoding::S16LE | SampleEncoding::S16BE => 2,
            SampleEncoding::F32LE | SampleEncoding::F32BE => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleEncoding::F32LE | SampleEncoding::F32BE)
    }

    pub fn is_big_endian(self) -> bool {
        matches!(self, SampleEncoding::S16BE | SampleEncoding::F32BE)
    }

    /// Encode one sample in `[-1.0, 1.0]` into `out`, which must hold
    /// `bytes_per_sample()` bytes.
    pub fn write_sample(self, value: f32, out: &mut [u8]) {
        match self {
            SampleEncoding::S16LE => out.copy_from_slice(&to_s16(value).to_le_bytes()),
            SampleEncoding::S16BE => out.copy_from_slice(&to_s16(value).to_be_bytes()),
            SampleEncoding::F32LE => out.copy_from_slice(&value.to_le_bytes()),
            SampleEncoding::F32BE => out.copy_from_slice(&value.to_be_bytes()),
        }
    }

    /// Decode one sample previously written with `write_sample`
    pub fn read_sample(self, bytes: &[u8]) -> f32 {
        match self {
            SampleEncoding::S16LE => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32767.0,
            SampleEncoding::S16BE => i16::from_be_bytes([bytes[0], bytes[1]]) as f32 / 32767.0,
            SampleEncoding::F32LE => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            SampleEncoding::F32BE => f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

fn to_s16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * 32767.0) as i16
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleEncoding::S16LE => "s16le",
            SampleEncoding::S16BE => "s16be",
            SampleEncoding::F32LE => "f32le",
            SampleEncoding::F32BE => "f32be",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for SampleEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s16le" => Ok(SampleEncoding::S16LE),
            "s16be" => Ok(SampleEncoding::S16BE),
            "f32le" => Ok(SampleEncoding::F32LE),
            "f32be" => Ok(SampleEncoding::F32BE),
            other => Err(format!("unknown sample encoding '{}'", other)),
        }
    }
}

/// Most channels a stream may carry
pub const MAX_CHANNELS: u32 = 1024;

/// PCM stream format; immutable once a stream has been created
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub encoding: SampleEncoding,
    pub channels: u32,
    pub sample_rate: f64,
}

impl StreamFormat {
    pub fn new(encoding: SampleEncoding, channels: u32, sample_rate: f64) -> Self {
        Self {
            encoding,
            channels,
            sample_rate,
        }
    }

    /// Interleaved stereo little-endian float
    pub fn stereo_f32(sample_rate: f64) -> Self {
        Self::new(SampleEncoding::F32LE, 2, sample_rate)
    }

    /// Saturates for channel counts `validate` rejects
    pub fn bytes_per_frame(&self) -> u32 {
        self.encoding
            .bytes_per_sample()
            .checked_mul(self.channels)
            .unwrap_or(u32::MAX)
    }

    /// Check the format before any host resource is touched
    pub fn validate(&self) -> Result<(), String> {
        if self.channels == 0 {
            return Err("channel count must be positive".to_string());
        }
        if self.channels > MAX_CHANNELS {
            return Err(format!(
                "channel count {} exceeds the maximum of {}",
                self.channels, MAX_CHANNELS
            ));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(format!(
                "sample rate must be a positive finite number, got {}",
                self.sample_rate
            ));
        }
        Ok(())
    }

    /// Derive the low-level linear PCM description handed to the host
    pub fn description(&self) -> StreamDescription {
        let bytes_per_sample = self.encoding.bytes_per_sample();
        let bytes_per_frame = self.bytes_per_frame();
        StreamDescription {
            sample_rate: self.sample_rate,
            format_flags: FormatFlags::for_encoding(self.encoding),
            frames_per_packet: 1,
            bytes_per_frame,
            bytes_per_packet: bytes_per_frame,
            channels_per_frame: self.channels,
            bits_per_channel: bytes_per_sample * 8,
        }
    }
}

/// Linear PCM format flags, bit-compatible with the host's flag word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FormatFlags(pub u32);

impl FormatFlags {
    pub const IS_FLOAT: u32 = 1 << 0;
    pub const IS_BIG_ENDIAN: u32 = 1 << 1;
    pub const IS_SIGNED_INTEGER: u32 = 1 << 2;
    pub const IS_PACKED: u32 = 1 << 3;

    pub fn for_encoding(encoding: SampleEncoding) -> Self {
        let mut bits = Self::IS_PACKED;
        bits |= if encoding.is_float() {
            Self::IS_FLOAT
        } else {
            Self::IS_SIGNED_INTEGER
        };
        if encoding.is_big_endian() {
            bits |= Self::IS_BIG_ENDIAN;
        }
        FormatFlags(bits)
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }
}

/// Host-facing linear PCM stream description (one frame per packet)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDescription {
    pub sample_rate: f64,
    pub format_flags: FormatFlags,
    pub frames_per_packet: u32,
    pub bytes_per_frame: u32,
    pub bytes_per_packet: u32,
    pub channels_per_frame: u32,
    pub bits_per_channel: u32,
}

/// Output stream lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// Host resources allocated, callback registered, not running
    Constructed,
    Running,
    /// Terminal; host resources released
    Destroyed,
}

/// Counters maintained by the render dispatch layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    /// Invocations forwarded to the client callback
    pub forwarded: u64,
    /// Invocations answered with silence because the stream was not started
    pub silenced: u64,
    /// Invocations refused for wrong bus, buffer count or buffer size
    pub rejected: u64,
    /// Invocations that found the callback busy
    pub contended: u64,
    /// Client callback panics caught by the dispatch layer
    pub panicked: u64,
}
