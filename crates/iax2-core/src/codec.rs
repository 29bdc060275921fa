//! Codec capability bitmask and negotiation policy
//!
//! IAX2 advertises codecs as a 32-bit mask with one bit per codec. This module
//! owns the bit assignments, the per-codec framing lengths used to compute the
//! duration of outgoing audio, and the "pick the best common codec" rule. The
//! codecs themselves live in the media subsystem behind [`MediaFormatProvider`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A codec known to the IAX2 capability mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    G7231,
    Gsm,
    Ulaw,
    Alaw,
    G726,
    Adpcm,
    SLinear,
    Lpc10,
    G729a,
    Speex,
    Ilbc,
    G726Aal2,
    G722,
    Jpeg,
    Png,
    H261,
    H263,
    H263p,
    H264,
}

/// All codecs in bit order
pub const ALL_CODECS: [Codec; 19] = [
    Codec::G7231,
    Codec::Gsm,
    Codec::Ulaw,
    Codec::Alaw,
    Codec::G726,
    Codec::Adpcm,
    Codec::SLinear,
    Codec::Lpc10,
    Codec::G729a,
    Codec::Speex,
    Codec::Ilbc,
    Codec::G726Aal2,
    Codec::G722,
    Codec::Jpeg,
    Codec::Png,
    Codec::H261,
    Codec::H263,
    Codec::H263p,
    Codec::H264,
];

/// How many bytes an audio codec produces for how many milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLengths {
    pub frame_duration_ms: u32,
    pub frame_bytes: u32,
}

impl CodecLengths {
    /// Duration in milliseconds of a chunk of `byte_len` encoded bytes
    pub fn duration_of(&self, byte_len: usize) -> u32 {
        if self.frame_bytes == 0 {
            return 0;
        }
        ((byte_len as u64 * self.frame_duration_ms as u64) / self.frame_bytes as u64) as u32
    }
}

impl Codec {
    /// Bit position in the capability mask
    pub fn bit_index(self) -> u32 {
        match self {
            Codec::G7231 => 0,
            Codec::Gsm => 1,
            Codec::Ulaw => 2,
            Codec::Alaw => 3,
            Codec::G726 => 4,
            Codec::Adpcm => 5,
            Codec::SLinear => 6,
            Codec::Lpc10 => 7,
            Codec::G729a => 8,
            Codec::Speex => 9,
            Codec::Ilbc => 10,
            Codec::G726Aal2 => 11,
            Codec::G722 => 12,
            Codec::Jpeg => 16,
            Codec::Png => 17,
            Codec::H261 => 18,
            Codec::H263 => 19,
            Codec::H263p => 20,
            Codec::H264 => 21,
        }
    }

    /// Value of this codec in the capability mask (and as a voice/video subclass)
    pub fn bit(self) -> u32 {
        1 << self.bit_index()
    }

    /// Codec for a single-bit mask value
    pub fn from_bit(bit: u32) -> Option<Self> {
        ALL_CODECS.iter().copied().find(|c| c.bit() == bit)
    }

    pub fn is_audio(self) -> bool {
        self.bit_index() < 16
    }

    pub fn is_video(self) -> bool {
        matches!(self, Codec::H261 | Codec::H263 | Codec::H263p | Codec::H264)
    }

    /// Framing used to turn a byte count into a duration; `None` for video and image formats
    pub fn lengths(self) -> Option<CodecLengths> {
        let (frame_duration_ms, frame_bytes) = match self {
            Codec::G7231 => (30, 24),
            Codec::Gsm => (20, 33),
            Codec::Ulaw | Codec::Alaw => (20, 160),
            Codec::G726 | Codec::G726Aal2 => (20, 80),
            Codec::Adpcm => (20, 80),
            Codec::SLinear => (20, 320),
            Codec::Lpc10 => (22, 7),
            Codec::G729a => (10, 10),
            Codec::Speex => (20, 38),
            Codec::Ilbc => (30, 50),
            Codec::G722 => (20, 160),
            _ => return None,
        };
        Some(CodecLengths {
            frame_duration_ms,
            frame_bytes,
        })
    }

    /// Name of the matching format in the media subsystem
    pub fn media_format_name(self) -> &'static str {
        match self {
            Codec::G7231 => "G.723.1",
            Codec::Gsm => "GSM-06.10",
            Codec::Ulaw => "G.711-uLaw-64k",
            Codec::Alaw => "G.711-ALaw-64k",
            Codec::G726 => "G.726-32k",
            Codec::Adpcm => "IMA-ADPCM",
            Codec::SLinear => "PCM-16",
            Codec::Lpc10 => "LPC-10",
            Codec::G729a => "G.729A",
            Codec::Speex => "Speex",
            Codec::Ilbc => "iLBC-13k3",
            Codec::G726Aal2 => "G.726-32k-AAL2",
            Codec::G722 => "G.722",
            Codec::Jpeg => "JPEG",
            Codec::Png => "PNG",
            Codec::H261 => "H.261",
            Codec::H263 => "H.263",
            Codec::H263p => "H.263plus",
            Codec::H264 => "H.264",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_format_name())
    }
}

/// Set of codecs encoded as the IAX2 capability mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CodecSet(u32);

impl CodecSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_mask(mask: u32) -> Self {
        Self(mask)
    }

    pub fn mask(self) -> u32 {
        self.0
    }

    pub fn insert(&mut self, codec: Codec) {
        self.0 |= codec.bit();
    }

    pub fn contains(self, codec: Codec) -> bool {
        self.0 & codec.bit() != 0
    }

    pub fn intersection(self, other: CodecSet) -> CodecSet {
        CodecSet(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Known codecs in the set, lowest bit first. Unknown bits are skipped.
    pub fn iter(self) -> impl Iterator<Item = Codec> {
        ALL_CODECS.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Codec> for CodecSet {
    fn from_iter<I: IntoIterator<Item = Codec>>(iter: I) -> Self {
        let mut set = CodecSet::empty();
        for codec in iter {
            set.insert(codec);
        }
        set
    }
}

/// Choose the codec for a call.
///
/// The remote side's preferred codec wins when both sides support it. Otherwise
/// the first entry of `local_preferences` the remote also supports is used.
/// Returns `None` when the two sides have nothing in common.
pub fn choose_codec(
    local_preferences: &[Codec],
    remote_preferred: Option<Codec>,
    remote_capabilities: CodecSet,
) -> Option<Codec> {
    let local: CodecSet = local_preferences.iter().copied().collect();
    let common = local.intersection(remote_capabilities);
    if common.is_empty() {
        return None;
    }

    if let Some(preferred) = remote_preferred {
        if common.contains(preferred) {
            return Some(preferred);
        }
    }

    local_preferences
        .iter()
        .copied()
        .find(|c| common.contains(*c))
        .or_else(|| common.iter().next())
}

/// Seam to the media-format subsystem.
///
/// The call processor only needs to know what the local side can send and
/// receive, how to pick a codec, and how long an encoded chunk lasts.
pub trait MediaFormatProvider: Send + Sync {
    /// Codec advertised in the `Format` element of an outgoing `New`
    fn preferred_codec(&self) -> Codec;

    /// Local codecs in preference order
    fn supported_codecs(&self) -> Vec<Codec>;

    /// Capability mask advertised in the `Capability` element
    fn capability_mask(&self) -> CodecSet {
        self.supported_codecs().into_iter().collect()
    }

    /// Codecs the remote side offered, in the order we would consider them
    fn build_remote_capability_table(&self, remote: CodecSet) -> Vec<Codec> {
        remote.iter().collect()
    }

    fn choose_codec(&self, remote_preferred: Option<Codec>, remote: CodecSet) -> Option<Codec> {
        choose_codec(&self.supported_codecs(), remote_preferred, remote)
    }

    fn codec_lengths(&self, codec: Codec) -> Option<CodecLengths> {
        codec.lengths()
    }
}

/// Media formats taken straight from endpoint configuration
#[derive(Debug, Clone)]
pub struct ConfiguredMediaFormats {
    preferred: Codec,
    supported: Vec<Codec>,
}

impl ConfiguredMediaFormats {
    pub fn new(preferred: Codec, supported: Vec<Codec>) -> Self {
        Self { preferred, supported }
    }
}

impl MediaFormatProvider for ConfiguredMediaFormats {
    fn preferred_codec(&self) -> Codec {
        self.preferred
    }

    fn supported_codecs(&self) -> Vec<Codec> {
        // preferred first, then the rest in configured order
        let mut list = vec![self.preferred];
        list.extend(self.supported.iter().copied().filter(|c| *c != self.preferred));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_assignments() {
        assert_eq!(Codec::G7231.bit(), 0x0001);
        assert_eq!(Codec::Gsm.bit(), 0x0002);
        assert_eq!(Codec::Ulaw.bit(), 0x0004);
        assert_eq!(Codec::Alaw.bit(), 0x0008);
        assert_eq!(Codec::Ilbc.bit(), 0x0400);
        assert_eq!(Codec::H264.bit(), 1 << 21);
        for codec in ALL_CODECS {
            assert_eq!(Codec::from_bit(codec.bit()), Some(codec));
        }
        assert_eq!(Codec::from_bit(1 << 13), None);
        assert_eq!(Codec::from_bit(0x6), None);
    }

    #[test]
    fn test_codec_set_iteration_skips_unknown_bits() {
        let set = CodecSet::from_mask(Codec::Gsm.bit() | Codec::Ilbc.bit() | (1 << 30));
        let codecs: Vec<_> = set.iter().collect();
        assert_eq!(codecs, vec![Codec::Gsm, Codec::Ilbc]);
    }

    #[test]
    fn test_choose_codec_prefers_remote_choice() {
        // local side supports u-law and GSM, peer offers GSM+iLBC and prefers GSM
        let local = [Codec::Ulaw, Codec::Gsm];
        let remote: CodecSet = [Codec::Gsm, Codec::Ilbc].into_iter().collect();
        assert_eq!(choose_codec(&local, Some(Codec::Gsm), remote), Some(Codec::Gsm));

        // remote preference not supported locally falls back to local order
        let remote: CodecSet = [Codec::Alaw, Codec::Gsm, Codec::Ulaw].into_iter().collect();
        assert_eq!(choose_codec(&local, Some(Codec::Alaw), remote), Some(Codec::Ulaw));
    }

    #[test]
    fn test_choose_codec_without_overlap() {
        let local = [Codec::Ulaw, Codec::Alaw];
        let remote: CodecSet = [Codec::Gsm, Codec::Ilbc].into_iter().collect();
        assert_eq!(choose_codec(&local, Some(Codec::Gsm), remote), None);
        assert_eq!(choose_codec(&[], None, remote), None);
    }

    #[test]
    fn test_chunk_duration() {
        let ulaw = Codec::Ulaw.lengths().unwrap();
        assert_eq!(ulaw.duration_of(160), 20);
        assert_eq!(ulaw.duration_of(320), 40);
        let gsm = Codec::Gsm.lengths().unwrap();
        assert_eq!(gsm.duration_of(66), 40);
        assert!(Codec::H263.lengths().is_none());
    }

    #[test]
    fn test_configured_formats_put_preferred_first() {
        let formats = ConfiguredMediaFormats::new(Codec::Gsm, vec![Codec::Ulaw, Codec::Gsm, Codec::Alaw]);
        assert_eq!(formats.supported_codecs(), vec![Codec::Gsm, Codec::Ulaw, Codec::Alaw]);
        assert_eq!(
            formats.capability_mask().mask(),
            Codec::Gsm.bit() | Codec::Ulaw.bit() | Codec::Alaw.bit()
        );
    }
}
