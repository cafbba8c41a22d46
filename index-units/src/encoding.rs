//! Text codec identification
//!
//! The indexer does not transcode anything; it only needs to know how
//! wide a code unit is, what the encoded line feed looks like, and which
//! codec name to hand to the presentation layer. The registry of codec
//! names is `encoding_rs`, which is process-wide and read-only.
//!
//! Detection policy, in order:
//!
//! 1. BOM (UTF-8, UTF-16 LE/BE, UTF-32 LE/BE)
//! 2. statistical guess over the block
//! 3. the system default (UTF-8)

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

/// Identifier of the text encoding a file is indexed under.
///
/// UTF-8 also covers plain ASCII and is the system default; arbitrary
/// single byte codecs are carried by their `encoding_rs` registry entry.
/// UTF-32 has no `encoding_rs` entry and is spelled out here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCodec {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    SingleByte(&'static Encoding),
}

/// Scanning parameters of a codec: how wide a code unit is and what the
/// encoded `U+000A` terminator looks like in its byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub unit_width: usize,
    pub line_feed: &'static [u8],
}

impl TextCodec {
    pub fn params(&self) -> CodecParams {
        match self {
            TextCodec::Utf8 | TextCodec::SingleByte(_) => CodecParams {
                unit_width: 1,
                line_feed: b"\n",
            },
            TextCodec::Utf16Le => CodecParams {
                unit_width: 2,
                line_feed: b"\n\x00",
            },
            TextCodec::Utf16Be => CodecParams {
                unit_width: 2,
                line_feed: b"\x00\n",
            },
            TextCodec::Utf32Le => CodecParams {
                unit_width: 4,
                line_feed: b"\n\x00\x00\x00",
            },
            TextCodec::Utf32Be => CodecParams {
                unit_width: 4,
                line_feed: b"\x00\x00\x00\n",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextCodec::Utf8 => UTF_8.name(),
            TextCodec::Utf16Le => UTF_16LE.name(),
            TextCodec::Utf16Be => UTF_16BE.name(),
            TextCodec::Utf32Le => "UTF-32LE",
            TextCodec::Utf32Be => "UTF-32BE",
            TextCodec::SingleByte(encoding) => encoding.name(),
        }
    }

    /// resolve a codec by registry label, for user-forced encodings
    pub fn for_label(label: &str) -> Option<TextCodec> {
        match label.to_ascii_uppercase().as_str() {
            "UTF-32LE" | "UTF-32" => return Some(TextCodec::Utf32Le),
            "UTF-32BE" => return Some(TextCodec::Utf32Be),
            _ => {}
        }
        let encoding = Encoding::for_label(label.as_bytes())?;
        if encoding == UTF_8 {
            Some(TextCodec::Utf8)
        } else if encoding == UTF_16LE {
            Some(TextCodec::Utf16Le)
        } else if encoding == UTF_16BE {
            Some(TextCodec::Utf16Be)
        } else if encoding.is_single_byte() {
            Some(TextCodec::SingleByte(encoding))
        } else {
            None
        }
    }
}

/// how many leading bytes to feed the statistical guess; a few KiB of a
/// log file is plenty to settle byte parity
const SAMPLE_SIZE: usize = 4096;

/// Guess the codec of a byte block, typically the first block of a file.
pub fn guess(block: &[u8]) -> TextCodec {
    if let Some(codec) = sniff_bom(block) {
        return codec;
    }
    let sample = &block[..block.len().min(SAMPLE_SIZE)];
    if let Some(codec) = guess_wide(sample) {
        return codec;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => TextCodec::Utf8,
        // error_len() of None means the sample merely ends mid-sequence
        Err(e) if e.error_len().is_none() => TextCodec::Utf8,
        Err(_) => TextCodec::SingleByte(WINDOWS_1252),
    }
}

fn sniff_bom(block: &[u8]) -> Option<TextCodec> {
    // the UTF-32 marks embed the UTF-16 ones and must be checked first
    if block.len() >= 4 {
        if block[..4] == [0xFF, 0xFE, 0x00, 0x00] {
            return Some(TextCodec::Utf32Le);
        }
        if block[..4] == [0x00, 0x00, 0xFE, 0xFF] {
            return Some(TextCodec::Utf32Be);
        }
    }
    Encoding::for_bom(block).map(|(encoding, _)| {
        if encoding == UTF_16LE {
            TextCodec::Utf16Le
        } else if encoding == UTF_16BE {
            TextCodec::Utf16Be
        } else {
            TextCodec::Utf8
        }
    })
}

/// Zero-byte parity check for BOM-less UTF-16/32. Mostly-ASCII text in a
/// wide encoding shows zeros at fixed positions within each code unit.
fn guess_wide(sample: &[u8]) -> Option<TextCodec> {
    if sample.len() < 8 {
        return None;
    }
    let mut zeros = [0usize; 4];
    for (i, b) in sample.iter().enumerate() {
        if *b == 0 {
            zeros[i % 4] += 1;
        }
    }
    let quads = sample.len() / 4;
    let almost_all = |n: usize| n * 10 >= quads * 9;
    let almost_none = |n: usize| n * 10 <= quads;
    if almost_all(zeros[1]) && almost_all(zeros[2]) && almost_all(zeros[3]) && almost_none(zeros[0])
    {
        return Some(TextCodec::Utf32Le);
    }
    if almost_all(zeros[0]) && almost_all(zeros[1]) && almost_all(zeros[2]) && almost_none(zeros[3])
    {
        return Some(TextCodec::Utf32Be);
    }
    let pairs = sample.len() / 2;
    let odd = zeros[1] + zeros[3];
    let even = zeros[0] + zeros[2];
    let most = |n: usize| n * 10 >= pairs * 6;
    let few = |n: usize| n * 10 <= pairs;
    if most(odd) && few(even) {
        return Some(TextCodec::Utf16Le);
    }
    if most(even) && few(odd) {
        return Some(TextCodec::Utf16Be);
    }
    None
}
