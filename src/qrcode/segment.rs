//! Data segments and the bit buffer they are packed into.

use super::Version;

/// The characters allowed in alphanumeric mode, in code order.
static ALPHANUMERIC_CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ $%*+-./:";

/// The encoding mode of a [`QrSegment`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QrSegmentMode {
    /// Decimal digits, 10 bits per 3 digits.
    Numeric,
    /// The 45-character alphanumeric set, 11 bits per 2 characters.
    Alphanumeric,
    /// Arbitrary bytes, 8 bits each.
    Byte,
}

impl QrSegmentMode {
    /// The 4-bit mode indicator.
    pub(crate) fn mode_bits(self) -> u32 {
        match self {
            Self::Numeric => 0x1,
            Self::Alphanumeric => 0x2,
            Self::Byte => 0x4,
        }
    }

    /// Width of the character count field, which depends on the version range.
    pub(crate) fn num_char_count_bits(self, ver: Version) -> u8 {
        let widths: [u8; 3] = match self {
            Self::Numeric => [10, 12, 14],
            Self::Alphanumeric => [9, 11, 13],
            Self::Byte => [8, 16, 16],
        };
        widths[usize::from((ver.value() + 7) / 17)]
    }
}

/// A run of characters encoded in a single mode.
///
/// Segments own their bit string. Build them with [`QrSegment::make_segments`]
/// for automatic mode selection, or with one of the `make_*` constructors.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct QrSegment {
    mode: QrSegmentMode,
    numchars: usize,
    data: BitBuffer,
}

impl QrSegment {
    /// Picks the densest single mode able to represent `text`.
    ///
    /// Empty text produces no segments. Digits-only text uses numeric mode,
    /// text drawn from the alphanumeric set uses alphanumeric mode, anything
    /// else is encoded as its UTF-8 bytes.
    ///
    /// # Example
    ///
    /// ```rust
    /// use qrcode_api::qrcode::{QrSegment, QrSegmentMode};
    ///
    /// let segs = QrSegment::make_segments("HTTPS://EXAMPLE.COM/");
    /// assert_eq!(segs[0].mode(), QrSegmentMode::Alphanumeric);
    /// ```
    pub fn make_segments(text: &str) -> Vec<Self> {
        if text.is_empty() {
            return Vec::new();
        }
        let seg = Self::make_numeric(text)
            .or_else(|| Self::make_alphanumeric(text))
            .unwrap_or_else(|| Self::make_bytes(text.as_bytes()));
        vec![seg]
    }

    /// Creates a byte mode segment.
    pub fn make_bytes(data: &[u8]) -> Self {
        let mut bb = BitBuffer::with_capacity(data.len() * 8);
        for &b in data {
            bb.append_bits(u32::from(b), 8);
        }
        Self { mode: QrSegmentMode::Byte, numchars: data.len(), data: bb }
    }

    /// Creates a numeric mode segment, or `None` if `text` holds anything but digits.
    pub fn make_numeric(text: &str) -> Option<Self> {
        if !Self::is_numeric(text) {
            return None;
        }
        let mut bb = BitBuffer::with_capacity(text.len() * 10 / 3 + 4);
        for chunk in text.as_bytes().chunks(3) {
            let value = chunk.iter().fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
            // 1 digit -> 4 bits, 2 -> 7, 3 -> 10
            bb.append_bits(value, chunk.len() as u8 * 3 + 1);
        }
        Some(Self { mode: QrSegmentMode::Numeric, numchars: text.len(), data: bb })
    }

    /// Creates an alphanumeric mode segment, or `None` if `text` leaves the charset.
    pub fn make_alphanumeric(text: &str) -> Option<Self> {
        let codes = text
            .chars()
            .map(|c| ALPHANUMERIC_CHARSET.find(c).map(|i| i as u32))
            .collect::<Option<Vec<u32>>>()?;
        let mut bb = BitBuffer::with_capacity(codes.len() * 11 / 2 + 6);
        for pair in codes.chunks(2) {
            match *pair {
                [a, b] => bb.append_bits(a * 45 + b, 11),
                [a] => bb.append_bits(a, 6),
                _ => unreachable!("chunks(2) yields one or two codes"),
            }
        }
        Some(Self { mode: QrSegmentMode::Alphanumeric, numchars: codes.len(), data: bb })
    }

    /// The mode this segment is encoded in.
    pub fn mode(&self) -> QrSegmentMode {
        self.mode
    }

    /// Character count (bytes for byte mode).
    pub fn num_chars(&self) -> usize {
        self.numchars
    }

    pub(crate) fn data(&self) -> &BitBuffer {
        &self.data
    }

    /// Bits needed to encode `segs` at `version`, or `None` when a character
    /// count overflows its field.
    pub(crate) fn total_bits(segs: &[Self], version: Version) -> Option<usize> {
        segs.iter().try_fold(0usize, |acc, seg| {
            let ccbits = seg.mode.num_char_count_bits(version);
            if seg.numchars >= 1usize << ccbits {
                return None;
            }
            acc.checked_add(4 + usize::from(ccbits))?.checked_add(seg.data.len())
        })
    }

    fn is_numeric(text: &str) -> bool {
        text.bytes().all(|b| b.is_ascii_digit())
    }
}

/// An appendable sequence of bits, most significant bit first.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct BitBuffer(Vec<bool>);

impl BitBuffer {
    /// Creates an empty buffer with room for `bits`.
    pub fn with_capacity(bits: usize) -> Self {
        Self(Vec::with_capacity(bits))
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the buffer holds no bits.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends the low `len` bits of `val`, high bit first.
    pub fn append_bits(&mut self, val: u32, len: u8) {
        debug_assert!(len <= 31 && val >> len == 0, "value does not fit in {len} bits");
        self.0.extend((0..len).rev().map(|i| (val >> i) & 1 != 0));
    }

    /// Appends all bits of `other`.
    pub fn extend_from(&mut self, other: &BitBuffer) {
        self.0.extend_from_slice(&other.0);
    }

    /// Packs the bits into bytes, zero-filling the last partial byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.0.len().div_ceil(8)];
        for (i, &bit) in self.0.iter().enumerate() {
            bytes[i >> 3] |= u8::from(bit) << (7 - (i & 7));
        }
        bytes
    }
}
