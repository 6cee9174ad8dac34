//! QR code encoding.
//!
//! This module turns text into a QR Code Model 2 symbol: segment encoding,
//! version selection, Reed-Solomon error correction, module placement and mask
//! selection. Symbols own their module grid, so they can be moved freely
//! between the encoder and the renderer.
//!
//! # Example
//!
//! ```rust
//! use qrcode_api::qrcode::{QrCode, QrCodeEcc};
//!
//! let qr = QrCode::encode_text("https://example.com/", QrCodeEcc::High).unwrap();
//! assert_eq!(qr.size(), qr.version().value() as i32 * 4 + 17);
//! assert_eq!(qr.error_correction_level(), QrCodeEcc::High);
//! ```

mod ecc;
mod segment;

use thiserror::Error;

use self::ecc::ReedSolomonGenerator;
pub use self::{
    ecc::QrCodeEcc,
    segment::{BitBuffer, QrSegment, QrSegmentMode},
};

/// No mode can fit more than this many bytes of text into any symbol.
const MAX_TEXT_BYTES: usize = 7089;

const PENALTY_N1: i32 = 3;
const PENALTY_N2: i32 = 3;
const PENALTY_N3: i32 = 40;
const PENALTY_N4: i32 = 10;

/// A QR Code symbol: a square grid of dark and light modules.
///
/// Instances are immutable once an `encode_*` constructor returns.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct QrCode {
    version: Version,
    size: i32,
    ecl: QrCodeEcc,
    mask: Mask,
    modules: Vec<bool>,
    // Marks modules that are not subject to masking. Only needed during construction.
    is_function: Vec<bool>,
}

impl QrCode {
    /// Encodes text at exactly the given error correction level.
    ///
    /// The mode is picked automatically (see [`QrSegment::make_segments`]),
    /// the smallest fitting version is chosen and the mask is selected by
    /// penalty score.
    ///
    /// # Errors
    ///
    /// Returns [`DataTooLong`] if the text does not fit into a version 40 symbol
    /// at level `ecl`.
    pub fn encode_text(text: &str, ecl: QrCodeEcc) -> Result<Self, DataTooLong> {
        if text.len() > MAX_TEXT_BYTES {
            return Err(DataTooLong::SegmentTooLong);
        }
        let segs = QrSegment::make_segments(text);
        Self::encode_segments(&segs, ecl, Version::MIN, Version::MAX, None)
    }

    /// Encodes arbitrary bytes in byte mode.
    pub fn encode_binary(data: &[u8], ecl: QrCodeEcc) -> Result<Self, DataTooLong> {
        if data.len() > MAX_TEXT_BYTES {
            return Err(DataTooLong::SegmentTooLong);
        }
        let segs = [QrSegment::make_bytes(data)];
        Self::encode_segments(&segs, ecl, Version::MIN, Version::MAX, None)
    }

    /// Encodes segments with full control over the version range and mask.
    ///
    /// # Arguments
    ///
    /// * `segs` - Segments to concatenate.
    /// * `ecl` - Error correction level, kept as given.
    /// * `minversion` / `maxversion` - Inclusive version search range.
    /// * `mask` - Fixed mask, or `None` to pick the lowest-penalty one.
    pub fn encode_segments(
        segs: &[QrSegment],
        ecl: QrCodeEcc,
        minversion: Version,
        maxversion: Version,
        mask: Option<Mask>,
    ) -> Result<Self, DataTooLong> {
        assert!(minversion <= maxversion, "invalid version range");

        let mut version = minversion;
        let datausedbits = loop {
            let capacitybits = num_data_codewords(version, ecl) * 8;
            match QrSegment::total_bits(segs, version) {
                Some(used) if used <= capacitybits => break used,
                used if version >= maxversion => {
                    return Err(match used {
                        None => DataTooLong::SegmentTooLong,
                        Some(n) => DataTooLong::DataOverCapacity(n, capacitybits),
                    });
                }
                _ => version = Version::new(version.value() + 1),
            }
        };

        let capacitybits = num_data_codewords(version, ecl) * 8;
        let mut bb = BitBuffer::with_capacity(capacitybits);
        for seg in segs {
            bb.append_bits(seg.mode().mode_bits(), 4);
            bb.append_bits(seg.num_chars() as u32, seg.mode().num_char_count_bits(version));
            bb.extend_from(seg.data());
        }
        debug_assert_eq!(bb.len(), datausedbits);

        // Terminator, then zero-fill to a byte boundary.
        let terminator = (capacitybits - bb.len()).min(4);
        bb.append_bits(0, terminator as u8);
        let fill = (8 - bb.len() % 8) % 8;
        bb.append_bits(0, fill as u8);

        for padbyte in [0xec, 0x11].into_iter().cycle() {
            if bb.len() >= capacitybits {
                break;
            }
            bb.append_bits(padbyte, 8);
        }

        Ok(Self::encode_codewords(version, ecl, &bb.to_bytes(), mask))
    }

    /// Builds the symbol from already-padded data codewords.
    ///
    /// Low level: most callers want [`QrCode::encode_text`].
    pub fn encode_codewords(
        version: Version,
        ecl: QrCodeEcc,
        datacodewords: &[u8],
        mask: Option<Mask>,
    ) -> Self {
        let size = i32::from(version.value()) * 4 + 17;
        let cells = (size * size) as usize;
        let mut qr = Self {
            version,
            size,
            ecl,
            mask: Mask::new(0),
            modules: vec![false; cells],
            is_function: vec![false; cells],
        };

        qr.draw_function_patterns();
        let allcodewords = qr.add_ecc_and_interleave(datacodewords);
        qr.draw_codewords(&allcodewords);

        let mask = mask.unwrap_or_else(|| {
            let mut best = Mask::new(0);
            let mut minpenalty = i32::MAX;
            for candidate in (0u8..8).map(Mask::new) {
                qr.apply_mask(candidate);
                qr.draw_format_bits(candidate);
                let penalty = qr.penalty_score();
                if penalty < minpenalty {
                    best = candidate;
                    minpenalty = penalty;
                }
                qr.apply_mask(candidate); // XOR undoes it
            }
            best
        });
        qr.mask = mask;
        qr.apply_mask(mask);
        qr.draw_format_bits(mask);

        qr.is_function = Vec::new();
        qr
    }

    /// This symbol's version, in the range [1, 40].
    pub fn version(&self) -> Version {
        self.version
    }

    /// Width and height in modules, in the range [21, 177].
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Error correction level the symbol was built with.
    pub fn error_correction_level(&self) -> QrCodeEcc {
        self.ecl
    }

    /// Mask pattern applied to the data area.
    pub fn mask(&self) -> Mask {
        self.mask
    }

    /// Returns `true` for a dark module. Coordinates outside the symbol are light.
    pub fn get_module(&self, x: i32, y: i32) -> bool {
        (0..self.size).contains(&x) && (0..self.size).contains(&y) && self.module(x, y)
    }

    fn module(&self, x: i32, y: i32) -> bool {
        self.modules[(y * self.size + x) as usize]
    }

    fn set_function_module(&mut self, x: i32, y: i32, isdark: bool) {
        let index = (y * self.size + x) as usize;
        self.modules[index] = isdark;
        self.is_function[index] = true;
    }

    fn draw_function_patterns(&mut self) {
        let size = self.size;
        for i in 0..size {
            self.set_function_module(6, i, i % 2 == 0);
            self.set_function_module(i, 6, i % 2 == 0);
        }

        self.draw_finder_pattern(3, 3);
        self.draw_finder_pattern(size - 4, 3);
        self.draw_finder_pattern(3, size - 4);

        // Skip the three corners occupied by finder patterns.
        let positions = self.alignment_pattern_positions();
        let last = positions.len().saturating_sub(1);
        for (i, &x) in positions.iter().enumerate() {
            for (j, &y) in positions.iter().enumerate() {
                let on_finder = (i == 0 && j == 0) || (i == 0 && j == last) || (i == last && j == 0);
                if !on_finder {
                    self.draw_alignment_pattern(x, y);
                }
            }
        }

        // Reserve the format area now; the real bits are drawn after masking.
        self.draw_format_bits(Mask::new(0));
        self.draw_version();
    }

    fn draw_finder_pattern(&mut self, x: i32, y: i32) {
        for dy in -4..=4 {
            for dx in -4..=4 {
                let (xx, yy) = (x + dx, y + dy);
                if (0..self.size).contains(&xx) && (0..self.size).contains(&yy) {
                    let dist = dx.abs().max(dy.abs());
                    self.set_function_module(xx, yy, dist != 2 && dist != 4);
                }
            }
        }
    }

    fn draw_alignment_pattern(&mut self, x: i32, y: i32) {
        for dy in -2..=2 {
            for dx in -2..=2 {
                self.set_function_module(x + dx, y + dy, dx.abs().max(dy.abs()) != 1);
            }
        }
    }

    fn draw_format_bits(&mut self, mask: Mask) {
        let data = u32::from((self.ecl.format_bits() << 3) | mask.value());
        let mut rem = data;
        for _ in 0..10 {
            rem = (rem << 1) ^ ((rem >> 9) * 0x537);
        }
        let bits = ((data << 10) | rem) ^ 0x5412;

        // Around the top left finder.
        for i in 0..6 {
            self.set_function_module(8, i, get_bit(bits, i));
        }
        self.set_function_module(8, 7, get_bit(bits, 6));
        self.set_function_module(8, 8, get_bit(bits, 7));
        self.set_function_module(7, 8, get_bit(bits, 8));
        for i in 9..15 {
            self.set_function_module(14 - i, 8, get_bit(bits, i));
        }

        // Split between the other two finders.
        let size = self.size;
        for i in 0..8 {
            self.set_function_module(size - 1 - i, 8, get_bit(bits, i));
        }
        for i in 8..15 {
            self.set_function_module(8, size - 15 + i, get_bit(bits, i));
        }
        self.set_function_module(8, size - 8, true); // dark module
    }

    fn draw_version(&mut self) {
        let ver = u32::from(self.version.value());
        if ver < 7 {
            return;
        }
        let mut rem = ver;
        for _ in 0..12 {
            rem = (rem << 1) ^ ((rem >> 11) * 0x1f25);
        }
        let bits = (ver << 12) | rem;

        for i in 0..18 {
            let bit = get_bit(bits, i);
            let a = self.size - 11 + i % 3;
            let b = i / 3;
            self.set_function_module(a, b, bit);
            self.set_function_module(b, a, bit);
        }
    }

    fn add_ecc_and_interleave(&self, data: &[u8]) -> Vec<u8> {
        let ver = self.version;
        let ecl = self.ecl;
        assert_eq!(data.len(), num_data_codewords(ver, ecl), "data codeword count mismatch");

        let numblocks = ecl.num_blocks(ver);
        let blockecclen = ecl.ecc_codewords_per_block(ver);
        let rawcodewords = num_raw_data_modules(ver) / 8;
        let numshortblocks = numblocks - rawcodewords % numblocks;
        let shortblocklen = rawcodewords / numblocks;
        let shortdatalen = shortblocklen - blockecclen;

        let rs = ReedSolomonGenerator::new(blockecclen);
        let mut blocks: Vec<Vec<u8>> = Vec::with_capacity(numblocks);
        let mut rest = data;
        for i in 0..numblocks {
            let datlen = shortdatalen + usize::from(i >= numshortblocks);
            let (dat, tail) = rest.split_at(datlen);
            rest = tail;
            let mut block = dat.to_vec();
            // Short blocks get a placeholder so every block has the same length.
            if i < numshortblocks {
                block.push(0);
            }
            block.extend(rs.remainder(dat));
            blocks.push(block);
        }

        let mut result = Vec::with_capacity(rawcodewords);
        for i in 0..=shortblocklen {
            for (j, block) in blocks.iter().enumerate() {
                if i != shortdatalen || j >= numshortblocks {
                    result.push(block[i]);
                }
            }
        }
        debug_assert_eq!(result.len(), rawcodewords);
        result
    }

    fn draw_codewords(&mut self, data: &[u8]) {
        let totalbits = data.len() * 8;
        let mut i = 0usize;
        // Zigzag in two-column strips from the right edge, skipping the vertical timing column.
        let mut right = self.size - 1;
        while right >= 1 {
            if right == 6 {
                right = 5;
            }
            let upward = (right + 1) & 2 == 0;
            for vert in 0..self.size {
                let y = if upward { self.size - 1 - vert } else { vert };
                for x in [right, right - 1] {
                    let index = (y * self.size + x) as usize;
                    if !self.is_function[index] && i < totalbits {
                        self.modules[index] = get_bit(u32::from(data[i >> 3]), 7 - (i & 7) as i32);
                        i += 1;
                    }
                }
            }
            right -= 2;
        }
        debug_assert_eq!(i, totalbits);
    }

    fn apply_mask(&mut self, mask: Mask) {
        for y in 0..self.size {
            for x in 0..self.size {
                let index = (y * self.size + x) as usize;
                if self.is_function[index] {
                    continue;
                }
                let invert = match mask.value() {
                    0 => (x + y) % 2 == 0,
                    1 => y % 2 == 0,
                    2 => x % 3 == 0,
                    3 => (x + y) % 3 == 0,
                    4 => (x / 3 + y / 2) % 2 == 0,
                    5 => (x * y) % 2 + (x * y) % 3 == 0,
                    6 => ((x * y) % 2 + (x * y) % 3) % 2 == 0,
                    7 => ((x + y) % 2 + (x * y) % 3) % 2 == 0,
                    _ => unreachable!("mask values are 0..=7"),
                };
                self.modules[index] ^= invert;
            }
        }
    }

    fn penalty_score(&self) -> i32 {
        let size = self.size;
        let mut result = 0;

        // Runs and finder-like patterns, first by row then by column.
        for transpose in [false, true] {
            for a in 0..size {
                let mut runcolor = false;
                let mut runlen = 0;
                let mut history = FinderPenalty::new(size);
                for b in 0..size {
                    let color = if transpose { self.module(a, b) } else { self.module(b, a) };
                    if color == runcolor {
                        runlen += 1;
                        if runlen == 5 {
                            result += PENALTY_N1;
                        } else if runlen > 5 {
                            result += 1;
                        }
                    } else {
                        history.add_history(runlen);
                        if !runcolor {
                            result += history.count_patterns() * PENALTY_N3;
                        }
                        runcolor = color;
                        runlen = 1;
                    }
                }
                result += history.terminate_and_count(runcolor, runlen) * PENALTY_N3;
            }
        }

        // 2x2 blocks of one color.
        for y in 0..size - 1 {
            for x in 0..size - 1 {
                let color = self.module(x, y);
                if color == self.module(x + 1, y)
                    && color == self.module(x, y + 1)
                    && color == self.module(x + 1, y + 1)
                {
                    result += PENALTY_N2;
                }
            }
        }

        // Dark/light balance.
        let dark = self.modules.iter().filter(|&&m| m).count() as i32;
        let total = size * size;
        let k = ((dark * 20 - total * 10).abs() + total - 1) / total - 1;
        result + k * PENALTY_N4
    }

    /// Ascending centre coordinates of the alignment patterns for this version.
    fn alignment_pattern_positions(&self) -> Vec<i32> {
        let ver = i32::from(self.version.value());
        if ver == 1 {
            return Vec::new();
        }
        let numalign = ver / 7 + 2;
        let step = if ver == 32 { 26 } else { (ver * 4 + numalign * 2 + 1) / (numalign * 2 - 2) * 2 };
        let mut result: Vec<i32> = (0..numalign - 1).map(|i| self.size - 7 - i * step).collect();
        result.push(6);
        result.reverse();
        result
    }
}

/// Data modules available at a version, after all function patterns.
fn num_raw_data_modules(ver: Version) -> usize {
    let ver = usize::from(ver.value());
    let mut result = (16 * ver + 128) * ver + 64;
    if ver >= 2 {
        let numalign = ver / 7 + 2;
        result -= (25 * numalign - 10) * numalign - 55;
        if ver >= 7 {
            result -= 36;
        }
    }
    result
}

/// Data codewords (excluding error correction) at a version and level.
fn num_data_codewords(ver: Version, ecl: QrCodeEcc) -> usize {
    num_raw_data_modules(ver) / 8 - ecl.ecc_codewords_per_block(ver) * ecl.num_blocks(ver)
}

/// Tracks the last seven run lengths of one row or column for the finder-like penalty.
struct FinderPenalty {
    qr_size: i32,
    run_history: [i32; 7],
}

impl FinderPenalty {
    fn new(size: i32) -> Self {
        Self { qr_size: size, run_history: [0; 7] }
    }

    fn add_history(&mut self, mut runlength: i32) {
        // The light border counts as part of the first run.
        if self.run_history[0] == 0 {
            runlength += self.qr_size;
        }
        self.run_history.copy_within(0..6, 1);
        self.run_history[0] = runlength;
    }

    fn count_patterns(&self) -> i32 {
        let rh = &self.run_history;
        let n = rh[1];
        let core = n > 0 && rh[2] == n && rh[3] == n * 3 && rh[4] == n && rh[5] == n;
        i32::from(core && rh[0] >= n * 4 && rh[6] >= n)
            + i32::from(core && rh[6] >= n * 4 && rh[0] >= n)
    }

    fn terminate_and_count(mut self, runcolor: bool, mut runlength: i32) -> i32 {
        if runcolor {
            self.add_history(runlength);
            runlength = 0;
        }
        runlength += self.qr_size;
        self.add_history(runlength);
        self.count_patterns()
    }
}

/// The input does not fit in any symbol of the allowed version range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataTooLong {
    /// A segment's character count overflows its field.
    #[error("segment too long")]
    SegmentTooLong,
    /// Data bits needed vs bits available at the largest allowed version.
    #[error("data length = {0} bits, max capacity = {1} bits")]
    DataOverCapacity(usize, usize),
}

/// A QR code version (1-40).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Version(u8);

impl Version {
    /// Smallest version, 21x21 modules.
    pub const MIN: Version = Version(1);
    /// Largest version, 177x177 modules.
    pub const MAX: Version = Version(40);

    /// # Panics
    ///
    /// Panics if the number is outside the range [1, 40].
    pub const fn new(ver: u8) -> Self {
        assert!(Version::MIN.0 <= ver && ver <= Version::MAX.0, "version number out of range");
        Self(ver)
    }

    /// The version number.
    pub const fn value(self) -> u8 {
        self.0
    }
}

/// A mask pattern (0-7).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Mask(u8);

impl Mask {
    /// # Panics
    ///
    /// Panics if the number is outside the range [0, 7].
    pub const fn new(mask: u8) -> Self {
        assert!(mask <= 7, "mask value out of range");
        Self(mask)
    }

    /// The mask number.
    pub const fn value(self) -> u8 {
        self.0
    }
}

fn get_bit(x: u32, i: i32) -> bool {
    (x >> i) & 1 != 0
}
