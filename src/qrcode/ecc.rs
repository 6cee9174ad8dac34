//! Error correction: levels, block tables and the Reed-Solomon generator.

use super::Version;

/// Error correction level for a QR code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum QrCodeEcc {
    /// Tolerates ~7% erroneous codewords.
    Low,
    /// Tolerates ~15% erroneous codewords.
    Medium,
    /// Tolerates ~25% erroneous codewords.
    Quartile,
    /// Tolerates ~30% erroneous codewords.
    High,
}

impl QrCodeEcc {
    fn ordinal(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::Quartile => 2,
            Self::High => 3,
        }
    }

    /// The 2-bit value written into the format information.
    pub(crate) fn format_bits(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 0,
            Self::Quartile => 3,
            Self::High => 2,
        }
    }

    pub(crate) fn ecc_codewords_per_block(self, ver: Version) -> usize {
        ECC_CODEWORDS_PER_BLOCK[self.ordinal()][usize::from(ver.value())] as usize
    }

    pub(crate) fn num_blocks(self, ver: Version) -> usize {
        NUM_ERROR_CORRECTION_BLOCKS[self.ordinal()][usize::from(ver.value())] as usize
    }
}

// Index 0 is padding so the tables can be indexed by version number.
static ECC_CODEWORDS_PER_BLOCK: [[i8; 41]; 4] = [
    [
        -1, 7, 10, 15, 20, 26, 18, 20, 24, 30, 18, 20, 24, 26, 30, 22, 24, 28, 30, 28, 28, 28, 28,
        30, 30, 26, 28, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30,
    ],
    [
        -1, 10, 16, 26, 18, 24, 16, 18, 22, 22, 26, 30, 22, 22, 24, 24, 28, 28, 26, 26, 26, 26, 28,
        28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28,
    ],
    [
        -1, 13, 22, 18, 26, 18, 24, 18, 22, 20, 24, 28, 26, 24, 20, 30, 24, 28, 28, 26, 30, 28, 30,
        30, 30, 30, 28, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30,
    ],
    [
        -1, 17, 28, 22, 16, 22, 28, 26, 26, 24, 28, 24, 28, 22, 24, 24, 30, 28, 28, 26, 28, 30, 24,
        30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30,
    ],
];

static NUM_ERROR_CORRECTION_BLOCKS: [[i8; 41]; 4] = [
    [
        -1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 4, 4, 4, 4, 4, 6, 6, 6, 6, 7, 8, 8, 9, 9, 10, 12, 12, 12, 13,
        14, 15, 16, 17, 18, 19, 19, 20, 21, 22, 24, 25,
    ],
    [
        -1, 1, 1, 1, 2, 2, 4, 4, 4, 5, 5, 5, 8, 9, 9, 10, 10, 11, 13, 14, 16, 17, 17, 18, 20, 21,
        23, 25, 26, 28, 29, 31, 33, 35, 37, 38, 40, 43, 45, 47, 49,
    ],
    [
        -1, 1, 1, 2, 2, 4, 4, 6, 6, 8, 8, 8, 10, 12, 16, 12, 17, 16, 18, 21, 20, 23, 23, 25, 27,
        29, 34, 34, 35, 38, 40, 43, 45, 48, 51, 53, 56, 59, 62, 65, 68,
    ],
    [
        -1, 1, 1, 2, 4, 4, 4, 5, 6, 8, 8, 11, 11, 16, 16, 18, 16, 19, 21, 25, 25, 25, 34, 30, 32,
        35, 37, 40, 42, 45, 48, 51, 54, 57, 60, 63, 66, 70, 74, 77, 81,
    ],
];

/// Computes Reed-Solomon remainders over GF(2^8/0x11D) for a fixed degree.
pub(crate) struct ReedSolomonGenerator {
    divisor: Vec<u8>,
}

impl ReedSolomonGenerator {
    /// Builds the generator polynomial of the given degree (1..=255),
    /// coefficients highest to lowest, leading 1 omitted.
    pub(crate) fn new(degree: usize) -> Self {
        assert!((1..=255).contains(&degree), "degree out of range");
        let mut divisor = vec![0u8; degree];
        divisor[degree - 1] = 1;
        // Multiply by (x - r^0)(x - r^1)...(x - r^{degree-1}).
        let mut root: u8 = 1;
        for _ in 0..degree {
            for j in 0..degree {
                divisor[j] = gf_multiply(divisor[j], root);
                if j + 1 < degree {
                    divisor[j] ^= divisor[j + 1];
                }
            }
            root = gf_multiply(root, 0x02);
        }
        Self { divisor }
    }

    pub(crate) fn remainder(&self, data: &[u8]) -> Vec<u8> {
        let mut result = vec![0u8; self.divisor.len()];
        for &b in data {
            let factor = b ^ result.remove(0);
            result.push(0);
            for (x, &y) in result.iter_mut().zip(&self.divisor) {
                *x ^= gf_multiply(y, factor);
            }
        }
        result
    }
}

fn gf_multiply(x: u8, y: u8) -> u8 {
    // Russian peasant multiplication
    let mut z: u8 = 0;
    for i in (0..8).rev() {
        z = (z << 1) ^ ((z >> 7) * 0x1d);
        z ^= ((y >> i) & 1) * x;
    }
    z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_matches_field() {
        assert_eq!(gf_multiply(0, 0x53), 0);
        assert_eq!(gf_multiply(1, 0x53), 0x53);
        assert_eq!(gf_multiply(0x02, 0x80), 0x1d);
        assert_eq!(gf_multiply(0x53, 0xca), gf_multiply(0xca, 0x53));
    }

    #[test]
    fn remainder_of_codeword_is_zero() {
        // A message followed by its own remainder is divisible by the generator.
        let rs = ReedSolomonGenerator::new(10);
        let mut message: Vec<u8> = b"QR audit".to_vec();
        let ecc = rs.remainder(&message);
        assert_eq!(ecc.len(), 10);
        message.extend_from_slice(&ecc);
        assert!(rs.remainder(&message).iter().all(|&b| b == 0));
    }

    #[test]
    fn high_level_tables_at_version_40() {
        let v40 = Version::MAX;
        assert_eq!(QrCodeEcc::High.ecc_codewords_per_block(v40), 30);
        assert_eq!(QrCodeEcc::High.num_blocks(v40), 81);
    }
}
