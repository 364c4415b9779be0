//! Descriptor distances.

/// Number of differing bits between two packed bit strings.
#[inline]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x ^ y).count_ones())
        .sum()
}

#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

/// Expand packed bits (MSB first) into 0/1 floats.
///
/// The squared Euclidean distance between two expanded rows equals the
/// Hamming distance between the packed rows.
pub fn unpack_bits(bytes: &[u8]) -> Vec<f32> {
    let mut out = Vec::with_capacity(bytes.len() * 8);
    for &b in bytes {
        for bit in (0..8).rev() {
            out.push(((b >> bit) & 1) as f32);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_counts_bits() {
        assert_eq!(hamming(&[0b1010_1010, 0xff], &[0b0101_0101, 0xff]), 8);
        assert_eq!(hamming(&[0x0f], &[0x0e]), 1);
    }

    #[test]
    fn unpacked_bits_reproduce_hamming() {
        let a = [0b1100_0011u8, 0x5a];
        let b = [0b0100_1111u8, 0xa5];
        let d = squared_euclidean(&unpack_bits(&a), &unpack_bits(&b));
        assert_eq!(d as u32, hamming(&a, &b));
    }

    #[test]
    fn euclidean_matches_pythagoras() {
        assert!((euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }
}
