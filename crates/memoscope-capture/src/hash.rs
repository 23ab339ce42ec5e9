//! Perceptual hashing + Hamming distance dedup gate (`4.C` step 3):
//! gradient hash, 8x8 -> 64-bit, XOR+`count_ones()` Hamming distance.

use image::RgbImage;
use image_hasher::{HashAlg, HasherConfig};

/// 64-bit gradient perceptual hash (8x8), hex-encoded for the sidecar JSON.
pub fn phash(image: &RgbImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher();
    let dynamic = image::DynamicImage::ImageRgb8(image.clone());
    let hash = hasher.hash_image(&dynamic);
    hash.as_bytes().iter().map(|b| format!("{b:02x}")).collect()
}

/// Hamming distance between two hex-encoded hashes of equal length.
/// Returns `u32::MAX` (always "different") if lengths mismatch or either
/// hash fails to parse, so corrupt sidecar entries never wrongly suppress
/// a capture.
pub fn hamming_distance(a: &str, b: &str) -> u32 {
    let (Some(a), Some(b)) = (decode_hex(a), decode_hex(b)) else {
        return u32::MAX;
    };
    if a.len() != b.len() {
        return u32::MAX;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(color: [u8; 3]) -> RgbImage {
        let mut img = RgbImage::new(32, 32);
        for p in img.pixels_mut() {
            *p = Rgb(color);
        }
        img
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let img = solid([10, 20, 30]);
        let h1 = phash(&img);
        let h2 = phash(&img);
        assert_eq!(hamming_distance(&h1, &h2), 0);
    }

    #[test]
    fn mismatched_lengths_are_always_different() {
        assert_eq!(hamming_distance("ab", "abcd"), u32::MAX);
    }
}
