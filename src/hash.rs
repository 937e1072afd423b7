//! 32-bit FNV-1a string hash.
//!
//! Output must be bit-identical on every platform and in every language binding, as buckets and
//! weighted selections derived from it are persisted implicitly in live experiments.

const OFFSET_BASIS: u32 = 2_166_136_261;
const PRIME: u32 = 16_777_619;

/// Hash `input` with 32-bit FNV-1a.
///
/// Characters are fed as UTF-16 code units, so non-ASCII input hashes the same way as in
/// JavaScript bindings (`charCodeAt`). ASCII input is equivalent to hashing its bytes.
///
/// ```
/// # use rollout_core::hash;
/// assert_eq!(hash(""), 2166136261);
/// assert_eq!(hash("a"), 3826002220);
/// ```
pub fn hash(input: &str) -> u32 {
    input.encode_utf16().fold(OFFSET_BASIS, |acc, unit| {
        (acc ^ u32::from(unit)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::hash;

    #[test]
    fn empty_string_is_offset_basis() {
        assert_eq!(hash(""), 2_166_136_261);
    }

    #[test]
    fn known_vectors() {
        assert_eq!(hash("a"), 3_826_002_220);
        assert_eq!(hash("test"), 2_949_673_445);
        assert_eq!(hash("hello"), 1_335_831_723);
    }

    #[test]
    fn non_ascii_hashes_utf16_code_units() {
        // U+00E9 is one code unit, U+1F600 is a surrogate pair (0xD83D 0xDE00)
        assert_eq!(hash("é"), 1_812_687_940);
        assert_eq!(hash("café"), 856_211_068);
        assert_eq!(hash("😀"), 3_409_036_472);
        assert_eq!(hash("user-😀"), 1_101_030_064);

        let by_units = [0xD83Du16, 0xDE00].iter().fold(2_166_136_261u32, |acc, unit| {
            (acc ^ u32::from(*unit)).wrapping_mul(16_777_619)
        });
        assert_eq!(hash("😀"), by_units);
    }

    #[test]
    fn is_deterministic() {
        for _ in 0..10 {
            assert_eq!(hash("user-abc:layer_ui"), hash("user-abc:layer_ui"));
        }
    }

    #[test]
    fn ascii_matches_byte_wise_fnv() {
        let input = "user-123:layer_pricing";
        let by_bytes = input.bytes().fold(2_166_136_261u32, |acc, b| {
            (acc ^ u32::from(b)).wrapping_mul(16_777_619)
        });
        assert_eq!(hash(input), by_bytes);
    }
}
