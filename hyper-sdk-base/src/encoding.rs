//! Text encodings for fixed length keys.
//!
//! A key has exactly two textual forms: [z-base-32] and lowercase hex. For a fixed length
//! array the encoding is known from the length of the string alone, so no prefix or tag is
//! needed to tell them apart.
//!
//! [z-base-32]: https://philzimmermann.com/docs/human-oriented-base-32-encoding.txt

use nested_enum_utils::common_fields;
use snafu::{Backtrace, ResultExt, Snafu};

pub use data_encoding::DecodeError;

/// Length of the z-base-32 encoding of a 32 byte key.
pub const Z32_LEN: usize = z32_len(32);

/// Length of the hex encoding of a 32 byte key.
pub const HEX_LEN: usize = 32 * 2;

/// Error when parsing a z-base-32 or hex string into a fixed length array.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum KeyParsingError {
    /// The string had the length of a z-base-32 encoding but did not decode.
    #[snafu(display("invalid z-base-32 encoding"))]
    Z32 { source: z32::Z32Error },
    /// The z-base-32 string decoded, but is not the encoding of the decoded bytes.
    ///
    /// Happens when the unused bits of the last character are not zero.
    #[snafu(display("non-canonical z-base-32 encoding"))]
    NonCanonical {},
    /// The string had the length of a hex encoding but did not decode.
    #[snafu(display("invalid hex encoding"))]
    Hex { source: DecodeError },
    /// The string or byte slice had the wrong length.
    #[snafu(display("invalid length {len}"))]
    InvalidLength { len: usize },
}

/// Number of characters needed to encode `n` bytes in z-base-32, without padding.
pub const fn z32_len(n: usize) -> usize {
    (n * 8).div_ceil(5)
}

/// Converts to a z-base-32 string.
pub fn fmt_z32(bytes: impl AsRef<[u8]>) -> String {
    z32::encode(bytes.as_ref())
}

/// Converts to a lowercase hex string.
pub fn fmt_hex(bytes: impl AsRef<[u8]>) -> String {
    data_encoding::HEXLOWER.encode(bytes.as_ref())
}

/// Converts to a z-base-32 string limited to the first 5 bytes.
pub fn fmt_short(bytes: impl AsRef<[u8]>) -> String {
    let len = bytes.as_ref().len().min(5);
    z32::encode(&bytes.as_ref()[..len])
}

/// Parses a z-base-32 string into a byte array.
///
/// Only the canonical encoding is accepted, so every array has exactly one string form.
pub fn parse_z32_array<const N: usize>(input: &str) -> Result<[u8; N], KeyParsingError> {
    let bytes = z32::decode(input.as_bytes()).context(Z32Snafu)?;
    let array = to_array(bytes)?;
    snafu::ensure!(fmt_z32(array) == input, NonCanonicalSnafu);
    Ok(array)
}

/// Parses a hex string into a byte array.
///
/// Upper and lower case digits are both accepted.
pub fn parse_hex_array<const N: usize>(input: &str) -> Result<[u8; N], KeyParsingError> {
    let bytes = data_encoding::HEXLOWER_PERMISSIVE
        .decode(input.as_bytes())
        .context(HexSnafu)?;
    to_array(bytes)
}

/// Parses a fixed length z-base-32 or hex string into a byte array.
///
/// For fixed length we can know the encoding by the length of the string. Any other length
/// is rejected without attempting to decode.
pub fn parse_array_z32_or_hex<const N: usize>(input: &str) -> Result<[u8; N], KeyParsingError> {
    let len = input.len();
    if len == N * 2 {
        parse_hex_array(input)
    } else if len == z32_len(N) {
        parse_z32_array(input)
    } else {
        Err(InvalidLengthSnafu { len }.build())
    }
}

fn to_array<const N: usize>(bytes: Vec<u8>) -> Result<[u8; N], KeyParsingError> {
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| InvalidLengthSnafu { len }.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths() {
        assert_eq!(Z32_LEN, 52);
        assert_eq!(HEX_LEN, 64);
        assert_eq!(fmt_z32([0u8; 32]).len(), Z32_LEN);
        assert_eq!(fmt_hex([0u8; 32]).len(), HEX_LEN);
    }

    #[test]
    fn dispatch_by_length() {
        let bytes = [7u8; 32];
        let hex = fmt_hex(bytes);
        let z32 = fmt_z32(bytes);
        assert_eq!(parse_array_z32_or_hex::<32>(&hex).unwrap(), bytes);
        assert_eq!(parse_array_z32_or_hex::<32>(&z32).unwrap(), bytes);
        assert_eq!(
            parse_array_z32_or_hex::<32>(&hex.to_ascii_uppercase()).unwrap(),
            bytes
        );

        let err = parse_array_z32_or_hex::<32>("abc").unwrap_err();
        assert!(matches!(err, KeyParsingError::InvalidLength { len: 3, .. }));
    }

    #[test]
    fn bad_characters() {
        // right length for hex, but `z` is not a hex digit
        let not_hex = "z".repeat(HEX_LEN);
        assert!(matches!(
            parse_array_z32_or_hex::<32>(&not_hex),
            Err(KeyParsingError::Hex { .. })
        ));

        // right length for z32, but `0`, `l`, `v` and `2` are not in the alphabet
        let not_z32 = "0lv2".repeat(Z32_LEN / 4);
        assert!(matches!(
            parse_array_z32_or_hex::<32>(&not_z32),
            Err(KeyParsingError::Z32 { .. })
        ));
    }

    #[test]
    fn only_canonical_z32() {
        const ALPHABET: &str = "ybndrfg8ejkmcpqxot1uwisza345h769";
        let prefix = fmt_z32([0u8; 32])[..Z32_LEN - 1].to_string();
        let mut accepted = Vec::new();
        for last in ALPHABET.chars() {
            let input = format!("{prefix}{last}");
            match parse_z32_array::<32>(&input) {
                Ok(bytes) => {
                    assert_eq!(fmt_z32(bytes), input);
                    accepted.push(input);
                }
                Err(err) => assert!(matches!(err, KeyParsingError::NonCanonical { .. })),
            }
        }
        // the last character carries one bit of the key
        assert_eq!(accepted.len(), 2);
        assert!(accepted.contains(&fmt_z32([0u8; 32])));
    }

    #[test]
    fn short() {
        let s = fmt_short([1u8; 32]);
        assert_eq!(s.len(), 8);
        assert!(fmt_z32([1u8; 32]).starts_with(&s));
    }
}
