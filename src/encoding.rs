use base64::{
    alphabet,
    engine::{general_purpose::URL_SAFE_NO_PAD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    DecodeError, Engine,
};

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

pub fn encode_b64url(input: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Decodes base64url with or without trailing `=` padding. Browsers emit the
/// unpadded form, but some client libraries pad subscription keys.
pub fn decode_b64url(input: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_LENIENT.decode(input.trim())
}

/// Decodes either alphabet. Recipient tokens are produced with `btoa` on the
/// client, which uses the standard alphabet, but older clients used base64url.
pub fn decode_b64_any(input: &str) -> Result<Vec<u8>, DecodeError> {
    let input = input.trim();
    STANDARD_LENIENT
        .decode(input)
        .or_else(|_| URL_SAFE_LENIENT.decode(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_padded_and_unpadded_b64url() {
        assert_eq!(decode_b64url("BTBZMqHH6r4Tts7J_aSIgg").unwrap().len(), 16);
        assert_eq!(decode_b64url("BTBZMqHH6r4Tts7J_aSIgg==").unwrap().len(), 16);
    }

    #[test]
    fn decodes_both_alphabets() {
        let bytes = [0xfb, 0xff, 0xfe];
        assert_eq!(decode_b64_any("+//+").unwrap(), bytes);
        assert_eq!(decode_b64_any("-__-").unwrap(), bytes);
        assert!(decode_b64_any("not base64!").is_err());
    }

    #[test]
    fn encodes_without_padding() {
        assert_eq!(encode_b64url(&[0xfb, 0xff]), "-_8");
    }
}
