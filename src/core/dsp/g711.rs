//! G.711 companding (ITU-T G.711).
//!
//! A-law is the codec negotiated on the external-media leg; μ-law is kept for
//! PBX deployments that negotiate PCMU instead.

/// Compress one 16-bit linear sample to A-law.
pub fn alaw_compress(sample: i16) -> u8 {
    let mut ix = if sample < 0 {
        ((!sample) as u16 >> 4) as i16
    } else {
        sample >> 4
    };

    if ix > 15 {
        let mut iexp = 1;
        while ix > 16 + 15 {
            ix >>= 1;
            iexp += 1;
        }
        ix -= 16;
        ix += iexp << 4;
    }

    if sample >= 0 {
        ix |= 0x0080;
    }

    (ix ^ 0x0055) as u8
}

/// Expand one A-law byte to a 16-bit linear sample.
pub fn alaw_expand(compressed: u8) -> i16 {
    let mut ix = (compressed ^ 0x55) as i16;

    ix &= 0x007F;
    let iexp = ix >> 4;
    let mut mant = ix & 0x000F;

    if iexp > 0 {
        mant += 16;
    }

    mant = (mant << 4) + 0x0008;

    if iexp > 1 {
        mant <<= iexp - 1;
    }

    if compressed > 127 { mant } else { -mant }
}

/// Compress one 16-bit linear sample to μ-law.
pub fn ulaw_compress(sample: i16) -> u8 {
    let absno = if sample < 0 {
        ((!sample) as u16 >> 2) as i16 + 33
    } else {
        (sample >> 2) + 33
    };
    let absno = absno.min(0x1FFF);

    let mut i = absno >> 6;
    let mut segno = 1;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high_nibble = 0x0008 - segno;
    let low_nibble = 0x000F - ((absno >> segno) & 0x000F);
    let mut result = (high_nibble << 4) | low_nibble;

    if sample >= 0 {
        result |= 0x0080;
    }

    result as u8
}

/// Expand one μ-law byte to a 16-bit linear sample.
pub fn ulaw_expand(compressed: u8) -> i16 {
    let sign: i16 = if compressed < 0x80 { -1 } else { 1 };
    let mantissa = (!compressed) as i16;
    let exponent = (mantissa >> 4) & 0x0007;
    let segment = exponent + 1;
    let mantissa = mantissa & 0x000F;

    let step = 4 << segment;

    sign * ((0x0080 << exponent) + step * mantissa + step / 2 - 4 * 33)
}

/// Decode an A-law payload to linear PCM.
pub fn alaw_to_pcm(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| alaw_expand(b)).collect()
}

/// Encode linear PCM to an A-law payload.
pub fn pcm_to_alaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| alaw_compress(s)).collect()
}

/// Decode a μ-law payload to linear PCM.
pub fn ulaw_to_pcm(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| ulaw_expand(b)).collect()
}

/// Encode linear PCM to a μ-law payload.
pub fn pcm_to_ulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| ulaw_compress(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alaw_silence_byte() {
        // 0xD5 is A-law digital silence
        assert_eq!(alaw_compress(0), 0xD5);
        assert_eq!(alaw_expand(0xD5), 8);
    }

    #[test]
    fn test_alaw_every_code_is_stable() {
        // expand -> compress must be the identity on the 256 code words
        for code in 0u8..=255 {
            assert_eq!(alaw_compress(alaw_expand(code)), code, "code {code:#04x}");
        }
    }

    #[test]
    fn test_ulaw_every_code_is_stable() {
        for code in 0u8..=255 {
            // 0x7F and 0xFF both decode to zero
            if code == 0x7F {
                continue;
            }
            assert_eq!(ulaw_compress(ulaw_expand(code)), code, "code {code:#04x}");
        }
    }

    #[test]
    fn test_alaw_quantisation_error_is_bounded() {
        for sample in (-32768i32..=32767).step_by(97) {
            let sample = sample as i16;
            let decoded = alaw_expand(alaw_compress(sample)) as i32;
            let error = (decoded - sample as i32).abs();
            // largest A-law segment step is 1024
            assert!(error <= 1024, "sample {sample} decoded {decoded}");
        }
    }

    #[test]
    fn test_sign_preserved() {
        assert!(alaw_expand(alaw_compress(12000)) > 0);
        assert!(alaw_expand(alaw_compress(-12000)) < 0);
        assert!(ulaw_expand(ulaw_compress(12000)) > 0);
        assert!(ulaw_expand(ulaw_compress(-12000)) < 0);
    }

    #[test]
    fn test_batch_helpers_preserve_length() {
        let pcm = vec![0i16, 1000, -1000, 32767, -32768];
        let alaw = pcm_to_alaw(&pcm);
        assert_eq!(alaw.len(), pcm.len());
        assert_eq!(alaw_to_pcm(&alaw).len(), pcm.len());

        let ulaw = pcm_to_ulaw(&pcm);
        assert_eq!(ulaw_to_pcm(&ulaw).len(), pcm.len());
    }
}
