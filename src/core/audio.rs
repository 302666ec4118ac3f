//! Audio conversion for the telephony media plane.
//!
//! Converts between the carrier's wire format (G.711 mu-law, 8 kHz mono) and
//! the PCM formats the speech providers expect:
//! - STT input: PCM 16-bit little-endian, 16 kHz mono
//! - TTS output: PCM 16-bit little-endian, 24 kHz mono
//!
//! All functions here are pure and CPU-bound; they are safe to call from any
//! task without blocking the event dispatcher.

use once_cell::sync::Lazy;

/// Sample rate of the carrier media stream (G.711)
pub const TWILIO_SAMPLE_RATE: u32 = 8000;
/// Sample rate expected by the STT providers
pub const STT_SAMPLE_RATE: u32 = 16000;
/// Sample rate produced by the TTS providers
pub const TTS_SAMPLE_RATE: u32 = 24000;
/// Canonical outbound frame size: 20 ms of mu-law at 8 kHz
pub const TWILIO_FRAME_BYTES: usize = 160;
/// mu-law encoding of digital silence
pub const MULAW_SILENCE: u8 = 0xFF;

const BIAS: i32 = 0x84;
const SEG_END: [i32; 8] = [0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF, 0x3FFF, 0x7FFF];

/// G.711 mu-law decode table, indexed by the 8-bit code word.
static MULAW_DECODE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (code, entry) in table.iter_mut().enumerate() {
        let u = !(code as u8);
        let mut t = (((u & 0x0F) as i32) << 3) + BIAS;
        t <<= (u >> 4) & 0x07;
        *entry = if u & 0x80 != 0 {
            (BIAS - t) as i16
        } else {
            (t - BIAS) as i16
        };
    }
    table
});

/// Encode a single 16-bit linear PCM sample as G.711 mu-law.
///
/// Standard ITU-T G.711 with bias 0x84 and inversion of the code word.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let (pcm, mask) = if (sample as i32) < 0 {
        (BIAS - sample as i32, 0x7Fu8)
    } else {
        (sample as i32 + BIAS, 0xFFu8)
    };

    let seg = SEG_END.iter().position(|&end| pcm <= end);
    match seg {
        Some(seg) => {
            let uval = ((seg as u8) << 4) | (((pcm >> (seg + 3)) & 0x0F) as u8);
            uval ^ mask
        }
        // Out of range: return the maximum magnitude for this sign
        None => 0x7F ^ mask,
    }
}

/// Decode a G.711 mu-law code word to a 16-bit linear PCM sample.
pub fn mulaw_to_linear(code: u8) -> i16 {
    MULAW_DECODE[code as usize]
}

/// Interpret a byte slice as 16-bit little-endian PCM samples.
///
/// An odd trailing byte is treated as truncation and dropped.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialize 16-bit PCM samples as little-endian bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Convert 16-bit little-endian PCM bytes to mu-law bytes.
pub fn pcm_bytes_to_mulaw(bytes: &[u8]) -> Vec<u8> {
    bytes
        .chunks_exact(2)
        .map(|pair| linear_to_mulaw(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Convert mu-law bytes to 16-bit little-endian PCM bytes.
pub fn mulaw_bytes_to_pcm(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for &code in bytes {
        out.extend_from_slice(&mulaw_to_linear(code).to_le_bytes());
    }
    out
}

/// Linear-interpolation resampler.
///
/// Fractional-index interpolation between adjacent samples; returns the input
/// unchanged when the rates are equal. Deterministic and adequate for
/// voice-band telephony audio; not suitable for high-fidelity material.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_len);
    let last = samples.len() - 1;

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let a = samples[idx.min(last)] as f64;
        let b = samples[(idx + 1).min(last)] as f64;
        let interpolated = a + (b - a) * frac;
        out.push(interpolated.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }

    out
}

/// Iterate over fixed 160-byte mu-law frames, padding the final short frame
/// with mu-law silence.
pub fn twilio_frames(mulaw: &[u8]) -> impl Iterator<Item = Vec<u8>> + '_ {
    mulaw.chunks(TWILIO_FRAME_BYTES).map(|chunk| {
        if chunk.len() == TWILIO_FRAME_BYTES {
            chunk.to_vec()
        } else {
            let mut frame = chunk.to_vec();
            frame.resize(TWILIO_FRAME_BYTES, MULAW_SILENCE);
            frame
        }
    })
}

/// Convert little-endian PCM at `src_rate` into carrier-ready mu-law frames.
///
/// Pipeline: LE bytes -> i16 -> resample to 8 kHz -> mu-law -> 160-byte frames.
pub fn convert_to_twilio(pcm: &[u8], src_rate: u32) -> Vec<Vec<u8>> {
    let samples = pcm_bytes_to_samples(pcm);
    let resampled = resample(&samples, src_rate, TWILIO_SAMPLE_RATE);
    let mulaw: Vec<u8> = resampled.iter().map(|&s| linear_to_mulaw(s)).collect();
    twilio_frames(&mulaw).collect()
}

/// Convert carrier mu-law bytes into little-endian PCM at `dst_rate`.
///
/// Pipeline: mu-law -> i16 -> resample -> LE bytes. Feeds STT at 16 kHz.
pub fn convert_from_twilio(mulaw: &[u8], dst_rate: u32) -> Vec<u8> {
    let samples: Vec<i16> = mulaw.iter().map(|&code| mulaw_to_linear(code)).collect();
    let resampled = resample(&samples, TWILIO_SAMPLE_RATE, dst_rate);
    samples_to_pcm_bytes(&resampled)
}

/// Wrap raw PCM in a canonical 44-byte WAV header.
///
/// Used to containerize buffered audio before posting it to batch STT
/// providers.
pub fn wav_from_pcm(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let data_len = pcm.len() as u32;

    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// RMS-energy speech gate over 16-bit little-endian PCM.
pub fn has_speech_energy(pcm: &[u8], threshold: u32) -> bool {
    if pcm.len() < 2 {
        return false;
    }

    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for pair in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as i64;
        sum += (sample * sample) as u64;
        count += 1;
    }
    let rms = ((sum / count) as f64).sqrt() as u32;
    rms > threshold
}

/// Duration in milliseconds of 16-bit mono PCM of the given byte length.
pub fn audio_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    (byte_len as u64 / 2) * 1000 / sample_rate as u64
}

/// mu-law silence of the given duration.
pub fn create_silence(duration_ms: u64, sample_rate: u32) -> Vec<u8> {
    let num_samples = (sample_rate as u64 * duration_ms / 1000) as usize;
    vec![MULAW_SILENCE; num_samples]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_known_sample_pairs() {
        // Fixed pairs from the G.711 mapping
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(linear_to_mulaw(-1), 0x7F);
        assert_eq!(linear_to_mulaw(32767), 0x80);
        assert_eq!(linear_to_mulaw(-32768), 0x00);
        assert_eq!(linear_to_mulaw(1000), 0xCE);

        assert_eq!(mulaw_to_linear(0xFF), 0);
        assert_eq!(mulaw_to_linear(0x7F), 0);
        assert_eq!(mulaw_to_linear(0x80), 32124);
        assert_eq!(mulaw_to_linear(0x00), -32124);
        assert_eq!(mulaw_to_linear(0xCE), 988);
    }

    #[test]
    fn test_mulaw_roundtrip_is_quantization_stable() {
        // decode(encode(x)) must be a fixed point of the quantizer
        for raw in (-32768i32..=32767).step_by(17) {
            let sample = raw as i16;
            let decoded = mulaw_to_linear(linear_to_mulaw(sample));
            let redecoded = mulaw_to_linear(linear_to_mulaw(decoded));
            assert_eq!(decoded, redecoded, "unstable quantization for {sample}");
        }
    }

    #[test]
    fn test_mulaw_roundtrip_preserves_sign_and_magnitude() {
        for raw in (-30000i32..=30000).step_by(997) {
            let sample = raw as i16;
            let decoded = mulaw_to_linear(linear_to_mulaw(sample)) as i32;
            // mu-law quantization error grows with the segment; loose bound
            let tolerance = (raw.abs() / 8) + 64;
            assert!(
                (decoded - raw).abs() <= tolerance,
                "decode(encode({raw})) = {decoded}, outside tolerance {tolerance}"
            );
        }
    }

    #[test]
    fn test_pcm_bytes_odd_length_truncates() {
        let samples = pcm_bytes_to_samples(&[0x01, 0x02, 0x03]);
        assert_eq!(samples, vec![0x0201]);

        let mulaw = pcm_bytes_to_mulaw(&[0x00, 0x00, 0x55]);
        assert_eq!(mulaw, vec![0xFF]);
    }

    #[test]
    fn test_pcm_mulaw_buffer_roundtrip() {
        let pcm = samples_to_pcm_bytes(&[0, 1000, -1000, 8000, -8000]);
        let mulaw = pcm_bytes_to_mulaw(&pcm);
        assert_eq!(mulaw.len(), 5);
        let back = mulaw_bytes_to_pcm(&mulaw);
        assert_eq!(back.len(), 10);
        let samples = pcm_bytes_to_samples(&back);
        assert_eq!(samples[0], 0);
        assert!(samples[1] > 0 && samples[2] < 0);
    }

    #[test]
    fn test_resample_identity_at_equal_rates() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 13 % 2000 - 1000) as i16).collect();
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_doubles_and_halves() {
        let samples: Vec<i16> = vec![0, 100, 200, 300];
        let up = resample(&samples, 8000, 16000);
        assert_eq!(up.len(), 8);
        // First output sample is exact, midpoints interpolated
        assert_eq!(up[0], 0);
        assert_eq!(up[1], 50);
        assert_eq!(up[2], 100);

        let down = resample(&up, 16000, 8000);
        assert_eq!(down.len(), 4);
        assert_eq!(down[0], 0);
    }

    #[test]
    fn test_convert_to_twilio_frame_size() {
        // 100 ms at 16 kHz: 1600 samples -> 800 mu-law bytes -> 5 full frames
        let pcm = samples_to_pcm_bytes(&vec![0i16; 1600]);
        let frames = convert_to_twilio(&pcm, 16000);
        assert_eq!(frames.len(), 5);
        for frame in &frames {
            assert_eq!(frame.len(), TWILIO_FRAME_BYTES);
        }
    }

    #[test]
    fn test_convert_to_twilio_pads_last_frame_with_silence() {
        // 420 samples at 8 kHz -> 420 mu-law bytes -> 2 full frames + 100 bytes
        let pcm = samples_to_pcm_bytes(&vec![1000i16; 420]);
        let frames = convert_to_twilio(&pcm, 8000);
        assert_eq!(frames.len(), 3);
        let last = &frames[2];
        assert_eq!(last.len(), TWILIO_FRAME_BYTES);
        assert!(last[100..].iter().all(|&b| b == MULAW_SILENCE));
        assert!(last[..100].iter().all(|&b| b != MULAW_SILENCE));
    }

    #[test]
    fn test_convert_to_twilio_empty_input() {
        assert!(convert_to_twilio(&[], 24000).is_empty());
    }

    #[test]
    fn test_convert_from_twilio_upsamples_for_stt() {
        // 160 mu-law bytes (20 ms) -> 320 samples at 16 kHz -> 640 bytes
        let mulaw = vec![MULAW_SILENCE; 160];
        let pcm = convert_from_twilio(&mulaw, STT_SAMPLE_RATE);
        assert_eq!(pcm.len(), 640);
        assert!(pcm.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wav_header_fields() {
        let pcm = vec![0u8; 1000];
        let wav = wav_from_pcm(&pcm, 16000, 1);
        assert_eq!(wav.len(), 44 + 1000);
        assert_eq!(&wav[0..4], b"RIFF");
        // RIFF chunk size = data length + 36
        assert_eq!(u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]), 1036);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        // PCM format, mono
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        // Sample rate and byte rate
        assert_eq!(
            u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]),
            16000
        );
        assert_eq!(
            u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]),
            32000
        );
        // Block align
        assert_eq!(u16::from_le_bytes([wav[32], wav[33]]), 2);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(
            u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]),
            1000
        );
    }

    #[test]
    fn test_speech_energy_gate() {
        let silence = samples_to_pcm_bytes(&vec![0i16; 320]);
        assert!(!has_speech_energy(&silence, 500));

        let loud = samples_to_pcm_bytes(&vec![8000i16; 320]);
        assert!(has_speech_energy(&loud, 500));

        assert!(!has_speech_energy(&[], 500));
        assert!(!has_speech_energy(&[0x01], 500));
    }

    #[test]
    fn test_audio_duration() {
        // 32000 bytes of 16-bit PCM at 16 kHz = 1 second
        assert_eq!(audio_duration_ms(32000, 16000), 1000);
        assert_eq!(audio_duration_ms(3200, 16000), 100);
    }

    #[test]
    fn test_create_silence() {
        let silence = create_silence(20, TWILIO_SAMPLE_RATE);
        assert_eq!(silence.len(), TWILIO_FRAME_BYTES);
        assert!(silence.iter().all(|&b| b == MULAW_SILENCE));
    }
}
