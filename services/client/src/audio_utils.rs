use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate the voice backend streams PCM16 at unless configured otherwise.
pub const DEFAULT_STREAM_SAMPLE_RATE: u32 = 24000;

/// Input frames handed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Interprets little-endian PCM16 bytes as samples. A trailing odd byte is ignored.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Serializes samples as little-endian PCM16 bytes.
pub fn pcm16_to_bytes(pcm16: &[i16]) -> Vec<u8> {
    pcm16.iter().flat_map(|sample| sample.to_le_bytes()).collect()
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Resamples a complete mono buffer from `in_rate` to `out_rate`.
///
/// The output is aligned with the input (resampler delay removed) and holds
/// `len * out_rate / in_rate` samples, rounded.
pub fn resample(samples: &[f32], in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(in_rate as f64, out_rate as f64, RESAMPLE_CHUNK)?;
    let expected =
        (samples.len() as f64 * out_rate as f64 / in_rate as f64).round() as usize;
    let delay = resampler.output_delay();

    let mut resampled = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut chunks = samples.chunks_exact(resampler.input_frames_next());
    for chunk in chunks.by_ref() {
        let out = resampler.process(&[chunk], None)?;
        resampled.extend_from_slice(&out[0]);
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let out = resampler.process_partial(Some(&[remainder][..]), None)?;
        resampled.extend_from_slice(&out[0]);
    }
    // Push the samples still held back by the resampler's delay.
    while resampled.len() < expected + delay {
        let out = resampler.process_partial(None::<&[&[f32]]>, None)?;
        if out[0].is_empty() {
            break;
        }
        resampled.extend_from_slice(&out[0]);
    }

    Ok(resampled
        .into_iter()
        .skip(delay)
        .take(expected)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        // Test creating a resampler with valid parameters
        let result = create_resampler(16000.0, 24000.0, 1024);
        assert!(result.is_ok());

        // Test creating a resampler with downsampling
        let result = create_resampler(48000.0, 24000.0, 1024);
        assert!(result.is_ok());
    }

    #[test]
    fn test_pcm16_bytes() {
        // 16384 = 0x4000 little endian, -2 = 0xfffe
        let bytes = [0x00u8, 0x40, 0xfe, 0xff, 0x7f];
        let samples = pcm16_from_bytes(&bytes);
        assert_eq!(samples, vec![16384, -2]);

        assert_eq!(pcm16_to_bytes(&samples), bytes[..4].to_vec());
        assert!(pcm16_from_bytes(&[]).is_empty());
    }

    #[test]
    fn test_convert_f32_to_i16() {
        let input = vec![1.0f32, -1.0f32, 0.0f32, 0.5f32];
        let result = convert_f32_to_i16(&input);

        assert_eq!(result.len(), 4);
        assert_eq!(result[0], i16::MAX);
        // -1.0 * 32767 = -32767, not i16::MIN (-32768)
        assert_eq!(result[1], -32767);
        assert_eq!(result[2], 0);
        assert_eq!(result[3], (0.5 * i16::MAX as f32) as i16);

        // Out-of-range values are clamped
        let result = convert_f32_to_i16(&[2.0f32, -2.0f32, f32::INFINITY]);
        assert_eq!(result, vec![i16::MAX, i16::MIN, i16::MAX]);
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let input = vec![i16::MAX, i16::MIN, 0i16, 16384i16];
        let result = convert_i16_to_f32(&input);

        assert_eq!(result.len(), 4);
        assert_abs_diff_eq!(result[0], i16::MAX as f32 / 32768.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[3], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1f32, -0.2, 0.3];
        assert_eq!(resample(&samples, 24000, 24000).unwrap(), samples);
        assert!(resample(&[], 16000, 24000).unwrap().is_empty());
    }

    #[test]
    fn test_resample_changes_length_and_keeps_level() {
        let samples = vec![0.5f32; 1600];

        let up = resample(&samples, 16000, 24000).unwrap();
        assert_eq!(up.len(), 2400);
        assert_abs_diff_eq!(up[1200], 0.5, epsilon = 0.01);

        let down = resample(&samples, 48000, 24000).unwrap();
        assert_eq!(down.len(), 800);
        assert_abs_diff_eq!(down[400], 0.5, epsilon = 0.01);
    }
}
