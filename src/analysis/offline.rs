//! Offline analysis of recorded audio.
//!
//! Runs decoded PCM through the same frame and slice pipeline the live
//! stream uses, stamping frames with audio time instead of wall-clock time.
//! Useful for reproducing scores from recordings and for deterministic
//! tests.

use std::path::Path;

use crate::analysis::aggregator::SliceAggregator;
use crate::analysis::frame::compute_frame;
use crate::analysis::ring_buffer::RealtimeRingBuffer;
use crate::config::NoiseSettings;
use crate::error::AnalysisError;
use crate::types::NoiseSliceSummary;

/// Analyze mono PCM, one frame every `frame_ms` of audio
///
/// Each frame reads the trailing `fft_size` samples ending at the hop
/// position (shorter at the very start), mirroring a live analyser whose
/// window always holds the most recent samples. The final partial slice is
/// flushed.
pub fn analyze_pcm(
    samples: &[f32],
    sample_rate: u32,
    settings: &NoiseSettings,
    fft_size: usize,
) -> Vec<NoiseSliceSummary> {
    if sample_rate == 0 || samples.is_empty() {
        return Vec::new();
    }

    let frame_ms = settings.frame_interval().as_millis() as u64;
    let hop = ((frame_ms * u64::from(sample_rate)) / 1000).max(1) as usize;
    let fft_size = fft_size.max(1);

    // Offline runs have no chart; a one-point ring keeps the aggregator contract
    let mut aggregator = SliceAggregator::new(
        settings.slice_config(),
        settings.calibration(),
        RealtimeRingBuffer::new(0, 1),
    );

    let mut slices = Vec::new();
    let mut pos = hop;
    while pos <= samples.len() {
        let window = &samples[pos.saturating_sub(fft_size)..pos];
        let t = (pos as u64 * 1000) / u64::from(sample_rate);
        if let Some(summary) = aggregator.on_frame(&compute_frame(window, t)) {
            slices.push(summary);
        }
        pos += hop;
    }

    slices.extend(aggregator.flush());
    log::debug!(
        "[Offline] Analyzed {} samples @ {} Hz into {} slices",
        samples.len(),
        sample_rate,
        slices.len()
    );
    slices
}

/// Decode a WAV file and analyze it with [`analyze_pcm`]
///
/// Integer (8/16/24/32-bit) and 32-bit float files are accepted;
/// multi-channel input is reduced to its first channel.
pub fn analyze_wav<P: AsRef<Path>>(
    path: P,
    settings: &NoiseSettings,
    fft_size: usize,
) -> Result<Vec<NoiseSliceSummary>, AnalysisError> {
    let (samples, sample_rate) = read_wav_mono(path.as_ref())?;
    Ok(analyze_pcm(&samples, sample_rate, settings, fft_size))
}

fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32), AnalysisError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|err| AnalysisError::from_wav(path, err))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(AnalysisError::UnsupportedFormat {
            format: format!(
                "{} has {} channels @ {} Hz",
                path.display(),
                spec.channels,
                spec.sample_rate
            ),
        });
    }

    let read_error = |err: hound::Error| AnalysisError::from_wav(path, err);

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(read_error)?,
        hound::SampleFormat::Int if (1..=32).contains(&spec.bits_per_sample) => {
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|v| v as f32 / scale))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(read_error)?
        }
        hound::SampleFormat::Int => {
            return Err(AnalysisError::UnsupportedFormat {
                format: format!(
                    "bits_per_sample={} in {}",
                    spec.bits_per_sample,
                    path.display()
                ),
            })
        }
    };

    let channels = spec.channels as usize;
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved.chunks(channels).map(|frame| frame[0]).collect()
    };

    Ok((mono, spec.sample_rate))
}
