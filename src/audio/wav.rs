// 16-bit PCM WAV encoding and header inspection

use super::AudioBuffer;
use thiserror::Error;

const HEADER_LEN: usize = 44;
const PCM_FORMAT: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("clip is too short to be a WAV file ({0} bytes)")]
    TooShort(usize),

    #[error("missing RIFF/WAVE header")]
    NotRiff,

    #[error("missing fmt chunk")]
    MissingFormat,

    #[error("missing data chunk")]
    MissingData,

    #[error("unsupported WAV layout: {0}")]
    Unsupported(String),
}

/// Facts read back from an encoded clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: usize,
    pub duration_secs: f32,
}

/// Convert AudioBuffer to WAV bytes
pub fn encode(audio: &AudioBuffer) -> Vec<u8> {
    let sample_rate = audio.sample_rate;
    let channels = audio.channels.max(1);
    let samples = &audio.samples;

    let mut wav = Vec::with_capacity(HEADER_LEN + samples.len() * 2);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    let file_size = (36 + samples.len() * 2) as u32;
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    wav.extend_from_slice(&PCM_FORMAT.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * channels as u32 * 2;
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&(channels * 2).to_le_bytes()); // block align
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    let data_size = (samples.len() * 2) as u32;
    wav.extend_from_slice(&data_size.to_le_bytes());

    for &sample in samples {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Walks the chunk list of an encoded clip and measures its real length.
pub fn inspect(bytes: &[u8]) -> Result<WavInfo, WavError> {
    if bytes.len() < HEADER_LEN {
        return Err(WavError::TooShort(bytes.len()));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotRiff);
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;
    let mut data_len: Option<usize> = None;
    let mut offset = 12;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4) as usize;
        let body = offset + 8;

        match id {
            b"fmt " => {
                if size < 16 || body + 16 > bytes.len() {
                    return Err(WavError::MissingFormat);
                }
                format = Some((
                    read_u16(bytes, body),
                    read_u16(bytes, body + 2),
                    read_u32(bytes, body + 4),
                    read_u16(bytes, body + 14),
                ));
            }
            b"data" => {
                // A truncated write leaves fewer bytes than the header claims.
                data_len = Some(size.min(bytes.len() - body));
                break;
            }
            _ => {}
        }

        offset = body + size + (size % 2);
    }

    let (audio_format, channels, sample_rate, bits) = format.ok_or(WavError::MissingFormat)?;
    let data_len = data_len.ok_or(WavError::MissingData)?;

    if audio_format != PCM_FORMAT || bits != BITS_PER_SAMPLE {
        return Err(WavError::Unsupported(format!(
            "format={} bits={}",
            audio_format, bits
        )));
    }
    if channels == 0 || sample_rate == 0 {
        return Err(WavError::Unsupported(format!(
            "channels={} sample_rate={}",
            channels, sample_rate
        )));
    }

    let frames = data_len / (channels as usize * 2);
    Ok(WavInfo {
        sample_rate,
        channels,
        frames,
        duration_secs: frames as f32 / sample_rate as f32,
    })
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_measures_encoded_length() {
        let buffer = AudioBuffer::from_samples(vec![7; 8_000 * 2 * 3], 8_000, 2);
        let info = inspect(&encode(&buffer)).unwrap();

        assert_eq!(info.sample_rate, 8_000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.frames, 24_000);
        assert!((info.duration_secs - 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_buffer_encodes_to_zero_frames() {
        let info = inspect(&encode(&AudioBuffer::new(16_000, 1))).unwrap();
        assert_eq!(info.frames, 0);
    }

    #[test]
    fn truncated_data_is_measured_by_what_is_present() {
        let buffer = AudioBuffer::from_samples(vec![1; 16_000], 16_000, 1);
        let mut bytes = encode(&buffer);
        bytes.truncate(HEADER_LEN + 16_000);

        let info = inspect(&bytes).unwrap();
        assert_eq!(info.frames, 8_000);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(inspect(b"RIFF"), Err(WavError::TooShort(4)));
        assert_eq!(inspect(&[0u8; 64]), Err(WavError::NotRiff));
    }
}
