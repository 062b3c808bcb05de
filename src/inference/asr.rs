use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::runtime::check_status;
use super::SpeechToText;
use crate::error::{Error, Result};

/// Rate the transcription service expects.
pub const ASR_SAMPLE_RATE: u32 = 16_000;

/// Speech-to-text over an OpenAI-compatible transcription endpoint
/// (faster-whisper-server and friends).
pub struct AsrEngine {
    http: reqwest::Client,
    base_url: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub start: f64,
    pub text: String,
}

impl AsrEngine {
    pub fn new(base_url: impl Into<String>, model_id: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(AsrEngine {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl SpeechToText for AsrEngine {
    async fn transcribe(&self, audio: &Path) -> Result<String> {
        info!("[asr] Transcribing audio from {}", audio.display());
        let bytes = tokio::fs::read(audio).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("Audio file not found: {}", audio.display()))
            }
            _ => Error::Io(e),
        })?;

        let (samples, sample_rate) = decode_wav_bytes(&bytes)?;
        let samples = resample_to_16khz(&samples, sample_rate);
        let duration_s = samples.len() as f64 / ASR_SAMPLE_RATE as f64;
        let upload = encode_wav_16k(&samples)?;

        let t0 = Instant::now();
        let file = reqwest::multipart::Part::bytes(upload)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model_id.clone())
            .text("response_format", "verbose_json");

        let resp = self
            .http
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let parsed: TranscriptionResponse = check_status(resp).await?.json().await?;

        let text = if parsed.segments.is_empty() {
            parsed.text.trim().to_string()
        } else {
            join_segments(parsed.segments)
        };

        let elapsed = t0.elapsed().as_secs_f64();
        let rtf = if elapsed > 0.0 { duration_s / elapsed } else { 0.0 };
        info!(
            "[asr] Transcribed {:.1}s audio in {:.2}s ({:.1}x real-time)",
            duration_s, elapsed, rtf
        );

        Ok(text)
    }
}

/// One transcript from all segments, in chronological order, trimmed.
pub fn join_segments(mut segments: Vec<Segment>) -> String {
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Decode a WAV file into mono f32 samples and its sample rate.
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::InvalidInput(format!("Invalid WAV: {}", e)))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(|s| s.ok())
            .collect(),
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
    };

    let channels = spec.channels.max(1) as usize;
    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        samples
    };

    Ok((mono, spec.sample_rate))
}

/// Resample audio to 16kHz mono.
pub fn resample_to_16khz(samples: &[f32], from_rate: u32) -> Vec<f32> {
    if from_rate == ASR_SAMPLE_RATE || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = ASR_SAMPLE_RATE as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx0 = (src_idx.floor() as usize).min(samples.len() - 1);
        let idx1 = (idx0 + 1).min(samples.len() - 1);
        let frac = src_idx - idx0 as f64;
        let val = samples[idx0] as f64 * (1.0 - frac) + samples[idx1] as f64 * frac;
        resampled.push(val as f32);
    }

    resampled
}

fn encode_wav_16k(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: ASR_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut out, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stereo_wav(rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut out = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut out, spec).unwrap();
            for _ in 0..frames {
                writer.write_sample(16384i16).unwrap();
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn stereo_is_mixed_down() {
        let (mono, rate) = decode_wav_bytes(&stereo_wav(16_000, 8)).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(mono.len(), 8);
        assert!((mono[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn resampling_scales_length() {
        let samples = vec![0.0f32; 48_000];
        assert_eq!(resample_to_16khz(&samples, 48_000).len(), 16_000);
        assert_eq!(resample_to_16khz(&samples, 16_000).len(), 48_000);
        assert!(resample_to_16khz(&[], 44_100).is_empty());
    }

    #[test]
    fn segments_join_in_time_order() {
        let segments = vec![
            Segment { start: 2.0, text: " world.".into() },
            Segment { start: 0.0, text: " Hello".into() },
        ];
        assert_eq!(join_segments(segments), "Hello world.");
    }

    #[test]
    fn non_wav_upload_is_invalid_input() {
        let err = decode_wav_bytes(b"ID3 mp3 data").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn transcribe_concatenates_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "ignored when segments exist",
                "segments": [
                    {"start": 0.0, "end": 1.0, "text": " What is"},
                    {"start": 1.0, "end": 2.0, "text": " two plus two? "}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("question.wav");
        std::fs::write(&wav, stereo_wav(44_100, 4410)).unwrap();

        let engine = AsrEngine::new(server.uri(), "whisper", Duration::from_secs(5)).unwrap();
        let text = engine.transcribe(&wav).await.unwrap();
        assert_eq!(text, "What is two plus two?");
    }

    #[tokio::test]
    async fn missing_audio_is_not_found() {
        let engine = AsrEngine::new("http://127.0.0.1:9", "whisper", Duration::from_secs(1)).unwrap();
        let err = engine
            .transcribe(Path::new("/definitely/not/here.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
