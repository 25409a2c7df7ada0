//! # Remote HTTP Recognizer
//!
//! Streams frames into a local utterance buffer, detects the end of the
//! utterance with an RMS silence gate, and POSTs the finished utterance as a
//! WAV file to an OpenAI-style `/v1/audio/transcriptions` endpoint. One
//! final transcript event is emitted per detected utterance; the endpoint is
//! request/response, so this implementation produces no partial events.

use crate::audio::AudioFrame;
use crate::config::{RecognitionConfig, SessionOptions};
use crate::error::PipelineError;
use crate::recognition::{Recognizer, RecognizerFactory, TranscriptEvent};
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Factory handing out [`RemoteRecognizer`] instances per session.
pub struct RemoteRecognizerFactory {
    config: RecognitionConfig,
}

impl RemoteRecognizerFactory {
    pub fn new(config: RecognitionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RecognizerFactory for RemoteRecognizerFactory {
    async fn open(&self, options: &SessionOptions) -> Result<Box<dyn Recognizer>, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Recognition(format!("failed to build client: {}", e)))?;

        info!(
            model = %options.asr_model,
            lang = %options.asr_lang,
            endpoint = %self.config.endpoint,
            "Opening remote recognizer"
        );

        Ok(Box::new(RemoteRecognizer {
            client,
            url: format!(
                "{}/v1/audio/transcriptions",
                self.config.endpoint.trim_end_matches('/')
            ),
            model: options.asr_model.clone(),
            language: options.asr_lang.clone(),
            sample_rate: options.sample_rate,
            silence_threshold: self.config.silence_threshold,
            hangover_samples: ms_to_samples(self.config.silence_hangover_ms, options.sample_rate),
            min_utterance_samples: ms_to_samples(self.config.min_utterance_ms, options.sample_rate),
            pcm: Vec::new(),
            in_speech: false,
            trailing_silence: 0,
        }))
    }
}

fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as usize * sample_rate as usize) / 1000
}

/// Recognizer that segments utterances locally and transcribes them remotely.
pub struct RemoteRecognizer {
    client: reqwest::Client,
    url: String,
    model: String,
    language: String,
    sample_rate: u32,
    silence_threshold: f32,
    hangover_samples: usize,
    min_utterance_samples: usize,

    /// PCM16 bytes of the utterance being collected
    pcm: Vec<u8>,
    /// Whether speech has been heard since the last reset/finalize
    in_speech: bool,
    /// Samples of continuous silence since the last speech frame
    trailing_silence: usize,
}

impl RemoteRecognizer {
    /// Send the buffered utterance off for transcription.
    async fn transcribe(&self, pcm: Vec<u8>) -> Result<String, PipelineError> {
        let wav = wrap_wav(&pcm, self.sample_rate);

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| PipelineError::Recognition(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Recognition(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Recognition(format!(
                "transcription endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Recognition(format!("malformed response: {}", e)))?;

        Ok(body["text"].as_str().unwrap_or("").trim().to_string())
    }

    /// Whether the silence gate says the current utterance is over.
    fn utterance_finished(&self) -> bool {
        self.in_speech
            && self.trailing_silence >= self.hangover_samples
            && self.pcm.len() / 2 >= self.min_utterance_samples
    }
}

#[async_trait]
impl Recognizer for RemoteRecognizer {
    async fn feed(&mut self, frame: &AudioFrame) -> Result<Vec<TranscriptEvent>, PipelineError> {
        let frame_samples = frame.sample_count() as usize;

        if frame.rms() >= self.silence_threshold {
            self.in_speech = true;
            self.trailing_silence = 0;
        } else if self.in_speech {
            self.trailing_silence += frame_samples;
        } else {
            // Leading silence: keep only a hangover's worth so the buffer
            // does not grow while nobody is talking.
            let keep = self.hangover_samples * 2;
            if self.pcm.len() > keep {
                self.pcm.drain(..self.pcm.len() - keep);
            }
        }

        self.pcm.extend_from_slice(&frame.pcm);

        if !self.utterance_finished() {
            return Ok(Vec::new());
        }

        let pcm = std::mem::take(&mut self.pcm);
        self.in_speech = false;
        self.trailing_silence = 0;

        debug!(samples = pcm.len() / 2, "Utterance finalized, transcribing");
        let text = self.transcribe(pcm).await?;
        if text.is_empty() {
            warn!("Transcription endpoint returned empty text");
            return Ok(Vec::new());
        }

        Ok(vec![TranscriptEvent::final_result(text)])
    }

    async fn reset(&mut self) {
        self.pcm.clear();
        self.in_speech = false;
        self.trailing_silence = 0;
    }

    async fn close(&mut self) {
        self.pcm.clear();
    }
}

/// Wrap raw PCM16 mono bytes in a minimal RIFF/WAVE header.
fn wrap_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let byte_rate = sample_rate * 2; // mono, 16-bit
    let mut wav = Vec::with_capacity(44 + pcm.len());

    wav.extend_from_slice(b"RIFF");
    let mut u32_buf = [0u8; 4];
    LittleEndian::write_u32(&mut u32_buf, 36 + pcm.len() as u32);
    wav.extend_from_slice(&u32_buf);
    wav.extend_from_slice(b"WAVEfmt ");
    LittleEndian::write_u32(&mut u32_buf, 16);
    wav.extend_from_slice(&u32_buf);

    let mut u16_buf = [0u8; 2];
    LittleEndian::write_u16(&mut u16_buf, 1); // PCM format
    wav.extend_from_slice(&u16_buf);
    LittleEndian::write_u16(&mut u16_buf, 1); // mono
    wav.extend_from_slice(&u16_buf);
    LittleEndian::write_u32(&mut u32_buf, sample_rate);
    wav.extend_from_slice(&u32_buf);
    LittleEndian::write_u32(&mut u32_buf, byte_rate);
    wav.extend_from_slice(&u32_buf);
    LittleEndian::write_u16(&mut u16_buf, 2); // block align
    wav.extend_from_slice(&u16_buf);
    LittleEndian::write_u16(&mut u16_buf, 16); // bits per sample
    wav.extend_from_slice(&u16_buf);

    wav.extend_from_slice(b"data");
    LittleEndian::write_u32(&mut u32_buf, pcm.len() as u32);
    wav.extend_from_slice(&u32_buf);
    wav.extend_from_slice(pcm);
    wav
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header_layout() {
        let pcm = vec![0u8; 320];
        let wav = wrap_wav(&pcm, 16000);
        assert_eq!(wav.len(), 44 + 320);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(LittleEndian::read_u32(&wav[24..28]), 16000);
        assert_eq!(LittleEndian::read_u32(&wav[40..44]), 320);
    }

    #[test]
    fn test_ms_to_samples() {
        assert_eq!(ms_to_samples(600, 16000), 9600);
        assert_eq!(ms_to_samples(300, 16000), 4800);
    }
}
