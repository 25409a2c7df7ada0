//! # Audio Frames
//!
//! A frame is a fixed-endianness block of signed 16-bit PCM samples at a
//! declared sample rate. Frames are opaque to the orchestrator except for
//! their length and sequencing; within one direction of one session they are
//! strictly ordered and never reordered.

use byteorder::{ByteOrder, LittleEndian};

/// One block of little-endian PCM16 audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw little-endian PCM16 bytes
    pub pcm: Vec<u8>,
    /// Sample rate this frame was captured/produced at (Hz)
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Wrap raw PCM16 bytes into a frame.
    ///
    /// Returns an error for empty data or an odd byte count, which would
    /// split a 16-bit sample across frames.
    pub fn from_pcm(pcm: Vec<u8>, sample_rate: u32) -> Result<Self, String> {
        if pcm.is_empty() {
            return Err("No audio data provided".to_string());
        }
        if pcm.len() % 2 != 0 {
            return Err("Audio data length must be even for 16-bit samples".to_string());
        }
        Ok(Self { pcm, sample_rate })
    }

    /// Number of samples in this frame.
    pub fn sample_count(&self) -> u64 {
        (self.pcm.len() / 2) as u64
    }

    /// Decode the frame into i16 samples (little-endian).
    pub fn samples(&self) -> Vec<i16> {
        let mut samples = vec![0i16; self.pcm.len() / 2];
        LittleEndian::read_i16_into(&self.pcm, &mut samples);
        samples
    }

    /// Root-mean-square amplitude of the frame, in raw i16 units.
    ///
    /// Used by the silence gate in the remote recognizer to detect the end
    /// of an utterance.
    pub fn rms(&self) -> f32 {
        let samples = self.samples();
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_sq / samples.len() as f64).sqrt() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pcm_rejects_odd_length() {
        assert!(AudioFrame::from_pcm(vec![0u8; 3], 16000).is_err());
        assert!(AudioFrame::from_pcm(vec![], 16000).is_err());
        assert!(AudioFrame::from_pcm(vec![0u8; 4], 16000).is_ok());
    }

    #[test]
    fn test_sample_count() {
        let frame = AudioFrame::from_pcm(vec![0u8; 320], 16000).unwrap();
        assert_eq!(frame.sample_count(), 160);
    }

    #[test]
    fn test_sample_decoding_little_endian() {
        // 0x0100 = 256, 0xFFFF = -1
        let frame = AudioFrame::from_pcm(vec![0x00, 0x01, 0xFF, 0xFF], 16000).unwrap();
        assert_eq!(frame.samples(), vec![256, -1]);
    }

    #[test]
    fn test_rms_of_silence_is_zero() {
        let frame = AudioFrame::from_pcm(vec![0u8; 64], 16000).unwrap();
        assert_eq!(frame.rms(), 0.0);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let mut pcm = vec![0u8; 8];
        LittleEndian::write_i16_into(&[1000, 1000, 1000, 1000], &mut pcm);
        let frame = AudioFrame::from_pcm(pcm, 16000).unwrap();
        assert!((frame.rms() - 1000.0).abs() < 0.01);
    }
}
