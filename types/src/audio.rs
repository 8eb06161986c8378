mod turn_detection;
mod transcription;
mod consts;

pub use turn_detection::{TurnDetection, ServerVadTurnDetection};
pub use transcription::InputAudioTranscription;
pub use consts::*;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Sample rate of every PCM16 stream exchanged with the Realtime API.
pub const PCM16_SAMPLE_RATE: u32 = 24_000;

/// Converts a sample count at [`PCM16_SAMPLE_RATE`] into whole milliseconds.
pub fn samples_to_ms(samples: usize) -> i32 {
    ((samples as u64 * 1000) / PCM16_SAMPLE_RATE as u64) as i32
}

/// Converts milliseconds into a sample count at [`PCM16_SAMPLE_RATE`].
pub fn ms_to_samples(ms: i32) -> usize {
    (ms.max(0) as u64 * PCM16_SAMPLE_RATE as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_offsets_round_down_to_milliseconds() {
        assert_eq!(samples_to_ms(24_000), 1000);
        assert_eq!(samples_to_ms(23), 0);
        assert_eq!(samples_to_ms(36_023), 1500);
        assert_eq!(ms_to_samples(1500), 36_000);
        assert_eq!(ms_to_samples(-5), 0);
    }
}
