use std::io::Cursor;

use async_trait::async_trait;

use super::{GenerationError, GenerationService};

/// Local stand-in model: renders a short melodic sine phrase whose notes are
/// picked from the prompt, one second per `tokens_per_second` tokens.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    pub sample_rate: u32,
    pub tokens_per_second: u32,
    pub amplitude: f32,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self {
            sample_rate: 32_000,
            tokens_per_second: 50,
            amplitude: 0.3,
        }
    }
}

// A pentatonic scale starting at A3, in Hz.
const SCALE: [f32; 5] = [220.0, 246.94, 277.18, 329.63, 369.99];
const NOTE_SECS: f32 = 0.5;

impl ToneSynthesizer {
    /// Render synchronously.
    pub fn render(&self, prompt: &str, token_budget: u32) -> Result<Vec<u8>, GenerationError> {
        if token_budget == 0 || self.tokens_per_second == 0 {
            return Err(GenerationError::EmptyOutput);
        }
        let seconds = token_budget as f32 / self.tokens_per_second as f32;
        let total = (seconds * self.sample_rate as f32).round() as usize;
        if total == 0 {
            return Err(GenerationError::EmptyOutput);
        }

        let notes = melody(prompt);
        let per_note = ((NOTE_SECS * self.sample_rate as f32) as usize).max(1);
        let fade = (self.sample_rate as usize / 100).max(1);

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(total * 2 + 44));
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| GenerationError::Inference(e.to_string()))?;

        for n in 0..total {
            let freq = notes[(n / per_note) % notes.len()];
            let t = n as f32 / self.sample_rate as f32;
            // Short ramps at both ends avoid clicks.
            let envelope = (n.min(total - 1 - n) as f32 / fade as f32).min(1.0);
            let value = (t * freq * core::f32::consts::TAU).sin() * self.amplitude * envelope;
            writer
                .write_sample((value * i16::MAX as f32) as i16)
                .map_err(|e| GenerationError::Inference(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| GenerationError::Inference(e.to_string()))?;

        Ok(cursor.into_inner())
    }
}

fn melody(prompt: &str) -> Vec<f32> {
    let notes: Vec<f32> = prompt
        .bytes()
        .filter(u8::is_ascii_alphanumeric)
        .map(|b| SCALE[b as usize % SCALE.len()])
        .take(16)
        .collect();
    if notes.is_empty() {
        vec![SCALE[0]]
    } else {
        notes
    }
}

#[async_trait]
impl GenerationService for ToneSynthesizer {
    async fn generate(&self, prompt: &str, token_budget: u32) -> Result<Vec<u8>, GenerationError> {
        let synth = self.clone();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || synth.render(&prompt, token_budget))
            .await
            .map_err(|e| GenerationError::Inference(format!("synthesis task aborted: {e}")))?
    }
}
