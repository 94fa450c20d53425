// Device audio normalization: interleaved multi-channel input at the device
// rate becomes mono at the session rate.

/// Average interleaved channels down to mono
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    let channels = usize::from(channels);
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming linear resampler
///
/// Keeps the fractional read position and the last input sample between
/// calls so consecutive device buffers join without clicks.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Read position relative to the start of the next input block
    position: f64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    /// Resample one block of mono input
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        let step = f64::from(self.from_rate) / f64::from(self.to_rate);

        // Index -1 refers to the previous block's last sample
        let sample_at = |i: isize, last: Option<f32>| -> f32 {
            if i < 0 {
                last.unwrap_or(input[0])
            } else {
                input[i as usize]
            }
        };

        let mut output = Vec::with_capacity((input.len() as f64 / step).ceil() as usize + 1);
        let mut pos = self.position;
        let last_index = input.len() as f64 - 1.0;

        while pos <= last_index {
            let base = pos.floor();
            let frac = (pos - base) as f32;
            let i = base as isize;
            let a = sample_at(i, self.last);
            let b = if (i + 1) as f64 <= last_index {
                input[(i + 1) as usize]
            } else {
                a
            };
            output.push(a + (b - a) * frac);
            pos += step;
        }

        self.position = pos - input.len() as f64;
        self.last = input.last().copied();

        output
    }

    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }
}
