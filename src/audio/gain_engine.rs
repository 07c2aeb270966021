use crate::store::GainParamStore;
use nih_plug::util;
use std::sync::Arc;
use thiserror::Error;

/// `process_block` ran before `prepare`. This is a host-integration bug, not
/// a runtime condition, and the block is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("gain engine was not prepared before processing")]
pub struct NotPrepared;

enum EngineState {
    Unprepared,
    Prepared {
        /// Linear amplitude applied at the end of the previous block. The
        /// ramp start point whenever the parameter moves.
        previous_amplitude: f32,
    },
}

/// The per-block gain stage.
///
/// Reads the parameter store once per block, converts dB to linear
/// amplitude, and either applies a flat multiply (value unchanged since the
/// last block) or a linear amplitude ramp across the block so level changes
/// never click. Runs on the audio thread: no allocation, no locks.
pub struct GainEngine {
    store: Arc<GainParamStore>,
    state: EngineState,
}

impl GainEngine {
    pub fn new(store: Arc<GainParamStore>) -> Self {
        Self {
            store,
            state: EngineState::Unprepared,
        }
    }

    /// Seeds the ramp state from the current parameter value. Must run
    /// before the first [`process_block`](Self::process_block); running it
    /// again while prepared just re-seeds.
    pub fn prepare(&mut self, _sample_rate: f32, _max_block_size: usize) {
        self.state = EngineState::Prepared {
            previous_amplitude: util::db_to_gain(self.store.gain_db()),
        };
    }

    /// Re-seeds the ramp state, e.g. on transport resets. Does not allocate.
    pub fn reset(&mut self) {
        if let EngineState::Prepared { previous_amplitude } = &mut self.state {
            *previous_amplitude = util::db_to_gain(self.store.gain_db());
        }
    }

    /// Returns the engine to the unprepared state when the host deactivates
    /// the plugin.
    pub fn release(&mut self) {
        self.state = EngineState::Unprepared;
    }

    /// Applies the current gain to `channels` in place.
    ///
    /// Output channels beyond `num_input_channels` have no corresponding
    /// input and are cleared to silence. The parameter is read exactly once,
    /// so a write that lands mid-block takes effect on the next one.
    pub fn process_block(
        &mut self,
        channels: &mut [&mut [f32]],
        num_input_channels: usize,
    ) -> Result<(), NotPrepared> {
        let EngineState::Prepared { previous_amplitude } = &mut self.state else {
            return Err(NotPrepared);
        };

        let active_channels = num_input_channels.min(channels.len());
        for channel in channels[active_channels..].iter_mut() {
            channel.fill(0.0);
        }

        let current_amplitude = util::db_to_gain(self.store.gain_db());

        // Exact equality on the converted value gates the ramp: an idle
        // control costs one multiply per sample.
        if current_amplitude == *previous_amplitude {
            for channel in channels[..active_channels].iter_mut() {
                for sample in channel.iter_mut() {
                    *sample *= current_amplitude;
                }
            }
            return Ok(());
        }

        // Ramp linearly in amplitude: sample 0 carries the previous block's
        // amplitude, the last sample the new one. A single-sample block
        // degenerates to the new amplitude; an empty one still commits it.
        for channel in channels[..active_channels].iter_mut() {
            let num_samples = channel.len();
            if num_samples > 1 {
                let step = (current_amplitude - *previous_amplitude) / (num_samples - 1) as f32;
                for (index, sample) in channel.iter_mut().enumerate() {
                    *sample *= *previous_amplitude + step * index as f32;
                }
            } else if num_samples == 1 {
                channel[0] *= current_amplitude;
            }
        }
        *previous_amplitude = current_amplitude;

        Ok(())
    }
}
