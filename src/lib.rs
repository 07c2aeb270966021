pub mod audio;
pub mod store;

use audio::GainEngine;
use nih_plug::prelude::*;
use std::sync::Arc;
use store::{GainParamStore, GAIN_DEFAULT_DB, GAIN_MAX_DB, GAIN_MIN_DB, GAIN_NAME};

pub struct GainFader {
    params: Arc<GainFaderParams>,
    engine: GainEngine,
}

#[derive(Params)]
pub struct GainFaderParams {
    /// The host-automatable gain in decibels. The change callback writes
    /// through the parameter store, so host automation and a bound control
    /// surface feed the audio engine through a single source of truth.
    #[id = "gain"]
    pub gain: FloatParam,

    /// The `savedParams` tree rides the host's save/restore blob.
    #[persist = "savedParams"]
    store: Arc<GainParamStore>,
}

impl GainFaderParams {
    fn new(store: Arc<GainParamStore>) -> Self {
        let param_store = store.clone();
        Self {
            // The parameter is stored in decibels, like the fader it models.
            // The engine converts to linear amplitude once per block.
            gain: FloatParam::new(
                GAIN_NAME,
                GAIN_DEFAULT_DB,
                FloatRange::Linear {
                    min: GAIN_MIN_DB,
                    max: GAIN_MAX_DB,
                },
            )
            .with_unit(" dB")
            .with_step_size(0.1)
            // No framework smoother: click-free transitions are the gain
            // engine's block ramp, and two smoothing stages would fight.
            .with_callback(Arc::new(move |db| param_store.set(db))),
            store,
        }
    }
}

impl Default for GainFader {
    fn default() -> Self {
        let store = Arc::new(GainParamStore::default());
        Self {
            params: Arc::new(GainFaderParams::new(store.clone())),
            engine: GainEngine::new(store),
        }
    }
}

impl Plugin for GainFader {
    const NAME: &'static str = "Gain Fader";
    const VENDOR: &'static str = "Cmdv";
    const URL: &'static str = env!("CARGO_PKG_HOMEPAGE");
    const EMAIL: &'static str = "info@cmdv.me";

    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    // Mono in to mono out or stereo in to stereo out; any other layout the
    // host asks for is rejected. The stereo layout comes first and is the
    // default.
    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),

            aux_input_ports: &[],
            aux_output_ports: &[],

            names: PortNames::const_default(),
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),

            aux_input_ports: &[],
            aux_output_ports: &[],

            names: PortNames::const_default(),
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const MIDI_OUTPUT: MidiConfig = MidiConfig::None;

    // The smoothing contract is one ramp per host block between consecutive
    // parameter readings; splitting blocks at every automation point would
    // collapse those ramps into steps.
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        _audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        nih_plug::nih_log!(
            "initialize: sample rate {}, max block size {}",
            buffer_config.sample_rate,
            buffer_config.max_buffer_size
        );

        self.engine.prepare(
            buffer_config.sample_rate,
            buffer_config.max_buffer_size as usize,
        );
        true
    }

    fn reset(&mut self) {
        // Runs on the audio thread; re-seeding the ramp state does not
        // allocate.
        self.engine.reset();
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        _context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let num_channels = buffer.channels();
        match self.engine.process_block(buffer.as_slice(), num_channels) {
            Ok(()) => ProcessStatus::Normal,
            Err(_) => {
                nih_plug::nih_debug_assert_failure!("process() called before initialize()");
                ProcessStatus::Error("gain engine was not prepared")
            }
        }
    }

    fn deactivate(&mut self) {
        self.engine.release();
    }
}

impl ClapPlugin for GainFader {
    const CLAP_ID: &'static str = "me.cmdv.gain-fader";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("A gain fader with click-free level changes");
    const CLAP_MANUAL_URL: Option<&'static str> = Some(Self::URL);
    const CLAP_SUPPORT_URL: Option<&'static str> = None;

    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Utility,
        ClapFeature::Mono,
        ClapFeature::Stereo,
    ];
}

impl Vst3Plugin for GainFader {
    const VST3_CLASS_ID: [u8; 16] = *b"GainFaderCmdv001";

    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Fx, Vst3SubCategory::Tools];
}

nih_export_clap!(GainFader);
nih_export_vst3!(GainFader);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_defaults_match_the_store() {
        let plugin = GainFader::default();
        assert_eq!(plugin.params.gain.value(), GAIN_DEFAULT_DB);
        assert_eq!(plugin.params.store.gain_db(), GAIN_DEFAULT_DB);
    }

    #[test]
    fn gain_param_uses_the_shared_id() {
        let plugin = GainFader::default();
        assert_eq!(plugin.params.gain.name(), GAIN_NAME);
    }
}
