//! # ReShimmer: Shimmer Delay/Reverb as an AU/VST3/CLAP Plugin
//!
//! A delay line, two pitch-shifted voices and an algorithmic reverb in one
//! block-based signal path, built with
//! [nih-plug](https://github.com/robbert-vdh/nih-plug).
//!
//! ## Signal Flow
//!
//! ```text
//! Input ──┬───────────────────────────────────────────────── × (1 - mix) ───┐
//!         │                                                                 │
//!         ├──► [Pitch voice 1] ──► × w1 ──┐                                 │
//!         ├──► [Pitch voice 2] ──► × w2 ──┼──► wet bus ──► [Reverb] ── × mix ─(+)──► Output
//!         └──► × 0.8 ──► [Delay line] ────┘
//! ```
//!
//! The plugin struct here is only host glue: it owns the parameters,
//! translates the host's configuration into a `prepare()` call, and hands
//! each buffer to [`processor::ShimmerProcessor`]. All the DSP lives in
//! the modules below.

mod dsp;
mod error;
mod params;
mod processor;
mod reverb_send;
mod voices;

use std::num::NonZeroU32;
use std::sync::Arc;

use nih_plug::prelude::*;
use params::{ParameterSource, ShimmerParams};
use processor::{Routing, ShimmerProcessor};

/// Rough decay time of the reverb tail, used for the tail length reported
/// to the host.
const REVERB_TAIL_SECONDS: f32 = 5.0;

/// The main plugin struct.
///
/// Parameters (`ShimmerParams`) are shared with the host through an `Arc`
/// and can be written from any thread. The processor is owned by the audio
/// thread and only touched in `initialize()`, `reset()` and `process()`,
/// which the host never runs concurrently.
struct ReShimmer {
    params: Arc<ShimmerParams>,

    /// The complete signal path. Unprepared until `initialize()`.
    processor: ShimmerProcessor,

    /// Channels that carry input. Output channels past this are cleared
    /// every block.
    input_channels: usize,

    sample_rate: f32,
}

impl Default for ReShimmer {
    fn default() -> Self {
        Self {
            params: Arc::new(ShimmerParams::default()),
            processor: ShimmerProcessor::new(Routing::for_build()),
            // Placeholders until the host tells us the real configuration.
            input_channels: 2,
            sample_rate: 44100.0,
        }
    }
}

impl Plugin for ReShimmer {
    const NAME: &'static str = "ReShimmer";
    const VENDOR: &'static str = "Loveless Audio";
    const URL: &'static str = "";
    const EMAIL: &'static str = "steve.loveless@gmail.com";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    // The host picks the first layout that matches the track.
    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        // Stereo
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
        // Mono
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
        // Mono in, stereo out. The second output has no input behind it
        // and is cleared every block.
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(2),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;

    // Parameters are read once per block, so splitting blocks at automation
    // points buys nothing.
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    /// Allocate every buffer the signal path needs and report latency.
    ///
    /// Called on load and again whenever the sample rate, block size or
    /// channel layout changes. Returning `false` tells the host we can't
    /// run with this configuration.
    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        self.sample_rate = buffer_config.sample_rate;
        self.input_channels = audio_io_layout
            .main_input_channels
            .map(|c| c.get() as usize)
            .unwrap_or(0);
        let output_channels = audio_io_layout
            .main_output_channels
            .map(|c| c.get() as usize)
            .unwrap_or(self.input_channels);

        if let Err(err) = self.processor.prepare(
            output_channels,
            buffer_config.sample_rate,
            buffer_config.max_buffer_size as usize,
            self.params.as_ref(),
        ) {
            nih_error!("failed to prepare signal path: {}", err);
            return false;
        }

        // Fixed until the next initialize(), so the host can compensate
        // once.
        context.set_latency_samples(self.processor.latency_samples());

        true
    }

    /// Playback stopped or the transport jumped: drop all echoes, voice
    /// history and reverb tail.
    fn reset(&mut self) {
        self.processor.reset();
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        _context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let num_samples = buffer.samples();
        self.processor.process_block(
            buffer.as_slice(),
            self.input_channels,
            num_samples,
            self.params.as_ref(),
        );

        // A frozen reverb never decays, so keep being called.
        if self.params.freeze.value() && self.processor.routing().reverb {
            return ProcessStatus::KeepAlive;
        }

        let snapshot = self.params.snapshot().clamped();
        let mut tail = self.processor.latency_samples() as f32;
        if self.processor.routing().delay {
            tail += snapshot.delay_time_ms * self.sample_rate / 1000.0;
        }
        if self.processor.routing().reverb {
            tail += REVERB_TAIL_SECONDS * self.sample_rate;
        }

        ProcessStatus::Tail(tail as u32)
    }
}

impl ClapPlugin for ReShimmer {
    const CLAP_ID: &'static str = "com.loveless-audio.reshimmer";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Shimmer delay: pitch-shifted voices, echo and reverb");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Stereo,
        ClapFeature::Mono,
        ClapFeature::Delay,
        ClapFeature::PitchShifter,
        ClapFeature::Reverb,
    ];
}

impl Vst3Plugin for ReShimmer {
    // 16 ASCII bytes, unique to this plugin.
    const VST3_CLASS_ID: [u8; 16] = *b"ReShimmerFx_v001";

    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[
        Vst3SubCategory::Fx,
        Vst3SubCategory::Delay,
        Vst3SubCategory::PitchShift,
        Vst3SubCategory::Reverb,
    ];
}

nih_export_clap!(ReShimmer);
nih_export_vst3!(ReShimmer);

// AUv2 entry point for Logic Pro, wrapping the CLAP plugin.
clap_wrapper::export_auv2!();
