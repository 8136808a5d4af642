//! Real audio devices through CPAL (Cross-Platform Audio Library).
//!
//! Capture prefers a mono f32 stream at the capture rate and falls back to
//! the device's native format with software downmix and resampling. Playback
//! drives a [`Mixer`] from the output callback.

use crate::audio::backend::{
    AudioBackend, CaptureContext, FrameSink, MicrophoneStream, PlaybackContext, SourceEndedNotifier,
    SourceId,
};
use crate::audio::mixer::Mixer;
use crate::audio::pcm::{downmix, pcm16_to_float, resample};
use crate::error::{ConciergeError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probing makes ALSA/JACK/PipeWire print harmless noise.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` on fd 2. Safe as long as no other thread is
/// concurrently manipulating it.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK/PipeWire/ALSA chatter during backend probing.
///
/// # Safety
/// Modifies environment variables; call at startup before any threads are spawned.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for desktop sound servers.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for a voice conversation.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "S/PDIF",
];

/// How long a freshly started input stream may stay silent before the
/// native-format fallback is tried.
const CALLBACK_PROBE: Duration = Duration::from_millis(200);

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

fn label_device(name: String) -> String {
    if is_preferred_device(&name) {
        format!("{} [recommended]", name)
    } else {
        name
    }
}

/// Usable input and output device names, preferred ones marked "\[recommended\]".
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Enumerate audio devices.
///
/// # Errors
/// Returns `ConciergeError::AudioCapture` if input enumeration fails and
/// `ConciergeError::AudioPlayback` if output enumeration fails.
pub fn list_devices() -> Result<DeviceList> {
    let (host, inputs, outputs) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let inputs = host.input_devices();
        let outputs = host.output_devices();
        (host, inputs, outputs)
    });
    let _host = host;

    let inputs = inputs.map_err(|e| ConciergeError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;
    let outputs = outputs.map_err(|e| ConciergeError::AudioPlayback {
        message: format!("Failed to enumerate output devices: {}", e),
    })?;

    Ok(DeviceList {
        inputs: device_names(inputs),
        outputs: device_names(outputs),
    })
}

fn device_names(devices: impl Iterator<Item = cpal::Device>) -> Vec<String> {
    devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(label_device)
        .collect()
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Find a device by exact name, or the best default (sound server first,
/// then the host default).
fn find_device(name: Option<&str>, direction: Direction) -> Result<cpal::Device> {
    let not_found = |device: &str| ConciergeError::AudioDeviceNotFound {
        device: device.to_string(),
    };

    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
        .map_err(|e| ConciergeError::AudioCapture {
            message: format!("Failed to enumerate devices: {}", e),
        })?;

        if let Some(name) = name {
            return devices
                .into_iter()
                .find(|dev| dev.name().is_ok_and(|n| n == name))
                .ok_or_else(|| not_found(name));
        }

        if let Some(device) = devices
            .into_iter()
            .find(|dev| dev.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
        .ok_or_else(|| not_found("default"))
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched from the thread that owns the session;
/// it is never shared, only moved along with its owner.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// CPAL-backed [`AudioBackend`].
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    /// `None` picks the best default device.
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture_context(&mut self, sample_rate: u32) -> Result<Box<dyn CaptureContext>> {
        Ok(Box::new(CpalCaptureContext {
            sample_rate,
            microphone: None,
            closed: false,
        }))
    }

    fn open_playback_context(
        &mut self,
        sample_rate: u32,
        notifier: SourceEndedNotifier,
    ) -> Result<Box<dyn PlaybackContext>> {
        let device = find_device(self.output_device.as_deref(), Direction::Output)?;
        let context = CpalPlaybackContext::open(device, sample_rate, notifier)?;
        Ok(Box::new(context))
    }

    fn request_microphone(&mut self) -> Result<Box<dyn MicrophoneStream>> {
        let device = find_device(self.input_device.as_deref(), Direction::Input)?;
        // Opening the device config is where access is granted or refused.
        let config = device
            .default_input_config()
            .map_err(|e| ConciergeError::PermissionDenied {
                message: format!("Microphone unavailable: {}", e),
            })?;
        let label = device.name().unwrap_or_else(|_| "unknown input".to_string());
        tracing::debug!(
            device = %label,
            channels = config.channels(),
            rate = config.sample_rate(),
            "microphone available"
        );
        Ok(Box::new(CpalMicrophone {
            device,
            label,
            stream: None,
        }))
    }
}

type SharedSink = Arc<Mutex<FrameSink>>;

fn deliver(sink: &SharedSink, samples: &[f32]) {
    if let Ok(mut sink) = sink.lock() {
        sink(samples);
    }
}

struct CpalMicrophone {
    device: cpal::Device,
    label: String,
    stream: Option<SendableStream>,
}

impl CpalMicrophone {
    /// Try mono f32 and mono i16 at the target rate.
    fn build_preferred(
        &self,
        sample_rate: u32,
        sink: &SharedSink,
        counter: &Arc<AtomicU64>,
    ) -> Option<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let err_callback = |err: cpal::StreamError| tracing::warn!("Audio input stream error: {}", err);

        let f32_sink = Arc::clone(sink);
        let f32_counter = Arc::clone(counter);
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                f32_counter.fetch_add(1, Ordering::Relaxed);
                deliver(&f32_sink, data);
            },
            err_callback,
            None,
        ) {
            return Some(stream);
        }

        let i16_sink = Arc::clone(sink);
        let i16_counter = Arc::clone(counter);
        self.device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    i16_counter.fetch_add(1, Ordering::Relaxed);
                    let samples: Vec<f32> = data.iter().map(|&s| pcm16_to_float(s)).collect();
                    deliver(&i16_sink, &samples);
                },
                err_callback,
                None,
            )
            .ok()
    }

    /// Capture at the device's native config, then downmix and resample.
    fn build_native(&self, sample_rate: u32, sink: &SharedSink) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| ConciergeError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let err_callback = |err: cpal::StreamError| tracing::warn!("Audio input stream error: {}", err);
        let sink = Arc::clone(sink);

        match default_config.sample_format() {
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix(data, native_channels);
                        deliver(&sink, &resample(&mono, native_rate, sample_rate));
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| ConciergeError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let floats: Vec<f32> = data.iter().map(|&s| pcm16_to_float(s)).collect();
                        let mono = downmix(&floats, native_channels);
                        deliver(&sink, &resample(&mono, native_rate, sample_rate));
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| ConciergeError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            fmt => Err(ConciergeError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try choosing another input device.",
                    fmt
                ),
            }),
        }
    }
}

impl MicrophoneStream for CpalMicrophone {
    fn label(&self) -> &str {
        &self.label
    }

    fn start(&mut self, sample_rate: u32, sink: FrameSink) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let counter = Arc::new(AtomicU64::new(0));

        let preferred = with_suppressed_stderr(|| self.build_preferred(sample_rate, &sink, &counter));
        let stream = match preferred {
            Some(stream) => {
                stream.play().map_err(|e| ConciergeError::AudioCapture {
                    message: format!("Failed to start audio stream: {}", e),
                })?;
                // Some PipeWire-ALSA setups accept non-native configs but never deliver data.
                std::thread::sleep(CALLBACK_PROBE);
                if counter.load(Ordering::Relaxed) == 0 {
                    drop(stream);
                    None
                } else {
                    Some(stream)
                }
            }
            None => None,
        };

        let stream = match stream {
            Some(stream) => stream,
            None => {
                let native = self.build_native(sample_rate, &sink)?;
                native.play().map_err(|e| ConciergeError::AudioCapture {
                    message: format!("Failed to start native audio stream: {}", e),
                })?;
                native
            }
        };

        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.0.pause()
        {
            tracing::debug!("Failed to pause input stream: {}", e);
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CpalCaptureContext {
    sample_rate: u32,
    microphone: Option<Box<dyn MicrophoneStream>>,
    closed: bool,
}

impl CaptureContext for CpalCaptureContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn attach(
        &mut self,
        mut microphone: Box<dyn MicrophoneStream>,
        sink: FrameSink,
    ) -> Result<()> {
        if self.closed {
            return Err(ConciergeError::AudioCapture {
                message: "capture context already closed".to_string(),
            });
        }
        microphone.start(self.sample_rate, sink)?;
        tracing::info!(device = microphone.label(), rate = self.sample_rate, "capturing");
        self.microphone = Some(microphone);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }
    }
}

fn lock_mixer(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Output device driven by a [`Mixer`] at the device's rate.
///
/// Sources arrive at the context rate and are resampled on the way in.
struct CpalPlaybackContext {
    sample_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<SendableStream>,
}

impl CpalPlaybackContext {
    fn open(device: cpal::Device, sample_rate: u32, notifier: SourceEndedNotifier) -> Result<Self> {
        use cpal::SampleFormat;

        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let err_callback = |err: cpal::StreamError| tracing::warn!("Audio output stream error: {}", err);

        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        let preferred_stream = with_suppressed_stderr(|| {
            device.build_output_stream(
                &preferred,
                mix_callback::<f32>(Arc::clone(&mixer), 1, notifier.clone()),
                err_callback,
                None,
            )
        });

        let (stream, mixer) = match preferred_stream {
            Ok(stream) => (stream, mixer),
            Err(_) => {
                let default_config =
                    device
                        .default_output_config()
                        .map_err(|e| ConciergeError::AudioPlayback {
                            message: format!("Failed to query default output config: {}", e),
                        })?;
                let native_rate = default_config.sample_rate();
                let channels = default_config.channels() as usize;
                let config: cpal::StreamConfig = default_config.clone().into();
                tracing::info!(
                    channels,
                    rate = native_rate,
                    format = ?default_config.sample_format(),
                    "using native output format"
                );

                let mixer = Arc::new(Mutex::new(Mixer::new(native_rate)));
                let stream = match default_config.sample_format() {
                    SampleFormat::F32 => device.build_output_stream(
                        &config,
                        mix_callback::<f32>(Arc::clone(&mixer), channels, notifier),
                        err_callback,
                        None,
                    ),
                    SampleFormat::I16 => device.build_output_stream(
                        &config,
                        mix_callback::<i16>(Arc::clone(&mixer), channels, notifier),
                        err_callback,
                        None,
                    ),
                    fmt => {
                        return Err(ConciergeError::AudioPlayback {
                            message: format!("Unsupported output sample format: {:?}", fmt),
                        });
                    }
                }
                .map_err(|e| ConciergeError::AudioPlayback {
                    message: format!("Failed to build output stream: {}", e),
                })?;
                (stream, mixer)
            }
        };

        stream.play().map_err(|e| ConciergeError::AudioPlayback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        Ok(Self {
            sample_rate,
            mixer,
            stream: Some(SendableStream(stream)),
        })
    }
}

/// Output sample conversion from the mixer's f32.
trait OutputSample: Copy + Send + 'static {
    fn from_f32(sample: f32) -> Self;
}

impl OutputSample for f32 {
    fn from_f32(sample: f32) -> Self {
        sample
    }
}

impl OutputSample for i16 {
    fn from_f32(sample: f32) -> Self {
        crate::audio::pcm::float_to_pcm16(sample)
    }
}

fn mix_callback<T: OutputSample + cpal::SizedSample>(
    mixer: Arc<Mutex<Mixer>>,
    channels: usize,
    notifier: SourceEndedNotifier,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let channels = channels.max(1);
    let mut mono = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        mono.resize(data.len() / channels, 0.0);
        let ended = lock_mixer(&mixer).render(&mut mono);
        for (frame, &sample) in data.chunks_exact_mut(channels).zip(mono.iter()) {
            frame.fill(T::from_f32(sample));
        }
        for source in ended {
            notifier.notify(source);
        }
    }
}

impl PlaybackContext for CpalPlaybackContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        lock_mixer(&self.mixer).current_time()
    }

    fn start_source(&mut self, samples: Vec<f32>, start_time: f64) -> Result<SourceId> {
        if self.stream.is_none() {
            return Err(ConciergeError::AudioPlayback {
                message: "output stream closed".to_string(),
            });
        }
        let mut mixer = lock_mixer(&self.mixer);
        let device_rate = mixer.sample_rate();
        let samples = if device_rate == self.sample_rate {
            samples
        } else {
            let duration = samples.len() as f64 / self.sample_rate as f64;
            let mut resampled = resample(&samples, self.sample_rate, device_rate);
            let fill = resampled.last().copied().unwrap_or(0.0);
            resampled.resize(mixer.span_frames(start_time, duration), fill);
            resampled
        };
        Ok(mixer.add(samples, start_time))
    }

    fn stop_source(&mut self, source: SourceId) {
        lock_mixer(&self.mixer).stop(source);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.0.pause() {
                tracing::debug!("Failed to pause output stream: {}", e);
            }
            lock_mixer(&self.mixer).clear();
        }
    }
}

impl Drop for CpalPlaybackContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("HDA Intel PCH Headphones"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_label_device_marks_recommended() {
        assert_eq!(label_device("pulse".to_string()), "pulse [recommended]");
        assert_eq!(label_device("hw:1,0".to_string()), "hw:1,0");
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices_finds_outputs() {
        let devices = list_devices().unwrap();
        assert!(!devices.outputs.is_empty());
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_playback_clock_advances() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut backend = CpalBackend::default();
        let context = backend
            .open_playback_context(24000, SourceEndedNotifier::new(1, tx))
            .unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(context.current_time() > 0.0);
    }
}
