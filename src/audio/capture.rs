use crate::audio::{AudioBuffer, AudioSource, SourceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    mpsc, Arc, Mutex,
};
use std::thread;
use tracing::{error, info, warn};

const RMS_BOOST: f32 = 2.5;
/// Below this peak level a take is reported as probably silent.
const SILENCE_LEVEL: f32 = 0.02;

/// The cpal stream is owned by a dedicated thread for its whole life, so the
/// source itself stays `Send` and can live inside the session controller.
struct CaptureWorker {
    stop_tx: mpsc::Sender<()>,
    join: thread::JoinHandle<()>,
}

pub struct MicrophoneSource {
    worker: Option<CaptureWorker>,
    buffer: Arc<Mutex<AudioBuffer>>,
    peak: Arc<AtomicU32>,
    selected_input_device: Option<String>,
}

impl MicrophoneSource {
    pub fn new(selected_input_device: Option<String>) -> Self {
        let mut source = Self {
            worker: None,
            buffer: Arc::new(Mutex::new(AudioBuffer::new(16000, 1))),
            peak: Arc::new(AtomicU32::new(0.0f32.to_bits())),
            selected_input_device: None,
        };
        source.set_selected_input_device(selected_input_device);
        source
    }

    pub fn selected_input_device(&self) -> Option<String> {
        self.selected_input_device.clone()
    }

    pub fn set_selected_input_device(&mut self, name: Option<String>) {
        self.selected_input_device = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
    }
}

impl AudioSource for MicrophoneSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.worker.is_some() {
            return Err(SourceError::AlreadyRecording);
        }

        if let Ok(mut guard) = self.buffer.lock() {
            guard.clear();
        }
        self.peak.store(0.0f32.to_bits(), Ordering::Relaxed);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SourceError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let buffer = self.buffer.clone();
        let peak = self.peak.clone();
        let preferred = self.selected_input_device.clone();

        let join = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(preferred.as_deref(), &buffer, &peak) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Returns on an explicit stop or when the source is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| SourceError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { stop_tx, join });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(SourceError::DeviceUnavailable(
                    "capture thread exited before the stream opened".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) -> Result<AudioBuffer, SourceError> {
        let worker = self.worker.take().ok_or(SourceError::NotRecording)?;

        let _ = worker.stop_tx.send(());
        worker
            .join
            .join()
            .map_err(|_| SourceError::Stream("capture thread panicked".to_string()))?;
        let peak = f32::from_bits(self.peak.swap(0.0f32.to_bits(), Ordering::Relaxed));
        if peak < SILENCE_LEVEL {
            warn!("Take on '{}' looks silent (peak level {:.3})", self.name(), peak);
        }

        let mut guard = self.buffer.lock().map_err(|e| SourceError::Stream(e.to_string()))?;
        let mut out = guard.clone();
        guard.clear();
        out.update_duration();
        Ok(out)
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        self.selected_input_device
            .as_deref()
            .unwrap_or("default microphone")
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.join();
        }
    }
}

pub fn list_input_devices() -> Result<Vec<String>, SourceError> {
    let host = cpal::default_host();
    let mut devices = host
        .input_devices()
        .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))?
        .map(|device| device_display_name(&device))
        .collect::<Vec<_>>();
    devices.sort();
    devices.dedup();
    Ok(devices)
}

fn open_stream(
    preferred: Option<&str>,
    buffer: &Arc<Mutex<AudioBuffer>>,
    peak: &Arc<AtomicU32>,
) -> Result<cpal::Stream, SourceError> {
    let host = cpal::default_host();
    let device = pick_input_device(&host, preferred)
        .ok_or_else(|| SourceError::DeviceUnavailable("No input device available".to_string()))?;

    let device_name = device_display_name(&device);
    info!("Input device: {}", device_name);

    let config = device
        .default_input_config()
        .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))?;
    if let Ok(mut guard) = buffer.lock() {
        guard.sample_rate = config.sample_rate();
        guard.channels = config.channels();
        guard.clear();
    }

    let buffer_clone = buffer.clone();
    let peak_clone = peak.clone();
    let err_fn = |err| error!("an error occurred on stream: {}", err);

    // Permission denials surface here on most hosts.
    let stream = match config.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &_| write_input_data(data, &buffer_clone, &peak_clone),
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &_| write_input_data_f32(data, &buffer_clone, &peak_clone),
            err_fn,
            None,
        ),
        other => {
            return Err(SourceError::DeviceUnavailable(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))?;
    Ok(stream)
}

fn pick_input_device(host: &cpal::Host, preferred_name: Option<&str>) -> Option<cpal::Device> {
    if let Some(name) = preferred_name {
        if let Ok(mut devices) = host.input_devices() {
            if let Some(device) = devices.find(|d| device_display_name(d) == name) {
                return Some(device);
            }
        }
        tracing::warn!(
            "Preferred input device '{}' not found, falling back to default",
            name
        );
    }
    let default_device = host.default_input_device()?;

    let default_name = device_display_name(&default_device);
    if !looks_like_loopback(&default_name) {
        return Some(default_device);
    }

    tracing::warn!(
        "Default device '{}' looks like loopback, trying to pick a microphone input",
        default_name
    );

    if let Ok(mut devices) = host.input_devices() {
        if let Some(alternative) = devices.find(|d| !looks_like_loopback(&device_display_name(d))) {
            return Some(alternative);
        }
    }

    Some(default_device)
}

fn device_display_name(device: &cpal::Device) -> String {
    device
        .name()
        .or_else(|_| device.description().map(|d| d.name().to_string()))
        .unwrap_or_else(|_| "Unknown input".to_string())
}

fn looks_like_loopback(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    let patterns = [
        "stereo mix",
        "what u hear",
        "wave out",
        "loopback",
        "monitor",
    ];
    patterns.iter().any(|p| lower.contains(p))
}

fn write_input_data(input: &[i16], buffer: &Arc<Mutex<AudioBuffer>>, peak: &Arc<AtomicU32>) {
    if let Ok(mut guard) = buffer.lock() {
        guard.append(input);
    }
    raise_peak(peak, rms_i16(input));
}

fn write_input_data_f32(input: &[f32], buffer: &Arc<Mutex<AudioBuffer>>, peak: &Arc<AtomicU32>) {
    raise_peak(peak, rms_f32(input));

    let samples: Vec<i16> = input
        .iter()
        .map(|&x| (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();
    if let Ok(mut guard) = buffer.lock() {
        guard.append(&samples);
    }
}

/// Keeps the loudest chunk level seen during the take.
fn raise_peak(peak: &AtomicU32, rms: f32) {
    let normalized = (rms * RMS_BOOST).clamp(0.0, 1.0);
    let _ = peak.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        (normalized > f32::from_bits(bits)).then(|| normalized.to_bits())
    });
}

fn rms_i16(input: &[i16]) -> f32 {
    if input.is_empty() {
        return 0.0;
    }
    let sum: f32 = input
        .iter()
        .map(|&s| {
            let v = s as f32 / i16::MAX as f32;
            v * v
        })
        .sum();
    (sum / input.len() as f32).sqrt()
}

fn rms_f32(input: &[f32]) -> f32 {
    if input.is_empty() {
        return 0.0;
    }
    let sum: f32 = input.iter().map(|&s| s * s).sum();
    (sum / input.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_names_are_detected() {
        assert!(looks_like_loopback("Stereo Mix (Realtek Audio)"));
        assert!(looks_like_loopback("Monitor of Built-in Audio"));
        assert!(!looks_like_loopback("USB Microphone"));
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_i16(&[0; 64]), 0.0);
        assert_eq!(rms_f32(&[]), 0.0);
        assert!((rms_f32(&[0.5; 16]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn peak_only_rises() {
        let peak = AtomicU32::new(0.0f32.to_bits());
        raise_peak(&peak, 0.2);
        raise_peak(&peak, 0.1);
        assert!((f32::from_bits(peak.load(Ordering::Relaxed)) - 0.5).abs() < 1e-6);
        raise_peak(&peak, 1.0);
        assert_eq!(f32::from_bits(peak.load(Ordering::Relaxed)), 1.0);
    }

    #[test]
    fn stop_without_start_is_rejected() {
        let mut source = MicrophoneSource::new(Some("  ".to_string()));
        assert!(source.selected_input_device().is_none());
        assert!(matches!(source.stop(), Err(SourceError::NotRecording)));
    }
}
