use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};

use crate::error::DeviceError;
use crate::join::join_timeout;
use crate::{AudioConfig, Chunk};

/// How long `stop` waits for the capture thread to release the device.
const CAPTURE_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Receives every captured frame. Runs on the capture context, so it must
/// never block.
pub type FrameSink = Box<dyn FnMut(Chunk) + Send + 'static>;

/// AudioSource produces fixed-size frames of mono f32 samples.
pub trait AudioSource: Send {
    /// Begin capture without blocking the caller. Fails without leaving
    /// anything running if the device cannot be opened.
    fn start(&mut self, on_frame: FrameSink) -> Result<(), DeviceError>;

    /// Halt capture and release the device. Safe to call repeatedly.
    fn stop(&mut self);
}

/// List the names of the available input devices.
pub fn list_input_devices() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::DeviceConfig(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Sampler captures from a microphone through cpal.
///
/// cpal streams cannot move between threads, so the stream is opened, run and
/// dropped on a dedicated capture thread which reports back whether the
/// device opened before `start` returns.
pub struct Sampler {
    config: AudioConfig,
    stop_tx: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Sampler {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }

    fn mainloop(
        config: AudioConfig,
        on_frame: FrameSink,
        ready: SyncSender<Result<(), DeviceError>>,
        stop: Receiver<()>,
    ) {
        let stream = match open_stream(&config, on_frame) {
            Ok(stream) => stream,
            Err(e) => {
                ready.send(Err(e)).ok();
                return;
            }
        };
        ready.send(Ok(())).ok();

        // Either an explicit stop or the sender being dropped ends capture.
        stop.recv().ok();

        if let Err(e) = stream.pause() {
            log::warn!("failed to pause audio stream: {}", e);
        }
        drop(stream);
        log::debug!("audio stream closed");
    }
}

impl AudioSource for Sampler {
    fn start(&mut self, on_frame: FrameSink) -> Result<(), DeviceError> {
        self.stop();

        let (ready_tx, ready_rx) = sync_channel(1);
        let (stop_tx, stop_rx) = channel();
        let config = self.config.clone();

        let thread = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || Sampler::mainloop(config, on_frame, ready_tx, stop_rx))
            .map_err(|e| DeviceError::CaptureThread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                thread.join().ok();
                Err(e)
            }
            Err(_) => {
                thread.join().ok();
                Err(DeviceError::CaptureThread(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            tx.send(()).ok();
        }
        if let Some(hnd) = self.thread.take() {
            match join_timeout(hnd, CAPTURE_STOP_TIMEOUT) {
                Some(Ok(())) => log::info!("audio capture stopped"),
                Some(Err(_)) => log::warn!("audio capture thread panicked"),
                None => log::warn!(
                    "audio capture thread did not stop within {:?}, detaching it",
                    CAPTURE_STOP_TIMEOUT
                ),
            }
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(config: &AudioConfig, on_frame: FrameSink) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = match config.device.as_deref() {
        Some(name) => host
            .input_devices()
            .map_err(|e| DeviceError::DeviceConfig(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?,
        None => host
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice)?,
    };
    let device_name = device
        .name()
        .unwrap_or_else(|_| "unknown input device".to_string());

    // Prefer native f32 and the fewest channels that can run at our rate.
    let rate = cpal::SampleRate(config.sample_rate);
    let supported = device
        .supported_input_configs()
        .map_err(|e| DeviceError::DeviceConfig(e.to_string()))?
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .min_by_key(|c| (c.sample_format() != SampleFormat::F32, c.channels()))
        .ok_or_else(|| {
            DeviceError::UnsupportedConfig(format!(
                "f32/i16 input at {} Hz on '{}'",
                config.sample_rate, device_name
            ))
        })?;

    let format = supported.sample_format();
    let channels = usize::from(supported.channels().max(1));
    let stream_config: StreamConfig = supported.with_sample_rate(rate).into();
    log::info!(
        "opening '{}': {:?} {} Hz, {} channel(s), {} samples per frame",
        device_name,
        format,
        config.sample_rate,
        channels,
        config.chunk_size
    );

    let assembler = FrameAssembler::new(config.chunk_size, channels, on_frame);
    let stream = match format {
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, assembler)?,
        _ => build_stream::<f32>(&device, &stream_config, assembler)?,
    };

    stream
        .play()
        .map_err(|e| DeviceError::StreamStart(e.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut assembler: FrameAssembler,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().map(|s| f32::from_sample_(*s)));
            },
            |err| log::error!("audio stream error: {}", err),
            None,
        )
        .map_err(|e| DeviceError::StreamBuild(e.to_string()))
}

/// FrameAssembler downmixes interleaved device samples to mono and re-chunks
/// them into frames of exactly `chunk_size` samples.
pub(crate) struct FrameAssembler {
    chunk_size: usize,
    channels: usize,
    pending: Vec<f32>,
    partial: (f32, usize),
    next_id: u64,
    sink: FrameSink,
}

impl FrameAssembler {
    pub(crate) fn new(chunk_size: usize, channels: usize, sink: FrameSink) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            channels: channels.max(1),
            pending: Vec::with_capacity(chunk_size * 2),
            partial: (0.0, 0),
            next_id: 0,
            sink,
        }
    }

    pub(crate) fn push<I: Iterator<Item = f32>>(&mut self, samples: I) {
        if self.channels == 1 {
            self.pending.extend(samples);
        } else {
            // Average each interleaved frame. A device buffer may end mid-frame,
            // so the running sum carries over to the next call.
            for s in samples {
                self.partial.0 += s;
                self.partial.1 += 1;
                if self.partial.1 == self.channels {
                    self.pending.push(self.partial.0 / self.channels as f32);
                    self.partial = (0.0, 0);
                }
            }
        }

        // Emit output chunks while we have enough samples buffered
        while self.pending.len() >= self.chunk_size {
            let samples: Box<[f32]> = self.pending.drain(..self.chunk_size).collect();
            let chunk = Chunk {
                id: self.next_id,
                samples,
            };
            self.next_id += 1;
            (self.sink)(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collecting_sink() -> (FrameSink, Arc<Mutex<Vec<Chunk>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let out2 = out.clone();
        (Box::new(move |c: Chunk| out2.lock().unwrap().push(c)), out)
    }

    #[test]
    fn rechunks_uneven_device_buffers() {
        let (sink, out) = collecting_sink();
        let mut asm = FrameAssembler::new(4, 1, sink);
        asm.push((0..3).map(|x| x as f32));
        assert!(out.lock().unwrap().is_empty());
        asm.push((3..10).map(|x| x as f32));

        let chunks = out.lock().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, 0);
        assert_eq!(&*chunks[0].samples, &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(chunks[1].id, 1);
        assert_eq!(&*chunks[1].samples, &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn downmixes_across_buffer_boundaries() {
        let (sink, out) = collecting_sink();
        let mut asm = FrameAssembler::new(2, 2, sink);
        asm.push([1.0, 3.0, 0.5].into_iter());
        asm.push([0.5, -1.0, -1.0].into_iter());

        let chunks = out.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&*chunks[0].samples, &[2.0, 0.5]);
        drop(chunks);

        asm.push([0.0, 0.0].into_iter());
        let chunks = out.lock().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(&*chunks[1].samples, &[-1.0, 0.0]);
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let mut sampler = Sampler::new(AudioConfig::default());
        sampler.stop();
        sampler.stop();
    }

    #[test]
    fn stop_gives_up_on_a_hung_capture_thread() {
        let (stop_tx, stop_rx) = channel::<()>();
        let hung = thread::spawn(move || {
            // Ignores the stop request, like a driver stuck in a blocking call.
            let _stop_rx = stop_rx;
            thread::sleep(CAPTURE_STOP_TIMEOUT * 3);
        });
        let mut sampler = Sampler::new(AudioConfig::default());
        sampler.stop_tx = Some(stop_tx);
        sampler.thread = Some(hung);

        let started = std::time::Instant::now();
        sampler.stop();
        let elapsed = started.elapsed();
        assert!(elapsed >= CAPTURE_STOP_TIMEOUT);
        assert!(elapsed < CAPTURE_STOP_TIMEOUT * 2, "took {:?}", elapsed);
        assert!(sampler.thread.is_none());
    }
}
