//! CPAL-based capture backend for desktop platforms (Linux, macOS, Windows)
//!
//! `cpal::Stream` is not `Send`, so each session owns a dedicated capture
//! thread that builds, plays and finally drops the stream. The input
//! callback downmixes to the first channel and pushes samples into an
//! `rtrb` SPSC ring; the analyser drains that ring on every read and keeps
//! the newest `fft_size` samples.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use futures::future::BoxFuture;
use rtrb::{Consumer, Producer, RingBuffer};
use tokio::sync::oneshot;

use crate::error::{log_capture_error, CaptureError};

use super::{AnalyserNode, CaptureBackend, CaptureSession};

/// Samples buffered between the audio callback and the analyser
const TRANSFER_CAPACITY: usize = 1 << 16;

/// CPAL input backend reading the default input device
pub struct CpalCaptureBackend {
    fft_size: usize,
}

impl CpalCaptureBackend {
    pub fn new(fft_size: usize) -> Self {
        Self {
            fft_size: fft_size.max(1),
        }
    }
}

impl CaptureBackend for CpalCaptureBackend {
    fn open(&self) -> BoxFuture<'static, Result<Box<dyn CaptureSession>, CaptureError>> {
        let fft_size = self.fft_size;
        Box::pin(async move {
            let (producer, consumer) = RingBuffer::<f32>::new(TRANSFER_CAPACITY);
            let overruns = Arc::new(AtomicU64::new(0));
            let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, CaptureError>>();
            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            let (done_tx, done_rx) = oneshot::channel::<()>();

            let thread_overruns = Arc::clone(&overruns);
            thread::Builder::new()
                .name("noise-capture".to_string())
                .spawn(move || {
                    let stream = match open_default_input(producer, thread_overruns) {
                        Ok((stream, sample_rate)) => match stream.play() {
                            Ok(()) => {
                                let _ = ready_tx.send(Ok(sample_rate));
                                stream
                            }
                            Err(err) => {
                                let _ = ready_tx.send(Err(classify_error(format!("{:?}", err))));
                                return;
                            }
                        },
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };

                    // Park until the session is closed or dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    let _ = done_tx.send(());
                })
                .map_err(|err| CaptureError::StreamOpenFailed {
                    reason: format!("failed to spawn capture thread: {}", err),
                })?;

            let sample_rate = ready_rx.await.map_err(|_| CaptureError::StreamFailure {
                reason: "capture thread exited before the stream started".to_string(),
            })??;

            log::info!(
                "[CpalCapture] Input stream started @ {} Hz, fft_size={}",
                sample_rate,
                fft_size
            );

            Ok(Box::new(CpalCaptureSession {
                analyser: Arc::new(CpalAnalyser::new(consumer, fft_size)),
                overruns,
                stop_tx,
                done_rx,
            }) as Box<dyn CaptureSession>)
        })
    }
}

struct CpalCaptureSession {
    analyser: Arc<CpalAnalyser>,
    overruns: Arc<AtomicU64>,
    stop_tx: mpsc::Sender<()>,
    done_rx: oneshot::Receiver<()>,
}

impl CaptureSession for CpalCaptureSession {
    fn analyser(&self) -> Arc<dyn AnalyserNode> {
        self.analyser.clone()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        let CpalCaptureSession {
            overruns,
            stop_tx,
            done_rx,
            ..
        } = *self;
        Box::pin(async move {
            let _ = stop_tx.send(());
            let _ = done_rx.await;
            log::info!(
                "[CpalCapture] Input stream closed ({} samples dropped on overrun)",
                overruns.load(Ordering::Relaxed)
            );
        })
    }
}

struct AnalyserWindow {
    consumer: Consumer<f32>,
    samples: VecDeque<f32>,
}

struct CpalAnalyser {
    fft_size: usize,
    window: Mutex<AnalyserWindow>,
}

impl CpalAnalyser {
    fn new(consumer: Consumer<f32>, fft_size: usize) -> Self {
        Self {
            fft_size,
            window: Mutex::new(AnalyserWindow {
                consumer,
                samples: VecDeque::with_capacity(fft_size),
            }),
        }
    }
}

impl AnalyserNode for CpalAnalyser {
    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn get_time_domain_data(&self, out: &mut [f32]) {
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let AnalyserWindow { consumer, samples } = &mut *window;

        while let Ok(sample) = consumer.pop() {
            if samples.len() == self.fft_size {
                samples.pop_front();
            }
            samples.push_back(sample);
        }

        // Right-align: the newest samples land at the end of `out`
        let missing = out.len().saturating_sub(samples.len());
        out[..missing].fill(0.0);
        let skip = samples.len().saturating_sub(out.len());
        for (dst, src) in out[missing..].iter_mut().zip(samples.iter().skip(skip)) {
            *dst = *src;
        }
    }
}

fn open_default_input(
    producer: Producer<f32>,
    overruns: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable {
            details: "No default input device found".to_string(),
        })?;

    let config = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::DeviceUnavailable {
            details: "Default input device disappeared".to_string(),
        },
        other => classify_error(format!("Failed to get default input config: {:?}", other)),
    })?;

    let sample_format = config.sample_format();
    let stream_config: cpal::StreamConfig = config.into();
    let sample_rate = stream_config.sample_rate.0;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, producer, overruns),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, producer, overruns),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, producer, overruns),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, producer, overruns),
        other => {
            let err = CaptureError::UnsupportedFormat {
                format: format!("{:?}", other),
            };
            log_capture_error(&err, "CpalCaptureBackend::open");
            return Err(err);
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable {
            details: "Input device not available".to_string(),
        },
        other => classify_error(format!("{:?}", other)),
    })?;

    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: Producer<f32>,
    overruns: Arc<AtomicU64>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let err_fn = |err: cpal::StreamError| log::error!("[CpalCapture] Input stream error: {}", err);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // De-interleave: take first channel
            for frame in data.chunks(channels) {
                if producer.push(f32::from_sample(frame[0])).is_err() {
                    overruns.fetch_add(1, Ordering::Relaxed);
                }
            }
        },
        err_fn,
        None,
    )
}

/// Map a backend error message onto the permission/other split
fn classify_error(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not authorized")
        || lower.contains("not permitted")
    {
        CaptureError::PermissionDenied
    } else {
        CaptureError::StreamOpenFailed { reason: message }
    }
}
