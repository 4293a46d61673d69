use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::CaptureError;

use super::{AnalyserNode, CaptureBackend, CaptureSession};

/// Waveform produced by the scripted analyser
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptedSignal {
    /// Alternating +amplitude / -amplitude (RMS equals the amplitude)
    Square,
    /// Seeded uniform noise in [-amplitude, amplitude)
    Noise { seed: u64 },
}

/// Shared, live-adjustable signal parameters
struct SignalControl {
    amplitude_bits: AtomicU64,
    signal: Mutex<ScriptedSignal>,
}

impl SignalControl {
    fn amplitude(&self) -> f32 {
        f64::from_bits(self.amplitude_bits.load(Ordering::Relaxed)) as f32
    }
}

/// Deterministic capture backend for tests, simulations and CLI dry runs.
///
/// Opening can be made to fail (e.g. with `PermissionDenied`) to exercise
/// the service's error statuses, and the signal level can be changed while
/// a session is running. Open/close counts and the peak number of
/// simultaneously open sessions are tracked for assertions.
pub struct ScriptedCaptureBackend {
    fft_size: usize,
    control: Arc<SignalControl>,
    failure: Mutex<Option<CaptureError>>,
    open_delay: Duration,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedCaptureBackend {
    pub fn new(amplitude: f32) -> Self {
        Self {
            fft_size: 256,
            control: Arc::new(SignalControl {
                amplitude_bits: AtomicU64::new(f64::from(amplitude).to_bits()),
                signal: Mutex::new(ScriptedSignal::Square),
            }),
            failure: Mutex::new(None),
            open_delay: Duration::ZERO,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size.max(1);
        self
    }

    /// Delay every open, simulating a slow permission prompt
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn set_amplitude(&self, amplitude: f32) {
        self.control
            .amplitude_bits
            .store(f64::from(amplitude).to_bits(), Ordering::Relaxed);
    }

    pub fn set_signal(&self, signal: ScriptedSignal) {
        if let Ok(mut current) = self.control.signal.lock() {
            *current = signal;
        }
    }

    /// Make subsequent opens fail with `failure` (`None` restores success)
    pub fn set_failure(&self, failure: Option<CaptureError>) {
        if let Ok(mut current) = self.failure.lock() {
            *current = failure;
        }
    }

    /// Successful opens so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of sessions ever open at the same time
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for ScriptedCaptureBackend {
    fn open(&self) -> BoxFuture<'static, Result<Box<dyn CaptureSession>, CaptureError>> {
        let failure = self.failure.lock().ok().and_then(|f| f.clone());
        let delay = self.open_delay;

        if failure.is_none() {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
        }

        let seed = match self.control.signal.lock().map(|s| *s) {
            Ok(ScriptedSignal::Noise { seed }) => seed,
            _ => 0,
        };
        let session = ScriptedSession {
            analyser: Arc::new(ScriptedAnalyser {
                fft_size: self.fft_size,
                control: Arc::clone(&self.control),
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
            }),
            closes: Arc::clone(&self.closes),
            active: Arc::clone(&self.active),
        };

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match failure {
                Some(err) => Err(err),
                None => Ok(Box::new(session) as Box<dyn CaptureSession>),
            }
        })
    }
}

struct ScriptedSession {
    analyser: Arc<ScriptedAnalyser>,
    closes: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl CaptureSession for ScriptedSession {
    fn analyser(&self) -> Arc<dyn AnalyserNode> {
        self.analyser.clone()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

struct ScriptedAnalyser {
    fft_size: usize,
    control: Arc<SignalControl>,
    rng: Mutex<StdRng>,
}

impl AnalyserNode for ScriptedAnalyser {
    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn get_time_domain_data(&self, out: &mut [f32]) {
        let amplitude = self.control.amplitude();
        let signal = self
            .control
            .signal
            .lock()
            .map(|s| *s)
            .unwrap_or(ScriptedSignal::Square);

        match signal {
            ScriptedSignal::Square => {
                for (i, v) in out.iter_mut().enumerate() {
                    *v = if i % 2 == 0 { amplitude } else { -amplitude };
                }
            }
            ScriptedSignal::Noise { .. } => match self.rng.lock() {
                Ok(mut rng) => {
                    for v in out.iter_mut() {
                        *v = rng.gen_range(-1.0f32..1.0) * amplitude;
                    }
                }
                Err(_) => out.fill(0.0),
            },
        }
    }
}
