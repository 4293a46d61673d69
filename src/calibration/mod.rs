// Calibration module - display-dB mapping
//
// CalibrationState pairs a reference RMS with the display dB the user
// assigned to it. Raw dBFS statistics never depend on it; only values shown
// to people (realtime chart points, slice display stats, the quiet/noisy
// state) are mapped through it, so changing the baseline affects future
// conversions only.

pub mod state;

pub use state::CalibrationState;
