//! Spectral building blocks shared by decoding and feature extraction.
//!
//! Frame geometry and filterbanks follow librosa's defaults (`n_fft = 2048`,
//! `hop_length = n_fft / 4`, centered frames, periodic Hann window) so that a
//! classifier trained on librosa features sees the same numbers here.

mod filters;
mod resample;
mod stft;
mod tuning;

pub use filters::{
    chroma_filterbank, dct_ortho_matrix, hz_to_mel_slaney, mel_filterbank, mel_to_hz_slaney,
    power_to_db,
};
pub use resample::{fix_length, resample, ResampleError};
pub use stft::{frame_signal, hann_window, PadMode, Stft};
pub use tuning::{estimate_tuning, hz_to_octs, pitch_tuning};

pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = N_FFT / 4;
