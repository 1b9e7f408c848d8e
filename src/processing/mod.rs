//! Signal preparation: encoding, tiling and synthesis

pub mod encoder;
pub mod signals;
pub mod tiling;

pub use encoder::{EncodedSignal, SignalEncoder};
pub use tiling::{natural_duration, TilingPlan};
