//! Playback layer: renderer, control surface, wide-stereo post-processing,
//! and the render session thread.

pub mod control;
pub mod renderer;
pub mod surround;
pub mod thread;

pub use control::{sequence_length_ms, PlayerControl};
pub use renderer::{BufferSink, PcmSink, RenderState, Renderer, FADE_SAMPLES};
pub use surround::Surround;
pub use thread::RenderSession;
