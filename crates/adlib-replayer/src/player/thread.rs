//! Render session: the single thread driving decode and rendering.
//!
//! The renderer, its chip, and the sink all move into the spawned thread;
//! nothing but the [`PlayerControl`] flag set is shared with the owner.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::player::control::PlayerControl;
use crate::player::renderer::{PcmSink, Renderer};
use crate::{ReplayerError, Result};

/// Handle to a running render thread.
pub struct RenderSession {
    handle: Option<JoinHandle<Result<()>>>,
    control: Arc<PlayerControl>,
}

impl RenderSession {
    /// Spawn the render thread and start playing immediately.
    pub fn spawn<S>(mut renderer: Renderer, mut sink: S) -> Self
    where
        S: PcmSink + Send + 'static,
    {
        let control = Arc::new(PlayerControl::new());
        let thread_control = Arc::clone(&control);
        let handle = thread::Builder::new()
            .name("adlib-render".into())
            .spawn(move || renderer.run(&mut sink, &thread_control));
        RenderSession {
            handle: handle.ok(),
            control,
        }
    }

    /// The shared control surface.
    pub fn control(&self) -> Arc<PlayerControl> {
        Arc::clone(&self.control)
    }

    /// Whether the render thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the render thread and return its result.
    pub fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ReplayerError::Audio("render thread panicked".into()))?,
            None => Err(ReplayerError::Audio("render thread failed to spawn".into())),
        }
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.control.request_stop();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{DroSequencer, Sequencer};
    use std::time::Duration;

    struct SharedSink(Arc<parking_lot::Mutex<Vec<i16>>>);

    impl PcmSink for SharedSink {
        fn write(&mut self, frames: &[i16]) -> Result<()> {
            self.0.lock().extend_from_slice(frames);
            Ok(())
        }
    }

    fn dro_v1(stream: &[u8]) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(b"DBRAWOPL");
        f.extend_from_slice(&0u16.to_le_bytes());
        f.extend_from_slice(&1u16.to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes());
        f.extend_from_slice(&(stream.len() as u32).to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes());
        f.extend_from_slice(stream);
        f
    }

    #[test]
    fn session_renders_to_completion() {
        let seq = DroSequencer::load(&dro_v1(&[0x20, 0x21, 0x00, 49])).unwrap();
        let renderer = Renderer::new(Box::new(seq), false);
        let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let session = RenderSession::spawn(renderer, SharedSink(Arc::clone(&frames)));
        session.join().unwrap();
        assert!(!frames.lock().is_empty());
    }

    #[test]
    fn session_stops_on_request() {
        // A long stream of 256 ms delays; stop early.
        let mut stream = Vec::new();
        for _ in 0..4000 {
            stream.extend_from_slice(&[0x00, 0xff]);
        }
        let seq = DroSequencer::load(&dro_v1(&stream)).unwrap();
        let renderer = Renderer::new(Box::new(seq), false);
        let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let session = RenderSession::spawn(renderer, SharedSink(Arc::clone(&frames)));
        let control = session.control();
        thread::sleep(Duration::from_millis(20));
        control.request_stop();
        session.join().unwrap();
    }

    #[test]
    fn sequencer_trait_objects_cross_threads() {
        // The decode side must be movable into the render thread.
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn Sequencer>>();
        assert_send::<Renderer>();
    }
}
