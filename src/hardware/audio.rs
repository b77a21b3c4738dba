// src/hardware/audio.rs - AudioPlaySdWav stand-in: play state only
use std::sync::atomic::{AtomicBool, Ordering};

/// No samples are decoded; only the playing flag is modelled.
#[derive(Debug, Default)]
pub struct AudioPlayer {
    playing: AtomicBool,
}

impl AudioPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn play(&self, name: &str) {
        tracing::debug!("Audio play {}", name);
        self.playing.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        !self.is_playing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_stop() {
        let audio = AudioPlayer::new();
        assert!(audio.is_stopped());
        audio.play("ALARM.WAV");
        assert!(audio.is_playing());
        audio.play("OTHER.WAV");
        assert!(audio.is_playing());
        audio.stop();
        assert!(audio.is_stopped());
    }
}
