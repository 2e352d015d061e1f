//! Alert sounds.
//!
//! Playback tries the configured sound asset first and falls back to a short
//! generated sine tone.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SoundError {
    #[error("no sound asset configured")]
    NoAsset,
    #[error("audio output unavailable: {0}")]
    Unavailable(String),
    #[error("playback failed: {0}")]
    Playback(String),
}

/// A generated alert tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub duration: Duration,
}

impl Tone {
    /// 800 Hz sine with a ~0.3 s decay.
    pub const ALERT: Tone = Tone {
        frequency_hz: 800.0,
        duration: Duration::from_millis(300),
    };
}

/// Sound output used by the notification dispatcher.
pub trait AlertSound: Send + Sync + 'static {
    /// Play the configured sound asset.
    fn play_asset(&self, volume: f32) -> Result<(), SoundError>;

    fn play_tone(&self, tone: Tone, volume: f32) -> Result<(), SoundError>;
}

/// Fallback output: rings the terminal bell. Has no asset support.
#[derive(Debug, Default, Clone)]
pub struct TerminalBell;

impl AlertSound for TerminalBell {
    fn play_asset(&self, _volume: f32) -> Result<(), SoundError> {
        Err(SoundError::NoAsset)
    }

    fn play_tone(&self, _tone: Tone, volume: f32) -> Result<(), SoundError> {
        use std::io::Write;

        if volume <= 0.0 {
            return Ok(());
        }
        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| SoundError::Playback(e.to_string()))
    }
}

/// Best available output for this build.
pub fn default_sound(asset: Option<std::path::PathBuf>) -> std::sync::Arc<dyn AlertSound> {
    #[cfg(feature = "audio")]
    {
        match native::RodioSound::spawn(asset) {
            Ok(sound) => return std::sync::Arc::new(sound),
            Err(e) => tracing::warn!(error = %e, "audio output unavailable, using terminal bell"),
        }
    }
    #[cfg(not(feature = "audio"))]
    if let Some(path) = asset {
        tracing::debug!(path = %path.display(), "built without audio support, sound asset ignored");
    }
    std::sync::Arc::new(TerminalBell)
}

#[cfg(feature = "audio")]
pub use native::RodioSound;

#[cfg(feature = "audio")]
mod native {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::{Path, PathBuf};
    use std::sync::mpsc;
    use std::sync::Mutex;

    use rodio::source::{SineWave, Source};
    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};

    use super::{AlertSound, SoundError, Tone};

    enum Job {
        Asset(PathBuf, f32),
        Tone(Tone, f32),
    }

    type Reply = mpsc::Sender<Result<(), SoundError>>;

    /// Plays sounds through rodio on a dedicated thread.
    ///
    /// `OutputStream` is not `Send`, so the stream lives on its own thread and
    /// jobs are handed over a channel.
    pub struct RodioSound {
        asset: Option<PathBuf>,
        jobs: Mutex<mpsc::Sender<(Job, Reply)>>,
    }

    impl RodioSound {
        pub fn spawn(asset: Option<PathBuf>) -> Result<Self, SoundError> {
            let (jobs, job_rx) = mpsc::channel::<(Job, Reply)>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SoundError>>();

            std::thread::Builder::new()
                .name("chatdesk-sound".into())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(output) => {
                            let _ = ready_tx.send(Ok(()));
                            output
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(SoundError::Unavailable(e.to_string())));
                            return;
                        }
                    };
                    while let Ok((job, reply)) = job_rx.recv() {
                        let result = match job {
                            Job::Asset(path, volume) => play_file(&handle, &path, volume),
                            Job::Tone(tone, volume) => play_tone(&handle, tone, volume),
                        };
                        let _ = reply.send(result);
                    }
                })
                .map_err(|e| SoundError::Unavailable(e.to_string()))?;

            ready_rx
                .recv()
                .map_err(|e| SoundError::Unavailable(e.to_string()))??;
            Ok(Self {
                asset,
                jobs: Mutex::new(jobs),
            })
        }

        fn run(&self, job: Job) -> Result<(), SoundError> {
            let (reply, result) = mpsc::channel();
            self.jobs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .send((job, reply))
                .map_err(|_| SoundError::Unavailable("sound thread stopped".into()))?;
            result
                .recv()
                .map_err(|_| SoundError::Unavailable("sound thread stopped".into()))?
        }
    }

    impl AlertSound for RodioSound {
        fn play_asset(&self, volume: f32) -> Result<(), SoundError> {
            let path = self.asset.clone().ok_or(SoundError::NoAsset)?;
            self.run(Job::Asset(path, volume))
        }

        fn play_tone(&self, tone: Tone, volume: f32) -> Result<(), SoundError> {
            self.run(Job::Tone(tone, volume))
        }
    }

    fn play_file(handle: &OutputStreamHandle, path: &Path, volume: f32) -> Result<(), SoundError> {
        let file = File::open(path).map_err(|e| SoundError::Playback(format!("{}: {e}", path.display())))?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| SoundError::Playback(e.to_string()))?;
        let sink = Sink::try_new(handle).map_err(|e| SoundError::Playback(e.to_string()))?;
        sink.set_volume(volume);
        sink.append(source);
        sink.detach();
        Ok(())
    }

    fn play_tone(handle: &OutputStreamHandle, tone: Tone, volume: f32) -> Result<(), SoundError> {
        let sink = Sink::try_new(handle).map_err(|e| SoundError::Playback(e.to_string()))?;
        let mut source = SineWave::new(tone.frequency_hz).take_duration(tone.duration);
        source.set_filter_fadeout();
        sink.set_volume(volume);
        sink.append(source.amplify(0.3));
        sink.detach();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bell_has_no_asset() {
        assert_eq!(TerminalBell.play_asset(1.0), Err(SoundError::NoAsset));
        assert!(TerminalBell.play_tone(Tone::ALERT, 0.0).is_ok());
    }
}
