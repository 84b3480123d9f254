//! Playing alarms.
//!
//! The scheduler only ever asks a [`NotificationSink`] to start or stop.
//! Starting is asynchronous: [`NotificationSink::play`] hands back a
//! [`Playback`] that the scheduler polls on later ticks, so a slow audio
//! device never holds up the clock.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source};

use crate::{
    alarm::{AlarmId, SoundSource},
    error::{Error, Result},
};

#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub alarm: AlarmId,
    pub source: SoundSource,
    /// percent
    pub volume: f32,
}

/// The eventual outcome of a [`PlayRequest`].
#[derive(Debug)]
pub struct Playback(Receiver<Result<()>>);

impl Playback {
    /// a playback that is resolved by sending on the returned sender
    #[must_use]
    pub fn channel() -> (Sender<Result<()>>, Self) {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        (sender, Self(receiver))
    }

    /// a playback that already has its outcome
    #[must_use]
    pub fn ready(result: Result<()>) -> Self {
        let (sender, playback) = Self::channel();
        // the channel has room for exactly this one result
        let _ = sender.send(result);
        playback
    }

    /// `None` while the sink is still starting.
    ///
    /// Once this returned `Some` the playback is spent and should be dropped.
    #[must_use]
    pub fn poll(&self) -> Option<Result<()>> {
        match self.0.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::Playback(
                "the sink went away before starting".to_string(),
            ))),
        }
    }
}

pub trait NotificationSink {
    /// Starts playing, replacing whatever was playing before.
    fn play(&mut self, request: PlayRequest) -> Playback;
    fn stop(&mut self);
}

enum AudioCommand {
    Play {
        request: PlayRequest,
        reply: Sender<Result<()>>,
    },
    Stop,
}

/// Plays alarms through the default audio output.
///
/// rodio's output stream has to stay on the thread that opened it, so all
/// audio lives on a dedicated thread that this handle talks to.
#[derive(Debug)]
pub struct RodioSink {
    sender: mpsc::Sender<AudioCommand>,
}

impl RodioSink {
    /// `default_sound` is played for alarms with [`SoundSource::Default`]
    ///
    /// # Errors
    /// if the audio thread couldn't be spawned
    pub fn new(default_sound: PathBuf) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("alarm-audio".to_string())
            .spawn(move || audio_thread(&receiver, &default_sound))
            .map_err(Error::Spawn)?;
        Ok(Self { sender })
    }
}

impl NotificationSink for RodioSink {
    fn play(&mut self, request: PlayRequest) -> Playback {
        let (reply, playback) = Playback::channel();
        if self
            .sender
            .send(AudioCommand::Play { request, reply })
            .is_err()
        {
            return Playback::ready(Err(Error::Playback(
                "audio thread is not running".to_string(),
            )));
        }
        playback
    }

    fn stop(&mut self) {
        if self.sender.send(AudioCommand::Stop).is_err() {
            warn!("couldn't stop playback, audio thread is not running");
        }
    }
}

fn audio_thread(receiver: &mpsc::Receiver<AudioCommand>, default_sound: &Path) {
    // opened on first use so a missing audio device only fails the alarms that need it
    let mut stream: Option<OutputStream> = None;
    let mut current: Option<Sink> = None;
    while let Ok(command) = receiver.recv() {
        match command {
            AudioCommand::Play { request, reply } => {
                if let Some(old) = current.take() {
                    old.stop();
                }
                let result = match &request.source {
                    SoundSource::Default => {
                        start_sound(&mut stream, default_sound, request.volume).map(Some)
                    }
                    SoundSource::Url(url) => match local_path(url) {
                        Some(path) => start_sound(&mut stream, &path, request.volume).map(Some),
                        None => open_externally(url).map(|()| None),
                    },
                    SoundSource::External(reference) => open_externally(reference).map(|()| None),
                };
                let result = result.map(|sink| {
                    info!("alarm {} playing {}", request.alarm, request.source);
                    current = sink;
                });
                if reply.send(result).is_err() {
                    debug!("nobody waiting on playback of alarm {}", request.alarm);
                }
            }
            AudioCommand::Stop => {
                if let Some(sink) = current.take() {
                    sink.stop();
                    info!("playback stopped");
                }
            }
        }
    }
    debug!("audio thread exiting");
}

fn start_sound(stream: &mut Option<OutputStream>, path: &Path, volume: f32) -> Result<Sink> {
    if stream.is_none() {
        *stream = Some(
            OutputStreamBuilder::open_default_stream()
                .map_err(|e| Error::Playback(format!("couldn't open audio output: {e}")))?,
        );
    }
    let Some(stream) = stream.as_ref() else {
        return Err(Error::Playback("no audio output".to_string()));
    };
    let file = File::open(path).map_err(|e| {
        Error::Playback(format!("couldn't open sound file {}: {e}", path.display()))
    })?;
    let source = rodio::Decoder::new(BufReader::new(file))
        .map_err(|e| Error::Playback(format!("couldn't decode {}: {e}", path.display())))?;
    // keep ringing until someone dismisses or snoozes
    let sink = Sink::connect_new(stream.mixer());
    sink.set_volume(volume.clamp(0.0, 100.0) / 100.0);
    sink.append(source.repeat_infinite());
    sink.play();
    Ok(sink)
}

fn open_externally(reference: &str) -> Result<()> {
    open::that(reference)
        .map_err(|e| Error::Playback(format!("couldn't open {reference}: {e}")))
}

/// `None` for anything that isn't a file on this machine
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        Some(PathBuf::from(path))
    } else if url.contains("://") {
        None
    } else {
        Some(PathBuf::from(url))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records what it was asked to do and answers play requests with a
    /// canned outcome, either right away or when the test resolves it.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub played: Vec<PlayRequest>,
        pub stops: usize,
        pub fail_with: Option<String>,
        pub defer: bool,
        pub pending: Vec<Sender<Result<()>>>,
    }

    impl RecordingSink {
        pub fn failing(reason: &str) -> Self {
            Self {
                fail_with: Some(reason.to_string()),
                ..Default::default()
            }
        }

        pub fn deferred() -> Self {
            Self {
                defer: true,
                ..Default::default()
            }
        }
    }

    impl NotificationSink for RecordingSink {
        fn play(&mut self, request: PlayRequest) -> Playback {
            self.played.push(request);
            if self.defer {
                let (sender, playback) = Playback::channel();
                self.pending.push(sender);
                return playback;
            }
            Playback::ready(
                self.fail_with
                    .clone()
                    .map_or(Ok(()), |reason| Err(Error::Playback(reason))),
            )
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }
}
