use std::{io, path::PathBuf};

use crate::alarm::AlarmId;

/// Everything that can go wrong inside the alarm engine.
///
/// None of these are fatal to a running clock: the engine thread turns them
/// into events and log lines and keeps ticking.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// alarm times are `HH:MM` on a 24 hour clock
    #[error("invalid alarm time `{0}`, expected HH:MM")]
    InvalidAlarmTime(String),
    #[error("unknown weekday `{0}`")]
    UnknownWeekday(String),
    #[error("cannot snooze for {0} minutes")]
    InvalidSnooze(u32),
    #[error("an alarm with id {0} already exists")]
    DuplicateAlarm(AlarmId),
    #[error("no alarm with id {0}")]
    AlarmNotFound(AlarmId),
    #[error("no alarm ids left")]
    IdsExhausted,
    /// the sink could not start the sound or open the external destination
    #[error("playback failed: {0}")]
    Playback(String),
    #[error("couldn't access {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't parse file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("couldn't serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// another process is running a clock on the same alarms
    #[error("alarms are in use by a running clock, edit them from its prompt (or remove {} if it crashed)", .0.display())]
    ClockRunning(PathBuf),
    #[error("couldn't find a home directory for the config")]
    NoConfigDir,
    #[error("couldn't start thread: {0}")]
    Spawn(#[source] io::Error),
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidAlarmTime("25:00".to_string());
        assert_eq!(err.to_string(), "invalid alarm time `25:00`, expected HH:MM");

        let err = Error::AlarmNotFound(AlarmId::new(7));
        assert_eq!(err.to_string(), "no alarm with id 7");
    }

    #[test]
    fn test_persistence_error_names_path() {
        let err = Error::persistence(
            "/nowhere/alarms.toml",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, Error::Persistence { .. }));
        assert!(err.to_string().contains("/nowhere/alarms.toml"));
    }
}
