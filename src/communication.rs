use crate::alarm::{Alarm, AlarmBuilder, AlarmEdit, AlarmId, AlarmTime};

/// Requests sent to a running clock, handled one at a time between ticks.
#[derive(Debug, Clone)]
pub enum Command {
    GetAlarms,
    AddAlarm(AlarmBuilder),
    SetAlarm(AlarmId, AlarmEdit),
    RemoveAlarm(AlarmId),
    /// stops the ringing alarm
    Dismiss,
    /// `None` uses the configured snooze length
    Snooze(Option<u32>),
    Shutdown,
}

/// Everything the clock reports back to whoever is presenting it.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Alarms(Vec<Alarm>),
    AlarmAdded(Alarm),
    AlarmSet(Alarm),
    AlarmRemoved(AlarmId),
    AlarmRinging(Alarm),
    AlarmSnoozed { alarm: Alarm, new_time: AlarmTime },
    AlarmDismissed(Alarm),
    /// the alarm keeps ringing so it can still be dismissed or snoozed
    PlaybackFailed { alarm: Alarm, reason: String },
    /// the in memory alarms are still the source of truth
    PersistenceFailed(String),
    /// a command that couldn't be applied, like editing an unknown alarm
    Rejected(String),
}

impl Event {
    /// the alarm this event is about, if any
    #[must_use]
    pub const fn alarm(&self) -> Option<&Alarm> {
        match self {
            Self::AlarmAdded(alarm)
            | Self::AlarmSet(alarm)
            | Self::AlarmRinging(alarm)
            | Self::AlarmDismissed(alarm)
            | Self::AlarmSnoozed { alarm, .. }
            | Self::PlaybackFailed { alarm, .. } => Some(alarm),
            Self::Alarms(_)
            | Self::AlarmRemoved(_)
            | Self::PersistenceFailed(_)
            | Self::Rejected(_) => None,
        }
    }
}
