//! Deciding when alarms ring.
//!
//! ```text
//!            tick: first match not yet fired this minute
//!   Idle ─────────────────────────────────────────────► Ringing
//!    ▲                                                     │
//!    │      dismiss / snooze(Δ) / ringing alarm removed    │
//!    └─────────────────────────────────────────────────────┘
//! ```
//!
//! Only one alarm rings at a time. While ringing, ticks only collect the
//! playback outcome and never start another alarm. An alarm that matched
//! while another one was ringing gets its turn on the next tick after the
//! ringing one is dismissed, as long as its minute hasn't passed.

use std::{collections::HashMap, time::Duration};

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::{
    alarm::{Alarm, AlarmId, AlarmInstant, AlarmList, AlarmTime},
    communication::Event,
    error::{Error, Result},
    sink::{NotificationSink, PlayRequest, Playback},
};

/// how often the clock checks the alarms
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_SNOOZE_MINUTES: u32 = 5;

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// the sink hasn't answered yet
    Starting,
    Playing,
    /// nothing is audible but the alarm still needs dismissing
    Failed,
}

/// The alarm that is currently ringing.
#[derive(Debug)]
pub struct ActiveAlarm {
    /// the alarm as it was when it fired
    pub alarm: Alarm,
    /// the minute it fired in
    pub fired_at: NaiveDateTime,
    pub playback: PlaybackStatus,
    pending: Option<Playback>,
}

impl ActiveAlarm {
    fn poll_playback(&mut self) -> Option<Event> {
        let result = self.pending.as_ref()?.poll()?;
        self.pending = None;
        match result {
            Ok(()) => {
                self.playback = PlaybackStatus::Playing;
                None
            }
            Err(e) => {
                warn!("alarm {} is ringing without sound: {e}", self.alarm.id);
                self.playback = PlaybackStatus::Failed;
                Some(Event::PlaybackFailed {
                    alarm: self.alarm.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[derive(Debug)]
pub struct Scheduler<S> {
    sink: S,
    active: Option<ActiveAlarm>,
    /// the minute each alarm last fired in, only kept for the current minute
    fired: HashMap<AlarmId, NaiveDateTime>,
}

impl<S: NotificationSink> Scheduler<S> {
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            active: None,
            fired: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn ringing(&self) -> Option<&ActiveAlarm> {
        self.active.as_ref()
    }

    #[must_use]
    pub const fn is_ringing(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    #[cfg(test)]
    pub(crate) fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Checks `alarms` against `now`.
    ///
    /// At most one alarm starts ringing per call, and an alarm never fires
    /// twice in the same minute however often this is called.
    pub fn tick(&mut self, now: NaiveDateTime, alarms: &[Alarm]) -> Vec<Event> {
        let minute = truncate_to_minute(now);
        self.fired.retain(|_, fired| *fired == minute);

        let mut events = Vec::new();
        if let Some(active) = &mut self.active {
            events.extend(active.poll_playback());
            return events;
        }

        let instant = AlarmInstant::from(now);
        let Some(alarm) = alarms
            .iter()
            .find(|alarm| alarm.matches(&instant) && !self.fired.contains_key(&alarm.id))
        else {
            return events;
        };

        info!("alarm {} ({}) ringing at {}", alarm.id, alarm.label(), instant.time);
        self.fired.insert(alarm.id, minute);
        let playback = self.sink.play(PlayRequest {
            alarm: alarm.id,
            source: alarm.sound.clone(),
            volume: alarm.volume,
        });
        let mut active = ActiveAlarm {
            alarm: alarm.clone(),
            fired_at: minute,
            playback: PlaybackStatus::Starting,
            pending: Some(playback),
        };
        events.push(Event::AlarmRinging(alarm.clone()));
        // sinks that fail straight away are reported on the same tick
        events.extend(active.poll_playback());
        self.active = Some(active);
        events
    }

    /// Stops the ringing alarm, leaving it as it is.
    pub fn dismiss(&mut self) -> Option<Event> {
        let active = self.active.take()?;
        self.sink.stop();
        info!("alarm {} dismissed", active.alarm.id);
        Some(Event::AlarmDismissed(active.alarm))
    }

    /// Stops the ringing alarm and moves its time to `now + minutes`.
    ///
    /// The new time replaces the alarm's time for good, so a weekly alarm
    /// snoozed on monday also rings later on the following days.
    ///
    /// # Errors
    /// if `minutes` is zero or a whole day or more
    pub fn snooze(
        &mut self,
        now: NaiveDateTime,
        minutes: u32,
        alarms: &mut AlarmList,
    ) -> Result<Option<Event>> {
        if minutes == 0 || minutes >= MINUTES_PER_DAY {
            return Err(Error::InvalidSnooze(minutes));
        }
        let Some(active) = self.active.take() else {
            debug!("nothing ringing to snooze");
            return Ok(None);
        };
        self.sink.stop();

        let new_time = AlarmTime::from_naive(now.time()).add_minutes(minutes);
        let alarm = if let Some(alarm) = alarms.get_mut(active.alarm.id) {
            alarm.time = new_time;
            alarm.clone()
        } else {
            Alarm {
                time: new_time,
                ..active.alarm
            }
        };
        info!("alarm {} snoozed until {new_time}", alarm.id);
        Ok(Some(Event::AlarmSnoozed { alarm, new_time }))
    }

    /// Silences `id` if it is the one ringing, for alarms that got removed
    /// or disabled. Returns whether it was ringing.
    ///
    /// Also drops the record of `id` having fired this minute.
    pub fn forget(&mut self, id: AlarmId) -> bool {
        self.fired.remove(&id);
        if self.active.as_ref().is_some_and(|active| active.alarm.id == id) {
            self.active = None;
            self.sink.stop();
            info!("alarm {id} stopped");
            true
        } else {
            false
        }
    }

    pub fn shutdown(&mut self) {
        self.active = None;
        self.sink.stop();
    }
}

fn truncate_to_minute(now: NaiveDateTime) -> NaiveDateTime {
    now.date()
        .and_time(AlarmTime::from_naive(now.time()).as_naive())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Weekday};

    use super::*;
    use crate::{
        alarm::{AlarmBuilder, Days, SoundSource},
        sink::testing::RecordingSink,
    };

    // 2024-01-01 was a monday
    fn at(day: u32, time: &str, second: u32) -> NaiveDateTime {
        let time: AlarmTime = time.parse().unwrap();
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(time.hour(), time.minute(), second)
            .unwrap()
    }

    fn list(alarms: &[(&str, &[Weekday])]) -> AlarmList {
        let mut list = AlarmList::new();
        for (time, days) in alarms {
            list.add(AlarmBuilder::new(time.parse().unwrap()).days(days.iter().copied().collect()))
                .unwrap();
        }
        list
    }

    fn ringing_count(events: &[Event]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, Event::AlarmRinging(_)))
            .count()
    }

    #[test]
    fn test_fires_once_per_minute_while_ringing() {
        let alarms = list(&[("07:00", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        let triggered: usize = (0..60)
            .map(|second| ringing_count(&scheduler.tick(at(1, "07:00", second), alarms.as_slice())))
            .sum();
        assert_eq!(triggered, 1);
        assert_eq!(scheduler.sink().played.len(), 1);
    }

    #[test]
    fn test_fires_once_per_minute_after_dismiss() {
        let alarms = list(&[("07:00", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        let mut triggered = 0;
        for second in 0..60 {
            triggered += ringing_count(&scheduler.tick(at(1, "07:00", second), alarms.as_slice()));
            scheduler.dismiss();
        }
        assert_eq!(triggered, 1);
    }

    #[test]
    fn test_ring_requests_playback() {
        let mut alarms = AlarmList::new();
        let mut builder = AlarmBuilder::new("07:00".parse().unwrap())
            .sound(SoundSource::External("spotify:playlist:wake".to_string()));
        builder.volume = 40.0;
        let id = alarms.add(builder).unwrap().id;
        let mut scheduler = Scheduler::new(RecordingSink::default());

        let events = scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        assert!(matches!(&events[..], [Event::AlarmRinging(alarm)] if alarm.id == id));
        let played = &scheduler.sink().played[0];
        assert_eq!(played.alarm, id);
        assert_eq!(played.source, SoundSource::External("spotify:playlist:wake".to_string()));
        assert!((played.volume - 40.0).abs() < f32::EPSILON);
        assert_eq!(scheduler.ringing().unwrap().playback, PlaybackStatus::Playing);
    }

    #[test]
    fn test_snooze_moves_time_and_rings_again() {
        let mut alarms = list(&[("07:00", &[])]);
        let id = alarms.as_slice()[0].id;
        let mut scheduler = Scheduler::new(RecordingSink::default());

        assert_eq!(ringing_count(&scheduler.tick(at(1, "07:00", 0), alarms.as_slice())), 1);
        let event = scheduler.snooze(at(1, "07:00", 20), 5, &mut alarms).unwrap();
        let expected: AlarmTime = "07:05".parse().unwrap();
        assert!(matches!(
            event,
            Some(Event::AlarmSnoozed { alarm, new_time }) if new_time == expected && alarm.time == expected
        ));
        assert_eq!(alarms.get(id).unwrap().time, expected);
        assert!(!scheduler.is_ringing());
        assert_eq!(scheduler.sink().stops, 1);

        assert!(scheduler.tick(at(1, "07:04", 59), alarms.as_slice()).is_empty());
        assert_eq!(ringing_count(&scheduler.tick(at(1, "07:05", 0), alarms.as_slice())), 1);
    }

    #[test]
    fn test_snooze_shifts_weekly_alarm_for_good() {
        let mut alarms = list(&[("07:00", &[Weekday::Mon])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());

        scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        scheduler.snooze(at(1, "07:00", 0), 5, &mut alarms).unwrap();
        scheduler.tick(at(1, "07:05", 0), alarms.as_slice());
        scheduler.dismiss();

        // next monday
        assert!(scheduler.tick(at(8, "07:00", 0), alarms.as_slice()).is_empty());
        assert_eq!(ringing_count(&scheduler.tick(at(8, "07:05", 0), alarms.as_slice())), 1);
    }

    #[test]
    fn test_snooze_across_midnight() {
        let mut alarms = list(&[("23:58", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        scheduler.tick(at(1, "23:58", 0), alarms.as_slice());
        let event = scheduler.snooze(at(1, "23:58", 0), 5, &mut alarms).unwrap();
        assert!(matches!(
            event,
            Some(Event::AlarmSnoozed { new_time, .. }) if new_time.to_string() == "00:03"
        ));
        assert_eq!(ringing_count(&scheduler.tick(at(2, "00:03", 0), alarms.as_slice())), 1);
    }

    #[test]
    fn test_invalid_snooze() {
        let mut alarms = list(&[("07:00", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        assert!(matches!(
            scheduler.snooze(at(1, "07:00", 0), 0, &mut alarms),
            Err(Error::InvalidSnooze(0))
        ));
        assert!(scheduler.snooze(at(1, "07:00", 0), MINUTES_PER_DAY, &mut alarms).is_err());
        // still ringing after a rejected snooze
        assert!(scheduler.is_ringing());
    }

    #[test]
    fn test_snooze_when_idle_does_nothing() {
        let mut alarms = list(&[("07:00", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        assert!(scheduler.snooze(at(1, "06:00", 0), 5, &mut alarms).unwrap().is_none());
        assert_eq!(alarms.as_slice()[0].time.to_string(), "07:00");
        assert!(scheduler.dismiss().is_none());
    }

    #[test]
    fn test_dismiss_keeps_time() {
        let alarms = list(&[("07:00", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        scheduler.tick(at(1, "07:00", 0), alarms.as_slice());

        let event = scheduler.dismiss();
        assert!(matches!(event, Some(Event::AlarmDismissed(alarm)) if alarm.time.to_string() == "07:00"));
        assert_eq!(alarms.as_slice()[0].time.to_string(), "07:00");
        assert!(!scheduler.is_ringing());
        assert_eq!(scheduler.sink().stops, 1);
    }

    #[test]
    fn test_one_shot_alarm_scenario() {
        let alarms = list(&[("06:30", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());

        // tuesday
        let events = scheduler.tick(at(2, "06:30", 0), alarms.as_slice());
        assert_eq!(ringing_count(&events), 1);
        assert_eq!(scheduler.ringing().unwrap().alarm.id, alarms.as_slice()[0].id);
        scheduler.dismiss();

        assert!(scheduler.tick(at(2, "06:31", 0), alarms.as_slice()).is_empty());
        assert!(!scheduler.is_ringing());

        // left enabled, it goes off again the next day
        assert_eq!(ringing_count(&scheduler.tick(at(3, "06:30", 0), alarms.as_slice())), 1);
    }

    #[test]
    fn test_weekly_alarm_skips_other_days() {
        let alarms = list(&[("07:00", &[Weekday::Mon, Weekday::Wed])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        let mut rang_on = Vec::new();
        for day in 1..=7 {
            if ringing_count(&scheduler.tick(at(day, "07:00", 0), alarms.as_slice())) == 1 {
                rang_on.push(day);
            }
            scheduler.dismiss();
        }
        assert_eq!(rang_on, vec![1, 3]);
    }

    #[test]
    fn test_disabled_alarm_never_rings() {
        let mut alarms = list(&[("07:00", &[])]);
        let id = alarms.as_slice()[0].id;
        alarms.get_mut(id).unwrap().enabled = false;
        let mut scheduler = Scheduler::new(RecordingSink::default());
        assert!(scheduler.tick(at(1, "07:00", 0), alarms.as_slice()).is_empty());
        assert!(scheduler.sink().played.is_empty());
    }

    #[test]
    fn test_simultaneous_alarms_first_wins() {
        let alarms = list(&[("07:00", &[]), ("07:00", &[])]);
        let (first, second) = (alarms.as_slice()[0].id, alarms.as_slice()[1].id);
        let mut scheduler = Scheduler::new(RecordingSink::default());

        let events = scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        assert!(matches!(&events[..], [Event::AlarmRinging(alarm)] if alarm.id == first));
        assert!(scheduler.tick(at(1, "07:00", 1), alarms.as_slice()).is_empty());
        assert_eq!(scheduler.ringing().unwrap().alarm.id, first);

        // the other one gets its turn once the first is dealt with, within the same minute
        scheduler.dismiss();
        let events = scheduler.tick(at(1, "07:00", 2), alarms.as_slice());
        assert!(matches!(&events[..], [Event::AlarmRinging(alarm)] if alarm.id == second));
        scheduler.dismiss();
        assert!(scheduler.tick(at(1, "07:00", 3), alarms.as_slice()).is_empty());
    }

    #[test]
    fn test_deferred_match_expires_with_its_minute() {
        let alarms = list(&[("07:00", &[]), ("07:00", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        scheduler.dismiss();
        assert!(scheduler.tick(at(1, "07:01", 0), alarms.as_slice()).is_empty());
    }

    #[test]
    fn test_ringing_blocks_later_alarms() {
        let alarms = list(&[("07:00", &[]), ("07:01", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        assert!(scheduler.tick(at(1, "07:01", 0), alarms.as_slice()).is_empty());
        assert_eq!(scheduler.ringing().unwrap().alarm.id, alarms.as_slice()[0].id);
    }

    #[test]
    fn test_playback_failure_keeps_ringing() {
        let alarms = list(&[("07:00", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::failing("no audio device"));

        let events = scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::AlarmRinging(_)));
        assert!(matches!(
            &events[1],
            Event::PlaybackFailed { reason, .. } if reason.contains("no audio device")
        ));
        assert_eq!(scheduler.ringing().unwrap().playback, PlaybackStatus::Failed);

        // reported once
        assert!(scheduler.tick(at(1, "07:00", 1), alarms.as_slice()).is_empty());
        assert!(matches!(scheduler.dismiss(), Some(Event::AlarmDismissed(_))));
    }

    #[test]
    fn test_playback_outcome_arrives_later() {
        let alarms = list(&[("07:00", &[])]);
        let mut scheduler = Scheduler::new(RecordingSink::deferred());

        let events = scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        assert_eq!(events.len(), 1);
        assert_eq!(scheduler.ringing().unwrap().playback, PlaybackStatus::Starting);
        assert!(scheduler.tick(at(1, "07:00", 1), alarms.as_slice()).is_empty());

        let reply = scheduler.sink_mut().pending.pop().unwrap();
        reply.send(Err(Error::Playback("decoder error".to_string()))).unwrap();
        let events = scheduler.tick(at(1, "07:00", 2), alarms.as_slice());
        assert!(matches!(&events[..], [Event::PlaybackFailed { .. }]));
        assert!(scheduler.is_ringing());
    }

    #[test]
    fn test_forget_ringing_alarm() {
        let alarms = list(&[("07:00", &[]), ("08:00", &[])]);
        let (first, second) = (alarms.as_slice()[0].id, alarms.as_slice()[1].id);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        scheduler.tick(at(1, "07:00", 0), alarms.as_slice());

        assert!(!scheduler.forget(second));
        assert!(scheduler.is_ringing());
        assert!(scheduler.forget(first));
        assert!(!scheduler.is_ringing());
        assert_eq!(scheduler.sink().stops, 1);
    }

    #[test]
    fn test_forgotten_alarm_can_fire_again_in_same_minute() {
        let alarms = list(&[("07:00", &[])]);
        let id = alarms.as_slice()[0].id;
        let mut scheduler = Scheduler::new(RecordingSink::default());
        scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        scheduler.dismiss();
        assert!(scheduler.tick(at(1, "07:00", 1), alarms.as_slice()).is_empty());

        scheduler.forget(id);
        assert_eq!(ringing_count(&scheduler.tick(at(1, "07:00", 2), alarms.as_slice())), 1);
    }

    #[test]
    fn test_ringing_event_carries_alarm() {
        let alarms = list(&[("07:00", &[Weekday::Mon])]);
        let mut scheduler = Scheduler::new(RecordingSink::default());
        let events = scheduler.tick(at(1, "07:00", 0), alarms.as_slice());
        let alarm = events[0].alarm().unwrap();
        assert_eq!(alarm.days, Days::from(vec![Weekday::Mon]));
        assert_eq!(alarm.days.describe(), "Mon");
    }
}
