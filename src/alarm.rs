use std::{fmt, str::FromStr};

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{self, Error};

/// identifies an alarm for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(u64);

impl AlarmId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AlarmId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// A time of day with minute resolution, written as `HH:MM` (24 hour clock).
///
/// The only way to get one is through [`AlarmTime::new`], parsing or
/// truncating a [`NaiveTime`], so a malformed time can never reach the
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlarmTime(NaiveTime);

impl AlarmTime {
    /// # Errors
    /// if the hour is not in `0..24` or the minute is not in `0..60`
    pub fn new(hour: u32, minute: u32) -> error::Result<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or_else(|| Error::InvalidAlarmTime(format!("{hour}:{minute:02}")))
    }

    /// drops the seconds (and anything smaller) of `time`
    #[must_use]
    pub fn from_naive(time: NaiveTime) -> Self {
        Self(
            time.with_nanosecond(0)
                .and_then(|time| time.with_second(0))
                .unwrap_or(time),
        )
    }

    #[must_use]
    pub const fn as_naive(self) -> NaiveTime {
        self.0
    }

    #[must_use]
    pub fn hour(self) -> u32 {
        self.0.hour()
    }

    #[must_use]
    pub fn minute(self) -> u32 {
        self.0.minute()
    }

    /// wraps around midnight
    #[must_use]
    pub fn add_minutes(self, minutes: u32) -> Self {
        Self(
            self.0
                .overflowing_add_signed(Duration::minutes(i64::from(minutes)))
                .0,
        )
    }

    /// formats with a chrono format string, used for displaying alarms
    #[must_use]
    pub fn format(self, time_format: &str) -> String {
        self.0.format(time_format).to_string()
    }
}

impl Default for AlarmTime {
    /// new alarms start at seven in the morning
    fn default() -> Self {
        Self(NaiveTime::from_hms_opt(7, 0, 0).expect("07:00 is a valid time"))
    }
}

impl fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for AlarmTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidAlarmTime(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !(1..=2).contains(&hour.len())
            || minute.len() != 2
            || !all_digits(hour)
            || !all_digits(minute)
        {
            return Err(invalid());
        }
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl Serialize for AlarmTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AlarmTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The weekdays an alarm repeats on.
///
/// Empty means the alarm is a one shot that fires on the next matching
/// minute. Kept sorted from monday with no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Weekday>", into = "Vec<Weekday>")]
pub struct Days(Vec<Weekday>);

impl Days {
    #[must_use]
    pub const fn once() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn every_day() -> Self {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .collect()
    }

    #[must_use]
    pub fn is_once(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, day: Weekday) -> bool {
        self.0.contains(&day)
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// short human readable summary, like `Mon, Wed`
    #[must_use]
    pub fn describe(&self) -> String {
        match self.0.len() {
            0 => "once".to_string(),
            7 => "every day".to_string(),
            _ => self
                .0
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

impl FromIterator<Weekday> for Days {
    fn from_iter<T: IntoIterator<Item = Weekday>>(iter: T) -> Self {
        let mut days: Vec<_> = iter.into_iter().collect();
        days.sort_by_key(Weekday::num_days_from_monday);
        days.dedup();
        Self(days)
    }
}

impl From<Vec<Weekday>> for Days {
    fn from(days: Vec<Weekday>) -> Self {
        days.into_iter().collect()
    }
}

impl From<Days> for Vec<Weekday> {
    fn from(days: Days) -> Self {
        days.0
    }
}

impl FromStr for Days {
    type Err = Error;

    /// comma separated day names (`mon,wed`), `once` or `every day`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "once" => Ok(Self::once()),
            "every day" | "everyday" | "daily" => Ok(Self::every_day()),
            _ => s
                .split(',')
                .map(|day| {
                    day.trim()
                        .parse::<Weekday>()
                        .map_err(|_| Error::UnknownWeekday(day.trim().to_string()))
                })
                .collect(),
        }
    }
}

impl fmt::Display for Days {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// What to do when the alarm goes off
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundSource {
    /// the configured default sound
    #[default]
    Default,
    /// a sound file, either a local path or a url
    Url(String),
    /// something the system knows how to open, like a playlist link
    External(String),
}

impl fmt::Display for SoundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default sound"),
            Self::Url(url) => write!(f, "sound {url}"),
            Self::External(reference) => write!(f, "external {reference}"),
        }
    }
}

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

#[inline]
#[must_use]
pub const fn full_volume() -> f32 {
    100.0
}

/// An instant reduced to what alarms care about: the minute and the weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmInstant {
    pub time: AlarmTime,
    pub weekday: Weekday,
}

impl AlarmInstant {
    #[must_use]
    pub const fn new(time: AlarmTime, weekday: Weekday) -> Self {
        Self { time, weekday }
    }
}

impl From<NaiveDateTime> for AlarmInstant {
    fn from(now: NaiveDateTime) -> Self {
        Self {
            time: AlarmTime::from_naive(now.time()),
            weekday: now.weekday(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub time: AlarmTime,
    #[serde(default)]
    pub days: Days,
    #[serde(default = "always_true")]
    pub enabled: bool,
    /// background shown while ringing, never looked at by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub sound: SoundSource,
    /// percent
    #[serde(default = "full_volume")]
    pub volume: f32,
}

impl Alarm {
    /// Whether this alarm should go off at `at`.
    ///
    /// Only looks at the minute, so calling this every second within the
    /// matching minute keeps returning true; deduplicating is up to the
    /// scheduler.
    #[must_use]
    pub fn matches(&self, at: &AlarmInstant) -> bool {
        self.enabled
            && self.time == at.time
            && (self.days.is_once() || self.days.contains(at.weekday))
    }

    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        self.days.is_once()
    }

    #[must_use]
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("alarm {}", self.id))
    }

    /// applies an edit, keeping the id
    pub fn apply(&mut self, edit: AlarmEdit) {
        match edit {
            AlarmEdit::Time(time) => self.time = time,
            AlarmEdit::Days(days) => self.days = days,
            AlarmEdit::Name(name) => self.name = name,
            AlarmEdit::Image(image) => self.image = image,
            AlarmEdit::Sound(sound) => self.sound = sound,
            AlarmEdit::Volume(volume) => self.volume = volume.clamp(0.0, 100.0),
            AlarmEdit::Enable(enabled) => self.enabled = enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlarmEdit {
    Time(AlarmTime),
    Days(Days),
    Name(Option<String>),
    Image(Option<String>),
    Sound(SoundSource),
    Volume(f32),
    Enable(bool),
}

/// everything needed to create an alarm except its id
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmBuilder {
    pub name: Option<String>,
    pub time: AlarmTime,
    pub days: Days,
    pub image: Option<String>,
    pub sound: SoundSource,
    pub volume: f32,
}

impl Default for AlarmBuilder {
    fn default() -> Self {
        Self {
            name: None,
            time: AlarmTime::default(),
            days: Days::once(),
            image: None,
            sound: SoundSource::Default,
            volume: full_volume(),
        }
    }
}

impl AlarmBuilder {
    #[must_use]
    pub fn new(time: AlarmTime) -> Self {
        Self {
            time,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn days(mut self, days: Days) -> Self {
        self.days = days;
        self
    }

    #[must_use]
    pub fn sound(mut self, sound: SoundSource) -> Self {
        self.sound = sound;
        self
    }

    #[must_use]
    pub fn build(self, id: AlarmId) -> Alarm {
        Alarm {
            id,
            name: self.name.filter(|name| !name.is_empty()),
            time: self.time,
            days: self.days,
            enabled: true,
            image: self.image,
            sound: self.sound,
            volume: self.volume.clamp(0.0, 100.0),
        }
    }
}

/// The alarms in the order the user added them, at most one per id.
///
/// Ids are minted from a counter that only moves forward, so an id freed by
/// a removal is never handed out again while the list lives.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmList {
    alarms: Vec<Alarm>,
    /// `None` once every id has been used up
    next: Option<u64>,
}

impl Default for AlarmList {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            alarms: Vec::new(),
            next: Some(1),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Alarm> {
        self.alarms.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: AlarmId) -> Option<&Alarm> {
        self.alarms.iter().find(|alarm| alarm.id == id)
    }

    pub fn get_mut(&mut self, id: AlarmId) -> Option<&mut Alarm> {
        self.alarms.iter_mut().find(|alarm| alarm.id == id)
    }

    /// the id the next [`add`](Self::add) will use
    ///
    /// # Errors
    /// if the largest possible id is already taken
    pub fn next_id(&self) -> error::Result<AlarmId> {
        self.next.map(AlarmId).ok_or(Error::IdsExhausted)
    }

    /// # Errors
    /// if an alarm with the same id is already in the list
    pub fn insert(&mut self, alarm: Alarm) -> error::Result<()> {
        if self.get(alarm.id).is_some() {
            return Err(Error::DuplicateAlarm(alarm.id));
        }
        if self.next.is_some_and(|next| alarm.id.0 >= next) {
            self.next = alarm.id.0.checked_add(1);
        }
        self.alarms.push(alarm);
        Ok(())
    }

    /// mints a fresh id for the new alarm
    ///
    /// # Errors
    /// if there are no ids left
    pub fn add(&mut self, builder: AlarmBuilder) -> error::Result<&Alarm> {
        let alarm = builder.build(self.next_id()?);
        self.insert(alarm)?;
        Ok(&self.alarms[self.alarms.len() - 1])
    }

    /// # Errors
    /// if there is no alarm with that id
    pub fn edit(&mut self, id: AlarmId, edit: AlarmEdit) -> error::Result<&Alarm> {
        let alarm = self.get_mut(id).ok_or(Error::AlarmNotFound(id))?;
        alarm.apply(edit);
        Ok(alarm)
    }

    pub fn remove(&mut self, id: AlarmId) -> Option<Alarm> {
        let index = self.alarms.iter().position(|alarm| alarm.id == id)?;
        Some(self.alarms.remove(index))
    }
}

impl TryFrom<Vec<Alarm>> for AlarmList {
    type Error = Error;

    fn try_from(alarms: Vec<Alarm>) -> Result<Self, Self::Error> {
        let mut list = Self::new();
        for alarm in alarms {
            list.insert(alarm)?;
        }
        Ok(list)
    }
}

impl<'a> IntoIterator for &'a AlarmList {
    type Item = &'a Alarm;
    type IntoIter = std::slice::Iter<'a, Alarm>;

    fn into_iter(self) -> Self::IntoIter {
        self.alarms.iter()
    }
}
