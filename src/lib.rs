#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

use std::thread::{self, JoinHandle};

use chrono::NaiveDateTime;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

pub mod alarm;
pub mod communication;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod sink;
pub mod store;

pub use alarm::{Alarm, AlarmBuilder, AlarmEdit, AlarmId, AlarmList, AlarmTime, Days, SoundSource};
pub use communication::{Command, Event};
pub use error::{Error, Result};
pub use scheduler::Scheduler;
pub use sink::{NotificationSink, RodioSink};
pub use store::{AlarmStore, TomlStore};

/// Owns the alarms and decides when they ring.
///
/// Every change to the alarms goes through [`Clock::handle`] and every
/// check through [`Clock::tick_at`]. Once [spawned](Clock::spawn) both run
/// on the same thread, so an edit can never land in the middle of a tick.
/// Changes are saved to the store right away; if saving fails the alarms in
/// memory stay as they are and a [`Event::PersistenceFailed`] is sent.
pub struct Clock<S, St> {
    alarms: AlarmList,
    store: St,
    scheduler: Scheduler<S>,
    snooze_minutes: u32,
    events: Sender<Event>,
}

impl<S: NotificationSink, St: AlarmStore> Clock<S, St> {
    /// Loads the alarms from `store`. Events are delivered on the returned
    /// receiver.
    ///
    /// # Errors
    /// if the store couldn't be read or holds two alarms with the same id
    pub fn new(store: St, sink: S, snooze_minutes: u32) -> Result<(Self, Receiver<Event>)> {
        let alarms = AlarmList::try_from(store.load_all()?)?;
        info!("loaded {} alarms", alarms.len());
        let (events, receiver) = crossbeam_channel::unbounded();
        Ok((
            Self {
                alarms,
                store,
                scheduler: Scheduler::new(sink),
                snooze_minutes,
                events,
            },
            receiver,
        ))
    }

    #[must_use]
    pub const fn alarms(&self) -> &AlarmList {
        &self.alarms
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    #[must_use]
    pub const fn store(&self) -> &St {
        &self.store
    }

    pub fn tick_at(&mut self, now: NaiveDateTime) {
        for event in self.scheduler.tick(now, self.alarms.as_slice()) {
            self.emit(event);
        }
    }

    /// Applies `command`. Returns false once the clock should shut down.
    pub fn handle(&mut self, command: Command, now: NaiveDateTime) -> bool {
        debug!("handling {command:?}");
        match command {
            Command::GetAlarms => self.emit(Event::Alarms(self.alarms.as_slice().to_vec())),
            Command::AddAlarm(builder) => match self.alarms.add(builder) {
                Ok(alarm) => {
                    let alarm = alarm.clone();
                    info!("alarm {} added for {} ({})", alarm.id, alarm.time, alarm.days);
                    self.emit(Event::AlarmAdded(alarm));
                    self.save();
                }
                Err(e) => self.reject(&e),
            },
            Command::SetAlarm(id, edit) => {
                let disabling = matches!(edit, AlarmEdit::Enable(false));
                match self.alarms.edit(id, edit) {
                    Ok(alarm) => {
                        let alarm = alarm.clone();
                        if disabling {
                            self.scheduler.forget(id);
                        }
                        info!("alarm {id} changed");
                        self.emit(Event::AlarmSet(alarm));
                        self.save();
                    }
                    Err(e) => self.reject(&e),
                }
            }
            Command::RemoveAlarm(id) => {
                if self.alarms.remove(id).is_some() {
                    self.scheduler.forget(id);
                    info!("alarm {id} removed");
                    self.emit(Event::AlarmRemoved(id));
                    self.save();
                } else {
                    self.reject(&Error::AlarmNotFound(id));
                }
            }
            Command::Dismiss => self.dismiss(),
            Command::Snooze(minutes) => {
                let minutes = minutes.unwrap_or(self.snooze_minutes);
                match self.scheduler.snooze(now, minutes, &mut self.alarms) {
                    Ok(Some(event)) => {
                        self.emit(event);
                        self.save();
                    }
                    Ok(None) => debug!("snooze without a ringing alarm"),
                    Err(e) => self.reject(&e),
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// One shot alarms are switched off once dismissed, otherwise they would
    /// ring again the next day.
    fn dismiss(&mut self) {
        let Some(event) = self.scheduler.dismiss() else {
            debug!("dismiss without a ringing alarm");
            return;
        };
        let one_shot = event
            .alarm()
            .filter(|alarm| alarm.is_one_shot())
            .map(|alarm| alarm.id);
        self.emit(event);
        if let Some(id) = one_shot {
            if let Ok(alarm) = self.alarms.edit(id, AlarmEdit::Enable(false)) {
                let alarm = alarm.clone();
                info!("one shot alarm {id} switched off");
                self.emit(Event::AlarmSet(alarm));
                self.save();
            }
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("nobody is listening for clock events");
        }
    }

    fn reject(&self, error: &Error) {
        warn!("command rejected: {error}");
        self.emit(Event::Rejected(error.to_string()));
    }

    fn save(&self) {
        if let Err(e) = self.store.save_all(self.alarms.as_slice()) {
            warn!("couldn't save alarms: {e}");
            self.emit(Event::PersistenceFailed(e.to_string()));
        }
    }
}

impl<S, St> Clock<S, St>
where
    S: NotificationSink + Send + 'static,
    St: AlarmStore + Send + 'static,
{
    /// Runs the clock on its own thread, ticking every
    /// [`TICK_INTERVAL`](scheduler::TICK_INTERVAL) against the local time.
    ///
    /// # Errors
    /// if the thread couldn't be spawned
    pub fn spawn(self) -> Result<ClockHandle> {
        let (commands, receiver) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name("alarm-clock".to_string())
            .spawn(move || self.run(&receiver))
            .map_err(Error::Spawn)?;
        Ok(ClockHandle {
            commands,
            thread: Some(thread),
        })
    }

    fn run(mut self, commands: &Receiver<Command>) {
        let ticker = crossbeam_channel::tick(scheduler::TICK_INTERVAL);
        info!("clock started");
        loop {
            crossbeam_channel::select! {
                recv(commands) -> command => match command {
                    Ok(command) => {
                        if !self.handle(command, now()) {
                            break;
                        }
                    }
                    // every handle is gone
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.tick_at(now()),
            }
        }
        self.scheduler.shutdown();
        info!("clock stopped");
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Talks to a clock running on its own thread.
///
/// Stopping is idempotent, and dropping the handle stops the clock.
#[derive(Debug)]
pub struct ClockHandle {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl ClockHandle {
    /// Returns false if the clock isn't running anymore.
    pub fn send(&self, command: Command) -> bool {
        self.thread.is_some() && self.commands.send(command).is_ok()
    }

    pub fn dismiss(&self) -> bool {
        self.send(Command::Dismiss)
    }

    pub fn snooze(&self, minutes: Option<u32>) -> bool {
        self.send(Command::Snooze(minutes))
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stops the clock and waits for its thread to finish.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // the thread may already be gone, joining below is all that matters
        let _ = self.commands.send(Command::Shutdown);
        if thread.join().is_err() {
            warn!("clock thread panicked");
        }
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
