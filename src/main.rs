use std::{
    error::Error,
    fs,
    io::{self, BufRead},
    path::PathBuf,
    thread,
};

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use log::{info, warn};
use roosty_alarm::{
    config::{Config, Sound},
    store::{AlarmStore, TomlStore},
    Alarm, AlarmBuilder, AlarmEdit, AlarmId, AlarmList, AlarmTime, Clock, ClockHandle, Command,
    Days, Event, RodioSink, SoundSource,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Option<Cli>,
}

#[derive(Subcommand)]
enum Cli {
    /// write the default config
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// add a sound file to the sound library
    NewSound { name: String, path: PathBuf },
    NewAlarm {
        /// HH:MM on a 24 hour clock
        time: AlarmTime,
        /// `once`, `every day` or a list like `mon,wed,fri`
        #[clap(long, short, default_value = "once")]
        days: Days,
        #[clap(long, short)]
        name: Option<String>,
        /// sound file to play, a path or a url
        #[clap(long, conflicts_with = "playlist")]
        sound_url: Option<String>,
        /// something to open instead of playing a sound, like a playlist link
        #[clap(long)]
        playlist: Option<String>,
        #[clap(long)]
        image: Option<String>,
        #[clap(long, default_value_t = 100.0)]
        volume: f32,
    },
    List,
    Remove { id: AlarmId },
    /// enable a disabled alarm or disable an enabled one
    Toggle { id: AlarmId },
    /// run the alarm clock in the foreground (the default)
    Run,
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_file_logger::init_logger!("roosty_alarm").expect("couldn't initialize logger");

    let args = Args::parse();
    match args.command {
        Some(Cli::Init { force }) => init(force),
        Some(Cli::NewSound { name, path }) => {
            let config_path = Config::config_path()?;
            let mut config = Config::load_or_default(config_path.clone())?;
            let sound = Sound::new(name, path);
            println!("added {sound}");
            config.add_sound(sound);
            config.save(config_path)?;
            Ok(())
        }
        Some(Cli::NewAlarm {
            time,
            days,
            name,
            sound_url,
            playlist,
            image,
            volume,
        }) => {
            let sound = match (sound_url, playlist) {
                (Some(url), _) => SoundSource::Url(url),
                (None, Some(playlist)) => SoundSource::External(playlist),
                (None, None) => SoundSource::Default,
            };
            let mut builder = AlarmBuilder::new(time).days(days).sound(sound);
            builder.name = name;
            builder.image = image;
            builder.volume = volume;
            edit_alarms(|alarms| {
                let alarm = alarms.add(builder)?;
                println!("added alarm {} at {} ({})", alarm.id, alarm.time, alarm.days);
                Ok(())
            })
        }
        Some(Cli::List) => {
            let config = Config::load_or_default(Config::config_path()?)?;
            let alarms = AlarmList::try_from(TomlStore::default_location()?.load_all()?)?;
            if alarms.is_empty() {
                println!("no alarms");
            }
            for alarm in &alarms {
                println!("{}", describe(alarm, &config.time_format));
            }
            Ok(())
        }
        Some(Cli::Remove { id }) => edit_alarms(|alarms| {
            alarms
                .remove(id)
                .ok_or(roosty_alarm::Error::AlarmNotFound(id))?;
            println!("removed alarm {id}");
            Ok(())
        }),
        Some(Cli::Toggle { id }) => edit_alarms(|alarms| {
            let enabled = alarms
                .get(id)
                .ok_or(roosty_alarm::Error::AlarmNotFound(id))?
                .enabled;
            let alarm = alarms.edit(id, AlarmEdit::Enable(!enabled))?;
            println!(
                "alarm {id} is now {}",
                if alarm.enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        }),
        Some(Cli::Run) | None => run(),
    }
}

fn init(force: bool) -> Result<(), Box<dyn Error>> {
    if Config::is_config_present() && !force {
        println!("config already exists, use --force to overwrite it");
        return Ok(());
    }
    let config_path = Config::config_path()?;
    Config::new().save(config_path.clone())?;
    fs::create_dir_all(Config::sounds_path()?)?;
    info!("wrote default config to {}", config_path.display());
    println!("wrote {}", config_path.display());
    report_missing_sounds(&Config::new());
    Ok(())
}

/// no sound files ship with the clock, alarms using a missing one ring silently
fn report_missing_sounds(config: &Config) {
    let missing = config.missing_sounds();
    if missing.is_empty() {
        return;
    }
    println!("these sounds have no file yet, copy one there or pick another with `new-sound`:");
    for sound in missing {
        println!("  {}: {}", sound.name, sound.path.display());
    }
}

/// loads the alarms file, applies `edit` and writes it back
///
/// refused while a clock is running, it would overwrite the change on its next save
fn edit_alarms(
    edit: impl FnOnce(&mut AlarmList) -> roosty_alarm::Result<()>,
) -> Result<(), Box<dyn Error>> {
    let store = TomlStore::default_location()?;
    store.ensure_unlocked()?;
    let mut alarms = AlarmList::try_from(store.load_all()?)?;
    edit(&mut alarms)?;
    store.save_all(alarms.as_slice())?;
    Ok(())
}

fn describe(alarm: &Alarm, time_format: &str) -> String {
    format!(
        "{:>3}  {}  {:<20} {:<24} {}{}",
        alarm.id,
        alarm.time.format(time_format),
        alarm.days.describe(),
        alarm.label(),
        alarm.sound,
        if alarm.enabled { "" } else { "  (disabled)" }
    )
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = Config::load_or_default(Config::config_path()?)?;
    report_missing_sounds(&config);
    let sink = RodioSink::new(config.default_sound_path()?)?;
    let store = TomlStore::default_location()?;
    let _lock = store.lock()?;
    let (clock, events) = Clock::new(store, sink, config.snooze_minutes)?;
    let mut handle = clock.spawn()?;
    info!("alarm clock running");

    let time_format = config.time_format.clone();
    let printer = thread::spawn(move || print_events(&events, &time_format));

    println!(
        "commands: dismiss, snooze [minutes], list, add HH:MM [days], remove ID, enable ID, disable ID, quit"
    );
    for line in io::stdin().lock().lines() {
        if !handle_input(&handle, &line?) {
            break;
        }
    }

    handle.stop();
    if printer.join().is_err() {
        warn!("event printer panicked");
    }
    Ok(())
}

/// Returns false when the user wants to quit.
fn handle_input(handle: &ClockHandle, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let sent = match words.next() {
        Some("dismiss" | "d") => handle.dismiss(),
        Some("snooze" | "s") => match words.next().map(str::parse::<u32>) {
            Some(Ok(minutes)) => handle.snooze(Some(minutes)),
            Some(Err(e)) => {
                println!("invalid snooze length: {e}");
                true
            }
            None => handle.snooze(None),
        },
        Some("list" | "l") => handle.send(Command::GetAlarms),
        Some("add") => {
            let Some(time) = words.next() else {
                println!("usage: add HH:MM [days]");
                return true;
            };
            let days = words.collect::<Vec<_>>().join(" ");
            match (time.parse::<AlarmTime>(), days.parse::<Days>()) {
                (Ok(time), Ok(days)) => {
                    handle.send(Command::AddAlarm(AlarmBuilder::new(time).days(days)))
                }
                (Err(e), _) | (_, Err(e)) => {
                    println!("{e}");
                    true
                }
            }
        }
        Some(command @ ("remove" | "enable" | "disable")) => {
            match words.next().map(str::parse::<AlarmId>) {
                Some(Ok(id)) => handle.send(match command {
                    "remove" => Command::RemoveAlarm(id),
                    enable => Command::SetAlarm(id, AlarmEdit::Enable(enable == "enable")),
                }),
                _ => {
                    println!("usage: {command} ID");
                    true
                }
            }
        }
        Some("quit" | "q" | "exit") => return false,
        Some(other) => {
            println!("unknown command `{other}`");
            true
        }
        None => true,
    };
    if !sent {
        println!("the clock isn't running anymore");
    }
    sent
}

fn print_events(events: &Receiver<Event>, time_format: &str) {
    for event in events {
        match event {
            Event::Alarms(alarms) => {
                for alarm in &alarms {
                    println!("{}", describe(alarm, time_format));
                }
            }
            Event::AlarmRinging(alarm) => println!(
                "⏰ {} ({}) is ringing, `dismiss` or `snooze`",
                alarm.label(),
                alarm.time.format(time_format)
            ),
            Event::AlarmSnoozed { alarm, new_time } => println!(
                "{} snoozed until {}",
                alarm.label(),
                new_time.format(time_format)
            ),
            Event::AlarmDismissed(alarm) => println!("{} dismissed", alarm.label()),
            Event::PlaybackFailed { alarm, reason } => {
                println!("{} is ringing but can't be heard: {reason}", alarm.label());
            }
            Event::PersistenceFailed(reason) => println!("couldn't save alarms: {reason}"),
            Event::Rejected(reason) => println!("{reason}"),
            Event::AlarmAdded(alarm) => println!("added {}", describe(&alarm, time_format)),
            Event::AlarmSet(alarm) => println!("changed {}", describe(&alarm, time_format)),
            Event::AlarmRemoved(id) => println!("removed alarm {id}"),
        }
    }
}
