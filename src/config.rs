use std::{collections::HashMap, fmt, fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    scheduler::DEFAULT_SNOOZE_MINUTES,
};

const APPLICATION: &str = "roosty_alarm";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// chrono format used when showing alarm times
    #[serde(default = "default_time_format")]
    pub time_format: String,
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: u32,
    #[serde(flatten)]
    pub sounds: Sounds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sounds {
    pub sounds: HashMap<String, Sound>,
    /// played by alarms that don't pick their own sound
    pub default_sound: String,
}

fn default_time_format() -> String {
    "%H:%M".to_string()
}

const fn default_snooze_minutes() -> u32 {
    DEFAULT_SNOOZE_MINUTES
}

impl Default for Config {
    fn default() -> Self {
        let sounds_path = Self::sounds_path().unwrap_or_else(|_| PathBuf::from("sounds"));
        Self {
            time_format: default_time_format(),
            snooze_minutes: DEFAULT_SNOOZE_MINUTES,
            sounds: Sounds {
                sounds: [
                    ("ring", "ring.mp3"),
                    ("bing bong", "bing_bong.mp3"),
                    ("tick tock", "tick_tock.mp3"),
                    ("beep beep", "beep_beep.mp3"),
                    ("rain", "rain.mp3"),
                ]
                .into_iter()
                .map(|(name, file)| {
                    (
                        name.to_string(),
                        Sound::new(name.to_string(), sounds_path.join(file)),
                    )
                })
                .collect(),
                default_sound: "beep beep".to_string(),
            },
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// if the file couldn't be read or isn't a valid config
    pub fn load(path: PathBuf) -> Result<Self> {
        let config = fs::read_to_string(&path).map_err(|e| Error::persistence(path, e))?;
        Ok(toml::from_str(&config)?)
    }

    /// the config at `path`, or the defaults if there is none yet
    ///
    /// # Errors
    /// if the file exists but couldn't be read or parsed
    pub fn load_or_default(path: PathBuf) -> Result<Self> {
        match fs::read_to_string(&path) {
            Ok(config) => Ok(toml::from_str(&config)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::persistence(path, e)),
        }
    }

    /// # Errors
    /// if the config couldn't be serialized or written
    pub fn save(&self, path: PathBuf) -> Result<()> {
        let config = toml::to_string(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
        }
        fs::write(&path, config).map_err(|e| Error::persistence(path, e))
    }

    fn project_dirs() -> Result<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", APPLICATION).ok_or(Error::NoConfigDir)
    }

    /// # Errors
    /// if there is no home directory
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// # Errors
    /// if there is no home directory
    pub fn data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// # Errors
    /// if there is no home directory
    pub fn sounds_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("sounds"))
    }

    #[must_use]
    pub fn is_config_present() -> bool {
        Self::config_path().is_ok_and(|path| path.exists())
    }

    /// the file for alarms that use the default sound
    ///
    /// # Errors
    /// if `default_sound` isn't one of the configured sounds
    pub fn default_sound_path(&self) -> Result<PathBuf> {
        self.sounds
            .sounds
            .get(&self.sounds.default_sound)
            .map(|sound| sound.path.clone())
            .ok_or_else(|| {
                Error::Playback(format!(
                    "default sound `{}` is not configured",
                    self.sounds.default_sound
                ))
            })
    }

    /// configured sounds whose file isn't there, sorted by name
    #[must_use]
    pub fn missing_sounds(&self) -> Vec<&Sound> {
        let mut missing: Vec<_> = self
            .sounds
            .sounds
            .values()
            .filter(|sound| !sound.path.is_file())
            .collect();
        missing.sort_by(|a, b| a.name.cmp(&b.name));
        missing
    }

    /// adds or replaces a sound by name
    pub fn add_sound(&mut self, sound: Sound) -> Option<Sound> {
        self.sounds.sounds.insert(sound.name.clone(), sound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sound {
    pub name: String,
    pub path: PathBuf,
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.name,
            self.path
                .file_name()
                .map_or_else(|| self.path.to_string_lossy(), |name| name.to_string_lossy())
        )
    }
}

impl Sound {
    #[must_use]
    pub const fn new(name: String, path: PathBuf) -> Self {
        Self { name, path }
    }
}
