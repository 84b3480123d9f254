use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    alarm::Alarm,
    config::Config,
    error::{Error, Result},
};

/// Where alarms live between runs. All or nothing: the whole list is read
/// and written at once.
pub trait AlarmStore {
    /// # Errors
    /// if the alarms couldn't be read or parsed
    fn load_all(&self) -> Result<Vec<Alarm>>;
    /// # Errors
    /// if the alarms couldn't be written
    fn save_all(&self, alarms: &[Alarm]) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AlarmFile {
    #[serde(default)]
    alarms: Vec<Alarm>,
}

/// Keeps alarms in a toml file.
#[derive(Debug, Clone)]
pub struct TomlStore {
    path: PathBuf,
}

impl TomlStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// the alarms file in the data directory
    ///
    /// # Errors
    /// if there is no home directory
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(Config::data_dir()?.join("alarms.toml")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, extension: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(extension);
        self.path.with_file_name(name)
    }

    /// Claims the alarms file for a running clock until the lock is dropped.
    ///
    /// # Errors
    /// if another clock holds the lock or the lock file couldn't be created
    pub fn lock(&self) -> Result<StoreLock> {
        let path = self.sibling("lock");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
        }
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !is_stale(&path) {
                    return Err(Error::ClockRunning(path));
                }
                warn!("taking over lock {} left by a clock that is gone", path.display());
                fs::OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|e| Error::persistence(&path, e))?
            }
            Err(e) => return Err(Error::persistence(path, e)),
        };
        writeln!(file, "{}", std::process::id()).map_err(|e| Error::persistence(&path, e))?;
        debug!("locked {}", self.path.display());
        Ok(StoreLock { path })
    }

    /// Fails if a running clock owns the alarms, since it would overwrite
    /// any change made behind its back.
    ///
    /// # Errors
    /// if the alarms are locked
    pub fn ensure_unlocked(&self) -> Result<()> {
        let path = self.sibling("lock");
        if path.exists() && !is_stale(&path) {
            return Err(Error::ClockRunning(path));
        }
        Ok(())
    }
}

/// A lock is stale when the process that wrote it is gone. Only linux can
/// tell, elsewhere a lock left by a crash has to be removed by hand.
fn is_stale(lock: &Path) -> bool {
    let Ok(pid) = fs::read_to_string(lock) else {
        return false;
    };
    let Ok(pid) = pid.trim().parse::<u32>() else {
        return false;
    };
    cfg!(target_os = "linux") && !Path::new("/proc").join(pid.to_string()).exists()
}

/// Held by a running clock, see [`TomlStore::lock`].
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("couldn't remove lock file {}: {e}", self.path.display());
        }
    }
}

impl AlarmStore for TomlStore {
    fn load_all(&self) -> Result<Vec<Alarm>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no alarms file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::persistence(&self.path, e)),
        };
        let file: AlarmFile = toml::from_str(&contents)?;
        Ok(file.alarms)
    }

    fn save_all(&self, alarms: &[Alarm]) -> Result<()> {
        let contents = toml::to_string(&AlarmFile {
            alarms: alarms.to_vec(),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
        }
        // a crash mid write must not leave a truncated alarms file behind
        let temp = self.sibling("tmp");
        fs::write(&temp, contents).map_err(|e| Error::persistence(&temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| Error::persistence(&self.path, e))?;
        debug!("saved {} alarms to {}", alarms.len(), self.path.display());
        Ok(())
    }
}
