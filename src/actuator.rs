use std::fs;
use std::path::{Path, PathBuf};

use crate::decider::Command;
use crate::error::ActuatorError;

pub const MIN_LEVEL: i32 = 0;
pub const MAX_LEVEL: i32 = 100;

pub const SYSFS_BACKLIGHT_ROOT: &str = "/sys/class/backlight";

/// Clamp an arbitrary level into the valid 0..=100 percentage range.
pub fn clamp_level(level: i32) -> u8 {
    level.clamp(MIN_LEVEL, MAX_LEVEL) as u8
}

/// Actuator reads and writes the controlled level as a percentage.
pub trait Actuator: Send {
    fn get_level(&mut self) -> Result<u8, ActuatorError>;

    /// Apply `level` clamped to 0..=100 and return the value actually set.
    fn set_level(&mut self, level: i32) -> Result<u8, ActuatorError>;
}

/// MemoryBacklight stores the level in-process. Used for dry runs.
#[derive(Clone, Debug)]
pub struct MemoryBacklight {
    level: u8,
}

impl MemoryBacklight {
    pub fn new(level: i32) -> Self {
        Self {
            level: clamp_level(level),
        }
    }
}

impl Actuator for MemoryBacklight {
    fn get_level(&mut self) -> Result<u8, ActuatorError> {
        Ok(self.level)
    }

    fn set_level(&mut self, level: i32) -> Result<u8, ActuatorError> {
        self.level = clamp_level(level);
        Ok(self.level)
    }
}

/// SysfsBacklight drives a Linux backlight device through
/// `/sys/class/backlight/<device>/{brightness,max_brightness}`.
#[derive(Clone, Debug)]
pub struct SysfsBacklight {
    dir: PathBuf,
    max_raw: u32,
}

impl SysfsBacklight {
    /// Open the named device under `root`, or the first one found.
    pub fn open<P: AsRef<Path>>(root: P, device: Option<&str>) -> Result<Self, ActuatorError> {
        let root = root.as_ref();
        let dir = match device {
            Some(name) => root.join(name),
            None => {
                let mut entries: Vec<PathBuf> = fs::read_dir(root)?
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.join("max_brightness").exists())
                    .collect();
                entries.sort();
                entries
                    .into_iter()
                    .next()
                    .ok_or_else(|| ActuatorError::NoBacklight(root.display().to_string()))?
            }
        };

        let max_raw = read_u32(&dir.join("max_brightness"))?;
        if max_raw == 0 {
            return Err(ActuatorError::Parse(format!(
                "{}: max_brightness is 0",
                dir.display()
            )));
        }
        log::info!("using backlight {} (max {})", dir.display(), max_raw);

        Ok(Self { dir, max_raw })
    }
}

fn read_u32(path: &Path) -> Result<u32, ActuatorError> {
    let raw = fs::read_to_string(path)?;
    raw.trim()
        .parse()
        .map_err(|_| ActuatorError::Parse(raw.trim().to_string()))
}

impl Actuator for SysfsBacklight {
    fn get_level(&mut self) -> Result<u8, ActuatorError> {
        let raw = read_u32(&self.dir.join("brightness"))?;
        let percent = (raw as f64 * 100.0 / self.max_raw as f64).round() as i32;
        Ok(clamp_level(percent))
    }

    fn set_level(&mut self, level: i32) -> Result<u8, ActuatorError> {
        let level = clamp_level(level);
        let raw = (level as f64 * self.max_raw as f64 / 100.0).round() as u32;
        fs::write(self.dir.join("brightness"), raw.to_string())?;
        Ok(level)
    }
}

/// Brightness owns the actuator and the last level it accepted.
pub struct Brightness {
    actuator: Box<dyn Actuator>,
    level: u8,
    step: u8,
}

impl Brightness {
    /// Read the current level once. A failing read is not fatal: the pipeline
    /// starts from `fallback` instead.
    pub fn new(mut actuator: Box<dyn Actuator>, step: u8, fallback: u8) -> Self {
        let level = match actuator.get_level() {
            Ok(level) => level,
            Err(e) => {
                log::warn!(
                    "failed to read brightness, assuming {}%: {}",
                    fallback,
                    e
                );
                clamp_level(fallback as i32)
            }
        };
        Self {
            actuator,
            level,
            step,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Dispatch one command. Returns the new level when something was
    /// applied; a failed write is logged and leaves the level unchanged.
    pub fn apply(&mut self, command: Command) -> Option<u8> {
        let target = match command {
            Command::Increase => self.level as i32 + self.step as i32,
            Command::Decrease => self.level as i32 - self.step as i32,
            Command::None => return None,
        };

        match self.actuator.set_level(target) {
            Ok(level) => {
                self.level = level;
                match command {
                    Command::Increase => log::info!("brightness up to {}%", level),
                    _ => log::info!("brightness down to {}%", level),
                }
                Some(level)
            }
            Err(e) => {
                log::warn!("failed to set brightness: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingBacklight;

    impl Actuator for FailingBacklight {
        fn get_level(&mut self) -> Result<u8, ActuatorError> {
            Err(ActuatorError::Parse("gone".into()))
        }

        fn set_level(&mut self, _level: i32) -> Result<u8, ActuatorError> {
            Err(ActuatorError::Parse("gone".into()))
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "kws-backlight-{}-{}-{}",
            std::process::id(),
            name,
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn memory_backlight_clamps() {
        let mut b = MemoryBacklight::new(50);
        assert_eq!(b.set_level(150).unwrap(), 100);
        assert_eq!(b.get_level().unwrap(), 100);
        assert_eq!(b.set_level(-5).unwrap(), 0);
        assert_eq!(b.get_level().unwrap(), 0);
        assert_eq!(MemoryBacklight::new(300).get_level().unwrap(), 100);
    }

    #[test]
    fn brightness_steps_and_saturates() {
        let mut b = Brightness::new(Box::new(MemoryBacklight::new(99)), 1, 50);
        assert_eq!(b.apply(Command::Increase), Some(100));
        assert_eq!(b.apply(Command::Increase), Some(100));
        assert_eq!(b.apply(Command::None), None);
        assert_eq!(b.level(), 100);

        let mut b = Brightness::new(Box::new(MemoryBacklight::new(3)), 5, 50);
        assert_eq!(b.apply(Command::Decrease), Some(0));
        assert_eq!(b.level(), 0);
    }

    #[test]
    fn failing_actuator_keeps_state() {
        let mut b = Brightness::new(Box::new(FailingBacklight), 1, 42);
        assert_eq!(b.level(), 42);
        assert_eq!(b.apply(Command::Increase), None);
        assert_eq!(b.level(), 42);
    }

    #[test]
    fn sysfs_backlight_scales_against_max() {
        let root = scratch_dir("scale");
        let dev = root.join("intel_backlight");
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("max_brightness"), "1000\n").unwrap();
        fs::write(dev.join("brightness"), "500\n").unwrap();

        let mut b = SysfsBacklight::open(&root, None).unwrap();
        assert_eq!(b.get_level().unwrap(), 50);
        assert_eq!(b.set_level(151).unwrap(), 100);
        assert_eq!(fs::read_to_string(dev.join("brightness")).unwrap(), "1000");
        assert_eq!(b.set_level(7).unwrap(), 7);
        assert_eq!(fs::read_to_string(dev.join("brightness")).unwrap(), "70");

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn sysfs_backlight_reports_missing_devices() {
        let root = scratch_dir("empty");
        assert!(matches!(
            SysfsBacklight::open(&root, None),
            Err(ActuatorError::NoBacklight(_))
        ));
        assert!(matches!(
            SysfsBacklight::open(&root, Some("acpi_video0")),
            Err(ActuatorError::Io(_))
        ));
        fs::remove_dir_all(&root).ok();
    }
}
