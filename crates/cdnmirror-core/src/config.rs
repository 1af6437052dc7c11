//! Rule file
//!
//! Line-oriented `key=value` text. Values persist from line to line and
//! every `local_dir` line closes one [`ConfigEntry`] built from the current
//! values, so accounts and containers shared by several directories are
//! written once:
//!
//! ```text
//! username=bob
//! apikey=0123456789abcdef
//! region=DFW
//! snet=true
//! container=photos
//! remote_dir=phone
//! local_dir=/home/bob/Pictures/phone
//! local_dir=/home/bob/Pictures/camera
//! ```
//!
//! `remote_dir` applies to the next entry only and resets to empty after it.
//! Blank lines and `#` comments are skipped; unknown keys are ignored.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::errors::ConfigError;

/// Default location of the rule file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cdnmirror.conf";

/// One watched directory and where it mirrors to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub username: String,
    pub region: String,
    /// Use the provider's internal service network
    pub snet: bool,
    pub local_dir: PathBuf,
    pub container: String,
    /// Object-name prefix inside the container; may be empty
    pub remote_dir: String,
}

/// Parsed rule file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    entries: Vec<ConfigEntry>,
    usernames: Vec<String>,
    apikeys: HashMap<String, String>,
}

/// Values carried from line to line while parsing
#[derive(Default)]
struct Cursor {
    username: Option<String>,
    region: Option<String>,
    container: Option<String>,
    remote_dir: String,
    snet: bool,
}

impl Config {
    /// Parses rule-file text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        read_config(text.as_bytes())
    }

    /// Reads and parses the rule file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        read_config(std::io::BufReader::new(file))
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Distinct usernames referenced by entries, in first-seen order
    pub fn usernames(&self) -> &[String] {
        &self.usernames
    }

    pub fn apikey(&self, username: &str) -> Option<&str> {
        self.apikeys.get(username).map(String::as_str)
    }

    /// Checks the whole-file invariants the parser cannot see line by line
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::NoEntries);
        }

        for entry in &self.entries {
            if !entry.local_dir.is_absolute() {
                return Err(ConfigError::RelativeLocalDir(entry.local_dir.clone()));
            }
        }

        for username in &self.usernames {
            if !self.apikeys.contains_key(username) {
                return Err(ConfigError::MissingApiKey(username.clone()));
            }
        }

        for (i, a) in self.entries.iter().enumerate() {
            for b in &self.entries[i + 1..] {
                let (inner, outer) = if a.local_dir.starts_with(&b.local_dir) {
                    (&a.local_dir, &b.local_dir)
                } else if b.local_dir.starts_with(&a.local_dir) {
                    (&b.local_dir, &a.local_dir)
                } else {
                    continue;
                };
                return Err(ConfigError::OverlappingLocalDirs {
                    inner: inner.clone(),
                    outer: outer.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Parses a rule file from any buffered reader
pub fn read_config<R: BufRead>(reader: R) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let mut cursor = Cursor::default();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| ConfigError::Io(e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| ConfigError::Syntax {
            line: line_no,
            content: trimmed.to_string(),
        })?;
        let (key, value) = (key.trim(), value.trim());

        match key {
            "username" => cursor.username = Some(value.to_string()),
            "apikey" => {
                let username = cursor.username.clone().ok_or(ConfigError::Incomplete {
                    line: line_no,
                    missing: "username",
                })?;
                match config.apikeys.get(&username) {
                    Some(existing) if existing != value => {
                        return Err(ConfigError::ConflictingApiKey(username));
                    }
                    _ => {
                        config.apikeys.insert(username, value.to_string());
                    }
                }
            }
            "region" => cursor.region = Some(value.to_string()),
            "container" => cursor.container = Some(value.to_string()),
            "remote_dir" => cursor.remote_dir = value.to_string(),
            "snet" => cursor.snet = parse_bool(value, "snet", line_no)?,
            "local_dir" => {
                let entry = close_entry(&mut cursor, value, line_no)?;
                if !config.usernames.contains(&entry.username) {
                    config.usernames.push(entry.username.clone());
                }
                config.entries.push(entry);
            }
            other => debug!(key = other, line = line_no, "Ignoring unknown config key"),
        }
    }

    Ok(config)
}

fn close_entry(cursor: &mut Cursor, local_dir: &str, line: usize) -> Result<ConfigEntry, ConfigError> {
    let username = cursor.username.clone().ok_or(ConfigError::Incomplete {
        line,
        missing: "username",
    })?;
    let container = cursor.container.clone().ok_or(ConfigError::Incomplete {
        line,
        missing: "container",
    })?;
    let region = cursor.region.clone().ok_or(ConfigError::Incomplete {
        line,
        missing: "region",
    })?;

    Ok(ConfigEntry {
        username,
        region,
        snet: cursor.snet,
        local_dir: PathBuf::from(local_dir),
        container,
        remote_dir: std::mem::take(&mut cursor.remote_dir),
    })
}

fn parse_bool(value: &str, key: &'static str, line: usize) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            line,
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = "\
# photos
username=bob
apikey=k1
region=DFW
snet=yes
container=photos
remote_dir=phone
local_dir=/home/bob/phone
local_dir=/home/bob/camera

username=alice
apikey=k2
container=docs
snet=0
local_dir=/srv/docs
";

    #[test]
    fn empty_config_parses() {
        let config = Config::parse("").unwrap();
        assert!(config.entries().is_empty());
        assert_eq!(config.validate(), Err(ConfigError::NoEntries));
    }

    #[test]
    fn values_carry_over_between_entries() {
        let config = Config::parse(SAMPLE).unwrap();
        let entries = config.entries();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].username, "bob");
        assert_eq!(entries[0].remote_dir, "phone");
        assert!(entries[0].snet);

        // remote_dir resets, everything else carries
        assert_eq!(entries[1].container, "photos");
        assert_eq!(entries[1].remote_dir, "");
        assert_eq!(entries[1].region, "DFW");

        assert_eq!(entries[2].username, "alice");
        assert_eq!(entries[2].region, "DFW");
        assert!(!entries[2].snet);

        assert_eq!(
            config.usernames().to_vec(),
            vec!["bob".to_string(), "alice".to_string()]
        );
        assert_eq!(config.apikey("alice"), Some("k2"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = Config::parse(
            "username=bob\napikey=k\nregion=ORD\ncolour=blue\ncontainer=c\nlocal_dir=/d\n",
        )
        .unwrap();
        assert_eq!(config.entries().len(), 1);
    }

    #[test]
    fn whitespace_is_trimmed() {
        let config =
            Config::parse("  username = bob \napikey=k\nregion= ORD\ncontainer =c\nlocal_dir = /d \n")
                .unwrap();
        assert_eq!(config.entries()[0].username, "bob");
        assert_eq!(config.entries()[0].local_dir, PathBuf::from("/d"));
    }

    #[test]
    fn line_without_equals_is_syntax_error() {
        let err = Config::parse("username=bob\nnonsense\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::Syntax {
                line: 2,
                content: "nonsense".to_string()
            }
        );
    }

    #[test]
    fn local_dir_before_container_is_incomplete() {
        let err = Config::parse("username=bob\nregion=DFW\nlocal_dir=/d\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::Incomplete {
                line: 3,
                missing: "container"
            }
        );
    }

    #[test]
    fn conflicting_apikeys_rejected() {
        let err = Config::parse("username=bob\napikey=a\napikey=b\n").unwrap_err();
        assert_eq!(err, ConfigError::ConflictingApiKey("bob".to_string()));
    }

    #[test]
    fn invalid_snet_rejected() {
        let err = Config::parse("snet=maybe\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBool { key: "snet", .. }));
    }

    #[test]
    fn validate_missing_apikey() {
        let config = Config::parse("username=bob\nregion=DFW\ncontainer=c\nlocal_dir=/d\n").unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingApiKey("bob".to_string()))
        );
    }

    #[test]
    fn validate_relative_local_dir() {
        let config =
            Config::parse("username=bob\napikey=k\nregion=DFW\ncontainer=c\nlocal_dir=data\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RelativeLocalDir(_))
        ));
    }

    #[test]
    fn validate_overlapping_dirs() {
        let config = Config::parse(
            "username=bob\napikey=k\nregion=DFW\ncontainer=c\nlocal_dir=/data/sub\nlocal_dir=/data\n",
        )
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::OverlappingLocalDirs {
                inner: PathBuf::from("/data/sub"),
                outer: PathBuf::from("/data"),
            })
        );
    }

    #[test]
    fn sibling_prefixes_do_not_overlap() {
        let config = Config::parse(
            "username=bob\napikey=k\nregion=DFW\ncontainer=c\nlocal_dir=/data\nlocal_dir=/data2\n",
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{SAMPLE}").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.entries().len(), 3);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Config::load(Path::new("/nonexistent/cdnmirror.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
