//! Shared `~/.aws/credentials` and `~/.aws/config` files.
//!
//! Both files are INI. The credentials file names sections after the
//! profile; the config file writes `[default]` and `[profile name]`, plus
//! `[sso-session name]` sections referenced by profiles. When both files
//! define a key for the same profile, the credentials file wins.

use std::{collections::BTreeMap, fs, path::PathBuf};

use tracing::debug;

use super::Environment;

pub const DEFAULT_PROFILE: &str = "default";

/// Keys of one profile or sso-session section, lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    entries: BTreeMap<String, String>,
}

impl Profile {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str).filter(|value| !value.is_empty())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: BTreeMap<String, Profile>,
    sso_sessions: BTreeMap<String, Profile>,
}

impl ProfileSet {
    /// Read both shared files, honouring `AWS_SHARED_CREDENTIALS_FILE` and
    /// `AWS_CONFIG_FILE`. Missing files are treated as empty.
    pub fn load(env: &Environment) -> Self {
        let read = |override_var: &str, file_name: &str| {
            shared_file(env, override_var, file_name)
                .and_then(|path| {
                    let content = fs::read_to_string(&path).ok();
                    debug!(path = %path.display(), found = content.is_some(), "read shared AWS file");
                    content
                })
                .unwrap_or_default()
        };
        let credentials = read("AWS_SHARED_CREDENTIALS_FILE", "credentials");
        let config = read("AWS_CONFIG_FILE", "config");
        Self::parse(&credentials, &config)
    }

    pub fn parse(credentials: &str, config: &str) -> Self {
        let mut set = Self::default();
        for (header, entries) in sections(config) {
            let (kind, name) = match header.split_once(char::is_whitespace) {
                Some((kind, name)) => (kind, name.trim()),
                None => ("", header.as_str()),
            };
            match kind {
                "" if name == DEFAULT_PROFILE => merge(set.profiles.entry(name.to_string()).or_default(), entries, false),
                "profile" => merge(set.profiles.entry(name.to_string()).or_default(), entries, false),
                "sso-session" => merge(set.sso_sessions.entry(name.to_string()).or_default(), entries, false),
                _ => {}
            }
        }
        for (header, entries) in sections(credentials) {
            merge(set.profiles.entry(header).or_default(), entries, true);
        }
        set
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn sso_session(&self, name: &str) -> Option<&Profile> {
        self.sso_sessions.get(name)
    }
}

fn merge(profile: &mut Profile, entries: Vec<(String, String)>, overwrite: bool) {
    for (key, value) in entries {
        if overwrite {
            profile.entries.insert(key, value);
        } else {
            profile.entries.entry(key).or_insert(value);
        }
    }
}

fn shared_file(env: &Environment, override_var: &str, file_name: &str) -> Option<PathBuf> {
    if let Some(path) = env.var(override_var) {
        return Some(PathBuf::from(path));
    }
    Some(env.home()?.join(".aws").join(file_name))
}

/// Split INI text into `(header, entries)` pairs in file order. Indented
/// lines continue a nested block (`s3 =` style sub-sections) and are skipped.
fn sections(content: &str) -> Vec<(String, Vec<(String, String)>)> {
    let mut sections: Vec<(String, Vec<(String, String)>)> = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            sections.push((header.trim().to_string(), Vec::new()));
            continue;
        }
        if raw.starts_with(char::is_whitespace) {
            continue;
        }
        if let Some((_, entries)) = sections.last_mut()
            && let Some((key, value)) = line.split_once('=')
        {
            let value = strip_inline_comment(value.trim());
            entries.push((key.trim().to_ascii_lowercase(), value.to_string()));
        }
    }
    sections
}

fn strip_inline_comment(value: &str) -> &str {
    [" #", " ;", "\t#", "\t;"]
        .iter()
        .filter_map(|marker| value.find(marker))
        .min()
        .map_or(value, |index| value[..index].trim_end())
}
