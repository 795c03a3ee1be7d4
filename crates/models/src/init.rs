use serde::Deserialize;
use values::Age;

/// The `settings:` entry of init.yaml.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Age at which cached data is considered stale.
    #[serde(default = "Settings::default_cache_timeout")]
    pub cache_timeout: Age,
    /// Suppress the stale-data warning and its accompanying pause.
    #[serde(default)]
    pub reckless: bool,
    /// Directories searched for schema configurations before the home
    /// directory. Must not include the home directory itself.
    #[serde(default)]
    pub init_path: Vec<String>,
}

impl Settings {
    fn default_cache_timeout() -> Age {
        Age(120)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cache_timeout: Self::default_cache_timeout(),
            reckless: false,
            init_path: Vec::new(),
        }
    }
}

/// The root model for init.yaml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub shortcuts: Vec<Shortcut>,
}

/// A named argv fragment, substituted for its name on the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Shortcut {
    pub name: String,
    pub args: Vec<String>,
}

impl InitFile {
    pub fn shortcut(&self, name: &str) -> Option<&Shortcut> {
        self.shortcuts.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let init: InitFile = serde_yaml::from_str("{}").unwrap();
        assert_eq!(init.settings.cache_timeout, Age(120));
        assert!(!init.settings.reckless);
        assert!(init.settings.init_path.is_empty());
        assert!(init.shortcuts.is_empty());
    }

    #[test]
    fn full_file() {
        let init: InitFile = serde_yaml::from_str(
            r#"
            settings:
              cache_timeout: 5m
              reckless: true
              init_path: [/etc/quarry]
            shortcuts:
              - name: crashers
                args: ["select name from pods where phase = 'CrashLoopBackOff'"]
            "#,
        )
        .unwrap();
        assert_eq!(init.settings.cache_timeout, Age(300));
        assert!(init.settings.reckless);
        assert_eq!(init.shortcut("crashers").unwrap().args.len(), 1);
        assert!(init.shortcut("nope").is_none());
    }

    #[test]
    fn numeric_timeout() {
        let settings: Settings = serde_yaml::from_str("cache_timeout: 90").unwrap();
        assert_eq!(settings.cache_timeout, Age(90));
    }

    #[test]
    fn unknown_settings_rejected() {
        let result: Result<InitFile, _> =
            serde_yaml::from_str("settings: {cache_timeout: 5m, recklless: true}");
        assert!(result.is_err());
    }
}
