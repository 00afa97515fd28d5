//! Unit tests for configuration.

#[cfg(test)]
mod path_expansion_tests {
    use super::super::Config;
    use std::path::PathBuf;

    #[test]
    fn expand_path_handles_tilde() {
        let result = Config::expand_path("~/test");
        // Should not start with ~ after expansion
        assert!(!result.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn expand_path_handles_absolute_path() {
        let result = Config::expand_path("/absolute/path");
        assert_eq!(result, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn expand_path_handles_env_vars() {
        temp_env::with_var("CHATVAULT_TEST_VAR", Some("/test/path"), || {
            let result = Config::expand_path("$CHATVAULT_TEST_VAR/subdir");
            assert!(result.to_string_lossy().contains("/test/path"));
        });
    }
}

#[cfg(test)]
mod default_config_tests {
    use super::super::{Config, StoreConfig};
    use std::time::Duration;

    #[test]
    fn default_has_database_path() {
        let config = Config::default();
        assert!(config.database.to_string_lossy().contains("chatvault"));
        assert!(config.database.to_string_lossy().ends_with(".db"));
    }

    #[test]
    fn default_store_tuning() {
        let store = StoreConfig::default();
        assert_eq!(store.chat_list_ttl(), Duration::from_secs(600));
        assert_eq!(store.migration_batch_size, 500);
        assert_eq!(store.max_connections, 5);
        assert_eq!(store.busy_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn default_has_no_identity_mappings() {
        assert!(Config::default().identity.mappings.is_empty());
    }
}

#[cfg(test)]
mod load_tests {
    use super::super::{Config, LidMapping};

    const SAMPLE: &str = r#"
database = "/var/lib/chatvault/messages.db"

[store]
chat_list_ttl_secs = 30

[[identity.mappings]]
lid = "111"
pn = "4915550001"
"#;

    #[test]
    fn loads_file_with_partial_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).expect("write");

        let config = Config::load_from_path(&path).expect("load");
        assert_eq!(config.database.to_string_lossy(), "/var/lib/chatvault/messages.db");
        assert_eq!(config.store.chat_list_ttl_secs, 30);
        assert_eq!(config.store.migration_batch_size, 500);
        assert_eq!(
            config.identity.mappings,
            vec![LidMapping {
                lid: "111".to_string(),
                pn: "4915550001".to_string()
            }]
        );
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).expect("write");

        temp_env::with_var("CHATVAULT__STORE__CHAT_LIST_TTL_SECS", Some("5"), || {
            let config = Config::load_from_path(&path).expect("load");
            assert_eq!(config.store.chat_list_ttl_secs, 5);
        });
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = Config::load_from_path(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn ensure_at_writes_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::ensure_at(&path).expect("ensure");
        assert!(path.exists());

        let reloaded = Config::load_from_path(&path).expect("reload");
        assert_eq!(reloaded.database, created.database);
        assert_eq!(
            reloaded.store.chat_list_ttl_secs,
            created.store.chat_list_ttl_secs
        );
    }
}
