//! Configuration tests for file loading, defaults and validation

#[cfg(test)]
mod tests {
    use super::super::config::Config;
    use crate::Error;
    use std::env;
    use std::path::Path;

    const SARK: &str = r#"{
        "project": { "name": "SARK v2", "repository": "/srv/sark" },
        "workers": [
            { "id": "foundation", "role": "architect", "agent": "claude-code",
              "branch": "feat/foundation", "dependencies": [] },
            { "id": "patterns", "agent": "aider", "dependencies": ["foundation"] },
            { "id": "qa", "role": "tester", "agent_profile": "generic",
              "dependencies": ["foundation", "patterns"] }
        ],
        "daemon": { "verify_delay_ms": 3000 }
    }"#;

    fn write_config(dir: &Path, content: &str) {
        std::fs::write(dir.join("config.json"), content).unwrap();
    }

    #[test]
    fn test_load_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), SARK);

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.project.slug, "sark-v2");
        assert_eq!(config.session_name(), "czarina-sark-v2");
        assert_eq!(config.workers.len(), 3);
        assert_eq!(config.workers[1].agent_profile, "aider");
        assert_eq!(config.workers[2].agent_profile, "generic");
        assert_eq!(config.controller.tick_interval_secs, 15);
        assert_eq!(config.controller.idle_threshold_secs, 300);
        assert_eq!(config.daemon.verify_delay_ms, 3000);
        assert_eq!(config.daemon.match_window_lines, 20);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.repository_path(), Path::new("/srv/sark"));
        assert_eq!(config.profiles_path(), dir.path().join("agents/profiles"));
        assert_eq!(config.logs_dir(), dir.path().join("logs"));
    }

    #[test]
    fn test_paths_are_absolute_for_relative_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"{ "project": { "name": "p", "repository": "repo" },
                 "workers": [ { "id": "a" } ], "worktrees_dir": "wt" }"#,
        );
        let cwd = env::current_dir().unwrap();
        let relative = relative_to(dir.path(), &cwd);

        let config = Config::load_from_file(&relative, &dir.path().join("config.json")).unwrap();
        assert!(config.project_dir.is_absolute());
        assert!(config.worktrees_path().is_absolute());
        assert!(config.repository_path().is_absolute());
        assert!(config.profiles_path().is_absolute());
        assert_eq!(config.worktrees_path(), cwd.join(&relative).join("wt"));

        write_config(dir.path(), r#"{ "project": { "name": "p" }, "workers": [ { "id": "a" } ] }"#);
        let config = Config::load_from_file(&relative, &dir.path().join("config.json")).unwrap();
        assert!(config.repository_path().is_absolute());
    }

    /// `target` expressed relative to `base` using `..` components
    fn relative_to(target: &Path, base: &Path) -> std::path::PathBuf {
        let target: Vec<_> = target.components().collect();
        let base: Vec<_> = base.components().collect();
        let common = target
            .iter()
            .zip(base.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let mut relative = std::path::PathBuf::new();
        for _ in common..base.len() {
            relative.push("..");
        }
        for component in &target[common..] {
            relative.push(component);
        }
        relative
    }

    #[test]
    fn test_worker_set_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), SARK);

        let config = Config::load(dir.path()).unwrap();
        let profiles = config.profiles().unwrap();
        let workers = config.worker_set(&profiles).unwrap();
        assert_eq!(
            workers.graph().waves(),
            vec![
                vec!["foundation".to_string()],
                vec!["patterns".to_string()],
                vec!["qa".to_string()]
            ]
        );
        assert_eq!(workers.require("patterns").unwrap().branch, "czarina/patterns");
    }

    #[test]
    fn test_cycle_is_a_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"{
                "project": { "name": "loop" },
                "workers": [
                    { "id": "a", "dependencies": ["c"] },
                    { "id": "b", "dependencies": ["a"] },
                    { "id": "c", "dependencies": ["b"] }
                ]
            }"#,
        );

        let config = Config::load(dir.path()).unwrap();
        let profiles = config.profiles().unwrap();
        let err = config.worker_set(&profiles).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Core(_)));
        assert!(message.contains('a') && message.contains('b') && message.contains('c'));
    }

    #[test]
    fn test_unknown_profile_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"{ "project": { "name": "p" }, "workers": [ { "id": "a", "agent": "cursor" } ] }"#,
        );
        let config = Config::load(dir.path()).unwrap();
        let profiles = config.profiles().unwrap();
        assert!(config.worker_set(&profiles).is_err());
    }

    #[test]
    fn test_missing_file_and_empty_workers() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(Error::Configuration(_))
        ));

        write_config(dir.path(), r#"{ "project": { "name": "p" }, "workers": [] }"#);
        assert!(matches!(
            Config::load(dir.path()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_oversized_idle_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"{ "project": { "name": "p" }, "workers": [ { "id": "a" } ],
                 "controller": { "idle_threshold_secs": 10000000000000000 } }"#,
        );
        assert!(matches!(
            Config::load(dir.path()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_environment_variable_override() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), SARK);

        let key = "CZARINA_DAEMON__ESCALATION_THRESHOLD";
        let original = env::var(key);
        env::set_var(key, "7");

        let loaded = Config::load(dir.path());

        match original {
            Ok(value) => env::set_var(key, value),
            Err(_) => env::remove_var(key),
        }

        assert_eq!(loaded.unwrap().daemon.escalation_threshold, 7);
    }
}
