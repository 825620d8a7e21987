//! Integration tests for devfarm

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use devfarm::cache::{read_container, write_container, CacheRecords};
    use devfarm::lock::DeviceLockManager;
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const PLATFORM_KEY: &[u8] = b"mace_opencl_precompiled_platform_info_key";

    /// Command isolated from the user's config and the shared lock dir
    fn devfarm(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("devfarm");
        cmd.env("DEVFARM_CONFIG", dir.path().join("config.toml"))
            .env("DEVFARM_LOCK_DIR", dir.path().join("locks"));
        cmd
    }

    fn write_cache(path: &Path, pairs: &[(&[u8], &[u8])]) -> PathBuf {
        let mut records = CacheRecords::new();
        for (k, v) in pairs {
            records.insert(k.to_vec(), v.to_vec());
        }
        write_container(&records, path).unwrap();
        path.to_path_buf()
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        devfarm(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Device farm glue"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        devfarm(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("devfarm"));
    }

    #[test]
    fn merge_combines_caches() {
        let dir = TempDir::new().unwrap();
        let a = write_cache(
            &dir.path().join("a.bin"),
            &[(PLATFORM_KEY, b"OpenCL 2.0"), (b"conv", b"1")],
        );
        let b = write_cache(
            &dir.path().join("b.bin"),
            &[(PLATFORM_KEY, b"OpenCL 2.0"), (b"pool", b"2")],
        );
        let out = dir.path().join("merged.bin");

        devfarm(&dir)
            .arg("merge")
            .arg("-o")
            .arg(&out)
            .arg(&a)
            .arg(&b)
            .assert()
            .success()
            .stdout(predicate::str::contains("Merged 3 records from 2 caches"));

        let merged = read_container(&out).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(b"pool"), Some(&b"2"[..]));
    }

    #[test]
    fn merge_conflicting_platform_info_fails() {
        let dir = TempDir::new().unwrap();
        let a = write_cache(&dir.path().join("a.bin"), &[(PLATFORM_KEY, b"OpenCL 2.0")]);
        let b = write_cache(&dir.path().join("b.bin"), &[(PLATFORM_KEY, b"OpenCL 1.2")]);
        let out = dir.path().join("merged.bin");

        devfarm(&dir)
            .arg("merge")
            .arg("-o")
            .arg(&out)
            .arg(&a)
            .arg(&b)
            .assert()
            .failure()
            .stderr(predicate::str::contains("More than one platform info"));

        assert!(!out.exists());
    }

    #[test]
    fn merge_from_run_dirs_skips_missing() {
        let dir = TempDir::new().unwrap();
        let run_a = dir.path().join("model_a");
        let run_b = dir.path().join("model_b");
        write_cache(&run_a.join("opencl_bin").join("cl.bin"), &[(b"k1", b"1")]);
        let out = dir.path().join("merged.bin");

        devfarm(&dir)
            .arg("merge")
            .arg("-o")
            .arg(&out)
            .args(["--from-dirs", "--file-name", "cl.bin"])
            .arg(&run_a)
            .arg(&run_b)
            .assert()
            .success()
            .stdout(predicate::str::contains("1 of 2 caches not found"));

        assert_eq!(read_container(&out).unwrap().len(), 1);
    }

    #[test]
    fn inspect_lists_records() {
        let dir = TempDir::new().unwrap();
        let cache = write_cache(
            &dir.path().join("cache.bin"),
            &[(b"conv2d_3x3", b"abcd"), (b"pooling", b"")],
        );

        devfarm(&dir)
            .arg("inspect")
            .arg(&cache)
            .assert()
            .success()
            .stdout(predicate::str::contains("Records: 2"))
            .stdout(predicate::str::contains("conv2d_3x3"))
            .stdout(predicate::str::contains("pooling"));
    }

    #[test]
    fn inspect_json_output() {
        let dir = TempDir::new().unwrap();
        let cache = write_cache(&dir.path().join("cache.bin"), &[(b"conv", b"abc")]);

        let output = devfarm(&dir)
            .arg("inspect")
            .arg(&cache)
            .args(["--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(records[0]["key"], "conv");
        assert_eq!(records[0]["size"], 3);
        // sha256("abc")
        assert_eq!(
            records[0]["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn inspect_malformed_cache_fails() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("bad.bin");
        std::fs::write(&cache, 4u64.to_le_bytes()).unwrap();

        devfarm(&dir)
            .arg("inspect")
            .arg(&cache)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Malformed binary cache"));
    }

    #[test]
    fn lock_status_reports_holder() {
        let dir = TempDir::new().unwrap();
        let locks = DeviceLockManager::new(dir.path().join("locks"), "device-lock-")
            .with_purpose("integration test");
        let _held = locks.try_acquire("dev1").unwrap().unwrap();

        let output = devfarm(&dir)
            .args(["lock", "status", "dev1", "dev2", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let states: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(states[0]["device"], "dev1");
        assert_eq!(states[0]["locked"], true);
        assert_eq!(states[0]["holder"]["pid"], std::process::id());
        assert_eq!(states[0]["holder"]["purpose"], "integration test");
        assert_eq!(states[1]["device"], "dev2");
        assert_eq!(states[1]["locked"], false);
    }

    #[test]
    fn lock_run_times_out_on_held_device() {
        let dir = TempDir::new().unwrap();
        let locks = DeviceLockManager::new(dir.path().join("locks"), "device-lock-");
        let _held = locks.try_acquire("dev1").unwrap().unwrap();

        devfarm(&dir)
            .args(["lock", "run", "dev1", "--timeout", "0.2", "--", "true"])
            .assert()
            .code(75)
            .stderr(predicate::str::contains("Timed out"));
    }

    #[test]
    fn lock_run_refuses_infinite_timeout() {
        let dir = TempDir::new().unwrap();

        devfarm(&dir)
            .args(["lock", "run", "dev1", "--timeout", "inf", "--", "true"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("finite"));
    }

    #[cfg(unix)]
    #[test]
    fn lock_run_propagates_exit_code() {
        let dir = TempDir::new().unwrap();

        devfarm(&dir)
            .args(["lock", "run", "dev1", "--", "true"])
            .assert()
            .success();

        devfarm(&dir)
            .args(["lock", "run", "dev1", "--", "false"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("exited with code 1"));

        let locks = DeviceLockManager::new(dir.path().join("locks"), "device-lock-");
        assert!(!locks.is_locked("dev1").unwrap());
    }

    #[test]
    fn config_path_follows_env() {
        let dir = TempDir::new().unwrap();
        devfarm(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let dir = TempDir::new().unwrap();
        devfarm(&dir).args(["config", "init"]).assert().success();
        assert!(dir.path().join("config.toml").exists());

        devfarm(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[lock]"))
            .stdout(predicate::str::contains("platform_info_key"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[lock]\ntimeout_secs = \"soon\"\n")
            .unwrap();

        devfarm(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn negative_config_timeout_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[lock]\ntimeout_secs = -5.0\n").unwrap();

        devfarm(&dir)
            .args(["lock", "status", "dev1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("lock.timeout_secs"));
    }

    #[test]
    fn completions_generate() {
        let dir = TempDir::new().unwrap();
        devfarm(&dir)
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("devfarm"));
    }
}
