//! CLI integration tests for cprobe.
//!
//! Probe runs use a fake compiler script that "compiles" a shell script by
//! copying it, so the produced binaries are scripts the executor can run.

use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get the cprobe binary command, isolated from the user's global config.
fn cprobe(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cprobe").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("XDG_CACHE_HOME", home.join(".cache"))
        .env_remove("CC")
        .env_remove("CFLAGS")
        .env_remove("LDFLAGS")
        .env_remove("CPROBE_MANIFEST");
    cmd
}

fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

const MANIFEST: &str = r##"
[[probe]]
id = "have-widget"
code = "#!/bin/sh\nexit 0"

[[probe]]
id = "have-gadget"
code = "#!/bin/sh\n#error gadget missing"

[[probe]]
id = "widget-works"
code = "#!/bin/sh\nexit 0"
policy = "compile-and-run"
fallback = false
requires = ["have-widget"]

[[probe]]
id = "gadget-works"
code = "#!/bin/sh\nexit 0"
policy = "compile-and-run"
fallback = false
requires = ["have-gadget"]

[[probe]]
id = "mm-alignment"
code = "#!/bin/sh\necho '(size_t)8 (size_t)3 0'"
policy = "compile-run-compare"
fallback = { alignment = 4, log2 = 2, less_than_four = false }

[probe.grammar]
pattern = '\(size_t\)(?P<alignment>\d+) \(size_t\)(?P<log2>\d+) (?P<less_than_four>[01])'
fields = [
    { name = "alignment", type = "integer" },
    { name = "log2", type = "integer" },
    { name = "less_than_four", type = "boolean" },
]
"##;

fn write_project(dir: &Path) {
    fs::write(dir.join("Probes.toml"), MANIFEST).unwrap();
}

// ============================================================================
// cprobe --help / completions
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let tmp = temp_dir();
    cprobe(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("cache"))
        .stdout(predicate::str::contains("toolchain"));
}

#[test]
fn test_completions_bash() {
    let tmp = temp_dir();
    cprobe(tmp.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cprobe"));
}

// ============================================================================
// cprobe show
// ============================================================================

#[test]
fn test_show_without_manifest_fails() {
    let tmp = temp_dir();
    cprobe(tmp.path())
        .arg("show")
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Probes.toml"));
}

#[test]
fn test_show_lists_probes() {
    let tmp = temp_dir();
    write_project(tmp.path());

    cprobe(tmp.path())
        .arg("show")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("have-widget"))
        .stdout(predicate::str::contains("compile-run-compare"))
        .stdout(predicate::str::contains("requires: have-gadget"));
}

#[test]
fn test_show_source_of_one_probe() {
    let tmp = temp_dir();
    write_project(tmp.path());

    cprobe(tmp.path())
        .args(["show", "--source", "mm-alignment"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("(size_t)8"))
        .stdout(predicate::str::contains("have-widget").not());
}

#[test]
fn test_show_unknown_probe_fails() {
    let tmp = temp_dir();
    write_project(tmp.path());

    cprobe(tmp.path())
        .args(["show", "nope"])
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_invalid_manifest_is_rejected() {
    let tmp = temp_dir();
    fs::write(
        tmp.path().join("Probes.toml"),
        "[[probe]]\nid = \"x\"\ncode = \"int main(void) { return 0; }\"\npolicy = \"compile-and-run\"\n",
    )
    .unwrap();

    cprobe(tmp.path())
        .arg("show")
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("cross-compile default"));
}

// ============================================================================
// cprobe cache
// ============================================================================

#[test]
fn test_cache_path_is_project_local() {
    let tmp = temp_dir();
    cprobe(tmp.path())
        .args(["cache", "path"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(".cprobe"))
        .stdout(predicate::str::contains("facts"));
}

#[test]
fn test_cache_list_empty() {
    let tmp = temp_dir();
    cprobe(tmp.path())
        .args(["cache", "list"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("no cached facts"));
}

// ============================================================================
// cprobe run (fake compiler)
// ============================================================================

#[cfg(unix)]
mod run {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn fake_compiler(dir: &Path) -> PathBuf {
        let path = dir.join("fakecc");
        let script = r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "fakecc 1.0"; exit 0; fi
if [ "$1" = "-dumpmachine" ]; then exit 1; fi
out=""
src=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -l*|-L*|-I*|-std=*|-c|-W*|-O*|-D*) shift ;;
    *) src="$1"; shift ;;
  esac
done
if grep -q '#error' "$src"; then echo "$src: error: #error" >&2; exit 1; fi
cp "$src" "$out" && chmod +x "$out"
"#;
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn project() -> (TempDir, PathBuf) {
        let tmp = temp_dir();
        write_project(tmp.path());
        let cc = fake_compiler(tmp.path());
        (tmp, cc)
    }

    #[test]
    fn test_run_prints_facts() {
        let (tmp, cc) = project();

        cprobe(tmp.path())
            .arg("run")
            .env("CC", &cc)
            .current_dir(tmp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("have-widget = true"))
            .stdout(predicate::str::contains("have-gadget = false"))
            .stdout(predicate::str::contains("widget-works = true"))
            .stdout(predicate::str::contains("gadget-works = false"))
            .stdout(predicate::str::contains(
                "mm-alignment = {alignment: 8, less_than_four: false, log2: 3}",
            ));
    }

    #[test]
    fn test_run_json_events_and_cache() {
        let (tmp, cc) = project();

        let output = cprobe(tmp.path())
            .args(["run", "--message-format", "json"])
            .env("CC", &cc)
            .current_dir(tmp.path())
            .output()
            .unwrap();
        assert!(output.status.success());

        let events: Vec<serde_json::Value> = String::from_utf8(output.stdout)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let finished: Vec<_> = events
            .iter()
            .filter(|e| e["reason"] == "probe-finished")
            .collect();
        assert_eq!(finished.len(), 5);
        assert!(finished.iter().all(|e| e["cached"] == false));

        let skipped = finished
            .iter()
            .find(|e| e["probe"] == "gadget-works")
            .unwrap();
        assert_eq!(skipped["origin"], "skipped");

        let last = events.last().unwrap();
        assert_eq!(last["reason"], "session-finished");
        assert_eq!(last["success"], true);

        // Facts are now cached on disk
        cprobe(tmp.path())
            .args(["cache", "list"])
            .current_dir(tmp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("mm-alignment"));

        // A second run is answered from the cache
        let output = cprobe(tmp.path())
            .args(["run", "--message-format", "json"])
            .env("CC", &cc)
            .current_dir(tmp.path())
            .output()
            .unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8(output.stdout).unwrap();
        let warm: Vec<serde_json::Value> = stdout
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(!warm.iter().any(|e| e["reason"] == "probe-started"));
        let mm = warm
            .iter()
            .find(|e| e["reason"] == "probe-finished" && e["probe"] == "mm-alignment")
            .unwrap();
        assert_eq!(mm["cached"], true);
        assert_eq!(mm["value"]["alignment"], 8);

        cprobe(tmp.path())
            .args(["cache", "clean"])
            .current_dir(tmp.path())
            .assert()
            .success();
        cprobe(tmp.path())
            .args(["cache", "list"])
            .current_dir(tmp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("no cached facts"));
    }

    #[test]
    fn test_run_selected_probe_with_output_file() {
        let (tmp, cc) = project();
        let facts = tmp.path().join("facts.json");

        cprobe(tmp.path())
            .args(["run", "--no-cache", "widget-works", "--output"])
            .arg(&facts)
            .env("CC", &cc)
            .current_dir(tmp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("widget-works = true"))
            .stdout(predicate::str::contains("mm-alignment").not());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&facts).unwrap()).unwrap();
        assert_eq!(json["widget-works"]["value"], true);
        assert_eq!(json["have-widget"]["value"], true);
        assert!(json.get("mm-alignment").is_none());
        assert!(!tmp.path().join(".cprobe/cache/facts").exists());
    }

    #[test]
    fn test_toolchain_show_uses_cc() {
        let (tmp, cc) = project();

        cprobe(tmp.path())
            .args(["toolchain", "show"])
            .env("CC", &cc)
            .current_dir(tmp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("fakecc 1.0"))
            .stdout(predicate::str::contains("Fingerprint:"));
    }

    fn alive(pid: &str) -> bool {
        Command::new("kill")
            .args(["-0", pid])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn wait_for<T>(what: &str, mut poll: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            if let Some(value) = poll() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn test_interrupt_kills_running_binary_and_removes_scratch_dirs() {
        let tmp = temp_dir();
        let cc = fake_compiler(tmp.path());
        let pid_file = tmp.path().join("hang.pid");
        let scratch = tmp.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        fs::write(
            tmp.path().join("Probes.toml"),
            format!(
                "[[probe]]\nid = \"hangs\"\ncode = \"#!/bin/sh\\necho $$ > {}\\nexec sleep 4242\"\npolicy = \"compile-and-run\"\nfallback = false\n",
                pid_file.display()
            ),
        )
        .unwrap();

        let mut child = cprobe(tmp.path())
            .args(["run", "--no-cache", "--timeout", "600"])
            .env("CC", &cc)
            .env("TMPDIR", &scratch)
            .current_dir(tmp.path())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap();

        let pid = wait_for("the binary to start", || {
            fs::read_to_string(&pid_file)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        });
        assert!(alive(&pid));
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 1);

        let status = Command::new("kill")
            .args(["-INT", &child.id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let exit = wait_for("cprobe to exit", || child.try_wait().unwrap());
        assert!(!exit.success());
        assert!(!alive(&pid), "process {} outlived the session", pid);
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_cross_target_without_emulator_uses_fallbacks() {
        let (tmp, cc) = project();

        cprobe(tmp.path())
            .args(["run", "--no-cache", "--target", "riscv64gc-unknown-none-elf"])
            .env("CC", &cc)
            .current_dir(tmp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("have-widget = true"))
            .stdout(predicate::str::contains("widget-works = false"))
            .stdout(predicate::str::contains(
                "mm-alignment = {alignment: 4, less_than_four: false, log2: 2}",
            ));
    }
}
