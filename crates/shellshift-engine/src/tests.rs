use super::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::json;
use shellshift_core::{InstallConfig, InstallationTarget, OverallOutcome, ShiftError, StepSink};
use shellshift_system::{
    CommandOutput, CommandRunner, ConfigStore, InstallationLocator, JsonDocumentStore,
    MemoryStore, PackageManager, INSTALL_STEP, LOCATE_STEP,
};

fn test_dir(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("must read clock")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("shellshift-engine-{name}-{nanos}"));
    fs::create_dir_all(&dir).expect("must create test dir");
    dir
}

fn write_executable(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent dir");
    }
    fs::write(path, "binary").expect("must write executable");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .expect("must mark executable");
    }
}

fn target_in(dir: &Path) -> InstallationTarget {
    InstallationTarget::new(dir.join("PowerShell").join("7").join("pwsh.exe"), None)
}

fn fixed_target() -> InstallationTarget {
    InstallationTarget {
        root_path: PathBuf::from(r"C:\Program Files\PowerShell\7"),
        executable_path: PathBuf::from(r"C:\Program Files\PowerShell\7\pwsh.exe"),
        version: Some("7.4.6".to_string()),
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
    Sleep(Duration),
}

struct StubMutator {
    id: String,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl StubMutator {
    fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Mutator for StubMutator {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&self, _target: &InstallationTarget) -> Result<MutationOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(MutationOutput::success(format!("{} applied", self.id))),
            Behavior::Fail => Err(anyhow!("{} could not write", self.id)),
            Behavior::Panic => panic!("{} blew up", self.id),
            Behavior::Sleep(duration) => {
                thread::sleep(duration);
                Ok(MutationOutput::success("late"))
            }
        }
    }
}

struct ScriptedRunner {
    handler: Box<dyn Fn(&[String]) -> Result<CommandOutput> + Send + Sync>,
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: Command, _timeout: Duration) -> Result<CommandOutput> {
        let mut argv = vec![command.get_program().to_string_lossy().into_owned()];
        argv.extend(command.get_args().map(|arg| arg.to_string_lossy().into_owned()));
        (self.handler)(&argv)
    }
}

#[test]
fn prioritize_path_entry_is_idempotent_for_any_duplicate_count() {
    let dir = r"C:\Program Files\PowerShell\7";
    let inputs = [
        String::new(),
        r"C:\Windows\system32;C:\Windows".to_string(),
        format!(r"C:\Windows;{dir}"),
        format!(r"{dir}\;C:\Windows;{dir};c:\program files\powershell\7"),
        format!(r";;C:\Tools; {dir} ;;C:\Windows;{dir}\\;"),
    ];

    for input in inputs {
        let once = prioritize_path_entry(&input, dir);
        let twice = prioritize_path_entry(&once, dir);
        assert_eq!(once, twice, "input: {input}");
        assert!(once.starts_with(dir));
        let occurrences = once
            .split(';')
            .filter(|entry| same_directory(entry, dir))
            .count();
        assert_eq!(occurrences, 1, "input: {input}");
        assert!(!once.split(';').any(str::is_empty));
    }
}

#[test]
fn prioritize_path_entry_keeps_other_entries_in_order() {
    let updated = prioritize_path_entry(r"C:\A;C:\Pwsh\;C:\B;C:\PwshOld", r"C:\Pwsh");
    assert_eq!(updated, r"C:\Pwsh;C:\A;C:\B;C:\PwshOld");
}

#[test]
fn same_directory_ignores_case_and_trailing_separators() {
    assert!(same_directory(r"C:\Program Files\PowerShell\7\", r"c:\program files\powershell\7"));
    assert!(same_directory("C:/Tools/", r"C:\Tools"));
    assert!(!same_directory(r"C:\Tools\7", r"C:\Tools"));
}

#[test]
fn path_mutator_writes_once_then_skips() {
    let key = r"HKLM\Env::Path";
    let store = Arc::new(MemoryStore::new("path").with_value(
        key,
        r"%SystemRoot%\system32;C:\Program Files\PowerShell\7\;C:\Tools",
    ));
    let mutator = PathMutator::new(store.clone(), key);
    let target = fixed_target();

    let first = mutator.apply(&target).expect("must apply");
    assert!(first.outcome.is_success());
    assert_eq!(
        store.value(key).as_deref(),
        Some(r"C:\Program Files\PowerShell\7;%SystemRoot%\system32;C:\Tools")
    );

    let second = mutator.apply(&target).expect("must apply again");
    assert!(second.outcome.is_skipped());
    assert_eq!(store.writes().len(), 1);
}

#[test]
fn path_mutator_failure_carries_store_context() {
    let store = Arc::new(MemoryStore::absent("path"));
    let mutator = PathMutator::new(store, "Path");
    let err = mutator.apply(&fixed_target()).expect_err("must fail");
    let message = format!("{err:#}");
    assert!(message.contains("failed to write PATH to memory:path"));
    assert!(message.contains("does not exist"));
}

#[test]
fn association_mutator_records_previous_handler_and_is_idempotent() {
    let config = shellshift_core::AssociationConfig::default();
    let store = Arc::new(
        MemoryStore::new("registry")
            .with_value(
                &config.command_key,
                r#""C:\Windows\System32\notepad.exe" "%1""#,
            )
            .with_value(&config.extension_key, "Microsoft.PowerShellScript.1"),
    );
    let mutator = FileAssociationMutator::new(store.clone(), &config);
    let target = fixed_target();

    let first = mutator.apply(&target).expect("must apply");
    assert!(first.outcome.is_success());
    assert!(first.detail.contains("notepad.exe"));
    assert_eq!(
        store.value(&config.command_key).as_deref(),
        Some(r#""C:\Program Files\PowerShell\7\pwsh.exe" -File "%1""#)
    );
    assert_eq!(store.writes().len(), 1);

    let second = mutator.apply(&target).expect("must apply again");
    assert!(second.outcome.is_skipped());
    assert_eq!(store.writes().len(), 1);
}

#[test]
fn association_mutator_maps_missing_extension() {
    let config = shellshift_core::AssociationConfig::default();
    let store = Arc::new(MemoryStore::new("registry"));
    let mutator = FileAssociationMutator::new(store.clone(), &config);

    let output = mutator.apply(&fixed_target()).expect("must apply");
    assert!(output.outcome.is_success());
    assert!(output.detail.contains("previous handler: <none>"));
    assert_eq!(
        store.value(&config.extension_key).as_deref(),
        Some("Microsoft.PowerShellScript.1")
    );
}

#[test]
fn association_mutator_restores_open_command_when_mapping_write_fails() {
    let config = shellshift_core::AssociationConfig::default();
    let notepad = r#""C:\Windows\System32\notepad.exe" "%1""#;
    let store = Arc::new(
        MemoryStore::new("registry")
            .with_value(&config.command_key, notepad)
            .with_value(&config.extension_key, "txtfile")
            .with_read_only(&config.extension_key),
    );
    let mutator = FileAssociationMutator::new(store.clone(), &config);

    let err = mutator
        .apply(&fixed_target())
        .err()
        .expect("mapping write must fail");
    assert!(format!("{err:#}").contains("access denied"));
    assert_eq!(store.value(&config.command_key).as_deref(), Some(notepad));
    assert_eq!(store.value(&config.extension_key).as_deref(), Some("txtfile"));
    let writes = store.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1], (config.command_key.clone(), notepad.to_string()));
}

#[test]
fn alias_mutator_writes_shim_then_skips() {
    let dir = test_dir("alias");
    let mutator = DefaultAliasMutator::new(&dir, "powershell");
    let target = target_in(&dir);

    let first = mutator.apply(&target).expect("must apply");
    assert!(first.outcome.is_success());
    let shim = fs::read_to_string(dir.join("powershell.cmd")).expect("must read shim");
    assert_eq!(shim, render_alias_shim(&target.executable_path));
    assert!(shim.starts_with("@echo off\r\n\""));
    assert!(shim.ends_with("\" %*\r\n"));

    let second = mutator.apply(&target).expect("must apply again");
    assert!(second.outcome.is_skipped());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn alias_mutator_replaces_stale_shim() {
    let dir = test_dir("alias-stale");
    fs::write(dir.join("powershell.cmd"), "@echo off\r\n\"C:\\old\\pwsh.exe\" %*\r\n")
        .expect("must write stale shim");

    let output = DefaultAliasMutator::new(&dir, "powershell")
        .apply(&target_in(&dir))
        .expect("must apply");
    assert!(output.outcome.is_success());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn terminal_mutator_skips_absent_settings() {
    let mutator = TerminalProfileMutator::new(Arc::new(MemoryStore::absent("terminal")), None);
    let output = mutator.apply(&fixed_target()).expect("must apply");
    assert!(output.outcome.is_skipped());
}

#[test]
fn terminal_mutator_fails_without_matching_profile() {
    let profiles = json!({"list": [{"guid": "{a}", "name": "Command Prompt"}]}).to_string();
    let store = Arc::new(MemoryStore::new("terminal").with_value("profiles", &profiles));
    let mutator = TerminalProfileMutator::new(store, None);

    let err = mutator.apply(&fixed_target()).expect_err("must fail");
    assert!(err.to_string().contains("PowerShell 7 profile not found"));
}

#[test]
fn terminal_mutator_sets_default_once() {
    let profiles = json!({"list": [
        {"guid": "{cmd}", "name": "Command Prompt"},
        {"guid": "{pwsh}", "name": "PowerShell", "source": POWERSHELL_CORE_SOURCE}
    ]})
    .to_string();
    let store = Arc::new(
        MemoryStore::new("terminal")
            .with_value("profiles", &profiles)
            .with_value("defaultProfile", "{cmd}"),
    );
    let mutator = TerminalProfileMutator::new(store.clone(), None);

    let first = mutator.apply(&fixed_target()).expect("must apply");
    assert!(first.outcome.is_success());
    assert_eq!(store.value("defaultProfile").as_deref(), Some("{pwsh}"));

    let second = mutator.apply(&fixed_target()).expect("must apply again");
    assert!(second.outcome.is_skipped());
    assert_eq!(store.writes().len(), 1);
}

#[test]
fn terminal_mutator_prefers_configured_guid() {
    let store = Arc::new(MemoryStore::new("terminal"));
    let mutator = TerminalProfileMutator::new(store.clone(), Some("{explicit}".to_string()));
    let output = mutator.apply(&fixed_target()).expect("must apply");
    assert!(output.outcome.is_success());
    assert_eq!(store.value("defaultProfile").as_deref(), Some("{explicit}"));
}

#[test]
fn find_profile_guid_matches_name_or_source() {
    let by_name = json!({"list": [{"guid": "{x}", "name": "PowerShell 7"}]});
    assert_eq!(find_profile_guid(&by_name).as_deref(), Some("{x}"));

    let legacy = json!([{"guid": "{y}", "name": "Windows PowerShell"}, {"guid": "{z}", "source": POWERSHELL_CORE_SOURCE}]);
    assert_eq!(find_profile_guid(&legacy).as_deref(), Some("{z}"));

    assert_eq!(find_profile_guid(&json!({"defaults": {}})), None);
}

#[test]
fn terminal_mutator_preserves_other_settings_on_disk() {
    let dir = test_dir("terminal-file");
    let path = dir.join("settings.json");
    fs::write(
        &path,
        r#"{
    "defaultProfile": "{cmd}",
    "theme": "dark",
    "profiles": {
        "defaults": {"font": {"face": "Cascadia Mono"}},
        "list": [
            {"guid": "{cmd}", "name": "Command Prompt"},
            {"guid": "{pwsh}", "name": "PowerShell 7"}
        ]
    }
}"#,
    )
    .expect("must write settings");

    let mutator = TerminalProfileMutator::new(Arc::new(JsonDocumentStore::new(&path)), None);
    let output = mutator.apply(&fixed_target()).expect("must apply");
    assert!(output.outcome.is_success());

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("must read back"))
            .expect("must parse");
    assert_eq!(saved["defaultProfile"], "{pwsh}");
    assert_eq!(saved["theme"], "dark");
    assert_eq!(saved["profiles"]["defaults"]["font"]["face"], "Cascadia Mono");
    assert_eq!(saved["profiles"]["list"].as_array().map(Vec::len), Some(2));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn demotion_twice_renames_then_skips_without_touching_files() {
    let dir = test_dir("demotion");
    fs::write(dir.join("powershell.exe"), "ps51").expect("must write old runtime");
    let mutator = DemotionMutator::new(&dir, "powershell.exe", "powershell_v51_backup.exe");

    let first = mutator.apply(&fixed_target()).expect("must apply");
    assert!(first.outcome.is_success());
    let record = first.demotion.expect("must report demotion");
    assert!(!record.already_demoted);
    assert!(!dir.join("powershell.exe").exists());
    assert_eq!(
        fs::read_to_string(dir.join("powershell_v51_backup.exe")).expect("must read backup"),
        "ps51"
    );

    let listing_before: Vec<_> = fs::read_dir(&dir)
        .expect("must list")
        .map(|entry| entry.expect("must read entry").file_name())
        .collect();
    let second = mutator.apply(&fixed_target()).expect("must apply again");
    assert!(second.outcome.is_skipped());
    assert!(second
        .outcome
        .reason()
        .expect("must carry reason")
        .contains("already demoted"));
    assert!(second.demotion.expect("must stay restorable").already_demoted);
    let listing_after: Vec<_> = fs::read_dir(&dir)
        .expect("must list")
        .map(|entry| entry.expect("must read entry").file_name())
        .collect();
    assert_eq!(listing_before, listing_after);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn demotion_without_original_or_backup_skips_without_restoration() {
    let dir = test_dir("demotion-missing");
    let mutator = DemotionMutator::new(&dir, "powershell.exe", "powershell_v51_backup.exe");
    let output = mutator.apply(&fixed_target()).expect("must apply");
    assert!(output.outcome.is_skipped());
    assert!(output.demotion.is_none());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn batch_with_one_failure_records_all_three() {
    let p1 = StubMutator::new("p1", Behavior::Succeed);
    let p2 = StubMutator::new("p2", Behavior::Fail);
    let p3 = StubMutator::new("p3", Behavior::Succeed);
    let batch: Vec<Arc<dyn Mutator>> = vec![p1.clone(), p2.clone(), p3.clone()];
    let sink = ReportSink::new();

    let outcomes = run_parallel_batch(&batch, &fixed_target(), Duration::from_secs(10), &sink);

    assert_eq!(outcomes.len(), 3);
    let records = sink.snapshot();
    let mut names: Vec<&str> = records.iter().map(|record| record.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["p1", "p2", "p3"]);
    for record in &records {
        assert_eq!(record.outcome.is_failure(), record.name == "p2");
    }
    assert_eq!(p1.calls() + p2.calls() + p3.calls(), 3);

    let failed = outcomes
        .iter()
        .find(|outcome| outcome.id == "p2")
        .expect("must report p2");
    assert!(matches!(
        failed.error,
        Some(ShiftError::OptionalMutationFailed { .. })
    ));
}

#[test]
fn batch_panic_is_recorded_as_failure() {
    let batch: Vec<Arc<dyn Mutator>> = vec![
        StubMutator::new("steady", Behavior::Succeed),
        StubMutator::new("explodes", Behavior::Panic),
    ];
    let sink = ReportSink::new();

    run_parallel_batch(&batch, &fixed_target(), Duration::from_secs(10), &sink);

    let records = sink.snapshot();
    assert_eq!(records.len(), 2);
    let panicked = records
        .iter()
        .find(|record| record.name == "explodes")
        .expect("must record panicking mutator");
    assert!(panicked
        .outcome
        .reason()
        .expect("must carry reason")
        .contains("explodes blew up"));
}

#[test]
fn batch_timeout_marks_slow_mutator_failed_and_keeps_others() {
    let batch: Vec<Arc<dyn Mutator>> = vec![
        StubMutator::new("fast", Behavior::Succeed),
        StubMutator::new("slow", Behavior::Sleep(Duration::from_secs(5))),
    ];
    let sink = ReportSink::new();

    let outcomes = run_parallel_batch(&batch, &fixed_target(), Duration::from_millis(200), &sink);

    assert_eq!(outcomes.len(), 2);
    let slow = outcomes
        .iter()
        .find(|outcome| outcome.id == "slow")
        .expect("must report slow");
    assert!(slow.outcome.is_failure());
    assert!(matches!(slow.error, Some(ShiftError::MutatorTimedOut { .. })));
    assert_eq!(
        slow.outcome.reason(),
        Some("step 'slow' timed out after 200ms")
    );
    let fast = outcomes
        .iter()
        .find(|outcome| outcome.id == "fast")
        .expect("must report fast");
    assert!(fast.outcome.is_success());
    assert_eq!(sink.len(), 2);
}

#[test]
fn restore_script_embeds_escaped_absolute_paths_and_guard() {
    let script = render_restore_script(
        Path::new(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe"),
        Path::new(r"C:\Users\O'Brien\powershell_v51_backup.exe"),
    );
    assert!(script.contains(r"$backup = 'C:\Users\O''Brien\powershell_v51_backup.exe'"));
    assert!(script.contains(r"$original = 'C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe'"));
    assert!(script.contains("if (-not (Test-Path -LiteralPath $backup))"));
    assert!(script.contains("if (Test-Path -LiteralPath $original)"));
    assert!(script.contains("Move-Item -LiteralPath $backup -Destination $original"));
    assert!(!script.contains("Remove-Item"));
}

#[test]
fn restoration_artifacts_write_script_and_plan() {
    let dir = test_dir("restoration-artifacts");
    let demotion = DemotionRecord {
        original_path: dir.join("powershell.exe"),
        backup_path: dir.join("powershell_v51_backup.exe"),
        already_demoted: false,
    };
    let script_path = dir.join("out").join("restore_powershell51.ps1");
    let sink = ReportSink::new();

    let plan = generate_restoration(&script_path, &demotion, &sink).expect("must generate");

    let script = fs::read(&script_path).expect("must read script");
    assert_eq!(plan.script_sha256, sha256_hex(&script));
    assert_eq!(plan.old_runtime_backup_path, demotion.backup_path);

    let loaded = load_plan(&plan_path_for(&script_path)).expect("must load plan");
    assert_eq!(loaded, plan);

    let records = sink.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, RESTORATION_STEP);
    assert!(records[0].outcome.is_success());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn restoration_notes_a_backup_left_by_an_earlier_run() {
    let dir = test_dir("restoration-earlier");
    let demotion = DemotionRecord {
        original_path: dir.join("powershell.exe"),
        backup_path: dir.join("powershell_v51_backup.exe"),
        already_demoted: true,
    };
    let sink = ReportSink::new();

    generate_restoration(&dir.join("restore.ps1"), &demotion, &sink).expect("must generate");

    let records = sink.snapshot();
    assert!(records[0].detail.ends_with("; backup predates this run"));

    let _ = fs::remove_dir_all(&dir);
}

fn pwsh_available() -> bool {
    Command::new("pwsh")
        .args(["-NoProfile", "-NonInteractive", "-Command", "exit 0"])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn run_script_with_pwsh(script: &Path) -> std::process::Output {
    Command::new("pwsh")
        .args(["-NoProfile", "-NonInteractive", "-File"])
        .arg(script)
        .output()
        .expect("must launch pwsh")
}

#[test]
fn generated_restore_script_runs_under_pwsh() {
    if !pwsh_available() {
        eprintln!("pwsh not installed; skipping script execution");
        return;
    }
    let dir = test_dir("restore-script-pwsh");
    let demotion = DemotionRecord {
        original_path: dir.join("powershell.exe"),
        backup_path: dir.join("powershell_v51_backup.exe"),
        already_demoted: false,
    };
    let script = dir.join("restore_powershell51.ps1");
    write_restoration_artifacts(&script, &demotion).expect("must write artifacts");

    fs::write(&demotion.backup_path, "ps51").expect("must write backup");
    let restored = run_script_with_pwsh(&script);
    assert!(restored.status.success(), "{restored:?}");
    assert_eq!(
        fs::read_to_string(&demotion.original_path).expect("must restore original"),
        "ps51"
    );
    assert!(!demotion.backup_path.exists());

    fs::remove_file(&demotion.original_path).expect("must clear original");
    let idle = run_script_with_pwsh(&script);
    assert!(idle.status.success(), "{idle:?}");
    assert!(!demotion.original_path.exists());
    assert!(!demotion.backup_path.exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn restoration_write_failure_is_recorded() {
    let dir = test_dir("restoration-fail");
    let blocker = dir.join("blocker");
    fs::write(&blocker, "file").expect("must write blocker");
    let demotion = DemotionRecord {
        original_path: dir.join("powershell.exe"),
        backup_path: dir.join("powershell_v51_backup.exe"),
        already_demoted: true,
    };
    let sink = ReportSink::new();

    let err = generate_restoration(&blocker.join("restore.ps1"), &demotion, &sink)
        .expect_err("must fail under a file");
    assert!(matches!(err, ShiftError::RestorationWriteFailed { .. }));
    assert!(sink.snapshot()[0].outcome.is_failure());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn restore_with_only_backup_moves_it_back() {
    let dir = test_dir("restore-backup");
    let original = dir.join("powershell.exe");
    let backup = dir.join("powershell_v51_backup.exe");
    fs::write(&backup, "ps51").expect("must write backup");

    let outcome = restore_old_runtime(&original, &backup).expect("must restore");
    assert_eq!(outcome, RestoreOutcome::Restored);
    assert!(original.exists());
    assert!(!backup.exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn restore_without_backup_is_a_no_op() {
    let dir = test_dir("restore-missing");
    let original = dir.join("powershell.exe");
    let backup = dir.join("powershell_v51_backup.exe");

    let outcome = restore_old_runtime(&original, &backup).expect("must not error");
    assert_eq!(outcome, RestoreOutcome::BackupMissing);
    assert!(!original.exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn restore_does_not_clobber_existing_original() {
    let dir = test_dir("restore-both");
    let original = dir.join("powershell.exe");
    let backup = dir.join("powershell_v51_backup.exe");
    fs::write(&original, "new").expect("must write original");
    fs::write(&backup, "old").expect("must write backup");

    let outcome = restore_old_runtime(&original, &backup).expect("must not error");
    assert_eq!(outcome, RestoreOutcome::OriginalPresent);
    assert_eq!(fs::read_to_string(&original).expect("must read"), "new");
    assert!(backup.exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unsealed_sink_flushes_on_drop() {
    let dir = test_dir("sink-drop");
    let report_path = dir.join("report.txt");
    {
        let sink = ReportSink::with_flush_path(&report_path);
        assert!(sink.is_empty());
        sink.record(shellshift_core::StepRecord::finish(
            "partial",
            chrono::Local::now(),
            shellshift_core::StepOutcome::Success,
            "",
        ));
    }
    let text = fs::read_to_string(&report_path).expect("must flush on drop");
    assert!(text.contains("SUCCESS: partial"));

    let sealed_path = dir.join("sealed.txt");
    let sink = ReportSink::with_flush_path(&sealed_path);
    let report = sink.seal(None, OverallOutcome::Success);
    assert!(report.records.is_empty());
    assert!(!sealed_path.exists());

    let _ = fs::remove_dir_all(&dir);
}

struct Fixture {
    dir: PathBuf,
    exe: PathBuf,
    alias_dir: PathBuf,
    demotion_dir: PathBuf,
    path_store: Arc<MemoryStore>,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let dir = test_dir(name);
        let exe = dir.join("PowerShell").join("7").join("pwsh.exe");
        write_executable(&exe);
        let alias_dir = dir.join("System32");
        fs::create_dir_all(&alias_dir).expect("must create alias dir");
        let demotion_dir = dir.join("WindowsPowerShell").join("v1.0");
        fs::create_dir_all(&demotion_dir).expect("must create demotion dir");
        fs::write(demotion_dir.join("powershell.exe"), "ps51").expect("must write old runtime");
        let path_store = Arc::new(MemoryStore::new("path").with_value("Path", r"C:\Windows"));
        Self {
            dir,
            exe,
            alias_dir,
            demotion_dir,
            path_store,
        }
    }

    fn orchestrator(&self, batch: Vec<Arc<dyn Mutator>>) -> Orchestrator {
        let locator = InstallationLocator::new(vec![self.dir.join("missing.exe"), self.exe.clone()]);
        let mut orchestrator = Orchestrator::new(locator, self.dir.join("restore_powershell51.ps1"))
            .with_mutator_timeout(Duration::from_secs(10))
            .with_batch_mutator(Arc::new(PathMutator::new(self.path_store.clone(), "Path")))
            .with_batch_mutator(Arc::new(DefaultAliasMutator::new(&self.alias_dir, "powershell")))
            .with_demotion(self.demotion());
        for mutator in batch {
            orchestrator = orchestrator.with_batch_mutator(mutator);
        }
        orchestrator
    }

    fn demotion(&self) -> Arc<dyn Mutator> {
        Arc::new(DemotionMutator::new(
            &self.demotion_dir,
            "powershell.exe",
            "powershell_v51_backup.exe",
        ))
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

#[test]
fn full_run_succeeds_and_writes_restoration() {
    let fixture = Fixture::new("run-success");
    let batch: Vec<Arc<dyn Mutator>> = vec![
        Arc::new(FileAssociationMutator::new(
            Arc::new(MemoryStore::new("registry")),
            &shellshift_core::AssociationConfig::default(),
        )),
        Arc::new(TerminalProfileMutator::new(
            Arc::new(MemoryStore::absent("terminal")),
            None,
        )),
    ];
    let orchestrator = fixture.orchestrator(batch);

    let summary = orchestrator.run(ReportSink::new());

    assert_eq!(summary.outcome(), OverallOutcome::Success);
    assert_eq!(summary.exit_code(), 0);
    assert!(summary.errors.is_empty());
    assert_eq!(
        summary.states,
        vec![
            RunState::Start,
            RunState::Provisioning,
            RunState::Locating,
            RunState::PrerequisitesRunning,
            RunState::ParallelBatchRunning,
            RunState::Demoting,
            RunState::RestorationPending,
            RunState::Reporting,
            RunState::Done(OverallOutcome::Success),
        ]
    );

    let report = &summary.report;
    assert_eq!(report.records.len(), 8);
    assert_eq!(report.records[0].name, INSTALL_STEP);
    assert!(report.records[0].outcome.is_skipped());
    assert_eq!(report.records[1].name, LOCATE_STEP);
    let mut batch_names: Vec<&str> = report.records[2..6]
        .iter()
        .map(|record| record.name.as_str())
        .collect();
    batch_names.sort_unstable();
    assert_eq!(
        batch_names,
        vec![ALIAS_STEP, ASSOCIATION_STEP, PATH_STEP, TERMINAL_STEP]
    );
    assert_eq!(report.records[6].name, DEMOTION_STEP);
    assert_eq!(report.records[7].name, RESTORATION_STEP);
    assert_eq!(report.runtime_path.as_deref(), Some(fixture.exe.as_path()));

    let plan = summary.restoration.expect("must produce restoration plan");
    assert!(plan.generated_script_path.exists());
    assert!(fixture.demotion_dir.join("powershell_v51_backup.exe").exists());
    assert!(fixture
        .path_store
        .value("Path")
        .expect("must write PATH")
        .starts_with(&fixture.exe.parent().expect("must have parent").display().to_string()));
}

#[test]
fn batch_failure_is_partial_success_and_still_restores() {
    let fixture = Fixture::new("run-partial");
    let batch: Vec<Arc<dyn Mutator>> = vec![
        StubMutator::new("p1", Behavior::Succeed),
        StubMutator::new("p2", Behavior::Fail),
    ];
    let orchestrator = fixture.orchestrator(batch);

    let summary = orchestrator.run(ReportSink::new());

    assert_eq!(summary.outcome(), OverallOutcome::PartialSuccess);
    assert_eq!(summary.exit_code(), 0);
    assert!(summary.report.record("p2").expect("must record p2").outcome.is_failure());
    assert!(summary
        .report
        .record(RESTORATION_STEP)
        .expect("must reach restoration")
        .outcome
        .is_success());
    assert_eq!(summary.errors.len(), 1);
}

#[test]
fn locator_failure_records_no_mutators() {
    let dir = test_dir("run-not-found");
    let p1 = StubMutator::new("p1", Behavior::Succeed);
    let prerequisite = StubMutator::new("pre", Behavior::Succeed);
    let orchestrator = Orchestrator::new(
        InstallationLocator::new(vec![dir.join("a.exe"), dir.join("b.exe")]),
        dir.join("restore.ps1"),
    )
    .with_prerequisite(prerequisite.clone())
    .with_batch_mutator(p1.clone());

    let summary = orchestrator.run(ReportSink::new());

    assert_eq!(summary.outcome(), OverallOutcome::Failure);
    assert_ne!(summary.exit_code(), 0);
    let names: Vec<&str> = summary
        .report
        .records
        .iter()
        .map(|record| record.name.as_str())
        .collect();
    assert_eq!(names, vec![INSTALL_STEP, LOCATE_STEP]);
    assert_eq!(p1.calls() + prerequisite.calls(), 0);
    assert!(matches!(
        summary.errors.as_slice(),
        [ShiftError::InstallationNotFound { .. }]
    ));
    assert_eq!(summary.states.last(), Some(&RunState::Done(OverallOutcome::Failure)));
    assert!(!dir.join("restore.ps1").exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn prerequisite_failure_aborts_before_batch() {
    let fixture = Fixture::new("run-prereq");
    let batch_mutator = StubMutator::new("p1", Behavior::Succeed);
    let failing = StubMutator::new("pre-fail", Behavior::Fail);
    let orchestrator = Orchestrator::new(
        InstallationLocator::new(vec![fixture.exe.clone()]),
        fixture.dir.join("restore.ps1"),
    )
    .with_prerequisite(failing)
    .with_batch_mutator(batch_mutator.clone());

    let summary = orchestrator.run(ReportSink::new());

    assert_eq!(summary.outcome(), OverallOutcome::Failure);
    assert_eq!(batch_mutator.calls(), 0);
    assert!(summary.report.record("p1").is_none());
    assert!(matches!(
        summary.errors.as_slice(),
        [ShiftError::PrerequisiteMutationFailed { .. }]
    ));
    assert!(!summary.states.contains(&RunState::ParallelBatchRunning));
    assert!(summary.states.contains(&RunState::Reporting));
}

#[test]
fn provisioning_failure_stops_before_locating() {
    let fixture = Fixture::new("run-provision");
    let runner = Arc::new(ScriptedRunner {
        handler: Box::new(|argv| {
            if argv.get(1).map(String::as_str) == Some("--version") {
                return Ok(CommandOutput {
                    code: Some(0),
                    success: true,
                    stdout: "v1.9".to_string(),
                    ..CommandOutput::default()
                });
            }
            Ok(CommandOutput {
                code: Some(1),
                success: false,
                stdout: "Installer failed with exit code 1603".to_string(),
                ..CommandOutput::default()
            })
        }),
    });
    let orchestrator = fixture
        .orchestrator(Vec::new())
        .with_package_manager(PackageManager::from_config(&InstallConfig::default(), runner));

    let summary = orchestrator.run(ReportSink::new());

    assert_eq!(summary.outcome(), OverallOutcome::Failure);
    assert_eq!(summary.report.records.len(), 1);
    assert!(summary.report.records[0].outcome.is_failure());
    assert!(summary.target.is_none());
    assert!(fixture.demotion_dir.join("powershell.exe").exists());
}

fn windows_lookup(name: &str) -> Option<String> {
    match name {
        "SystemRoot" => Some(r"C:\Windows".to_string()),
        "ProgramFiles" => Some(r"C:\Program Files".to_string()),
        "LOCALAPPDATA" => Some(r"C:\Users\me\AppData\Local".to_string()),
        _ => None,
    }
}

fn idle_runner() -> Arc<ScriptedRunner> {
    Arc::new(ScriptedRunner {
        handler: Box::new(|_| Err(anyhow!("no commands in this test"))),
    })
}

const PATH_QUERY: &str = "\r\nHKEY_LOCAL_MACHINE\\SYSTEM\\CurrentControlSet\\Control\\Session Manager\\Environment\r\n    Path    REG_EXPAND_SZ    %SystemRoot%\\system32;C:\\Tools\r\n\r\n";
const NOT_FOUND: &str = "ERROR: The system was unable to find the specified registry key or value.";

/// Answers `reg query`/`reg add` like an empty registry holding only PATH;
/// writes to PATH fail when `deny_path_write` is set.
fn registry_runner(deny_path_write: bool) -> Arc<ScriptedRunner> {
    Arc::new(ScriptedRunner {
        handler: Box::new(move |argv| {
            let touches_path = argv.iter().any(|arg| arg == "Path");
            match argv.get(1).map(String::as_str) {
                Some("query") if touches_path => Ok(CommandOutput {
                    code: Some(0),
                    success: true,
                    stdout: PATH_QUERY.to_string(),
                    ..CommandOutput::default()
                }),
                Some("query") => Ok(CommandOutput {
                    code: Some(1),
                    success: false,
                    stderr: NOT_FOUND.to_string(),
                    ..CommandOutput::default()
                }),
                Some("add") if touches_path && deny_path_write => Ok(CommandOutput {
                    code: Some(1),
                    success: false,
                    stderr: "ERROR: Access is denied.".to_string(),
                    ..CommandOutput::default()
                }),
                Some("add") => Ok(CommandOutput {
                    code: Some(0),
                    success: true,
                    stdout: "The operation completed successfully.".to_string(),
                    ..CommandOutput::default()
                }),
                _ => Err(anyhow!("unexpected command: {argv:?}")),
            }
        }),
    })
}

/// A config whose every location lives under the fixture directory.
fn sandboxed_config(fixture: &Fixture) -> shellshift_core::ShiftConfig {
    let mut config = shellshift_core::ShiftConfig::default();
    config.install.enabled = false;
    config.locator.candidates = vec![fixture.exe.display().to_string()];
    config.locator.probe_version = false;
    config.alias.directory = fixture.alias_dir.display().to_string();
    config.terminal.settings_path = fixture.dir.join("settings.json").display().to_string();
    config.demotion.directory = fixture.demotion_dir.display().to_string();
    config.output.restore_script_path =
        fixture.dir.join("restore_powershell51.ps1").display().to_string();
    config
}

#[test]
fn from_config_runs_every_configuration_step_in_the_batch() {
    let mut config = shellshift_core::ShiftConfig::default();
    config.install.enabled = false;

    let orchestrator = Orchestrator::from_config(&config, windows_lookup, idle_runner(), false)
        .expect("must assemble from defaults");
    assert!(orchestrator.prerequisite_names().is_empty());
    assert_eq!(
        orchestrator.batch_names(),
        vec![PATH_STEP, ASSOCIATION_STEP, ALIAS_STEP, TERMINAL_STEP]
    );
}

#[test]
fn from_config_promotes_listed_prerequisites_in_listed_order() {
    let mut config = shellshift_core::ShiftConfig::default();
    config.prerequisite_steps = vec![ALIAS_STEP.to_string(), PATH_STEP.to_string()];

    let orchestrator = Orchestrator::from_config(&config, windows_lookup, idle_runner(), true)
        .expect("must assemble");
    assert_eq!(orchestrator.prerequisite_names(), vec![ALIAS_STEP, PATH_STEP]);
    assert_eq!(
        orchestrator.batch_names(),
        vec![ASSOCIATION_STEP, TERMINAL_STEP]
    );

    config.prerequisite_steps = vec![DEMOTION_STEP.to_string()];
    assert!(Orchestrator::from_config(&config, windows_lookup, idle_runner(), true).is_err());
    config.prerequisite_steps = vec!["reboot".to_string()];
    let err = Orchestrator::from_config(&config, windows_lookup, idle_runner(), true)
        .err()
        .expect("unknown step must be rejected");
    assert!(err.to_string().contains("reboot"));
}

#[test]
fn path_write_failure_leaves_other_steps_running() {
    let fixture = Fixture::new("run-path-denied");
    let config = sandboxed_config(&fixture);

    let orchestrator = Orchestrator::from_config(
        &config,
        |_: &str| None,
        registry_runner(true),
        false,
    )
    .expect("must assemble");
    let summary = orchestrator.run(ReportSink::new());

    assert_eq!(summary.outcome(), OverallOutcome::PartialSuccess);
    assert_eq!(summary.exit_code(), 0);
    let report = &summary.report;
    assert_eq!(report.records.len(), 8);
    let path = report.record(PATH_STEP).expect("must record PATH");
    assert!(path
        .outcome
        .reason()
        .expect("must carry reason")
        .contains("Access is denied"));
    assert!(report
        .record(ASSOCIATION_STEP)
        .expect("must record association")
        .outcome
        .is_success());
    assert!(report
        .record(ALIAS_STEP)
        .expect("must record alias")
        .outcome
        .is_success());
    assert!(report
        .record(TERMINAL_STEP)
        .expect("must record terminal")
        .outcome
        .is_skipped());
    assert!(report
        .record(DEMOTION_STEP)
        .expect("must record demotion")
        .outcome
        .is_success());
    assert!(report
        .record(RESTORATION_STEP)
        .expect("must write restoration")
        .outcome
        .is_success());
    assert!(matches!(
        summary.errors.as_slice(),
        [ShiftError::OptionalMutationFailed { name, .. }] if name == PATH_STEP
    ));
    assert!(fixture.alias_dir.join("powershell.cmd").exists());
}

#[test]
fn unset_variables_become_step_outcomes_and_the_run_still_reports() {
    let fixture = Fixture::new("run-unset-vars");
    let mut config = sandboxed_config(&fixture);
    config.alias.directory = r"%SystemRoot%\System32".to_string();
    config.terminal.settings_path = r"%LOCALAPPDATA%\settings.json".to_string();
    config.demotion.directory = r"%SystemRoot%\System32\WindowsPowerShell\v1.0".to_string();

    let orchestrator = Orchestrator::from_config(
        &config,
        |_: &str| None,
        registry_runner(false),
        false,
    )
    .expect("unset variables must not fail assembly");
    let summary = orchestrator.run(ReportSink::new());

    assert_eq!(summary.outcome(), OverallOutcome::PartialSuccess);
    let report = &summary.report;
    assert_eq!(report.records.len(), 7);
    let alias = report.record(ALIAS_STEP).expect("must record alias");
    assert!(alias
        .outcome
        .reason()
        .expect("must carry reason")
        .contains("'SystemRoot' is not set"));
    assert!(report
        .record(TERMINAL_STEP)
        .expect("must record terminal")
        .outcome
        .is_skipped());
    assert!(report
        .record(DEMOTION_STEP)
        .expect("must record demotion")
        .outcome
        .is_failure());
    assert!(report.record(RESTORATION_STEP).is_none());
    assert!(!summary.states.contains(&RunState::RestorationPending));
    assert!(report
        .record(PATH_STEP)
        .expect("must record PATH")
        .outcome
        .is_success());
}

#[test]
fn unresolved_restore_script_path_fails_only_the_restoration_step() {
    let fixture = Fixture::new("run-unset-script");
    let mut config = sandboxed_config(&fixture);
    config.output.restore_script_path = r"%OUTPUT_DIR%\restore_powershell51.ps1".to_string();

    let orchestrator = Orchestrator::from_config(
        &config,
        |_: &str| None,
        registry_runner(false),
        false,
    )
    .expect("must assemble");
    let summary = orchestrator.run(ReportSink::new());

    assert_eq!(summary.outcome(), OverallOutcome::PartialSuccess);
    assert!(summary
        .report
        .record(DEMOTION_STEP)
        .expect("must demote")
        .outcome
        .is_success());
    let restoration = summary
        .report
        .record(RESTORATION_STEP)
        .expect("must record restoration");
    assert!(restoration
        .outcome
        .reason()
        .expect("must carry reason")
        .contains("OUTPUT_DIR"));
    assert!(summary.restoration.is_none());
    assert!(summary
        .errors
        .iter()
        .any(|err| matches!(err, ShiftError::RestorationWriteFailed { .. })));
}

#[test]
fn run_state_labels_read_as_progress() {
    assert_eq!(RunState::Locating.to_string(), "locating PowerShell 7");
    assert_eq!(
        RunState::Done(OverallOutcome::PartialSuccess).to_string(),
        "done (partial-success)"
    );
}

#[test]
fn memory_store_keeps_config_store_contract() {
    let store = MemoryStore::new("contract");
    assert_eq!(store.read("missing").expect("must read"), None);
}

#[test]
fn restore_from_plan_reverses_generated_demotion() {
    let dir = test_dir("restore-from-plan");
    fs::write(dir.join("powershell.exe"), "ps51").expect("must write old runtime");
    let demoted = DemotionMutator::new(&dir, "powershell.exe", "powershell_v51_backup.exe")
        .apply(&fixed_target())
        .expect("must demote");
    let record = demoted.demotion.expect("must report demotion");
    let plan = write_restoration_artifacts(&dir.join("restore.ps1"), &record)
        .expect("must write artifacts");

    assert_eq!(
        restore_from_plan(&plan).expect("must restore"),
        RestoreOutcome::Restored
    );
    assert_eq!(
        fs::read_to_string(dir.join("powershell.exe")).expect("must read original"),
        "ps51"
    );
    assert_eq!(
        restore_from_plan(&plan).expect("must no-op"),
        RestoreOutcome::BackupMissing
    );

    let _ = fs::remove_dir_all(&dir);
}
