use std::{fs, path::Path, process::Command};

use tempfile::TempDir;

fn hostpy(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_hostpy"))
        .args(args)
        .env_remove("HOSTPY_LOG")
        .output()
        .expect("hostpy binary runs")
}

fn script(dir: &TempDir, name: &str, source: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, source).unwrap();
    path.display().to_string()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn missing_script() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.py");
    let output = hostpy(&[&missing.display().to_string()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("ERROR: script file not found!"));
}

#[test]
fn empty_script() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "empty.py", "\n   \n");
    let output = hostpy(&[&path]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("ERROR: empty script file!"));
}

#[test]
fn successful_script_prints_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(
        &dir,
        "hello.py",
        "print('hello from', current_project().object_name())\ninfo('done')\n",
    );
    let output = hostpy(&[&path, "--project", "demo"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "hello from demo\n[INFO]    done\n"
    );
}

#[test]
fn project_path_is_the_script_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "where.py", "print(project_path())\n");
    let output = hostpy(&[&path]);
    assert!(output.status.success(), "{}", stderr(&output));
    let printed = String::from_utf8_lossy(&output.stdout);
    assert_eq!(Path::new(printed.trim()), dir.path());
}

#[test]
fn failing_script_reports_the_traceback() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "broken.py", "x = 1\nraise ValueError('broken input')\n");
    let output = hostpy(&[&path]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("ValueError: broken input"), "{err}");
    assert!(err.contains("line 2"), "{err}");
}

#[test]
fn exit_status_is_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let failing = script(&dir, "exit3.py", "import sys\nsys.exit(3)\n");
    assert_eq!(hostpy(&[&failing]).status.code(), Some(3));

    let clean = script(&dir, "exit0.py", "import sys\nsys.exit(0)\n");
    assert_eq!(hostpy(&[&clean]).status.code(), Some(0));
}

#[test]
fn module_paths_from_arguments_and_config() {
    let dir = tempfile::tempdir().unwrap();
    let modules = dir.path().join("modules");
    fs::create_dir(&modules).unwrap();
    fs::write(modules.join("cli_probe.py"), "ANSWER = 42\n").unwrap();
    let path = script(&dir, "uses.py", "import cli_probe\nprint(cli_probe.ANSWER)\n");

    let output = hostpy(&[&path, "--module-path", &modules.display().to_string()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "42\n");

    let config = script(
        &dir,
        "hostpy.toml",
        &format!("module_paths = [{:?}]\n", modules.display().to_string()),
    );
    let output = hostpy(&[&path, "--config", &config]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "42\n");
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "ok.py", "pass\n");
    let config = script(&dir, "bad.toml", "no_such_option = true\n");
    let output = hostpy(&[&path, "--config", &config]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error: loading"), "{}", stderr(&output));
}
