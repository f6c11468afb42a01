//! `git pear daemon`: starts and stops `git-peard`.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use pear_node::AppHome;

use crate::commands::{CliError, Result};

const DAEMON_BIN: &str = "git-peard";

/// The daemon binary: next to this executable if present, else from `PATH`.
fn daemon_program() -> PathBuf {
    let file = format!("{}{}", DAEMON_BIN, std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file)))
        .filter(|path| path.is_file())
        .unwrap_or_else(|| PathBuf::from(file))
}

/// Starts the daemon for `home`.
///
/// Detached, its output goes to the log files under `home`. With `attach`
/// it runs in the foreground until it exits.
pub fn start(home: &AppHome, attach: bool) -> Result<()> {
    if let Some(pid) = home.daemon_pid()? {
        return Err(CliError::DaemonRunning(pid));
    }
    std::fs::create_dir_all(home.root())?;

    let mut cmd = Command::new(daemon_program());
    cmd.arg("--home").arg(home.root());

    if attach {
        let mut child = cmd.spawn()?;
        println!("Daemon started. Process ID: {}", child.id());
        home.store_daemon_pid(child.id())?;
        let status = child.wait();
        home.remove_daemon_pid()?;
        let status = status?;
        if !status.success() {
            return Err(CliError::DaemonExited(status));
        }
        return Ok(());
    }

    let log = |path: PathBuf| OpenOptions::new().create(true).append(true).open(path);
    cmd.stdin(Stdio::null())
        .stdout(log(home.out_log_path())?)
        .stderr(log(home.err_log_path())?);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd.spawn()?;
    home.store_daemon_pid(child.id())?;
    tracing::info!(pid = child.id(), log = %home.err_log_path().display(), "daemon detached");
    println!("Daemon started. Process ID: {}", child.id());
    Ok(())
}

/// Stops the recorded daemon and forgets its PID.
pub fn stop(home: &AppHome) -> Result<()> {
    let pid = home.daemon_pid()?.ok_or(CliError::DaemonNotRunning)?;
    if !terminate(pid)? {
        tracing::warn!(pid, "daemon was not running");
    }
    home.remove_daemon_pid()?;
    println!("Daemon stopped. Process ID: {}", pid);
    Ok(())
}

#[cfg(unix)]
fn terminate(pid: u32) -> std::io::Result<bool> {
    let status = Command::new("kill")
        .arg(pid.to_string())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.success())
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> std::io::Result<bool> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_refuses_when_pid_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let home = AppHome::new(tmp.path());
        home.store_daemon_pid(4242).unwrap();
        let err = start(&home, false).unwrap_err();
        assert_eq!(err.to_string(), "Daemon already running with PID: 4242");
    }

    #[test]
    fn test_stop_without_daemon() {
        let tmp = tempfile::tempdir().unwrap();
        let home = AppHome::new(tmp.path());
        assert!(matches!(stop(&home).unwrap_err(), CliError::DaemonNotRunning));
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_kills_and_forgets() {
        let tmp = tempfile::tempdir().unwrap();
        let home = AppHome::new(tmp.path());
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        home.store_daemon_pid(child.id()).unwrap();

        stop(&home).unwrap();
        assert!(!child.wait().unwrap().success());
        assert_eq!(home.daemon_pid().unwrap(), None);
    }
}
