//! Small process-related helpers shared across the workspace.
//!
//! Capture children are spawned detached from the terminal's process group so
//! that a Ctrl+C typed at the console reaches only the supervising process. The
//! supervisor then decides whether the child gets a polite [`interrupt`] (and a
//! chance to finalize its output) or a hard kill.

use std::io;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

/// Detach a child from the controlling terminal's process group.
///
/// On unix the child becomes the leader of a new process group, so terminal
/// generated signals (SIGINT from Ctrl+C) are not delivered to it. Elsewhere
/// this is a no-op.
pub trait DetachExt {
    fn detach_from_terminal(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl DetachExt for tokio::process::Command {
    fn detach_from_terminal(&mut self) {
        #[cfg(unix)]
        self.process_group(0);
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<std::ffi::OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Create a `tokio::process::Command` for a long-running child owned by a supervisor.
///
/// The child is detached from the terminal and is killed if its handle is dropped,
/// so a supervisor that unwinds early can never leak it.
#[cfg(feature = "tokio")]
pub fn supervised_command(program: impl AsRef<std::ffi::OsStr>) -> tokio::process::Command {
    let mut cmd = tokio_command(program);
    cmd.detach_from_terminal();
    cmd.kill_on_drop(true);
    cmd
}

/// Whether [`interrupt_group`] can deliver a graceful stop request on this platform.
pub const fn supports_interrupt() -> bool {
    cfg!(unix)
}

/// Ask a detached child and everything it spawned to stop, the way a terminal
/// Ctrl+C would (SIGINT to the whole process group led by `pid`).
///
/// Well-behaved capture tools react by flushing and closing their output file.
/// Returns `ErrorKind::Unsupported` on platforms without signals; callers are
/// expected to fall back to a hard kill.
pub fn interrupt_group(pid: u32) -> io::Result<()> {
    signal_group(pid, GroupSignal::Interrupt)
}

/// Force-kill every process in the group led by `pid` (SIGKILL).
///
/// The group leader itself should still be killed and reaped through its
/// `Child` handle; this only makes sure helpers it spawned do not linger.
pub fn kill_group(pid: u32) -> io::Result<()> {
    signal_group(pid, GroupSignal::Kill)
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: GroupSignal) -> io::Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    let signal = match signal {
        GroupSignal::Interrupt => Signal::SIGINT,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    killpg(Pid::from_raw(pid), signal).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn signal_group(pid: u32, signal: GroupSignal) -> io::Result<()> {
    let _ = (pid, signal);
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process group signals are not supported on this platform",
    ))
}
