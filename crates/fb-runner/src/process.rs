//! Process-group ownership.

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

/// Owns the process group led by a spawned step.
///
/// Every process the step forks inherits the group, so signalling the group
/// reaches the whole tree. Dropping the guard sends SIGKILL to whatever is
/// left of it, unless the group was confirmed empty and disarmed.
#[derive(Debug)]
pub struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    /// Wrap the group led by `pid` (the step was spawned with
    /// `process_group(0)`, so its pid is the group id).
    pub fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    pub fn id(&self) -> Option<u32> {
        self.pgid
    }

    /// Stop owning the group. Once it is known to be empty its id may be
    /// handed to an unrelated process, which must never be signalled.
    pub fn disarm(&mut self) -> Option<u32> {
        self.pgid.take()
    }

    /// Ask the group to exit (SIGTERM).
    pub fn terminate(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal(Some(Signal::SIGTERM))
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Kill every member of the group (SIGKILL).
    pub fn kill(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal(Some(Signal::SIGKILL))
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    #[cfg(unix)]
    fn signal(&self, sig: Option<Signal>) -> bool {
        self.pgid
            .and_then(group_pid)
            .is_some_and(|pgid| killpg(pgid, sig).is_ok())
    }

    /// Whether any non-zombie process still belongs to the group.
    pub fn has_live_members(&self) -> bool {
        self.pgid.is_some_and(group_has_live_members)
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.kill() {
            tracing::debug!(pgid = ?self.pgid, "killed leftover process group members");
        }
    }
}

/// Group ids 0 and 1 address the caller's own group and init.
#[cfg(unix)]
fn group_pid(pgid: u32) -> Option<Pid> {
    i32::try_from(pgid)
        .ok()
        .filter(|&raw| raw > 1)
        .map(Pid::from_raw)
}

/// Scan `/proc` for running (non-zombie) members of process group `pgid`.
#[cfg(target_os = "linux")]
pub fn group_has_live_members(pgid: u32) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let Some(pid) = name.to_str().filter(|s| s.bytes().all(|b| b.is_ascii_digit())) else {
            return false;
        };
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return false;
        };
        // Fields after the parenthesised command name: state ppid pgrp ...
        let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
            return false;
        };
        let mut fields = rest.split_whitespace();
        let state = fields.next();
        let pgrp = fields.nth(1).and_then(|s| s.parse::<u32>().ok());
        pgrp == Some(pgid) && state != Some("Z") && state != Some("X")
    })
}

/// Best effort outside Linux: signal 0 detects any member, zombies
/// included.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn group_has_live_members(pgid: u32) -> bool {
    group_pid(pgid).is_some_and(|pgid| killpg(pgid, None).is_ok())
}

#[cfg(not(unix))]
pub fn group_has_live_members(_pgid: u32) -> bool {
    false
}
