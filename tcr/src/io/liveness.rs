//! Process liveness checks for overlay mount owners.

/// True if a process with `pid` exists.
///
/// `EPERM` counts as alive: the process exists but belongs to another user.
/// PID 0 and values outside the platform range are never alive. Non-unix
/// platforms assume alive so that mounts are never reclaimed by mistake.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs the permission and existence checks
        // without delivering a signal. `pid_i32` is positive.
        #[allow(unsafe_code)]
        let result = unsafe { libc::kill(pid_i32, 0) };
        if result == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid_i32;
        true
    }
}
