//! `-daemon` detaching (§6 CLI). Not exercised by the teacher's web-facing
//! binaries (they run in the foreground under a supervisor), so this is a
//! plain double-fork/`setsid` following the usual Unix daemonizing recipe.

use std::io;

/// Forks into the background, detaches from the controlling terminal, and
/// returns in the child. The parent process exits immediately with status 0.
pub fn detach() -> io::Result<()> {
    unsafe {
        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }

        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }

        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }

        libc::close(0);
        libc::close(1);
        libc::close(2);
    }
    Ok(())
}
