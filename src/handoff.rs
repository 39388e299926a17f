//! Listener handoff by re-executing a program.
//!
//! The successor is a new process image that inherits two descriptors at
//! fixed slots:
//!
//! | Slot | Contents |
//! |---|---|
//! | `3` | the listening TCP socket, already bound and listening |
//! | `4` | one end of a socket pair; the successor writes `ready\n` to it once it accepts |
//!
//! The parent side is [`ExecHandoff`]; the successor side is [`inherit`]
//! followed by [`Readiness::notify`]. The successor never binds: a missing
//! or unusable slot 3 is a fatal startup error for it, and only for it.

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::Error;
use crate::restart::{SocketHandoff, Successor};

/// Slot the successor finds its listening socket in.
pub const LISTENER_FD: RawFd = 3;

/// Slot the successor acknowledges readiness on.
pub const READY_FD: RawFd = 4;

const READY_MESSAGE: &str = "ready\n";

// Parent-side copies are moved at or above this number so that placing them
// into the low slots in the child can never overwrite one with the other.
const STAGING_FD_MIN: RawFd = 10;

// ── Parent side ───────────────────────────────────────────────────────────────

/// Starts the successor by executing `program` with `args`.
pub struct ExecHandoff {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ExecHandoff {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self { program: program.into(), args: args.into_iter().map(Into::into).collect() }
    }

    /// Re-executes the running binary.
    pub fn current_exe<I, S>(args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

impl SocketHandoff for ExecHandoff {
    fn launch(&self, listener: OwnedFd) -> Result<Successor, Error> {
        let (ours, theirs) = StdUnixStream::pair().map_err(Error::Launch)?;
        let staged_listener = stage(listener.as_fd()).map_err(Error::Launch)?;
        let staged_ready = stage(theirs.as_fd()).map_err(Error::Launch)?;
        let (listener_raw, ready_raw) = (staged_listener.as_raw_fd(), staged_ready.as_raw_fd());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        // SAFETY: the closure runs between fork and exec and only calls
        // dup2, which is async-signal-safe. Both sources are open in the
        // parent for the duration of `spawn`.
        unsafe {
            cmd.pre_exec(move || {
                place(listener_raw, LISTENER_FD)?;
                place(ready_raw, READY_FD)
            });
        }

        let child = cmd.spawn().map_err(Error::Launch)?;
        // The child holds its own copies now.
        drop((listener, staged_listener, theirs, staged_ready));

        ours.set_nonblocking(true)?;
        let ours = UnixStream::from_std(ours)?;
        let pid = child.id();
        info!(program = %self.program.display(), successor = ?pid, "successor spawned");

        Ok(Successor::new(pid, await_ready(child, ours)))
    }
}

/// Copies `fd` to a close-on-exec descriptor numbered at least
/// [`STAGING_FD_MIN`].
fn stage(fd: BorrowedFd<'_>) -> io::Result<OwnedFd> {
    // SAFETY: F_DUPFD_CLOEXEC on a valid borrowed descriptor; the result is
    // a fresh descriptor we own.
    let raw = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, STAGING_FD_MIN) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Child-side: copy `src` into `slot`. dup2 leaves the copy inheritable.
fn place(src: RawFd, slot: RawFd) -> io::Result<()> {
    // SAFETY: plain dup2 on descriptors that are open in the forked child.
    if unsafe { libc::dup2(src, slot) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

async fn await_ready(mut child: Child, channel: UnixStream) -> Result<(), Error> {
    let ack = read_ack(channel);
    tokio::pin!(ack);

    let status = tokio::select! {
        biased;
        line = &mut ack => return check_ack(line),
        status = child.wait() => status,
    };

    // Whatever it wrote before exiting is buffered, and its end of the
    // channel is closed, so this read completes.
    match check_ack(ack.await) {
        Ok(()) => Ok(()),
        Err(_) => Err(Error::SuccessorFailed(match status {
            Ok(status) => format!("exited with {status}"),
            Err(e) => format!("wait: {e}"),
        })),
    }
}

async fn read_ack(channel: UnixStream) -> io::Result<String> {
    let mut line = String::new();
    BufReader::new(channel.take(64)).read_line(&mut line).await?;
    Ok(line)
}

fn check_ack(line: io::Result<String>) -> Result<(), Error> {
    match line {
        Ok(line) if line == READY_MESSAGE => Ok(()),
        Ok(line) if line.is_empty() => {
            Err(Error::SuccessorFailed("readiness channel closed".into()))
        }
        Ok(line) => Err(Error::SuccessorFailed(format!("unexpected acknowledgment {line:?}"))),
        Err(e) => Err(Error::SuccessorFailed(format!("readiness channel: {e}"))),
    }
}

// ── Successor side ────────────────────────────────────────────────────────────

/// The successor's end of the readiness channel.
pub struct Readiness(Option<StdUnixStream>);

impl Readiness {
    /// Reports readiness to whoever launched this process. Without a
    /// readiness slot there is nobody to tell and this only logs.
    pub fn notify(self) -> Result<(), Error> {
        use std::io::Write;

        match self.0 {
            Some(mut channel) => {
                channel.write_all(READY_MESSAGE.as_bytes())?;
                info!(pid = std::process::id(), "readiness acknowledged");
            }
            None => warn!(
                pid = std::process::id(),
                "no readiness channel; the previous instance keeps serving until told to drain",
            ),
        }
        Ok(())
    }
}

/// Claims the inherited descriptors.
///
/// Call this before anything else opens descriptors (in particular before
/// starting the async runtime), so that an empty slot is not mistaken for a
/// descriptor the process opened itself.
pub fn inherit() -> Result<(std::net::TcpListener, Readiness), Error> {
    let listener = claim(LISTENER_FD)
        .ok_or_else(|| Error::InheritedListener(format!("descriptor {LISTENER_FD} is not open")))?;
    if !is_listening(listener.as_fd()) {
        return Err(Error::InheritedListener(format!(
            "descriptor {LISTENER_FD} is not a listening socket"
        )));
    }
    let listener = std::net::TcpListener::from(listener);
    listener.local_addr().map_err(|e| {
        Error::InheritedListener(format!("descriptor {LISTENER_FD} is not a TCP socket: {e}"))
    })?;

    let ready = claim(READY_FD)
        .map(StdUnixStream::from)
        .filter(|channel| channel.peer_addr().is_ok());

    Ok((listener, Readiness(ready)))
}

/// Takes ownership of `slot` if it is open, marking it close-on-exec so a
/// later successor does not inherit it by accident.
fn claim(slot: RawFd) -> Option<OwnedFd> {
    // SAFETY: F_GETFD/F_SETFD only inspect and flag the descriptor table
    // entry; ownership is taken only when the slot is open.
    unsafe {
        let flags = libc::fcntl(slot, libc::F_GETFD);
        if flags < 0 {
            return None;
        }
        libc::fcntl(slot, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        Some(OwnedFd::from_raw_fd(slot))
    }
}

fn is_listening(fd: BorrowedFd<'_>) -> bool {
    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: value/len point at a correctly sized c_int.
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ACCEPTCONN,
            (&mut value as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    rc == 0 && value != 0
}
