//! Runs the `baton` binary itself: inherit-mode startup failures and a full
//! restart through the exec handoff.

mod common;

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use common::{Client, TIMEOUT, get};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};

const BIN: &str = env!("CARGO_BIN_EXE_baton");

/// Sends SIGTERM to a process the test started indirectly.
struct Terminate(i32);

impl Drop for Terminate {
    fn drop(&mut self) {
        // SAFETY: kill with a pid and a signal number has no memory effects.
        unsafe {
            libc::kill(self.0, libc::SIGTERM);
        }
    }
}

fn run_inherit(pre_exec: impl FnMut() -> std::io::Result<()> + Send + Sync + 'static) -> Output {
    let mut cmd = Command::new(BIN);
    cmd.args(["--port", "0", "--inherit"]).stdin(Stdio::null());
    // SAFETY: the closures below only call close, dup2 and fcntl, which are
    // async-signal-safe.
    unsafe {
        cmd.pre_exec(pre_exec);
    }
    cmd.output().unwrap()
}

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap().local_addr().unwrap().port()
}

async fn wait_until_accepting(addr: SocketAddr) {
    let deadline = Instant::now() + TIMEOUT;
    while TcpStream::connect(addr).await.is_err() {
        assert!(Instant::now() < deadline, "nothing accepting on {addr}");
        sleep(Duration::from_millis(25)).await;
    }
}

#[test]
fn inherit_without_a_listener_fails_at_startup() {
    let output = run_inherit(|| {
        // SAFETY: closing slots the child does not otherwise use.
        unsafe {
            libc::close(3);
            libc::close(4);
        }
        Ok(())
    });

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("descriptor 3 is not open"), "{stderr}");
}

#[test]
fn inherit_rejects_a_descriptor_that_is_not_listening() {
    let file = tempfile::tempfile().unwrap();
    let fd = file.as_raw_fd();

    let output = run_inherit(move || {
        // SAFETY: `file` stays open in the parent until `output` returns.
        unsafe {
            if libc::dup2(fd, 3) < 0 || libc::fcntl(3, libc::F_SETFD, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            libc::close(4);
        }
        Ok(())
    });
    drop(file);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("descriptor 3 is not a listening socket"), "{stderr}");
}

#[tokio::test]
async fn upgrade_hands_the_port_to_a_new_process() {
    let port = free_port();
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    let mut parent = tokio::process::Command::new(BIN)
        .args(["--port", &port.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    wait_until_accepting(addr).await;
    assert_eq!(get(addr, "/readyz").await.status, 200);

    let reply = {
        let mut admin = Client::connect(addr).await;
        admin.send("POST", "/upgrade").await
    };
    assert_eq!(reply.status, 202, "{}", reply.body);
    let pid: i32 = reply.body
        .strip_prefix("restarting: successor pid ")
        .and_then(|pid| pid.parse().ok())
        .unwrap_or_else(|| panic!("unexpected body {:?}", reply.body));
    let _successor = Terminate(pid);

    // The parent drains once the successor acknowledges, then exits cleanly.
    let status = timeout(TIMEOUT, parent.wait()).await.unwrap().unwrap();
    assert!(status.success(), "{status}");

    // The port never went away; the successor answers on it.
    let reply = get(addr, "/readyz").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "ready");
    assert_eq!(get(addr, "/healthz").await.body, "ok");
}
