//! Running commands on servers.
//!
//! Configuration and build commands only need an exit status, so they go through a long-lived
//! `spurs` shell per server. Benchmark processes need a live stdout and a writable stdin, which
//! `spurs` does not expose, so those are run through the `ssh` client directly.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Mutex;

use log::{debug, warn};

use spurs::{cmd, Execute, SshShell};

use crate::server::{Server, ServerList};

/// A launched process.
pub trait ProcessHandle: Send {
    /// Take the line-oriented output stream. Returns `None` after the first call.
    fn take_stdout(&mut self) -> Option<Box<dyn BufRead + Send>>;

    /// Write to the process's input stream.
    fn write_stdin(&mut self, bytes: &[u8]) -> Result<(), failure::Error>;

    /// Close the input stream and block until the process exits, returning its exit code. A
    /// process killed by a signal reports `-1`.
    fn wait(&mut self) -> Result<i32, failure::Error>;

    /// Terminate the process and anything it started. Does not wait for it.
    fn kill(&mut self) -> Result<(), failure::Error>;
}

/// Something that can run commands on the servers of an experiment.
pub trait RemoteSession: Sync {
    /// Run `command` in the server's working directory to completion. Any non-zero exit is an
    /// error.
    fn run(&self, server: &Server, command: &str) -> Result<(), failure::Error>;

    /// Start `command` in the server's working directory with piped stdin and stdout.
    fn spawn(&self, server: &Server, command: &str)
        -> Result<Box<dyn ProcessHandle>, failure::Error>;
}

/// A `ProcessHandle` backed by a local child process (possibly an `ssh` client). The child leads
/// its own process group, so killing it also kills whatever it forked.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    reaped: bool,
}

impl ChildProcess {
    pub fn spawn(mut command: Command) -> Result<Self, failure::Error> {
        debug!("spawn: {:?}", command);

        let mut child = command
            .process_group(0)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();

        Ok(ChildProcess {
            child,
            stdin,
            reaped: false,
        })
    }
}

impl ProcessHandle for ChildProcess {
    fn take_stdout(&mut self) -> Option<Box<dyn BufRead + Send>> {
        self.child
            .stdout
            .take()
            .map(|out| Box::new(BufReader::new(out)) as Box<dyn BufRead + Send>)
    }

    fn write_stdin(&mut self, bytes: &[u8]) -> Result<(), failure::Error> {
        match self.stdin.as_mut() {
            Some(stdin) => {
                stdin.write_all(bytes)?;
                stdin.flush()?;
                Ok(())
            }
            None => Err(failure::format_err!("stdin is already closed")),
        }
    }

    fn wait(&mut self) -> Result<i32, failure::Error> {
        // Dropping stdin delivers EOF, so a process waiting for more input cannot hang us.
        self.stdin.take();
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status.code().unwrap_or(-1))
    }

    fn kill(&mut self) -> Result<(), failure::Error> {
        // Once reaped, the pid may name someone else's group.
        if self.reaped {
            return Ok(());
        }

        let pgid = self.child.id() as libc::pid_t;
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
            return Ok(());
        }

        match io::Error::last_os_error() {
            // The whole group already exited.
            ref e if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
            e => Err(e.into()),
        }
    }
}

/// Runs every "server" as a local shell in its working directory. Useful for trying out an
/// experiment on one machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSession;

impl LocalSession {
    fn shell(server: &Server, command: &str) -> Command {
        let mut sh = Command::new("sh");
        sh.arg("-c").arg(command);
        if !server.working_directory.is_empty() {
            sh.current_dir(&server.working_directory);
        }
        sh
    }
}

impl RemoteSession for LocalSession {
    fn run(&self, server: &Server, command: &str) -> Result<(), failure::Error> {
        debug!("{}: {}", server.name, command);

        let status = Self::shell(server, command).status()?;
        if !status.success() {
            failure::bail!("exited with {:?}", status.code());
        }

        Ok(())
    }

    fn spawn(
        &self,
        server: &Server,
        command: &str,
    ) -> Result<Box<dyn ProcessHandle>, failure::Error> {
        Ok(Box::new(ChildProcess::spawn(Self::shell(server, command))?))
    }
}

/// SSH to every server of the list.
pub struct SshSession {
    shells: BTreeMap<String, Mutex<SshShell>>,
}

impl SshSession {
    /// Open one shell per server using the default key.
    pub fn connect(servers: &ServerList) -> Result<Self, failure::Error> {
        let mut shells = BTreeMap::new();
        for server in servers {
            let shell = SshShell::with_default_key(&server.username, server.ssh_addr().as_str())?;
            shells.insert(server.name.clone(), Mutex::new(shell));
        }

        Ok(SshSession { shells })
    }
}

impl RemoteSession for SshSession {
    fn run(&self, server: &Server, command: &str) -> Result<(), failure::Error> {
        let shell = self
            .shells
            .get(&server.name)
            .ok_or_else(|| failure::format_err!("No SSH session for {}", server.name))?;
        let shell = match shell.lock() {
            Ok(shell) => shell,
            Err(poisoned) => {
                warn!("SSH session for {} was poisoned", server.name);
                poisoned.into_inner()
            }
        };

        let mut command = cmd!("{}", command);
        if !server.working_directory.is_empty() {
            command = command.cwd(&server.working_directory);
        }
        shell.run(command)?;

        Ok(())
    }

    fn spawn(
        &self,
        server: &Server,
        command: &str,
    ) -> Result<Box<dyn ProcessHandle>, failure::Error> {
        let remote = if server.working_directory.is_empty() {
            command.to_owned()
        } else {
            format!("cd {} && {}", quote(&server.working_directory), command)
        };

        let destination = if server.username.is_empty() {
            server.address.clone()
        } else {
            format!("{}@{}", server.username, server.address)
        };

        let mut ssh = Command::new("ssh");
        ssh.args(&["-o", "StrictHostKeyChecking=yes", "-o", "BatchMode=yes"])
            .arg("-p")
            .arg(server.port.to_string())
            .arg(destination)
            .arg(remote);

        Ok(Box::new(ChildProcess::spawn(ssh)?))
    }
}

/// Quote `s` for a POSIX shell.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'\''"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;

    #[test]
    fn quoting() {
        assert_eq!(quote("/home/lab"), "'/home/lab'");
        assert_eq!(quote("it's"), r#"'it'\''s'"#);
    }

    #[test]
    fn local_run_reports_exit_status() {
        let server = Server::new("local", "localhost", "");
        assert!(LocalSession.run(&server, "true").is_ok());
        assert!(LocalSession.run(&server, "exit 3").is_err());
    }

    #[test]
    fn local_spawn_pipes() {
        let server = Server::new("local", "localhost", "");
        let mut p = LocalSession
            .spawn(&server, "read line; echo got $line")
            .unwrap();
        let mut out = p.take_stdout().unwrap();
        assert!(p.take_stdout().is_none());

        p.write_stdin(b"hello\n").unwrap();
        let mut line = String::new();
        out.read_line(&mut line).unwrap();
        assert_eq!(line.trim_end(), "got hello");
        assert_eq!(p.wait().unwrap(), 0);
    }

    #[test]
    fn kill_reaches_grandchildren() {
        let server = Server::new("local", "localhost", "");
        let mut p = LocalSession
            .spawn(&server, "sleep 30; echo late")
            .unwrap();
        let mut out = p.take_stdout().unwrap();

        let start = std::time::Instant::now();
        p.kill().unwrap();
        p.wait().unwrap();

        // EOF only arrives once the `sleep` holding the pipe is gone too.
        let mut rest = String::new();
        out.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "");
        assert!(start.elapsed() < std::time::Duration::from_secs(10));

        // Killing an exited process is fine.
        p.kill().unwrap();
    }
}
