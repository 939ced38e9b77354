//! Where a target's steps run: the host, or a container with the project
//! mounted at the same relative layout

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use gantry_core::EnvironmentSpec;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::result::ExitStatus;

/// Captured result of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    /// How the process ended
    pub status: ExitStatus,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl StepOutput {
    /// Check if the step exited with code 0
    pub fn success(&self) -> bool {
        self.status == ExitStatus::Code(0)
    }

    /// Last lines of stderr, for failure reports
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Execution environment of one target, chosen once before its first step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEnvironment {
    /// `sh -c` on the invoking host, in the project root
    Native { root: PathBuf },
    /// `sh -c` inside a fresh container per step
    Container {
        runtime: String,
        image: String,
        root: PathBuf,
        workdir: String,
    },
}

impl ExecutionEnvironment {
    /// Resolve a target's environment spec against the host setup
    pub fn for_target(
        spec: &EnvironmentSpec,
        root: &Path,
        runtime: &str,
        workdir: &str,
    ) -> Self {
        match spec {
            EnvironmentSpec::Native => Self::Native {
                root: root.to_path_buf(),
            },
            EnvironmentSpec::Isolated { image } => Self::Container {
                runtime: runtime.to_string(),
                image: image.clone(),
                root: root.to_path_buf(),
                workdir: workdir.to_string(),
            },
        }
    }

    /// Short label for reports
    pub fn label(&self) -> String {
        match self {
            Self::Native { .. } => "native".to_string(),
            Self::Container { runtime, image, .. } => format!("{} {}", runtime, image),
        }
    }

    /// The process invocation for a step. Container steps run under
    /// `container_name` so they can be killed by name.
    pub fn command(
        &self,
        step: &str,
        env: &BTreeMap<String, String>,
        container_name: &str,
    ) -> Command {
        let mut cmd = match self {
            Self::Native { root } => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(step).current_dir(root).envs(env);
                cmd
            }
            Self::Container {
                runtime,
                image,
                root,
                workdir,
            } => {
                let mut cmd = Command::new(runtime);
                cmd.arg("run")
                    .arg("--rm")
                    .arg("--name")
                    .arg(container_name)
                    .arg("-v")
                    .arg(format!("{}:{}", root.display(), workdir))
                    .arg("-w")
                    .arg(workdir);
                for (key, value) in env {
                    cmd.arg("-e").arg(format!("{}={}", key, value));
                }
                cmd.arg(image).arg("sh").arg("-c").arg(step).current_dir(root);
                cmd
            }
        };

        // Own process group, so the whole tree can be signalled at once
        #[cfg(unix)]
        // SAFETY: setpgid is async-signal-safe and touches no parent state
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) == 0 {
                    Ok(())
                } else {
                    Err(std::io::Error::last_os_error())
                }
            });
        }
        cmd
    }

    /// Run a step, streaming each output line to `on_line(line, is_stderr)`.
    ///
    /// If the returned future is dropped before the step exits, every process
    /// the step started is killed, and so is its container.
    pub async fn run<F>(
        &self,
        step: &str,
        env: &BTreeMap<String, String>,
        on_line: F,
    ) -> std::io::Result<StepOutput>
    where
        F: Fn(&str, bool) + Sync,
    {
        let container_name = format!("gantry-{}", Uuid::new_v4().simple());
        let mut child = self
            .command(step, env, &container_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Declared after `child` so it drops first
        let mut guard = StepGuard {
            environment: self,
            pid: child.id(),
            container_name,
            finished: false,
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr) = tokio::join!(
            read_lines(stdout, false, &on_line),
            read_lines(stderr, true, &on_line)
        );

        let status = child.wait().await?;
        guard.finished = true;

        Ok(StepOutput {
            status: exit_status(&status),
            stdout,
            stderr,
        })
    }
}

/// Tears down a step that did not run to completion
struct StepGuard<'a> {
    environment: &'a ExecutionEnvironment,
    pid: Option<u32>,
    container_name: String,
    finished: bool,
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            kill_process_group(pid);
        }

        if let ExecutionEnvironment::Container { runtime, .. } = self.environment {
            debug!(container = %self.container_name, "killing container");
            let mut kill = std::process::Command::new(runtime);
            kill.arg("kill")
                .arg(&self.container_name)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            let container = self.container_name.clone();
            std::thread::spawn(move || {
                if let Err(e) = kill.status() {
                    warn!(container = %container, error = %e, "failed to kill container");
                }
            });
        }
    }
}

/// SIGKILL the group led by `pid`. The child is not reaped yet, so its pid
/// still names the group.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    debug!(pgid, "killing step process group");
    // SAFETY: killpg has no memory-safety preconditions
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

async fn read_lines<R, F>(stream: Option<R>, is_stderr: bool, on_line: &F) -> String
where
    R: AsyncRead + Unpin,
    F: Fn(&str, bool),
{
    let Some(stream) = stream else {
        return String::new();
    };

    // Raw lines: tool output is not guaranteed to be UTF-8, and the pipe must
    // be drained to EOF or the writer gets SIGPIPE
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut collected = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
                on_line(line, is_stderr);
                collected.push(line.to_string());
            }
            Err(e) => {
                warn!(error = %e, "failed to read step output");
                break;
            }
        }
    }
    collected.join("\n")
}

#[cfg(unix)]
fn exit_status(status: &std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ExitStatus::Code(code),
        (None, Some(signal)) => ExitStatus::Signal(signal),
        (None, None) => ExitStatus::Unknown,
    }
}

#[cfg(not(unix))]
fn exit_status(status: &std::process::ExitStatus) -> ExitStatus {
    status.code().map_or(ExitStatus::Unknown, ExitStatus::Code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_container_command() {
        let env = ExecutionEnvironment::for_target(
            &EnvironmentSpec::Isolated {
                image: "node:lts-alpine".to_string(),
            },
            Path::new("/work/addon"),
            "podman",
            "/build",
        );
        let vars = BTreeMap::from([("CI".to_string(), "true".to_string())]);
        let cmd = env.command("cargo build", &vars, "gantry-1234");

        assert_eq!(cmd.as_std().get_program(), "podman");
        assert_eq!(
            args(&cmd),
            vec![
                "run",
                "--rm",
                "--name",
                "gantry-1234",
                "-v",
                "/work/addon:/build",
                "-w",
                "/build",
                "-e",
                "CI=true",
                "node:lts-alpine",
                "sh",
                "-c",
                "cargo build"
            ]
        );
        assert_eq!(env.label(), "podman node:lts-alpine");
    }

    #[test]
    fn test_native_command() {
        let env = ExecutionEnvironment::for_target(
            &EnvironmentSpec::Native,
            Path::new("/work/addon"),
            "docker",
            "/build",
        );
        let cmd = env.command("make", &BTreeMap::new(), "unused");
        assert_eq!(cmd.as_std().get_program(), "sh");
        assert_eq!(args(&cmd), vec!["-c", "make"]);
        assert_eq!(
            cmd.as_std().get_current_dir(),
            Some(Path::new("/work/addon"))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_native_run_captures_output() {
        let temp = TempDir::new().unwrap();
        let env = ExecutionEnvironment::Native {
            root: temp.path().to_path_buf(),
        };
        let lines = Mutex::new(Vec::new());
        let vars = BTreeMap::from([("GREETING".to_string(), "hello".to_string())]);

        let output = env
            .run("echo $GREETING; echo oops >&2; exit 3", &vars, |line, is_stderr| {
                lines.lock().unwrap().push((line.to_string(), is_stderr));
            })
            .await
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.status, ExitStatus::Code(3));
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr_tail(5), "oops");

        let lines = lines.into_inner().unwrap();
        assert!(lines.contains(&("hello".to_string(), false)));
        assert!(lines.contains(&("oops".to_string(), true)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_native_run_in_root() {
        let temp = TempDir::new().unwrap();
        let env = ExecutionEnvironment::Native {
            root: temp.path().to_path_buf(),
        };
        let output = env
            .run("touch made-here", &BTreeMap::new(), |_, _| {})
            .await
            .unwrap();
        assert!(output.success());
        assert!(temp.path().join("made-here").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_output_is_drained() {
        let temp = TempDir::new().unwrap();
        let env = ExecutionEnvironment::Native {
            root: temp.path().to_path_buf(),
        };
        let step = "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; echo done";

        let output = env.run(step, &BTreeMap::new(), |_, _| {}).await.unwrap();

        assert!(output.success(), "{:?}", output.status);
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "\u{FFFD}");
        assert_eq!(lines[1].len(), 300000);
        assert_eq!(lines[2], "done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_step_kills_grandchildren() {
        let temp = TempDir::new().unwrap();
        let env = ExecutionEnvironment::Native {
            root: temp.path().to_path_buf(),
        };

        let vars = BTreeMap::new();
        let run = env.run("(sleep 1; touch orphan-ran); true", &vars, |_, _| {});
        let result = tokio::time::timeout(Duration::from_millis(200), run).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!temp.path().join("orphan-ran").exists());
    }
}
