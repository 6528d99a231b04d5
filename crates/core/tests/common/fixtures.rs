//! Test fixtures: fake interpreters, configurations and job definitions.

use rr_protocol::config_models::OrchestratorConfig;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A job definition as submitted by a caller.
#[allow(dead_code)]
pub const ROBOT_CODE: &str = r#"{"name":"Checkout","resources":["/home/ec2-user/robot/devdata/orders.xlsx"],"steps":["Open Browser","Submit Order"]}"#;

/// Where the fake interpreter stops behaving.
#[derive(Debug, Clone)]
enum Ending {
    Normal,
    /// Write `stderr` and exit with `code` after this many steps.
    Crash {
        after_steps: usize,
        code: i32,
        stderr: String,
    },
    /// Sleep at the start of this step without reading stdin.
    Hang { at_step: usize },
    /// Close stdout right after the job starts, then keep running.
    Detach,
}

/// Builder for a shell script that behaves like an interpreter.
///
/// The script is run as `sh <script> <artifact> --listener=<all|step>` and
/// prints the callback protocol on stdout. In step mode it reads one gate
/// reply from stdin after every step start and exits on anything other than
/// `continue`.
#[derive(Debug, Clone)]
pub struct FakeRobot {
    job: String,
    steps: Vec<String>,
    banner: Option<String>,
    ending: Ending,
}

#[allow(dead_code)]
impl FakeRobot {
    pub fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            steps: Vec::new(),
            banner: None,
            ending: Ending::Normal,
        }
    }

    /// A job named `Checkout` with two steps.
    pub fn checkout() -> Self {
        Self::new("Checkout").step("Open Browser").step("Submit Order")
    }

    pub fn step(mut self, name: &str) -> Self {
        self.steps.push(name.to_string());
        self
    }

    pub fn crash_after(mut self, after_steps: usize, code: i32, stderr: &str) -> Self {
        self.ending = Ending::Crash {
            after_steps,
            code,
            stderr: stderr.to_string(),
        };
        self
    }

    pub fn hang_at(mut self, at_step: usize) -> Self {
        self.ending = Ending::Hang { at_step };
        self
    }

    pub fn detach_after_start(mut self) -> Self {
        self.ending = Ending::Detach;
        self
    }

    /// Print `printf` format `text` on stdout and stderr before the job
    /// starts. Octal escapes produce raw bytes.
    pub fn banner(mut self, text: &str) -> Self {
        self.banner = Some(text.to_string());
        self
    }

    pub fn script(&self) -> String {
        let mut lines = vec![
            "#!/bin/sh".to_string(),
            "gated=0".to_string(),
            r#"[ "$2" = "--listener=step" ] && gated=1"#.to_string(),
            r#"hook() { printf '::hook:: %s\n' "$1"; }"#.to_string(),
            "await_gate() {".to_string(),
            r#"  if [ "$gated" = 1 ]; then"#.to_string(),
            "    read reply || exit 4".to_string(),
            r#"    [ "$reply" = "continue" ] || exit 0"#.to_string(),
            "  fi".to_string(),
            "}".to_string(),
            "echo \"starting $1\"".to_string(),
        ];
        if let Some(banner) = &self.banner {
            lines.push(format!("printf '{banner}\\n'"));
            lines.push(format!("printf '{banner}\\n' >&2"));
        }
        lines.push(hook(&format!(
            r#"{{"hook":"job_start","name":"{}"}}"#,
            self.job
        )));
        if matches!(self.ending, Ending::Detach) {
            lines.push("exec 1>&-".to_string());
            lines.push("exec sleep 20".to_string());
            return lines.join("\n") + "\n";
        }

        for (index, step) in self.steps.iter().enumerate() {
            if let Ending::Crash {
                after_steps,
                code,
                stderr,
            } = &self.ending
            {
                if index == *after_steps {
                    lines.push(format!("echo '{stderr}' >&2"));
                    lines.push(format!("exit {code}"));
                    return lines.join("\n") + "\n";
                }
            }

            lines.push(hook(&format!(
                r#"{{"hook":"step_start","name":"{step}","lib":"Browser","args":["{index}"]}}"#
            )));
            if matches!(self.ending, Ending::Hang { at_step } if at_step == index) {
                lines.push("sleep 30".to_string());
            }
            lines.push("await_gate".to_string());
            lines.push(hook(&format!(
                r#"{{"hook":"log","level":"INFO","message":"{step} done"}}"#
            )));
            lines.push(hook(&format!(
                r#"{{"hook":"step_end","name":"{step}","status":"PASS"}}"#
            )));
        }

        if let Ending::Crash { code, stderr, .. } = &self.ending {
            lines.push(format!("echo '{stderr}' >&2"));
            lines.push(format!("exit {code}"));
        } else {
            lines.push(hook(&format!(
                r#"{{"hook":"job_end","name":"{}","status":"PASS"}}"#,
                self.job
            )));
            lines.push("exit 0".to_string());
        }

        lines.join("\n") + "\n"
    }

    /// Write the script into `dir` and return its path.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("{}.sh", self.job.to_lowercase()));
        std::fs::write(&path, self.script()).expect("Failed to write fake interpreter");
        path
    }
}

fn hook(json: &str) -> String {
    format!("hook '{json}'")
}

/// A scratch directory holding the script, workspace and logs of one test.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: OrchestratorConfig,
}

#[allow(dead_code)]
impl TestEnv {
    /// Configure the orchestrator to run `robot` through `sh`.
    pub fn new(robot: &FakeRobot) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let script = robot.write(dir.path());

        let mut config = OrchestratorConfig::default();
        config.interpreter.program = "sh".to_string();
        config.interpreter.args = vec![script.display().to_string()];
        config.workspace.root = dir.path().join("workspace");
        config.workspace.log_dir = dir.path().join("logs");
        config.workspace.path_rewrites.insert(
            "/home/ec2-user/robot/devdata/".to_string(),
            dir.path().join("devdata/").display().to_string(),
        );
        config.supervisor.stop_grace_secs = 1;

        Self { dir, config }
    }

    pub fn workspace(&self) -> PathBuf {
        self.config.workspace.root.clone()
    }

    pub fn log_file(&self, process_id: &str) -> PathBuf {
        self.config.workspace.log_dir.join(format!("{process_id}.log"))
    }
}
