//! Playbook-backed [`StepRunner`].
//!
//! Each action is a playbook file under the configured directory. Parameters
//! travel through a temporary JSON file passed as `--extra-vars @file` and
//! removed afterwards. Stdout and stderr are read line by line and forwarded
//! in arrival order.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::step_runner::{OutputSink, StepOutcome, StepParameters, StepRunner};
use crate::config::RunnerSettings;

#[derive(Debug, Clone)]
pub struct ProcessStepRunner {
    settings: RunnerSettings,
}

impl ProcessStepRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.settings.playbook_dir.join(path)
        }
    }

    /// Arguments for one invocation, in order
    pub fn command_args(&self, action: &str, vars_file: Option<&Path>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            self.resolve(&self.settings.inventory).into(),
            self.resolve(Path::new(action)).into(),
        ];
        if let Some(file) = vars_file {
            let mut arg = OsString::from("@");
            arg.push(file);
            args.push("--extra-vars".into());
            args.push(arg);
        }
        if self.settings.verbose {
            args.push("-v".into());
        }
        args
    }

    /// Owner-only file with a random name; deleted when the handle drops
    fn write_vars(parameters: &StepParameters) -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("deployer-vars-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer(&mut file, parameters)?;
        file.flush()?;
        Ok(file)
    }

    async fn drain(mut child: Child, on_output: OutputSink<'_>) -> StepOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut output = String::new();
        while let Some(chunk) = rx.recv().await {
            on_output(&chunk);
            output.push_str(&chunk);
        }

        match child.wait().await {
            Ok(status) => StepOutcome {
                success: status.success(),
                output,
                exit_status: status.code().unwrap_or(-1),
            },
            Err(e) => {
                let message = format!("Failed to wait for runner process: {e}\n");
                on_output(&message);
                output.push_str(&message);
                StepOutcome::failed(output, -1)
            }
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(format!("[output stream error: {e}]\n"));
                break;
            }
        }
    }
}

#[async_trait]
impl StepRunner for ProcessStepRunner {
    async fn run(
        &self,
        action: &str,
        parameters: &StepParameters,
        on_output: OutputSink<'_>,
    ) -> StepOutcome {
        let vars_file = if parameters.is_empty() {
            None
        } else {
            match Self::write_vars(parameters) {
                Ok(file) => Some(file),
                Err(e) => {
                    let message = format!("Failed to write parameters for {action}: {e}\n");
                    on_output(&message);
                    return StepOutcome::failed(message, -1);
                }
            }
        };

        info!(
            program = %self.settings.program,
            action = %action,
            "Running step action"
        );

        let mut command = Command::new(&self.settings.program);
        command
            .args(self.command_args(action, vars_file.as_ref().map(|f| f.path())))
            .current_dir(&self.settings.playbook_dir)
            .env("ANSIBLE_FORCE_COLOR", "false")
            .env("ANSIBLE_NOCOLOR", "true")
            .envs(&self.settings.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let outcome = match command.spawn() {
            Ok(child) => Self::drain(child, on_output).await,
            Err(e) => {
                let message = format!("Failed to start {}: {e}\n", self.settings.program);
                warn!(action = %action, error = %e, "Runner process did not start");
                on_output(&message);
                StepOutcome::failed(message, -1)
            }
        };

        if let Some(file) = vars_file {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                debug!(path = %path.display(), error = %e, "Could not remove parameter file");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn settings(program: &str) -> RunnerSettings {
        RunnerSettings {
            program: program.to_string(),
            playbook_dir: std::env::temp_dir(),
            verbose: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_command_args_layout() {
        let runner = ProcessStepRunner::new(RunnerSettings {
            playbook_dir: PathBuf::from("/srv/ansible"),
            ..Default::default()
        });
        let args = runner.command_args("deploy.yml", Some(Path::new("/tmp/vars.json")));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-i",
                "/srv/ansible/inventory",
                "/srv/ansible/deploy.yml",
                "--extra-vars",
                "@/tmp/vars.json",
                "-v"
            ]
        );
    }

    #[tokio::test]
    async fn test_streams_process_output() {
        let runner = ProcessStepRunner::new(settings("echo"));
        let chunks = Mutex::new(Vec::new());
        let sink = |chunk: &str| chunks.lock().push(chunk.to_string());

        let mut params = StepParameters::new();
        params.insert("namespace".to_string(), "demo".into());
        let outcome = runner.run("deploy.yml", &params, &sink).await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_status, 0);
        assert!(outcome.output.contains("deploy.yml"));
        assert_eq!(chunks.lock().concat(), outcome.output);
    }

    #[cfg(unix)]
    #[test]
    fn test_parameter_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let mut params = StepParameters::new();
        params.insert("token".to_string(), "secret".into());
        let file = ProcessStepRunner::write_vars(&params).unwrap();

        let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("deployer-vars-") && name.ends_with(".json"));
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let body: serde_json::Value =
            serde_json::from_reader(std::fs::File::open(file.path()).unwrap()).unwrap();
        assert_eq!(body["token"], "secret");
    }

    #[tokio::test]
    async fn test_parameter_file_is_removed_after_run() {
        let runner = ProcessStepRunner::new(settings("echo"));
        let mut params = StepParameters::new();
        params.insert("namespace".to_string(), "demo".into());

        let outcome = runner.run("deploy.yml", &params, &|_: &str| {}).await;
        assert!(outcome.success);

        let path = outcome
            .output
            .split_whitespace()
            .find_map(|arg| arg.strip_prefix('@'))
            .map(PathBuf::from)
            .unwrap();
        assert!(path.to_string_lossy().contains("deployer-vars-"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_program_resolves_as_failure() {
        let runner = ProcessStepRunner::new(settings("definitely-not-a-real-runner-binary"));
        let outcome = runner
            .run("deploy.yml", &StepParameters::new(), &|_: &str| {})
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.exit_status, -1);
        assert!(outcome.output.contains("Failed to start"));
    }
}
