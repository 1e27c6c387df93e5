//! User-data script execution.
//!
//! A present payload is written to a scratch file and launched in a new
//! session, so it keeps running after the agent replaces itself with the
//! real init. The launched supervisor shell runs the script, appends its exit
//! status to the script log and removes the scratch file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::debug;

use crate::config::BootConfig;
use crate::error::Result;
use crate::logger::BootLog;
use crate::metadata::UserData;

/// Search path for the script when the agent inherited none.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Supervisor run by the interpreter: `$0` is the interpreter, `$1` the
/// script. Output is already redirected to the script log.
const SUPERVISOR: &str = r#""$0" "$1"
status=$?
rm -f "$1"
echo "user-data script exited with status $status"
exit $status"#;

/// Remove exactly one surrounding pair of double quotes.
pub fn strip_quotes(payload: &[u8]) -> &[u8] {
    match payload {
        [b'"', inner @ .., b'"'] => inner,
        _ => payload,
    }
}

/// Handle to a launched, detached user-data script.
///
/// Dropping the handle does not stop or reap the script; once the agent has
/// become the real init, init reaps it.
#[derive(Debug)]
pub struct DetachedScript {
    child: Child,
}

impl DetachedScript {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Block until the script (and its cleanup) finished.
    pub fn wait(mut self) -> std::io::Result<ExitStatus> {
        self.child.wait()
    }
}

/// Materializes and launches user-data scripts.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    script_path: PathBuf,
    log_path: PathBuf,
    interpreter: PathBuf,
}

impl ScriptRunner {
    pub fn new(
        script_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        interpreter: impl Into<PathBuf>,
    ) -> Self {
        Self {
            script_path: script_path.into(),
            log_path: log_path.into(),
            interpreter: interpreter.into(),
        }
    }

    pub fn from_config(config: &BootConfig) -> Self {
        Self::new(&config.script_path, &config.script_log, &config.interpreter)
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Launch the user-data script if there is one.
    ///
    /// Returns immediately after the launch. Write or spawn failures are
    /// logged and reported as `None`; they never stop the boot.
    pub fn maybe_run(&self, data: &UserData, log: &dyn BootLog) -> Option<DetachedScript> {
        let payload = match data {
            UserData::Present(payload) => payload,
            UserData::Absent | UserData::Exhausted => {
                log.log("no boot configuration found");
                return None;
            }
        };

        match self.launch(strip_quotes(payload)) {
            Ok(script) => {
                log.log(&format!("user-data script started (pid {})", script.pid()));
                Some(script)
            }
            Err(e) => {
                log.log(&format!("user-data script not started: {}", e));
                // Best effort: a half-written artifact must not linger.
                let _ = std::fs::remove_file(&self.script_path);
                None
            }
        }
    }

    fn launch(&self, script: &[u8]) -> Result<DetachedScript> {
        self.write_script(script)?;

        let output = open_append(&self.log_path)?;
        let stderr = output.try_clone()?;

        let mut command = Command::new(&self.interpreter);
        command
            .arg("-c")
            .arg(SUPERVISOR)
            .arg(&self.interpreter)
            .arg(&self.script_path)
            .current_dir("/")
            .stdin(Stdio::null())
            .stdout(output)
            .stderr(stderr);

        if std::env::var_os("PATH").is_none() {
            command.env("PATH", DEFAULT_PATH);
        }

        // New session: the script must not share the agent's process group
        // or controlling terminal.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let child = command.spawn()?;
        debug!(
            pid = child.id(),
            script = %self.script_path.display(),
            log = %self.log_path.display(),
            "User-data script launched"
        );
        Ok(DetachedScript { child })
    }

    fn write_script(&self, script: &[u8]) -> Result<()> {
        if let Some(parent) = self.script_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o700)
            .open(&self.script_path)?;
        file.write_all(script)?;
        file.sync_all()?;
        drop(file);

        std::fs::set_permissions(&self.script_path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
