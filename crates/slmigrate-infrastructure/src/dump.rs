//! Lifecycle of the external database engine and its dump/restore tools.
//!
//! A run owns exactly one [`DumpProcessController`]. The engine process is
//! started lazily on the first dump or restore and killed by
//! [`DumpProcessController::shutdown`], which also runs on drop. A
//! [`EngineShutdownHandle`] lets an interrupt handler on another thread stop
//! the same process. Once stopped, the engine stays stopped: a controller
//! never starts a second engine.

use crate::settings::EngineSettings;
use slmigrate_core::{ConnectionConfig, MigrationAction, MigrationError, Result};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

/// A program invocation with its arguments kept as a vector, never a shell
/// string.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    secret_args: Vec<usize>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds an argument that is masked when the invocation is displayed.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Value following `flag`, if present.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&i) {
                write!(f, " ***")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invocation({})", self)
    }
}

/// Exit status of a completed sub-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl RunStatus {
    pub const SUCCESS: RunStatus = RunStatus {
        success: true,
        code: Some(0),
    };

    pub fn failed(code: i32) -> Self {
        Self {
            success: false,
            code: Some(code),
        }
    }
}

/// A long-running engine process.
pub trait EngineProcess: Send {
    /// Stops the process and reaps it.
    fn terminate(&mut self) -> io::Result<()>;
}

/// Launches processes. Replaced by a recording fake in tests.
pub trait ProcessRunner: Send {
    /// Starts a long-running process without waiting for it.
    fn spawn(&self, invocation: &Invocation) -> io::Result<Box<dyn EngineProcess>>;

    /// Runs a process to completion.
    fn run(&self, invocation: &Invocation) -> io::Result<RunStatus>;
}

/// [`ProcessRunner`] backed by `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl EngineProcess for Child {
    fn terminate(&mut self) -> io::Result<()> {
        match self.kill() {
            Ok(()) => {}
            // Already exited.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.wait().map(|_| ())
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn spawn(&self, invocation: &Invocation) -> io::Result<Box<dyn EngineProcess>> {
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()?;
        Ok(Box::new(child))
    }

    fn run(&self, invocation: &Invocation) -> io::Result<RunStatus> {
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .status()?;
        Ok(RunStatus {
            success: status.success(),
            code: status.code(),
        })
    }
}

/// Engine lifecycle of one run. Only moves forward.
enum EngineState {
    NotStarted,
    Running(Box<dyn EngineProcess>),
    Stopped,
}

type EngineSlot = Arc<Mutex<EngineState>>;

fn stop_engine(slot: &EngineSlot) -> io::Result<bool> {
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    match std::mem::replace(&mut *guard, EngineState::Stopped) {
        EngineState::Running(mut process) => {
            process.terminate()?;
            Ok(true)
        }
        EngineState::NotStarted | EngineState::Stopped => Ok(false),
    }
}

/// Stops the engine owned by a controller from another thread.
#[derive(Clone)]
pub struct EngineShutdownHandle {
    slot: EngineSlot,
}

impl EngineShutdownHandle {
    /// Stops the engine if it is running and prevents it from starting
    /// again. Idempotent.
    pub fn shutdown(&self) {
        match stop_engine(&self.slot) {
            Ok(true) => tracing::info!("Database engine stopped"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to stop database engine: {}", e),
        }
    }
}

/// Owns the database engine process for one migration run and drives the
/// dump and restore tools against it.
pub struct DumpProcessController {
    settings: EngineSettings,
    runner: Box<dyn ProcessRunner>,
    engine: EngineSlot,
}

impl DumpProcessController {
    pub fn new(settings: EngineSettings, runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            settings,
            runner,
            engine: Arc::new(Mutex::new(EngineState::NotStarted)),
        }
    }

    /// Controller that launches real processes.
    pub fn system(settings: EngineSettings) -> Self {
        Self::new(settings, Box::new(SystemProcessRunner))
    }

    pub fn shutdown_handle(&self) -> EngineShutdownHandle {
        EngineShutdownHandle {
            slot: Arc::clone(&self.engine),
        }
    }

    pub fn is_engine_running(&self) -> bool {
        matches!(
            *self.engine.lock().unwrap_or_else(PoisonError::into_inner),
            EngineState::Running(_)
        )
    }

    /// Starts the engine with its configuration file unless this controller
    /// already started it. Fails with [`MigrationError::EngineStopped`] after
    /// shutdown.
    pub fn ensure_engine_running(&mut self) -> Result<()> {
        let mut guard = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            EngineState::NotStarted => {}
            EngineState::Running(_) => return Ok(()),
            EngineState::Stopped => return Err(MigrationError::EngineStopped),
        }

        let invocation = Invocation::new(self.settings.engine_executable())
            .arg("--config")
            .arg(self.settings.config_file.display().to_string());
        tracing::info!("Starting database engine: {}", invocation);

        let process = self.runner.spawn(&invocation).map_err(|e| {
            MigrationError::Engine(format!(
                "failed to start {}: {}",
                invocation.program.display(),
                e
            ))
        })?;
        *guard = EngineState::Running(process);
        Ok(())
    }

    /// Where a dump of `config`'s database lands inside `migration_directory`.
    pub fn dump_artifact_path(config: &ConnectionConfig, migration_directory: &Path) -> PathBuf {
        migration_directory.join(config.database())
    }

    /// Dumps the service's database, gzip-compressed, into `migration_directory`.
    pub fn dump(
        &mut self,
        service: &str,
        config: &ConnectionConfig,
        migration_directory: &Path,
    ) -> Result<()> {
        let invocation = connection_arguments(
            Invocation::new(self.settings.dump_executable()),
            config,
            MigrationAction::Capture,
        )
        .arg("--out")
        .arg(migration_directory.display().to_string())
        .arg("--gzip");

        self.ensure_engine_running()?;
        tracing::info!("Capturing database '{}' for {}", config.database(), service);
        let status = self.execute(&invocation)?;
        if !status.success {
            return Err(MigrationError::DumpFailed {
                database: config.database().to_string(),
                code: status.code,
            });
        }
        Ok(())
    }

    /// Restores the service's database from the dump under `migration_directory`.
    pub fn restore(
        &mut self,
        service: &str,
        config: &ConnectionConfig,
        migration_directory: &Path,
    ) -> Result<()> {
        let artifact = Self::dump_artifact_path(config, migration_directory);
        if !artifact.exists() {
            return Err(MigrationError::missing_capture(service, artifact));
        }

        let invocation = connection_arguments(
            Invocation::new(self.settings.restore_executable()),
            config,
            MigrationAction::Restore,
        )
        .arg("--gzip")
        .arg(artifact.display().to_string());

        self.ensure_engine_running()?;
        tracing::info!("Restoring database '{}' for {}", config.database(), service);
        let status = self.execute(&invocation)?;
        if !status.success {
            return Err(MigrationError::RestoreFailed {
                database: config.database().to_string(),
                code: status.code,
            });
        }
        Ok(())
    }

    /// Stops the engine if this controller started it. Idempotent; the
    /// controller cannot start an engine afterwards.
    pub fn shutdown(&mut self) -> Result<()> {
        match stop_engine(&self.engine) {
            Ok(true) => {
                tracing::info!("Database engine stopped");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(MigrationError::Engine(format!(
                "failed to stop database engine: {}",
                e
            ))),
        }
    }

    fn execute(&self, invocation: &Invocation) -> Result<RunStatus> {
        tracing::debug!("Running {}", invocation);
        self.runner.run(invocation).map_err(|e| {
            MigrationError::Engine(format!(
                "failed to run {}: {}",
                invocation.program.display(),
                e
            ))
        })
    }
}

impl Drop for DumpProcessController {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("{}", e);
        }
    }
}

/// Appends connection arguments for `config`.
///
/// The restore tool ignores the database segment of a connection string, so
/// restores through the custom form repeat the database explicitly.
fn connection_arguments(
    invocation: Invocation,
    config: &ConnectionConfig,
    action: MigrationAction,
) -> Invocation {
    match config {
        ConnectionConfig::Discrete {
            host,
            port,
            user,
            password,
            database,
        } => invocation
            .arg("--host")
            .arg(host.clone())
            .arg("--port")
            .arg(port.to_string())
            .arg("--db")
            .arg(database.clone())
            .arg("--username")
            .arg(user.clone())
            .arg("--password")
            .secret_arg(password.clone()),
        ConnectionConfig::Custom {
            connection_string,
            database,
        } => {
            let invocation = invocation.arg("--uri").secret_arg(connection_string.clone());
            match action {
                MigrationAction::Capture => invocation,
                MigrationAction::Restore => invocation.arg("--db").arg(database.clone()),
            }
        }
    }
}

/// In-process stand-in for [`SystemProcessRunner`] that records every
/// invocation instead of launching it.
#[cfg(any(test, feature = "test-support"))]
pub mod recording {
    use super::*;
    use std::fs;

    type RunHook = Arc<dyn Fn() + Send + Sync>;

    /// Shared view of what a [`RecordingRunner`] observed.
    #[derive(Debug, Default)]
    pub struct Recorded {
        pub spawned: Vec<Invocation>,
        pub ran: Vec<Invocation>,
        pub terminated: usize,
    }

    /// Records invocations. Dumps create `<out>/<db>/` so restores can find
    /// them; exit codes and hooks can be scripted per program file name.
    #[derive(Clone, Default)]
    pub struct RecordingRunner {
        recorded: Arc<Mutex<Recorded>>,
        failures: Arc<Mutex<Vec<(String, i32)>>>,
        hooks: Arc<Mutex<Vec<(String, RunHook)>>>,
    }

    struct RecordingEngine {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl EngineProcess for RecordingEngine {
        fn terminate(&mut self) -> io::Result<()> {
            self.recorded.lock().unwrap_or_else(PoisonError::into_inner).terminated += 1;
            Ok(())
        }
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every run of a program whose file stem is `program` exit with `code`.
        pub fn fail_program(&self, program: &str, code: i32) {
            self.failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((program.to_string(), code));
        }

        /// Calls `hook` every time a program whose file stem is `program` runs.
        pub fn on_run(&self, program: &str, hook: impl Fn() + Send + Sync + 'static) {
            self.hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((program.to_string(), Arc::new(hook)));
        }

        pub fn spawned(&self) -> Vec<Invocation> {
            self.lock().spawned.clone()
        }

        pub fn ran(&self) -> Vec<Invocation> {
            self.lock().ran.clone()
        }

        pub fn terminated(&self) -> usize {
            self.lock().terminated
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
            self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn spawn(&self, invocation: &Invocation) -> io::Result<Box<dyn EngineProcess>> {
            self.lock().spawned.push(invocation.clone());
            Ok(Box::new(RecordingEngine {
                recorded: Arc::clone(&self.recorded),
            }))
        }

        fn run(&self, invocation: &Invocation) -> io::Result<RunStatus> {
            self.lock().ran.push(invocation.clone());

            let stem = invocation
                .program
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            let hooks: Vec<RunHook> = self
                .hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(program, _)| *program == stem)
                .map(|(_, hook)| Arc::clone(hook))
                .collect();
            for hook in hooks {
                hook();
            }

            let failure = self
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .find(|(program, _)| *program == stem)
                .map(|(_, code)| *code);
            if let Some(code) = failure {
                return Ok(RunStatus::failed(code));
            }

            if let (Some(out), Some(db)) = (invocation.value_of("--out"), invocation.value_of("--db"))
            {
                fs::create_dir_all(Path::new(out).join(db))?;
            }
            Ok(RunStatus::SUCCESS)
        }
    }
}
