//! Instance identity, resolved once from the invocation.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::IdentityError;
use crate::types::ProcessId;

/// Who this process is: where its executable lives, what it is called, its
/// pid and the argument vector it was started with.
///
/// Built once at startup and passed by reference to every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    exec_dir: Option<PathBuf>,
    program: String,
    pid: ProcessId,
    argv: Vec<OsString>,
}

impl InstanceIdentity {
    pub fn new(
        exec_dir: Option<PathBuf>,
        program: impl Into<String>,
        pid: ProcessId,
        argv: Vec<OsString>,
    ) -> Self {
        Self {
            exec_dir,
            program: program.into(),
            pid,
            argv,
        }
    }

    /// Resolve the identity of the running process.
    pub fn from_env() -> Self {
        Self::resolve(std::env::args_os().collect(), ProcessId(std::process::id()))
    }

    /// Resolve an identity from an argument vector.
    ///
    /// A directory that cannot be resolved is logged and left unset; the
    /// operations that need it report [`IdentityError::ExecDirUnresolved`].
    pub fn resolve(argv: Vec<OsString>, pid: ProcessId) -> Self {
        let invoked = argv.first().map(PathBuf::from).unwrap_or_default();
        let program = program_name(&invoked);

        let exec_dir = match resolve_exec_dir(&invoked) {
            Ok(dir) => Some(dir),
            Err(err) => {
                tracing::warn!(
                    invoked = %invoked.display(),
                    error = %err,
                    "failed to resolve executable directory"
                );
                None
            }
        };

        Self {
            exec_dir,
            program,
            pid,
            argv,
        }
    }

    pub fn exec_dir(&self) -> Result<&Path, IdentityError> {
        self.exec_dir
            .as_deref()
            .ok_or_else(|| IdentityError::ExecDirUnresolved {
                program: self.program.clone(),
            })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// The original argument vector, `argv[0]` included.
    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    /// `<exec_dir>/<program>`: the file a rebuild overwrites.
    pub fn executable(&self) -> Result<PathBuf, IdentityError> {
        Ok(self.exec_dir()?.join(&self.program))
    }
}

fn program_name(invoked: &Path) -> String {
    match invoked.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default(),
    }
}

/// Absolute parent of `argv[0]` when it carries a directory; otherwise the
/// program was found through `PATH` and the running executable is used.
fn resolve_exec_dir(invoked: &Path) -> io::Result<PathBuf> {
    let has_dir = invoked
        .parent()
        .is_some_and(|parent| !parent.as_os_str().is_empty());

    let executable = if has_dir {
        std::path::absolute(invoked)?
    } else {
        std::env::current_exe()?
    };

    executable
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no parent directory", executable.display()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn absolute_invocation_gives_its_directory() {
        let identity = InstanceIdentity::resolve(argv(&["/srv/app/worker", "-reload"]), ProcessId(7));
        assert_eq!(identity.exec_dir().unwrap(), Path::new("/srv/app"));
        assert_eq!(identity.program(), "worker");
        assert_eq!(identity.pid(), ProcessId(7));
        assert_eq!(identity.executable().unwrap(), PathBuf::from("/srv/app/worker"));
    }

    #[test]
    fn relative_invocation_is_made_absolute() {
        let identity = InstanceIdentity::resolve(argv(&["./bin/worker"]), ProcessId(7));
        let dir = identity.exec_dir().unwrap();
        assert!(dir.is_absolute(), "got {}", dir.display());
        assert!(dir.ends_with("bin"), "got {}", dir.display());
        assert_eq!(identity.program(), "worker");
    }

    #[test]
    fn bare_name_falls_back_to_current_exe() {
        let identity = InstanceIdentity::resolve(argv(&["worker"]), ProcessId(7));
        let expected = std::env::current_exe().unwrap();
        assert_eq!(identity.exec_dir().unwrap(), expected.parent().unwrap());
        assert_eq!(identity.program(), "worker");
    }

    #[test]
    fn argv_is_kept_verbatim() {
        let args = argv(&["./worker", "-graceful", "--port", "8080"]);
        let identity = InstanceIdentity::resolve(args.clone(), ProcessId(7));
        assert_eq!(identity.argv(), args.as_slice());
    }

    #[test]
    fn unresolved_directory_surfaces_on_use() {
        let identity = InstanceIdentity::new(None, "worker", ProcessId(7), argv(&["worker"]));
        let err = identity.exec_dir().unwrap_err();
        assert!(matches!(err, IdentityError::ExecDirUnresolved { .. }));
        assert!(err.to_string().contains("worker"), "got: {err}");
        assert!(identity.executable().is_err());
    }
}
