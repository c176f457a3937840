//! Handles to kernel network namespaces and thread-pinned scoped execution.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::error;
use nix::sched::{setns, CloneFlags};
use thiserror::Error;
use tokio::task;

const PROC_SELF_NETNS: &str = "/proc/self/ns/net";

#[derive(Debug, Error)]
pub enum NetnsError {
    #[error("Couldn't open network namespace '{}'! Reason: {}", .path.display(), .source)]
    Open { path: PathBuf, source: io::Error },
    #[error("Couldn't enumerate the namespace registry '{}'! Reason: {}", .path.display(), .source)]
    ReadRegistry { path: PathBuf, source: io::Error },
    #[error("Couldn't duplicate the namespace descriptor! Reason: {}", .0)]
    CloneDescriptor(io::Error),
    #[error("Couldn't enter the network namespace! Reason: {}", .0)]
    Enter(nix::Error),
    #[error("The namespace-scoped task was aborted! Reason: {}", .0)]
    ScopedTask(task::JoinError),
}

/// An open handle to one kernel network namespace.
#[derive(Debug)]
pub struct Netns {
    name: String,
    file: File,
}

impl Netns {
    /// Opens a named namespace from a registry directory (conventionally
    /// `/var/run/netns`).
    pub fn open(registry: &Path, name: &str) -> Result<Self, NetnsError> {
        let path = registry.join(name);
        let file = File::open(&path).map_err(|source| NetnsError::Open { path, source })?;

        Ok(Self {
            name: name.to_owned(),
            file,
        })
    }

    /// Opens the namespace the calling process currently lives in.
    pub fn current() -> Result<Self, NetnsError> {
        let path = PathBuf::from(PROC_SELF_NETNS);
        let file = File::open(&path).map_err(|source| NetnsError::Open { path, source })?;

        Ok(Self {
            name: "current".to_owned(),
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Duplicates the underlying namespace descriptor, e.g. to hand it to a
    /// link move request.
    pub fn clone_descriptor(&self) -> Result<File, NetnsError> {
        self.file.try_clone().map_err(NetnsError::CloneDescriptor)
    }

    /// Lists the namespace names present in a registry directory.
    pub fn list_names(registry: &Path) -> Result<Vec<String>, NetnsError> {
        let read_error = |source| NetnsError::ReadRegistry {
            path: registry.to_path_buf(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(registry).map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(names)
    }

    /// Runs `f` on a dedicated OS thread whose network namespace membership
    /// is switched to this namespace for the duration of the call. Namespace
    /// membership is thread-scoped, so the closure must not be migrated off
    /// its thread; the original membership is restored on every exit path,
    /// including unwinding.
    pub async fn execute<T, F>(&self, f: F) -> Result<T, NetnsError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let target = self.clone_descriptor()?;

        task::spawn_blocking(move || {
            let guard = NetnsGuard::enter(&target)?;
            let output = f();
            drop(guard);

            Ok(output)
        })
        .await
        .map_err(NetnsError::ScopedTask)?
    }
}

struct NetnsGuard {
    original: File,
}

impl NetnsGuard {
    fn enter(target: &File) -> Result<Self, NetnsError> {
        let path = PathBuf::from(PROC_SELF_NETNS);
        let original = File::open(&path).map_err(|source| NetnsError::Open { path, source })?;

        setns(target, CloneFlags::CLONE_NEWNET).map_err(NetnsError::Enter)?;

        Ok(Self { original })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(error) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            error!("Couldn't restore the thread's original network namespace! {error:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};

    use super::Netns;

    #[test]
    fn registry_enumeration_lists_entries_sorted() {
        let registry = std::env::temp_dir().join(format!("netns-registry-{}", std::process::id()));
        fs::create_dir_all(&registry).unwrap();
        File::create(registry.join("cni-b")).unwrap();
        File::create(registry.join("cni-a")).unwrap();

        let names = Netns::list_names(&registry).unwrap();

        assert_eq!(names, ["cni-a", "cni-b"]);

        fs::remove_dir_all(&registry).unwrap();
    }
}
