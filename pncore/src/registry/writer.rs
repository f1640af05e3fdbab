use std::path::PathBuf;

use log::{debug, error, trace};
use pninstr::modules::Function;

use crate::{
    infection::has_preserve_none,
    registry::{NameSet, lock::RegistryFile},
    utils::{conf::RecordPolicy, error::PnResult},
};

/// Appends function names to the registry file.
///
/// The file is opened on the first append and kept open until the writer is
/// closed or dropped; the lock is taken around each single-line append only.
/// Names already appended by this writer are not written again.
#[derive(Debug)]
pub struct RegistryWriter {
    path: PathBuf,
    policy: RecordPolicy,
    handle: Option<RegistryFile>,
    recorded: NameSet,
}

impl RegistryWriter {
    pub fn new(path: impl Into<PathBuf>, policy: RecordPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            handle: None,
            recorded: NameSet::new(),
        }
    }

    /// Names appended by this writer so far.
    pub fn recorded(&self) -> &NameSet {
        &self.recorded
    }

    /// Returns true while the registry file is open.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Record `function`. Returns true if a new line was appended.
    ///
    /// Failures are logged and reported as "nothing appended".
    pub fn record(&mut self, function: &Function) -> bool {
        match self.try_record(function) {
            Ok(appended) => appended,
            Err(e) => {
                error!(
                    "Failed to record function `{}` in preserve-none registry: {}",
                    function.name, e
                );
                false
            }
        }
    }

    /// Fallible variant of [`RegistryWriter::record`]. On error the file handle
    /// is closed and reopened by the next call.
    pub fn try_record(&mut self, function: &Function) -> PnResult<bool> {
        if function.is_declaration() {
            return Ok(false);
        }

        if self.policy.is_attributed_only() && !has_preserve_none(function) {
            trace!(
                "Function `{}` does not carry preserve-none, not recorded",
                function.name
            );
            return Ok(false);
        }

        if self.recorded.contains(&function.name) {
            trace!("Function `{}` already recorded", function.name);
            return Ok(false);
        }

        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => RegistryFile::open_append(&self.path)?,
        };
        let handle = self.handle.insert(handle);

        let appended = match handle.lock() {
            Ok(mut lock) => lock
                .append_line(&function.name)
                .and_then(|_| lock.release()),
            Err(e) => Err(e),
        };

        if let Err(e) = appended {
            self.close();
            return Err(e);
        }

        debug!(
            "Recorded function `{}` in '{}'",
            function.name,
            self.path.display()
        );
        self.recorded.insert(&function.name);
        Ok(true)
    }

    /// Close the registry file. A later append reopens it.
    pub fn close(&mut self) {
        self.handle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::PnError;
    use pninstr::modules::Linkage;
    use tempfile::tempdir;

    #[test]
    fn writes_each_definition_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dedup.list");
        let mut writer = RegistryWriter::new(&path, RecordPolicy::AllDefinitions);
        let f = Function::definition("f", Linkage::Internal);
        let g = Function::definition("g", Linkage::External);

        assert!(!writer.is_open());
        assert!(writer.record(&f));
        assert!(writer.is_open());
        assert!(!writer.record(&f));
        assert!(writer.record(&g));
        assert!(!writer.record(&Function::definition("f", Linkage::Internal)));
        drop(writer);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "f\ng\n");
    }

    #[test]
    fn declarations_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decl.list");
        let mut writer = RegistryWriter::new(&path, RecordPolicy::AllDefinitions);

        assert!(!writer.record(&Function::declaration("ext", Linkage::External)));
        assert!(!writer.is_open());
        assert!(!path.exists());
    }

    #[test]
    fn attributed_only_policy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.list");
        let mut writer = RegistryWriter::new(&path, RecordPolicy::AttributedOnly);
        let plain = Function::definition("plain", Linkage::Internal);
        let mut marked = Function::definition("marked", Linkage::Internal);
        marked.add_fn_attr("no_callee_saved_registers", "1");

        assert!(!writer.record(&plain));
        assert!(writer.record(&marked));
        writer.close();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "marked\n");
    }

    #[test]
    fn directory_target_is_refused() {
        let dir = tempdir().unwrap();
        let mut writer = RegistryWriter::new(dir.path(), RecordPolicy::AllDefinitions);
        let f = Function::definition("f", Linkage::Internal);

        assert!(!writer.record(&f));
        assert!(writer.try_record(&f).unwrap_err().to_string().contains("not a regular file"));
        assert!(!writer.is_open());
        assert!(writer.recorded().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_to_directory_is_refused() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        let link = dir.path().join("registry.list");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut writer = RegistryWriter::new(&link, RecordPolicy::AllDefinitions);
        let f = Function::definition("f", Linkage::Internal);
        assert!(matches!(
            writer.try_record(&f),
            Err(PnError::NotRegularFile { .. })
        ));
        assert!(!writer.record(&f));
        assert!(!writer.is_open());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_to_regular_file_is_followed() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target.list");
        std::fs::write(&target, "").unwrap();
        let link = dir.path().join("registry.list");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut writer = RegistryWriter::new(&link, RecordPolicy::AllDefinitions);
        assert!(writer.record(&Function::definition("f", Linkage::Internal)));
        drop(writer);

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "f\n");
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("existing.list");
        std::fs::write(&path, "previous\n").unwrap();

        let mut writer = RegistryWriter::new(&path, RecordPolicy::AllDefinitions);
        assert!(writer.record(&Function::definition("next", Linkage::Internal)));
        drop(writer);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous\nnext\n");
    }
}
