use crate::errors::*;
use std::fs::DirBuilder;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// `OutputPath` represents the run directory all files written to disk
/// share.
///
/// The `.with_extension()` method allows for easy derivation of the
/// per-run files living next to the grid records.
#[derive(Clone)]
pub struct OutputPath {
    dir: PathBuf,
    id: String,
}

impl OutputPath {
    pub fn new(root: &Path, prefix: &str) -> OutputPath {
        let id = create_output_id(prefix);

        OutputPath {
            dir: root.join(&id),
            id,
        }
    }

    pub fn create(&self) -> Result<()> {
        DirBuilder::new()
            .recursive(true)
            .create(&self.dir)
            .chain_err(|| format!("Unable to create output directory '{}'", self.dir.display()))
    }

    /// Returns the run-file path with the given extension.
    pub fn with_extension(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.id, ext))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[allow(dead_code)]
    pub fn get_id(&self) -> &str {
        &self.id
    }
}

/// Returns an ID based on prefix and start time for simulation output.
fn create_output_id(prefix: &str) -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}-{}", prefix, stamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_inside_the_run_directory() {
        let root = Path::new("/foo/bar");
        let op = OutputPath::new(&root, "prefix.with.dots");
        let id = op.get_id();

        assert!(id.starts_with("prefix.with.dots-"));
        assert_eq!(
            op.with_extension("toml").to_str().unwrap(),
            format!("{}/{}/{}.toml", root.display(), id, id)
        );
    }
}
