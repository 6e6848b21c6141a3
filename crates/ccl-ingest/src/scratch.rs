use std::io;
use std::path::Path;
use tempfile::TempDir;

/// Exclusively owned extraction directory for one ingestion call. Removed by
/// [`Scratch::release`], or on drop if the call unwinds first.
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
}

pub fn acquire_scratch() -> io::Result<Scratch> {
    let dir = tempfile::Builder::new().prefix("ccl-ingest-").tempdir()?;
    Ok(Scratch { dir })
}

impl Scratch {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn release(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_removes_the_directory() {
        let scratch = acquire_scratch().expect("scratch");
        let path = scratch.path().to_path_buf();
        std::fs::write(path.join("x"), b"1").expect("write");
        scratch.release().expect("release");
        assert!(!path.exists());
    }

    #[test]
    fn drop_removes_the_directory() {
        let path = {
            let scratch = acquire_scratch().expect("scratch");
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
