//! `kiln hash`: print the content hash of files.

use std::path::PathBuf;

use kiln_cache::FileHasher;

/// Runs the `kiln hash` command, printing `<hash>  <path>` per file.
pub fn run(files: &[PathBuf]) -> Result<i32, Box<dyn std::error::Error>> {
    for path in files {
        let hash = FileHasher::hash_file(path)?;
        println!("{hash:08x}  {}", path.display());
    }
    Ok(0)
}
