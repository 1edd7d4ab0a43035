use std::path::Path;

use anyhow::Context;

pub fn load_text(path: impl AsRef<Path>) -> anyhow::Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).with_context(|| format!("unable to read {}", path.display()))
}
