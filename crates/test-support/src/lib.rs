//! Shared access to the checked-in fixtures under `tests/fixtures` at the
//! workspace root: captured wire payloads and sample configuration files.

pub mod fixtures {
    use std::path::{Path, PathBuf};

    /// Absolute path of the workspace-level fixture directory.
    pub fn root() -> PathBuf {
        // crates/test-support -> workspace root
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .ancestors()
            .nth(2)
            .expect("test-support crate should live two levels below the workspace root")
            .join("tests/fixtures")
    }

    /// A captured socket/history JSON payload from `fixtures/wire`.
    pub fn wire(name: &str) -> String {
        load("wire", name)
    }

    /// A sample TOML configuration from `fixtures/config`.
    pub fn config(name: &str) -> String {
        load("config", name)
    }

    fn load(kind: &str, name: &str) -> String {
        let path = root().join(kind).join(name);
        std::fs::read_to_string(&path)
            .unwrap_or_else(|error| panic!("cannot load fixture {}: {error}", path.display()))
    }
}
