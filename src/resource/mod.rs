//! Resource kinds hostward can manage
//!
//! - `file`: a regular file's content, mode and ownership
//! - `apt`: a Debian package, applied together with every other package

pub mod apt;
pub mod file;

use converge::Registry;

/// Registry holding every built-in kind
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_single(file::File).register_group(apt::Apt);
    registry
}
