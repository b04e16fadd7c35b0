use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

pub trait M3uaPathExt {
    /// Turn `out.mp4` into `out_<tag>.mp4`.
    ///
    /// Used for the `_en`, `_part` and `_stream` siblings of the output.
    fn add_tag<T: AsRef<OsStr>>(&mut self, tag: T);
}

impl M3uaPathExt for PathBuf {
    fn add_tag<T: AsRef<OsStr>>(&mut self, tag: T) {
        let mut name = self.file_stem().map(OsString::from).unwrap_or_default();
        name.push("_");
        name.push(tag);
        if let Some(extension) = self.extension() {
            name.push(".");
            name.push(extension);
        }
        self.set_file_name(name);
    }
}

/// Local file name for the segment at `index`: `{index:06}_{basename}`.
///
/// The index prefix keeps names unique when several uris share a basename.
pub fn segment_file_name(index: usize, uri: &str) -> String {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    let basename = path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or("segment.ts");
    format!("{index:06}_{basename}")
}

/// Path of the stream produced by concatenation or decryption, next to `output`.
pub(crate) fn intermediate_path(output: &Path, suffix: Option<&str>) -> PathBuf {
    let mut path = output.with_extension("ts");
    if let Some(suffix) = suffix {
        path.add_tag(suffix);
    }
    path
}
