//! Options structs for extraction.

use derive_builder::Builder;

/// Default copy buffer used when streaming item data out of a package.
pub const DEFAULT_CHUNK_SIZE: usize = 0x8000;

/// Options for [`PkgArchive::extract_all`](crate::pkg::PkgArchive::extract_all).
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct ExtractOptions {
    /// Replace files that already exist in the target directory.
    #[builder(default)]
    pub overwrite: bool,
    /// Size of each chunk copied from the decrypted body.
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    pub chunk_size: usize,
    /// When set, the NPD header of every protected file is checked against
    /// this klicensee and mismatches are logged.
    #[builder(default, setter(strip_option))]
    pub klicensee: Option<[u8; 16]>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            klicensee: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default() {
        let built = ExtractOptionsBuilder::default().build().unwrap();
        assert_eq!(built, ExtractOptions::default());
    }

    #[test]
    fn builder_sets_fields() {
        let opts = ExtractOptionsBuilder::default()
            .overwrite(true)
            .chunk_size(16usize)
            .klicensee([7u8; 16])
            .build()
            .unwrap();

        assert!(opts.overwrite);
        assert_eq!(opts.chunk_size, 16);
        assert_eq!(opts.klicensee, Some([7u8; 16]));
    }
}
