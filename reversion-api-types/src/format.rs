use uuid::Uuid;

/// The 128-bit value backing [`FORMAT_V1`], broken into groups for
/// readability. Arbitrary but fixed: once a repository is created with this
/// marker, it must never change meaning.
const FORMAT_V1_BITS: u128 = 0x7265_7665_7273_696f_6e5f_6632_3031_0001;

/// Format identifier for the repository layout described in `spec.md` §6
/// (`config.json` + `manifest.db` + `blobs/<xx>/<full>`).
pub const FORMAT_V1: Uuid = Uuid::from_u128(FORMAT_V1_BITS);

/// The repository file name carrying the format marker, read without opening
/// the database — see `Repository::check`.
pub const VERSION_FILE_NAME: &str = "version";

/// Cheaply check whether `text` (the contents of the `version` file) names a
/// format this implementation understands.
pub fn is_supported_format(text: &str) -> bool {
    text.trim() == FORMAT_V1.to_string()
}

#[test]
fn recognizes_its_own_marker() {
    assert!(is_supported_format(&FORMAT_V1.to_string()));
    assert!(!is_supported_format("not-a-uuid"));
    assert!(!is_supported_format(&Uuid::nil().to_string()));
}
