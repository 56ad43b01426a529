/// Default ceiling for a single extracted marker file (256 MiB). Large
/// rpmdb `Packages` files are the only thing that come close.
pub const DEFAULT_MAX_MEMBER_SIZE: u64 = 256 * 1024 * 1024;

/// Knobs for a single scan. Built once from the CLI and passed down by
/// reference; nothing in the core reads process-wide state.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Program used to query staged rpm databases.
    pub rpm_command: String,

    /// Marker files larger than this are skipped instead of buffered.
    pub max_member_size: u64,

    /// Also read `var/lib/apt/lists/*_Packages` indexes in apt layers.
    pub include_apt_lists: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            rpm_command: "rpm".to_string(),
            max_member_size: DEFAULT_MAX_MEMBER_SIZE,
            include_apt_lists: true,
        }
    }
}

impl ScanOptions {
    pub fn from_cli(rpm: Option<String>, max_member_size: Option<u64>, no_apt_lists: bool) -> Self {
        let defaults = Self::default();
        Self {
            rpm_command: rpm.unwrap_or(defaults.rpm_command),
            max_member_size: max_member_size.unwrap_or(defaults.max_member_size),
            include_apt_lists: !no_apt_lists,
        }
    }
}
