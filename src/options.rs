//! Option bag, defaults and merging rules.
//!
//! Options are layered: process-wide defaults, per-service overrides, then
//! per-call and per-object overrides. The typed [`Options`] struct holds the
//! fully-merged values; [`OptionsPatch`] is the all-optional overlay used at
//! each layer. Auth-related fields are only meaningful at service
//! construction, where [`process_options`] applies the legacy/new-style
//! reconciliation rules.

use std::collections::HashMap;

use crate::error::SwiftError;

/// Default worker count for every pool.
pub const DEFAULT_THREADS: usize = 10;

/// Default retry budget handed to each connection.
pub const DEFAULT_RETRIES: u32 = 5;

/// Fully-merged option set for one operation.
#[derive(Debug, Clone)]
pub struct Options {
    // Auth / global.
    pub auth_version: String,
    pub auth: String,
    pub user: String,
    pub key: String,
    pub os_auth_url: String,
    pub os_username: String,
    pub os_password: String,
    pub os_options: HashMap<String, String>,
    pub retries: u32,

    // Worker pools.
    pub object_threads: usize,
    pub segment_threads: usize,
    pub container_threads: usize,

    // Upload.
    pub segment_size: Option<String>,
    pub use_slo: bool,
    pub segment_container: Option<String>,
    pub leave_segments: bool,
    pub changed: bool,
    pub skip_identical: bool,
    pub checksum: bool,

    // Listing.
    pub long: bool,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: String,

    // Headers / metadata.
    pub header: Vec<String>,
    pub meta: Vec<String>,

    // Download.
    pub out_file: Option<String>,
    pub out_directory: Option<String>,
    pub remove_prefix: bool,
    pub no_download: bool,

    // Copy.
    pub destination: Option<String>,
    pub fresh_metadata: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            auth_version: "1.0".to_string(),
            auth: String::new(),
            user: String::new(),
            key: String::new(),
            os_auth_url: String::new(),
            os_username: String::new(),
            os_password: String::new(),
            os_options: HashMap::new(),
            retries: DEFAULT_RETRIES,
            object_threads: DEFAULT_THREADS,
            segment_threads: DEFAULT_THREADS,
            container_threads: DEFAULT_THREADS,
            segment_size: None,
            use_slo: false,
            segment_container: None,
            leave_segments: false,
            changed: false,
            skip_identical: false,
            checksum: true,
            long: false,
            prefix: None,
            delimiter: None,
            marker: String::new(),
            header: Vec::new(),
            meta: Vec::new(),
            out_file: None,
            out_directory: None,
            remove_prefix: false,
            no_download: false,
            destination: None,
            fresh_metadata: false,
        }
    }
}

impl Options {
    /// Returns a copy with a patch applied on top.
    #[must_use]
    pub fn patched(&self, patch: &OptionsPatch) -> Self {
        let mut merged = self.clone();
        patch.apply(&mut merged);
        merged
    }

    /// Parses `segment_size` into a byte count.
    ///
    /// Returns `Ok(None)` when unset. A set value must be a positive
    /// integer; anything else is an input error raised before any job is
    /// scheduled.
    pub fn segment_size_bytes(&self) -> Result<Option<u64>, SwiftError> {
        match self.segment_size.as_deref() {
            None | Some("") | Some("0") => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| SwiftError::new("Segment size should be an integer value")),
        }
    }
}

/// All-optional overlay applied on top of an [`Options`] layer.
///
/// Unset fields leave the lower layer untouched.
#[derive(Debug, Clone, Default)]
pub struct OptionsPatch {
    pub retries: Option<u32>,
    pub object_threads: Option<usize>,
    pub segment_threads: Option<usize>,
    pub container_threads: Option<usize>,
    pub segment_size: Option<String>,
    pub use_slo: Option<bool>,
    pub segment_container: Option<String>,
    pub leave_segments: Option<bool>,
    pub changed: Option<bool>,
    pub skip_identical: Option<bool>,
    pub checksum: Option<bool>,
    pub long: Option<bool>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    pub header: Option<Vec<String>>,
    pub meta: Option<Vec<String>>,
    pub out_file: Option<String>,
    pub out_directory: Option<String>,
    pub remove_prefix: Option<bool>,
    pub no_download: Option<bool>,
    pub destination: Option<String>,
    pub fresh_metadata: Option<bool>,
}

macro_rules! apply_field {
    ($patch:ident, $target:ident, $($field:ident),+ $(,)?) => {
        $(if let Some(v) = &$patch.$field {
            $target.$field = v.clone();
        })+
    };
}

impl OptionsPatch {
    /// Applies every set field onto `target`.
    pub fn apply(&self, target: &mut Options) {
        apply_field!(
            self, target, retries, object_threads, segment_threads, container_threads,
            use_slo, leave_segments, changed, skip_identical, checksum, long,
            remove_prefix, no_download, fresh_metadata, marker, header, meta,
        );
        // Option-valued fields replace rather than merge.
        if self.segment_size.is_some() {
            target.segment_size = self.segment_size.clone();
        }
        if self.segment_container.is_some() {
            target.segment_container = self.segment_container.clone();
        }
        if self.prefix.is_some() {
            target.prefix = self.prefix.clone();
        }
        if self.delimiter.is_some() {
            target.delimiter = self.delimiter.clone();
        }
        if self.out_file.is_some() {
            target.out_file = self.out_file.clone();
        }
        if self.out_directory.is_some() {
            target.out_directory = self.out_directory.clone();
        }
        if self.destination.is_some() {
            target.destination = self.destination.clone();
        }
    }
}

/// Reconciles auth options at service construction.
///
/// Rules:
/// - `auth_version` becomes `2.0` unless it is explicitly `3`/`3.0` or `1`/
///   `1.0` with the legacy trio (`auth`, `user`, `key`) fully present.
/// - Empty legacy fields are filled from their `os_*` counterparts.
/// - `os_options` always ends up materialised (possibly empty).
pub fn process_options(options: &mut Options) {
    let legacy_complete =
        !options.auth.is_empty() && !options.user.is_empty() && !options.key.is_empty();

    let explicit_v3 = matches!(options.auth_version.as_str(), "3" | "3.0");
    let explicit_v1 = matches!(options.auth_version.as_str(), "1" | "1.0");
    if !explicit_v3 && !(explicit_v1 && legacy_complete) {
        options.auth_version = "2.0".to_string();
    }

    if !legacy_complete {
        if options.auth.is_empty() {
            options.auth = options.os_auth_url.clone();
        }
        if options.user.is_empty() {
            options.user = options.os_username.clone();
        }
        if options.key.is_empty() {
            options.key = options.os_password.clone();
        }
    }
}

/// Splits `"Name:Value"` items into a header map.
///
/// Keys are title-cased after the optional prefix is prepended. An item
/// without a `:` is an input error.
pub fn split_headers(
    items: &[String],
    prefix: &str,
) -> Result<HashMap<String, String>, SwiftError> {
    let mut headers = HashMap::new();
    for item in items {
        let Some((name, value)) = item.split_once(':') else {
            return Err(SwiftError::new(format!(
                "Metadata parameter {item} invalid. It must contain a ':'."
            )));
        };
        headers.insert(title_case(&format!("{prefix}{name}")), value.to_string());
    }
    Ok(headers)
}

/// Uppercases the first letter of each alphabetic run, lowercases the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}
