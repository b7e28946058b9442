//! Fixed reference data for the ohook 0.5 build.

/// Directory name of the main root under the system drive.
pub const APP_NAME: &str = "OHookBuilder";

/// Log file name, placed directly under the main root.
pub const LOG_FILE_NAME: &str = "ohook_compiler.log";

pub const SOURCE_DIR_NAME: &str = "ohook";
pub const COMPILERS_DIR_NAME: &str = "Compiladores";
pub const MINGW32_DIR_NAME: &str = "mingw32";
pub const MINGW64_DIR_NAME: &str = "mingw64";
pub const TEMP_DIR_NAME: &str = "Temp";
pub const OUTPUT_DIR_NAME: &str = "Output";

/// Top-level directory inside the source snapshot archive.
pub const SOURCE_ARCHIVE_ROOT: &str = "ohook-0.5";

pub const OHOOK_URL: &str = "https://github.com/asdcorp/ohook/archive/refs/tags/0.5.zip";
pub const MINGW32_URL: &str = "https://github.com/brechtsanders/winlibs_mingw/releases/download/11.4.0-11.0.0-ucrt-r1/winlibs-i686-posix-dwarf-gcc-11.4.0-mingw-w64ucrt-11.0.0-r1.7z";
pub const MINGW64_URL: &str = "https://github.com/brechtsanders/winlibs_mingw/releases/download/11.4.0-11.0.0-ucrt-r1/winlibs-x86_64-posix-seh-gcc-11.4.0-mingw-w64ucrt-11.0.0-r1.7z";

/// Known-good digests of the two compiled outputs.
pub const EXPECTED_CHECKSUMS: [(&str, &str); 2] = [
  (
    "sppc32.dll",
    "09865ea5993215965e8f27a74b8a41d15fd0f60f5f404cb7a8b3c7757acdab02",
  ),
  (
    "sppc64.dll",
    "393a1fa26deb3663854e41f2b687c188a9eacd87b23f17ea09422c4715cb5a9f",
  ),
];

/// Build tool path relative to the link root.
pub const BUILD_TOOL_RELATIVE: &str = "mingw64/bin/mingw32-make.exe";

/// Instant the compiler must observe: 2023-08-07 12:00:00 UTC.
pub const PINNED_EPOCH_SECS: i64 = 1_691_409_600;
pub const PINNED_TIMEZONE: &str = "UTC";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_PIN_INTERVAL_MS: u64 = 10;
pub const DEFAULT_SETTLE_MS: u64 = 2_000;
pub const DEFAULT_DRIFT_TOLERANCE_SECS: u64 = 60;
pub const DEFAULT_RESYNC_PAUSE_MS: u64 = 1_000;

/// Read chunk size for streamed hashing.
pub const HASH_CHUNK_SIZE: usize = 8192;

pub const ROOT_ENV: &str = "OHOOK_ROOT";
pub const LINK_ROOT_ENV: &str = "OHOOK_LINK_ROOT";
pub const SEVEN_ZIP_ENV: &str = "OHOOK_SEVEN_ZIP";
