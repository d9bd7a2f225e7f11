//! Fixed filesystem layout of a ColumnStore-style node
//!
//! These paths are part of the on-disk contract shared with the engine
//! services and must not drift from the installed layout.

/// Engine configuration root
pub const MCS_ETC_PATH: &str = "/etc/columnstore";

/// Default engine configuration snapshot
pub const DEFAULT_MCS_CONF_PATH: &str = "/etc/columnstore/Columnstore.xml";

/// Engine data root
pub const MCS_DATA_PATH: &str = "/var/lib/columnstore";

/// Module identity file, contains `pm<N>\n`
pub const MCS_MODULE_FILE_PATH: &str = "/var/lib/columnstore/local/module";

/// DBRM save files, relative to a dbroot
pub const EM_PATH_SUFFIX: &str = "data1/systemFiles/dbrm";

/// Current BRM save-set pointer
pub const MCS_BRM_CURRENT_PATH: &str =
    "/var/lib/columnstore/data1/systemFiles/dbrm/BRM_saves_current";

/// Keys file for cross-engine credential decryption
pub const MCS_SECRETS_FILE_PATH: &str = "/var/lib/columnstore/.secrets";

/// Directory holding the engine binaries
pub const MCS_INSTALL_BIN: &str = "/usr/bin";

/// Per-service log files live here
pub const MCS_LOG_PATH: &str = "/var/log/mariadb/columnstore";

/// Fallback when `ldconfig` knows no jemalloc
pub const LIBJEMALLOC_DEFAULT_PATH: &str = "/usr/lib/x86_64-linux-gnu/libjemalloc.so.2";

/// Schema bootstrap utility, run after DDLProc comes up on the primary
pub const DBBUILDER_CMD: &str = "/usr/bin/dbbuilder 7";
