//! WASI Preview 1 import naming.
//!
//! Imports from `wasi_snapshot_preview1` (or the older `wasi_unstable`) are
//! linked against `__wasi_<name>`. The runtime also exports each function
//! under its unprefixed WASI name so objects built for either convention link.

/// Functions the runtime provides for WASI Preview 1.
pub const WASI_PREVIEW1_FUNCTIONS: &[&str] = &[
    "args_get",
    "args_sizes_get",
    "environ_get",
    "environ_sizes_get",
    "clock_res_get",
    "clock_time_get",
    "fd_advise",
    "fd_allocate",
    "fd_close",
    "fd_datasync",
    "fd_fdstat_get",
    "fd_fdstat_set_flags",
    "fd_fdstat_set_rights",
    "fd_filestat_get",
    "fd_filestat_set_size",
    "fd_filestat_set_times",
    "fd_pread",
    "fd_prestat_get",
    "fd_prestat_dir_name",
    "fd_pwrite",
    "fd_read",
    "fd_readdir",
    "fd_renumber",
    "fd_seek",
    "fd_sync",
    "fd_tell",
    "fd_write",
    "path_create_directory",
    "path_filestat_get",
    "path_filestat_set_times",
    "path_link",
    "path_open",
    "path_readlink",
    "path_remove_directory",
    "path_rename",
    "path_symlink",
    "path_unlink_file",
    "poll_oneoff",
    "proc_exit",
    "proc_raise",
    "sched_yield",
    "random_get",
    "sock_accept",
    "sock_recv",
    "sock_send",
    "sock_shutdown",
];

/// Whether `module` names a WASI Preview 1 import module.
pub fn is_wasi_module(module: &str) -> bool {
    matches!(module, "wasi_snapshot_preview1" | "wasi_unstable")
}

/// Prefixed runtime symbol for a WASI import, or `None` for non-WASI modules.
pub fn wasi_symbol<'a>(module: &str, name: &'a str) -> Option<WasiSymbol<'a>> {
    is_wasi_module(module).then_some(WasiSymbol(name))
}

/// Display adapter for `__wasi_<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasiSymbol<'a>(&'a str);

impl WasiSymbol<'_> {
    /// Whether the runtime is known to provide this function.
    pub fn is_known(&self) -> bool {
        WASI_PREVIEW1_FUNCTIONS.contains(&self.0)
    }
}

impl core::fmt::Display for WasiSymbol<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "__wasi_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::string::ToString;

    #[test]
    fn wasi_modules_get_prefixed() {
        let sym = wasi_symbol("wasi_snapshot_preview1", "fd_write").unwrap();
        assert_eq!(sym.to_string(), "__wasi_fd_write");
        assert!(sym.is_known());
        assert!(wasi_symbol("wasi_unstable", "proc_exit").is_some());
    }

    #[test]
    fn other_modules_are_not_wasi() {
        assert!(wasi_symbol("env", "fd_write").is_none());
        assert!(!is_wasi_module("wasi"));
    }
}
