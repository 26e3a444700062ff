use std::path::Path;

use sysinfo::{Disks, Pid, ProcessesToUpdate, System};

const MIB: u64 = 1024 * 1024;

/// Resident-set size of `pid` in MiB; 0 when the process is gone.
pub fn process_memory_mib(pid: u32) -> u64 {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(|p| p.memory() / MIB).unwrap_or(0)
}

/// Used and total MiB of the disk holding `path`, resolved through the
/// longest matching mount point. The path itself may not exist yet (the
/// world directory appears on first boot); its closest existing ancestor
/// decides the disk.
pub fn disk_usage_mib(path: &Path) -> (u64, u64) {
    let resolved = resolve_existing(path);
    let disks = Disks::new_with_refreshed_list();
    let best = disks
        .list()
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());
    match best {
        Some(disk) => (
            (disk.total_space().saturating_sub(disk.available_space())) / MIB,
            disk.total_space() / MIB,
        ),
        None => (0, 0),
    }
}

fn resolve_existing(path: &Path) -> std::path::PathBuf {
    let mut current = path;
    loop {
        if let Ok(canonical) = std::fs::canonicalize(current) {
            return canonical;
        }
        match current.parent() {
            Some(parent) if parent.as_os_str().is_empty() => {
                return std::env::current_dir().unwrap_or_else(|_| path.to_path_buf());
            }
            Some(parent) => current = parent,
            None => return path.to_path_buf(),
        }
    }
}
