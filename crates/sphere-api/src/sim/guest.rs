//! Guest filesystem and process table of a simulated VM.

use crate::error::{ApiError, Result};
use crate::types::{FileKind, GuestFileEntry, GuestProcess, ProcessSpec};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// First pid handed out by a fresh process table.
const FIRST_PID: i64 = 1000;

/// Exit code reported for processes killed through `terminate_process`.
const TERMINATED_EXIT_CODE: i32 = -1;

/// Normalise an absolute guest path, collapsing repeated and trailing slashes.
pub(crate) fn normalize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(ApiError::guest_file(path, "path must be absolute"));
    }
    let mut normalized = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn is_within(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path != "/";
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

fn rebase(path: &str, from: &str, to: &str) -> String {
    format!("{}{}", to, &path[from.len()..])
}

/// In-memory guest filesystem.
#[derive(Debug, Clone)]
pub(crate) struct GuestFs {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
}

impl Default for GuestFs {
    fn default() -> Self {
        let dirs = ["/", "/tmp"].iter().map(|d| d.to_string()).collect();
        Self {
            files: BTreeMap::new(),
            dirs,
        }
    }
}

impl GuestFs {
    fn ensure_parent(&self, path: &str) -> Result<()> {
        let parent = parent_of(path);
        if !self.dirs.contains(parent) {
            return Err(ApiError::guest_file(
                path,
                format!("parent directory {parent} does not exist"),
            ));
        }
        Ok(())
    }

    pub(crate) fn write(&mut self, path: &str, data: Bytes, overwrite: bool) -> Result<()> {
        let path = normalize(path)?;
        if self.dirs.contains(&path) {
            return Err(ApiError::guest_file(path, "is a directory"));
        }
        if !overwrite && self.files.contains_key(&path) {
            return Err(ApiError::guest_file(path, "file exists"));
        }
        self.ensure_parent(&path)?;
        self.files.insert(path, data);
        Ok(())
    }

    pub(crate) fn read(&self, path: &str) -> Result<Bytes> {
        let path = normalize(path)?;
        self.files
            .get(&path)
            .cloned()
            .ok_or_else(|| ApiError::guest_file(path, "no such file"))
    }

    pub(crate) fn move_file(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let src = normalize(src)?;
        let dst = normalize(dst)?;
        if !self.files.contains_key(&src) {
            return Err(ApiError::guest_file(src, "no such file"));
        }
        if self.dirs.contains(&dst) {
            return Err(ApiError::guest_file(dst, "is a directory"));
        }
        if !overwrite && self.files.contains_key(&dst) {
            return Err(ApiError::guest_file(dst, "file exists"));
        }
        self.ensure_parent(&dst)?;
        if let Some(data) = self.files.remove(&src) {
            self.files.insert(dst, data);
        }
        Ok(())
    }

    pub(crate) fn delete_file(&mut self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        match self.files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(ApiError::guest_file(path, "no such file")),
        }
    }

    pub(crate) fn list(&self, path: &str) -> Result<Vec<GuestFileEntry>> {
        let path = normalize(path)?;
        if !self.dirs.contains(&path) {
            return Err(ApiError::guest_file(path, "no such directory"));
        }
        let dirs = self
            .dirs
            .iter()
            .filter(|d| d.as_str() != "/" && parent_of(d) == path)
            .map(|d| GuestFileEntry {
                path: d.clone(),
                kind: FileKind::Directory,
                size: 0,
            });
        let files = self
            .files
            .iter()
            .filter(|(f, _)| parent_of(f) == path)
            .map(|(f, data)| GuestFileEntry {
                path: f.clone(),
                kind: FileKind::File,
                size: data.len() as u64,
            });
        Ok(dirs.chain(files).collect())
    }

    pub(crate) fn make_directory(&mut self, path: &str, create_parents: bool) -> Result<()> {
        let path = normalize(path)?;
        if self.dirs.contains(&path) || self.files.contains_key(&path) {
            return Err(ApiError::guest_file(path, "already exists"));
        }
        if !create_parents {
            self.ensure_parent(&path)?;
            self.dirs.insert(path);
            return Ok(());
        }

        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            if self.files.contains_key(&current) {
                return Err(ApiError::guest_file(current, "is a file"));
            }
            self.dirs.insert(current.clone());
        }
        Ok(())
    }

    pub(crate) fn move_directory(&mut self, src: &str, dst: &str) -> Result<()> {
        let src = normalize(src)?;
        let dst = normalize(dst)?;
        if src == "/" || !self.dirs.contains(&src) {
            return Err(ApiError::guest_file(src, "no such directory"));
        }
        if self.dirs.contains(&dst) || self.files.contains_key(&dst) {
            return Err(ApiError::guest_file(dst, "already exists"));
        }
        if is_within(&dst, &src) {
            return Err(ApiError::guest_file(dst, "cannot move a directory into itself"));
        }
        self.ensure_parent(&dst)?;

        let moved_dirs: Vec<String> = self
            .dirs
            .iter()
            .filter(|d| **d == src || is_within(d, &src))
            .cloned()
            .collect();
        for dir in moved_dirs {
            self.dirs.remove(&dir);
            self.dirs.insert(rebase(&dir, &src, &dst));
        }

        let moved_files: Vec<String> = self
            .files
            .keys()
            .filter(|f| is_within(f, &src))
            .cloned()
            .collect();
        for file in moved_files {
            if let Some(data) = self.files.remove(&file) {
                self.files.insert(rebase(&file, &src, &dst), data);
            }
        }
        Ok(())
    }

    pub(crate) fn delete_directory(&mut self, path: &str, recursive: bool) -> Result<()> {
        let path = normalize(path)?;
        if path == "/" || !self.dirs.contains(&path) {
            return Err(ApiError::guest_file(path, "no such directory"));
        }
        let has_children = self.dirs.iter().any(|d| is_within(d, &path))
            || self.files.keys().any(|f| is_within(f, &path));
        if has_children && !recursive {
            return Err(ApiError::guest_file(path, "directory not empty"));
        }
        self.dirs.retain(|d| *d != path && !is_within(d, &path));
        self.files.retain(|f, _| !is_within(f, &path));
        Ok(())
    }

    pub(crate) fn file(&self, path: &str) -> Option<Bytes> {
        normalize(path).ok().and_then(|p| self.files.get(&p).cloned())
    }

    pub(crate) fn has_directory(&self, path: &str) -> bool {
        normalize(path).map(|p| self.dirs.contains(&p)).unwrap_or(false)
    }
}

/// How a simulated guest program behaves once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramBehavior {
    /// Exit code reported when the program ends.
    #[serde(default)]
    pub exit_code: i32,
    /// Number of process listings during which the program is still running.
    #[serde(default)]
    pub polls: u32,
    /// Never exit on its own.
    #[serde(default)]
    pub hang: bool,
}

impl Default for ProgramBehavior {
    fn default() -> Self {
        Self {
            exit_code: 0,
            polls: 0,
            hang: false,
        }
    }
}

impl ProgramBehavior {
    /// Program that exits with `exit_code` after `polls` listings.
    pub fn exits_after(polls: u32, exit_code: i32) -> Self {
        Self {
            exit_code,
            polls,
            hang: false,
        }
    }

    /// Program that never exits.
    pub fn hangs() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    remaining: u32,
    behavior: ProgramBehavior,
}

/// Guest process table.
#[derive(Debug, Clone)]
pub(crate) struct ProcessTable {
    entries: Vec<GuestProcess>,
    pending: HashMap<i64, Pending>,
    programs: BTreeMap<String, ProgramBehavior>,
    next_pid: i64,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            pending: HashMap::new(),
            programs: BTreeMap::new(),
            next_pid: FIRST_PID,
        }
    }
}

impl ProcessTable {
    pub(crate) fn with_programs(programs: BTreeMap<String, ProgramBehavior>) -> Self {
        Self {
            programs,
            ..Default::default()
        }
    }

    pub(crate) fn set_program(&mut self, program: impl Into<String>, behavior: ProgramBehavior) {
        self.programs.insert(program.into(), behavior);
    }

    pub(crate) fn start(&mut self, spec: &ProcessSpec, owner: &str) -> i64 {
        let pid = self.next_pid;
        self.next_pid += 1;

        let behavior = self.programs.get(&spec.program).copied().unwrap_or_default();
        let name = spec
            .program
            .rsplit('/')
            .next()
            .unwrap_or(&spec.program)
            .to_string();
        let now = Utc::now();
        let finished = !behavior.hang && behavior.polls == 0;

        self.entries.push(GuestProcess {
            pid,
            name,
            owner: owner.to_string(),
            cmd_line: spec.command_line(),
            start_time: now,
            end_time: finished.then_some(now),
            exit_code: finished.then_some(behavior.exit_code),
        });
        if !finished {
            self.pending.insert(
                pid,
                Pending {
                    remaining: behavior.polls,
                    behavior,
                },
            );
        }
        pid
    }

    /// Advance running programs by one listing and return the table.
    pub(crate) fn list(&mut self) -> Vec<GuestProcess> {
        let mut finished = Vec::new();
        for (pid, pending) in self.pending.iter_mut() {
            if pending.behavior.hang {
                continue;
            }
            if pending.remaining == 0 {
                finished.push((*pid, pending.behavior.exit_code));
            } else {
                pending.remaining -= 1;
            }
        }
        for (pid, exit_code) in finished {
            self.finish(pid, exit_code);
        }
        self.entries.clone()
    }

    pub(crate) fn terminate(&mut self, pid: i64) -> Result<()> {
        if !self.entries.iter().any(|p| p.pid == pid) {
            return Err(ApiError::ProcessNotFound(pid));
        }
        if self.pending.contains_key(&pid) {
            self.finish(pid, TERMINATED_EXIT_CODE);
        }
        Ok(())
    }

    fn finish(&mut self, pid: i64, exit_code: i32) {
        self.pending.remove(&pid);
        let now = Utc::now();
        for entry in self.entries.iter_mut().filter(|p| p.pid == pid) {
            entry.end_time = Some(now);
            entry.exit_code = Some(exit_code);
        }
    }

    pub(crate) fn insert(&mut self, process: GuestProcess) {
        self.entries.push(process);
    }

    pub(crate) fn reap(&mut self, pid: i64) {
        self.pending.remove(&pid);
        self.entries.retain(|p| p.pid != pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/tmp/").unwrap(), "/tmp");
        assert_eq!(normalize("/").unwrap(), "/");
        assert!(normalize("relative/path").is_err());
        assert_eq!(normalize("//tmp//logs///").unwrap(), "/tmp/logs");
        assert_eq!(normalize("///").unwrap(), "/");
    }

    #[test]
    fn test_write_requires_parent() {
        let mut fs = GuestFs::default();
        assert!(fs.write("/opt/app/x", Bytes::from_static(b"x"), false).is_err());
        fs.write("/tmp/x", Bytes::from_static(b"x"), false).unwrap();
        assert_eq!(fs.read("/tmp/x").unwrap(), Bytes::from_static(b"x"));
    }

    #[test]
    fn test_write_with_repeated_slashes() {
        let mut fs = GuestFs::default();
        fs.write("/tmp//motd", Bytes::from_static(b"hi"), false).unwrap();
        assert_eq!(fs.read("/tmp/motd").unwrap(), Bytes::from_static(b"hi"));
    }

    #[test]
    fn test_write_overwrite_flag() {
        let mut fs = GuestFs::default();
        fs.write("/tmp/x", Bytes::from_static(b"1"), false).unwrap();
        assert!(fs.write("/tmp/x", Bytes::from_static(b"2"), false).is_err());
        fs.write("/tmp/x", Bytes::from_static(b"2"), true).unwrap();
        assert_eq!(fs.read("/tmp/x").unwrap(), Bytes::from_static(b"2"));
    }

    #[test]
    fn test_make_directory_with_parents() {
        let mut fs = GuestFs::default();
        assert!(fs.make_directory("/opt/app/logs", false).is_err());
        fs.make_directory("/opt/app/logs", true).unwrap();
        assert!(fs.has_directory("/opt"));
        assert!(fs.has_directory("/opt/app"));
        assert!(fs.has_directory("/opt/app/logs"));
        assert!(fs.make_directory("/opt/app", false).is_err());
    }

    #[test]
    fn test_list_directory() {
        let mut fs = GuestFs::default();
        fs.make_directory("/tmp/sub", false).unwrap();
        fs.write("/tmp/a.txt", Bytes::from_static(b"abc"), false).unwrap();
        fs.write("/tmp/sub/b.txt", Bytes::from_static(b"b"), false).unwrap();

        let entries = fs.list("/tmp").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|e| e.path == "/tmp/sub" && e.kind == FileKind::Directory));
        assert!(entries
            .iter()
            .any(|e| e.path == "/tmp/a.txt" && e.kind == FileKind::File && e.size == 3));
    }

    #[test]
    fn test_move_directory_moves_contents() {
        let mut fs = GuestFs::default();
        fs.make_directory("/tmp/src/nested", true).unwrap();
        fs.write("/tmp/src/nested/f", Bytes::from_static(b"f"), false)
            .unwrap();

        fs.move_directory("/tmp/src", "/tmp/dst").unwrap();
        assert!(!fs.has_directory("/tmp/src"));
        assert!(fs.has_directory("/tmp/dst/nested"));
        assert!(fs.file("/tmp/dst/nested/f").is_some());
        assert!(fs.file("/tmp/src/nested/f").is_none());
    }

    #[test]
    fn test_move_directory_into_itself() {
        let mut fs = GuestFs::default();
        fs.make_directory("/tmp/src", false).unwrap();
        assert!(fs.move_directory("/tmp/src", "/tmp/src/inner").is_err());
    }

    #[test]
    fn test_delete_directory_recursive() {
        let mut fs = GuestFs::default();
        fs.make_directory("/tmp/d", false).unwrap();
        fs.write("/tmp/d/f", Bytes::from_static(b"f"), false).unwrap();

        assert!(fs.delete_directory("/tmp/d", false).is_err());
        fs.delete_directory("/tmp/d", true).unwrap();
        assert!(!fs.has_directory("/tmp/d"));
        assert!(fs.file("/tmp/d/f").is_none());
    }

    #[test]
    fn test_sibling_prefix_not_within() {
        assert!(is_within("/tmp/a/b", "/tmp/a"));
        assert!(!is_within("/tmp/ab", "/tmp/a"));
        assert!(is_within("/tmp", "/"));
    }

    #[test]
    fn test_process_exits_immediately_by_default() {
        let mut table = ProcessTable::default();
        let pid = table.start(&ProcessSpec::new("/bin/true"), "root");
        assert_eq!(pid, FIRST_PID);

        let list = table.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "true");
        assert!(list[0].has_exited());
        assert_eq!(list[0].exit_code, Some(0));
    }

    #[test]
    fn test_process_runs_for_polls() {
        let mut table = ProcessTable::default();
        table.set_program("/bin/build", ProgramBehavior::exits_after(2, 3));
        let pid = table.start(&ProcessSpec::new("/bin/build"), "root");

        assert!(!table.list()[0].has_exited());
        assert!(!table.list()[0].has_exited());
        let list = table.list();
        assert!(list[0].has_exited());
        assert_eq!(list[0].exit_code, Some(3));
        assert_eq!(list[0].pid, pid);
    }

    #[test]
    fn test_terminate_hanging_process() {
        let mut table = ProcessTable::default();
        table.set_program("/bin/sleep", ProgramBehavior::hangs());
        let pid = table.start(&ProcessSpec::new("/bin/sleep"), "root");

        assert!(!table.list()[0].has_exited());
        table.terminate(pid).unwrap();
        let list = table.list();
        assert_eq!(list[0].exit_code, Some(TERMINATED_EXIT_CODE));
        assert!(matches!(
            table.terminate(pid + 1),
            Err(ApiError::ProcessNotFound(_))
        ));
    }

    #[test]
    fn test_reap_removes_entry() {
        let mut table = ProcessTable::default();
        let pid = table.start(&ProcessSpec::new("/bin/true"), "root");
        table.reap(pid);
        assert!(table.list().is_empty());
    }
}
