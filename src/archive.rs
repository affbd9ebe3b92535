//! Whole-archive operations: [`list`], [`zip`] and [`unzip`].
//!
//! Each call runs to completion on the calling thread. `zip` builds the new archive
//! in a temporary file next to the destination and renames it into place only after
//! the Central Directory has been written, so a failure never leaves a partial
//! archive behind.

use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{Result, ZipError};
use crate::io::{LocalFileReader, SectionReader};
use crate::pattern::EntryFilter;
use crate::zip::codec::{self, DEFAULT_LEVEL};
use crate::zip::{
    CentralDirectory, CompressionMethod, DuplicatePolicy, EntryHeader, EntryKind, ZipExtractor,
    ZipFileEntry, ZipWriter,
};

/// Files up to this size are compressed in memory, which lets incompressible data
/// fall back to STORED.
const BUFFERED_ENTRY_LIMIT: u64 = 64 * 1024;

/// How archive names are derived from source paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZipMode {
    /// Keep each source path as given (relative, after prefix stripping).
    #[default]
    Mirror,
    /// Put every source at the archive root under its own base name.
    CherryPick,
}

#[derive(Debug, Clone)]
pub struct ZipOptions {
    pub method: CompressionMethod,
    /// Deflate level, 0-9.
    pub level: u32,
    /// Add to an existing archive instead of replacing it.
    pub append: bool,
    pub mode: ZipMode,
    /// Leading path removed from archive names in [`ZipMode::Mirror`].
    pub strip_prefix: Option<PathBuf>,
    /// Descend into directories; otherwise only the directory entry is added.
    pub recurse: bool,
    pub duplicates: DuplicatePolicy,
    /// Archive what symlinks point to instead of the links themselves.
    pub follow_symlinks: bool,
}

impl Default for ZipOptions {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Deflate,
            level: DEFAULT_LEVEL,
            append: false,
            mode: ZipMode::Mirror,
            strip_prefix: None,
            recurse: true,
            duplicates: DuplicatePolicy::Reject,
            follow_symlinks: false,
        }
    }
}

/// What to do when an extracted file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    #[default]
    Always,
    /// Leave the existing file alone and move on.
    Skip,
    /// Fail with [`ZipError::DestinationExists`] before extracting anything.
    Strict,
}

#[derive(Debug, Clone)]
pub struct UnzipOptions {
    pub filter: EntryFilter,
    pub overwrite: OverwritePolicy,
    /// Drop directory structure and extract every file into `dest_dir` itself.
    pub junk_paths: bool,
    /// Restore permissions and modification times.
    pub restore_metadata: bool,
}

impl Default for UnzipOptions {
    fn default() -> Self {
        Self {
            filter: EntryFilter::default(),
            overwrite: OverwritePolicy::Always,
            junk_paths: false,
            restore_metadata: true,
        }
    }
}

fn open_archive(archive: &Path) -> Result<ZipExtractor<LocalFileReader>> {
    let reader =
        LocalFileReader::new(archive).map_err(|e| ZipError::from_source_io(e, archive))?;
    ZipExtractor::open(reader)
}

/// List the entries of `archive` in directory order, without touching any payload.
pub fn list(archive: &Path) -> Result<Vec<ZipFileEntry>> {
    let extractor = open_archive(archive)?;
    let entries = extractor.list_files()?.to_vec();
    extractor.close()?;
    Ok(entries)
}

// ── zip ────────────────────────────────────────────────────────────────────

/// One source item scheduled for the archive.
#[derive(Debug)]
struct PlannedEntry {
    path: PathBuf,
    name: String,
    kind: PlannedKind,
    modified: SystemTime,
    mode: u32,
}

#[derive(Debug)]
enum PlannedKind {
    File { size: u64 },
    Directory,
    Symlink { target: String },
}

/// Build an archive name from `path` relative to `base`, keeping only normal
/// components. Returns `None` when nothing is left.
fn archive_name(path: &Path, base: Option<&Path>) -> Option<String> {
    let relative = base
        .and_then(|b| path.strip_prefix(b).ok())
        .unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    let base = if metadata.is_dir() { 0o755 } else { 0o644 };
    if metadata.permissions().readonly() {
        base & 0o555
    } else {
        base
    }
}

fn plan_item(
    path: &Path,
    name: String,
    metadata: &fs::Metadata,
    file_type: fs::FileType,
) -> Result<PlannedEntry> {
    let kind = if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|e| ZipError::from_source_io(e, path))?;
        PlannedKind::Symlink {
            target: target.to_string_lossy().into_owned(),
        }
    } else if file_type.is_dir() {
        PlannedKind::Directory
    } else {
        PlannedKind::File {
            size: metadata.len(),
        }
    };
    Ok(PlannedEntry {
        path: path.to_path_buf(),
        name,
        kind,
        modified: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
        mode: mode_of(metadata),
    })
}

/// Expand `sources` into the ordered list of entries to write.
fn plan_sources(
    sources: &[PathBuf],
    options: &ZipOptions,
    skip: Option<&Path>,
) -> Result<Vec<PlannedEntry>> {
    let mut planned = Vec::new();

    for source in sources {
        let metadata = if options.follow_symlinks {
            fs::metadata(source)
        } else {
            fs::symlink_metadata(source)
        }
        .map_err(|e| ZipError::from_source_io(e, source))?;

        let base: Option<PathBuf> = match options.mode {
            ZipMode::Mirror => options.strip_prefix.clone(),
            ZipMode::CherryPick => source.parent().map(Path::to_path_buf),
        };

        if !metadata.is_dir() || !options.recurse {
            match archive_name(source, base.as_deref()) {
                Some(name) => {
                    planned.push(plan_item(source, name, &metadata, metadata.file_type())?)
                }
                None => warn!("skipping {}: no archive name left", source.display()),
            }
            continue;
        }

        let walker = WalkDir::new(source)
            .follow_links(options.follow_symlinks)
            .sort_by_file_name();
        for item in walker {
            let item = item.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.clone());
                match e.into_io_error() {
                    Some(io_err) => ZipError::from_source_io(io_err, path),
                    None => ZipError::InvalidArgument(format!(
                        "symlink loop at {}",
                        path.display()
                    )),
                }
            })?;
            let path = item.path();
            if skip.is_some_and(|s| fs::canonicalize(path).is_ok_and(|p| p == s)) {
                debug!("skipping the archive itself at {}", path.display());
                continue;
            }
            let Some(name) = archive_name(path, base.as_deref()) else {
                continue;
            };
            let metadata = item
                .metadata()
                .map_err(|e| ZipError::from_source_io(io::Error::from(e), path))?;
            planned.push(plan_item(path, name, &metadata, item.file_type())?);
        }
    }

    Ok(planned)
}

fn write_planned<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    item: &PlannedEntry,
    options: &ZipOptions,
) -> Result<()> {
    match &item.kind {
        PlannedKind::Directory => {
            let header = EntryHeader::directory(item.name.as_str())
                .with_modified(item.modified)
                .with_permissions(item.mode);
            writer.add_bytes(&header, &[])?;
        }
        PlannedKind::Symlink { target } => {
            let header = EntryHeader::symlink(item.name.as_str()).with_modified(item.modified);
            writer.add_bytes(&header, target.as_bytes())?;
        }
        PlannedKind::File { size } => {
            let header = EntryHeader::file(item.name.as_str(), options.method)
                .with_level(options.level)
                .with_modified(item.modified)
                .with_permissions(item.mode)
                .with_size_hint(*size);
            let mut file =
                File::open(&item.path).map_err(|e| ZipError::from_source_io(e, &item.path))?;
            if *size <= BUFFERED_ENTRY_LIMIT {
                let mut data = Vec::with_capacity(*size as usize);
                file.read_to_end(&mut data)
                    .map_err(|e| ZipError::from_source_io(e, &item.path))?;
                writer.add_bytes(&header, &data)?;
            } else {
                writer.add_entry(&header, file)?;
            }
        }
    }
    debug!("  adding: {}", item.name);
    Ok(())
}

/// Create or extend `archive` with `sources`.
///
/// Returns the entries written by this call, in write order.
pub fn zip<P: AsRef<Path>>(
    archive: &Path,
    sources: &[P],
    options: &ZipOptions,
) -> Result<Vec<ZipFileEntry>> {
    if sources.is_empty() {
        return Err(ZipError::InvalidArgument("no source paths given".into()));
    }
    codec::compression_level(options.level)?;
    if let CompressionMethod::Unknown(m) = options.method {
        return Err(ZipError::InvalidArgument(format!(
            "unsupported compression method {}",
            m
        )));
    }

    let sources: Vec<PathBuf> = sources.iter().map(|s| s.as_ref().to_path_buf()).collect();
    let archive_path = fs::canonicalize(archive).ok();
    let planned = plan_sources(&sources, options, archive_path.as_deref())?;

    let parent = match archive.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(parent)?;
    let mut out = BufWriter::new(temp.as_file().try_clone()?);

    let existing = if options.append && archive.exists() {
        let extractor = open_archive(archive)?;
        let location = extractor.location();
        let mut local_data =
            SectionReader::new(extractor.parser().reader(), 0, location.cd_offset);
        io::copy(&mut local_data, &mut out)?;
        let mut directory = CentralDirectory::new();
        for entry in extractor.list_files()? {
            directory.push(entry.clone(), DuplicatePolicy::Allow)?;
        }
        extractor.close()?;
        debug!("appending after {} existing entries", directory.len());
        directory
    } else {
        CentralDirectory::new()
    };

    let mut writer = ZipWriter::resume(out, existing).with_duplicate_policy(options.duplicates);
    for item in &planned {
        write_planned(&mut writer, item, options)?;
    }
    writer.finish()?;
    let written = writer.new_entries().to_vec();

    let file = writer
        .into_inner()
        .into_inner()
        .map_err(|e| ZipError::from(e.into_error()))?;
    file.sync_all()?;
    drop(file);
    temp.persist(archive).map_err(|e| ZipError::from(e.error))?;

    info!("{}: wrote {} entries", archive.display(), written.len());
    Ok(written)
}

// ── unzip ──────────────────────────────────────────────────────────────────

/// Turn an entry name into a path below the destination, rejecting anything that
/// could escape it.
fn safe_relative_path(name: &str) -> Result<PathBuf> {
    let traversal = || ZipError::PathTraversal(name.to_string());

    if name.starts_with('/') || name.starts_with('\\') || name.contains('\0') {
        return Err(traversal());
    }
    // Drive letters such as `C:` only mean something on Windows but are never safe.
    if name.len() >= 2 && name.as_bytes()[1] == b':' && name.as_bytes()[0].is_ascii_alphabetic()
    {
        return Err(traversal());
    }

    let mut path = PathBuf::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(traversal()),
            part => path.push(part),
        }
    }
    // Catch anything the platform still parses as non-normal.
    if path.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(traversal());
    }
    Ok(path)
}

/// Resolve `target` against the directory holding `link`, both relative to the
/// destination, and fail if the result leaves it. `links` holds the symlinks this
/// extraction creates; stepping back out of one of them is refused since its real
/// location is not the lexical one.
fn check_symlink_target(
    name: &str,
    link: &Path,
    target: &str,
    links: &HashSet<PathBuf>,
) -> Result<()> {
    let traversal = || ZipError::PathTraversal(format!("{} -> {}", name, target));
    if target.is_empty() || target.starts_with('/') || target.starts_with('\\') {
        return Err(traversal());
    }
    let mut resolved = link.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut through_link = false;
    for part in target.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if through_link || !resolved.pop() {
                    return Err(traversal());
                }
            }
            part if part.len() >= 2 && part.as_bytes()[1] == b':' => return Err(traversal()),
            part => {
                resolved.push(part);
                through_link |= links.contains(&resolved);
            }
        }
    }
    Ok(())
}

/// Fail when any parent of `relative` is a symlink created by this extraction.
fn check_link_parents(name: &str, relative: &Path, links: &HashSet<PathBuf>) -> Result<()> {
    let mut parent = relative.parent();
    while let Some(dir) = parent.filter(|d| !d.as_os_str().is_empty()) {
        if links.contains(dir) {
            return Err(ZipError::PathTraversal(name.to_string()));
        }
        parent = dir.parent();
    }
    Ok(())
}

/// Fail unless the deepest existing parent of `path` really lies under `root`, which
/// must be canonical. Catches links already present in the destination.
fn ensure_inside(root: &Path, path: &Path, name: &str) -> Result<()> {
    let traversal = || ZipError::PathTraversal(name.to_string());
    let mut current = path.parent();
    while let Some(dir) = current {
        match fs::canonicalize(dir) {
            Ok(real) if real.starts_with(root) => return Ok(()),
            Ok(_) => return Err(traversal()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::symlink_metadata(dir).is_ok() {
                    // Dangling link on the way down.
                    return Err(traversal());
                }
                current = dir.parent();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(traversal())
}

/// One entry scheduled for extraction.
struct PlannedExtraction<'a> {
    entry: &'a ZipFileEntry,
    relative: PathBuf,
    target: PathBuf,
    kind: EntryKind,
    link_target: Option<String>,
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

fn set_mtime(path: &Path, modified: SystemTime) -> Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(modified)?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_mtime(path: &Path, modified: SystemTime) -> Result<()> {
    File::open(path)?.set_modified(modified)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mtime(_path: &Path, _modified: SystemTime) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &str, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

/// Without Unix symlinks the link is materialised as a file holding its target.
#[cfg(not(unix))]
fn create_symlink(target: &str, link: &Path) -> Result<()> {
    fs::write(link, target.as_bytes())?;
    Ok(())
}

/// Extract `archive` into `dest_dir`.
///
/// Every selected entry name is validated before anything is written; an unsafe name
/// fails the whole call with [`ZipError::PathTraversal`]. So does an entry placed
/// below a symlink from the same archive, and any path whose existing parents resolve
/// outside `dest_dir`. Returns the paths created, in archive order.
pub fn unzip(archive: &Path, dest_dir: &Path, options: &UnzipOptions) -> Result<Vec<PathBuf>> {
    let dest_dir = if dest_dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dest_dir
    };
    let extractor = open_archive(archive)?;
    let entries = extractor.list_files()?;

    let mut plan = Vec::new();
    for entry in entries {
        if !options.filter.matches(&entry.file_name) {
            continue;
        }
        let kind = entry.kind();
        let relative = safe_relative_path(&entry.file_name)?;
        let relative = if options.junk_paths {
            if kind == EntryKind::Directory {
                continue;
            }
            match relative.file_name() {
                Some(base) => PathBuf::from(base),
                None => continue,
            }
        } else {
            relative
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let link_target = if kind == EntryKind::Symlink {
            let data = extractor.read(entry)?;
            Some(String::from_utf8_lossy(&data).into_owned())
        } else {
            None
        };

        plan.push(PlannedExtraction {
            entry,
            target: dest_dir.join(&relative),
            relative,
            kind,
            link_target,
        });
    }

    // Links may only be created, never walked through, within one extraction.
    let links: HashSet<PathBuf> = plan
        .iter()
        .filter(|p| p.kind == EntryKind::Symlink)
        .map(|p| p.relative.clone())
        .collect();
    for item in &plan {
        check_link_parents(&item.entry.file_name, &item.relative, &links)?;
        if let Some(target) = &item.link_target {
            check_symlink_target(&item.entry.file_name, &item.relative, target, &links)?;
        }
    }

    if options.overwrite == OverwritePolicy::Strict {
        if let Some(existing) = plan.iter().find(|p| {
            p.kind != EntryKind::Directory && fs::symlink_metadata(&p.target).is_ok()
        }) {
            return Err(ZipError::DestinationExists(existing.target.clone()));
        }
    }

    fs::create_dir_all(dest_dir)?;
    let root = fs::canonicalize(dest_dir)?;
    let mut extracted = Vec::with_capacity(plan.len());
    let mut directories = Vec::new();

    for item in &plan {
        ensure_inside(&root, &item.target, &item.entry.file_name)?;
        let exists = fs::symlink_metadata(&item.target).is_ok();
        match item.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&item.target)?;
                directories.push(item);
            }
            _ if exists && options.overwrite == OverwritePolicy::Skip => {
                warn!("skipping: {} (file exists)", item.entry.file_name);
                continue;
            }
            EntryKind::Symlink => {
                if let Some(parent) = item.target.parent() {
                    fs::create_dir_all(parent)?;
                }
                if exists {
                    fs::remove_file(&item.target)?;
                }
                let target = item.link_target.as_deref().unwrap_or_default();
                create_symlink(target, &item.target)?;
                if fs::canonicalize(&item.target).is_ok_and(|real| !real.starts_with(&root)) {
                    fs::remove_file(&item.target)?;
                    return Err(ZipError::PathTraversal(format!(
                        "{} -> {}",
                        item.entry.file_name, target
                    )));
                }
            }
            EntryKind::File => {
                if exists && fs::symlink_metadata(&item.target)?.file_type().is_symlink() {
                    // Never write through a link that is already there.
                    fs::remove_file(&item.target)?;
                }
                extractor.extract_to_file(item.entry, &item.target)?;
                let mode = match item.entry.unix_mode() {
                    Some(mode) if options.restore_metadata => mode,
                    _ => 0o644,
                };
                if options.restore_metadata {
                    if let Some(modified) = item.entry.modified() {
                        set_mtime(&item.target, modified)?;
                    }
                }
                set_mode(&item.target, mode)?;
            }
        }
        debug!("  inflating: {}", item.entry.file_name);
        extracted.push(item.target.clone());
    }

    // Directory metadata last, so restrictive modes do not block the files inside.
    if options.restore_metadata {
        for item in directories.iter().rev() {
            if let Some(modified) = item.entry.modified() {
                set_dir_mtime(&item.target, modified)?;
            }
            if let Some(mode) = item.entry.unix_mode() {
                set_mode(&item.target, mode)?;
            }
        }
    }

    extractor.close()?;
    info!(
        "{}: extracted {} entries into {}",
        archive.display(),
        extracted.len(),
        dest_dir.display()
    );
    Ok(extracted)
}
