//! Header-only pass over the UnRAR C API.
//!
//! The `unrar` wrapper hides the host OS, dictionary size and redirection record of each
//! header, so they are read here with a separate `RAR_OM_LIST` session before the
//! extraction session starts. UnRAR lists the same entries, in the same order, that the
//! extraction session later visits.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint};
use std::path::{Path, PathBuf};
use std::ptr;

use unrar::error::{Code, UnrarError, When};
use unrar_sys as native;

use super::map_unrar_error;
use crate::decode::DecodeError;

const HOST_UNIX: c_uint = 3;
const REDIR_UNIX_SYMLINK: c_uint = 1;
const REDIR_WIN_SYMLINK: c_uint = 2;
// Wide characters, terminator included.
const REDIRECT_CAPACITY: usize = 4097;

/// System that wrote an entry, which decides how its attribute word is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HostOs {
    Unix,
    Windows,
}

/// Fields of one file header that the safe wrapper does not expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct HeaderFacts {
    pub name: String,
    pub host: HostOs,
    pub dictionary_bytes: u64,
    /// Target of a symlink stored as a redirection record (RAR 5).
    pub link_target: Option<String>,
}

#[derive(Debug, Default)]
pub(super) struct Layout {
    pub entries: Vec<HeaderFacts>,
    /// Volumes UnRAR moved on to after the first, in order.
    pub volumes: Vec<PathBuf>,
}

struct Session(*const native::Handle);

impl Drop for Session {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful `RAROpenArchiveEx` and is closed once.
        unsafe {
            native::RARCloseArchive(self.0);
        }
    }
}

/// List every header of the archive at `path` without decoding any data.
pub(super) fn read_layout(path: &Path, password: Option<&str>) -> Result<Layout, DecodeError> {
    let name = ArchiveName::new(path)?;
    let password = password
        .map(CString::new)
        .transpose()
        .map_err(|_| DecodeError::Unsupported("password contains a NUL byte".into()))?;

    let mut volumes: Vec<PathBuf> = Vec::new();
    let mut open = native::OpenArchiveDataEx {
        archive_name: name.narrow.as_ptr(),
        archive_name_w: name.wide_ptr(),
        open_mode: native::RAR_OM_LIST,
        open_result: 0,
        comment_buffer: ptr::null_mut(),
        comment_buffer_size: 0,
        comment_size: 0,
        comment_state: 0,
        flags: 0,
        callback: Some(on_volume_change),
        user_data: ptr::addr_of_mut!(volumes) as native::LPARAM,
        op_flags: 0,
        comment_buffer_w: ptr::null_mut(),
        reserved: [0; 25],
    };

    // SAFETY: every pointer in `open` outlives the session, which is closed before
    // `volumes` is touched again.
    let handle = unsafe { native::RAROpenArchiveEx(ptr::addr_of_mut!(open)) };
    let session = (!handle.is_null()).then(|| Session(handle));
    if open.open_result != 0 {
        return Err(code_error(open.open_result as c_int, When::Open));
    }
    let Some(session) = session else {
        return Err(code_error(native::ERAR_EOPEN, When::Open));
    };
    if let Some(password) = &password {
        // SAFETY: UnRAR copies the NUL-terminated password.
        unsafe { native::RARSetPassword(session.0, password.as_ptr()) };
    }

    let entries = read_entries(&session)?;
    drop(session);
    Ok(Layout { entries, volumes })
}

fn read_entries(session: &Session) -> Result<Vec<HeaderFacts>, DecodeError> {
    let mut entries = Vec::new();
    let mut redirect: Vec<native::WCHAR> = vec![0; REDIRECT_CAPACITY];
    loop {
        redirect.fill(0);
        let mut header = native::HeaderDataEx::default();
        header.redir_name = redirect.as_mut_ptr();
        header.redir_name_size = REDIRECT_CAPACITY as c_uint;

        // SAFETY: `header` and the redirect buffer it points at live across the call.
        let code = unsafe { native::RARReadHeaderEx(session.0, ptr::addr_of_mut!(header)) };
        match code {
            native::ERAR_SUCCESS => {}
            native::ERAR_END_ARCHIVE => return Ok(entries),
            other => return Err(code_error(other, When::Read)),
        }

        let link_target = matches!(header.redir_type, REDIR_UNIX_SYMLINK | REDIR_WIN_SYMLINK)
            .then(|| wide_to_string(&redirect))
            .filter(|target| !target.is_empty());
        entries.push(HeaderFacts {
            name: wide_to_string(&header.filename_w),
            host: if header.host_os == HOST_UNIX {
                HostOs::Unix
            } else {
                HostOs::Windows
            },
            dictionary_bytes: u64::from(header.dict_size) * 1024,
            link_target,
        });

        // SAFETY: a header was just read, so skipping its data is valid.
        let code = unsafe {
            native::RARProcessFile(session.0, native::RAR_SKIP, ptr::null(), ptr::null())
        };
        if code != native::ERAR_SUCCESS {
            return Err(code_error(code, When::Process));
        }
    }
}

extern "C" fn on_volume_change(
    msg: native::UINT,
    user_data: native::LPARAM,
    p1: native::LPARAM,
    p2: native::LPARAM,
) -> c_int {
    if msg != native::UCM_CHANGEVOLUME || user_data == 0 {
        return 0;
    }
    if p2 == native::RAR_VOL_ASK {
        // Missing volume; abort instead of prompting.
        return -1;
    }
    // SAFETY: `user_data` is the `Vec<PathBuf>` registered in `read_layout`, and for
    // UCM_CHANGEVOLUME `p1` is a NUL-terminated narrow volume name.
    let (volumes, name) = unsafe {
        (
            &mut *(user_data as *mut Vec<PathBuf>),
            CStr::from_ptr(p1 as *const c_char),
        )
    };
    volumes.push(narrow_to_path(name));
    0
}

fn code_error(raw: c_int, when: When) -> DecodeError {
    map_unrar_error(UnrarError::from(Code::from(raw).unwrap_or(Code::Unknown), when))
}

struct ArchiveName {
    narrow: CString,
    wide: Vec<native::WCHAR>,
}

impl ArchiveName {
    fn new(path: &Path) -> Result<Self, DecodeError> {
        let nul = || DecodeError::Unsupported(format!("archive path {} contains NUL", path.display()));
        let narrow = CString::new(narrow_bytes(path)).map_err(|_| nul())?;
        let mut wide = wide_chars(path);
        if wide.contains(&0) {
            return Err(nul());
        }
        if !wide.is_empty() {
            wide.push(0);
        }
        Ok(Self { narrow, wide })
    }

    fn wide_ptr(&self) -> *const native::WCHAR {
        if self.wide.is_empty() {
            ptr::null()
        } else {
            self.wide.as_ptr()
        }
    }
}

#[cfg(unix)]
fn narrow_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn narrow_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

// UnRAR on Linux mangles wide names during conversion, so only the narrow name is sent.
#[cfg(any(target_os = "linux", target_os = "netbsd"))]
fn wide_chars(_path: &Path) -> Vec<native::WCHAR> {
    Vec::new()
}

#[cfg(windows)]
fn wide_chars(path: &Path) -> Vec<native::WCHAR> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str().encode_wide().collect()
}

#[cfg(not(any(target_os = "linux", target_os = "netbsd", windows)))]
fn wide_chars(path: &Path) -> Vec<native::WCHAR> {
    path.to_string_lossy()
        .chars()
        .map(|c| c as native::WCHAR)
        .collect()
}

#[cfg(windows)]
fn wide_to_string(buffer: &[native::WCHAR]) -> String {
    let end = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..end])
}

#[cfg(not(windows))]
fn wide_to_string(buffer: &[native::WCHAR]) -> String {
    buffer
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| char::from_u32(c as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(unix)]
fn narrow_to_path(name: &CStr) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(name.to_bytes()))
}

#[cfg(not(unix))]
fn narrow_to_path(name: &CStr) -> PathBuf {
    PathBuf::from(name.to_string_lossy().into_owned())
}
