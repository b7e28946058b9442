//! OS primitives the pipeline depends on.

pub mod paths;

/// Returns true when the current process runs with elevated privileges.
///
/// Creating junctions at the drive root and setting the system clock both
/// require an administrator token on Windows (root elsewhere).
#[cfg(windows)]
pub fn is_elevated() -> bool {
  use std::ffi::c_void;

  use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
  use windows_sys::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
  use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

  // SAFETY: the token handle is only used while open and closed before return;
  // TOKEN_ELEVATION is a plain struct sized for the TokenElevation class.
  unsafe {
    let mut token: HANDLE = std::ptr::null_mut();
    if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
      return false;
    }

    let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
    let mut returned = 0u32;
    let ok = GetTokenInformation(
      token,
      TokenElevation,
      &mut elevation as *mut TOKEN_ELEVATION as *mut c_void,
      std::mem::size_of::<TOKEN_ELEVATION>() as u32,
      &mut returned,
    );
    CloseHandle(token);

    ok != 0 && elevation.TokenIsElevated != 0
  }
}

#[cfg(unix)]
pub fn is_elevated() -> bool {
  rustix::process::geteuid().is_root()
}
