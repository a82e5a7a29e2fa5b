//! Host identity used for audit annotations

use sysinfo::System;

/// Environment variables consulted for the login name, in order
const USER_VARS: &[&str] = &["LOGNAME", "USER", "LNAME", "USERNAME"];

/// Login name of the current user.
///
/// Checks the usual environment variables first and falls back to the
/// password database entry for the effective uid.
pub fn current_user() -> String {
    USER_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
        .or_else(passwd_name)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Host name of this machine
pub fn hostname() -> String {
    System::host_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// `user@host` string recorded next to every stored secret
pub fn user_at_host() -> String {
    format!("{}@{}", current_user(), hostname())
}

#[cfg(unix)]
fn passwd_name() -> Option<String> {
    use std::ffi::CStr;

    let uid = unsafe { libc::geteuid() };
    let mut buf = vec![0 as libc::c_char; 4096];
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };
    if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
        return None;
    }

    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn passwd_name() -> Option<String> {
    None
}
