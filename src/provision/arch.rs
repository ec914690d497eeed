//! Host architecture detection and the vendor naming map.
//!
//! The vendor names its Linux builds after uname machine tokens, with one
//! exception: 32-bit ARMv7 hosts report `armv7l` but the published build is
//! `armhf`. Every other supported token passes through unchanged.

use super::error::ProvisionError;

/// Raw uname-style machine token for the running host.
pub fn detect() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    {
        "x86_64"
    }
    #[cfg(target_arch = "x86")]
    {
        "i386"
    }
    #[cfg(target_arch = "aarch64")]
    {
        "aarch64"
    }
    #[cfg(target_arch = "arm")]
    {
        "armv7l"
    }
    #[cfg(not(any(
        target_arch = "x86_64",
        target_arch = "x86",
        target_arch = "aarch64",
        target_arch = "arm"
    )))]
    {
        std::env::consts::ARCH
    }
}

/// Map a raw host architecture token to the vendor's download token.
///
/// Unknown tokens are fatal: there is no vendor build to fall back to.
pub fn vendor_arch(raw: &str) -> Result<&'static str, ProvisionError> {
    match raw {
        "armv7l" => Ok("armhf"),
        "x86_64" => Ok("x86_64"),
        "i386" => Ok("i386"),
        "aarch64" => Ok("aarch64"),
        "armhf" => Ok("armhf"),
        "armel" => Ok("armel"),
        other => Err(ProvisionError::UnsupportedArchitecture(other.to_string())),
    }
}
