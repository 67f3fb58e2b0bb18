//! Error types for the socket layer

use core::fmt;
use nix::errno::Errno;

/// Result type for socket layer operations
pub type SalResult<T> = Result<T, SalError>;

/// Errors that can occur in socket layer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalError {
    /// Unknown, freed or wrong-kind descriptor
    BadDescriptor,

    /// Malformed address, wrong length, unsupported type
    InvalidArgument,

    /// Non-blocking operation with nothing ready
    WouldBlock,

    /// Blocking operation exceeded its deadline
    Timeout,

    /// Allocation failed
    OutOfMemory,

    /// Connection record could not be created
    NoBuffers,

    /// Socket or event table is full
    TooManyOpenFiles,

    /// Connection already established
    AlreadyConnected,

    /// Operation needs a connection
    NotConnected,

    /// Raw sockets, IPv6
    Unsupported,

    /// Socket option not implemented
    OptionNotSupported,

    /// Command or flag not implemented
    NotImplemented,

    /// The transport reported a failure (its own code)
    Transport(i32),

    /// Invariant violation
    Internal(&'static str),
}

impl SalError {
    /// The errno an application sees for this error
    pub fn errno(&self) -> Errno {
        match self {
            SalError::BadDescriptor => Errno::EBADF,
            SalError::InvalidArgument => Errno::EINVAL,
            SalError::WouldBlock => Errno::EWOULDBLOCK,
            SalError::Timeout => Errno::ETIMEDOUT,
            SalError::OutOfMemory => Errno::ENOMEM,
            SalError::NoBuffers => Errno::ENOBUFS,
            SalError::TooManyOpenFiles => Errno::ENFILE,
            SalError::AlreadyConnected => Errno::EISCONN,
            SalError::NotConnected => Errno::ENOTCONN,
            SalError::Unsupported => Errno::EOPNOTSUPP,
            SalError::OptionNotSupported => Errno::ENOPROTOOPT,
            SalError::NotImplemented => Errno::ENOSYS,
            SalError::Transport(_) | SalError::Internal(_) => Errno::EIO,
        }
    }

    /// Raw errno value
    #[inline]
    pub fn errno_raw(&self) -> i32 {
        self.errno() as i32
    }

    /// Best-effort reverse mapping; `None` for 0
    pub fn from_errno(code: i32) -> Option<SalError> {
        if code == 0 {
            return None;
        }
        let e = match Errno::from_raw(code) {
            Errno::EBADF => SalError::BadDescriptor,
            Errno::EINVAL => SalError::InvalidArgument,
            Errno::EWOULDBLOCK => SalError::WouldBlock,
            Errno::ETIMEDOUT => SalError::Timeout,
            Errno::ENOMEM => SalError::OutOfMemory,
            Errno::ENOBUFS => SalError::NoBuffers,
            Errno::ENFILE => SalError::TooManyOpenFiles,
            Errno::EISCONN => SalError::AlreadyConnected,
            Errno::ENOTCONN => SalError::NotConnected,
            Errno::EOPNOTSUPP => SalError::Unsupported,
            Errno::ENOPROTOOPT => SalError::OptionNotSupported,
            Errno::ENOSYS => SalError::NotImplemented,
            _ => SalError::Transport(code),
        };
        Some(e)
    }

    /// Expected conditions a caller polls through (logged quietly)
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, SalError::WouldBlock | SalError::Timeout)
    }
}

impl fmt::Display for SalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SalError::BadDescriptor => write!(f, "bad descriptor"),
            SalError::InvalidArgument => write!(f, "invalid argument"),
            SalError::WouldBlock => write!(f, "operation would block"),
            SalError::Timeout => write!(f, "operation timed out"),
            SalError::OutOfMemory => write!(f, "out of memory"),
            SalError::NoBuffers => write!(f, "no buffer space available"),
            SalError::TooManyOpenFiles => write!(f, "too many open descriptors"),
            SalError::AlreadyConnected => write!(f, "already connected"),
            SalError::NotConnected => write!(f, "not connected"),
            SalError::Unsupported => write!(f, "operation not supported"),
            SalError::OptionNotSupported => write!(f, "socket option not supported"),
            SalError::NotImplemented => write!(f, "not implemented"),
            SalError::Transport(code) => write!(f, "transport error: {}", code),
            SalError::Internal(what) => write!(f, "internal error: {}", what),
        }
    }
}

impl std::error::Error for SalError {}

impl From<SalError> for Errno {
    fn from(e: SalError) -> Self {
        e.errno()
    }
}

/// Errors from `getaddrinfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrInfoError {
    /// Neither node nor service, or unparseable numeric host
    NoName,
    /// Address family not supported
    Family,
    /// Service is not a port number
    Service,
    /// Resolution failed
    Fail,
    /// Allocation failed
    Memory,
}

impl AddrInfoError {
    /// The libc `EAI_*` code
    pub fn code(&self) -> i32 {
        match self {
            AddrInfoError::NoName => libc::EAI_NONAME,
            AddrInfoError::Family => libc::EAI_FAMILY,
            AddrInfoError::Service => libc::EAI_SERVICE,
            AddrInfoError::Fail => libc::EAI_FAIL,
            AddrInfoError::Memory => libc::EAI_MEMORY,
        }
    }
}

impl fmt::Display for AddrInfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrInfoError::NoName => write!(f, "name or service not known"),
            AddrInfoError::Family => write!(f, "address family not supported"),
            AddrInfoError::Service => write!(f, "service not supported"),
            AddrInfoError::Fail => write!(f, "non-recoverable resolution failure"),
            AddrInfoError::Memory => write!(f, "memory allocation failure"),
        }
    }
}

impl std::error::Error for AddrInfoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", SalError::BadDescriptor), "bad descriptor");
        assert_eq!(format!("{}", SalError::Transport(-3)), "transport error: -3");
        assert_eq!(format!("{}", AddrInfoError::Service), "service not supported");
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(SalError::BadDescriptor.errno(), Errno::EBADF);
        assert_eq!(SalError::WouldBlock.errno_raw(), libc::EWOULDBLOCK);
        assert_eq!(SalError::TooManyOpenFiles.errno_raw(), libc::ENFILE);
        assert_eq!(SalError::Internal("x").errno(), Errno::EIO);
    }

    #[test]
    fn test_error_conversion() {
        for e in [
            SalError::BadDescriptor,
            SalError::InvalidArgument,
            SalError::WouldBlock,
            SalError::Timeout,
            SalError::NoBuffers,
            SalError::AlreadyConnected,
            SalError::OptionNotSupported,
        ] {
            assert_eq!(SalError::from_errno(e.errno_raw()), Some(e));
        }
        assert_eq!(SalError::from_errno(0), None);
        assert_eq!(SalError::from_errno(libc::EPIPE), Some(SalError::Transport(libc::EPIPE)));

        let errno: Errno = SalError::Timeout.into();
        assert_eq!(errno, Errno::ETIMEDOUT);
    }

    #[test]
    fn test_addrinfo_codes() {
        assert_eq!(AddrInfoError::NoName.code(), libc::EAI_NONAME);
        assert_eq!(AddrInfoError::Fail.code(), libc::EAI_FAIL);
    }
}
