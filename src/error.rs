use std::collections::TryReserveError;
use std::error;
use std::fmt;
use std::io;
use std::num::NonZeroU32;

/// Numeric error code with an English description.
///
/// Codes below 20 (and 78) describe problems with the input image. Everything
/// else means the encoder itself could not finish, e.g. the compressor was
/// misconfigured or memory ran out.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Error(NonZeroU32);

impl Error {
    #[cold]
    pub(crate) const fn new(code: u32) -> Self {
        match NonZeroU32::new(code) {
            Some(code) => Self(code),
            None => Self(NonZeroU32::MAX),
        }
    }

    /// Returns the numerical error code.
    #[must_use]
    pub fn code(&self) -> u32 {
        self.0.get()
    }

    /// Returns an English description of the numerical error code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        error_text(self.0.get())
    }

    /// True for malformed or unreadable input, false for encoder failures.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self.0.get(), 1..=19 | 78)
    }
}

fn error_text(code: u32) -> &'static str {
    match code {
        1 => "magic number is not valid for the requested Netpbm format",
        2 => "expected a decimal number in the image header",
        3 => "maximum sample value must be in range 1..=255",
        4 => "unexpected end of input, insufficient pixel samples",
        5 => "unsupported file extension, expected .pbm, .pgm or .ppm",
        6 => "sample value exceeds the declared maximum sample value",
        7 => "unexpected character in text pixel data",
        8 => "image dimensions must be non-zero",
        9 => "image dimensions are too large",
        10 => "pixel buffer length does not match image dimensions",
        20 => "compressor rejected the stream configuration",
        21 => "compressor failed while deflating",
        22 => "compressor left input unconsumed",
        23 => "IDAT size limit must be in range 1..=2^31-1",
        77 => "chunk data is too large",
        78 => "failed to open or read the input",
        79 => "failed to write the output",
        83 => "memory allocation failed",
        _ => "unknown error code",
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.0)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl error::Error for Error {}

#[doc(hidden)]
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::UnexpectedEof => Error::new(78),
            _ => Error::new(79),
        }
    }
}

impl From<TryReserveError> for Error {
    #[cold]
    fn from(_: TryReserveError) -> Error {
        Error::new(83)
    }
}

impl From<fallible_collections::TryReserveError> for Error {
    #[cold]
    fn from(_: fallible_collections::TryReserveError) -> Error {
        Error::new(83)
    }
}

#[test]
fn error_kinds() {
    assert!(Error::new(4).is_input_error());
    assert!(Error::new(78).is_input_error());
    assert!(!Error::new(22).is_input_error());
    assert!(!Error::new(83).is_input_error());
    assert_eq!("compressor left input unconsumed (22)", format!("{:?}", Error::new(22)));
    assert_eq!(Error::new(79), io::Error::from(io::ErrorKind::PermissionDenied).into());
}
