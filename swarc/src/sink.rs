use std::io::{Read, Seek, Write};

/// The output stream a package is laid out into.
///
/// Every write is preceded by an explicit seek and digests read back what
/// was written, so the sink has to support all three.
pub trait Sink: Read + Write + Seek {}

impl<T: Read + Write + Seek + ?Sized> Sink for T {}
