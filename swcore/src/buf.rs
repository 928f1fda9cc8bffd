use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Keep reading until `buf` is full or the reader runs dry.
///
/// Returns `(eof, filled)`, `eof` is only set when the reader ran out before
/// the buffer was full.
pub fn fill_buf<R: Read + ?Sized>(data: &mut R, buf: &mut [u8]) -> std::io::Result<(bool, usize)> {
    let mut filled = 0;

    while filled < buf.len() {
        match data.read(&mut buf[filled..]) {
            Ok(0) => return Ok((true, filled)),
            Ok(x) => filled += x,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
    }
    Ok((false, filled))
}

/// Read up to `len` bytes at `offset`, fewer bytes are only returned at end of data.
pub fn read_extent<R: Read + Seek + ?Sized>(
    data: &mut R,
    offset: u64,
    len: usize,
) -> std::io::Result<Vec<u8>> {
    data.seek(SeekFrom::Start(offset))?;

    let mut buf = vec![0u8; len];
    let (_, filled) = fill_buf(data, &mut buf)?;
    buf.truncate(filled);
    Ok(buf)
}
