//! MP4 "demultiplexer" (§6, §9): detected, never opened. An MP4 input is
//! an immediate fatal error rather than a fallthrough to `ProbeFailed`,
//! so `probe` alone carries the format's entire implementation.

use std::io::SeekFrom;

use crate::error::IoError;
use crate::io::Reader;

/// An `ftyp`/`moov`/`mdat` box at the very start of the file is enough to
/// recognize MP4 without needing to walk the full box tree.
pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let start = reader.tell()?;
    let bytes = reader.read_to_vec(12);
    reader.seek(SeekFrom::Start(start))?;

    let bytes = match bytes {
        Ok(b) if b.len() == 12 => b,
        _ => return Ok(false),
    };

    let box_type = &bytes[4..8];
    Ok(matches!(box_type, b"ftyp" | b"moov" | b"mdat" | b"free" | b"skip"))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn recognizes_ftyp_box() {
        let mut bytes = vec![0, 0, 0, 20];
        bytes.extend_from_slice(b"ftyp");
        bytes.extend_from_slice(b"isom0000mp42");
        let mut r = Reader::from_source(Box::new(Cursor::new(bytes.clone())), bytes.len() as u64);

        assert!(probe(&mut r).unwrap());
        assert_eq!(r.tell().unwrap(), 0);
    }
}
