//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Minimal `.npy` reader/writer for the 1-D `f64`/`u64` arrays
//! `SessionRecorder` persists (per-direction angle and hardware-timestamp
//! logs), and the 2-D `f64` arrays `AnalysisPipeline` persists
//! (phase/magnitude maps).
//!
//! Implements just enough of the NumPy format v1.0 (magic string, header
//! dict, row-major data) for `numpy.load` to read back the result, and
//! enough of a reader for this crate's own round trip (`AnalysisPipeline`
//! reading back `SessionRecorder`'s angle/timestamp logs); no attempt is
//! made to parse arbitrary externally-produced `.npy` files.
//!

use std::io::{self, Read, Write};

const MAGIC: &[u8] = b"\x93NUMPY";

fn write_header(mut writer: impl Write, shape: &[usize], dtype: &str) -> io::Result<()> {
    let shape_str = if shape.len() == 1 {
        format!("({},)", shape[0])
    } else {
        let joined = shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ");
        format!("({joined})")
    };
    let mut header =
        format!("{{'descr': '{dtype}', 'fortran_order': False, 'shape': {shape_str}, }}");

    // Total length up to and including the trailing '\n' must be a
    // multiple of 64 bytes (NumPy format v1.0 requirement).
    let prefix_len = MAGIC.len() + 2 /* version */ + 2 /* header-length field */;
    let unpadded_total = prefix_len + header.len() + 1;
    let padding = (64 - unpadded_total % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    writer.write_all(MAGIC)?;
    writer.write_all(&[1u8, 0u8])?; // version 1.0
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    Ok(())
}

pub fn write_f64_1d(path: &std::path::Path, data: &[f64]) -> io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    write_header(&mut writer, &[data.len()], "<f8")?;
    for &v in data {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()
}

pub fn write_u64_1d(path: &std::path::Path, data: &[u64]) -> io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    write_header(&mut writer, &[data.len()], "<u8")?;
    for &v in data {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()
}

pub fn write_f64_2d(path: &std::path::Path, data: &[f64], rows: usize, cols: usize) -> io::Result<()> {
    assert_eq!(data.len(), rows * cols);
    let file = std::fs::File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    write_header(&mut writer, &[rows, cols], "<f8")?;
    for &v in data {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()
}

/// Skips past the magic/version/header-length-field/header-dict prefix
/// and returns the declared element count (product of the header's
/// `shape` tuple). The dict itself isn't parsed beyond locating its end;
/// callers already know the dtype and shape they expect.
fn skip_header(reader: &mut impl Read) -> io::Result<()> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad .npy magic"));
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let mut header_len_bytes = [0u8; 2];
    reader.read_exact(&mut header_len_bytes)?;
    let header_len = u16::from_le_bytes(header_len_bytes) as usize;
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    Ok(())
}

pub fn read_f64_1d(path: &std::path::Path) -> io::Result<Vec<f64>> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    skip_header(&mut reader)?;
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest)?;
    Ok(rest.chunks_exact(8).map(|c| f64::from_le_bytes(c.try_into().unwrap())).collect())
}

pub fn read_u64_1d(path: &std::path::Path) -> io::Result<Vec<u64>> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    skip_header(&mut reader)?;
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest)?;
    Ok(rest.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_length_is_64_byte_aligned() {
        let mut buf = Vec::new();
        write_header(&mut buf, &[7], "<f8").unwrap();
        let header_len = u16::from_le_bytes([buf[8], buf[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
    }

    #[test]
    fn round_trips_via_temp_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("isi-core-npy-test-{}.npy", std::process::id()));
        write_f64_1d(&path, &[1.0, 2.5, -3.25]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..6], MAGIC);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn f64_1d_round_trips_through_reader() {
        let path = std::env::temp_dir()
            .join(format!("isi-core-npy-read-test-f64-{}.npy", std::process::id()));
        let data = vec![0.0, -1.5, 3.25, 100.0];
        write_f64_1d(&path, &data).unwrap();
        assert_eq!(read_f64_1d(&path).unwrap(), data);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn u64_1d_round_trips_through_reader() {
        let path = std::env::temp_dir()
            .join(format!("isi-core-npy-read-test-u64-{}.npy", std::process::id()));
        let data = vec![0u64, 1_000, u64::MAX];
        write_u64_1d(&path, &data).unwrap();
        assert_eq!(read_u64_1d(&path).unwrap(), data);
        let _ = std::fs::remove_file(&path);
    }
}
