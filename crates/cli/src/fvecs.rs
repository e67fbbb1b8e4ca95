//! Reader and writer for flat vector files.
//!
//! Layout: `[count u32 LE][dim u32 LE]` followed by `count * dim` `f32 LE`.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

pub fn read_vectors(path: &Path) -> io::Result<(usize, Vec<Vec<f32>>)> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;
    if buf.len() < 8 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{:?}: missing count/dimension header", path),
        ));
    }
    let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let dim = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let data = &buf[8..];
    if data.len() != count * dim * 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "{:?}: expected {} x {} floats ({} bytes), found {} bytes",
                path,
                count,
                dim,
                count * dim * 4,
                data.len()
            ),
        ));
    }

    let vectors = data
        .chunks_exact(dim.max(1) * 4)
        .take(count)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        })
        .collect();
    Ok((dim, vectors))
}

pub fn write_vectors(path: &Path, vectors: &[Vec<f32>]) -> io::Result<()> {
    let dim = vectors.first().map_or(0, Vec::len);
    if vectors.iter().any(|v| v.len() != dim) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "all vectors must have the same dimension",
        ));
    }
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&(vectors.len() as u32).to_le_bytes())?;
    out.write_all(&(dim as u32).to_le_bytes())?;
    for v in vectors {
        for x in v {
            out.write_all(&x.to_le_bytes())?;
        }
    }
    out.flush()
}

/// Parse `"0.1,0.2,0.3"` into a vector.
pub fn parse_inline(s: &str) -> Result<Vec<f32>, String> {
    s.split(',')
        .map(|x| {
            x.trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid component {:?}: {}", x, e))
        })
        .collect()
}
